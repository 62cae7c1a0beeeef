//! Foundational types for the trigon renderer.
//!
//! This crate carries the pieces every other crate needs:
//! - Error type and result alias
//! - Logging initialization
//! - Frame timing

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;
