//! Frame orchestration for the trigon renderer.
//!
//! This crate owns the startup sequence (with its stable exit-code table),
//! the per-frame state machine, and the record → submit → fence-wait →
//! present → reset cycle.

pub mod frame;
pub mod renderer;
pub mod setup;

pub use frame::{FrameContext, FramePhase, PhaseError};
pub use renderer::Renderer;
pub use setup::{SetupError, SetupStage};
