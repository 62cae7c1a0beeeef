//! Platform layer: window management and surface creation.
//!
//! The window and its event stream are collaborators of the renderer, not
//! part of it; this crate wraps winit and hands the renderer a Vulkan
//! surface plus raw size information, nothing more.

mod window;

pub use window::{Surface, Window};
