//! Vulkan abstraction layer for the trigon renderer.
//!
//! This crate wraps the raw API behind small, single-owner handle types:
//! - Instance creation with API-level negotiation
//! - Adapter (physical device) selection by vendor preference
//! - Logical device and queue management
//! - Swapchain, render-target views, and tracked resource states
//! - Buffer upload, pipeline construction, shader modules
//! - Command recording and submission
//! - CPU-GPU synchronization via a monotonic timeline fence

mod error;

pub mod adapter;
pub mod barrier;
pub mod buffer;
pub mod command;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod target;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that callers need
pub use ash::vk;
