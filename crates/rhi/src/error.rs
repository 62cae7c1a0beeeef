//! RHI-specific error types.

use thiserror::Error;

/// Error type for all RHI operations.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Raw Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU memory allocator error
    #[error("allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfies the renderer's requirements
    #[error("no suitable GPU found")]
    NoSuitableAdapter,

    /// None of the candidate API levels is supported by the loader
    #[error("no supported API level (loader reports {major}.{minor})")]
    NoSupportedApiLevel { major: u32, minor: u32 },

    /// The swapchain no longer matches the surface and must be recreated
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    /// Swapchain creation or query error
    #[error("swapchain error: {0}")]
    Swapchain(String),

    /// Shader blob error
    #[error("shader error: {0}")]
    Shader(String),

    /// Pipeline construction error
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// An operation was attempted in an invalid state (bad slot index,
    /// out-of-bounds write, no-op resource transition)
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
