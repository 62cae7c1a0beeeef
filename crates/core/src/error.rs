//! Error types shared across the renderer crates.

use thiserror::Error;

/// Top-level error type for the renderer.
#[derive(Error, Debug)]
pub enum Error {
    /// Graphics API errors surfaced outside the RHI layer
    #[error("graphics error: {0}")]
    Graphics(String),

    /// Window creation or surface errors
    #[error("window error: {0}")]
    Window(String),

    /// Shader blob loading errors
    #[error("shader error: {0}")]
    Shader(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violations
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using the renderer's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
