//! Error types for the Lumen engine
//!
//! This module defines the error types used throughout the engine,
//! including surface negotiation, attachment creation, and frame submission.
//!
//! Recoverable surface conditions (out-of-date, suboptimal, minimized window)
//! are NOT errors: they are reported as status values by the graphics device
//! and handled by the frame loop.

use std::fmt;

use crate::graphics_device::Format;

/// Result type for Lumen engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Lumen engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The surface reports no usable format or present mode
    SurfaceUnsupported(String),

    /// An attachment image, view or framebuffer could not be created
    AttachmentCreateFailed(String),

    /// Out of GPU memory
    OutOfMemory,

    /// The presentable color format changed across a rebuild
    ///
    /// The render pass bound to the render targets is no longer compatible.
    SurfaceFormatChanged {
        old: Format,
        new: Format,
    },

    /// The logical device was lost
    DeviceLost(String),

    /// A configured finite wait elapsed
    Timeout(String),

    /// Backend-specific error (Vulkan, etc.)
    BackendError(String),

    /// Initialization failed (device, frame loop, subsystems)
    InitializationFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SurfaceUnsupported(msg) => write!(f, "Surface unsupported: {}", msg),
            Error::AttachmentCreateFailed(msg) => write!(f, "Attachment creation failed: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::SurfaceFormatChanged { old, new } => {
                write!(f, "Surface format changed from {:?} to {:?}", old, new)
            }
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
