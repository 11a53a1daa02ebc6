/*!
# Lumen Engine

Core of the Lumen rendering engine: the frame lifecycle manager.

This crate owns the protocol by which frames are acquired, recorded,
submitted and presented, and by which the presentation surface is rebuilt
when it becomes invalid. GPU access goes through the [`GraphicsDevice`]
trait, implemented by backend crates (`lumen_engine_renderer_vulkan`).

## Architecture

- **PresentationChain**: presentable images negotiated against the window surface
- **RenderTargetSet**: one framebuffer per presentable image, with MSAA/depth attachments
- **FrameSyncSet**: per-slot semaphores, fence and command buffer
- **FrameLoop**: wait → acquire → record → submit → present → advance, rebuilding on invalidation

[`GraphicsDevice`]: crate::lumen::GraphicsDevice
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod graphics_device;
pub mod frame;

// Main lumen namespace module
pub mod lumen {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine (logger host)
    pub use crate::engine::Engine;

    // Backend seam
    pub use crate::graphics_device::{GraphicsDevice, DeviceIdle, SurfaceWindow, SurfaceChangedFlag};

    // Frame lifecycle
    pub use crate::frame::{
        PresentationChain, RenderTargetSet, FrameSyncSet, FrameLoop,
        FrameLoopConfig, FrameContext, FrameStatus, FrameState,
    };

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger, SeverityFilter};
    }

    // Device sub-module with all handle and description types
    pub mod device {
        pub use crate::graphics_device::*;
    }

    // Frame sub-module with configuration and negotiation helpers
    pub mod frame {
        pub use crate::frame::*;
    }
}
