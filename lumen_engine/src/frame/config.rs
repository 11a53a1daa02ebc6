/// Configuration of the frame lifecycle components

use std::time::Duration;
use crate::graphics_device::{ColorSpace, Format, PresentMode, SampleCount};

/// Preferences negotiated against the surface on every chain (re)build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfacePreferences {
    pub format: Format,
    pub color_space: ColorSpace,
    /// Used when reported, FIFO otherwise
    pub present_mode: PresentMode,
}

impl Default for SurfacePreferences {
    fn default() -> Self {
        Self {
            format: Format::B8G8R8A8_SRGB,
            color_space: ColorSpace::SrgbNonlinear,
            present_mode: PresentMode::Mailbox,
        }
    }
}

/// Attachments created alongside each presentable image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLayout {
    /// Requested sample count, lowered to what the device supports
    pub samples: SampleCount,
    /// Whether a depth attachment is created
    pub depth: bool,
    /// Depth formats in preference order
    pub depth_candidates: Vec<Format>,
}

impl Default for AttachmentLayout {
    fn default() -> Self {
        Self {
            samples: SampleCount::S1,
            depth: true,
            depth_candidates: vec![
                Format::D32_SFLOAT,
                Format::D32_SFLOAT_S8_UINT,
                Format::D24_UNORM_S8_UINT,
            ],
        }
    }
}

/// What the frame loop does when a rebuild finds the window minimized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimizedPolicy {
    /// Poll the window until it has a drawable size
    Block,
    /// Return `FrameStatus::Minimized` (or `PresentedRebuildDeferred` when
    /// the frame was already presented) and retry the rebuild next tick
    Skip,
}

/// Frame loop configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLoopConfig {
    /// Number of frame slots; fixed for the lifetime of the loop
    pub frames_in_flight: usize,
    /// Frame fence wait bound, `None` for unbounded
    pub fence_timeout: Option<Duration>,
    /// Image acquire bound, `None` for unbounded
    pub acquire_timeout: Option<Duration>,
    pub minimized_policy: MinimizedPolicy,
    /// Delay between window polls while minimized
    pub minimized_poll_interval: Duration,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout: None,
            acquire_timeout: None,
            minimized_policy: MinimizedPolicy::Block,
            minimized_poll_interval: Duration::from_millis(16),
        }
    }
}
