/// Window seam and the "surface changed" flag
///
/// The frame loop only needs two things from a window: its framebuffer size
/// in pixels, and a way to wait while it is minimized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use winit::window::Window;
use crate::graphics_device::Extent2D;

/// Window queried by the presentation chain
pub trait SurfaceWindow: Send + Sync {
    /// Current framebuffer size in physical pixels, `(0, 0)` when minimized
    fn framebuffer_size(&self) -> Extent2D;

    /// Wait up to `timeout` for window events to change the framebuffer size
    fn wait_events(&self, timeout: Duration);
}

impl SurfaceWindow for Window {
    fn framebuffer_size(&self) -> Extent2D {
        let size = self.inner_size();
        Extent2D::new(size.width, size.height)
    }

    fn wait_events(&self, timeout: Duration) {
        // winit 0.30 delivers events through the application's event loop;
        // the size query above reads the OS state directly, so sleeping is enough.
        std::thread::sleep(timeout);
    }
}

/// Shared "surface changed" flag with read-and-clear semantics
///
/// Clone it into a resize handler; the frame loop consumes it at the
/// present step.
#[derive(Debug, Clone, Default)]
pub struct SurfaceChangedFlag {
    flag: Arc<AtomicBool>,
}

impl SurfaceChangedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Return the current value and clear it
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "window_tests.rs"]
mod tests;
