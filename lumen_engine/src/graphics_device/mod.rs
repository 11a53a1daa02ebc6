/// Graphics device module - backend seam and window seam

pub mod graphics_device;
pub mod window;

pub use graphics_device::*;
pub use window::*;

// Mock graphics device for tests (no GPU required)
#[cfg(test)]
pub mod mock_graphics_device;
