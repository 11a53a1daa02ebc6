/*!
# Lumen Engine - Vulkan Backend

Vulkan implementation of the `GraphicsDevice` trait of `lumen_engine`.

Uses Ash for the Vulkan bindings, ash-window for surface creation and
gpu-allocator for attachment memory.

```no_run
use lumen_engine::lumen::device::Config;
use lumen_engine_renderer_vulkan::lumen::VulkanGraphicsDevice;
# fn demo(window: &winit::window::Window) -> lumen_engine::lumen::Result<()> {
let device = VulkanGraphicsDevice::new(window, Config::default())?;
# Ok(())
# }
```
*/

mod vulkan;
mod vulkan_convert;
mod vulkan_render_pass;
mod debug;

pub mod lumen {
    pub use crate::vulkan::VulkanGraphicsDevice;
}

// Re-export debug utilities
pub use debug::{get_validation_stats, print_validation_stats_report};
