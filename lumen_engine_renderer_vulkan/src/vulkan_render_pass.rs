/// Render passes matching the composite target attachment layout
///
/// `RenderTargetSet` binds `[color, depth?]`, or `[msaa_color, depth?, resolve]`
/// when multisampled. The helpers here build a single-subpass render pass
/// with that attachment order and record a clear of it, for applications
/// and tests without a pipeline layer of their own.

use lumen_engine::lumen::{DeviceIdle, Result};
use lumen_engine::lumen::device::{
    CommandBufferHandle, Extent2D, Format, RenderPassHandle, SampleCount,
};
use lumen_engine::lumen::frame::CompositeTarget;
use ash::vk;
use ash::vk::Handle;

use crate::vulkan::VulkanGraphicsDevice;
use crate::vulkan_convert::{extent_to_vk, format_to_vk, sample_count_to_vk, vk_failure};

impl VulkanGraphicsDevice {
    /// Create a render pass for composite targets
    ///
    /// Color ends in `PRESENT_SRC_KHR`, ready for presentation. The depth
    /// attachment is cleared and discarded.
    pub fn create_render_pass(
        &self,
        color_format: Format,
        depth_format: Option<Format>,
        samples: SampleCount,
    ) -> Result<RenderPassHandle> {
        let multisampled = samples.is_multisampled();
        let mut attachments = Vec::with_capacity(3);

        attachments.push(vk::AttachmentDescription::default()
            .format(format_to_vk(color_format))
            .samples(sample_count_to_vk(samples))
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(if multisampled { vk::AttachmentStoreOp::DONT_CARE } else { vk::AttachmentStoreOp::STORE })
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if multisampled {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            }));
        let color_ref = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let depth_ref = depth_format.map(|format| {
            attachments.push(vk::AttachmentDescription::default()
                .format(format_to_vk(format))
                .samples(sample_count_to_vk(samples))
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
            vk::AttachmentReference::default()
                .attachment(attachments.len() as u32 - 1)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        });

        let resolve_ref = if multisampled {
            attachments.push(vk::AttachmentDescription::default()
                .format(format_to_vk(color_format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR));
            Some([vk::AttachmentReference::default()
                .attachment(attachments.len() as u32 - 1)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)])
        } else {
            None
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref);
        if let Some(ref depth_ref) = depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        if let Some(ref resolve_ref) = resolve_ref {
            subpass = subpass.resolve_attachments(resolve_ref);
        }

        let (stage_mask, access_mask) = if depth_ref.is_some() {
            (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
        } else {
            (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
        };

        // Waits on the acquire semaphore stage before touching the image
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stage_mask)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stage_mask)
            .dst_access_mask(access_mask);

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        let render_pass = unsafe {
            self.raw_device()
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| vk_failure(e, "create_render_pass"))?
        };
        Ok(RenderPassHandle::from_raw(render_pass.as_raw()))
    }

    pub fn destroy_render_pass(&self, render_pass: RenderPassHandle, _idle: &DeviceIdle) {
        unsafe {
            self.raw_device()
                .destroy_render_pass(vk::RenderPass::from_raw(render_pass.as_raw()), None);
        }
    }

    /// Record a render pass over `target` that only clears it
    ///
    /// `command_buffer` must be recording.
    pub fn record_clear_pass(
        &self,
        command_buffer: CommandBufferHandle,
        render_pass: RenderPassHandle,
        target: &CompositeTarget,
        color: [f32; 4],
    ) {
        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }];
        // One value per attachment; the resolve target ignores its value
        clear_values.resize(
            target.attachments().len(),
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        );

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk::RenderPass::from_raw(render_pass.as_raw()))
            .framebuffer(vk::Framebuffer::from_raw(target.framebuffer().as_raw()))
            .render_area(full_area(target.extent()))
            .clear_values(&clear_values);

        let command_buffer = vk::CommandBuffer::from_raw(command_buffer.as_raw());
        unsafe {
            self.raw_device().cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
            self.raw_device().cmd_end_render_pass(command_buffer);
        }
    }
}

fn full_area(extent: Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: extent_to_vk(extent),
    }
}
