//! RenderTargetSet - one composite render target per presentable image
//!
//! Each target binds the image's view plus the shared MSAA color and depth
//! attachments into a framebuffer for the application's render pass.
//! The whole set is rebuilt after every chain rebuild and carries the chain
//! generation it was built from.

use std::sync::Arc;
use crate::error::{Error, Result};
use crate::frame::{AttachmentLayout, Generation, PresentationChain};
use crate::graphics_device::{
    AttachmentImageDesc, DeviceIdle, Extent2D, Format, FramebufferDesc, FramebufferHandle,
    GraphicsDevice, ImageHandle, ImageUsage, ImageViewHandle, RenderPassHandle, SampleCount,
};
use crate::{engine_bail, engine_debug, engine_err, engine_error};

const LOG_SOURCE: &str = "lumen::RenderTargetSet";

/// Framebuffer and attachments for one presentable image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeTarget {
    image_index: u32,
    framebuffer: FramebufferHandle,
    attachments: Vec<ImageViewHandle>,
    extent: Extent2D,
    generation: Generation,
}

impl CompositeTarget {
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    /// `[msaa_color, depth, resolve]` when multisampled, `[color, depth]` otherwise;
    /// depth is absent when the layout has none
    pub fn attachments(&self) -> &[ImageViewHandle] {
        &self.attachments
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

#[derive(Debug, Clone, Copy)]
struct AttachmentImage {
    image: ImageHandle,
    view: ImageViewHandle,
}

/// Highest sample count not above the request that the device supports
pub fn choose_sample_count(requested: SampleCount, device_max: SampleCount) -> SampleCount {
    requested.min(device_max)
}

/// First candidate usable as an optimal-tiling depth attachment
pub fn choose_depth_format(device: &dyn GraphicsDevice, candidates: &[Format]) -> Result<Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| format.is_depth() && device.supports_depth_format(format))
        .ok_or_else(|| {
            engine_error!(LOG_SOURCE, "None of the depth formats {:?} is supported", candidates);
            Error::AttachmentCreateFailed("no supported depth format".to_string())
        })
}

fn attachment_error(what: &str, err: Error) -> Error {
    engine_error!(LOG_SOURCE, "Failed to create {}: {}", what, err);
    match err {
        Error::DeviceLost(_) => err,
        other => Error::AttachmentCreateFailed(format!("{}: {}", what, other)),
    }
}

pub struct RenderTargetSet {
    device: Arc<dyn GraphicsDevice>,
    render_pass: RenderPassHandle,
    samples: SampleCount,
    depth_format: Option<Format>,
    color_format: Format,
    msaa_color: Option<AttachmentImage>,
    depth: Option<AttachmentImage>,
    targets: Vec<CompositeTarget>,
    extent: Extent2D,
    generation: Generation,
}

impl RenderTargetSet {
    /// Build one target per image of `chain`
    ///
    /// # Errors
    ///
    /// `Error::AttachmentCreateFailed` when an image, view or framebuffer is refused.
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        chain: &PresentationChain,
        render_pass: RenderPassHandle,
        layout: &AttachmentLayout,
    ) -> Result<Self> {
        let samples = choose_sample_count(layout.samples, device.max_sample_count());
        if samples != layout.samples {
            engine_debug!(LOG_SOURCE, "Requested {:?} lowered to {:?}", layout.samples, samples);
        }
        let depth_format = if layout.depth {
            Some(choose_depth_format(device.as_ref(), &layout.depth_candidates)?)
        } else {
            None
        };

        let mut set = Self {
            device,
            render_pass,
            samples,
            depth_format,
            color_format: chain.format(),
            msaa_color: None,
            depth: None,
            targets: Vec::new(),
            extent: chain.extent(),
            generation: Generation::default(),
        };
        set.build(chain)?;
        Ok(set)
    }

    fn create_attachment(
        &self,
        label: &str,
        format: Format,
        usage: ImageUsage,
        extent: Extent2D,
    ) -> Result<AttachmentImage> {
        let image = self.device
            .create_attachment_image(&AttachmentImageDesc {
                label: label.to_string(),
                extent,
                format,
                samples: self.samples,
                usage,
            })
            .map_err(|e| attachment_error(label, e))?;

        match self.device.create_image_view(image, format) {
            Ok(view) => Ok(AttachmentImage { image, view }),
            Err(e) => {
                // The image was never used, an idle wait is enough to release it
                if let Ok(idle) = DeviceIdle::wait(self.device.as_ref()) {
                    self.device.destroy_attachment_image(image, &idle);
                }
                Err(attachment_error(label, e))
            }
        }
    }

    fn build(&mut self, chain: &PresentationChain) -> Result<()> {
        let extent = chain.extent();

        if self.samples.is_multisampled() {
            self.msaa_color = Some(self.create_attachment(
                "msaa_color",
                self.color_format,
                ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSIENT_ATTACHMENT,
                extent,
            )?);
        }
        if let Some(depth_format) = self.depth_format {
            self.depth = Some(self.create_attachment(
                "depth",
                depth_format,
                ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                extent,
            )?);
        }

        for index in 0..chain.image_count() {
            let view = chain.image_view(index)
                .ok_or_else(|| engine_err!(LOG_SOURCE, "Chain has no view for image {}", index))?;

            let mut attachments = Vec::with_capacity(3);
            if let Some(msaa) = self.msaa_color {
                attachments.push(msaa.view);
            } else {
                attachments.push(view);
            }
            if let Some(depth) = self.depth {
                attachments.push(depth.view);
            }
            if self.msaa_color.is_some() {
                attachments.push(view);
            }

            let framebuffer = self.device
                .create_framebuffer(&FramebufferDesc {
                    render_pass: self.render_pass,
                    attachments: attachments.clone(),
                    extent,
                })
                .map_err(|e| attachment_error("framebuffer", e))?;

            self.targets.push(CompositeTarget {
                image_index: index as u32,
                framebuffer,
                attachments,
                extent,
                generation: chain.generation(),
            });
        }

        self.extent = extent;
        self.generation = chain.generation();
        engine_debug!(LOG_SOURCE, "{} targets built at {}x{}, {:?}, depth {:?} (generation {})",
            self.targets.len(), extent.width, extent.height, self.samples, self.depth_format,
            self.generation.value());
        Ok(())
    }

    /// Release every framebuffer and attachment
    ///
    /// Calling it again is a no-op.
    pub fn teardown(&mut self, idle: &DeviceIdle) {
        for target in self.targets.drain(..) {
            self.device.destroy_framebuffer(target.framebuffer, idle);
        }
        for attachment in [self.msaa_color.take(), self.depth.take()].into_iter().flatten() {
            self.device.destroy_image_view(attachment.view, idle);
            self.device.destroy_attachment_image(attachment.image, idle);
        }
    }

    /// Free the old targets and build new ones from the rebuilt `chain`
    ///
    /// # Errors
    ///
    /// * `Error::SurfaceFormatChanged` when the chain's color format differs
    ///   from the one the render pass was made for.
    /// * `Error::AttachmentCreateFailed` as for [`RenderTargetSet::new`].
    pub fn rebuild(&mut self, chain: &PresentationChain, idle: &DeviceIdle) -> Result<()> {
        if chain.generation() <= self.generation {
            engine_bail!(LOG_SOURCE,
                "Rebuild requires a rebuilt chain (chain generation {}, targets generation {})",
                chain.generation().value(), self.generation.value());
        }

        self.teardown(idle);

        if chain.format() != self.color_format {
            engine_error!(LOG_SOURCE, "Chain format changed from {:?} to {:?}",
                self.color_format, chain.format());
            return Err(Error::SurfaceFormatChanged {
                old: self.color_format,
                new: chain.format(),
            });
        }

        self.build(chain)
    }

    pub fn target(&self, image_index: u32) -> Option<&CompositeTarget> {
        self.targets.get(image_index as usize)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn samples(&self) -> SampleCount {
        self.samples
    }

    pub fn depth_format(&self) -> Option<Format> {
        self.depth_format
    }

    pub fn color_format(&self) -> Format {
        self.color_format
    }

    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }
}

impl Drop for RenderTargetSet {
    fn drop(&mut self) {
        if self.targets.is_empty() && self.msaa_color.is_none() && self.depth.is_none() {
            return;
        }
        match DeviceIdle::wait(self.device.as_ref()) {
            Ok(idle) => self.teardown(&idle),
            Err(e) => engine_error!(LOG_SOURCE, "Leaking render targets, device idle wait failed: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "render_target_set_tests.rs"]
mod tests;
