//! PresentationChain - the presentable images of a window surface
//!
//! Negotiates image count, format, present mode and extent against what the
//! device reports, owns a view onto every image, and is rebuilt in place when
//! the surface is invalidated. Every successful build bumps the chain's
//! [`Generation`].

use std::sync::Arc;
use crate::error::{Error, Result};
use crate::graphics_device::{
    ChainCreateInfo, ChainHandle, ColorSpace, DeviceIdle, Extent2D, Format, GraphicsDevice,
    ImageHandle, ImageViewHandle, PresentMode, SurfaceCapabilities, SurfaceFormat,
    SurfaceSupport, SurfaceWindow,
};
use crate::frame::SurfacePreferences;
use crate::{engine_bail, engine_debug, engine_error, engine_info, engine_warn};

const LOG_SOURCE: &str = "lumen::PresentationChain";

// ============================================================================
// Generation
// ============================================================================

/// Version tag of a chain build, shared with the render targets built from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

// ============================================================================
// Negotiation
// ============================================================================

/// Parameters of one chain build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub format: Format,
    pub color_space: ColorSpace,
    pub present_mode: PresentMode,
    pub extent: Extent2D,
    /// Requested image count; the driver may create more
    pub image_count: u32,
}

/// One more than the minimum, capped by a nonzero maximum
pub fn choose_image_count(caps: &SurfaceCapabilities) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// Exact match on format and color space, else the first reported format
pub fn choose_surface_format(
    available: &[SurfaceFormat],
    preferences: &SurfacePreferences,
) -> Option<SurfaceFormat> {
    available
        .iter()
        .find(|candidate| {
            candidate.format == preferences.format
                && candidate.color_space == preferences.color_space
        })
        .or_else(|| available.first())
        .copied()
}

/// The preferred mode when reported, FIFO otherwise
pub fn choose_present_mode(available: &[PresentMode], preferred: PresentMode) -> PresentMode {
    if available.contains(&preferred) {
        preferred
    } else {
        PresentMode::Fifo
    }
}

/// The surface's current extent, or the window size clamped to the surface limits
pub fn choose_extent(caps: &SurfaceCapabilities, window_size: Extent2D) -> Extent2D {
    if !caps.current_extent.is_undefined() {
        return caps.current_extent;
    }
    window_size.clamp(caps.min_image_extent, caps.max_image_extent)
}

/// Negotiate a full chain configuration
///
/// # Errors
///
/// `Error::SurfaceUnsupported` when the surface reports no format or no present mode.
pub fn negotiate(
    support: &SurfaceSupport,
    preferences: &SurfacePreferences,
    window_size: Extent2D,
) -> Result<SurfaceConfig> {
    let surface_format = choose_surface_format(&support.formats, preferences)
        .ok_or_else(|| {
            engine_error!(LOG_SOURCE, "Surface reports no formats");
            Error::SurfaceUnsupported("surface reports no formats".to_string())
        })?;
    if support.present_modes.is_empty() {
        engine_error!(LOG_SOURCE, "Surface reports no present modes");
        return Err(Error::SurfaceUnsupported("surface reports no present modes".to_string()));
    }

    if surface_format.format != preferences.format
        || surface_format.color_space != preferences.color_space
    {
        engine_warn!(LOG_SOURCE, "Preferred format {:?}/{:?} unavailable, using {:?}/{:?}",
            preferences.format, preferences.color_space,
            surface_format.format, surface_format.color_space);
    }

    let present_mode = choose_present_mode(&support.present_modes, preferences.present_mode);
    if present_mode != preferences.present_mode {
        engine_debug!(LOG_SOURCE, "Present mode {:?} unavailable, using {:?}",
            preferences.present_mode, present_mode);
    }

    Ok(SurfaceConfig {
        format: surface_format.format,
        color_space: surface_format.color_space,
        present_mode,
        extent: choose_extent(&support.capabilities, window_size),
        image_count: choose_image_count(&support.capabilities),
    })
}

// ============================================================================
// PresentationChain
// ============================================================================

pub struct PresentationChain {
    device: Arc<dyn GraphicsDevice>,
    window: Arc<dyn SurfaceWindow>,
    preferences: SurfacePreferences,
    handle: Option<ChainHandle>,
    images: Vec<ImageHandle>,
    views: Vec<ImageViewHandle>,
    config: SurfaceConfig,
    generation: Generation,
}

impl PresentationChain {
    /// Negotiate and build the first chain
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        window: Arc<dyn SurfaceWindow>,
        preferences: SurfacePreferences,
    ) -> Result<Self> {
        let support = device.surface_support()?;
        let config = negotiate(&support, &preferences, window.framebuffer_size())?;

        let mut chain = Self {
            device,
            window,
            preferences,
            handle: None,
            images: Vec::new(),
            views: Vec::new(),
            config,
            generation: Generation::default(),
        };
        chain.create(None)?;
        Ok(chain)
    }

    fn create(&mut self, old_chain: Option<ChainHandle>) -> Result<()> {
        let config = self.config;
        if config.extent.is_zero() {
            engine_bail!(LOG_SOURCE, "Cannot build a zero-sized chain ({}x{})",
                config.extent.width, config.extent.height);
        }

        let handle = self.device.create_chain(&ChainCreateInfo {
            format: config.format,
            color_space: config.color_space,
            present_mode: config.present_mode,
            extent: config.extent,
            image_count: config.image_count,
            old_chain,
        })?;
        self.handle = Some(handle);

        self.images = self.device.chain_images(handle)?;
        for &image in &self.images {
            let view = self.device.create_image_view(image, config.format)?;
            self.views.push(view);
        }

        self.generation = self.generation.next();
        engine_info!(LOG_SOURCE, "Chain built: {}x{} {:?} {:?}, {} images (generation {})",
            config.extent.width, config.extent.height, config.format, config.present_mode,
            self.images.len(), self.generation.value());
        Ok(())
    }

    fn destroy_views(&mut self, idle: &DeviceIdle) {
        for view in self.views.drain(..) {
            self.device.destroy_image_view(view, idle);
        }
        self.images.clear();
    }

    /// Release every view and the chain object
    ///
    /// Calling it again is a no-op.
    pub fn teardown(&mut self, idle: &DeviceIdle) {
        self.destroy_views(idle);
        if let Some(handle) = self.handle.take() {
            self.device.destroy_chain(handle, idle);
            engine_debug!(LOG_SOURCE, "Chain torn down (generation {})", self.generation.value());
        }
    }

    /// Renegotiate against the current surface and window size, then rebuild
    ///
    /// The previous chain is handed to the driver as `old_chain` and destroyed
    /// once the new one exists.
    pub fn rebuild(&mut self, idle: &DeviceIdle) -> Result<()> {
        self.destroy_views(idle);
        let old_chain = self.handle.take();

        let result = self.renegotiate(old_chain);

        if let Some(old) = old_chain {
            self.device.destroy_chain(old, idle);
        }
        result
    }

    fn renegotiate(&mut self, old_chain: Option<ChainHandle>) -> Result<()> {
        let support = self.device.surface_support()?;
        self.config = negotiate(&support, &self.preferences, self.window.framebuffer_size())?;
        self.create(old_chain)
    }

    pub fn handle(&self) -> Option<ChainHandle> {
        self.handle
    }

    pub fn is_built(&self) -> bool {
        self.handle.is_some()
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn extent(&self) -> Extent2D {
        self.config.extent
    }

    pub fn format(&self) -> Format {
        self.config.format
    }

    pub fn present_mode(&self) -> PresentMode {
        self.config.present_mode
    }

    /// Number of images the driver actually created
    pub fn image_count(&self) -> usize {
        self.views.len()
    }

    pub fn image(&self, index: usize) -> Option<ImageHandle> {
        self.images.get(index).copied()
    }

    pub fn image_view(&self, index: usize) -> Option<ImageViewHandle> {
        self.views.get(index).copied()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Width over height, for projection setup
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.config.extent;
        if extent.height == 0 {
            return 1.0;
        }
        extent.width as f32 / extent.height as f32
    }

    pub fn window(&self) -> &Arc<dyn SurfaceWindow> {
        &self.window
    }

    pub fn preferences(&self) -> &SurfacePreferences {
        &self.preferences
    }
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        if self.handle.is_none() && self.views.is_empty() {
            return;
        }
        match DeviceIdle::wait(self.device.as_ref()) {
            Ok(idle) => self.teardown(&idle),
            Err(e) => engine_error!(LOG_SOURCE, "Leaking chain, device idle wait failed: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "presentation_chain_tests.rs"]
mod tests;
