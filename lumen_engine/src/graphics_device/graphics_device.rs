/// GraphicsDevice trait and the plain data types exchanged with backends
///
/// The frame lifecycle components (presentation chain, render targets,
/// frame sync set, frame loop) never talk to Vulkan directly. They go through
/// this object-safe trait, which a backend crate implements and which the
/// test suite mocks.

use std::time::Duration;
use bitflags::bitflags;
use crate::error::Result;

// ============================================================================
// Handles
// ============================================================================

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw backend handle value
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw backend handle value
            pub fn as_raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Presentation chain object (VkSwapchainKHR)
    ChainHandle
);
define_handle!(
    /// Image, either owned by a chain or allocated as an attachment
    ImageHandle
);
define_handle!(
    /// View onto an image
    ImageViewHandle
);
define_handle!(
    /// Framebuffer binding attachment views to a render pass
    FramebufferHandle
);
define_handle!(
    /// Render pass supplied by the pipeline layer
    RenderPassHandle
);
define_handle!(
    /// GPU-GPU signal
    SemaphoreHandle
);
define_handle!(
    /// GPU-CPU signal
    FenceHandle
);
define_handle!(
    /// Resettable command pool
    CommandPoolHandle
);
define_handle!(
    /// Primary command buffer
    CommandBufferHandle
);

// ============================================================================
// Formats and surface description
// ============================================================================

/// Pixel formats the engine negotiates or allocates
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    A2B10G10R10_UNORM,
    R16G16B16A16_SFLOAT,
    D16_UNORM,
    D32_SFLOAT,
    D24_UNORM_S8_UINT,
    D32_SFLOAT_S8_UINT,
    /// Backend format code with no named variant, passed through unchanged
    Other(i32),
}

impl Format {
    /// True for formats with a depth aspect
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D16_UNORM
                | Format::D32_SFLOAT
                | Format::D24_UNORM_S8_UINT
                | Format::D32_SFLOAT_S8_UINT
        )
    }

    /// True for formats with a stencil aspect
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24_UNORM_S8_UINT | Format::D32_SFLOAT_S8_UINT)
    }
}

/// Color space of presentable images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    SrgbNonlinear,
    ExtendedSrgbLinear,
    DisplayP3Nonlinear,
    Hdr10St2084,
    /// Backend color space code with no named variant
    Other(i32),
}

/// A (format, color space) pair as reported by the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: Format,
    pub color_space: ColorSpace,
}

/// Presentation scheduling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentMode {
    /// No vsync, may tear
    Immediate,
    /// Triple-buffering style, newest image replaces the queued one
    Mailbox,
    /// Vsync queue, always available
    Fifo,
    /// Vsync queue, tears when late
    FifoRelaxed,
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    /// Sentinel reported as the current extent when the window decides the size
    pub const UNDEFINED: Extent2D = Extent2D { width: u32::MAX, height: u32::MAX };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when the surface lets the application pick the extent
    pub fn is_undefined(self) -> bool {
        self.width == u32::MAX
    }

    /// True when either dimension is zero (minimized window)
    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp each dimension into `[min, max]`
    pub fn clamp(self, min: Extent2D, max: Extent2D) -> Extent2D {
        Extent2D {
            width: self.width.max(min.width).min(max.width),
            height: self.height.max(min.height).min(max.height),
        }
    }
}

/// Surface limits reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// 0 means no upper limit
    pub max_image_count: u32,
    /// `Extent2D::UNDEFINED` when the window decides
    pub current_extent: Extent2D,
    pub min_image_extent: Extent2D,
    pub max_image_extent: Extent2D,
}

/// Everything needed to negotiate a presentation chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSupport {
    pub capabilities: SurfaceCapabilities,
    /// Ordered as reported by the device
    pub formats: Vec<SurfaceFormat>,
    /// Ordered as reported by the device
    pub present_modes: Vec<PresentMode>,
}

/// Parameters for creating a presentation chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCreateInfo {
    pub format: Format,
    pub color_space: ColorSpace,
    pub present_mode: PresentMode,
    pub extent: Extent2D,
    pub image_count: u32,
    /// Chain being replaced, handed to the driver for resource recycling
    pub old_chain: Option<ChainHandle>,
}

// ============================================================================
// Attachments
// ============================================================================

/// MSAA sample count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleCount {
    S1,
    S2,
    S4,
    S8,
    S16,
}

impl SampleCount {
    pub fn as_u32(self) -> u32 {
        match self {
            SampleCount::S1 => 1,
            SampleCount::S2 => 2,
            SampleCount::S4 => 4,
            SampleCount::S8 => 8,
            SampleCount::S16 => 16,
        }
    }

    pub fn is_multisampled(self) -> bool {
        self != SampleCount::S1
    }
}

bitflags! {
    /// How an attachment image will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const COLOR_ATTACHMENT = 1 << 0;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 1;
        /// Contents never leave tile memory (MSAA color, depth)
        const TRANSIENT_ATTACHMENT = 1 << 2;
        const SAMPLED = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
    }
}

/// Attachment image allocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentImageDesc {
    /// Debug name, also used as allocation name
    pub label: String,
    pub extent: Extent2D,
    pub format: Format,
    pub samples: SampleCount,
    pub usage: ImageUsage,
}

/// Framebuffer creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub render_pass: RenderPassHandle,
    /// In render pass attachment order
    pub attachments: Vec<ImageViewHandle>,
    pub extent: Extent2D,
}

// ============================================================================
// Queue operations
// ============================================================================

/// Outcome of acquiring a presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// An image was acquired; `suboptimal` means it still presents but the
    /// chain no longer matches the surface exactly
    Acquired { image_index: u32, suboptimal: bool },
    /// The chain can no longer present and must be rebuilt
    OutOfDate,
}

/// Outcome of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// One queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    pub command_buffer: CommandBufferHandle,
    /// Waited at the color attachment output stage
    pub wait_semaphore: SemaphoreHandle,
    pub signal_semaphore: SemaphoreHandle,
    pub fence: FenceHandle,
}

// ============================================================================
// Device configuration
// ============================================================================

/// Minimum validation message severity forwarded to the engine logger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    ErrorsOnly,
    ErrorsAndWarnings,
    All,
}

/// Validation message counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

impl ValidationStats {
    pub fn total(&self) -> u32 {
        self.errors + self.warnings + self.info + self.verbose
    }
}

/// Graphics device configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable validation/debug layers
    pub enable_validation: bool,
    /// Application name
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Validation messages below this level are dropped
    pub debug_severity: DebugSeverity,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Lumen Application".to_string(),
            app_version: (1, 0, 0),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
        }
    }
}

// ============================================================================
// GraphicsDevice trait
// ============================================================================

/// Backend seam for the frame lifecycle
///
/// All methods take `&self`: backends serialize queue access internally.
/// Destruction of anything a submitted frame may reference requires a
/// [`DeviceIdle`] token, which can only be obtained by waiting for the
/// device to go idle.
pub trait GraphicsDevice: Send + Sync {
    // ===== Surface and presentation chain =====

    /// Query capabilities, formats and present modes of the window surface
    fn surface_support(&self) -> Result<SurfaceSupport>;

    /// Create a presentation chain
    ///
    /// Backends pick exclusive sharing when graphics and present queues are
    /// the same family, concurrent sharing otherwise.
    fn create_chain(&self, info: &ChainCreateInfo) -> Result<ChainHandle>;

    /// Images owned by a chain, in presentation index order
    fn chain_images(&self, chain: ChainHandle) -> Result<Vec<ImageHandle>>;

    fn destroy_chain(&self, chain: ChainHandle, idle: &DeviceIdle);

    // ===== Images, views, framebuffers =====

    /// Create a 2D view; the aspect follows from the format
    fn create_image_view(&self, image: ImageHandle, format: Format) -> Result<ImageViewHandle>;

    fn destroy_image_view(&self, view: ImageViewHandle, idle: &DeviceIdle);

    /// Allocate a device-local attachment image
    ///
    /// # Errors
    ///
    /// `Error::OutOfMemory` when the allocator is exhausted.
    fn create_attachment_image(&self, desc: &AttachmentImageDesc) -> Result<ImageHandle>;

    fn destroy_attachment_image(&self, image: ImageHandle, idle: &DeviceIdle);

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferHandle>;

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle, idle: &DeviceIdle);

    /// True when `format` can be an optimal-tiling depth/stencil attachment
    fn supports_depth_format(&self, format: Format) -> bool;

    /// Highest sample count usable for both color and depth attachments
    fn max_sample_count(&self) -> SampleCount;

    // ===== Synchronization =====

    fn create_semaphore(&self) -> Result<SemaphoreHandle>;

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle, idle: &DeviceIdle);

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle>;

    fn destroy_fence(&self, fence: FenceHandle, idle: &DeviceIdle);

    /// Block until the fence is signaled
    ///
    /// `None` waits without bound. A finite timeout that elapses returns
    /// `Error::Timeout`.
    fn wait_for_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> Result<()>;

    fn reset_fence(&self, fence: FenceHandle) -> Result<()>;

    fn is_fence_signaled(&self, fence: FenceHandle) -> Result<bool>;

    /// Block until all queues are idle
    ///
    /// Use [`DeviceIdle::wait`] instead to obtain the teardown token.
    fn wait_idle(&self) -> Result<()>;

    // ===== Command recording =====

    /// Create a pool whose buffers can be reset individually
    fn create_command_pool(&self) -> Result<CommandPoolHandle>;

    /// Destroying the pool frees its command buffers
    fn destroy_command_pool(&self, pool: CommandPoolHandle, idle: &DeviceIdle);

    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> Result<CommandBufferHandle>;

    /// Clear recorded content, keeping the allocation
    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()>;

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()>;

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()>;

    // ===== Queue operations =====

    /// Acquire the next presentable image, signaling `signal` when it is ready
    fn acquire_next_image(
        &self,
        chain: ChainHandle,
        signal: SemaphoreHandle,
        timeout: Option<Duration>,
    ) -> Result<AcquireStatus>;

    fn submit(&self, info: &SubmitInfo) -> Result<()>;

    /// Queue `image_index` for presentation once `wait` is signaled
    fn present(
        &self,
        chain: ChainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> Result<PresentStatus>;
}

/// Proof that the device was idle when it was created
///
/// Only [`DeviceIdle::wait`] constructs it, so any API taking `&DeviceIdle`
/// runs after at least one completed idle wait. The type cannot see later
/// queue work: the proof only holds while no acquire, submit or present
/// happens between `wait` and the destroy calls it gates. Obtain it right
/// before tearing down and drop it afterwards; it is neither `Clone` nor
/// `Copy`.
#[derive(Debug)]
pub struct DeviceIdle {
    _private: (),
}

impl DeviceIdle {
    /// Block until the device is idle and return the proof
    pub fn wait(device: &dyn GraphicsDevice) -> Result<DeviceIdle> {
        device.wait_idle()?;
        Ok(DeviceIdle { _private: () })
    }
}
