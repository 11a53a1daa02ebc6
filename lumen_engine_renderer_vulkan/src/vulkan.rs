/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait

use lumen_engine::lumen::{GraphicsDevice, DeviceIdle, Result, Error};
use lumen_engine::lumen::device::{
    AcquireStatus, AttachmentImageDesc, ChainCreateInfo, ChainHandle, CommandBufferHandle,
    CommandPoolHandle, Config, FenceHandle, Format, FramebufferDesc, FramebufferHandle,
    ImageHandle, ImageViewHandle, PresentStatus, SampleCount, SemaphoreHandle, SubmitInfo,
    SurfaceSupport,
};
use lumen_engine::{engine_debug, engine_error, engine_info, engine_warn};
use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use rustc_hash::FxHashMap;
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::vulkan_convert::{
    aspect_for_format, capabilities_from_vk, color_space_to_vk, extent_to_vk, format_to_vk,
    image_usage_to_vk, max_sample_count_from_vk, present_mode_from_vk, present_mode_to_vk,
    sample_count_to_vk, surface_formats_from_vk, timeout_to_ns, vk_failure,
};

const LOG_SOURCE: &str = "lumen::vulkan";

/// Lock a mutex, recovering the data if a panicking thread poisoned it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Vulkan device bound to one window surface
///
/// Owns the instance, the logical device, the surface and the GPU memory
/// allocator. Every object it hands out is referred to by an engine handle
/// wrapping the raw Vulkan handle value.
///
/// The window passed to [`VulkanGraphicsDevice::new`] must outlive the device.
pub struct VulkanGraphicsDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,

    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    present_queue: vk::Queue,
    present_queue_family: u32,
    /// Serializes queue submission, presentation and device-wide waits
    queue_lock: Mutex<()>,

    /// GPU memory allocator, dropped before the device
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Memory backing attachment images, keyed by raw image handle
    attachment_allocations: Mutex<FxHashMap<u64, Allocation>>,

    max_samples: SampleCount,
    device_name: String,

    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanGraphicsDevice {
    /// Create the device and a surface for `window`
    ///
    /// Validation layers are enabled when `config.enable_validation` is set
    /// and the crate was built with the `vulkan-validation` feature.
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        config: Config,
    ) -> Result<Self> {
        let validation = config.enable_validation && cfg!(feature = "vulkan-validation");
        if config.enable_validation && !validation {
            engine_warn!(LOG_SOURCE,
                "Validation requested but the vulkan-validation feature is disabled");
        }

        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| {
                    engine_error!(LOG_SOURCE, "Failed to load Vulkan library: {:?}", e);
                    Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
                })?;

            let app_name = CString::new(config.app_name.clone())
                .unwrap_or_else(|_| c"Lumen Application".to_owned());
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Lumen")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_2);

            let display_handle = window.display_handle()
                .map_err(|e| {
                    engine_error!(LOG_SOURCE, "Failed to get display handle: {}", e);
                    Error::InitializationFailed(format!("Failed to get display handle: {}", e))
                })?;
            let mut extension_names = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| {
                    engine_error!(LOG_SOURCE, "Failed to get required extensions: {}", e);
                    Error::InitializationFailed(format!("Failed to get required extensions: {}", e))
                })?
                .to_vec();
            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names = if validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| {
                    engine_error!(LOG_SOURCE, "Failed to create Vulkan instance: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
                })?;

            let debug_utils = if validation {
                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                crate::debug::init_debug_config(config.debug_severity);

                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(crate::debug::severity_flags(config.debug_severity))
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    )
                    .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

                match loader.create_debug_utils_messenger(&debug_info, None) {
                    Ok(messenger) => Some((loader, messenger)),
                    Err(e) => {
                        crate::debug::cleanup_debug_config();
                        instance.destroy_instance(None);
                        engine_error!(LOG_SOURCE, "Failed to create debug messenger: {:?}", e);
                        return Err(Error::InitializationFailed(
                            format!("Failed to create debug messenger: {:?}", e)));
                    }
                }
            } else {
                None
            };

            // Declared before the guard so it outlives it
            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            // Everything created from here on is released by Drop if a later step fails
            let mut partial = PartialInit { instance: &instance, debug_utils: &debug_utils, surface: None };

            let window_handle = window.window_handle()
                .map_err(|e| {
                    engine_error!(LOG_SOURCE, "Failed to get window handle: {}", e);
                    Error::InitializationFailed(format!("Failed to get window handle: {}", e))
                })?;
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| {
                engine_error!(LOG_SOURCE, "Failed to create surface: {:?}", e);
                Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
            })?;
            partial.surface = Some((&surface_loader, surface));

            let physical_device = instance
                .enumerate_physical_devices()
                .map_err(|e| {
                    engine_error!(LOG_SOURCE, "Failed to enumerate physical devices: {:?}", e);
                    Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
                })?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    engine_error!(LOG_SOURCE, "No Vulkan-capable GPU found");
                    Error::InitializationFailed("No Vulkan-capable GPU found".to_string())
                })?;

            let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

            let graphics_family_index = queue_families
                .iter()
                .enumerate()
                .find(|(_, qf)| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(i, _)| i as u32)
                .ok_or_else(|| {
                    engine_error!(LOG_SOURCE, "No graphics queue family found");
                    Error::InitializationFailed("No graphics queue family found".to_string())
                })?;

            // Prefer presenting from the graphics family so the chain can use exclusive sharing
            let supports_present = |i: u32| {
                surface_loader
                    .get_physical_device_surface_support(physical_device, i, surface)
                    .unwrap_or(false)
            };
            let present_family_index = if supports_present(graphics_family_index) {
                graphics_family_index
            } else {
                (0..queue_families.len() as u32)
                    .find(|&i| supports_present(i))
                    .ok_or_else(|| {
                        engine_error!(LOG_SOURCE, "No present queue family found");
                        Error::SurfaceUnsupported("no queue family can present to the window".to_string())
                    })?
            };

            let queue_priorities = [1.0];
            let mut queue_create_infos = vec![
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(graphics_family_index)
                    .queue_priorities(&queue_priorities),
            ];
            if present_family_index != graphics_family_index {
                queue_create_infos.push(
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(present_family_index)
                        .queue_priorities(&queue_priorities),
                );
            }

            let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    engine_error!(LOG_SOURCE, "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);
            let present_queue = device.get_device_queue(present_family_index, 0);

            let allocator = match Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            }) {
                Ok(allocator) => allocator,
                Err(e) => {
                    device.destroy_device(None);
                    engine_error!(LOG_SOURCE, "Failed to create GPU allocator: {:?}", e);
                    return Err(Error::InitializationFailed(format!("Failed to create allocator: {:?}", e)));
                }
            };

            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

            let properties = instance.get_physical_device_properties(physical_device);
            let max_samples = max_sample_count_from_vk(
                properties.limits.framebuffer_color_sample_counts
                    & properties.limits.framebuffer_depth_sample_counts,
            );
            let device_name = properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "Unknown device".to_string());

            engine_info!(LOG_SOURCE,
                "Vulkan device ready: {} (graphics family {}, present family {}, max samples {})",
                device_name, graphics_family_index, present_family_index, max_samples.as_u32());

            partial.disarm();
            Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                device,
                surface,
                surface_loader,
                swapchain_loader,
                graphics_queue,
                graphics_queue_family: graphics_family_index,
                present_queue,
                present_queue_family: present_family_index,
                queue_lock: Mutex::new(()),
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                attachment_allocations: Mutex::new(FxHashMap::default()),
                max_samples,
                device_name,
                debug_utils,
            })
        }
    }

    /// Name reported by the physical device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub(crate) fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    /// True when presentation uses a different queue family than rendering
    pub fn uses_separate_present_queue(&self) -> bool {
        self.graphics_queue_family != self.present_queue_family
    }

    fn query_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| vk_failure(e, "get_physical_device_surface_capabilities"))
        }
    }
}

/// Releases instance-level objects when `new` fails halfway
struct PartialInit<'a> {
    instance: &'a ash::Instance,
    debug_utils: &'a Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(&'a ash::khr::surface::Instance, vk::SurfaceKHR)>,
}

impl PartialInit<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for PartialInit<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, surface)) = self.surface {
                loader.destroy_surface(surface, None);
            }
            if let Some((loader, messenger)) = self.debug_utils {
                crate::debug::cleanup_debug_config();
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl GraphicsDevice for VulkanGraphicsDevice {
    // ===== Surface and presentation chain =====

    fn surface_support(&self) -> Result<SurfaceSupport> {
        let capabilities = self.query_capabilities()?;
        unsafe {
            let vk_formats = self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(|e| vk_failure(e, "get_physical_device_surface_formats"))?;
            let vk_modes = self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(|e| vk_failure(e, "get_physical_device_surface_present_modes"))?;

            let formats = surface_formats_from_vk(&vk_formats);
            if let Some(first) = formats.first() {
                engine_debug!(LOG_SOURCE, "Surface reports {} format(s), first {:?}", formats.len(), first);
            }

            Ok(SurfaceSupport {
                capabilities: capabilities_from_vk(&capabilities),
                formats,
                present_modes: vk_modes.into_iter().filter_map(present_mode_from_vk).collect(),
            })
        }
    }

    fn create_chain(&self, info: &ChainCreateInfo) -> Result<ChainHandle> {
        let capabilities = self.query_capabilities()?;
        let queue_family_indices = [self.graphics_queue_family, self.present_queue_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(info.image_count)
            .image_format(format_to_vk(info.format))
            .image_color_space(color_space_to_vk(info.color_space))
            .image_extent(extent_to_vk(info.extent))
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode_to_vk(info.present_mode))
            .clipped(true)
            .old_swapchain(
                info.old_chain
                    .map(|old| vk::SwapchainKHR::from_raw(old.as_raw()))
                    .unwrap_or_else(vk::SwapchainKHR::null),
            );

        create_info = if self.uses_separate_present_queue() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| vk_failure(e, "create_swapchain"))?
        };
        Ok(ChainHandle::from_raw(swapchain.as_raw()))
    }

    fn chain_images(&self, chain: ChainHandle) -> Result<Vec<ImageHandle>> {
        let images = unsafe {
            self.swapchain_loader
                .get_swapchain_images(vk::SwapchainKHR::from_raw(chain.as_raw()))
                .map_err(|e| vk_failure(e, "get_swapchain_images"))?
        };
        Ok(images.into_iter().map(|image| ImageHandle::from_raw(image.as_raw())).collect())
    }

    fn destroy_chain(&self, chain: ChainHandle, _idle: &DeviceIdle) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(vk::SwapchainKHR::from_raw(chain.as_raw()), None);
        }
    }

    // ===== Images, views, framebuffers =====

    fn create_image_view(&self, image: ImageHandle, format: Format) -> Result<ImageViewHandle> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(vk::Image::from_raw(image.as_raw()))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format_to_vk(format))
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_for_format(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            self.device
                .create_image_view(&create_info, None)
                .map_err(|e| vk_failure(e, "create_image_view"))?
        };
        Ok(ImageViewHandle::from_raw(view.as_raw()))
    }

    fn destroy_image_view(&self, view: ImageViewHandle, _idle: &DeviceIdle) {
        unsafe {
            self.device.destroy_image_view(vk::ImageView::from_raw(view.as_raw()), None);
        }
    }

    fn create_attachment_image(&self, desc: &AttachmentImageDesc) -> Result<ImageHandle> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format_to_vk(desc.format))
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(sample_count_to_vk(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(image_usage_to_vk(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        unsafe {
            let image = self.device
                .create_image(&image_info, None)
                .map_err(|e| vk_failure(e, "create_image"))?;
            let requirements = self.device.get_image_memory_requirements(image);

            let allocation = lock(&*self.allocator)
                .allocate(&AllocationCreateDesc {
                    name: &desc.label,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    engine_error!(LOG_SOURCE, "Failed to allocate memory for '{}': {:?}", desc.label, e);
                    return Err(match e {
                        gpu_allocator::AllocationError::OutOfMemory => Error::OutOfMemory,
                        other => Error::BackendError(format!("allocate {}: {:?}", desc.label, other)),
                    });
                }
            };

            if let Err(e) = self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                lock(&*self.allocator).free(allocation).ok();
                self.device.destroy_image(image, None);
                return Err(vk_failure(e, "bind_image_memory"));
            }

            lock(&self.attachment_allocations).insert(image.as_raw(), allocation);
            engine_debug!(LOG_SOURCE, "Allocated attachment '{}' {}x{} {:?} x{}",
                desc.label, desc.extent.width, desc.extent.height, desc.format, desc.samples.as_u32());
            Ok(ImageHandle::from_raw(image.as_raw()))
        }
    }

    fn destroy_attachment_image(&self, image: ImageHandle, _idle: &DeviceIdle) {
        let allocation = lock(&self.attachment_allocations).remove(&image.as_raw());
        unsafe {
            self.device.destroy_image(vk::Image::from_raw(image.as_raw()), None);
        }
        match allocation {
            Some(allocation) => {
                if let Err(e) = lock(&*self.allocator).free(allocation) {
                    engine_warn!(LOG_SOURCE, "Failed to free attachment memory: {:?}", e);
                }
            }
            None => engine_warn!(LOG_SOURCE, "Destroyed image {:#x} without a tracked allocation", image.as_raw()),
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        let attachments: Vec<vk::ImageView> = desc.attachments
            .iter()
            .map(|view| vk::ImageView::from_raw(view.as_raw()))
            .collect();
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(vk::RenderPass::from_raw(desc.render_pass.as_raw()))
            .attachments(&attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);

        let framebuffer = unsafe {
            self.device
                .create_framebuffer(&create_info, None)
                .map_err(|e| vk_failure(e, "create_framebuffer"))?
        };
        Ok(FramebufferHandle::from_raw(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle, _idle: &DeviceIdle) {
        unsafe {
            self.device.destroy_framebuffer(vk::Framebuffer::from_raw(framebuffer.as_raw()), None);
        }
    }

    fn supports_depth_format(&self, format: Format) -> bool {
        if !format.is_depth() {
            return false;
        }
        let properties = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format_to_vk(format))
        };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    fn max_sample_count(&self) -> SampleCount {
        self.max_samples
    }

    // ===== Synchronization =====

    fn create_semaphore(&self) -> Result<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|e| vk_failure(e, "create_semaphore"))?
        };
        Ok(SemaphoreHandle::from_raw(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle, _idle: &DeviceIdle) {
        unsafe {
            self.device.destroy_semaphore(vk::Semaphore::from_raw(semaphore.as_raw()), None);
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
                .map_err(|e| vk_failure(e, "create_fence"))?
        };
        Ok(FenceHandle::from_raw(fence.as_raw()))
    }

    fn destroy_fence(&self, fence: FenceHandle, _idle: &DeviceIdle) {
        unsafe {
            self.device.destroy_fence(vk::Fence::from_raw(fence.as_raw()), None);
        }
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[vk::Fence::from_raw(fence.as_raw())], true, timeout_to_ns(timeout))
                .map_err(|e| vk_failure(e, "wait_for_fence"))
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<()> {
        unsafe {
            self.device
                .reset_fences(&[vk::Fence::from_raw(fence.as_raw())])
                .map_err(|e| vk_failure(e, "reset_fence"))
        }
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> Result<bool> {
        unsafe {
            self.device
                .get_fence_status(vk::Fence::from_raw(fence.as_raw()))
                .map_err(|e| vk_failure(e, "get_fence_status"))
        }
    }

    fn wait_idle(&self) -> Result<()> {
        let _queues = lock(&self.queue_lock);
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| vk_failure(e, "device_wait_idle"))
        }
    }

    // ===== Command recording =====

    fn create_command_pool(&self) -> Result<CommandPoolHandle> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe {
            self.device
                .create_command_pool(&create_info, None)
                .map_err(|e| vk_failure(e, "create_command_pool"))?
        };
        Ok(CommandPoolHandle::from_raw(pool.as_raw()))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle, _idle: &DeviceIdle) {
        unsafe {
            self.device.destroy_command_pool(vk::CommandPool::from_raw(pool.as_raw()), None);
        }
    }

    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> Result<CommandBufferHandle> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk::CommandPool::from_raw(pool.as_raw()))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe {
            self.device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| vk_failure(e, "allocate_command_buffers"))?
        };
        buffers
            .first()
            .map(|buffer| CommandBufferHandle::from_raw(buffer.as_raw()))
            .ok_or_else(|| Error::BackendError("allocate_command_buffers returned nothing".to_string()))
    }

    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(
                    vk::CommandBuffer::from_raw(command_buffer.as_raw()),
                    vk::CommandBufferResetFlags::empty(),
                )
                .map_err(|e| vk_failure(e, "reset_command_buffer"))
        }
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(vk::CommandBuffer::from_raw(command_buffer.as_raw()), &begin_info)
                .map_err(|e| vk_failure(e, "begin_command_buffer"))
        }
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        unsafe {
            self.device
                .end_command_buffer(vk::CommandBuffer::from_raw(command_buffer.as_raw()))
                .map_err(|e| vk_failure(e, "end_command_buffer"))
        }
    }

    // ===== Queue operations =====

    fn acquire_next_image(
        &self,
        chain: ChainHandle,
        signal: SemaphoreHandle,
        timeout: Option<Duration>,
    ) -> Result<AcquireStatus> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                vk::SwapchainKHR::from_raw(chain.as_raw()),
                timeout_to_ns(timeout),
                vk::Semaphore::from_raw(signal.as_raw()),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireStatus::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
            Err(e) => Err(vk_failure(e, "acquire_next_image")),
        }
    }

    fn submit(&self, info: &SubmitInfo) -> Result<()> {
        let wait_semaphores = [vk::Semaphore::from_raw(info.wait_semaphore.as_raw())];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [vk::CommandBuffer::from_raw(info.command_buffer.as_raw())];
        let signal_semaphores = [vk::Semaphore::from_raw(info.signal_semaphore.as_raw())];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let _queues = lock(&self.queue_lock);
        unsafe {
            self.device
                .queue_submit(
                    self.graphics_queue,
                    &[submit_info],
                    vk::Fence::from_raw(info.fence.as_raw()),
                )
                .map_err(|e| vk_failure(e, "queue_submit"))
        }
    }

    fn present(
        &self,
        chain: ChainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> Result<PresentStatus> {
        let swapchains = [vk::SwapchainKHR::from_raw(chain.as_raw())];
        let image_indices = [image_index];
        let wait_semaphores = [vk::Semaphore::from_raw(wait.as_raw())];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = {
            let _queues = lock(&self.queue_lock);
            unsafe { self.swapchain_loader.queue_present(self.present_queue, &present_info) }
        };
        match result {
            Ok(false) => Ok(PresentStatus::Presented),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(vk_failure(e, "queue_present")),
        }
    }
}

impl Drop for VulkanGraphicsDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // 1. Attachments the engine did not release
            let leaked: Vec<(u64, Allocation)> = self.attachment_allocations
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .drain()
                .collect();
            if !leaked.is_empty() {
                engine_warn!(LOG_SOURCE, "{} attachment image(s) still alive at device drop", leaked.len());
            }
            {
                let allocator = self.allocator
                    .get_mut()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                for (raw, allocation) in leaked {
                    self.device.destroy_image(vk::Image::from_raw(raw), None);
                    allocator.free(allocation).ok();
                }
            }

            // 2. Allocator frees its device memory blocks before the device goes away
            ManuallyDrop::drop(&mut self.allocator);

            // 3. Stop forwarding validation messages, then destroy the messenger
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                crate::debug::cleanup_debug_config();
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            // 4. Device, surface, instance
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}
