/// Mock GraphicsDevice for unit tests (no GPU required)
///
/// Records every call in order, scripts surface outcomes, simulates fence
/// state, and records a violation whenever the caller breaks a
/// synchronization rule a real driver would not report (destroying while the
/// device is busy, resetting an in-flight command buffer, ...).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::graphics_device::{
    AcquireStatus, AttachmentImageDesc, ChainCreateInfo, ChainHandle, ColorSpace,
    CommandBufferHandle, CommandPoolHandle, DeviceIdle, Extent2D, FenceHandle, Format,
    FramebufferDesc, FramebufferHandle, GraphicsDevice, ImageHandle, ImageViewHandle,
    PresentMode, PresentStatus, SampleCount, SemaphoreHandle, SubmitInfo, SurfaceCapabilities,
    SurfaceFormat, SurfaceSupport, SurfaceWindow,
};

// ============================================================================
// Mock state
// ============================================================================

/// Mutable mock state, exposed so tests can script and inspect it
pub struct MockState {
    /// Ordered call log ("wait_fence:3", "submit:3", ...)
    pub calls: Vec<String>,
    /// Synchronization rule violations observed
    pub violations: Vec<String>,

    pub support: SurfaceSupport,
    pub max_samples: SampleCount,
    pub depth_formats: Vec<Format>,

    /// Scripted results, consumed front to back; defaults apply when empty
    pub acquire_script: VecDeque<Result<AcquireStatus>>,
    pub present_script: VecDeque<Result<PresentStatus>>,
    pub submit_script: VecDeque<Result<()>>,
    pub fence_wait_script: VecDeque<Result<()>>,
    pub wait_idle_script: VecDeque<Result<()>>,

    /// Error returned by the next attachment image creation
    pub attachment_failure: Option<Error>,
    /// Error returned by the next framebuffer creation
    pub framebuffer_failure: Option<Error>,

    /// Every chain creation request, oldest first
    pub chain_infos: Vec<ChainCreateInfo>,
    /// Every framebuffer creation request, oldest first
    pub framebuffer_descs: Vec<FramebufferDesc>,
    /// Every attachment image request, oldest first
    pub attachment_descs: Vec<AttachmentImageDesc>,

    chains: FxHashMap<ChainHandle, Vec<ImageHandle>>,
    next_image: FxHashMap<ChainHandle, u32>,
    views: FxHashSet<ImageViewHandle>,
    attachments: FxHashSet<ImageHandle>,
    framebuffers: FxHashSet<FramebufferHandle>,
    semaphores: FxHashSet<SemaphoreHandle>,
    fences: FxHashSet<FenceHandle>,
    pools: FxHashSet<CommandPoolHandle>,
    command_buffers: FxHashSet<CommandBufferHandle>,

    signaled_fences: FxHashSet<FenceHandle>,
    pending_fences: FxHashSet<FenceHandle>,
    in_flight: FxHashMap<CommandBufferHandle, FenceHandle>,

    /// True after wait_idle until the next queue operation
    idle: bool,
}

impl MockState {
    fn new(support: SurfaceSupport) -> Self {
        Self {
            calls: Vec::new(),
            violations: Vec::new(),
            support,
            max_samples: SampleCount::S8,
            depth_formats: vec![Format::D32_SFLOAT, Format::D24_UNORM_S8_UINT],
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            submit_script: VecDeque::new(),
            fence_wait_script: VecDeque::new(),
            wait_idle_script: VecDeque::new(),
            attachment_failure: None,
            framebuffer_failure: None,
            chain_infos: Vec::new(),
            framebuffer_descs: Vec::new(),
            attachment_descs: Vec::new(),
            chains: FxHashMap::default(),
            next_image: FxHashMap::default(),
            views: FxHashSet::default(),
            attachments: FxHashSet::default(),
            framebuffers: FxHashSet::default(),
            semaphores: FxHashSet::default(),
            fences: FxHashSet::default(),
            pools: FxHashSet::default(),
            command_buffers: FxHashSet::default(),
            signaled_fences: FxHashSet::default(),
            pending_fences: FxHashSet::default(),
            in_flight: FxHashMap::default(),
            idle: true,
        }
    }

    fn check_idle(&mut self, what: &str) {
        if !self.idle {
            self.violations.push(format!("{} destroyed while device busy", what));
        }
    }

    /// Number of live objects of every kind
    pub fn live_count(&self) -> usize {
        self.chains.len()
            + self.views.len()
            + self.attachments.len()
            + self.framebuffers.len()
            + self.semaphores.len()
            + self.fences.len()
            + self.pools.len()
    }

    pub fn live_views(&self) -> usize {
        self.views.len()
    }

    pub fn live_attachments(&self) -> usize {
        self.attachments.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn is_fence_pending(&self, fence: FenceHandle) -> bool {
        self.pending_fences.contains(&fence)
    }

    /// Calls starting with `prefix`, in order
    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls.iter().filter(|c| c.starts_with(prefix)).cloned().collect()
    }
}

/// Default surface: 800x600 fixed extent, sRGB BGRA, FIFO + MAILBOX
pub fn default_surface_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: Extent2D::new(800, 600),
            min_image_extent: Extent2D::new(1, 1),
            max_image_extent: Extent2D::new(4096, 4096),
        },
        formats: vec![SurfaceFormat {
            format: Format::B8G8R8A8_SRGB,
            color_space: ColorSpace::SrgbNonlinear,
        }],
        present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
    }
}

// ============================================================================
// Mock device
// ============================================================================

pub struct MockGraphicsDevice {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::with_support(default_surface_support())
    }

    pub fn with_support(support: SurfaceSupport) -> Self {
        Self {
            state: Mutex::new(MockState::new(support)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn next_raw(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn surface_support(&self) -> Result<SurfaceSupport> {
        let mut state = self.state();
        state.calls.push("surface_support".to_string());
        Ok(state.support.clone())
    }

    fn create_chain(&self, info: &ChainCreateInfo) -> Result<ChainHandle> {
        let chain = ChainHandle::from_raw(self.next_raw());
        let images: Vec<ImageHandle> = (0..info.image_count)
            .map(|_| ImageHandle::from_raw(self.next_raw()))
            .collect();

        let mut state = self.state();
        state.calls.push(format!("create_chain:{}", info.image_count));
        state.chain_infos.push(*info);

        if info.extent.is_zero() {
            state.violations.push("zero-sized chain requested".to_string());
            return Err(Error::BackendError("zero-sized chain".to_string()));
        }
        if let Some(old) = info.old_chain {
            if !state.chains.contains_key(&old) {
                state.violations.push(format!("old chain {} is not live", old.as_raw()));
            }
        }

        state.chains.insert(chain, images);
        state.next_image.insert(chain, 0);
        Ok(chain)
    }

    fn chain_images(&self, chain: ChainHandle) -> Result<Vec<ImageHandle>> {
        let state = self.state();
        state.chains.get(&chain).cloned()
            .ok_or_else(|| Error::BackendError(format!("unknown chain {}", chain.as_raw())))
    }

    fn destroy_chain(&self, chain: ChainHandle, _idle: &DeviceIdle) {
        let mut state = self.state();
        state.calls.push(format!("destroy_chain:{}", chain.as_raw()));
        state.check_idle("chain");
        if state.chains.remove(&chain).is_none() {
            state.violations.push(format!("chain {} destroyed twice", chain.as_raw()));
        }
        state.next_image.remove(&chain);
    }

    fn create_image_view(&self, image: ImageHandle, format: Format) -> Result<ImageViewHandle> {
        let view = ImageViewHandle::from_raw(self.next_raw());
        let mut state = self.state();
        state.calls.push(format!("create_image_view:{}:{:?}", image.as_raw(), format));
        state.views.insert(view);
        Ok(view)
    }

    fn destroy_image_view(&self, view: ImageViewHandle, _idle: &DeviceIdle) {
        let mut state = self.state();
        state.calls.push(format!("destroy_image_view:{}", view.as_raw()));
        state.check_idle("image view");
        if !state.views.remove(&view) {
            state.violations.push(format!("image view {} destroyed twice", view.as_raw()));
        }
    }

    fn create_attachment_image(&self, desc: &AttachmentImageDesc) -> Result<ImageHandle> {
        let image = ImageHandle::from_raw(self.next_raw());
        let mut state = self.state();
        state.calls.push(format!("create_attachment_image:{}", desc.label));
        state.attachment_descs.push(desc.clone());
        if let Some(err) = state.attachment_failure.take() {
            return Err(err);
        }
        state.attachments.insert(image);
        Ok(image)
    }

    fn destroy_attachment_image(&self, image: ImageHandle, _idle: &DeviceIdle) {
        let mut state = self.state();
        state.calls.push(format!("destroy_attachment_image:{}", image.as_raw()));
        state.check_idle("attachment image");
        if !state.attachments.remove(&image) {
            state.violations.push(format!("attachment {} destroyed twice", image.as_raw()));
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        let framebuffer = FramebufferHandle::from_raw(self.next_raw());
        let mut state = self.state();
        state.calls.push(format!("create_framebuffer:{}", desc.attachments.len()));
        state.framebuffer_descs.push(desc.clone());
        if let Some(err) = state.framebuffer_failure.take() {
            return Err(err);
        }
        state.framebuffers.insert(framebuffer);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle, _idle: &DeviceIdle) {
        let mut state = self.state();
        state.calls.push(format!("destroy_framebuffer:{}", framebuffer.as_raw()));
        state.check_idle("framebuffer");
        if !state.framebuffers.remove(&framebuffer) {
            state.violations.push(format!("framebuffer {} destroyed twice", framebuffer.as_raw()));
        }
    }

    fn supports_depth_format(&self, format: Format) -> bool {
        self.state().depth_formats.contains(&format)
    }

    fn max_sample_count(&self) -> SampleCount {
        self.state().max_samples
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle> {
        let semaphore = SemaphoreHandle::from_raw(self.next_raw());
        let mut state = self.state();
        state.calls.push("create_semaphore".to_string());
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle, _idle: &DeviceIdle) {
        let mut state = self.state();
        state.calls.push(format!("destroy_semaphore:{}", semaphore.as_raw()));
        state.check_idle("semaphore");
        state.semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle> {
        let fence = FenceHandle::from_raw(self.next_raw());
        let mut state = self.state();
        state.calls.push(format!("create_fence:{}", signaled));
        state.fences.insert(fence);
        if signaled {
            state.signaled_fences.insert(fence);
        }
        Ok(fence)
    }

    fn destroy_fence(&self, fence: FenceHandle, _idle: &DeviceIdle) {
        let mut state = self.state();
        state.calls.push(format!("destroy_fence:{}", fence.as_raw()));
        state.check_idle("fence");
        state.fences.remove(&fence);
        state.signaled_fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("wait_fence:{}", fence.as_raw()));
        if let Some(scripted) = state.fence_wait_script.pop_front() {
            scripted?;
        }

        // The simulated GPU finishes pending work as soon as the CPU waits on it
        if state.pending_fences.remove(&fence) {
            state.signaled_fences.insert(fence);
        }
        if !state.signaled_fences.contains(&fence) {
            state.violations.push(format!("wait on fence {} that can never signal", fence.as_raw()));
            return Err(Error::Timeout(format!("fence {} (timeout {:?})", fence.as_raw(), timeout)));
        }
        Ok(())
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("reset_fence:{}", fence.as_raw()));
        if state.pending_fences.contains(&fence) {
            state.violations.push(format!("fence {} reset while in flight", fence.as_raw()));
        }
        state.signaled_fences.remove(&fence);
        Ok(())
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> Result<bool> {
        Ok(self.state().signaled_fences.contains(&fence))
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state();
        state.calls.push("wait_idle".to_string());
        if let Some(scripted) = state.wait_idle_script.pop_front() {
            scripted?;
        }
        let pending: Vec<FenceHandle> = state.pending_fences.drain().collect();
        state.signaled_fences.extend(pending);
        state.in_flight.clear();
        state.idle = true;
        Ok(())
    }

    fn create_command_pool(&self) -> Result<CommandPoolHandle> {
        let pool = CommandPoolHandle::from_raw(self.next_raw());
        let mut state = self.state();
        state.calls.push("create_command_pool".to_string());
        state.pools.insert(pool);
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle, _idle: &DeviceIdle) {
        let mut state = self.state();
        state.calls.push(format!("destroy_command_pool:{}", pool.as_raw()));
        state.check_idle("command pool");
        state.pools.remove(&pool);
        state.command_buffers.clear();
    }

    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> Result<CommandBufferHandle> {
        let command_buffer = CommandBufferHandle::from_raw(self.next_raw());
        let mut state = self.state();
        state.calls.push(format!("allocate_command_buffer:{}", pool.as_raw()));
        if !state.pools.contains(&pool) {
            return Err(Error::BackendError(format!("unknown pool {}", pool.as_raw())));
        }
        state.command_buffers.insert(command_buffer);
        Ok(command_buffer)
    }

    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("reset_command_buffer:{}", command_buffer.as_raw()));
        if let Some(fence) = state.in_flight.get(&command_buffer).copied() {
            if state.pending_fences.contains(&fence) {
                state.violations.push(format!(
                    "command buffer {} reset while in flight",
                    command_buffer.as_raw()
                ));
            }
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        self.state().calls.push(format!("begin_command_buffer:{}", command_buffer.as_raw()));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        self.state().calls.push(format!("end_command_buffer:{}", command_buffer.as_raw()));
        Ok(())
    }

    fn acquire_next_image(
        &self,
        chain: ChainHandle,
        _signal: SemaphoreHandle,
        _timeout: Option<Duration>,
    ) -> Result<AcquireStatus> {
        let mut state = self.state();
        state.idle = false;
        let image_count = match state.chains.get(&chain) {
            Some(images) => images.len() as u32,
            None => {
                state.calls.push("acquire:unknown_chain".to_string());
                return Err(Error::BackendError(format!("unknown chain {}", chain.as_raw())));
            }
        };

        let status = match state.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None => {
                let next = state.next_image.entry(chain).or_insert(0);
                let image_index = *next % image_count;
                *next = image_index + 1;
                Ok(AcquireStatus::Acquired { image_index, suboptimal: false })
            }
        };

        let entry = match &status {
            Ok(AcquireStatus::Acquired { image_index, .. }) => format!("acquire:{}", image_index),
            Ok(AcquireStatus::OutOfDate) => "acquire:out_of_date".to_string(),
            Err(_) => "acquire:error".to_string(),
        };
        state.calls.push(entry);
        status
    }

    fn submit(&self, info: &SubmitInfo) -> Result<()> {
        let mut state = self.state();
        state.idle = false;
        state.calls.push(format!("submit:{}", info.fence.as_raw()));
        if let Some(scripted) = state.submit_script.pop_front() {
            scripted?;
        }

        if state.signaled_fences.contains(&info.fence) || state.pending_fences.contains(&info.fence) {
            state.violations.push(format!("submit with fence {} not reset", info.fence.as_raw()));
        }
        state.pending_fences.insert(info.fence);
        state.in_flight.insert(info.command_buffer, info.fence);
        Ok(())
    }

    fn present(
        &self,
        _chain: ChainHandle,
        image_index: u32,
        _wait: SemaphoreHandle,
    ) -> Result<PresentStatus> {
        let mut state = self.state();
        state.idle = false;
        state.calls.push(format!("present:{}", image_index));
        state.present_script.pop_front().unwrap_or(Ok(PresentStatus::Presented))
    }
}

// ============================================================================
// Mock window
// ============================================================================

/// Window with scripted framebuffer sizes
///
/// Scripted sizes are returned one per query; the last one sticks.
pub struct MockWindow {
    sizes: Mutex<VecDeque<Extent2D>>,
    current: Mutex<Extent2D>,
    waits: AtomicUsize,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            sizes: Mutex::new(VecDeque::new()),
            current: Mutex::new(Extent2D::new(width, height)),
            waits: AtomicUsize::new(0),
        }
    }

    pub fn script_sizes(&self, sizes: &[(u32, u32)]) {
        let mut queue = self.sizes.lock().unwrap();
        queue.extend(sizes.iter().map(|&(w, h)| Extent2D::new(w, h)));
    }

    /// Number of wait_events calls so far
    pub fn wait_count(&self) -> usize {
        self.waits.load(Ordering::Relaxed)
    }
}

impl SurfaceWindow for MockWindow {
    fn framebuffer_size(&self) -> Extent2D {
        let mut current = self.current.lock().unwrap();
        if let Some(next) = self.sizes.lock().unwrap().pop_front() {
            *current = next;
        }
        *current
    }

    fn wait_events(&self, _timeout: Duration) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
