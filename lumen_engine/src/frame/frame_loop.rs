//! FrameLoop - drives one frame per tick
//!
//! Per tick, on slot `cursor`:
//! wait on the slot fence, acquire an image, reset and record the slot's
//! command buffer through the draw callback, submit, present, advance.
//! An out-of-date or suboptimal surface, or an external "surface changed"
//! notification, triggers a rebuild of the presentation chain and the render
//! targets behind a device-idle barrier.

use std::sync::Arc;
use crate::error::Result;
use crate::frame::{
    CompositeTarget, FrameLoopConfig, FrameSyncSet, Generation, MinimizedPolicy,
    PresentationChain, RenderTargetSet,
};
use crate::graphics_device::{
    AcquireStatus, CommandBufferHandle, DeviceIdle, Extent2D, GraphicsDevice, PresentStatus,
    SubmitInfo, SurfaceChangedFlag,
};
use crate::{engine_bail, engine_debug, engine_err, engine_error, engine_info, engine_trace};

const LOG_SOURCE: &str = "lumen::FrameLoop";

/// Step the loop is in
///
/// Outside of `tick` the loop is `Idle`. After a fatal error it stays in the
/// step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Waiting,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    Rebuilding,
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was presented
    Presented,
    /// A frame was presented and the surface rebuilt
    PresentedAndRebuilt,
    /// The chain was out of date at acquire; nothing was drawn, the surface was rebuilt
    SkippedAndRebuilt,
    /// The window is minimized; nothing was drawn, the rebuild is retried next tick
    Minimized,
    /// A frame was presented but the window is minimized; the rebuild is retried next tick
    PresentedRebuildDeferred,
}

/// What the draw callback gets to record a frame
#[derive(Debug)]
pub struct FrameContext<'a> {
    /// Frame slot in `[0, frames_in_flight)`
    pub slot: usize,
    /// Acquired presentable image
    pub image_index: u32,
    /// Begun command buffer of the slot
    pub command_buffer: CommandBufferHandle,
    pub target: &'a CompositeTarget,
    pub extent: Extent2D,
    pub generation: Generation,
    /// Frames initiated before this one
    pub frame_number: u64,
}

enum RebuildOutcome {
    Rebuilt,
    Deferred,
}

pub struct FrameLoop {
    device: Arc<dyn GraphicsDevice>,
    sync: FrameSyncSet,
    config: FrameLoopConfig,
    cursor: usize,
    frame_count: u64,
    state: FrameState,
    surface_changed: SurfaceChangedFlag,
    rebuild_pending: bool,
}

impl FrameLoop {
    /// Create the frame slots
    ///
    /// # Errors
    ///
    /// `Error::InitializationFailed` when `config.frames_in_flight` is zero.
    pub fn new(device: Arc<dyn GraphicsDevice>, config: FrameLoopConfig) -> Result<Self> {
        let sync = FrameSyncSet::new(device.clone(), config.frames_in_flight)?;
        engine_info!(LOG_SOURCE, "Frame loop ready with {} frames in flight", config.frames_in_flight);
        Ok(Self {
            device,
            sync,
            config,
            cursor: 0,
            frame_count: 0,
            state: FrameState::Idle,
            surface_changed: SurfaceChangedFlag::new(),
            rebuild_pending: false,
        })
    }

    /// Run one frame
    ///
    /// `draw` records into the begun command buffer of the frame; it must
    /// not submit it. Any error returned here is fatal: the loop refuses
    /// further ticks and the application should shut down.
    pub fn tick<F>(
        &mut self,
        chain: &mut PresentationChain,
        targets: &mut RenderTargetSet,
        mut draw: F,
    ) -> Result<FrameStatus>
    where
        F: FnMut(&FrameContext<'_>) -> Result<()>,
    {
        if self.state != FrameState::Idle {
            engine_bail!(LOG_SOURCE, "Tick after a fatal error (stopped in {:?})", self.state);
        }

        let mut rebuilt = false;
        if self.rebuild_pending {
            self.state = FrameState::Rebuilding;
            match self.rebuild(chain, targets)? {
                RebuildOutcome::Deferred => {
                    self.state = FrameState::Idle;
                    return Ok(FrameStatus::Minimized);
                }
                RebuildOutcome::Rebuilt => rebuilt = true,
            }
        }

        let slot_index = self.cursor;
        let slot = *self.sync.slot(slot_index);

        // 1. Wait
        self.state = FrameState::Waiting;
        self.sync.wait(slot_index, self.config.fence_timeout)
            .map_err(|e| {
                engine_error!(LOG_SOURCE, "Wait on slot {} failed: {}", slot_index, e);
                e
            })?;

        // 2. Acquire
        self.state = FrameState::Acquiring;
        let chain_handle = chain.handle()
            .ok_or_else(|| engine_err!(LOG_SOURCE, "Presentation chain is torn down"))?;
        let acquired = self.device
            .acquire_next_image(chain_handle, slot.acquire_signal, self.config.acquire_timeout)
            .map_err(|e| {
                engine_error!(LOG_SOURCE, "Acquire failed: {}", e);
                e
            })?;
        let (image_index, acquire_suboptimal) = match acquired {
            AcquireStatus::Acquired { image_index, suboptimal } => (image_index, suboptimal),
            AcquireStatus::OutOfDate => {
                engine_debug!(LOG_SOURCE, "Chain out of date at acquire, rebuilding");
                self.state = FrameState::Rebuilding;
                let outcome = self.rebuild(chain, targets)?;
                self.state = FrameState::Idle;
                return Ok(match outcome {
                    RebuildOutcome::Rebuilt => FrameStatus::SkippedAndRebuilt,
                    RebuildOutcome::Deferred => FrameStatus::Minimized,
                });
            }
        };
        engine_trace!(LOG_SOURCE, "Slot {} acquired image {}", slot_index, image_index);

        // 3. Reset + record
        self.state = FrameState::Recording;
        self.sync.reset(slot_index)?;
        debug_assert!(
            !self.device.is_fence_signaled(slot.frame_fence).unwrap_or(false),
            "slot {} fence still signaled after reset",
            slot_index
        );
        {
            let target = targets.target(image_index)
                .ok_or_else(|| engine_err!(LOG_SOURCE, "No render target for image {}", image_index))?;
            debug_assert_eq!(
                target.generation(),
                chain.generation(),
                "render target for image {} is from a stale generation",
                image_index
            );

            self.device.begin_command_buffer(slot.command_buffer)?;
            let context = FrameContext {
                slot: slot_index,
                image_index,
                command_buffer: slot.command_buffer,
                target,
                extent: chain.extent(),
                generation: chain.generation(),
                frame_number: self.frame_count,
            };
            draw(&context).map_err(|e| {
                engine_error!(LOG_SOURCE, "Draw callback failed on image {}: {}", image_index, e);
                e
            })?;
            self.device.end_command_buffer(slot.command_buffer)?;
        }

        // 4. Submit
        self.state = FrameState::Submitted;
        self.device
            .submit(&SubmitInfo {
                command_buffer: slot.command_buffer,
                wait_semaphore: slot.acquire_signal,
                signal_semaphore: slot.render_done,
                fence: slot.frame_fence,
            })
            .map_err(|e| {
                engine_error!(LOG_SOURCE, "Submit failed: {}", e);
                e
            })?;

        // 5. Present
        self.state = FrameState::Presenting;
        let presented = self.device
            .present(chain_handle, image_index, slot.render_done)
            .map_err(|e| {
                engine_error!(LOG_SOURCE, "Present failed: {}", e);
                e
            })?;
        let surface_changed = self.surface_changed.take();
        let mut deferred = false;

        if acquire_suboptimal || surface_changed || presented != PresentStatus::Presented {
            engine_debug!(LOG_SOURCE,
                "Rebuild after present (present {:?}, acquire suboptimal {}, surface changed {})",
                presented, acquire_suboptimal, surface_changed);
            self.state = FrameState::Rebuilding;
            match self.rebuild(chain, targets)? {
                RebuildOutcome::Rebuilt => rebuilt = true,
                RebuildOutcome::Deferred => deferred = true,
            }
        }

        self.advance();
        self.state = FrameState::Idle;
        Ok(if deferred {
            FrameStatus::PresentedRebuildDeferred
        } else if rebuilt {
            FrameStatus::PresentedAndRebuilt
        } else {
            FrameStatus::Presented
        })
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.sync.len();
        self.frame_count += 1;
    }

    fn rebuild(
        &mut self,
        chain: &mut PresentationChain,
        targets: &mut RenderTargetSet,
    ) -> Result<RebuildOutcome> {
        let mut logged = false;
        while chain.window().framebuffer_size().is_zero() {
            match self.config.minimized_policy {
                MinimizedPolicy::Skip => {
                    if !self.rebuild_pending {
                        engine_debug!(LOG_SOURCE, "Window minimized, rebuild deferred");
                    }
                    self.rebuild_pending = true;
                    return Ok(RebuildOutcome::Deferred);
                }
                MinimizedPolicy::Block => {
                    if !logged {
                        engine_debug!(LOG_SOURCE, "Window minimized, waiting for a drawable size");
                        logged = true;
                    }
                    chain.window().wait_events(self.config.minimized_poll_interval);
                }
            }
        }

        let idle = DeviceIdle::wait(self.device.as_ref())?;
        chain.rebuild(&idle)?;
        targets.rebuild(chain, &idle)?;

        self.rebuild_pending = false;
        // Anything reported before this point is covered by the rebuild
        self.surface_changed.take();

        let extent = chain.extent();
        engine_info!(LOG_SOURCE, "Surface rebuilt at {}x{} (generation {})",
            extent.width, extent.height, chain.generation().value());
        Ok(RebuildOutcome::Rebuilt)
    }

    /// Request a rebuild at the next present (window resized, display changed)
    pub fn notify_surface_changed(&self) {
        self.surface_changed.set();
    }

    /// Shareable handle for resize callbacks
    pub fn surface_changed_flag(&self) -> SurfaceChangedFlag {
        self.surface_changed.clone()
    }

    /// Current frame slot
    pub fn frame_index(&self) -> usize {
        self.cursor
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.len()
    }

    /// Frames initiated so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// True while a minimized window postpones the rebuild
    pub fn is_rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    pub fn config(&self) -> &FrameLoopConfig {
        &self.config
    }

    pub fn sync(&self) -> &FrameSyncSet {
        &self.sync
    }

    /// Block until the GPU has finished every submitted frame
    ///
    /// Call before tearing down resources the draw callback used.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

#[cfg(test)]
#[path = "frame_loop_tests.rs"]
mod tests;
