//! FrameSyncSet - per-slot synchronization primitives and command buffers
//!
//! Created once with F slots and never rebuilt. Each slot's fence starts
//! signaled so the first wait on it returns immediately.

use std::sync::Arc;
use std::time::Duration;
use crate::error::{Error, Result};
use crate::graphics_device::{
    CommandBufferHandle, CommandPoolHandle, DeviceIdle, FenceHandle, GraphicsDevice,
    SemaphoreHandle,
};
use crate::{engine_debug, engine_error, engine_trace};

const LOG_SOURCE: &str = "lumen::FrameSyncSet";

/// Primitives owned by one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    /// Signaled when the acquired image is ready to be rendered to
    pub acquire_signal: SemaphoreHandle,
    /// Signaled when rendering finishes, waited on by present
    pub render_done: SemaphoreHandle,
    /// Signaled when the slot's submission completes on the GPU
    pub frame_fence: FenceHandle,
    pub command_buffer: CommandBufferHandle,
}

pub struct FrameSyncSet {
    device: Arc<dyn GraphicsDevice>,
    command_pool: Option<CommandPoolHandle>,
    slots: Vec<FrameSlot>,
}

impl FrameSyncSet {
    /// Create `frames_in_flight` slots from one resettable command pool
    ///
    /// # Errors
    ///
    /// `Error::InitializationFailed` when `frames_in_flight` is zero.
    pub fn new(device: Arc<dyn GraphicsDevice>, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            engine_error!(LOG_SOURCE, "frames_in_flight must be at least 1");
            return Err(Error::InitializationFailed("frames_in_flight must be at least 1".to_string()));
        }

        let mut set = Self {
            device,
            command_pool: None,
            slots: Vec::with_capacity(frames_in_flight),
        };

        let pool = set.device.create_command_pool()?;
        set.command_pool = Some(pool);

        for _ in 0..frames_in_flight {
            // Created one by one so a failure leaves only complete slots to release
            let acquire_signal = set.device.create_semaphore()?;
            let render_done = match set.device.create_semaphore() {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    set.release_orphans(&[acquire_signal], None);
                    return Err(e);
                }
            };
            let frame_fence = match set.device.create_fence(true) {
                Ok(fence) => fence,
                Err(e) => {
                    set.release_orphans(&[acquire_signal, render_done], None);
                    return Err(e);
                }
            };
            let command_buffer = match set.device.allocate_command_buffer(pool) {
                Ok(command_buffer) => command_buffer,
                Err(e) => {
                    set.release_orphans(&[acquire_signal, render_done], Some(frame_fence));
                    return Err(e);
                }
            };
            set.slots.push(FrameSlot { acquire_signal, render_done, frame_fence, command_buffer });
        }

        engine_debug!(LOG_SOURCE, "{} frame slots created", frames_in_flight);
        Ok(set)
    }

    fn release_orphans(&self, semaphores: &[SemaphoreHandle], fence: Option<FenceHandle>) {
        if let Ok(idle) = DeviceIdle::wait(self.device.as_ref()) {
            for &semaphore in semaphores {
                self.device.destroy_semaphore(semaphore, &idle);
            }
            if let Some(fence) = fence {
                self.device.destroy_fence(fence, &idle);
            }
        }
    }

    /// Number of slots (F)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Primitives of slot `index`
    ///
    /// # Panics
    ///
    /// If `index >= len()`.
    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Block until the slot's previous submission has completed
    pub fn wait(&self, index: usize, timeout: Option<Duration>) -> Result<()> {
        let fence = self.slots[index].frame_fence;
        engine_trace!(LOG_SOURCE, "Waiting on slot {} fence", index);
        self.device.wait_for_fence(fence, timeout)
    }

    /// Un-signal the slot's fence and clear its command buffer
    ///
    /// Only call right before resubmitting the slot, after [`FrameSyncSet::wait`].
    pub fn reset(&self, index: usize) -> Result<()> {
        let slot = self.slots[index];
        self.device.reset_fence(slot.frame_fence)?;
        self.device.reset_command_buffer(slot.command_buffer)
    }

    /// Wait on every slot's fence
    pub fn wait_all(&self, timeout: Option<Duration>) -> Result<()> {
        for index in 0..self.slots.len() {
            self.wait(index, timeout)?;
        }
        Ok(())
    }

    /// Release every primitive and the command pool
    ///
    /// Calling it again is a no-op.
    pub fn destroy(&mut self, idle: &DeviceIdle) {
        for slot in self.slots.drain(..).rev() {
            self.device.destroy_fence(slot.frame_fence, idle);
            self.device.destroy_semaphore(slot.render_done, idle);
            self.device.destroy_semaphore(slot.acquire_signal, idle);
        }
        // Frees the command buffers with it
        if let Some(pool) = self.command_pool.take() {
            self.device.destroy_command_pool(pool, idle);
        }
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        if self.slots.is_empty() && self.command_pool.is_none() {
            return;
        }
        match DeviceIdle::wait(self.device.as_ref()) {
            Ok(idle) => self.destroy(&idle),
            Err(e) => engine_error!(LOG_SOURCE, "Leaking frame slots, device idle wait failed: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "frame_sync_set_tests.rs"]
mod tests;
