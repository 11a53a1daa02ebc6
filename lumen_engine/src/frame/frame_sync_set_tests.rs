use std::sync::Arc;
use std::time::Duration;
use crate::error::Error;
use crate::frame::FrameSyncSet;
use crate::graphics_device::mock_graphics_device::MockGraphicsDevice;
use crate::graphics_device::{DeviceIdle, GraphicsDevice};

fn setup(frames_in_flight: usize) -> (Arc<MockGraphicsDevice>, FrameSyncSet) {
    let device = Arc::new(MockGraphicsDevice::new());
    let set = FrameSyncSet::new(device.clone() as Arc<dyn GraphicsDevice>, frames_in_flight).unwrap();
    (device, set)
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_zero_slots_rejected() {
    let device = Arc::new(MockGraphicsDevice::new());
    let result = FrameSyncSet::new(device as Arc<dyn GraphicsDevice>, 0);
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

#[test]
fn test_slots_are_distinct_and_fences_start_signaled() {
    let (device, set) = setup(3);

    assert_eq!(set.len(), 3);
    for index in 0..3 {
        let slot = set.slot(index);
        assert_ne!(slot.acquire_signal, slot.render_done);
        assert!(device.is_fence_signaled(slot.frame_fence).unwrap());
    }
    assert_ne!(set.slot(0).frame_fence, set.slot(1).frame_fence);
    assert_ne!(set.slot(1).command_buffer, set.slot(2).command_buffer);

    // Every command buffer comes from the single pool
    assert_eq!(device.state().calls_with_prefix("create_command_pool").len(), 1);
    assert_eq!(device.state().calls_with_prefix("allocate_command_buffer").len(), 3);
}

// ============================================================================
// Wait / reset
// ============================================================================

#[test]
fn test_first_wait_returns_immediately() {
    let (device, set) = setup(2);

    set.wait(0, None).unwrap();
    set.wait_all(Some(Duration::from_millis(5))).unwrap();

    assert!(device.violations().is_empty());
}

#[test]
fn test_reset_unsignals_fence_and_clears_command_buffer() {
    let (device, set) = setup(2);
    let slot = *set.slot(1);

    set.wait(1, None).unwrap();
    set.reset(1).unwrap();

    assert!(!device.is_fence_signaled(slot.frame_fence).unwrap());
    let calls = device.calls();
    let tail = &calls[calls.len() - 2..];
    assert_eq!(tail[0], format!("reset_fence:{}", slot.frame_fence.as_raw()));
    assert_eq!(tail[1], format!("reset_command_buffer:{}", slot.command_buffer.as_raw()));
}

#[test]
fn test_wait_propagates_timeout() {
    let (device, set) = setup(2);
    device.state().fence_wait_script.push_back(Err(Error::Timeout("slot 0".to_string())));

    let result = set.wait(0, Some(Duration::from_millis(1)));
    assert_eq!(result, Err(Error::Timeout("slot 0".to_string())));
}

// ============================================================================
// Destruction
// ============================================================================

#[test]
fn test_destroy_is_idempotent() {
    let (device, mut set) = setup(2);

    let idle = DeviceIdle::wait(device.as_ref()).unwrap();
    set.destroy(&idle);
    set.destroy(&idle);

    assert!(set.is_empty());
    let state = device.state();
    assert_eq!(state.live_count(), 0);
    assert!(state.violations.is_empty());
}

#[test]
fn test_drop_waits_idle_then_releases() {
    let (device, set) = setup(2);

    drop(set);

    let state = device.state();
    assert_eq!(state.live_count(), 0);
    assert!(state.violations.is_empty());
    assert_eq!(state.calls_with_prefix("wait_idle").len(), 1);
    assert!(state.calls.last().unwrap().starts_with("destroy_command_pool"));
}
