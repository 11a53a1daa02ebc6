/// Unit tests for MockGraphicsDevice and MockWindow.
///
/// The frame lifecycle tests rely on the mock's violation tracking, so the
/// tracking itself is checked here.

use crate::error::Error;
use crate::graphics_device::mock_graphics_device::*;
use crate::graphics_device::{
    AcquireStatus, ChainCreateInfo, ColorSpace, DeviceIdle, Extent2D, Format, GraphicsDevice,
    PresentMode, SubmitInfo, SurfaceWindow,
};

fn chain_info(image_count: u32) -> ChainCreateInfo {
    ChainCreateInfo {
        format: Format::B8G8R8A8_SRGB,
        color_space: ColorSpace::SrgbNonlinear,
        present_mode: PresentMode::Fifo,
        extent: Extent2D::new(800, 600),
        image_count,
        old_chain: None,
    }
}

// ============================================================================
// Chain and images
// ============================================================================

#[test]
fn test_mock_chain_creates_requested_images() {
    let device = MockGraphicsDevice::new();
    let chain = device.create_chain(&chain_info(3)).unwrap();

    assert_eq!(device.chain_images(chain).unwrap().len(), 3);
    assert_eq!(device.state().live_chains(), 1);
    assert_eq!(device.state().chain_infos.len(), 1);
}

#[test]
fn test_mock_acquire_round_robin() {
    let device = MockGraphicsDevice::new();
    let chain = device.create_chain(&chain_info(2)).unwrap();
    let semaphore = device.create_semaphore().unwrap();

    let indices: Vec<AcquireStatus> = (0..3)
        .map(|_| device.acquire_next_image(chain, semaphore, None).unwrap())
        .collect();

    assert_eq!(indices[0], AcquireStatus::Acquired { image_index: 0, suboptimal: false });
    assert_eq!(indices[1], AcquireStatus::Acquired { image_index: 1, suboptimal: false });
    assert_eq!(indices[2], AcquireStatus::Acquired { image_index: 0, suboptimal: false });
}

#[test]
fn test_mock_acquire_script_overrides_default() {
    let device = MockGraphicsDevice::new();
    let chain = device.create_chain(&chain_info(2)).unwrap();
    let semaphore = device.create_semaphore().unwrap();
    device.state().acquire_script.push_back(Ok(AcquireStatus::OutOfDate));

    assert_eq!(
        device.acquire_next_image(chain, semaphore, None).unwrap(),
        AcquireStatus::OutOfDate
    );
    assert_eq!(device.state().calls_with_prefix("acquire"), vec!["acquire:out_of_date"]);
}

// ============================================================================
// Idle tracking
// ============================================================================

#[test]
fn test_mock_destroy_after_idle_is_clean() {
    let device = MockGraphicsDevice::new();
    let chain = device.create_chain(&chain_info(2)).unwrap();

    let idle = DeviceIdle::wait(&device).unwrap();
    device.destroy_chain(chain, &idle);

    assert!(device.violations().is_empty());
    assert_eq!(device.state().live_chains(), 0);
}

#[test]
fn test_mock_destroy_after_queue_work_is_flagged() {
    let device = MockGraphicsDevice::new();
    let chain = device.create_chain(&chain_info(2)).unwrap();
    let semaphore = device.create_semaphore().unwrap();

    // Token obtained, then more queue work happens before the destroy
    let idle = DeviceIdle::wait(&device).unwrap();
    device.acquire_next_image(chain, semaphore, None).unwrap();
    device.destroy_chain(chain, &idle);

    let violations = device.violations();
    assert_eq!(violations.len(), 1);
    assert!(violations[0].contains("chain destroyed while device busy"));
}

#[test]
fn test_device_idle_not_issued_when_wait_fails() {
    let device = MockGraphicsDevice::new();
    let chain = device.create_chain(&chain_info(2)).unwrap();
    let semaphore = device.create_semaphore().unwrap();
    device.acquire_next_image(chain, semaphore, None).unwrap();
    device.state().wait_idle_script.push_back(Err(Error::DeviceLost("wait_idle".to_string())));

    let result = DeviceIdle::wait(&device);

    assert!(matches!(result, Err(Error::DeviceLost(_))));
    let idle = DeviceIdle::wait(&device).unwrap();
    assert_eq!(device.state().calls_with_prefix("wait_idle").len(), 2);
    device.destroy_chain(chain, &idle);
    assert!(device.violations().is_empty());
}

#[test]
fn test_mock_double_destroy_is_flagged() {
    let device = MockGraphicsDevice::new();
    let chain = device.create_chain(&chain_info(2)).unwrap();
    let idle = DeviceIdle::wait(&device).unwrap();

    device.destroy_chain(chain, &idle);
    device.destroy_chain(chain, &idle);

    assert!(device.violations()[0].contains("destroyed twice"));
}

// ============================================================================
// Fence simulation
// ============================================================================

#[test]
fn test_mock_fence_lifecycle() {
    let device = MockGraphicsDevice::new();
    let pool = device.create_command_pool().unwrap();
    let command_buffer = device.allocate_command_buffer(pool).unwrap();
    let wait = device.create_semaphore().unwrap();
    let signal = device.create_semaphore().unwrap();
    let fence = device.create_fence(true).unwrap();

    assert!(device.is_fence_signaled(fence).unwrap());
    device.reset_fence(fence).unwrap();
    assert!(!device.is_fence_signaled(fence).unwrap());

    device.submit(&SubmitInfo {
        command_buffer,
        wait_semaphore: wait,
        signal_semaphore: signal,
        fence,
    }).unwrap();
    assert!(device.state().is_fence_pending(fence));

    device.wait_for_fence(fence, None).unwrap();
    assert!(device.is_fence_signaled(fence).unwrap());
    assert!(device.violations().is_empty());
}

#[test]
fn test_mock_reuse_while_in_flight_is_flagged() {
    let device = MockGraphicsDevice::new();
    let pool = device.create_command_pool().unwrap();
    let command_buffer = device.allocate_command_buffer(pool).unwrap();
    let semaphore = device.create_semaphore().unwrap();
    let fence = device.create_fence(false).unwrap();
    let info = SubmitInfo {
        command_buffer,
        wait_semaphore: semaphore,
        signal_semaphore: semaphore,
        fence,
    };

    device.submit(&info).unwrap();
    device.reset_command_buffer(command_buffer).unwrap();
    device.reset_fence(fence).unwrap();
    device.submit(&info).unwrap();

    let violations = device.violations();
    assert_eq!(violations.len(), 3);
    assert!(violations[0].contains("command buffer"));
    assert!(violations[1].contains("reset while in flight"));
    assert!(violations[2].contains("not reset"));
}

#[test]
fn test_mock_wait_on_unsubmitted_reset_fence_times_out() {
    let device = MockGraphicsDevice::new();
    let fence = device.create_fence(false).unwrap();

    let result = device.wait_for_fence(fence, None);

    assert!(matches!(result, Err(crate::error::Error::Timeout(_))));
    assert_eq!(device.violations().len(), 1);
}

// ============================================================================
// MockWindow
// ============================================================================

#[test]
fn test_mock_window_scripted_sizes_then_sticky() {
    let window = MockWindow::new(800, 600);
    window.script_sizes(&[(0, 0), (1920, 1080)]);

    assert_eq!(window.framebuffer_size(), Extent2D::new(0, 0));
    assert_eq!(window.framebuffer_size(), Extent2D::new(1920, 1080));
    assert_eq!(window.framebuffer_size(), Extent2D::new(1920, 1080));

    window.wait_events(std::time::Duration::from_millis(1));
    assert_eq!(window.wait_count(), 1);
}
