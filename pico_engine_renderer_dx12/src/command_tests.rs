/// Unit tests for FrameCommandRing and FrameClock
///
/// Run against the headless GPU so fence completion can be controlled.

use super::*;
use crate::headless::{GpuTimeline, HeadlessFactory};
use crate::native::{Factory, FeatureLevel, GpuPreference};
use std::time::Duration;

// ============================================================================
// TEST HELPERS
// ============================================================================

fn headless(timeline: GpuTimeline) -> (Arc<HeadlessFactory>, Arc<dyn Device>) {
    let factory = Arc::new(HeadlessFactory::new(timeline));
    let adapter = factory.enum_adapter_by_gpu_preference(0, GpuPreference::HighPerformance).unwrap();
    let device = factory.create_device(adapter.as_ref(), FeatureLevel::Level12_0).unwrap();
    (factory, device)
}

fn ring(device: &Arc<dyn Device>, timeout: Option<Duration>) -> FrameCommandRing {
    FrameCommandRing::new(device.as_ref(), CommandListType::Direct, timeout).unwrap()
}

fn run_frame(ring: &mut FrameCommandRing) -> PicoResult<()> {
    ring.begin_frame()?;
    ring.command_list()?.draw_instanced(3, 1, 0, 0);
    ring.end_frame()
}

// ============================================================================
// RING ROTATION TESTS
// ============================================================================

#[test]
fn test_new_ring_starts_idle_on_slot_zero() {
    let (factory, device) = headless(GpuTimeline::Immediate);
    let ring = ring(&device, None);

    assert_eq!(ring.frame_index(), 0);
    assert_eq!(ring.fence_value(), 0);
    assert!(!ring.is_recording());
    assert!((0..FRAME_BUFFER_COUNT).all(|slot| ring.slot_fence_value(slot) == 0));
    // The command list was created on allocator 0 and closed right away
    assert_eq!(factory.stats().recording_violations, 0);
}

#[test]
fn test_index_cycles_and_slot_fences_increase() {
    let (_factory, device) = headless(GpuTimeline::Immediate);
    let mut ring = ring(&device, None);

    let mut indices = vec![ring.frame_index()];
    let mut history = Vec::new();
    for _ in 0..6 {
        let slot = ring.frame_index();
        let before: Vec<u64> = (0..FRAME_BUFFER_COUNT).map(|s| ring.slot_fence_value(s)).collect();

        run_frame(&mut ring).unwrap();

        // Only the slot that recorded this frame got a new, larger value
        for other in 0..FRAME_BUFFER_COUNT {
            if other == slot {
                assert!(ring.slot_fence_value(other) > before[other]);
            } else {
                assert_eq!(ring.slot_fence_value(other), before[other]);
            }
        }
        history.push(ring.slot_fence_value(slot));
        indices.push(ring.frame_index());
    }

    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(history, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(ring.fence_value(), 6);
    assert_eq!(ring.completed_fence_value(), 6);
}

#[test]
fn test_clock_follows_ring() {
    let (_factory, device) = headless(GpuTimeline::Immediate);
    let mut ring = ring(&device, None);
    let clock = ring.clock();

    assert_eq!((clock.current_index(), clock.pending_fence_value()), (0, 1));
    run_frame(&mut ring).unwrap();
    assert_eq!((clock.current_index(), clock.pending_fence_value()), (1, 2));
    run_frame(&mut ring).unwrap();
    run_frame(&mut ring).unwrap();
    assert_eq!((clock.current_index(), clock.pending_fence_value()), (0, 4));
}

// ============================================================================
// FRAME PROTOCOL TESTS
// ============================================================================

#[test]
fn test_out_of_turn_calls_are_precondition_violations() {
    let (_factory, device) = headless(GpuTimeline::Immediate);
    let mut ring = ring(&device, None);

    assert!(ring.end_frame().unwrap_err().is_precondition_violation());
    assert!(ring.command_list().is_err());

    ring.begin_frame().unwrap();
    assert!(ring.begin_frame().unwrap_err().is_precondition_violation());
    assert!(ring.is_recording());
    ring.end_frame().unwrap();
    assert_eq!(ring.fence_value(), 1);
}

#[test]
fn test_failed_signal_abandons_frame_without_advancing() {
    let (factory, device) = headless(GpuTimeline::Immediate);
    let mut ring = ring(&device, None);
    run_frame(&mut ring).unwrap();

    factory.fail_next(crate::headless::HeadlessCall::Signal, pico_engine::native::HResult::DXGI_ERROR_DEVICE_HUNG);
    let err = run_frame(&mut ring).unwrap_err();

    match err {
        PicoError::ApiCallFailed { status, call, .. } => {
            assert_eq!(status, pico_engine::native::HResult::DXGI_ERROR_DEVICE_HUNG);
            assert!(call.contains("signal"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ring.frame_index(), 1);
    assert_eq!(ring.fence_value(), 1);
    assert_eq!(ring.slot_fence_value(1), 0);
    assert!(!ring.is_recording());
}

// ============================================================================
// IN-FLIGHT BOUND TESTS
// ============================================================================

#[test]
fn test_fourth_frame_waits_for_first() {
    let (factory, device) = headless(GpuTimeline::Manual);
    let mut ring = ring(&device, Some(Duration::from_millis(50)));

    for _ in 0..FRAME_BUFFER_COUNT {
        run_frame(&mut ring).unwrap();
    }
    assert_eq!(factory.stats().pending_signals, 3);

    // Slot 0 is still executing: the ring refuses to reuse it
    assert!(matches!(ring.begin_frame(), Err(PicoError::DeviceLost(_))));
    assert_eq!(factory.stats().reset_violations, 0);
    assert!(!ring.is_recording());

    assert_eq!(factory.retire_frames(1), 1);
    ring.begin_frame().unwrap();
    ring.end_frame().unwrap();

    assert!(factory.stats().max_pending_signals <= FRAME_BUFFER_COUNT as u64);
    factory.retire_all();
}

#[test]
fn test_begin_frame_blocks_until_gpu_catches_up() {
    let (factory, device) = headless(GpuTimeline::Manual);
    let mut ring = ring(&device, Some(Duration::from_secs(10)));

    for _ in 0..FRAME_BUFFER_COUNT {
        run_frame(&mut ring).unwrap();
    }

    std::thread::scope(|scope| {
        let gpu = Arc::clone(&factory);
        scope.spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            gpu.retire_frames(1);
        });

        ring.begin_frame().unwrap();
    });

    assert!(ring.completed_fence_value() >= ring.slot_fence_value(0));
    assert_eq!(factory.stats().reset_violations, 0);
    ring.end_frame().unwrap();
    factory.retire_all();
}

#[test]
fn test_threaded_gpu_never_exceeds_ring_depth() {
    let (factory, device) = headless(GpuTimeline::Threaded { latency: Duration::from_millis(1) });
    let mut ring = ring(&device, Some(Duration::from_secs(10)));

    for _ in 0..30 {
        run_frame(&mut ring).unwrap();
        assert!(factory.stats().pending_signals <= FRAME_BUFFER_COUNT as u64);
    }
    ring.flush().unwrap();

    let stats = factory.stats();
    assert_eq!(stats.lists_executed, 30);
    assert_eq!(stats.draws, 30);
    assert_eq!(stats.reset_violations, 0);
    assert!(stats.max_pending_signals <= FRAME_BUFFER_COUNT as u64);
    assert_eq!(ring.completed_fence_value(), 30);
}

#[test]
fn test_flush_waits_for_every_slot() {
    let (factory, device) = headless(GpuTimeline::Threaded { latency: Duration::from_millis(2) });
    let mut ring = ring(&device, Some(Duration::from_secs(10)));
    run_frame(&mut ring).unwrap();
    run_frame(&mut ring).unwrap();

    ring.flush().unwrap();
    assert_eq!(ring.completed_fence_value(), 2);
    assert_eq!(factory.stats().pending_signals, 0);
}
