/// Unit tests for DescriptorHeapAllocator
///
/// The reuse tests drive a real FrameCommandRing on the headless GPU so frees
/// are stamped and reclaimed exactly as the backend does it.

use super::*;
use crate::command::FrameCommandRing;
use crate::headless::{GpuTimeline, HeadlessFactory};
use crate::native::{CommandListType, Factory, FeatureLevel, GpuPreference};
use rustc_hash::FxHashMap;

// ============================================================================
// TEST HELPERS
// ============================================================================

fn device() -> Arc<dyn Device> {
    let factory = HeadlessFactory::new(GpuTimeline::Immediate);
    let adapter = factory.enum_adapter_by_gpu_preference(0, GpuPreference::HighPerformance).unwrap();
    factory.create_device(adapter.as_ref(), FeatureLevel::Level12_0).unwrap()
}

fn heap(device: &Arc<dyn Device>, kind: DescriptorHeapKind, capacity: u32, clock: &Arc<FrameClock>) -> DescriptorHeapAllocator {
    DescriptorHeapAllocator::new(device.as_ref(), kind, capacity, true, Arc::clone(clock)).unwrap()
}

/// Begin a frame the way the backend does: ring first, then deferred release for the new slot
fn begin(ring: &mut FrameCommandRing, heap: &DescriptorHeapAllocator) -> usize {
    ring.begin_frame().unwrap();
    heap.process_deferred_release(ring.frame_index(), ring.completed_fence_value()).unwrap()
}

// ============================================================================
// INITIALIZATION TESTS
// ============================================================================

#[test]
fn test_capacity_limits() {
    let device = device();
    let clock = FrameClock::new();

    for capacity in [0, MAX_SHADER_VISIBLE_DESCRIPTORS_TIER_2 + 1] {
        let err = DescriptorHeapAllocator::new(device.as_ref(), DescriptorHeapKind::ShaderResource, capacity, true, Arc::clone(&clock))
            .err()
            .expect("capacity outside the limit must be rejected");
        assert!(err.is_precondition_violation());
    }
    assert!(DescriptorHeapAllocator::new(device.as_ref(), DescriptorHeapKind::RenderTarget, 1, false, clock).is_ok());
}

#[test]
fn test_shader_visibility_is_normalized() {
    let device = device();
    let clock = FrameClock::new();

    for kind in [DescriptorHeapKind::RenderTarget, DescriptorHeapKind::DepthStencil, DescriptorHeapKind::UnorderedAccess] {
        let heap = heap(&device, kind, 4, &clock);
        assert!(!heap.is_shader_visible(), "{:?} must never be shader visible", kind);
        assert_eq!(heap.allocate().unwrap().gpu, None);
    }

    let srv = heap(&device, DescriptorHeapKind::ShaderResource, 4, &clock);
    assert!(srv.is_shader_visible());
    let a = srv.allocate().unwrap();
    let b = srv.allocate().unwrap();
    let stride = srv.descriptor_size() as u64;
    assert_eq!(b.gpu.unwrap().ptr - a.gpu.unwrap().ptr, stride);
    assert_eq!((b.cpu.ptr - a.cpu.ptr) as u64, stride);

    let hidden = DescriptorHeapAllocator::new(device.as_ref(), DescriptorHeapKind::ShaderResource, 4, false, clock).unwrap();
    assert!(!hidden.is_shader_visible());
}

#[test]
fn test_kinds_map_to_native_heap_types() {
    assert_eq!(DescriptorHeapKind::RenderTarget.heap_type(), DescriptorHeapType::Rtv);
    assert_eq!(DescriptorHeapKind::DepthStencil.heap_type(), DescriptorHeapType::Dsv);
    assert_eq!(DescriptorHeapKind::ShaderResource.heap_type(), DescriptorHeapType::CbvSrvUav);
    assert_eq!(DescriptorHeapKind::UnorderedAccess.heap_type(), DescriptorHeapType::CbvSrvUav);
}

// ============================================================================
// ALLOCATE / FREE TESTS
// ============================================================================

#[test]
fn test_first_allocations_are_ascending() {
    let device = device();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 4, &FrameClock::new());

    let indices: Vec<u32> = (0..4).map(|_| heap.index_of(heap.allocate().unwrap()).unwrap()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(heap.live_count(), 4);
}

#[test]
fn test_exhaustion_leaves_heap_intact() {
    let device = device();
    let heap = heap(&device, DescriptorHeapKind::RenderTarget, 3, &FrameClock::new());
    for _ in 0..3 {
        heap.allocate().unwrap();
    }

    let err = heap.allocate().unwrap_err();
    assert!(err.is_precondition_violation());
    assert_eq!(heap.live_count(), 3);
    assert_eq!(heap.free_count(), 0);
}

#[test]
fn test_double_free_is_noop() {
    let device = device();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 4, &FrameClock::new());
    let mut handle = heap.allocate().unwrap();

    heap.free(&mut handle).unwrap();
    assert_eq!(handle, DescriptorHandle::INVALID);
    heap.free(&mut handle).unwrap();

    assert_eq!(heap.pending_release_count(), 1);
    assert_eq!(heap.live_count(), 1);
}

#[test]
fn test_stale_copy_free_is_rejected() {
    let device = device();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 4, &FrameClock::new());
    let mut handle = heap.allocate().unwrap();
    let mut stale = handle;

    heap.free(&mut handle).unwrap();
    assert!(heap.free(&mut stale).unwrap_err().is_precondition_violation());
    assert!(stale.is_valid());
    assert_eq!(heap.pending_release_count(), 1);
}

#[test]
fn test_stale_copy_cannot_free_a_reallocated_slot() {
    let device = device();
    let mut ring = FrameCommandRing::new(device.as_ref(), CommandListType::Direct, None).unwrap();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 1, &ring.clock());

    begin(&mut ring, &heap);
    let mut handle = heap.allocate().unwrap();
    let mut stale = handle;
    heap.free(&mut handle).unwrap();
    ring.end_frame().unwrap();

    // Cycle the ring until slot 0 is reclaimed
    let mut reclaimed = 0;
    for _ in 0..FRAME_BUFFER_COUNT {
        reclaimed += begin(&mut ring, &heap);
        ring.end_frame().unwrap();
    }
    assert_eq!(reclaimed, 1);

    let current = heap.allocate().unwrap();
    assert_eq!(current.cpu, stale.cpu);
    assert_ne!(current.generation, stale.generation);

    let err = heap.free(&mut stale).unwrap_err();
    assert!(err.is_precondition_violation());
    assert_eq!(heap.pending_release_count(), 0);
    assert_eq!(heap.live_count(), 1);

    // The live owner can still free it
    let mut current = current;
    heap.free(&mut current).unwrap();
    assert_eq!(heap.pending_release_count(), 1);
}

#[test]
fn test_generation_advances_on_every_allocation() {
    let device = device();
    let heap = heap(&device, DescriptorHeapKind::RenderTarget, 1, &FrameClock::new());

    let mut first = heap.allocate().unwrap();
    assert_ne!(first.generation, DescriptorHandle::INVALID.generation);
    let generation = first.generation;
    heap.free(&mut first).unwrap();
    heap.release();

    let second = heap.allocate().unwrap();
    assert_eq!(second.generation, generation + 1);
}

#[test]
fn test_foreign_handle_is_rejected() {
    let device = device();
    let clock = FrameClock::new();
    let rtv = heap(&device, DescriptorHeapKind::RenderTarget, 4, &clock);
    let srv = heap(&device, DescriptorHeapKind::ShaderResource, 4, &clock);

    let mut foreign = srv.allocate().unwrap();
    assert!(rtv.free(&mut foreign).unwrap_err().is_precondition_violation());

    let mut misaligned = rtv.allocate().unwrap();
    misaligned.cpu.ptr += 1;
    assert!(rtv.free(&mut misaligned).unwrap_err().is_precondition_violation());

    // GPU address that does not match the CPU one
    let mut forged = srv.allocate().unwrap();
    forged.gpu = None;
    assert!(srv.index_of(forged).is_err());
}

#[test]
fn test_release_drains_every_queue() {
    let device = device();
    let clock = FrameClock::new();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 4, &clock);

    for slot in 0..FRAME_BUFFER_COUNT {
        clock.publish(slot, slot as u64 + 1);
        let mut handle = heap.allocate().unwrap();
        heap.free(&mut handle).unwrap();
    }
    assert_eq!(heap.pending_release_count(), 3);

    heap.release();
    assert_eq!(heap.pending_release_count(), 0);
    assert_eq!(heap.live_count(), 0);
    assert_eq!(heap.free_count(), 4);
}

#[test]
fn test_process_rejects_out_of_range_slot() {
    let device = device();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 4, &FrameClock::new());
    assert!(heap.process_deferred_release(FRAME_BUFFER_COUNT, 0).unwrap_err().is_precondition_violation());
}

// ============================================================================
// DEFERRED RELEASE TESTS
// ============================================================================

#[test]
fn test_freed_slot_returns_only_when_its_ring_slot_comes_back() {
    let device = device();
    let mut ring = FrameCommandRing::new(device.as_ref(), CommandListType::Direct, None).unwrap();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 4, &ring.clock());

    // Frame on ring slot 0: fill the heap, free index 1
    begin(&mut ring, &heap);
    let mut handles: Vec<DescriptorHandle> = (0..4).map(|_| heap.allocate().unwrap()).collect();
    let indices: Vec<u32> = handles.iter().map(|h| heap.index_of(*h).unwrap()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    heap.free(&mut handles[1]).unwrap();
    ring.end_frame().unwrap();

    // Slots 1 and 2: index 1 is still reserved
    for expected_slot in [1, 2] {
        assert_eq!(begin(&mut ring, &heap), 0);
        assert_eq!(ring.frame_index(), expected_slot);
        assert!(heap.allocate().unwrap_err().is_precondition_violation());
        ring.end_frame().unwrap();
    }

    // Back on slot 0, three BeginFrame calls after the free
    assert_eq!(begin(&mut ring, &heap), 1);
    let reused = heap.allocate().unwrap();
    assert_eq!(heap.index_of(reused).unwrap(), 1);
    ring.end_frame().unwrap();
}

#[test]
fn test_free_between_frames_waits_one_more_cycle() {
    let device = device();
    let mut ring = FrameCommandRing::new(device.as_ref(), CommandListType::Direct, None).unwrap();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 8, &ring.clock());

    for _ in 0..3 {
        begin(&mut ring, &heap);
        ring.end_frame().unwrap();
    }

    // Freed after EndFrame, before the BeginFrame that makes slot 0 current again
    let mut handle = heap.allocate().unwrap();
    heap.free(&mut handle).unwrap();
    assert_eq!(ring.frame_index(), 0);

    assert_eq!(begin(&mut ring, &heap), 0);
    ring.end_frame().unwrap();
    assert_eq!(begin(&mut ring, &heap), 0);
    ring.end_frame().unwrap();
    assert_eq!(begin(&mut ring, &heap), 0);
    ring.end_frame().unwrap();

    assert_eq!(begin(&mut ring, &heap), 1);
    assert_eq!(heap.pending_release_count(), 0);
    ring.end_frame().unwrap();
}

#[test]
fn test_no_reuse_within_ring_window_and_capacity_conservation() {
    let device = device();
    let mut ring = FrameCommandRing::new(device.as_ref(), CommandListType::Direct, None).unwrap();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 16, &ring.clock());

    // Frame number each index was last freed in
    let mut freed_in: FxHashMap<u32, u64> = FxHashMap::default();
    let mut held: Vec<DescriptorHandle> = Vec::new();
    let mut allocations = 0u64;
    let mut reclaimed = 0u64;
    let mut seed = 0x2545_F491_u32;

    for frame in 0..200u64 {
        reclaimed += begin(&mut ring, &heap) as u64;

        for _ in 0..4 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;

            if seed % 3 != 0 && heap.live_count() < heap.capacity() {
                let handle = heap.allocate().unwrap();
                let index = heap.index_of(handle).unwrap();
                if let Some(freed) = freed_in.get(&index) {
                    assert!(frame >= freed + FRAME_BUFFER_COUNT as u64, "index {} reused too early", index);
                }
                allocations += 1;
                held.push(handle);
            } else if !held.is_empty() {
                let mut handle = held.swap_remove(seed as usize % held.len());
                let index = heap.index_of(handle).unwrap();
                heap.free(&mut handle).unwrap();
                freed_in.insert(index, frame);
            }

            assert_eq!(heap.live_count() as u64, allocations - reclaimed);
            assert!(heap.live_count() <= heap.capacity());
        }

        ring.end_frame().unwrap();
    }
    assert!(reclaimed > 0);
}

#[test]
fn test_concurrent_allocate_and_free() {
    let device = device();
    let clock = FrameClock::new();
    let heap = heap(&device, DescriptorHeapKind::ShaderResource, 64, &clock);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..8 {
                    let mut handle = heap.allocate().unwrap();
                    heap.free(&mut handle).unwrap();
                }
            });
        }
    });

    assert_eq!(heap.live_count(), 32);
    assert_eq!(heap.pending_release_count(), 32);
    assert_eq!(heap.process_deferred_release(0, 1).unwrap(), 32);
    assert_eq!(heap.live_count(), 0);
}
