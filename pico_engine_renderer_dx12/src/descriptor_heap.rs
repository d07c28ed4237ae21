/// Descriptor heap allocator - fixed-capacity descriptor slots with deferred release
///
/// A freed slot is not reusable right away: in-flight command lists may still
/// reference it. It is queued on the ring slot that was recording when it was
/// freed, stamped with the fence value that slot's submission signals, and only
/// returns to the free stack when `process_deferred_release` runs for that ring
/// slot and the GPU has passed the stamp.

use std::sync::{Arc, Mutex, MutexGuard};

use pico_engine::pico::{PicoError, PicoResult};
use pico_engine::{engine_check, engine_debug, engine_ensure, engine_trace, engine_warn};

use crate::command::{FrameClock, FRAME_BUFFER_COUNT};
use crate::native::{
    CpuDescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorHeapFlags, DescriptorHeapType, Device,
    GpuDescriptorHandle, MAX_SHADER_VISIBLE_DESCRIPTORS_TIER_2,
};

/// Descriptor category served by one allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    RenderTarget,
    DepthStencil,
    /// Shader resources (shader visibility honored)
    ShaderResource,
    /// Unordered access views (never shader visible)
    UnorderedAccess,
}

impl DescriptorHeapKind {
    pub const ALL: [DescriptorHeapKind; 4] = [
        DescriptorHeapKind::RenderTarget,
        DescriptorHeapKind::DepthStencil,
        DescriptorHeapKind::ShaderResource,
        DescriptorHeapKind::UnorderedAccess,
    ];

    /// Native heap type backing this category
    pub fn heap_type(self) -> DescriptorHeapType {
        match self {
            DescriptorHeapKind::RenderTarget => DescriptorHeapType::Rtv,
            DescriptorHeapKind::DepthStencil => DescriptorHeapType::Dsv,
            DescriptorHeapKind::ShaderResource | DescriptorHeapKind::UnorderedAccess => DescriptorHeapType::CbvSrvUav,
        }
    }

    /// Whether a shader-visible request is honored for this category
    pub fn allows_shader_visibility(self) -> bool {
        self == DescriptorHeapKind::ShaderResource
    }

    pub fn name(self) -> &'static str {
        match self {
            DescriptorHeapKind::RenderTarget => "render-target",
            DescriptorHeapKind::DepthStencil => "depth-stencil",
            DescriptorHeapKind::ShaderResource => "shader-resource",
            DescriptorHeapKind::UnorderedAccess => "unordered-access",
        }
    }
}

/// Address of one allocated descriptor
///
/// The null CPU address is the invalid sentinel. `gpu` is only set for
/// descriptors of shader-visible heaps.
///
/// `generation` identifies one allocation of the slot. A copy kept past its
/// `free` goes stale as soon as the slot is handed out again, and the heap
/// refuses to free it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DescriptorHandle {
    pub cpu: CpuDescriptorHandle,
    pub gpu: Option<GpuDescriptorHandle>,
    pub generation: u32,
}

impl DescriptorHandle {
    pub const INVALID: DescriptorHandle = DescriptorHandle {
        cpu: CpuDescriptorHandle { ptr: 0 },
        gpu: None,
        generation: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.cpu.ptr != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct DeferredFree {
    index: u32,
    /// Fence value the GPU must reach before the slot can be reused
    fence_value: u64,
}

struct HeapState {
    /// LIFO of unused slot indices
    free_indices: Vec<u32>,
    /// Whether each slot is currently held by a caller
    allocated: Vec<bool>,
    /// Allocation count of each slot, never 0 once handed out
    generations: Vec<u32>,
    /// Slots allocated or waiting in a deferred queue
    live_count: u32,
    deferred: [Vec<DeferredFree>; FRAME_BUFFER_COUNT],
}

/// Thread-safe allocator over one native descriptor heap
pub struct DescriptorHeapAllocator {
    heap: Box<dyn DescriptorHeap>,
    kind: DescriptorHeapKind,
    capacity: u32,
    descriptor_size: u32,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
    clock: Arc<FrameClock>,
    state: Mutex<HeapState>,
}

impl DescriptorHeapAllocator {
    /// Create the native heap and seed the free stack so slots come out 0, 1, 2, ...
    ///
    /// `capacity` must be in `1..=1_000_000`. A shader-visible request is ignored
    /// for categories that cannot be shader visible.
    pub fn new(
        device: &dyn Device,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
        clock: Arc<FrameClock>,
    ) -> PicoResult<Self> {
        engine_ensure!(
            "pico::dx12::DescriptorHeap",
            (1..=MAX_SHADER_VISIBLE_DESCRIPTORS_TIER_2).contains(&capacity),
            "{} heap capacity {} outside 1..={}",
            kind.name(),
            capacity,
            MAX_SHADER_VISIBLE_DESCRIPTORS_TIER_2
        );

        let shader_visible = shader_visible && kind.allows_shader_visibility();
        let desc = DescriptorHeapDesc {
            heap_type: kind.heap_type(),
            num_descriptors: capacity,
            flags: if shader_visible { DescriptorHeapFlags::SHADER_VISIBLE } else { DescriptorHeapFlags::NONE },
            node_mask: 0,
        };
        let heap = engine_check!("pico::dx12::DescriptorHeap", device.create_descriptor_heap(&desc))?;

        let cpu_start = heap.cpu_descriptor_handle_for_heap_start();
        let gpu_start = shader_visible.then(|| heap.gpu_descriptor_handle_for_heap_start());
        let descriptor_size = device.descriptor_handle_increment_size(kind.heap_type());

        engine_debug!(
            "pico::dx12::DescriptorHeap",
            "Created {} heap: {} descriptors of {} bytes{}",
            kind.name(),
            capacity,
            descriptor_size,
            if shader_visible { ", shader visible" } else { "" }
        );

        Ok(Self {
            heap,
            kind,
            capacity,
            descriptor_size,
            cpu_start,
            gpu_start,
            clock,
            state: Mutex::new(HeapState {
                free_indices: (0..capacity).rev().collect(),
                allocated: vec![false; capacity as usize],
                generations: vec![0; capacity as usize],
                live_count: 0,
                deferred: Default::default(),
            }),
        })
    }

    fn state(&self) -> PicoResult<MutexGuard<'_, HeapState>> {
        self.state
            .lock()
            .map_err(|_| PicoError::BackendError(format!("{} heap lock poisoned", self.kind.name())))
    }

    /// State for queries and teardown, which never fail
    fn state_unchecked(&self) -> MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a free descriptor slot
    ///
    /// Running out of descriptors is a precondition violation; the heap is left unchanged.
    pub fn allocate(&self) -> PicoResult<DescriptorHandle> {
        let mut state = self.state()?;
        engine_ensure!(
            "pico::dx12::DescriptorHeap",
            state.live_count < self.capacity,
            "{} heap exhausted ({} descriptors, {} awaiting release)",
            self.kind.name(),
            self.capacity,
            state.deferred.iter().map(Vec::len).sum::<usize>()
        );
        let Some(index) = state.free_indices.pop() else {
            return Err(PicoError::BackendError(format!("{} heap free list out of sync", self.kind.name())));
        };

        let generation = state.generations[index as usize].wrapping_add(1).max(1);
        state.generations[index as usize] = generation;
        state.allocated[index as usize] = true;
        state.live_count += 1;
        Ok(DescriptorHandle { generation, ..self.handle_at(index) })
    }

    /// Queue a descriptor for release and invalidate the caller's handle
    ///
    /// Freeing the invalid sentinel does nothing, so a second `free` through the
    /// same (now invalid) handle is harmless. Freeing a handle this heap did not
    /// hand out, or a stale copy of one already freed, is a precondition violation,
    /// even after the slot was reclaimed and allocated again.
    pub fn free(&self, handle: &mut DescriptorHandle) -> PicoResult<()> {
        if !handle.is_valid() {
            return Ok(());
        }

        let index = self.index_of(*handle)?;
        let mut state = self.state()?;
        engine_ensure!(
            "pico::dx12::DescriptorHeap",
            state.allocated[index as usize],
            "{} descriptor {} freed while not allocated",
            self.kind.name(),
            index
        );
        engine_ensure!(
            "pico::dx12::DescriptorHeap",
            state.generations[index as usize] == handle.generation,
            "{} descriptor {} freed through a stale handle (generation {}, current {})",
            self.kind.name(),
            index,
            handle.generation,
            state.generations[index as usize]
        );

        let slot = self.clock.current_index();
        let fence_value = self.clock.pending_fence_value();
        state.allocated[index as usize] = false;
        state.deferred[slot].push(DeferredFree { index, fence_value });
        *handle = DescriptorHandle::INVALID;

        engine_trace!(
            "pico::dx12::DescriptorHeap",
            "{} descriptor {} queued on slot {} until fence {}",
            self.kind.name(),
            index,
            slot,
            fence_value
        );
        Ok(())
    }

    /// Return to the free stack every slot queued on `ring_slot` whose fence value has completed
    ///
    /// Called once per frame for the ring slot that just became current. Returns
    /// the number of descriptors reclaimed.
    pub fn process_deferred_release(&self, ring_slot: usize, completed_fence_value: u64) -> PicoResult<usize> {
        engine_ensure!(
            "pico::dx12::DescriptorHeap",
            ring_slot < FRAME_BUFFER_COUNT,
            "ring slot {} out of range",
            ring_slot
        );

        let mut state = self.state()?;
        let HeapState { free_indices, live_count, deferred, .. } = &mut *state;

        let queue = &mut deferred[ring_slot];
        let before = queue.len();
        queue.retain(|entry| {
            if entry.fence_value <= completed_fence_value {
                free_indices.push(entry.index);
                *live_count -= 1;
                false
            } else {
                true
            }
        });
        Ok(before - queue.len())
    }

    /// Drain every deferred queue unconditionally
    ///
    /// Only valid once the GPU can no longer reference any descriptor of this heap.
    pub fn release(&self) {
        let mut state = self.state_unchecked();
        let HeapState { free_indices, live_count, deferred, .. } = &mut *state;

        let mut drained = 0;
        for queue in deferred.iter_mut() {
            for entry in queue.drain(..) {
                free_indices.push(entry.index);
                *live_count -= 1;
                drained += 1;
            }
        }
        if drained > 0 {
            engine_debug!(
                "pico::dx12::DescriptorHeap",
                "Released {} pending {} descriptors",
                drained,
                self.kind.name()
            );
        }
    }

    /// Slot index addressed by `handle`
    ///
    /// Fails for handles outside the heap, misaligned to the descriptor size, or
    /// whose GPU address does not match the CPU one.
    pub fn index_of(&self, handle: DescriptorHandle) -> PicoResult<u32> {
        let stride = self.descriptor_size as usize;
        let offset = handle.cpu.ptr.wrapping_sub(self.cpu_start.ptr);
        engine_ensure!(
            "pico::dx12::DescriptorHeap",
            handle.cpu.ptr >= self.cpu_start.ptr && offset % stride == 0 && offset / stride < self.capacity as usize,
            "handle 0x{:X} does not address a descriptor of this {} heap",
            handle.cpu.ptr,
            self.kind.name()
        );
        let index = (offset / stride) as u32;
        engine_ensure!(
            "pico::dx12::DescriptorHeap",
            handle.gpu == self.handle_at(index).gpu,
            "handle 0x{:X} has a GPU address inconsistent with its CPU address",
            handle.cpu.ptr
        );
        Ok(index)
    }

    /// Address of slot `index`, without a generation
    fn handle_at(&self, index: u32) -> DescriptorHandle {
        DescriptorHandle {
            cpu: self.cpu_start.offset(index, self.descriptor_size),
            gpu: self.gpu_start.map(|start| start.offset(index, self.descriptor_size)),
            generation: 0,
        }
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Descriptors allocated or still awaiting release
    pub fn live_count(&self) -> u32 {
        self.state_unchecked().live_count
    }

    /// Descriptors freed but not yet reusable
    pub fn pending_release_count(&self) -> usize {
        self.state_unchecked().deferred.iter().map(Vec::len).sum()
    }

    /// Descriptors available to `allocate`
    pub fn free_count(&self) -> usize {
        self.state_unchecked().free_indices.len()
    }

    /// Stride between two descriptors, in bytes
    pub fn descriptor_size(&self) -> u32 {
        self.descriptor_size
    }

    pub fn is_shader_visible(&self) -> bool {
        self.gpu_start.is_some()
    }

    /// Native heap, for binding with `set_descriptor_heaps`
    pub fn native_heap(&self) -> &dyn DescriptorHeap {
        self.heap.as_ref()
    }
}

impl Drop for DescriptorHeapAllocator {
    fn drop(&mut self) {
        self.release();
        let live = self.live_count();
        if live > 0 {
            engine_warn!(
                "pico::dx12::DescriptorHeap",
                "{} heap destroyed with {} descriptors still allocated",
                self.kind.name(),
                live
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "descriptor_heap_tests.rs"]
mod tests;
