/// Frame command ring - N rotating command allocators paced by one fence
///
/// The CPU records frame `k` into allocator `k mod N` while the GPU may still be
/// executing up to N-1 earlier frames. Before an allocator is reused the ring
/// waits until the fence has reached the value signaled after that allocator's
/// previous submission, so no more than N frames are ever in flight.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pico_engine::native::FenceEvent;
use pico_engine::pico::{PicoError, PicoResult};
use pico_engine::{engine_check, engine_debug, engine_ensure, engine_error, engine_trace};

use crate::native::{CommandAllocator, CommandListType, CommandQueue, Device, Fence, GraphicsCommandList};

/// Number of frames the CPU may record ahead of the GPU
pub const FRAME_BUFFER_COUNT: usize = 3;

/// Read-only view of the ring's progress, shared with the descriptor heaps
///
/// Carries the ring slot currently recording and the fence value that slot's
/// submission will signal. Heaps stamp deferred frees with it; they never hold a
/// reference to the ring itself.
#[derive(Debug)]
pub struct FrameClock {
    index: AtomicUsize,
    pending_fence_value: AtomicU64,
}

impl FrameClock {
    /// Clock of a ring that has not submitted anything yet
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            index: AtomicUsize::new(0),
            pending_fence_value: AtomicU64::new(1),
        })
    }

    /// Ring slot the current (or next) frame records into
    pub fn current_index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    /// Fence value the current (or next) frame will signal on submission
    pub fn pending_fence_value(&self) -> u64 {
        self.pending_fence_value.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, index: usize, pending_fence_value: u64) {
        self.pending_fence_value.store(pending_fence_value, Ordering::Release);
        self.index.store(index, Ordering::Release);
    }
}

/// One ring slot
struct CommandFrame {
    allocator: Arc<dyn CommandAllocator>,
    /// Fence value signaled after this slot's last submission (0 = never submitted)
    fence_value: u64,
}

/// Frame command ring
///
/// # Example
///
/// ```ignore
/// let mut ring = FrameCommandRing::new(device.as_ref(), CommandListType::Direct, None)?;
/// ring.begin_frame()?;
/// ring.command_list()?.draw_instanced(3, 1, 0, 0);
/// ring.end_frame()?;
/// ```
pub struct FrameCommandRing {
    queue: Box<dyn CommandQueue>,
    command_list: Box<dyn GraphicsCommandList>,
    frames: Vec<CommandFrame>,
    frame_index: usize,
    fence: Arc<dyn Fence>,
    fence_value: u64,
    fence_event: Arc<FenceEvent>,
    clock: Arc<FrameClock>,
    recording: bool,
    wait_timeout: Option<Duration>,
}

impl FrameCommandRing {
    /// Create the queue, N allocators, the shared command list (closed), the fence and its event
    ///
    /// `wait_timeout` turns a fence wait that takes longer into `PicoError::DeviceLost`;
    /// `None` waits indefinitely.
    pub fn new(device: &dyn Device, list_type: CommandListType, wait_timeout: Option<Duration>) -> PicoResult<Self> {
        let queue = engine_check!("pico::dx12::CommandRing", device.create_command_queue(list_type))?;

        let mut frames = Vec::with_capacity(FRAME_BUFFER_COUNT);
        for _ in 0..FRAME_BUFFER_COUNT {
            let allocator = engine_check!("pico::dx12::CommandRing", device.create_command_allocator(list_type))?;
            frames.push(CommandFrame { allocator, fence_value: 0 });
        }

        let mut command_list = engine_check!(
            "pico::dx12::CommandRing",
            device.create_command_list(list_type, &frames[0].allocator)
        )?;
        engine_check!("pico::dx12::CommandRing", command_list.close())?;

        let fence = engine_check!("pico::dx12::CommandRing", device.create_fence(0))?;
        let fence_event = engine_check!("pico::dx12::CommandRing", FenceEvent::new())?;

        engine_debug!(
            "pico::dx12::CommandRing",
            "Created {:?} command ring with {} frames in flight",
            list_type,
            FRAME_BUFFER_COUNT
        );

        Ok(Self {
            queue,
            command_list,
            frames,
            frame_index: 0,
            fence,
            fence_value: 0,
            fence_event,
            clock: FrameClock::new(),
            recording: false,
            wait_timeout,
        })
    }

    /// Wait for the current slot's previous submission, reset its allocator and reopen the command list
    pub fn begin_frame(&mut self) -> PicoResult<()> {
        engine_ensure!(
            "pico::dx12::CommandRing",
            !self.recording,
            "begin_frame called while slot {} is still recording",
            self.frame_index
        );

        self.wait_for_slot(self.frame_index)?;

        let allocator = &self.frames[self.frame_index].allocator;
        engine_check!("pico::dx12::CommandRing", allocator.reset())?;
        engine_check!("pico::dx12::CommandRing", self.command_list.reset(allocator))?;
        self.recording = true;

        engine_trace!(
            "pico::dx12::CommandRing",
            "Recording slot {} (fence {} completed)",
            self.frame_index,
            self.fence.completed_value()
        );
        Ok(())
    }

    /// Close the command list, submit it, signal the next fence value and advance the ring
    ///
    /// On failure the frame is abandoned; the ring stays on the same slot.
    pub fn end_frame(&mut self) -> PicoResult<()> {
        engine_ensure!(
            "pico::dx12::CommandRing",
            self.recording,
            "end_frame called without a matching begin_frame"
        );
        self.recording = false;

        engine_check!("pico::dx12::CommandRing", self.command_list.close())?;
        engine_check!(
            "pico::dx12::CommandRing",
            self.queue.execute_command_lists(&[self.command_list.as_ref()])
        )?;

        let value = self.fence_value + 1;
        engine_check!("pico::dx12::CommandRing", self.queue.signal(&self.fence, value))?;
        self.fence_value = value;
        self.frames[self.frame_index].fence_value = value;

        self.frame_index = (self.frame_index + 1) % FRAME_BUFFER_COUNT;
        self.clock.publish(self.frame_index, self.fence_value + 1);
        Ok(())
    }

    /// Command list of the frame being recorded
    pub fn command_list(&mut self) -> PicoResult<&mut dyn GraphicsCommandList> {
        engine_ensure!(
            "pico::dx12::CommandRing",
            self.recording,
            "command list requested outside of a frame"
        );
        Ok(self.command_list.as_mut())
    }

    /// Wait until the GPU has finished every submitted frame
    pub fn flush(&mut self) -> PicoResult<()> {
        for slot in 0..FRAME_BUFFER_COUNT {
            self.wait_for_slot(slot)?;
        }
        Ok(())
    }

    /// Block until the fence reaches the value of `slot`'s last submission
    fn wait_for_slot(&self, slot: usize) -> PicoResult<()> {
        let target = self.frames[slot].fence_value;
        while self.fence.completed_value() < target {
            engine_check!(
                "pico::dx12::CommandRing",
                self.fence.set_event_on_completion(target, &self.fence_event)
            )?;
            if !self.fence_event.wait(self.wait_timeout) {
                let message = format!(
                    "fence wait for value {} (slot {}) timed out after {:?}; GPU completed {}",
                    target,
                    slot,
                    self.wait_timeout.unwrap_or_default(),
                    self.fence.completed_value()
                );
                engine_error!("pico::dx12::CommandRing", "{}", message);
                return Err(PicoError::DeviceLost(message));
            }
        }
        Ok(())
    }

    pub fn command_queue(&self) -> &dyn CommandQueue {
        self.queue.as_ref()
    }

    pub fn fence(&self) -> &Arc<dyn Fence> {
        &self.fence
    }

    /// Shared progress view for the descriptor heaps
    pub fn clock(&self) -> Arc<FrameClock> {
        Arc::clone(&self.clock)
    }

    /// Ring slot the current (or next) frame records into
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Last fence value handed to the queue
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Last fence value reached by the GPU
    pub fn completed_fence_value(&self) -> u64 {
        self.fence.completed_value()
    }

    /// Fence value of `slot`'s last submission
    pub fn slot_fence_value(&self, slot: usize) -> u64 {
        self.frames[slot % FRAME_BUFFER_COUNT].fence_value
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

impl Drop for FrameCommandRing {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            engine_error!("pico::dx12::CommandRing", "Failed to flush command ring on destroy: {}", e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
