//! Headless software device
//!
//! Implements the immediate-context API traits without graphics hardware.
//! Buffers live in an arena keyed by generational `BufferKey`s, the context
//! tracks what is bound and counts the work it is given, and the swap chain
//! counts presents per sync interval. Draws issued with incomplete pipeline
//! state, or bindings of buffers created for another stage, are counted as
//! state violations instead of being executed.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};

use pico_engine::native::{HResult, NativeResult};
use pico_engine::{engine_debug, engine_trace, engine_warn};
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

use crate::native::{
    BindFlags, Buffer, BufferDesc, CreateDeviceFlags, Device, DeviceContext, DriverType, Factory, Format,
    PrimitiveTopology, RenderTargetView, SwapChain, SwapChainDesc, Texture2D, Texture2DDesc, Usage, Viewport,
    MAX_SYNC_INTERVAL,
};

new_key_type! {
    /// Arena key of a headless buffer
    ///
    /// Stays unique after the buffer is destroyed, so a stale binding is detected.
    pub struct BufferKey;
}

/// Native calls that can be made to fail through `HeadlessFactory::fail_next`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadlessCall {
    CreateDeviceAndSwapChain,
    CreateBuffer,
    CreateRenderTargetView,
    GetBuffer,
    Present,
    Map,
}

/// Counters kept by the headless device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub clears: u64,
    pub draws: u64,
    pub indices_drawn: u64,
    /// Presents per sync interval
    pub presents: FxHashMap<u32, u64>,
    pub buffers_created: u64,
    /// Draws refused for incomplete state and bindings to the wrong stage
    pub state_violations: u64,
}

impl HeadlessStats {
    pub fn presents_with_interval(&self, sync_interval: u32) -> u64 {
        self.presents.get(&sync_interval).copied().unwrap_or(0)
    }

    pub fn total_presents(&self) -> u64 {
        self.presents.values().sum()
    }
}

/// Pipeline state currently bound on a headless context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundState {
    pub render_targets: usize,
    pub viewport: Option<Viewport>,
    pub topology: Option<PrimitiveTopology>,
    pub vertex_buffer: Option<BufferKey>,
    pub vertex_stride: u32,
    pub index_buffer: Option<(BufferKey, Format)>,
    pub ps_constant_buffer: Option<BufferKey>,
    pub last_clear_color: Option<[f32; 4]>,
}

struct BufferRecord {
    desc: BufferDesc,
    data: Vec<u8>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct DeviceShared {
    stats: Mutex<HeadlessStats>,
    faults: Mutex<FxHashMap<HeadlessCall, HResult>>,
    buffers: Mutex<SlotMap<BufferKey, BufferRecord>>,
}

impl DeviceShared {
    fn check(&self, call: HeadlessCall) -> NativeResult<()> {
        match lock(&self.faults).remove(&call) {
            Some(status) => {
                engine_debug!("pico::dx11::headless", "Injected failure for {:?}: {}", call, status);
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn violation(&self, what: &str) {
        engine_warn!("pico::dx11::headless", "Validation: {}", what);
        lock(&self.stats).state_violations += 1;
    }

    /// Arena key of `buffer` if it is a live headless buffer with `usage` among its bind flags
    fn bindable(&self, buffer: &dyn Buffer, usage: BindFlags, stage: &str) -> Option<BufferKey> {
        let Some(buffer) = buffer.as_any().downcast_ref::<HeadlessBuffer>() else {
            self.violation(&format!("foreign buffer bound as {}", stage));
            return None;
        };
        if !buffer.desc.bind_flags.contains(usage) {
            self.violation(&format!("buffer created with {:?} bound as {}", buffer.desc.bind_flags, stage));
            return None;
        }
        Some(buffer.key)
    }
}

// ===== FACTORY =====

/// Headless device factory and control surface (stats, fault injection)
pub struct HeadlessFactory {
    shared: Arc<DeviceShared>,
}

impl Default for HeadlessFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessFactory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                stats: Mutex::new(HeadlessStats::default()),
                faults: Mutex::new(FxHashMap::default()),
                buffers: Mutex::new(SlotMap::with_key()),
            }),
        }
    }

    /// Snapshot of the device counters
    pub fn stats(&self) -> HeadlessStats {
        lock(&self.shared.stats).clone()
    }

    /// Make the next `call` fail with `status`
    pub fn fail_next(&self, call: HeadlessCall, status: HResult) {
        lock(&self.shared.faults).insert(call, status);
    }

    /// Buffers currently alive in the arena
    pub fn live_buffers(&self) -> usize {
        lock(&self.shared.buffers).len()
    }
}

impl Factory for HeadlessFactory {
    fn create_device_and_swap_chain(
        &self,
        driver_type: DriverType,
        flags: CreateDeviceFlags,
        desc: &SwapChainDesc,
    ) -> NativeResult<(Arc<dyn Device>, Box<dyn DeviceContext>, Box<dyn SwapChain>)> {
        self.shared.check(HeadlessCall::CreateDeviceAndSwapChain)?;
        if desc.width == 0 || desc.height == 0 || desc.buffer_count == 0 || desc.format == Format::Unknown {
            return Err(HResult::E_INVALIDARG);
        }

        engine_debug!(
            "pico::dx11::headless",
            "{:?} device created ({:?}), swap chain {}x{} {:?}",
            driver_type,
            flags,
            desc.width,
            desc.height,
            desc.format
        );

        let device: Arc<dyn Device> = Arc::new(HeadlessDevice { shared: Arc::clone(&self.shared), flags });
        let context: Box<dyn DeviceContext> = Box::new(HeadlessDeviceContext {
            shared: Arc::clone(&self.shared),
            state: BoundState::default(),
        });
        let back_buffer = HeadlessTexture {
            desc: Texture2DDesc { width: desc.width, height: desc.height, format: desc.format },
        };
        let swap_chain: Box<dyn SwapChain> = Box::new(HeadlessSwapChain {
            shared: Arc::clone(&self.shared),
            desc: *desc,
            back_buffer: Arc::new(back_buffer),
        });
        Ok((device, context, swap_chain))
    }
}

// ===== DEVICE =====

/// Headless device
pub struct HeadlessDevice {
    shared: Arc<DeviceShared>,
    flags: CreateDeviceFlags,
}

impl Device for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> NativeResult<Arc<dyn Buffer>> {
        self.shared.check(HeadlessCall::CreateBuffer)?;
        let size = desc.byte_width as usize;
        if size == 0 || desc.bind_flags.is_empty() || initial_data.is_some_and(|data| data.len() > size) {
            return Err(HResult::E_INVALIDARG);
        }

        let mut data = vec![0; size];
        if let Some(initial) = initial_data {
            data[..initial.len()].copy_from_slice(initial);
        }
        let key = lock(&self.shared.buffers).insert(BufferRecord { desc: *desc, data });
        lock(&self.shared.stats).buffers_created += 1;
        engine_trace!("pico::dx11::headless", "Buffer {:?}: {} bytes, {:?}", key, size, desc.bind_flags);

        Ok(Arc::new(HeadlessBuffer { shared: Arc::clone(&self.shared), key, desc: *desc }))
    }

    fn create_render_target_view(&self, texture: &dyn Texture2D) -> NativeResult<Arc<dyn RenderTargetView>> {
        self.shared.check(HeadlessCall::CreateRenderTargetView)?;
        let texture = texture.as_any().downcast_ref::<HeadlessTexture>().ok_or(HResult::E_INVALIDARG)?;
        Ok(Arc::new(HeadlessRenderTargetView { texture: texture.desc }))
    }

    fn creation_flags(&self) -> CreateDeviceFlags {
        self.flags
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== CONTEXT =====

/// Headless immediate context
pub struct HeadlessDeviceContext {
    shared: Arc<DeviceShared>,
    state: BoundState,
}

impl HeadlessDeviceContext {
    /// Currently bound pipeline state
    pub fn bound_state(&self) -> &BoundState {
        &self.state
    }

    /// Size in bytes of a live buffer
    fn live_size(&self, key: BufferKey) -> Option<usize> {
        lock(&self.shared.buffers).get(key).map(|record| record.data.len())
    }
}

impl DeviceContext for HeadlessDeviceContext {
    fn om_set_render_targets(&mut self, views: &[&dyn RenderTargetView]) {
        let valid = views.iter().all(|view| view.as_any().is::<HeadlessRenderTargetView>());
        if !valid {
            self.shared.violation("foreign render target view bound");
            return;
        }
        self.state.render_targets = views.len();
    }

    fn rs_set_viewports(&mut self, viewports: &[Viewport]) {
        self.state.viewport = viewports.first().copied();
    }

    fn clear_render_target_view(&mut self, view: &dyn RenderTargetView, color: [f32; 4]) {
        if !view.as_any().is::<HeadlessRenderTargetView>() {
            self.shared.violation("clearing a foreign render target view");
            return;
        }
        self.state.last_clear_color = Some(color);
        lock(&self.shared.stats).clears += 1;
    }

    fn ia_set_vertex_buffers(&mut self, start_slot: u32, buffers: &[&dyn Buffer], stride: u32, _offset: u32) {
        // Only slot 0 is tracked
        let Some(first) = buffers.first().filter(|_| start_slot == 0) else {
            return;
        };
        if let Some(key) = self.shared.bindable(*first, BindFlags::VERTEX_BUFFER, "vertex buffer") {
            self.state.vertex_buffer = Some(key);
            self.state.vertex_stride = stride;
        }
    }

    fn ia_set_index_buffer(&mut self, buffer: &dyn Buffer, format: Format, _offset: u32) {
        if !matches!(format, Format::R16Uint | Format::R32Uint) {
            self.shared.violation(&format!("{:?} is not an index format", format));
            return;
        }
        if let Some(key) = self.shared.bindable(buffer, BindFlags::INDEX_BUFFER, "index buffer") {
            self.state.index_buffer = Some((key, format));
        }
    }

    fn ia_set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.state.topology = Some(topology);
    }

    fn ps_set_constant_buffers(&mut self, start_slot: u32, buffers: &[&dyn Buffer]) {
        let Some(first) = buffers.first().filter(|_| start_slot == 0) else {
            return;
        };
        if let Some(key) = self.shared.bindable(*first, BindFlags::CONSTANT_BUFFER, "constant buffer") {
            self.state.ps_constant_buffer = Some(key);
        }
    }

    fn map_write_discard(&mut self, buffer: &dyn Buffer, data: &[u8]) -> NativeResult<()> {
        self.shared.check(HeadlessCall::Map)?;
        let buffer = buffer.as_any().downcast_ref::<HeadlessBuffer>().ok_or(HResult::E_INVALIDARG)?;
        let mut buffers = lock(&self.shared.buffers);
        let record = buffers.get_mut(buffer.key).ok_or(HResult::E_INVALIDARG)?;
        if record.desc.usage != Usage::Dynamic || data.len() > record.data.len() {
            return Err(HResult::E_INVALIDARG);
        }
        record.data.fill(0);
        record.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, _base_vertex: i32) {
        let state = &self.state;
        let missing = if state.render_targets == 0 {
            Some("render target")
        } else if state.topology.is_none() {
            Some("primitive topology")
        } else if state.vertex_buffer.and_then(|key| self.live_size(key)).is_none() {
            Some("vertex buffer")
        } else {
            None
        };
        if let Some(what) = missing {
            self.shared.violation(&format!("DrawIndexed without a bound {}", what));
            return;
        }

        let Some((key, format)) = state.index_buffer else {
            self.shared.violation("DrawIndexed without a bound index buffer");
            return;
        };
        let index_size = if format == Format::R16Uint { 2 } else { 4 };
        let Some(size) = self.live_size(key) else {
            self.shared.violation("DrawIndexed with a destroyed index buffer");
            return;
        };
        if (start_index as usize + index_count as usize) * index_size > size {
            self.shared.violation("DrawIndexed reads past the end of the index buffer");
            return;
        }

        let mut stats = lock(&self.shared.stats);
        stats.draws += 1;
        stats.indices_drawn += index_count as u64;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== SWAP CHAIN =====

/// Headless swap chain with a single back buffer
pub struct HeadlessSwapChain {
    shared: Arc<DeviceShared>,
    desc: SwapChainDesc,
    back_buffer: Arc<HeadlessTexture>,
}

impl SwapChain for HeadlessSwapChain {
    fn desc(&self) -> SwapChainDesc {
        self.desc
    }

    fn get_buffer(&self, index: u32) -> NativeResult<Arc<dyn Texture2D>> {
        self.shared.check(HeadlessCall::GetBuffer)?;
        // With the discard effect only buffer 0 is accessible
        if index != 0 {
            return Err(HResult::DXGI_ERROR_INVALID_CALL);
        }
        Ok(self.back_buffer.clone())
    }

    fn present(&mut self, sync_interval: u32, _flags: u32) -> NativeResult<()> {
        self.shared.check(HeadlessCall::Present)?;
        if sync_interval > MAX_SYNC_INTERVAL {
            return Err(HResult::DXGI_ERROR_INVALID_CALL);
        }
        *lock(&self.shared.stats).presents.entry(sync_interval).or_insert(0) += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== RESOURCES =====

/// Headless buffer (an arena entry; removed on drop)
pub struct HeadlessBuffer {
    shared: Arc<DeviceShared>,
    key: BufferKey,
    desc: BufferDesc,
}

impl HeadlessBuffer {
    pub fn key(&self) -> BufferKey {
        self.key
    }

    /// Copy of the buffer contents
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.shared.buffers).get(self.key).map(|record| record.data.clone()).unwrap_or_default()
    }
}

impl Buffer for HeadlessBuffer {
    fn desc(&self) -> BufferDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        lock(&self.shared.buffers).remove(self.key);
    }
}

/// Headless back buffer
pub struct HeadlessTexture {
    desc: Texture2DDesc,
}

impl Texture2D for HeadlessTexture {
    fn desc(&self) -> Texture2DDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Headless render-target view
pub struct HeadlessRenderTargetView {
    texture: Texture2DDesc,
}

impl HeadlessRenderTargetView {
    /// Description of the viewed texture
    pub fn texture_desc(&self) -> Texture2DDesc {
        self.texture
    }
}

impl RenderTargetView for HeadlessRenderTargetView {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "headless_tests.rs"]
mod tests;
