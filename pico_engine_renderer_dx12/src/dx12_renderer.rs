/// Dx12Renderer - explicit backend of the Renderer façade
///
/// Owns the device, the frame command ring and one descriptor heap allocator per
/// descriptor category. Frames are recorded into the ring's command list; the
/// heaps reclaim deferred frees each time the ring moves to a new slot.

use std::any::Any;
use std::sync::Arc;

use pico_engine::pico::render::{Backend, TEST_TRIANGLE_VERTICES};
use pico_engine::pico::{BackendKind, Config, DescriptorCapacities, PicoResult};
use pico_engine::{engine_check, engine_debug, engine_ensure, engine_err, engine_error, engine_info, engine_warn};
use rustc_hash::FxHashMap;

use crate::adapter::{find_best_adapter, find_max_feature_level, MINIMUM_FEATURE_LEVEL};
use crate::command::FrameCommandRing;
use crate::descriptor_heap::{DescriptorHandle, DescriptorHeapAllocator, DescriptorHeapKind};
use crate::native::{
    Adapter, CommandListType, Device, Factory, FeatureLevel, Format, InfoQueue, MessageSeverity, Resource,
    ResourceDesc,
};

/// Severities the debug layer breaks on when validation is enabled
const BREAK_SEVERITIES: [MessageSeverity; 3] =
    [MessageSeverity::Corruption, MessageSeverity::Error, MessageSeverity::Warning];

fn capacity_of(capacities: &DescriptorCapacities, kind: DescriptorHeapKind) -> u32 {
    match kind {
        DescriptorHeapKind::RenderTarget => capacities.render_target,
        DescriptorHeapKind::DepthStencil => capacities.depth_stencil,
        DescriptorHeapKind::ShaderResource => capacities.shader_resource,
        DescriptorHeapKind::UnorderedAccess => capacities.unordered_access,
    }
}

fn heap_of(
    heaps: &FxHashMap<DescriptorHeapKind, DescriptorHeapAllocator>,
    kind: DescriptorHeapKind,
) -> PicoResult<&DescriptorHeapAllocator> {
    heaps
        .get(&kind)
        .ok_or_else(|| engine_err!("pico::dx12::Renderer", "No {} descriptor heap", kind.name()))
}

/// Explicit (command list) backend
pub struct Dx12Renderer {
    config: Config,
    adapter: Arc<dyn Adapter>,
    device: Arc<dyn Device>,
    feature_level: FeatureLevel,
    info_queue: Option<Arc<dyn InfoQueue>>,

    // Frame synchronization
    ring: FrameCommandRing,

    // Descriptors
    heaps: FxHashMap<DescriptorHeapKind, DescriptorHeapAllocator>,

    // Frame colour target
    render_target: Arc<dyn Resource>,
    render_target_view: DescriptorHandle,

    // Test triangle vertex data, created on first use
    triangle_vertices: Option<Arc<dyn Resource>>,
}

impl Dx12Renderer {
    /// Create the explicit backend on the best adapter `factory` exposes
    ///
    /// # Arguments
    ///
    /// * `config` - Renderer configuration (validation, size, clear colour, heap capacities)
    /// * `factory` - Native factory to enumerate adapters and create the device with
    pub fn new(config: &Config, factory: Arc<dyn Factory>) -> PicoResult<Self> {
        if config.enable_validation {
            engine_check!("pico::dx12::Renderer", factory.enable_debug_layer())?;
            engine_debug!("pico::dx12::Renderer", "Debug layer enabled");
        }

        let adapter = find_best_adapter(factory.as_ref(), MINIMUM_FEATURE_LEVEL)?;
        let feature_level = find_max_feature_level(factory.as_ref(), adapter.as_ref())?;
        let device = engine_check!("pico::dx12::Renderer", factory.create_device(adapter.as_ref(), feature_level))?;

        let info_queue = if config.enable_validation {
            let queue = engine_check!("pico::dx12::Renderer", device.info_queue())?;
            for severity in BREAK_SEVERITIES {
                engine_check!("pico::dx12::Renderer", queue.set_break_on_severity(severity, true))?;
            }
            Some(queue)
        } else {
            None
        };

        let ring = FrameCommandRing::new(device.as_ref(), CommandListType::Direct, config.fence_timeout)?;

        let mut heaps = FxHashMap::default();
        for kind in DescriptorHeapKind::ALL {
            let heap = DescriptorHeapAllocator::new(
                device.as_ref(),
                kind,
                capacity_of(&config.descriptor_capacities, kind),
                true,
                ring.clock(),
            )?;
            heaps.insert(kind, heap);
        }

        let render_target = engine_check!(
            "pico::dx12::Renderer",
            device.create_committed_resource(&ResourceDesc::texture_2d(
                config.width,
                config.height,
                Format::B8G8R8A8Unorm
            ))
        )?;
        let render_target_view = heap_of(&heaps, DescriptorHeapKind::RenderTarget)?.allocate()?;
        device.create_render_target_view(render_target.as_ref(), render_target_view.cpu);

        engine_info!(
            "pico::dx12::Renderer",
            "DX12 renderer ready on '{}' at {} ({}x{})",
            adapter.desc().description,
            feature_level,
            config.width,
            config.height
        );

        Ok(Self {
            config: config.clone(),
            adapter,
            device,
            feature_level,
            info_queue,
            ring,
            heaps,
            render_target,
            render_target_view,
            triangle_vertices: None,
        })
    }

    /// Upload buffer holding the test triangle's positions
    fn triangle_vertex_buffer(&mut self) -> PicoResult<Arc<dyn Resource>> {
        if let Some(buffer) = &self.triangle_vertices {
            return Ok(Arc::clone(buffer));
        }

        let positions = TEST_TRIANGLE_VERTICES;
        let bytes: &[u8] = bytemuck::cast_slice(positions.as_slice());
        let buffer = engine_check!(
            "pico::dx12::Renderer",
            self.device.create_committed_resource(&ResourceDesc::buffer(bytes.len() as u64))
        )?;
        engine_check!("pico::dx12::Renderer", buffer.write(0, bytes))?;

        self.triangle_vertices = Some(Arc::clone(&buffer));
        Ok(buffer)
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// Level the device was created at
    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    pub fn command_ring(&self) -> &FrameCommandRing {
        &self.ring
    }

    /// Command ring, for collaborators recording their own commands
    pub fn command_ring_mut(&mut self) -> &mut FrameCommandRing {
        &mut self.ring
    }

    /// Allocator of one descriptor category
    pub fn descriptor_heap(&self, kind: DescriptorHeapKind) -> PicoResult<&DescriptorHeapAllocator> {
        heap_of(&self.heaps, kind)
    }

    /// Render-target descriptor of the frame's colour target
    pub fn render_target_view(&self) -> DescriptorHandle {
        self.render_target_view
    }

    pub fn render_target(&self) -> &Arc<dyn Resource> {
        &self.render_target
    }

    /// Vertex buffer of the test triangle, once it has been drawn
    pub fn triangle_vertices(&self) -> Option<&Arc<dyn Resource>> {
        self.triangle_vertices.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Backend for Dx12Renderer {
    fn kind(&self) -> BackendKind {
        BackendKind::Explicit
    }

    fn begin_frame(&mut self) -> PicoResult<()> {
        self.ring.begin_frame()?;

        let slot = self.ring.frame_index();
        let completed = self.ring.completed_fence_value();
        for heap in self.heaps.values() {
            heap.process_deferred_release(slot, completed)?;
        }
        Ok(())
    }

    fn end_frame(&mut self) -> PicoResult<()> {
        self.ring.end_frame()
    }

    fn device(&self) -> &dyn Any {
        &self.device
    }

    fn device_context(&self) -> Option<&dyn Any> {
        None
    }

    fn render_test_triangle(&mut self) -> PicoResult<()> {
        engine_ensure!(
            "pico::dx12::Renderer",
            self.ring.is_recording(),
            "render_test_triangle called outside of a frame"
        );

        let vertices = self.triangle_vertex_buffer()?;
        let clear_color = self.config.clear_color.to_array();
        let srv_heap = heap_of(&self.heaps, DescriptorHeapKind::ShaderResource)?;
        let list = self.ring.command_list()?;

        let mut srv = srv_heap.allocate()?;
        self.device.create_shader_resource_view(vertices.as_ref(), srv.cpu);

        list.clear_render_target_view(self.render_target_view.cpu, clear_color);
        list.om_set_render_target(self.render_target_view.cpu, self.config.width, self.config.height);
        if let Some(table) = srv.gpu {
            list.set_descriptor_heaps(&[srv_heap.native_heap()]);
            list.set_graphics_root_descriptor_table(0, table);
        }
        list.draw_instanced(3, 1, 0, 0);

        // The GPU reads the view until this frame retires
        srv_heap.free(&mut srv)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for Dx12Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.ring.flush() {
            engine_error!("pico::dx12::Renderer", "GPU did not drain before destroy: {}", e);
        }

        if let Some(rtv_heap) = self.heaps.get(&DescriptorHeapKind::RenderTarget) {
            if let Err(e) = rtv_heap.free(&mut self.render_target_view) {
                engine_warn!("pico::dx12::Renderer", "Failed to free the frame render target view: {}", e);
            }
        }
        for heap in self.heaps.values() {
            heap.release();
        }

        if let Some(queue) = &self.info_queue {
            for severity in BREAK_SEVERITIES {
                if let Err(status) = queue.set_break_on_severity(severity, false) {
                    engine_warn!("pico::dx12::Renderer", "Failed to clear break on {:?}: {}", severity, status);
                }
            }
        }

        engine_debug!("pico::dx12::Renderer", "DX12 renderer destroyed");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "dx12_renderer_tests.rs"]
mod tests;
