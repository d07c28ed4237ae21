/// Dx11Renderer - immediate-context backend of the Renderer façade
///
/// Every call goes straight to the device context; the driver does its own
/// frame pacing, so there is no explicit synchronization here.

use std::any::Any;
use std::sync::Arc;

use pico_engine::pico::render::{Backend, TEST_TRIANGLE_COLOR, TEST_TRIANGLE_INDICES, TEST_TRIANGLE_VERTICES};
use pico_engine::pico::{BackendKind, Config, PicoResult};
use pico_engine::{engine_check, engine_debug, engine_info};

use crate::native::{
    BindFlags, Buffer, BufferDesc, CreateDeviceFlags, Device, DeviceContext, DriverType, Factory, Format,
    PrimitiveTopology, RenderTargetView, SwapChain, SwapChainDesc, SwapEffect, Usage, Viewport,
};

/// Buffers of the test triangle, created on first use
struct TriangleResources {
    vertex_buffer: Arc<dyn Buffer>,
    index_buffer: Arc<dyn Buffer>,
    /// Pixel-shader constant buffer holding the triangle colour
    color_buffer: Arc<dyn Buffer>,
}

/// Immediate-context backend
pub struct Dx11Renderer {
    config: Config,
    device: Arc<dyn Device>,
    context: Box<dyn DeviceContext>,
    swap_chain: Box<dyn SwapChain>,
    render_target_view: Arc<dyn RenderTargetView>,
    triangle: Option<TriangleResources>,
}

impl Dx11Renderer {
    /// Create the device, swap chain and back-buffer view, and bind them
    ///
    /// # Arguments
    ///
    /// * `config` - Renderer configuration (size, vsync, validation, clear colour)
    /// * `factory` - Native factory creating the device and swap chain
    pub fn new(config: &Config, factory: Arc<dyn Factory>) -> PicoResult<Self> {
        let swap_chain_desc = SwapChainDesc {
            width: config.width,
            height: config.height,
            format: Format::B8G8R8A8Unorm,
            buffer_count: 1,
            windowed: true,
            swap_effect: SwapEffect::Discard,
        };
        let flags = if config.enable_validation { CreateDeviceFlags::DEBUG } else { CreateDeviceFlags::NONE };

        let (device, mut context, swap_chain) = engine_check!(
            "pico::dx11::Renderer",
            factory.create_device_and_swap_chain(DriverType::Hardware, flags, &swap_chain_desc)
        )?;

        let back_buffer = engine_check!("pico::dx11::Renderer", swap_chain.get_buffer(0))?;
        let render_target_view = engine_check!(
            "pico::dx11::Renderer",
            device.create_render_target_view(back_buffer.as_ref())
        )?;

        // Output merger
        context.om_set_render_targets(&[render_target_view.as_ref()]);

        // Viewport
        context.rs_set_viewports(&[Viewport {
            top_left_x: 0.0,
            top_left_y: 0.0,
            width: config.width as f32,
            height: config.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }]);

        engine_info!(
            "pico::dx11::Renderer",
            "DX11 renderer ready ({}x{}, vsync {}{})",
            config.width,
            config.height,
            config.vsync,
            if config.enable_validation { ", debug device" } else { "" }
        );

        Ok(Self {
            config: config.clone(),
            device,
            context,
            swap_chain,
            render_target_view,
            triangle: None,
        })
    }

    fn create_triangle_resources(&self) -> PicoResult<TriangleResources> {
        let positions = TEST_TRIANGLE_VERTICES;
        let vertices: &[u8] = bytemuck::cast_slice(positions.as_slice());
        let vertex_buffer = engine_check!(
            "pico::dx11::Renderer",
            self.device.create_buffer(
                &BufferDesc {
                    byte_width: vertices.len() as u32,
                    usage: Usage::Default,
                    bind_flags: BindFlags::VERTEX_BUFFER,
                    structure_byte_stride: std::mem::size_of::<glam::Vec2>() as u32,
                },
                Some(vertices)
            )
        )?;

        let index_data = TEST_TRIANGLE_INDICES;
        let indices: &[u8] = bytemuck::cast_slice(index_data.as_slice());
        let index_buffer = engine_check!(
            "pico::dx11::Renderer",
            self.device.create_buffer(
                &BufferDesc {
                    byte_width: indices.len() as u32,
                    usage: Usage::Default,
                    bind_flags: BindFlags::INDEX_BUFFER,
                    structure_byte_stride: std::mem::size_of::<u16>() as u32,
                },
                Some(indices)
            )
        )?;

        let color_data = TEST_TRIANGLE_COLOR;
        let color: &[u8] = bytemuck::bytes_of(&color_data);
        let color_buffer = engine_check!(
            "pico::dx11::Renderer",
            self.device.create_buffer(
                &BufferDesc {
                    byte_width: color.len() as u32,
                    usage: Usage::Dynamic,
                    bind_flags: BindFlags::CONSTANT_BUFFER,
                    structure_byte_stride: 0,
                },
                Some(color)
            )
        )?;

        engine_debug!("pico::dx11::Renderer", "Test triangle buffers created");
        Ok(TriangleResources { vertex_buffer, index_buffer, color_buffer })
    }

    pub fn swap_chain(&self) -> &dyn SwapChain {
        self.swap_chain.as_ref()
    }

    /// View of back buffer 0, bound as the only render target
    pub fn render_target_view(&self) -> &Arc<dyn RenderTargetView> {
        &self.render_target_view
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the test triangle's buffers exist yet
    pub fn has_triangle_resources(&self) -> bool {
        self.triangle.is_some()
    }
}

impl Backend for Dx11Renderer {
    fn kind(&self) -> BackendKind {
        BackendKind::Immediate
    }

    fn begin_frame(&mut self) -> PicoResult<()> {
        self.context
            .clear_render_target_view(self.render_target_view.as_ref(), self.config.clear_color.to_array());
        Ok(())
    }

    fn end_frame(&mut self) -> PicoResult<()> {
        let sync_interval = if self.config.vsync { 1 } else { 0 };
        engine_check!("pico::dx11::Renderer", self.swap_chain.present(sync_interval, 0))?;
        Ok(())
    }

    fn device(&self) -> &dyn Any {
        &self.device
    }

    fn device_context(&self) -> Option<&dyn Any> {
        Some(&self.context)
    }

    fn render_test_triangle(&mut self) -> PicoResult<()> {
        let triangle = match self.triangle.take() {
            Some(triangle) => triangle,
            None => self.create_triangle_resources()?,
        };

        let stride = std::mem::size_of::<glam::Vec2>() as u32;
        self.context.ia_set_vertex_buffers(0, &[triangle.vertex_buffer.as_ref()], stride, 0);
        self.context.ia_set_index_buffer(triangle.index_buffer.as_ref(), Format::R16Uint, 0);
        self.context.ia_set_primitive_topology(PrimitiveTopology::TriangleList);
        self.context.ps_set_constant_buffers(0, &[triangle.color_buffer.as_ref()]);

        self.context.draw_indexed(TEST_TRIANGLE_INDICES.len() as u32, 0, 0);

        self.triangle = Some(triangle);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "dx11_renderer_tests.rs"]
mod tests;
