//! Direct3D 11 implementation of the native traits (Windows only)
//!
//! The swap chain presents into a window: either one the application owns, or
//! a hidden window the factory creates for offscreen use. The immediate context
//! is created with the triangle shaders and input layout already bound, so the
//! backend only sets buffers, targets and topology.

use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;

use pico_engine::engine_warn;
use pico_engine::native::{HResult, NativeResult};
use windows::core::{s, PCSTR};
use windows::Win32::Foundation::{HMODULE, HWND};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_ENABLE_STRICTNESS};
use windows::Win32::Graphics::Direct3D::{self, ID3DBlob};
use windows::Win32::Graphics::Direct3D11;
use windows::Win32::Graphics::Dxgi::{self, Common};
use windows::Win32::UI::WindowsAndMessaging;

use crate::native::{
    BindFlags, Buffer, BufferDesc, CreateDeviceFlags, Device, DeviceContext, DriverType, Factory, Format,
    PrimitiveTopology, RenderTargetView, SwapChain, SwapChainDesc, SwapEffect, Texture2D, Texture2DDesc, Usage,
    Viewport,
};

/// Vertex positions in, constant-buffer colour out
const TRIANGLE_SHADER: &str = "\
cbuffer TriangleColor : register(b0) { float4 color; };
float4 vs_main(float2 position : POSITION) : SV_Position { return float4(position, 0.0, 1.0); }
float4 ps_main() : SV_Target { return color; }
";

// ===== CONVERSIONS =====

fn format(format: Format) -> Common::DXGI_FORMAT {
    match format {
        Format::Unknown => Common::DXGI_FORMAT_UNKNOWN,
        Format::B8G8R8A8Unorm => Common::DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::R16Uint => Common::DXGI_FORMAT_R16_UINT,
        Format::R32Uint => Common::DXGI_FORMAT_R32_UINT,
        Format::R32G32Float => Common::DXGI_FORMAT_R32G32_FLOAT,
    }
}

fn swap_effect(effect: SwapEffect) -> Dxgi::DXGI_SWAP_EFFECT {
    match effect {
        SwapEffect::Discard => Dxgi::DXGI_SWAP_EFFECT_DISCARD,
        SwapEffect::Sequential => Dxgi::DXGI_SWAP_EFFECT_SEQUENTIAL,
        SwapEffect::FlipDiscard => Dxgi::DXGI_SWAP_EFFECT_FLIP_DISCARD,
    }
}

fn driver_type(driver: DriverType) -> Direct3D::D3D_DRIVER_TYPE {
    match driver {
        DriverType::Hardware => Direct3D::D3D_DRIVER_TYPE_HARDWARE,
        DriverType::Warp => Direct3D::D3D_DRIVER_TYPE_WARP,
    }
}

fn topology(topology: PrimitiveTopology) -> Direct3D::D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::PointList => Direct3D::D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::LineList => Direct3D::D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::TriangleList => Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

fn bind_flags(flags: BindFlags) -> u32 {
    let mut raw = 0;
    if flags.contains(BindFlags::VERTEX_BUFFER) {
        raw |= Direct3D11::D3D11_BIND_VERTEX_BUFFER.0 as u32;
    }
    if flags.contains(BindFlags::INDEX_BUFFER) {
        raw |= Direct3D11::D3D11_BIND_INDEX_BUFFER.0 as u32;
    }
    if flags.contains(BindFlags::CONSTANT_BUFFER) {
        raw |= Direct3D11::D3D11_BIND_CONSTANT_BUFFER.0 as u32;
    }
    raw
}

fn downcast<T: 'static>(object: &dyn Any) -> NativeResult<&T> {
    object.downcast_ref::<T>().ok_or(HResult::E_INVALIDARG)
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

fn compile_shader(entry_point: PCSTR, target: PCSTR) -> NativeResult<ID3DBlob> {
    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let compiled = unsafe {
        D3DCompile(
            TRIANGLE_SHADER.as_ptr() as *const c_void,
            TRIANGLE_SHADER.len(),
            None,
            None,
            None,
            entry_point,
            target,
            D3DCOMPILE_ENABLE_STRICTNESS,
            0,
            &mut code,
            Some(&mut errors),
        )
    };
    if let Err(error) = compiled {
        if let Some(errors) = errors {
            engine_warn!(
                "pico::dx11::d3d11",
                "Shader compilation failed: {}",
                String::from_utf8_lossy(blob_bytes(&errors)).trim_end()
            );
        }
        return Err(error.into());
    }
    code.ok_or(HResult::E_FAIL)
}

// ===== FACTORY =====

/// Window the swap chain presents into
enum OutputWindow {
    /// Owned by the application
    External(HWND),
    /// Never shown; destroyed with the factory
    Hidden(HWND),
}

impl OutputWindow {
    fn handle(&self) -> HWND {
        match self {
            OutputWindow::External(hwnd) | OutputWindow::Hidden(hwnd) => *hwnd,
        }
    }
}

/// Creates D3D11 devices and their swap chains
pub struct D3d11Factory {
    window: OutputWindow,
}

// Window handles are plain identifiers; only destruction is thread bound
unsafe impl Send for D3d11Factory {}
unsafe impl Sync for D3d11Factory {}

impl D3d11Factory {
    /// Present into `window`, which must outlive every swap chain created here
    pub fn for_window(window: HWND) -> Self {
        Self { window: OutputWindow::External(window) }
    }

    /// Present into a hidden window owned by the factory
    ///
    /// Drop the factory on the thread that created it, or the window leaks
    /// until that thread exits.
    pub fn hidden() -> NativeResult<Self> {
        let hwnd = unsafe {
            WindowsAndMessaging::CreateWindowExA(
                WindowsAndMessaging::WINDOW_EX_STYLE::default(),
                s!("STATIC"),
                s!("PicoGine"),
                WindowsAndMessaging::WS_OVERLAPPEDWINDOW,
                WindowsAndMessaging::CW_USEDEFAULT,
                WindowsAndMessaging::CW_USEDEFAULT,
                WindowsAndMessaging::CW_USEDEFAULT,
                WindowsAndMessaging::CW_USEDEFAULT,
                None,
                None,
                None,
                None,
            )
        }?;
        Ok(Self { window: OutputWindow::Hidden(hwnd) })
    }

    pub fn window(&self) -> HWND {
        self.window.handle()
    }
}

impl Drop for D3d11Factory {
    fn drop(&mut self) {
        if let OutputWindow::Hidden(hwnd) = self.window {
            if let Err(e) = unsafe { WindowsAndMessaging::DestroyWindow(hwnd) } {
                engine_warn!("pico::dx11::d3d11", "Failed to destroy the hidden output window: {}", e);
            }
        }
    }
}

impl Factory for D3d11Factory {
    fn create_device_and_swap_chain(
        &self,
        driver: DriverType,
        flags: CreateDeviceFlags,
        desc: &SwapChainDesc,
    ) -> NativeResult<(Arc<dyn Device>, Box<dyn DeviceContext>, Box<dyn SwapChain>)> {
        let swap_chain_desc = Dxgi::DXGI_SWAP_CHAIN_DESC {
            BufferDesc: Common::DXGI_MODE_DESC {
                Width: desc.width,
                Height: desc.height,
                Format: format(desc.format),
                ..Default::default()
            },
            SampleDesc: Common::DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: Dxgi::DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            OutputWindow: self.window.handle(),
            Windowed: desc.windowed.into(),
            SwapEffect: swap_effect(desc.swap_effect),
            Flags: 0,
        };

        // BGRA support is required for the B8G8R8A8 back buffer
        let mut raw_flags = Direct3D11::D3D11_CREATE_DEVICE_BGRA_SUPPORT;
        if flags.contains(CreateDeviceFlags::DEBUG) {
            raw_flags |= Direct3D11::D3D11_CREATE_DEVICE_DEBUG;
        }

        let mut swap_chain: Option<Dxgi::IDXGISwapChain> = None;
        let mut device: Option<Direct3D11::ID3D11Device> = None;
        let mut context: Option<Direct3D11::ID3D11DeviceContext> = None;
        unsafe {
            Direct3D11::D3D11CreateDeviceAndSwapChain(
                None,
                driver_type(driver),
                HMODULE::default(),
                raw_flags,
                None,
                Direct3D11::D3D11_SDK_VERSION,
                Some(&swap_chain_desc),
                Some(&mut swap_chain),
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }?;
        let (swap_chain, device, context) = match (swap_chain, device, context) {
            (Some(swap_chain), Some(device), Some(context)) => (swap_chain, device, context),
            _ => return Err(HResult::E_FAIL),
        };

        let context = D3d11DeviceContext::new(&device, context)?;
        Ok((
            Arc::new(D3d11Device { raw: device, flags }),
            Box::new(context),
            Box::new(D3d11SwapChain { raw: swap_chain, desc: *desc }),
        ))
    }
}

// ===== DEVICE =====

pub struct D3d11Device {
    raw: Direct3D11::ID3D11Device,
    flags: CreateDeviceFlags,
}

// The D3D11 device is free-threaded; the immediate context is not
unsafe impl Send for D3d11Device {}
unsafe impl Sync for D3d11Device {}

impl D3d11Device {
    pub fn raw(&self) -> &Direct3D11::ID3D11Device {
        &self.raw
    }
}

impl Device for D3d11Device {
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> NativeResult<Arc<dyn Buffer>> {
        if let Some(data) = initial_data {
            if data.len() > desc.byte_width as usize {
                return Err(HResult::E_INVALIDARG);
            }
        }
        let (usage, cpu_access) = match desc.usage {
            Usage::Default => (Direct3D11::D3D11_USAGE_DEFAULT, 0),
            Usage::Dynamic => (Direct3D11::D3D11_USAGE_DYNAMIC, Direct3D11::D3D11_CPU_ACCESS_WRITE.0 as u32),
        };
        let raw_desc = Direct3D11::D3D11_BUFFER_DESC {
            ByteWidth: desc.byte_width,
            Usage: usage,
            BindFlags: bind_flags(desc.bind_flags),
            CPUAccessFlags: cpu_access,
            MiscFlags: 0,
            StructureByteStride: desc.structure_byte_stride,
        };
        let initial = initial_data.map(|data| Direct3D11::D3D11_SUBRESOURCE_DATA {
            pSysMem: data.as_ptr() as *const c_void,
            SysMemPitch: 0,
            SysMemSlicePitch: 0,
        });

        let mut buffer: Option<Direct3D11::ID3D11Buffer> = None;
        unsafe {
            self.raw.CreateBuffer(
                &raw_desc,
                initial.as_ref().map(|data| data as *const Direct3D11::D3D11_SUBRESOURCE_DATA),
                Some(&mut buffer),
            )
        }?;
        let raw = buffer.ok_or(HResult::E_FAIL)?;
        Ok(Arc::new(D3d11Buffer { raw, desc: *desc }))
    }

    fn create_render_target_view(&self, texture: &dyn Texture2D) -> NativeResult<Arc<dyn RenderTargetView>> {
        let texture = downcast::<D3d11Texture2D>(texture.as_any())?;
        let mut view: Option<Direct3D11::ID3D11RenderTargetView> = None;
        unsafe { self.raw.CreateRenderTargetView(&texture.raw, None, Some(&mut view)) }?;
        let raw = view.ok_or(HResult::E_FAIL)?;
        Ok(Arc::new(D3d11RenderTargetView { raw }))
    }

    fn creation_flags(&self) -> CreateDeviceFlags {
        self.flags
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== IMMEDIATE CONTEXT =====

pub struct D3d11DeviceContext {
    raw: Direct3D11::ID3D11DeviceContext,
}

// Owned by one renderer at a time
unsafe impl Send for D3d11DeviceContext {}

impl D3d11DeviceContext {
    /// Wrap `raw` and bind the triangle shaders and input layout on it
    fn new(device: &Direct3D11::ID3D11Device, raw: Direct3D11::ID3D11DeviceContext) -> NativeResult<Self> {
        let vs_code = compile_shader(s!("vs_main"), s!("vs_4_0"))?;
        let ps_code = compile_shader(s!("ps_main"), s!("ps_4_0"))?;

        let mut vertex_shader: Option<Direct3D11::ID3D11VertexShader> = None;
        let mut pixel_shader: Option<Direct3D11::ID3D11PixelShader> = None;
        let mut input_layout: Option<Direct3D11::ID3D11InputLayout> = None;
        let elements = [Direct3D11::D3D11_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            SemanticIndex: 0,
            Format: Common::DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 0,
            InputSlotClass: Direct3D11::D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        }];
        unsafe {
            device.CreateVertexShader(blob_bytes(&vs_code), None, Some(&mut vertex_shader))?;
            device.CreatePixelShader(blob_bytes(&ps_code), None, Some(&mut pixel_shader))?;
            device.CreateInputLayout(&elements, blob_bytes(&vs_code), Some(&mut input_layout))?;
        }
        let (vertex_shader, pixel_shader, input_layout) = match (vertex_shader, pixel_shader, input_layout) {
            (Some(vs), Some(ps), Some(layout)) => (vs, ps, layout),
            _ => return Err(HResult::E_FAIL),
        };

        unsafe {
            raw.IASetInputLayout(&input_layout);
            raw.VSSetShader(&vertex_shader, None);
            raw.PSSetShader(&pixel_shader, None);
        }
        Ok(Self { raw })
    }

    pub fn raw(&self) -> &Direct3D11::ID3D11DeviceContext {
        &self.raw
    }
}

fn raw_buffers(buffers: &[&dyn Buffer]) -> Vec<Option<Direct3D11::ID3D11Buffer>> {
    let raw: Vec<_> = buffers
        .iter()
        .filter_map(|buffer| downcast::<D3d11Buffer>(buffer.as_any()).ok())
        .map(|buffer| Some(buffer.raw.clone()))
        .collect();
    if raw.len() != buffers.len() {
        engine_warn!("pico::dx11::d3d11", "Skipping buffers from another device");
    }
    raw
}

impl DeviceContext for D3d11DeviceContext {
    fn om_set_render_targets(&mut self, views: &[&dyn RenderTargetView]) {
        let raw: Vec<Option<Direct3D11::ID3D11RenderTargetView>> = views
            .iter()
            .filter_map(|view| downcast::<D3d11RenderTargetView>(view.as_any()).ok())
            .map(|view| Some(view.raw.clone()))
            .collect();
        unsafe { self.raw.OMSetRenderTargets(Some(&raw), None) };
    }

    fn rs_set_viewports(&mut self, viewports: &[Viewport]) {
        let raw: Vec<Direct3D11::D3D11_VIEWPORT> = viewports
            .iter()
            .map(|v| Direct3D11::D3D11_VIEWPORT {
                TopLeftX: v.top_left_x,
                TopLeftY: v.top_left_y,
                Width: v.width,
                Height: v.height,
                MinDepth: v.min_depth,
                MaxDepth: v.max_depth,
            })
            .collect();
        unsafe { self.raw.RSSetViewports(Some(&raw)) };
    }

    fn clear_render_target_view(&mut self, view: &dyn RenderTargetView, color: [f32; 4]) {
        match downcast::<D3d11RenderTargetView>(view.as_any()) {
            Ok(view) => unsafe { self.raw.ClearRenderTargetView(&view.raw, &color) },
            Err(_) => engine_warn!("pico::dx11::d3d11", "Clearing a render target view from another device"),
        }
    }

    fn ia_set_vertex_buffers(&mut self, start_slot: u32, buffers: &[&dyn Buffer], stride: u32, offset: u32) {
        let raw = raw_buffers(buffers);
        let strides = vec![stride; raw.len()];
        let offsets = vec![offset; raw.len()];
        unsafe {
            self.raw.IASetVertexBuffers(
                start_slot,
                raw.len() as u32,
                Some(raw.as_ptr()),
                Some(strides.as_ptr()),
                Some(offsets.as_ptr()),
            )
        };
    }

    fn ia_set_index_buffer(&mut self, buffer: &dyn Buffer, index_format: Format, offset: u32) {
        match downcast::<D3d11Buffer>(buffer.as_any()) {
            Ok(buffer) => unsafe { self.raw.IASetIndexBuffer(&buffer.raw, format(index_format), offset) },
            Err(_) => engine_warn!("pico::dx11::d3d11", "Index buffer from another device"),
        }
    }

    fn ia_set_primitive_topology(&mut self, primitive_topology: PrimitiveTopology) {
        unsafe { self.raw.IASetPrimitiveTopology(topology(primitive_topology)) };
    }

    fn ps_set_constant_buffers(&mut self, start_slot: u32, buffers: &[&dyn Buffer]) {
        let raw = raw_buffers(buffers);
        unsafe { self.raw.PSSetConstantBuffers(start_slot, Some(&raw)) };
    }

    fn map_write_discard(&mut self, buffer: &dyn Buffer, data: &[u8]) -> NativeResult<()> {
        let buffer = downcast::<D3d11Buffer>(buffer.as_any())?;
        if buffer.desc.usage != Usage::Dynamic || data.len() > buffer.desc.byte_width as usize {
            return Err(HResult::E_INVALIDARG);
        }

        let mut mapped = Direct3D11::D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { self.raw.Map(&buffer.raw, 0, Direct3D11::D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped)) }?;
        if mapped.pData.is_null() {
            unsafe { self.raw.Unmap(&buffer.raw, 0) };
            return Err(HResult::E_FAIL);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.pData as *mut u8, data.len());
            self.raw.Unmap(&buffer.raw, 0);
        }
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        unsafe { self.raw.DrawIndexed(index_count, start_index, base_vertex) };
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== SWAP CHAIN =====

pub struct D3d11SwapChain {
    raw: Dxgi::IDXGISwapChain,
    desc: SwapChainDesc,
}

unsafe impl Send for D3d11SwapChain {}

impl SwapChain for D3d11SwapChain {
    fn desc(&self) -> SwapChainDesc {
        self.desc
    }

    fn get_buffer(&self, index: u32) -> NativeResult<Arc<dyn Texture2D>> {
        let raw: Direct3D11::ID3D11Texture2D = unsafe { self.raw.GetBuffer(index) }?;
        let desc = Texture2DDesc { width: self.desc.width, height: self.desc.height, format: self.desc.format };
        Ok(Arc::new(D3d11Texture2D { raw, desc }))
    }

    fn present(&mut self, sync_interval: u32, flags: u32) -> NativeResult<()> {
        unsafe { self.raw.Present(sync_interval, Dxgi::DXGI_PRESENT(flags)) }.ok()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== RESOURCES =====

pub struct D3d11Buffer {
    raw: Direct3D11::ID3D11Buffer,
    desc: BufferDesc,
}

unsafe impl Send for D3d11Buffer {}
unsafe impl Sync for D3d11Buffer {}

impl Buffer for D3d11Buffer {
    fn desc(&self) -> BufferDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d11Texture2D {
    raw: Direct3D11::ID3D11Texture2D,
    desc: Texture2DDesc,
}

unsafe impl Send for D3d11Texture2D {}
unsafe impl Sync for D3d11Texture2D {}

impl Texture2D for D3d11Texture2D {
    fn desc(&self) -> Texture2DDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d11RenderTargetView {
    raw: Direct3D11::ID3D11RenderTargetView,
}

unsafe impl Send for D3d11RenderTargetView {}
unsafe impl Sync for D3d11RenderTargetView {}

impl RenderTargetView for D3d11RenderTargetView {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "d3d11_tests.rs"]
mod tests;
