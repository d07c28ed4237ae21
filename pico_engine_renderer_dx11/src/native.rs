//! Immediate-context graphics API surface used by the DX11 backend
//!
//! A device and its immediate context are created together with the swap chain.
//! The context owns all pipeline state; calls on it apply immediately.

use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;
use pico_engine::native::NativeResult;

/// Largest sync interval `present` accepts
pub const MAX_SYNC_INTERVAL: u32 = 4;

/// Kind of driver the device is created on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverType {
    Hardware,
    /// Software rasterizer
    Warp,
}

bitflags! {
    /// Device creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateDeviceFlags: u32 {
        const NONE = 0;
        /// Enable the debug layer
        const DEBUG = 0x2;
    }
}

/// Texel / index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    B8G8R8A8Unorm,
    R16Uint,
    R32Uint,
    R32G32Float,
}

/// How the presented buffer is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapEffect {
    Discard,
    Sequential,
    FlipDiscard,
}

/// Swap chain description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: u32,
    pub windowed: bool,
    pub swap_effect: SwapEffect,
}

bitflags! {
    /// Pipeline stages a buffer can be bound to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const CONSTANT_BUFFER = 0x4;
    }
}

/// Buffer memory usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// GPU read/write, filled at creation
    Default,
    /// GPU read, CPU write through `map_write_discard`
    Dynamic,
}

/// Buffer description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub byte_width: u32,
    pub usage: Usage,
    pub bind_flags: BindFlags,
    pub structure_byte_stride: u32,
}

/// Input assembler topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

/// Rasterizer viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// 2D texture description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture2DDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

// ===== NATIVE OBJECT TRAITS =====

/// Creates the device, its immediate context and the swap chain in one call
pub trait Factory: Send + Sync {
    fn create_device_and_swap_chain(
        &self,
        driver_type: DriverType,
        flags: CreateDeviceFlags,
        desc: &SwapChainDesc,
    ) -> NativeResult<(Arc<dyn Device>, Box<dyn DeviceContext>, Box<dyn SwapChain>)>;
}

/// Resource factory
pub trait Device: Send + Sync {
    /// Create a buffer, filled with `initial_data` when given
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> NativeResult<Arc<dyn Buffer>>;

    fn create_render_target_view(&self, texture: &dyn Texture2D) -> NativeResult<Arc<dyn RenderTargetView>>;

    fn creation_flags(&self) -> CreateDeviceFlags;

    fn as_any(&self) -> &dyn Any;
}

/// Immediate context: pipeline state and draw submission
pub trait DeviceContext: Send {
    fn om_set_render_targets(&mut self, views: &[&dyn RenderTargetView]);

    fn rs_set_viewports(&mut self, viewports: &[Viewport]);

    fn clear_render_target_view(&mut self, view: &dyn RenderTargetView, color: [f32; 4]);

    fn ia_set_vertex_buffers(&mut self, start_slot: u32, buffers: &[&dyn Buffer], stride: u32, offset: u32);

    fn ia_set_index_buffer(&mut self, buffer: &dyn Buffer, format: Format, offset: u32);

    fn ia_set_primitive_topology(&mut self, topology: PrimitiveTopology);

    fn ps_set_constant_buffers(&mut self, start_slot: u32, buffers: &[&dyn Buffer]);

    /// Replace the whole contents of a dynamic buffer
    fn map_write_discard(&mut self, buffer: &dyn Buffer, data: &[u8]) -> NativeResult<()>;

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32);

    fn as_any(&self) -> &dyn Any;
}

/// Presentation surface
pub trait SwapChain: Send {
    fn desc(&self) -> SwapChainDesc;

    fn get_buffer(&self, index: u32) -> NativeResult<Arc<dyn Texture2D>>;

    /// Present the back buffer, waiting for `sync_interval` vertical blanks (0 = immediately)
    fn present(&mut self, sync_interval: u32, flags: u32) -> NativeResult<()>;

    fn as_any(&self) -> &dyn Any;
}

pub trait Buffer: Send + Sync {
    fn desc(&self) -> BufferDesc;
    fn as_any(&self) -> &dyn Any;
}

pub trait Texture2D: Send + Sync {
    fn desc(&self) -> Texture2DDesc;
    fn as_any(&self) -> &dyn Any;
}

pub trait RenderTargetView: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}
