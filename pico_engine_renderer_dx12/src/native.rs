//! Explicit graphics API surface used by the DX12 backend
//!
//! Only the subset the backend needs: adapter enumeration, device creation,
//! one direct command queue, command allocators and lists, fences and
//! descriptor heaps. Every fallible call returns `NativeResult<T>` so the
//! backend can wrap it in `engine_check!`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use pico_engine::native::{FenceEvent, NativeResult};

/// Largest descriptor count a shader-visible CBV/SRV/UAV heap may have (resource binding tier 2)
pub const MAX_SHADER_VISIBLE_DESCRIPTORS_TIER_2: u32 = 1_000_000;

/// Hardware feature level, ordered from oldest to newest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    Level11_0,
    Level11_1,
    Level12_0,
    Level12_1,
    Level12_2,
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
            FeatureLevel::Level12_2 => "12_2",
        };
        write!(f, "D3D_FEATURE_LEVEL_{}", name)
    }
}

/// Adapter enumeration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuPreference {
    Unspecified,
    MinimumPower,
    HighPerformance,
}

/// Command list / queue type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListType {
    Direct,
    Bundle,
    Compute,
    Copy,
}

/// Native descriptor heap type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

bitflags! {
    /// Descriptor heap creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescriptorHeapFlags: u32 {
        const NONE = 0;
        const SHADER_VISIBLE = 0x1;
    }
}

/// Descriptor heap creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    pub heap_type: DescriptorHeapType,
    pub num_descriptors: u32,
    pub flags: DescriptorHeapFlags,
    pub node_mask: u32,
}

/// CPU address of a descriptor (0 = null)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    /// Handle `index` descriptors past this one
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self { ptr: self.ptr + index as usize * increment as usize }
    }
}

/// GPU address of a descriptor in a shader-visible heap (0 = null)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    /// Handle `index` descriptors past this one
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self { ptr: self.ptr + index as u64 * increment as u64 }
    }
}

/// Debug-layer message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSeverity {
    Corruption,
    Error,
    Warning,
    Info,
    Message,
}

/// Texel / element format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    B8G8R8A8Unorm,
    R32G32Float,
}

/// Resource dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Buffer,
    Texture2D,
}

/// Committed resource creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    /// Size in bytes for buffers, width in texels for textures
    pub width: u64,
    pub height: u32,
    pub format: Format,
}

impl ResourceDesc {
    /// Upload buffer of `size` bytes
    pub fn buffer(size: u64) -> Self {
        Self { dimension: ResourceDimension::Buffer, width: size, height: 1, format: Format::Unknown }
    }

    /// Render-target capable 2D texture
    pub fn texture_2d(width: u32, height: u32, format: Format) -> Self {
        Self { dimension: ResourceDimension::Texture2D, width: width as u64, height, format }
    }
}

/// Description of an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDesc {
    pub description: String,
    pub dedicated_video_memory: u64,
    pub software: bool,
}

// ===== NATIVE OBJECT TRAITS =====

/// Adapter/device factory (debug layer, adapter enumeration, device creation)
pub trait Factory: Send + Sync {
    /// Enable the API debug layer (must precede device creation)
    fn enable_debug_layer(&self) -> NativeResult<()>;

    /// Enumerate adapters in preference order; `DXGI_ERROR_NOT_FOUND` past the last one
    fn enum_adapter_by_gpu_preference(&self, index: u32, preference: GpuPreference) -> NativeResult<Arc<dyn Adapter>>;

    /// Check whether a device could be created at `level` without creating it
    fn check_device_support(&self, adapter: &dyn Adapter, level: FeatureLevel) -> NativeResult<()>;

    /// Create a device at `level`
    fn create_device(&self, adapter: &dyn Adapter, level: FeatureLevel) -> NativeResult<Arc<dyn Device>>;
}

/// Physical adapter
pub trait Adapter: Send + Sync {
    fn desc(&self) -> AdapterDesc;
    fn as_any(&self) -> &dyn Any;
}

/// Logical device
pub trait Device: Send + Sync {
    /// Highest level of `requested` the device supports
    fn check_feature_levels(&self, requested: &[FeatureLevel]) -> NativeResult<FeatureLevel>;

    fn create_command_queue(&self, list_type: CommandListType) -> NativeResult<Box<dyn CommandQueue>>;

    fn create_command_allocator(&self, list_type: CommandListType) -> NativeResult<Arc<dyn CommandAllocator>>;

    /// Create a command list, open and recording on `allocator`
    fn create_command_list(
        &self,
        list_type: CommandListType,
        allocator: &Arc<dyn CommandAllocator>,
    ) -> NativeResult<Box<dyn GraphicsCommandList>>;

    fn create_fence(&self, initial_value: u64) -> NativeResult<Arc<dyn Fence>>;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> NativeResult<Box<dyn DescriptorHeap>>;

    /// Stride between two descriptors of a heap type
    fn descriptor_handle_increment_size(&self, heap_type: DescriptorHeapType) -> u32;

    fn create_committed_resource(&self, desc: &ResourceDesc) -> NativeResult<Arc<dyn Resource>>;

    /// Write a render-target view of `resource` at `dest`
    fn create_render_target_view(&self, resource: &dyn Resource, dest: CpuDescriptorHandle);

    /// Write a shader-resource view of `resource` at `dest`
    fn create_shader_resource_view(&self, resource: &dyn Resource, dest: CpuDescriptorHandle);

    /// Debug-layer message queue (`E_NOINTERFACE` when the debug layer is off)
    fn info_queue(&self) -> NativeResult<Arc<dyn InfoQueue>>;

    fn as_any(&self) -> &dyn Any;
}

/// Debug-layer message queue
pub trait InfoQueue: Send + Sync {
    fn set_break_on_severity(&self, severity: MessageSeverity, enable: bool) -> NativeResult<()>;
}

/// GPU command queue
pub trait CommandQueue: Send {
    /// Submit closed command lists for execution in order
    fn execute_command_lists(&self, lists: &[&dyn GraphicsCommandList]) -> NativeResult<()>;

    /// Write `value` into `fence` once all previously submitted work has completed
    fn signal(&self, fence: &Arc<dyn Fence>, value: u64) -> NativeResult<()>;
}

/// Backing memory for recorded commands
pub trait CommandAllocator: Send + Sync {
    /// Reuse the memory; the GPU must be done with every list recorded into it
    fn reset(&self) -> NativeResult<()>;
    fn as_any(&self) -> &dyn Any;
}

/// Command recording interface
pub trait GraphicsCommandList: Send {
    /// Reopen the (closed) list, recording into `allocator`
    fn reset(&mut self, allocator: &Arc<dyn CommandAllocator>) -> NativeResult<()>;

    /// Stop recording
    fn close(&mut self) -> NativeResult<()>;

    fn clear_render_target_view(&mut self, view: CpuDescriptorHandle, color: [f32; 4]);

    /// Bind `view` as the only render target, with a viewport and scissor covering `width` x `height`
    fn om_set_render_target(&mut self, view: CpuDescriptorHandle, width: u32, height: u32);

    fn set_descriptor_heaps(&mut self, heaps: &[&dyn DescriptorHeap]);

    fn set_graphics_root_descriptor_table(&mut self, root_parameter_index: u32, base: GpuDescriptorHandle);

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32);

    fn as_any(&self) -> &dyn Any;
}

/// GPU-to-CPU progress counter
pub trait Fence: Send + Sync {
    /// Highest value the GPU has written so far
    fn completed_value(&self) -> u64;

    /// Arm `event` to be set once the fence reaches `value` (immediately if it already has)
    fn set_event_on_completion(&self, value: u64, event: &Arc<FenceEvent>) -> NativeResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Native descriptor heap
pub trait DescriptorHeap: Send + Sync {
    fn desc(&self) -> DescriptorHeapDesc;
    fn cpu_descriptor_handle_for_heap_start(&self) -> CpuDescriptorHandle;
    /// Null handle for heaps that are not shader visible
    fn gpu_descriptor_handle_for_heap_start(&self) -> GpuDescriptorHandle;
    fn as_any(&self) -> &dyn Any;
}

/// GPU resource (buffer or texture)
pub trait Resource: Send + Sync {
    fn desc(&self) -> ResourceDesc;

    /// Copy `data` into an upload resource at `offset`
    fn write(&self, offset: u64, data: &[u8]) -> NativeResult<()>;

    fn as_any(&self) -> &dyn Any;
}
