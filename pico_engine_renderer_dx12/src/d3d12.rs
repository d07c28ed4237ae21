//! Direct3D 12 implementation of the native traits (Windows only)
//!
//! Thin wrappers over the `windows` crate interfaces. Failing calls surface
//! their `HRESULT` as an `HResult`, so the backend reports real driver status
//! codes through `engine_check!`.
//!
//! Command lists record against a small built-in pipeline: a root signature
//! with one SRV table (t0, vertex stage) and a pipeline state that pulls
//! float2 positions out of that buffer by vertex id. It is bound on every
//! reset, so the backend's draws are valid on a real device.

use std::any::Any;
use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use pico_engine::native::{FenceEvent, HResult, NativeResult};
use pico_engine::pico::render::TEST_TRIANGLE_COLOR;
use pico_engine::{engine_debug, engine_warn};
use windows::core::{s, Interface, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_ENABLE_STRICTNESS};
use windows::Win32::Graphics::Direct3D::{self, ID3DBlob};
use windows::Win32::Graphics::Direct3D12;
use windows::Win32::Graphics::Dxgi::{self, Common};

use crate::native::{
    Adapter, AdapterDesc, CommandAllocator, CommandListType, CommandQueue, CpuDescriptorHandle, DescriptorHeap,
    DescriptorHeapDesc, DescriptorHeapFlags, DescriptorHeapType, Device, Factory, FeatureLevel, Fence, Format,
    GpuDescriptorHandle, GpuPreference, GraphicsCommandList, InfoQueue, MessageSeverity, Resource, ResourceDesc,
    ResourceDimension,
};

// ===== CONVERSIONS =====

fn feature_level(level: FeatureLevel) -> Direct3D::D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level11_0 => Direct3D::D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::Level11_1 => Direct3D::D3D_FEATURE_LEVEL_11_1,
        FeatureLevel::Level12_0 => Direct3D::D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => Direct3D::D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::Level12_2 => Direct3D::D3D_FEATURE_LEVEL_12_2,
    }
}

fn from_feature_level(level: Direct3D::D3D_FEATURE_LEVEL) -> Option<FeatureLevel> {
    Some(match level {
        Direct3D::D3D_FEATURE_LEVEL_11_0 => FeatureLevel::Level11_0,
        Direct3D::D3D_FEATURE_LEVEL_11_1 => FeatureLevel::Level11_1,
        Direct3D::D3D_FEATURE_LEVEL_12_0 => FeatureLevel::Level12_0,
        Direct3D::D3D_FEATURE_LEVEL_12_1 => FeatureLevel::Level12_1,
        Direct3D::D3D_FEATURE_LEVEL_12_2 => FeatureLevel::Level12_2,
        _ => return None,
    })
}

fn gpu_preference(preference: GpuPreference) -> Dxgi::DXGI_GPU_PREFERENCE {
    match preference {
        GpuPreference::Unspecified => Dxgi::DXGI_GPU_PREFERENCE_UNSPECIFIED,
        GpuPreference::MinimumPower => Dxgi::DXGI_GPU_PREFERENCE_MINIMUM_POWER,
        GpuPreference::HighPerformance => Dxgi::DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE,
    }
}

fn command_list_type(list_type: CommandListType) -> Direct3D12::D3D12_COMMAND_LIST_TYPE {
    match list_type {
        CommandListType::Direct => Direct3D12::D3D12_COMMAND_LIST_TYPE_DIRECT,
        CommandListType::Bundle => Direct3D12::D3D12_COMMAND_LIST_TYPE_BUNDLE,
        CommandListType::Compute => Direct3D12::D3D12_COMMAND_LIST_TYPE_COMPUTE,
        CommandListType::Copy => Direct3D12::D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

fn heap_type(heap_type: DescriptorHeapType) -> Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE {
    match heap_type {
        DescriptorHeapType::CbvSrvUav => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

fn message_severity(severity: MessageSeverity) -> Direct3D12::D3D12_MESSAGE_SEVERITY {
    match severity {
        MessageSeverity::Corruption => Direct3D12::D3D12_MESSAGE_SEVERITY_CORRUPTION,
        MessageSeverity::Error => Direct3D12::D3D12_MESSAGE_SEVERITY_ERROR,
        MessageSeverity::Warning => Direct3D12::D3D12_MESSAGE_SEVERITY_WARNING,
        MessageSeverity::Info => Direct3D12::D3D12_MESSAGE_SEVERITY_INFO,
        MessageSeverity::Message => Direct3D12::D3D12_MESSAGE_SEVERITY_MESSAGE,
    }
}

fn format(format: Format) -> Common::DXGI_FORMAT {
    match format {
        Format::Unknown => Common::DXGI_FORMAT_UNKNOWN,
        Format::B8G8R8A8Unorm => Common::DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::R32G32Float => Common::DXGI_FORMAT_R32G32_FLOAT,
    }
}

fn cpu_handle(handle: CpuDescriptorHandle) -> Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE {
    Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

/// Concrete object behind a trait object, `E_INVALIDARG` when it comes from another implementation
fn downcast<T: 'static>(object: &dyn Any) -> NativeResult<&T> {
    object.downcast_ref::<T>().ok_or(HResult::E_INVALIDARG)
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

// ===== FACTORY =====

/// DXGI factory and D3D12 device creation
pub struct D3d12Factory {
    raw: Dxgi::IDXGIFactory6,
}

// D3D12 and DXGI objects are free-threaded
unsafe impl Send for D3d12Factory {}
unsafe impl Sync for D3d12Factory {}

impl D3d12Factory {
    pub fn new() -> NativeResult<Self> {
        let raw: Dxgi::IDXGIFactory6 = unsafe { Dxgi::CreateDXGIFactory2(Dxgi::DXGI_CREATE_FACTORY_FLAGS(0)) }?;
        Ok(Self { raw })
    }
}

impl Factory for D3d12Factory {
    fn enable_debug_layer(&self) -> NativeResult<()> {
        let mut debug: Option<Direct3D12::ID3D12Debug> = None;
        unsafe { Direct3D12::D3D12GetDebugInterface(&mut debug) }?;
        let debug = debug.ok_or(HResult::E_NOINTERFACE)?;
        unsafe { debug.EnableDebugLayer() };
        Ok(())
    }

    fn enum_adapter_by_gpu_preference(&self, index: u32, preference: GpuPreference) -> NativeResult<Arc<dyn Adapter>> {
        let raw: Dxgi::IDXGIAdapter1 =
            unsafe { self.raw.EnumAdapterByGpuPreference(index, gpu_preference(preference)) }?;
        let desc = unsafe { raw.GetDesc1() }?;

        let name_len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
        let desc = AdapterDesc {
            description: String::from_utf16_lossy(&desc.Description[..name_len]),
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
            software: desc.Flags & Dxgi::DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
        };
        Ok(Arc::new(D3d12Adapter { raw, desc }))
    }

    fn check_device_support(&self, adapter: &dyn Adapter, level: FeatureLevel) -> NativeResult<()> {
        let adapter = downcast::<D3d12Adapter>(adapter.as_any())?;
        // A null output pointer only tests whether the device could be created
        unsafe {
            Direct3D12::D3D12CreateDevice(
                &adapter.raw,
                feature_level(level),
                std::ptr::null_mut::<Option<Direct3D12::ID3D12Device>>(),
            )
        }?;
        Ok(())
    }

    fn create_device(&self, adapter: &dyn Adapter, level: FeatureLevel) -> NativeResult<Arc<dyn Device>> {
        let adapter = downcast::<D3d12Adapter>(adapter.as_any())?;
        let mut device: Option<Direct3D12::ID3D12Device> = None;
        unsafe { Direct3D12::D3D12CreateDevice(&adapter.raw, feature_level(level), &mut device) }?;
        let raw = device.ok_or(HResult::E_FAIL)?;
        Ok(Arc::new(D3d12Device { raw, pipeline: Mutex::new(None) }))
    }
}

/// DXGI adapter with its description read once at enumeration
pub struct D3d12Adapter {
    raw: Dxgi::IDXGIAdapter1,
    desc: AdapterDesc,
}

unsafe impl Send for D3d12Adapter {}
unsafe impl Sync for D3d12Adapter {}

impl D3d12Adapter {
    pub fn raw(&self) -> &Dxgi::IDXGIAdapter1 {
        &self.raw
    }
}

impl Adapter for D3d12Adapter {
    fn desc(&self) -> AdapterDesc {
        self.desc.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== DEVICE =====

/// Root signature and pipeline state every command list records against
struct TrianglePipeline {
    root_signature: Direct3D12::ID3D12RootSignature,
    state: Direct3D12::ID3D12PipelineState,
}

fn triangle_shader_source() -> String {
    let [r, g, b, a] = TEST_TRIANGLE_COLOR.to_array();
    format!(
        "ByteAddressBuffer positions : register(t0);\n\
         float4 vs_main(uint id : SV_VertexID) : SV_Position {{\n\
             return float4(asfloat(positions.Load2(id * 8)), 0.0, 1.0);\n\
         }}\n\
         float4 ps_main() : SV_Target {{ return float4({:?}, {:?}, {:?}, {:?}); }}\n",
        r, g, b, a
    )
}

fn compile_shader(source: &str, entry_point: PCSTR, target: PCSTR) -> NativeResult<ID3DBlob> {
    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let compiled = unsafe {
        D3DCompile(
            source.as_ptr() as *const c_void,
            source.len(),
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
                "pico::dx12::d3d12",
                "Shader compilation failed: {}",
                String::from_utf8_lossy(blob_bytes(&errors)).trim_end()
            );
        }
        return Err(error.into());
    }
    code.ok_or(HResult::E_FAIL)
}

impl TrianglePipeline {
    fn new(device: &Direct3D12::ID3D12Device) -> NativeResult<Self> {
        let range = Direct3D12::D3D12_DESCRIPTOR_RANGE {
            RangeType: Direct3D12::D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
            NumDescriptors: 1,
            BaseShaderRegister: 0,
            RegisterSpace: 0,
            OffsetInDescriptorsFromTableStart: Direct3D12::D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
        };
        let parameters = [Direct3D12::D3D12_ROOT_PARAMETER {
            ParameterType: Direct3D12::D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: Direct3D12::D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: Direct3D12::D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &range,
                },
            },
            ShaderVisibility: Direct3D12::D3D12_SHADER_VISIBILITY_VERTEX,
        }];
        let root_desc = Direct3D12::D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: 0,
            pStaticSamplers: std::ptr::null(),
            Flags: Direct3D12::D3D12_ROOT_SIGNATURE_FLAG_NONE,
        };

        let mut serialized: Option<ID3DBlob> = None;
        unsafe {
            Direct3D12::D3D12SerializeRootSignature(
                &root_desc,
                Direct3D12::D3D_ROOT_SIGNATURE_VERSION_1,
                &mut serialized,
                None,
            )
        }?;
        let serialized = serialized.ok_or(HResult::E_FAIL)?;
        let root_signature: Direct3D12::ID3D12RootSignature =
            unsafe { device.CreateRootSignature(0, blob_bytes(&serialized)) }?;

        let source = triangle_shader_source();
        let vertex_shader = compile_shader(&source, s!("vs_main"), s!("vs_5_0"))?;
        let pixel_shader = compile_shader(&source, s!("ps_main"), s!("ps_5_0"))?;

        let mut blend = Direct3D12::D3D12_BLEND_DESC::default();
        blend.RenderTarget[0] = Direct3D12::D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: false.into(),
            LogicOpEnable: false.into(),
            SrcBlend: Direct3D12::D3D12_BLEND_ONE,
            DestBlend: Direct3D12::D3D12_BLEND_ZERO,
            BlendOp: Direct3D12::D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: Direct3D12::D3D12_BLEND_ONE,
            DestBlendAlpha: Direct3D12::D3D12_BLEND_ZERO,
            BlendOpAlpha: Direct3D12::D3D12_BLEND_OP_ADD,
            LogicOp: Direct3D12::D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: Direct3D12::D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };

        let mut state_desc = Direct3D12::D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            // Borrowed for the call; the descriptor never releases it
            pRootSignature: unsafe { std::mem::transmute_copy(&root_signature) },
            VS: Direct3D12::D3D12_SHADER_BYTECODE {
                pShaderBytecode: unsafe { vertex_shader.GetBufferPointer() },
                BytecodeLength: unsafe { vertex_shader.GetBufferSize() },
            },
            PS: Direct3D12::D3D12_SHADER_BYTECODE {
                pShaderBytecode: unsafe { pixel_shader.GetBufferPointer() },
                BytecodeLength: unsafe { pixel_shader.GetBufferSize() },
            },
            BlendState: blend,
            SampleMask: u32::MAX,
            RasterizerState: Direct3D12::D3D12_RASTERIZER_DESC {
                FillMode: Direct3D12::D3D12_FILL_MODE_SOLID,
                CullMode: Direct3D12::D3D12_CULL_MODE_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            PrimitiveTopologyType: Direct3D12::D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            SampleDesc: Common::DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };
        state_desc.RTVFormats[0] = Common::DXGI_FORMAT_B8G8R8A8_UNORM;

        let state: Direct3D12::ID3D12PipelineState = unsafe { device.CreateGraphicsPipelineState(&state_desc) }?;
        Ok(Self { root_signature, state })
    }

    fn bind(&self, list: &Direct3D12::ID3D12GraphicsCommandList) {
        unsafe {
            list.SetGraphicsRootSignature(&self.root_signature);
            list.SetPipelineState(&self.state);
            list.IASetPrimitiveTopology(Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
    }
}

/// D3D12 device
pub struct D3d12Device {
    raw: Direct3D12::ID3D12Device,
    /// Built with the first command list
    pipeline: Mutex<Option<Arc<TrianglePipeline>>>,
}

unsafe impl Send for D3d12Device {}
unsafe impl Sync for D3d12Device {}

impl D3d12Device {
    pub fn raw(&self) -> &Direct3D12::ID3D12Device {
        &self.raw
    }

    fn pipeline(&self) -> NativeResult<Arc<TrianglePipeline>> {
        let mut pipeline = self.pipeline.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pipeline) = pipeline.as_ref() {
            return Ok(Arc::clone(pipeline));
        }
        let created = Arc::new(TrianglePipeline::new(&self.raw)?);
        engine_debug!("pico::dx12::d3d12", "Built the triangle pipeline");
        *pipeline = Some(Arc::clone(&created));
        Ok(created)
    }
}

impl Device for D3d12Device {
    fn check_feature_levels(&self, requested: &[FeatureLevel]) -> NativeResult<FeatureLevel> {
        if requested.is_empty() {
            return Err(HResult::E_INVALIDARG);
        }
        let levels: Vec<Direct3D::D3D_FEATURE_LEVEL> = requested.iter().map(|&level| feature_level(level)).collect();
        let mut data = Direct3D12::D3D12_FEATURE_DATA_FEATURE_LEVELS {
            NumFeatureLevels: levels.len() as u32,
            pFeatureLevelsRequested: levels.as_ptr(),
            MaxSupportedFeatureLevel: Direct3D::D3D_FEATURE_LEVEL::default(),
        };
        unsafe {
            self.raw.CheckFeatureSupport(
                Direct3D12::D3D12_FEATURE_FEATURE_LEVELS,
                &mut data as *mut _ as *mut c_void,
                std::mem::size_of::<Direct3D12::D3D12_FEATURE_DATA_FEATURE_LEVELS>() as u32,
            )
        }?;
        from_feature_level(data.MaxSupportedFeatureLevel).ok_or(HResult::DXGI_ERROR_UNSUPPORTED)
    }

    fn create_command_queue(&self, list_type: CommandListType) -> NativeResult<Box<dyn CommandQueue>> {
        let desc = Direct3D12::D3D12_COMMAND_QUEUE_DESC {
            Type: command_list_type(list_type),
            ..Default::default()
        };
        let raw: Direct3D12::ID3D12CommandQueue = unsafe { self.raw.CreateCommandQueue(&desc) }?;
        Ok(Box::new(D3d12CommandQueue { raw }))
    }

    fn create_command_allocator(&self, list_type: CommandListType) -> NativeResult<Arc<dyn CommandAllocator>> {
        let raw: Direct3D12::ID3D12CommandAllocator =
            unsafe { self.raw.CreateCommandAllocator(command_list_type(list_type)) }?;
        Ok(Arc::new(D3d12CommandAllocator { raw }))
    }

    fn create_command_list(
        &self,
        list_type: CommandListType,
        allocator: &Arc<dyn CommandAllocator>,
    ) -> NativeResult<Box<dyn GraphicsCommandList>> {
        let allocator = downcast::<D3d12CommandAllocator>(allocator.as_any())?;
        let pipeline = self.pipeline()?;
        let raw: Direct3D12::ID3D12GraphicsCommandList =
            unsafe { self.raw.CreateCommandList(0, command_list_type(list_type), &allocator.raw, &pipeline.state) }?;
        pipeline.bind(&raw);
        Ok(Box::new(D3d12CommandList { raw, pipeline }))
    }

    fn create_fence(&self, initial_value: u64) -> NativeResult<Arc<dyn Fence>> {
        let raw: Direct3D12::ID3D12Fence =
            unsafe { self.raw.CreateFence(initial_value, Direct3D12::D3D12_FENCE_FLAG_NONE) }?;
        Ok(Arc::new(D3d12Fence { raw }))
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> NativeResult<Box<dyn DescriptorHeap>> {
        let flags = if desc.flags.contains(DescriptorHeapFlags::SHADER_VISIBLE) {
            Direct3D12::D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            Direct3D12::D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };
        let raw_desc = Direct3D12::D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type(desc.heap_type),
            NumDescriptors: desc.num_descriptors,
            Flags: flags,
            NodeMask: desc.node_mask,
        };
        let raw: Direct3D12::ID3D12DescriptorHeap = unsafe { self.raw.CreateDescriptorHeap(&raw_desc) }?;
        Ok(Box::new(D3d12DescriptorHeap { raw, desc: *desc }))
    }

    fn descriptor_handle_increment_size(&self, heap_type_: DescriptorHeapType) -> u32 {
        unsafe { self.raw.GetDescriptorHandleIncrementSize(heap_type(heap_type_)) }
    }

    fn create_committed_resource(&self, desc: &ResourceDesc) -> NativeResult<Arc<dyn Resource>> {
        let (heap_type, state, raw_desc) = match desc.dimension {
            // Upload heap: CPU writable, read by shaders through an SRV
            ResourceDimension::Buffer => (
                Direct3D12::D3D12_HEAP_TYPE_UPLOAD,
                Direct3D12::D3D12_RESOURCE_STATE_GENERIC_READ,
                Direct3D12::D3D12_RESOURCE_DESC {
                    Dimension: Direct3D12::D3D12_RESOURCE_DIMENSION_BUFFER,
                    Alignment: 0,
                    Width: desc.width,
                    Height: 1,
                    DepthOrArraySize: 1,
                    MipLevels: 1,
                    Format: Common::DXGI_FORMAT_UNKNOWN,
                    SampleDesc: Common::DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                    Layout: Direct3D12::D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                    Flags: Direct3D12::D3D12_RESOURCE_FLAG_NONE,
                },
            ),
            ResourceDimension::Texture2D => (
                Direct3D12::D3D12_HEAP_TYPE_DEFAULT,
                Direct3D12::D3D12_RESOURCE_STATE_RENDER_TARGET,
                Direct3D12::D3D12_RESOURCE_DESC {
                    Dimension: Direct3D12::D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                    Alignment: 0,
                    Width: desc.width,
                    Height: desc.height,
                    DepthOrArraySize: 1,
                    MipLevels: 1,
                    Format: format(desc.format),
                    SampleDesc: Common::DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                    Layout: Direct3D12::D3D12_TEXTURE_LAYOUT_UNKNOWN,
                    Flags: Direct3D12::D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
                },
            ),
        };
        let heap_properties = Direct3D12::D3D12_HEAP_PROPERTIES {
            Type: heap_type,
            CPUPageProperty: Direct3D12::D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
            MemoryPoolPreference: Direct3D12::D3D12_MEMORY_POOL_UNKNOWN,
            CreationNodeMask: 1,
            VisibleNodeMask: 1,
        };

        let mut resource: Option<Direct3D12::ID3D12Resource> = None;
        unsafe {
            self.raw.CreateCommittedResource(
                &heap_properties,
                Direct3D12::D3D12_HEAP_FLAG_NONE,
                &raw_desc,
                state,
                None,
                &mut resource,
            )
        }?;
        let raw = resource.ok_or(HResult::E_FAIL)?;
        Ok(Arc::new(D3d12Resource { raw, desc: *desc }))
    }

    fn create_render_target_view(&self, resource: &dyn Resource, dest: CpuDescriptorHandle) {
        match downcast::<D3d12Resource>(resource.as_any()) {
            Ok(resource) => unsafe { self.raw.CreateRenderTargetView(&resource.raw, None, cpu_handle(dest)) },
            Err(_) => engine_warn!("pico::dx12::d3d12", "Render target view of a resource from another device"),
        }
    }

    fn create_shader_resource_view(&self, resource: &dyn Resource, dest: CpuDescriptorHandle) {
        let resource = match downcast::<D3d12Resource>(resource.as_any()) {
            Ok(resource) => resource,
            Err(_) => {
                engine_warn!("pico::dx12::d3d12", "Shader resource view of a resource from another device");
                return;
            }
        };
        match resource.desc.dimension {
            // Raw view: the shader reads it as a ByteAddressBuffer
            ResourceDimension::Buffer => {
                let view = Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: Common::DXGI_FORMAT_R32_TYPELESS,
                    ViewDimension: Direct3D12::D3D12_SRV_DIMENSION_BUFFER,
                    Shader4ComponentMapping: Direct3D12::D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Buffer: Direct3D12::D3D12_BUFFER_SRV {
                            FirstElement: 0,
                            NumElements: (resource.desc.width / 4) as u32,
                            StructureByteStride: 0,
                            Flags: Direct3D12::D3D12_BUFFER_SRV_FLAG_RAW,
                        },
                    },
                };
                unsafe { self.raw.CreateShaderResourceView(&resource.raw, Some(&view), cpu_handle(dest)) }
            }
            ResourceDimension::Texture2D => unsafe {
                self.raw.CreateShaderResourceView(&resource.raw, None, cpu_handle(dest))
            },
        }
    }

    fn info_queue(&self) -> NativeResult<Arc<dyn InfoQueue>> {
        let raw = self.raw.cast::<Direct3D12::ID3D12InfoQueue>().map_err(|_| HResult::E_NOINTERFACE)?;
        Ok(Arc::new(D3d12InfoQueue { raw }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12InfoQueue {
    raw: Direct3D12::ID3D12InfoQueue,
}

unsafe impl Send for D3d12InfoQueue {}
unsafe impl Sync for D3d12InfoQueue {}

impl InfoQueue for D3d12InfoQueue {
    fn set_break_on_severity(&self, severity: MessageSeverity, enable: bool) -> NativeResult<()> {
        unsafe { self.raw.SetBreakOnSeverity(message_severity(severity), enable) }?;
        Ok(())
    }
}

// ===== COMMANDS =====

pub struct D3d12CommandQueue {
    raw: Direct3D12::ID3D12CommandQueue,
}

unsafe impl Send for D3d12CommandQueue {}

impl CommandQueue for D3d12CommandQueue {
    fn execute_command_lists(&self, lists: &[&dyn GraphicsCommandList]) -> NativeResult<()> {
        let mut raw_lists = Vec::with_capacity(lists.len());
        for list in lists {
            let list = downcast::<D3d12CommandList>(list.as_any())?;
            raw_lists.push(Some(list.raw.cast::<Direct3D12::ID3D12CommandList>()?));
        }
        unsafe { self.raw.ExecuteCommandLists(&raw_lists) };
        Ok(())
    }

    fn signal(&self, fence: &Arc<dyn Fence>, value: u64) -> NativeResult<()> {
        let fence = downcast::<D3d12Fence>(fence.as_any())?;
        unsafe { self.raw.Signal(&fence.raw, value) }?;
        Ok(())
    }
}

pub struct D3d12CommandAllocator {
    raw: Direct3D12::ID3D12CommandAllocator,
}

unsafe impl Send for D3d12CommandAllocator {}
unsafe impl Sync for D3d12CommandAllocator {}

impl CommandAllocator for D3d12CommandAllocator {
    fn reset(&self) -> NativeResult<()> {
        unsafe { self.raw.Reset() }?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Direct command list with the triangle pipeline bound
pub struct D3d12CommandList {
    raw: Direct3D12::ID3D12GraphicsCommandList,
    pipeline: Arc<TrianglePipeline>,
}

unsafe impl Send for D3d12CommandList {}

impl GraphicsCommandList for D3d12CommandList {
    fn reset(&mut self, allocator: &Arc<dyn CommandAllocator>) -> NativeResult<()> {
        let allocator = downcast::<D3d12CommandAllocator>(allocator.as_any())?;
        unsafe { self.raw.Reset(&allocator.raw, &self.pipeline.state) }?;
        self.pipeline.bind(&self.raw);
        Ok(())
    }

    fn close(&mut self) -> NativeResult<()> {
        unsafe { self.raw.Close() }?;
        Ok(())
    }

    fn clear_render_target_view(&mut self, view: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe { self.raw.ClearRenderTargetView(cpu_handle(view), &color, None) };
    }

    fn om_set_render_target(&mut self, view: CpuDescriptorHandle, width: u32, height: u32) {
        let viewport = Direct3D12::D3D12_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: width as f32,
            Height: height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let scissor = windows::Win32::Foundation::RECT { left: 0, top: 0, right: width as i32, bottom: height as i32 };
        let target = cpu_handle(view);
        unsafe {
            self.raw.OMSetRenderTargets(1, Some(&target), false, None);
            self.raw.RSSetViewports(&[viewport]);
            self.raw.RSSetScissorRects(&[scissor]);
        }
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&dyn DescriptorHeap]) {
        let raw_heaps: Vec<Option<Direct3D12::ID3D12DescriptorHeap>> = heaps
            .iter()
            .filter_map(|heap| downcast::<D3d12DescriptorHeap>(heap.as_any()).ok())
            .map(|heap| Some(heap.raw.clone()))
            .collect();
        if raw_heaps.len() != heaps.len() {
            engine_warn!("pico::dx12::d3d12", "Skipping descriptor heaps from another device");
        }
        unsafe { self.raw.SetDescriptorHeaps(&raw_heaps) };
    }

    fn set_graphics_root_descriptor_table(&mut self, root_parameter_index: u32, base: GpuDescriptorHandle) {
        let base = Direct3D12::D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.ptr };
        unsafe { self.raw.SetGraphicsRootDescriptorTable(root_parameter_index, base) };
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        unsafe { self.raw.DrawInstanced(vertex_count, instance_count, start_vertex, start_instance) };
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== SYNCHRONIZATION =====

pub struct D3d12Fence {
    raw: Direct3D12::ID3D12Fence,
}

unsafe impl Send for D3d12Fence {}
unsafe impl Sync for D3d12Fence {}

impl Fence for D3d12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.raw.GetCompletedValue() }
    }

    fn set_event_on_completion(&self, value: u64, event: &Arc<FenceEvent>) -> NativeResult<()> {
        unsafe { self.raw.SetEventOnCompletion(value, event.raw_handle()) }?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== DESCRIPTORS AND RESOURCES =====

pub struct D3d12DescriptorHeap {
    raw: Direct3D12::ID3D12DescriptorHeap,
    desc: DescriptorHeapDesc,
}

unsafe impl Send for D3d12DescriptorHeap {}
unsafe impl Sync for D3d12DescriptorHeap {}

impl DescriptorHeap for D3d12DescriptorHeap {
    fn desc(&self) -> DescriptorHeapDesc {
        self.desc
    }

    fn cpu_descriptor_handle_for_heap_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle { ptr: unsafe { self.raw.GetCPUDescriptorHandleForHeapStart() }.ptr }
    }

    fn gpu_descriptor_handle_for_heap_start(&self) -> GpuDescriptorHandle {
        if !self.desc.flags.contains(DescriptorHeapFlags::SHADER_VISIBLE) {
            return GpuDescriptorHandle::default();
        }
        GpuDescriptorHandle { ptr: unsafe { self.raw.GetGPUDescriptorHandleForHeapStart() }.ptr }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct D3d12Resource {
    raw: Direct3D12::ID3D12Resource,
    desc: ResourceDesc,
}

unsafe impl Send for D3d12Resource {}
unsafe impl Sync for D3d12Resource {}

impl D3d12Resource {
    pub fn raw(&self) -> &Direct3D12::ID3D12Resource {
        &self.raw
    }
}

impl Resource for D3d12Resource {
    fn desc(&self) -> ResourceDesc {
        self.desc
    }

    fn write(&self, offset: u64, data: &[u8]) -> NativeResult<()> {
        let end = offset.checked_add(data.len() as u64).ok_or(HResult::E_INVALIDARG)?;
        if self.desc.dimension != ResourceDimension::Buffer || end > self.desc.width {
            return Err(HResult::E_INVALIDARG);
        }

        // Empty read range: the CPU only writes
        let no_read = Direct3D12::D3D12_RANGE { Begin: 0, End: 0 };
        let mut mapped: *mut c_void = std::ptr::null_mut();
        unsafe { self.raw.Map(0, Some(&no_read), Some(&mut mapped)) }?;
        if mapped.is_null() {
            return Err(HResult::E_FAIL);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), (mapped as *mut u8).add(offset as usize), data.len());
            self.raw.Unmap(0, None);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "d3d12_tests.rs"]
mod tests;
