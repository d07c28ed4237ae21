/*!
# PicoGine Engine - DX12 Renderer Backend

Explicit command-list implementation of the PicoGine `Backend` trait.

Frames are recorded into a ring of command allocators paced by a single fence,
so the CPU never runs more than `FRAME_BUFFER_COUNT` frames ahead of the GPU.
Descriptors come from fixed-capacity heaps whose frees are deferred until the
GPU can no longer reference them.

The graphics API is reached through the traits in [`native`]. On Windows the
`d3d12` module implements them on Direct3D 12 and DXGI. The [`headless`]
module implements them with a software GPU so the backend runs anywhere, and
is what the tests drive.

The backend is registered into a `BackendRegistry` and selected at runtime.
*/

// Native API surface and its headless implementation
pub mod native;
pub mod headless;
#[cfg(windows)]
pub mod d3d12;

// Backend modules
mod adapter;
mod command;
mod descriptor_heap;
mod dx12_renderer;

use std::sync::Arc;

use pico_engine::pico::render::{Backend, BackendRegistry};
use pico_engine::pico::BackendKind;
#[cfg(windows)]
use pico_engine::pico::PicoResult;

pub use adapter::{find_best_adapter, find_max_feature_level, CANDIDATE_FEATURE_LEVELS, MINIMUM_FEATURE_LEVEL};
pub use command::{FrameClock, FrameCommandRing, FRAME_BUFFER_COUNT};
pub use descriptor_heap::{DescriptorHandle, DescriptorHeapAllocator, DescriptorHeapKind};
pub use dx12_renderer::Dx12Renderer;

/// Register the DX12 backend, creating devices through `factory`
///
/// # Example
///
/// ```ignore
/// let mut registry = BackendRegistry::new();
/// pico_engine_renderer_dx12::register(&mut registry, factory);
/// let renderer = Renderer::init(&config.with_backend(BackendKind::Explicit), &registry)?;
/// ```
pub fn register(registry: &mut BackendRegistry, factory: Arc<dyn native::Factory>) {
    registry.register(BackendKind::Explicit, move |config| {
        let renderer = Dx12Renderer::new(config, Arc::clone(&factory))?;
        Ok(Box::new(renderer) as Box<dyn Backend>)
    });
}

/// Register the DX12 backend on a headless GPU
///
/// Returns the factory so callers can inspect the GPU's stats.
pub fn register_headless(registry: &mut BackendRegistry, timeline: headless::GpuTimeline) -> Arc<headless::HeadlessFactory> {
    let factory = Arc::new(headless::HeadlessFactory::new(timeline));
    register(registry, factory.clone());
    factory
}

/// Register the DX12 backend on the system's Direct3D 12 runtime
///
/// # Errors
///
/// Returns an error if the DXGI factory cannot be created.
#[cfg(windows)]
pub fn register_d3d12(registry: &mut BackendRegistry) -> PicoResult<()> {
    let factory = pico_engine::engine_check!("pico::dx12", d3d12::D3d12Factory::new())?;
    register(registry, Arc::new(factory));
    Ok(())
}
