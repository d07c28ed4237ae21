/*!
# PicoGine Engine - DX11 Renderer Backend

Immediate-context implementation of the PicoGine `Backend` trait.

Every call is issued straight to the device context and the swap chain paces
frames at present time, so this backend needs no fences or descriptor heaps.

The graphics API is reached through the traits in [`native`]. On Windows the
`d3d11` module implements them on Direct3D 11. The [`headless`] module
implements them with a software device so the backend runs anywhere.
*/

// Native API surface and its headless implementation
pub mod native;
pub mod headless;
#[cfg(windows)]
pub mod d3d11;

// Backend modules
mod dx11_renderer;

use std::sync::Arc;

use pico_engine::pico::render::{Backend, BackendRegistry};
use pico_engine::pico::BackendKind;
#[cfg(windows)]
use pico_engine::pico::PicoResult;

pub use dx11_renderer::Dx11Renderer;

/// Register the DX11 backend, creating devices through `factory`
pub fn register(registry: &mut BackendRegistry, factory: Arc<dyn native::Factory>) {
    registry.register(BackendKind::Immediate, move |config| {
        let renderer = Dx11Renderer::new(config, Arc::clone(&factory))?;
        Ok(Box::new(renderer) as Box<dyn Backend>)
    });
}

/// Register the DX11 backend on a headless device
///
/// Returns the factory so callers can inspect the device's stats.
pub fn register_headless(registry: &mut BackendRegistry) -> Arc<headless::HeadlessFactory> {
    let factory = Arc::new(headless::HeadlessFactory::new());
    register(registry, factory.clone());
    factory
}

/// Register the DX11 backend on Direct3D 11, presenting into a hidden window
///
/// # Errors
///
/// Returns an error if the output window cannot be created.
#[cfg(windows)]
pub fn register_d3d11(registry: &mut BackendRegistry) -> PicoResult<()> {
    let factory = pico_engine::engine_check!("pico::dx11", d3d11::D3d11Factory::hidden())?;
    register(registry, Arc::new(factory));
    Ok(())
}
