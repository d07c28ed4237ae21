/// Backend trait and registry - the single dispatch point between the façade and a graphics API

use std::any::Any;

use rustc_hash::FxHashMap;

use crate::config::{BackendKind, Config};
use crate::error::{PicoError, PicoResult};

/// Graphics backend contract
///
/// Every backend variant (immediate-context or explicit command-list style)
/// implements this trait. The `Renderer` façade only talks to backends through it
/// and guarantees that `begin_frame` and `end_frame` strictly alternate.
pub trait Backend: Send {
    /// Variant implemented by this backend
    fn kind(&self) -> BackendKind;

    /// Prepare a new frame for recording
    ///
    /// May block until the GPU has released the resources the frame will reuse.
    fn begin_frame(&mut self) -> PicoResult<()>;

    /// Finish the current frame and hand it to the GPU / presentation engine
    fn end_frame(&mut self) -> PicoResult<()>;

    /// Opaque native device, downcast by collaborators that know the backend
    fn device(&self) -> &dyn Any;

    /// Opaque native immediate context (`None` for backends without one)
    fn device_context(&self) -> Option<&dyn Any>;

    /// Record a single colored triangle (backend smoke test)
    fn render_test_triangle(&mut self) -> PicoResult<()>;

    /// Concrete backend access for collaborators that need backend-specific entry points
    fn as_any(&self) -> &dyn Any;

    /// Mutable concrete backend access
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Factory building a backend from the configuration
pub type BackendFactory = Box<dyn Fn(&Config) -> PicoResult<Box<dyn Backend>> + Send + Sync>;

/// Registry of available backends
///
/// Backend crates register a factory for the variant they implement; the
/// renderer picks one according to `Config::backend` at initialization.
#[derive(Default)]
pub struct BackendRegistry {
    factories: FxHashMap<BackendKind, BackendFactory>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for a backend variant
    pub fn register<F>(&mut self, kind: BackendKind, factory: F)
    where
        F: Fn(&Config) -> PicoResult<Box<dyn Backend>> + Send + Sync + 'static,
    {
        if self.factories.insert(kind, Box::new(factory)).is_some() {
            crate::engine_warn!("pico::BackendRegistry", "Backend '{}' registered twice, keeping the last one", kind);
        } else {
            crate::engine_debug!("pico::BackendRegistry", "Backend '{}' registered", kind);
        }
    }

    /// Whether a factory exists for this variant
    pub fn is_registered(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered variants
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.factories.keys().copied().collect()
    }

    /// Build the backend selected by `config.backend`
    pub fn create(&self, config: &Config) -> PicoResult<Box<dyn Backend>> {
        let factory = self.factories.get(&config.backend).ok_or_else(|| {
            crate::engine_error!("pico::BackendRegistry", "Backend '{}' is not registered", config.backend);
            PicoError::InitializationFailed(format!("Backend '{}' is not registered", config.backend))
        })?;

        let backend = factory(config)?;
        if backend.kind() != config.backend {
            return Err(PicoError::InitializationFailed(format!(
                "Factory for '{}' produced a '{}' backend",
                config.backend,
                backend.kind()
            )));
        }
        Ok(backend)
    }
}
