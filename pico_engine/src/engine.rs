/// PicoGine Engine - long-lived context that owns the renderer and drives the frame loop
///
/// There is no global engine state: the application creates one `Engine`, keeps
/// it for the lifetime of the window and calls `shutdown` (or drops it) at exit.

use crate::config::Config;
use crate::error::{PicoError, PicoResult};
use crate::renderer::{BackendRegistry, Renderer};

/// Main engine context
///
/// # Example
///
/// ```ignore
/// let mut registry = BackendRegistry::new();
/// pico_engine_renderer_dx11::register_headless(&mut registry);
///
/// let mut engine = Engine::new(Config::default(), &registry)?;
/// engine.run(|| window.pump_messages(), |renderer| renderer.render_test_triangle())?;
/// engine.shutdown();
/// ```
pub struct Engine {
    config: Config,
    renderer: Renderer,
}

impl Engine {
    /// Helper to log errors before returning them (internal use)
    fn log_and_return_error(error: PicoError) -> PicoError {
        match &error {
            // Already logged where they were raised
            PicoError::ApiCallFailed { .. } | PicoError::PreconditionViolated { .. } => {}
            _ => {
                crate::engine_error!("pico::Engine", "Engine error: {}", error);
            }
        }
        error
    }

    /// Initialize the engine and its renderer
    ///
    /// # Errors
    ///
    /// Returns an error if the configured backend is not registered or fails to
    /// initialize (no suitable adapter, native call failure).
    pub fn new(config: Config, registry: &BackendRegistry) -> PicoResult<Self> {
        crate::engine_info!(
            "pico::Engine",
            "Starting '{}' ({}x{}, backend {}, vsync {})",
            config.app_name,
            config.width,
            config.height,
            config.backend,
            config.vsync
        );
        let renderer = Renderer::init(&config, registry).map_err(Self::log_and_return_error)?;
        Ok(Self { config, renderer })
    }

    /// Configuration the engine was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Renderer façade
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Renderer façade (mutable)
    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// Run one frame: BeginFrame, record, EndFrame
    ///
    /// If `record` fails the frame is still ended so the ring stays balanced,
    /// and the recording error is returned. An EndFrame failure in that case is
    /// logged, never silently dropped.
    pub fn tick<F>(&mut self, record: F) -> PicoResult<()>
    where
        F: FnOnce(&mut Renderer) -> PicoResult<()>,
    {
        self.renderer.begin_frame().map_err(Self::log_and_return_error)?;

        let recorded = record(&mut self.renderer);
        let ended = self.renderer.end_frame();

        match (recorded, ended) {
            (Err(recording), Err(ending)) => {
                crate::engine_error!(
                    "pico::Engine",
                    "EndFrame after a failed recording also failed: {}",
                    ending
                );
                Err(Self::log_and_return_error(recording))
            }
            (Err(recording), Ok(())) => Err(Self::log_and_return_error(recording)),
            (Ok(()), ended) => ended.map_err(Self::log_and_return_error),
        }
    }

    /// Run frames until `pump` returns false or a frame fails
    ///
    /// `pump` stands for the window message pump; it is called once before each
    /// frame. Returns the number of frames run.
    pub fn run<P, F>(&mut self, mut pump: P, mut record: F) -> PicoResult<u64>
    where
        P: FnMut() -> bool,
        F: FnMut(&mut Renderer) -> PicoResult<()>,
    {
        let mut frames = 0u64;
        while pump() {
            self.tick(&mut record)?;
            frames += 1;
        }
        crate::engine_info!("pico::Engine", "Frame loop exited after {} frames", frames);
        Ok(frames)
    }

    /// Tear down the renderer and its backend
    pub fn shutdown(self) {
        crate::engine_info!("pico::Engine", "Shutting down '{}'", self.config.app_name);
        drop(self);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
