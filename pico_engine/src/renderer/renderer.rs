/// Renderer façade - drives one backend through the BeginFrame/EndFrame protocol

use std::any::Any;

use crate::config::{BackendKind, Config};
use crate::error::PicoResult;
use crate::renderer::{Backend, BackendRegistry};
use crate::{engine_ensure, engine_info, engine_trace, engine_warn};

/// Frame protocol state of an initialized renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Between frames: only `begin_frame` is valid
    Idle,
    /// A frame is open: recording calls and `end_frame` are valid
    Recording,
}

/// Main renderer façade
///
/// Owns exactly one backend, selected from the configuration at `init` time and
/// never swapped afterwards. An uninitialized renderer is simply one that does not
/// exist yet; dropping it destroys the backend.
///
/// # Example
///
/// ```ignore
/// let mut registry = BackendRegistry::new();
/// pico_engine_renderer_dx12::register_headless(&mut registry, GpuTimeline::Immediate);
///
/// let config = Config::default().with_backend(BackendKind::Explicit);
/// let mut renderer = Renderer::init(&config, &registry)?;
/// renderer.begin_frame()?;
/// renderer.render_test_triangle()?;
/// renderer.end_frame()?;
/// ```
pub struct Renderer {
    backend: Box<dyn Backend>,
    state: FrameState,
    frames_submitted: u64,
}

impl Renderer {
    /// Build the backend chosen by `config.backend` and initialize the renderer
    pub fn init(config: &Config, registry: &BackendRegistry) -> PicoResult<Self> {
        let backend = registry.create(config)?;
        engine_info!("pico::Renderer", "Renderer initialized with '{}' backend", backend.kind());
        Ok(Self::from_backend(backend))
    }

    /// Wrap an already constructed backend
    pub fn from_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            state: FrameState::Idle,
            frames_submitted: 0,
        }
    }

    /// Variant of the active backend
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Current frame protocol state
    pub fn frame_state(&self) -> FrameState {
        self.state
    }

    /// Whether a frame is currently open
    pub fn is_recording(&self) -> bool {
        self.state == FrameState::Recording
    }

    /// Number of frames successfully ended
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Open a new frame
    ///
    /// Calling this while a frame is already open is a precondition violation.
    pub fn begin_frame(&mut self) -> PicoResult<()> {
        engine_ensure!(
            "pico::Renderer",
            self.state == FrameState::Idle,
            "begin_frame called while frame {} is still recording",
            self.frames_submitted
        );
        self.backend.begin_frame()?;
        self.state = FrameState::Recording;
        engine_trace!("pico::Renderer", "Frame {} begun", self.frames_submitted);
        Ok(())
    }

    /// Close the current frame and submit it
    ///
    /// Calling this without an open frame is a precondition violation.
    pub fn end_frame(&mut self) -> PicoResult<()> {
        engine_ensure!(
            "pico::Renderer",
            self.state == FrameState::Recording,
            "end_frame called without a matching begin_frame"
        );
        // The frame is abandoned on failure; it is never resubmitted.
        self.state = FrameState::Idle;
        self.backend.end_frame()?;
        self.frames_submitted += 1;
        Ok(())
    }

    /// Record the backend's smoke-test triangle into the open frame
    pub fn render_test_triangle(&mut self) -> PicoResult<()> {
        engine_ensure!(
            "pico::Renderer",
            self.state == FrameState::Recording,
            "render_test_triangle called outside of a frame"
        );
        self.backend.render_test_triangle()
    }

    /// Opaque native device
    pub fn device(&self) -> &dyn Any {
        self.backend.device()
    }

    /// Opaque native immediate context, if the backend has one
    pub fn device_context(&self) -> Option<&dyn Any> {
        self.backend.device_context()
    }

    /// Active backend
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Active backend (mutable)
    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    /// Active backend as its concrete type, if it is a `B`
    pub fn backend_as<B: Backend + 'static>(&self) -> Option<&B> {
        self.backend.as_any().downcast_ref::<B>()
    }

    /// Active backend as its concrete type (mutable), if it is a `B`
    pub fn backend_as_mut<B: Backend + 'static>(&mut self) -> Option<&mut B> {
        self.backend.as_any_mut().downcast_mut::<B>()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.state == FrameState::Recording {
            engine_warn!("pico::Renderer", "Renderer destroyed while a frame was recording; the frame is discarded");
        }
        engine_info!(
            "pico::Renderer",
            "Destroying '{}' renderer after {} frames",
            self.backend.kind(),
            self.frames_submitted
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
