//! Integration tests for the Engine / Renderer public API
//!
//! A small backend is implemented here, outside the crate, the same way a
//! backend plugin crate would. No GPU required.
//!
//! Run with: cargo test --test engine_integration_tests

use std::any::Any;
use std::sync::{Arc, Mutex};

use pico_engine::pico::log::{LogEntry, LogSeverity, Logger};
use pico_engine::pico::{Backend, BackendKind, BackendRegistry, Config, Engine, PicoError, Renderer, PicoResult};
use serial_test::serial;

// ============================================================================
// TEST BACKEND
// ============================================================================

/// Device handle exposed by the test backend
struct CountingDevice {
    width: u32,
}

/// Backend that only counts what it is asked to do
struct CountingBackend {
    kind: BackendKind,
    device: CountingDevice,
    begun: u32,
    ended: u32,
    triangles: u32,
}

impl Backend for CountingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn begin_frame(&mut self) -> PicoResult<()> {
        self.begun += 1;
        Ok(())
    }

    fn end_frame(&mut self) -> PicoResult<()> {
        self.ended += 1;
        Ok(())
    }

    fn device(&self) -> &dyn Any {
        &self.device
    }

    fn device_context(&self) -> Option<&dyn Any> {
        None
    }

    fn render_test_triangle(&mut self) -> PicoResult<()> {
        self.triangles += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn counting_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for kind in [BackendKind::Immediate, BackendKind::Explicit] {
        registry.register(kind, move |config: &Config| {
            Ok(Box::new(CountingBackend {
                kind,
                device: CountingDevice { width: config.width },
                begun: 0,
                ended: 0,
                triangles: 0,
            }) as Box<dyn Backend>)
        });
    }
    registry
}

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

// ============================================================================
// ENGINE LIFECYCLE TESTS
// ============================================================================

#[test]
fn test_integration_engine_runs_selected_backend() {
    let registry = counting_registry();
    let config = Config { width: 640, ..Config::default().with_backend(BackendKind::Explicit) };
    let mut engine = Engine::new(config, &registry).unwrap();

    assert_eq!(engine.renderer().backend_kind(), BackendKind::Explicit);
    assert_eq!(engine.renderer().device().downcast_ref::<CountingDevice>().unwrap().width, 640);

    let mut budget = 10;
    let frames = engine
        .run(
            || {
                budget -= 1;
                budget >= 0
            },
            Renderer::render_test_triangle,
        )
        .unwrap();
    assert_eq!(frames, 10);

    let backend = engine.renderer().backend_as::<CountingBackend>().unwrap();
    assert_eq!((backend.begun, backend.ended, backend.triangles), (10, 10, 10));

    engine.shutdown();
}

#[test]
fn test_integration_renderer_protocol_errors_do_not_reach_backend() {
    let registry = counting_registry();
    let mut renderer = Renderer::init(&Config::default(), &registry).unwrap();

    assert!(renderer.end_frame().unwrap_err().is_precondition_violation());
    renderer.begin_frame().unwrap();
    assert!(renderer.begin_frame().unwrap_err().is_precondition_violation());
    renderer.end_frame().unwrap();

    let backend = renderer.backend_as::<CountingBackend>().unwrap();
    assert_eq!((backend.begun, backend.ended), (1, 1));
}

// ============================================================================
// ERROR REPORTING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_precondition_violation_is_logged_with_location() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    pico_engine::log::set_logger(TestLogger { entries: Arc::clone(&entries) });

    let registry = counting_registry();
    let mut renderer = Renderer::init(&Config::default(), &registry).unwrap();
    let err = renderer.end_frame().unwrap_err();

    pico_engine::log::reset_logger();

    let origin = err.origin().expect("precondition violations carry their origin");
    assert!(origin.file.ends_with("renderer.rs"));
    assert_eq!(err.kind_name(), "Precondition Violation");

    let entries = entries.lock().unwrap();
    let logged = entries
        .iter()
        .find(|e| e.severity == LogSeverity::Error && e.source == "pico::Renderer")
        .expect("the violation is logged");
    assert_eq!(logged.file, Some(origin.file));
    assert!(logged.message.contains("end_frame"));
}

#[test]
#[serial]
fn test_integration_unregistered_backend_is_reported() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    pico_engine::log::set_logger(TestLogger { entries: Arc::clone(&entries) });

    let result = Engine::new(Config::default(), &BackendRegistry::new());

    pico_engine::log::reset_logger();

    assert!(matches!(result, Err(PicoError::InitializationFailed(_))));
    assert!(entries
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.severity == LogSeverity::Error && e.message.contains("dx11")));
}
