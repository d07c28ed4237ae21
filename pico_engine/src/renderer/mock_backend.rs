/// Mock backend for unit tests (no GPU required)
///
/// Records every call into a shared log so tests can inspect the order in which
/// the façade drives the backend, and can be told to fail a given call.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::config::BackendKind;
use crate::error::{PicoError, PicoResult};
use crate::native::HResult;
use crate::pico::Origin;
use crate::renderer::Backend;

/// Marker device handed out by `MockBackend::device`
#[derive(Debug)]
pub struct MockDevice {
    pub name: &'static str,
}

/// Marker context handed out by `MockBackend::device_context`
#[derive(Debug)]
pub struct MockDeviceContext;

#[derive(Debug)]
pub struct MockBackend {
    pub kind: BackendKind,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_on: Option<&'static str>,
    device: MockDevice,
    context: Option<MockDeviceContext>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
            device: MockDevice { name: "mock_device" },
            context: match kind {
                BackendKind::Immediate => Some(MockDeviceContext),
                BackendKind::Explicit => None,
            },
        }
    }

    /// Fail the named call ("begin_frame", "end_frame", "render_test_triangle")
    pub fn failing_on(mut self, call: &'static str) -> Self {
        self.fail_on = Some(call);
        self
    }

    /// Shared handle to the call log
    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: &'static str) -> PicoResult<()> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.fail_on == Some(call) {
            return Err(PicoError::ApiCallFailed {
                call,
                status: HResult::DXGI_ERROR_DEVICE_REMOVED,
                origin: Origin::new(file!(), line!()),
            });
        }
        Ok(())
    }
}

impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn begin_frame(&mut self) -> PicoResult<()> {
        self.record("begin_frame")
    }

    fn end_frame(&mut self) -> PicoResult<()> {
        self.record("end_frame")
    }

    fn device(&self) -> &dyn Any {
        &self.device
    }

    fn device_context(&self) -> Option<&dyn Any> {
        self.context.as_ref().map(|c| c as &dyn Any)
    }

    fn render_test_triangle(&mut self) -> PicoResult<()> {
        self.record("render_test_triangle")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
