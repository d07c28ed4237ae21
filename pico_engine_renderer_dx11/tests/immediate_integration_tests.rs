//! Integration tests: the DX11 backend driven through the Engine and Renderer façade
//!
//! Run with: cargo test --test immediate_integration_tests

use std::sync::Arc;

use pico_engine::native::HResult;
use pico_engine::pico::render::FrameState;
use pico_engine::pico::{BackendKind, BackendRegistry, Config, Engine, PicoError, Renderer};
use pico_engine_renderer_dx11::headless::{HeadlessCall, HeadlessDeviceContext};
use pico_engine_renderer_dx11::native::{Device, DeviceContext};
use pico_engine_renderer_dx11::Dx11Renderer;

fn immediate_config() -> Config {
    Config { enable_validation: false, ..Config::default() }.with_backend(BackendKind::Immediate)
}

#[test]
fn test_engine_loop_presents_every_frame() {
    let mut registry = BackendRegistry::new();
    let factory = pico_engine_renderer_dx11::register_headless(&mut registry);
    let mut engine = Engine::new(immediate_config(), &registry).unwrap();

    let mut remaining = 10;
    let frames = engine
        .run(
            || {
                remaining -= 1;
                remaining >= 0
            },
            Renderer::render_test_triangle,
        )
        .unwrap();
    assert_eq!(frames, 10);
    engine.shutdown();

    let stats = factory.stats();
    assert_eq!(stats.clears, 10);
    assert_eq!(stats.draws, 10);
    assert_eq!(stats.indices_drawn, 30);
    assert_eq!(stats.presents_with_interval(1), 10);
    assert_eq!(stats.state_violations, 0);
    assert_eq!(stats.buffers_created, 3);
    // Triangle buffers are released with the backend
    assert_eq!(factory.live_buffers(), 0);
}

#[test]
fn test_device_and_context_through_facade() {
    let mut registry = BackendRegistry::new();
    pico_engine_renderer_dx11::register_headless(&mut registry);
    let renderer = Renderer::init(&immediate_config(), &registry).unwrap();

    assert_eq!(renderer.backend_kind(), BackendKind::Immediate);
    assert!(renderer.device().downcast_ref::<Arc<dyn Device>>().is_some());

    let context = renderer
        .device_context()
        .and_then(|context| context.downcast_ref::<Box<dyn DeviceContext>>())
        .unwrap();
    assert!(context.as_any().downcast_ref::<HeadlessDeviceContext>().is_some());

    let backend = renderer.backend_as::<Dx11Renderer>().unwrap();
    assert_eq!(backend.swap_chain().desc().width, 1280);
}

#[test]
fn test_device_removed_on_present() {
    let mut registry = BackendRegistry::new();
    let factory = pico_engine_renderer_dx11::register_headless(&mut registry);
    let mut engine = Engine::new(immediate_config(), &registry).unwrap();

    factory.fail_next(HeadlessCall::Present, HResult::DXGI_ERROR_DEVICE_REMOVED);
    let err = engine.tick(Renderer::render_test_triangle).unwrap_err();
    assert!(matches!(err, PicoError::ApiCallFailed { .. }));
    assert_eq!(err.status(), Some(HResult::DXGI_ERROR_DEVICE_REMOVED));
    assert_eq!(engine.renderer().frame_state(), FrameState::Idle);
    assert_eq!(engine.renderer().frames_submitted(), 0);

    engine.tick(Renderer::render_test_triangle).unwrap();
    assert_eq!(engine.renderer().frames_submitted(), 1);
}

#[test]
fn test_backends_side_by_side_in_one_registry() {
    let mut registry = BackendRegistry::new();
    pico_engine_renderer_dx11::register_headless(&mut registry);

    let err = Renderer::init(&immediate_config().with_backend(BackendKind::Explicit), &registry).err().unwrap();
    assert!(matches!(err, PicoError::InitializationFailed(_)));

    let renderer = Renderer::init(&immediate_config(), &registry).unwrap();
    assert_eq!(renderer.frame_state(), FrameState::Idle);
}
