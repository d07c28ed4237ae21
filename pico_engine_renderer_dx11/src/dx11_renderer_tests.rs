/// Unit tests for Dx11Renderer, run on the headless device

use super::*;
use crate::headless::{HeadlessBuffer, HeadlessCall, HeadlessDeviceContext, HeadlessFactory, HeadlessRenderTargetView};
use glam::Vec4;
use pico_engine::native::HResult;
use pico_engine::pico::PicoError;

fn renderer(config: &Config) -> (Arc<HeadlessFactory>, Dx11Renderer) {
    let factory = Arc::new(HeadlessFactory::new());
    let renderer = Dx11Renderer::new(config, factory.clone()).unwrap();
    (factory, renderer)
}

fn context(renderer: &Dx11Renderer) -> &HeadlessDeviceContext {
    renderer
        .device_context()
        .and_then(|context| context.downcast_ref::<Box<dyn DeviceContext>>())
        .and_then(|context| context.as_any().downcast_ref::<HeadlessDeviceContext>())
        .unwrap()
}

#[test]
fn test_new_binds_back_buffer_and_viewport() {
    let config = Config { width: 800, height: 600, ..Config::default() };
    let (_factory, renderer) = renderer(&config);

    let state = context(&renderer).bound_state();
    assert_eq!(state.render_targets, 1);
    let viewport = state.viewport.unwrap();
    assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
    assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));

    let desc = renderer.swap_chain().desc();
    assert_eq!(desc.format, Format::B8G8R8A8Unorm);
    assert_eq!(desc.buffer_count, 1);
    assert!(desc.windowed);
    assert_eq!(desc.swap_effect, SwapEffect::Discard);

    let view = renderer.render_target_view().as_any().downcast_ref::<HeadlessRenderTargetView>().unwrap();
    assert_eq!((view.texture_desc().width, view.texture_desc().height), (800, 600));
}

#[test]
fn test_validation_requests_debug_device() {
    let config = Config { enable_validation: true, ..Config::default() };
    let (_factory, renderer) = renderer(&config);

    let device = renderer.device().downcast_ref::<Arc<dyn Device>>().unwrap();
    assert!(device.creation_flags().contains(CreateDeviceFlags::DEBUG));
}

#[test]
fn test_begin_frame_clears_with_configured_color() {
    let config = Config { clear_color: Vec4::new(0.1, 0.2, 0.3, 1.0), ..Config::default() };
    let (factory, mut renderer) = renderer(&config);

    renderer.begin_frame().unwrap();

    assert_eq!(factory.stats().clears, 1);
    assert_eq!(context(&renderer).bound_state().last_clear_color, Some([0.1, 0.2, 0.3, 1.0]));
}

#[test]
fn test_end_frame_presents_with_vsync_interval() {
    let (factory, mut vsync) = renderer(&Config { vsync: true, ..Config::default() });
    vsync.begin_frame().unwrap();
    vsync.end_frame().unwrap();
    assert_eq!(factory.stats().presents_with_interval(1), 1);

    let (factory, mut immediate) = renderer(&Config { vsync: false, ..Config::default() });
    immediate.begin_frame().unwrap();
    immediate.end_frame().unwrap();
    assert_eq!(factory.stats().presents_with_interval(0), 1);
    assert_eq!(factory.stats().presents_with_interval(1), 0);
}

#[test]
fn test_triangle_buffers_created_once_and_drawn() {
    let (factory, mut renderer) = renderer(&Config::default());
    assert!(!renderer.has_triangle_resources());

    for _ in 0..3 {
        renderer.begin_frame().unwrap();
        renderer.render_test_triangle().unwrap();
        renderer.end_frame().unwrap();
    }

    let stats = factory.stats();
    assert_eq!(stats.buffers_created, 3);
    assert_eq!(factory.live_buffers(), 3);
    assert_eq!(stats.draws, 3);
    assert_eq!(stats.indices_drawn, 9);
    assert_eq!(stats.state_violations, 0);

    let state = context(&renderer).bound_state();
    assert_eq!(state.topology, Some(PrimitiveTopology::TriangleList));
    assert_eq!(state.vertex_stride, 8);
    assert!(matches!(state.index_buffer, Some((_, Format::R16Uint))));
    assert!(state.ps_constant_buffer.is_some());
}

#[test]
fn test_triangle_buffer_contents() {
    let (_factory, mut renderer) = renderer(&Config::default());
    renderer.render_test_triangle().unwrap();

    let triangle = renderer.triangle.as_ref().unwrap();
    let contents = |buffer: &Arc<dyn Buffer>| buffer.as_any().downcast_ref::<HeadlessBuffer>().unwrap().contents();

    let positions = TEST_TRIANGLE_VERTICES;
    assert_eq!(contents(&triangle.vertex_buffer), bytemuck::cast_slice::<_, u8>(positions.as_slice()));
    assert_eq!(contents(&triangle.index_buffer), vec![0, 0, 1, 0, 2, 0]);
    let red = TEST_TRIANGLE_COLOR;
    assert_eq!(contents(&triangle.color_buffer), bytemuck::bytes_of(&red));
    assert_eq!(triangle.color_buffer.desc().usage, Usage::Dynamic);
}

#[test]
fn test_failed_buffer_creation_is_retried_next_call() {
    let (factory, mut renderer) = renderer(&Config::default());

    factory.fail_next(HeadlessCall::CreateBuffer, HResult::E_OUTOFMEMORY);
    let err = renderer.render_test_triangle().unwrap_err();
    assert_eq!(err.status(), Some(HResult::E_OUTOFMEMORY));
    assert!(!renderer.has_triangle_resources());

    renderer.render_test_triangle().unwrap();
    assert!(renderer.has_triangle_resources());
    assert_eq!(factory.stats().draws, 1);
}

#[test]
fn test_present_failure_is_api_error() {
    let (factory, mut renderer) = renderer(&Config::default());
    factory.fail_next(HeadlessCall::Present, HResult::DXGI_ERROR_DEVICE_REMOVED);

    renderer.begin_frame().unwrap();
    match renderer.end_frame().unwrap_err() {
        PicoError::ApiCallFailed { call, status, .. } => {
            assert!(call.contains("present"));
            assert_eq!(status, HResult::DXGI_ERROR_DEVICE_REMOVED);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_device_creation_failure() {
    let factory = Arc::new(HeadlessFactory::new());
    factory.fail_next(HeadlessCall::CreateDeviceAndSwapChain, HResult::DXGI_ERROR_UNSUPPORTED);

    let err = Dx11Renderer::new(&Config::default(), factory).err().unwrap();
    assert_eq!(err.kind_name(), "Graphics API Exception");
    assert!(err.origin().is_some());
}
