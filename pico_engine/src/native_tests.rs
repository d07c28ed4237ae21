use super::*;
use std::thread;

// ============================================================================
// HResult tests
// ============================================================================

#[test]
fn test_success_and_failure_sign_convention() {
    assert!(HResult::S_OK.is_success());
    assert!(!HResult::S_OK.is_failure());
    assert!(HResult(1).is_success()); // S_FALSE style codes are successes

    assert!(HResult::E_FAIL.is_failure());
    assert!(HResult::DXGI_ERROR_DEVICE_REMOVED.is_failure());
}

#[test]
fn test_ok_conversion() {
    assert_eq!(HResult::S_OK.ok(), Ok(()));
    assert_eq!(HResult::E_OUTOFMEMORY.ok(), Err(HResult::E_OUTOFMEMORY));
}

#[test]
fn test_display_contains_hex_and_name() {
    let text = format!("{}", HResult::DXGI_ERROR_NOT_FOUND);
    assert!(text.contains("0x887A0002"));
    assert!(text.contains("DXGI_ERROR_NOT_FOUND"));
}

#[test]
fn test_unknown_code_display() {
    let code = HResult(0x8123_4567_u32 as i32);
    assert!(code.name().is_none());
    assert!(format!("{}", code).contains("0x81234567"));
    assert_eq!(code.description(), "Unknown error code.");
    assert_eq!(format!("{:?}", code), "HResult(0x81234567)");
}

#[cfg(windows)]
#[test]
fn test_windows_status_codes_map_both_ways() {
    use windows::Win32::Foundation::{E_INVALIDARG, E_OUTOFMEMORY, S_OK};
    use windows::Win32::Graphics::Dxgi::{DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_NOT_FOUND};

    assert_eq!(HResult::from(S_OK), HResult::S_OK);
    assert_eq!(HResult::from(E_INVALIDARG), HResult::E_INVALIDARG);
    assert_eq!(HResult::from(E_OUTOFMEMORY), HResult::E_OUTOFMEMORY);
    assert_eq!(HResult::from(DXGI_ERROR_NOT_FOUND), HResult::DXGI_ERROR_NOT_FOUND);
    assert_eq!(windows::core::HRESULT::from(HResult::DXGI_ERROR_DEVICE_REMOVED), DXGI_ERROR_DEVICE_REMOVED);

    let error = windows::core::Error::from(DXGI_ERROR_NOT_FOUND);
    assert_eq!(HResult::from(error), HResult::DXGI_ERROR_NOT_FOUND);
}

// ============================================================================
// FenceEvent tests
// ============================================================================

#[test]
fn test_event_wait_times_out_when_unsignaled() {
    let event = FenceEvent::new().unwrap();
    assert!(!event.wait(Some(Duration::from_millis(10))));
}

#[test]
fn test_event_wait_consumes_signal() {
    let event = FenceEvent::new().unwrap();
    event.set();
    assert!(event.is_set());
    assert!(event.wait(Some(Duration::from_millis(10))));
    // Auto-reset: a second wait blocks again
    assert!(!event.is_set());
    assert!(!event.wait(Some(Duration::from_millis(10))));
}

#[test]
fn test_event_wakes_waiter_on_other_thread() {
    let event = FenceEvent::new().unwrap();
    let setter = Arc::clone(&event);

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        setter.set();
    });

    assert!(event.wait(None));
    handle.join().unwrap();
}

#[cfg(windows)]
#[test]
fn test_event_is_a_real_win32_event() {
    use windows::Win32::System::Threading::SetEvent;

    let event = FenceEvent::new().unwrap();
    assert!(!event.raw_handle().is_invalid());

    // Signaled from outside, the way a D3D12 fence completes it
    unsafe { SetEvent(event.raw_handle()) }.unwrap();
    assert!(event.is_set());
    assert!(event.wait(Some(Duration::from_millis(10))));
    assert!(!event.is_set());
}
