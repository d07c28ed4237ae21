//! Unit tests for error.rs
//!
//! Tests all PicoError variants, the report helpers and the error macros.

use crate::error::{PicoError, Origin, PicoResult};
use crate::native::HResult;

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_api_call_failed_display() {
    let err = PicoError::ApiCallFailed {
        call: "device.create_fence(0)",
        status: HResult::E_OUTOFMEMORY,
        origin: Origin::new("renderer.rs", 42),
    };
    let display = format!("{}", err);
    assert!(display.contains("device.create_fence(0)"));
    assert!(display.contains("E_OUTOFMEMORY"));
}

#[test]
fn test_precondition_display() {
    let err = PicoError::PreconditionViolated {
        message: "descriptor heap exhausted".to_string(),
        origin: Origin::new("descriptor_heap.rs", 7),
    };
    let display = format!("{}", err);
    assert!(display.contains("Precondition violated"));
    assert!(display.contains("descriptor heap exhausted"));
}

#[test]
fn test_simple_variants_display() {
    assert!(format!("{}", PicoError::NoSuitableAdapter("none".to_string())).contains("No suitable adapter"));
    assert!(format!("{}", PicoError::DeviceLost("hung".to_string())).contains("Device lost"));
    assert!(format!("{}", PicoError::InitializationFailed("x".to_string())).contains("Initialization failed"));
    assert!(format!("{}", PicoError::BackendError("y".to_string())).contains("Backend error"));
}

// ============================================================================
// REPORT HELPERS
// ============================================================================

#[test]
fn test_kind_names_are_distinct() {
    let errors = [
        PicoError::ApiCallFailed { call: "c", status: HResult::E_FAIL, origin: Origin::new("f", 1) },
        PicoError::PreconditionViolated { message: "m".to_string(), origin: Origin::new("f", 1) },
        PicoError::NoSuitableAdapter("a".to_string()),
        PicoError::DeviceLost("d".to_string()),
        PicoError::InitializationFailed("i".to_string()),
        PicoError::BackendError("b".to_string()),
    ];
    let mut names: Vec<&str> = errors.iter().map(|e| e.kind_name()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), errors.len());
}

#[test]
fn test_origin_only_for_located_errors() {
    let api = PicoError::ApiCallFailed { call: "c", status: HResult::E_FAIL, origin: Origin::new("a.rs", 3) };
    assert_eq!(api.origin(), Some(Origin::new("a.rs", 3)));
    assert_eq!(api.status(), Some(HResult::E_FAIL));

    let adapter = PicoError::NoSuitableAdapter("none".to_string());
    assert!(adapter.origin().is_none());
    assert!(adapter.status().is_none());
}

#[test]
fn test_origin_display() {
    let origin = Origin::new("command.rs", 120);
    let text = format!("{}", origin);
    assert!(text.contains("[File] command.rs"));
    assert!(text.contains("[Line] 120"));
}

#[test]
fn test_error_is_std_error() {
    let err = PicoError::DeviceLost("test".to_string());
    let _: &dyn std::error::Error = &err;
}

// ============================================================================
// MACRO TESTS
// ============================================================================

#[test]
fn test_engine_check_maps_failure() {
    fn failing_call() -> crate::native::NativeResult<u32> {
        Err(HResult::DXGI_ERROR_DEVICE_REMOVED)
    }

    let result: PicoResult<u32> = crate::engine_check!("pico::test", failing_call());
    match result {
        Err(PicoError::ApiCallFailed { call, status, origin }) => {
            assert_eq!(call, "failing_call()");
            assert_eq!(status, HResult::DXGI_ERROR_DEVICE_REMOVED);
            assert!(origin.file.ends_with("error_tests.rs"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_engine_check_passes_success_through() {
    let result: PicoResult<u32> = crate::engine_check!("pico::test", Ok::<u32, HResult>(7));
    assert_eq!(result.unwrap(), 7);
}

#[test]
fn test_engine_ensure_returns_precondition() {
    fn guarded(value: u32) -> PicoResult<u32> {
        crate::engine_ensure!("pico::test", value < 4, "value {} out of range", value);
        Ok(value)
    }

    assert_eq!(guarded(3).unwrap(), 3);
    let err = guarded(9).unwrap_err();
    assert!(err.is_precondition_violation());
    assert!(format!("{}", err).contains("value 9 out of range"));
}

#[test]
fn test_engine_bail_returns_backend_error() {
    fn bails() -> PicoResult<()> {
        crate::engine_bail!("pico::test", "lock {} poisoned", "heap");
    }

    match bails() {
        Err(PicoError::BackendError(msg)) => assert_eq!(msg, "lock heap poisoned"),
        other => panic!("unexpected result: {:?}", other),
    }
}
