//! Native graphics API status codes and OS-level wait primitives
//!
//! Backends reach their graphics API through traits whose fallible calls return
//! `NativeResult<T>`. The engine never interprets a status beyond success/failure
//! and its translation for reports; the `engine_check!` macro turns failures into
//! `PicoError::ApiCallFailed` with the call site attached.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
#[cfg(not(windows))]
use std::sync::{Condvar, Mutex};
#[cfg(not(windows))]
use std::time::Instant;

/// Result of a native graphics call
pub type NativeResult<T> = std::result::Result<T, HResult>;

/// 32-bit native status code (negative = failure)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: HResult = HResult(0);
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);
    pub const E_OUTOFMEMORY: HResult = HResult(0x8007_000E_u32 as i32);
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);
    pub const DXGI_ERROR_INVALID_CALL: HResult = HResult(0x887A_0001_u32 as i32);
    pub const DXGI_ERROR_NOT_FOUND: HResult = HResult(0x887A_0002_u32 as i32);
    pub const DXGI_ERROR_UNSUPPORTED: HResult = HResult(0x887A_0004_u32 as i32);
    pub const DXGI_ERROR_DEVICE_REMOVED: HResult = HResult(0x887A_0005_u32 as i32);
    pub const DXGI_ERROR_DEVICE_HUNG: HResult = HResult(0x887A_0006_u32 as i32);

    /// Whether the code denotes success
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Whether the code denotes failure
    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Convert to a `NativeResult`, mapping success codes to `Ok(())`
    pub fn ok(self) -> NativeResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Symbolic name of the code, when known
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            HResult::S_OK => "S_OK",
            HResult::E_FAIL => "E_FAIL",
            HResult::E_INVALIDARG => "E_INVALIDARG",
            HResult::E_OUTOFMEMORY => "E_OUTOFMEMORY",
            HResult::E_NOINTERFACE => "E_NOINTERFACE",
            HResult::DXGI_ERROR_INVALID_CALL => "DXGI_ERROR_INVALID_CALL",
            HResult::DXGI_ERROR_NOT_FOUND => "DXGI_ERROR_NOT_FOUND",
            HResult::DXGI_ERROR_UNSUPPORTED => "DXGI_ERROR_UNSUPPORTED",
            HResult::DXGI_ERROR_DEVICE_REMOVED => "DXGI_ERROR_DEVICE_REMOVED",
            HResult::DXGI_ERROR_DEVICE_HUNG => "DXGI_ERROR_DEVICE_HUNG",
            _ => return None,
        })
    }

    /// Description of the code, used in error reports
    pub fn description(self) -> &'static str {
        match self {
            HResult::S_OK => "The operation completed successfully.",
            HResult::E_FAIL => "Unspecified failure.",
            HResult::E_INVALIDARG => "One or more arguments are invalid.",
            HResult::E_OUTOFMEMORY => "Failed to allocate necessary memory.",
            HResult::E_NOINTERFACE => "No such interface supported.",
            HResult::DXGI_ERROR_INVALID_CALL => "The application made a call that is invalid.",
            HResult::DXGI_ERROR_NOT_FOUND => "The object was not found.",
            HResult::DXGI_ERROR_UNSUPPORTED => "The requested functionality is not supported by the device or the driver.",
            HResult::DXGI_ERROR_DEVICE_REMOVED => "The video card has been physically removed from the system, or a driver upgrade has occurred.",
            HResult::DXGI_ERROR_DEVICE_HUNG => "The device failed due to a badly formed command.",
            _ => "Unknown error code.",
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "0x{:08X} ({}: {})", self.0 as u32, name, self.description()),
            None => write!(f, "0x{:08X} ({})", self.0 as u32, self.description()),
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "HResult({})", name),
            None => write!(f, "HResult(0x{:08X})", self.0 as u32),
        }
    }
}

#[cfg(windows)]
impl From<windows::core::HRESULT> for HResult {
    fn from(status: windows::core::HRESULT) -> Self {
        HResult(status.0)
    }
}

#[cfg(windows)]
impl From<HResult> for windows::core::HRESULT {
    fn from(status: HResult) -> Self {
        windows::core::HRESULT(status.0)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for HResult {
    fn from(error: windows::core::Error) -> Self {
        error.code().into()
    }
}

/// Auto-reset event used to block the render thread until the GPU reaches a fence value
///
/// A fence arms the event with `set_event_on_completion`; the waiter blocks in
/// `wait` until the fence sets it. A successful wait consumes the signal.
///
/// On Windows this is a Win32 event object that a D3D12 fence can signal
/// directly through [`FenceEvent::raw_handle`]. Elsewhere it is a mutex and a
/// condition variable.
#[derive(Debug)]
pub struct FenceEvent {
    #[cfg(windows)]
    handle: win32::EventHandle,
    #[cfg(not(windows))]
    signaled: Mutex<bool>,
    #[cfg(not(windows))]
    cond: Condvar,
}

#[cfg(not(windows))]
impl FenceEvent {
    /// Create a new, unsignaled event
    pub fn new() -> NativeResult<Arc<Self>> {
        Ok(Arc::new(Self { signaled: Mutex::new(false), cond: Condvar::new() }))
    }

    /// Signal the event, waking one waiter
    pub fn set(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = true;
        self.cond.notify_all();
    }

    /// Whether the event is currently signaled
    pub fn is_set(&self) -> bool {
        *self.signaled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the event is signaled or the timeout expires
    ///
    /// `None` waits indefinitely. Returns `false` if the timeout expired.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        while !*signaled {
            match deadline {
                None => {
                    signaled = self.cond.wait(signaled).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(signaled, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    signaled = guard;
                }
            }
        }
        *signaled = false;
        true
    }
}

#[cfg(windows)]
impl FenceEvent {
    /// Create a new, unsignaled event
    pub fn new() -> NativeResult<Arc<Self>> {
        Ok(Arc::new(Self { handle: win32::EventHandle::create()? }))
    }

    /// Win32 event handle, for `ID3D12Fence::SetEventOnCompletion`
    pub fn raw_handle(&self) -> windows::Win32::Foundation::HANDLE {
        self.handle.0
    }

    /// Signal the event, waking one waiter
    pub fn set(&self) {
        if let Err(status) = self.handle.set() {
            crate::engine_warn!("pico::native", "SetEvent failed: {}", status);
        }
    }

    /// Whether the event is currently signaled
    pub fn is_set(&self) -> bool {
        // Polling consumes the auto-reset signal, so it is put back
        if self.handle.wait(0) {
            self.set();
            true
        } else {
            false
        }
    }

    /// Block until the event is signaled or the timeout expires
    ///
    /// `None` waits indefinitely. Returns `false` if the timeout expired.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        use windows::Win32::System::Threading::INFINITE;

        let millis = match timeout {
            None => INFINITE,
            Some(timeout) => u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1).min(INFINITE - 1),
        };
        self.handle.wait(millis)
    }
}

#[cfg(windows)]
mod win32 {
    use windows::core::PCSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows::Win32::System::Threading::{CreateEventA, SetEvent, WaitForSingleObject};

    use super::{HResult, NativeResult};

    /// Owned Win32 auto-reset event
    #[derive(Debug)]
    pub(super) struct EventHandle(pub(super) HANDLE);

    // Event objects may be set and waited on from any thread
    unsafe impl Send for EventHandle {}
    unsafe impl Sync for EventHandle {}

    impl EventHandle {
        pub(super) fn create() -> NativeResult<Self> {
            let handle = unsafe { CreateEventA(None, false, false, PCSTR::null()) }.map_err(HResult::from)?;
            Ok(Self(handle))
        }

        pub(super) fn set(&self) -> NativeResult<()> {
            unsafe { SetEvent(self.0) }.map_err(HResult::from)
        }

        /// Wait up to `millis`; true when the event was signaled
        pub(super) fn wait(&self, millis: u32) -> bool {
            unsafe { WaitForSingleObject(self.0, millis) == WAIT_OBJECT_0 }
        }
    }

    impl Drop for EventHandle {
        fn drop(&mut self) {
            if !self.0.is_invalid() {
                let _ = unsafe { CloseHandle(self.0) };
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "native_tests.rs"]
mod tests;
