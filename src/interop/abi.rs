//! Flat buffer contract at the native boundary.
//!
//! The native core consumes a [`RequestBuffer`] (command name + opaque input,
//! both length-prefixed byte sequences) and fills a [`ResponseBuffer`] with
//! either a data payload or an error string. Response buffers are allocated by
//! the core and handed back for release via the boundary's `free_response`;
//! request buffers are owned on this side for exactly the duration of one call
//! (see [`MarshaledRequest`]).

use crate::error::{LocalError, Result};
use crate::interop::CommandResponse;
use std::ffi::c_void;

/// Request buffer layout shared with the native core.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RequestBuffer {
    /// UTF-8 command name, not null-terminated.
    pub command: *const u8,
    pub command_len: i32,
    /// UTF-8 JSON input payload. Empty (len 0) for commands without input.
    pub data: *const u8,
    pub data_len: i32,
}

/// Response buffer layout shared with the native core.
///
/// The core populates either `data` or `error`, not both. The decoder does not
/// rely on that invariant: it prefers `data` when present, falls back to
/// `error`, and treats neither as an empty success.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ResponseBuffer {
    pub data: *const u8,
    pub data_len: i32,
    pub error: *const u8,
    pub error_len: i32,
}

impl ResponseBuffer {
    /// An empty response for the core to fill.
    pub fn zeroed() -> Self {
        Self {
            data: std::ptr::null(),
            data_len: 0,
            error: std::ptr::null(),
            error_len: 0,
        }
    }
}

/// Callback signature the native core invokes zero or more times during a
/// streaming command, before the command function itself returns.
pub type NativeCallbackFn =
    unsafe extern "C" fn(data: *const u8, length: i32, user_data: *mut c_void);

/// Owns the byte buffers referenced by a [`RequestBuffer`] for the duration of
/// one native call.
///
/// Dropping the guard releases the buffers; the native core must not retain
/// the pointers past the call's return.
pub struct MarshaledRequest {
    command: Vec<u8>,
    input: Vec<u8>,
}

impl MarshaledRequest {
    /// Marshal a command name and optional JSON input. A command with no input
    /// marshals to an empty (not null-length-mismatched) payload.
    pub fn new(command: &str, input: Option<&str>) -> Result<Self> {
        if command.is_empty() {
            return Err(LocalError::Marshaling(
                "command name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            command: command.as_bytes().to_vec(),
            input: input.map(|s| s.as_bytes().to_vec()).unwrap_or_default(),
        })
    }

    /// The flat buffer view handed across the boundary. Valid only while
    /// `self` is alive.
    pub fn buffer(&self) -> RequestBuffer {
        RequestBuffer {
            command: self.command.as_ptr(),
            command_len: self.command.len() as i32,
            data: self.input.as_ptr(),
            data_len: self.input.len() as i32,
        }
    }
}

/// Copy a length-prefixed native byte range into an owned `String`.
///
/// A null pointer or non-positive length decodes to `None`.
fn copy_utf8(ptr: *const u8, len: i32, what: &str) -> Result<Option<String>> {
    if ptr.is_null() || len <= 0 {
        return Ok(None);
    }
    // SAFETY: the core guarantees `ptr` points to `len` readable bytes until
    // free_response is called for this response.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
    let text = std::str::from_utf8(bytes)
        .map_err(|e| LocalError::Marshaling(format!("{what} is not valid UTF-8: {e}")))?;
    Ok(Some(text.to_string()))
}

impl CommandResponse {
    /// Decode a native response buffer by copy.
    ///
    /// Does not assume the data/error exclusivity invariant holds: when both
    /// ranges are populated, data wins; when neither is, the result is an
    /// empty success.
    pub fn decode(response: &ResponseBuffer) -> Result<Self> {
        let data = copy_utf8(response.data, response.data_len, "response data")?;
        let error = copy_utf8(response.error, response.error_len, "response error")?;
        Ok(match (data, error) {
            (Some(data), _) => Self {
                data: Some(data),
                error: None,
            },
            (None, Some(error)) => Self {
                data: None,
                error: Some(error),
            },
            (None, None) => Self {
                data: None,
                error: None,
            },
        })
    }
}
