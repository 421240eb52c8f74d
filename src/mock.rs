//! Scripted native boundary for unit tests.

use crate::interop::NativeCore;
use crate::interop::abi::{NativeCallbackFn, RequestBuffer, ResponseBuffer};
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted outcome for one command.
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed with a data payload.
    Data(String),
    /// Fail with a native error string.
    Error(String),
    /// Contract violation: both buffers populated. The decoder must prefer
    /// data.
    Both { data: String, error: String },
    /// Succeed with neither buffer populated (empty success).
    Neither,
    /// Streaming: deliver these chunks through the callback, then finish with
    /// the given outcome.
    Chunks {
        chunks: Vec<String>,
        outcome: Box<Script>,
    },
}

/// In-process [`NativeCore`] driven by per-command scripts.
///
/// Tracks every buffer it allocates into a response and every release via
/// `free_response`, so tests can assert alloc/free symmetry. Commands without
/// a script succeed with an empty response.
pub struct ScriptedCore {
    scripts: Mutex<HashMap<String, Script>>,
    commands: Mutex<Vec<String>>,
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl ScriptedCore {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    pub fn script(self, command: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), script);
        self
    }

    pub fn with_data(self, command: &str, data: &str) -> Self {
        self.script(command, Script::Data(data.to_string()))
    }

    pub fn with_error(self, command: &str, error: &str) -> Self {
        self.script(command, Script::Error(error.to_string()))
    }

    pub fn with_chunks(self, command: &str, chunks: &[&str], outcome: Script) -> Self {
        self.script(
            command,
            Script::Chunks {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                outcome: Box::new(outcome),
            },
        )
    }

    /// Commands executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    fn alloc_into(&self, text: &str) -> (*const u8, i32) {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        let boxed: Box<[u8]> = text.as_bytes().into();
        let len = boxed.len() as i32;
        (Box::into_raw(boxed) as *const u8, len)
    }

    unsafe fn fill(&self, response: *mut ResponseBuffer, data: Option<&str>, error: Option<&str>) {
        let response = unsafe { &mut *response };
        if let Some(data) = data {
            (response.data, response.data_len) = self.alloc_into(data);
        }
        if let Some(error) = error {
            (response.error, response.error_len) = self.alloc_into(error);
        }
    }

    unsafe fn apply(&self, script: &Script, response: *mut ResponseBuffer) {
        match script {
            Script::Data(data) => unsafe { self.fill(response, Some(data), None) },
            Script::Error(error) => unsafe { self.fill(response, None, Some(error)) },
            Script::Both { data, error } => unsafe {
                self.fill(response, Some(data), Some(error))
            },
            Script::Neither => {}
            Script::Chunks { outcome, .. } => unsafe { self.apply(outcome, response) },
        }
    }

    fn record(&self, request: *const RequestBuffer) -> Option<Script> {
        // SAFETY: callers uphold the boundary contract; the request buffers
        // are valid for the duration of the call.
        let request = unsafe { &*request };
        let command = unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(
                request.command,
                request.command_len as usize,
            ))
        }
        .to_string();
        self.commands.lock().unwrap().push(command.clone());
        self.scripts.lock().unwrap().get(&command).cloned()
    }
}

impl Default for ScriptedCore {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCore for ScriptedCore {
    unsafe fn execute(&self, request: *const RequestBuffer, response: *mut ResponseBuffer) {
        if let Some(script) = self.record(request) {
            unsafe { self.apply(&script, response) };
        }
    }

    unsafe fn execute_with_callback(
        &self,
        request: *const RequestBuffer,
        response: *mut ResponseBuffer,
        callback: NativeCallbackFn,
        user_data: *mut c_void,
    ) {
        match self.record(request) {
            Some(Script::Chunks { chunks, outcome }) => {
                for chunk in &chunks {
                    unsafe { callback(chunk.as_ptr(), chunk.len() as i32, user_data) };
                }
                unsafe { self.apply(&outcome, response) };
            }
            Some(script) => unsafe { self.apply(&script, response) },
            None => {}
        }
    }

    unsafe fn free_response(&self, response: *mut ResponseBuffer) {
        let response = unsafe { &mut *response };
        for (ptr, len) in [
            (&mut response.data, &mut response.data_len),
            (&mut response.error, &mut response.error_len),
        ] {
            if !ptr.is_null() {
                let raw = std::ptr::slice_from_raw_parts_mut(*ptr as *mut u8, *len as usize);
                // SAFETY: allocated by alloc_into and released exactly once.
                drop(unsafe { Box::from_raw(raw) });
                self.frees.fetch_add(1, Ordering::SeqCst);
                *ptr = std::ptr::null();
                *len = 0;
            }
        }
    }
}
