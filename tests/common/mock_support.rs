//! Shared fake native core and fixtures for integration tests.
#![allow(dead_code)]

use corelocal::config::Configuration;
use corelocal::interop::NativeCore;
use corelocal::interop::abi::{NativeCallbackFn, RequestBuffer, ResponseBuffer};
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
    /// Contract violation: both buffers populated.
    Both { data: String, error: String },
    /// Succeed with neither buffer populated.
    Neither,
    /// Streaming: deliver these chunks through the callback, then finish with
    /// the given outcome.
    Chunks {
        chunks: Vec<String>,
        outcome: Box<Script>,
    },
}

/// Fake [`NativeCore`] driven by per-command scripts.
///
/// Captures every executed command together with its input payload, and
/// tracks response buffer allocations and releases so tests can assert
/// alloc/free symmetry. Unscripted commands succeed with an empty response.
pub struct FakeCore {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, String)>>,
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl FakeCore {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    /// Replace the script for a command. Usable after the core is shared.
    pub fn set(&self, command: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), script);
    }

    pub fn with(self, command: &str, script: Script) -> Self {
        self.set(command, script);
        self
    }

    pub fn with_data(self, command: &str, data: &str) -> Self {
        self.with(command, Script::Data(data.to_string()))
    }

    pub fn with_error(self, command: &str, error: &str) -> Self {
        self.with(command, Script::Error(error.to_string()))
    }

    pub fn with_chunks(self, command: &str, chunks: &[&str], outcome: Script) -> Self {
        self.with(
            command,
            Script::Chunks {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                outcome: Box::new(outcome),
            },
        )
    }

    /// `(command, input)` pairs in execution order. The input is the raw JSON
    /// payload, empty for commands sent without one.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands executed, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|(c, _)| c).collect()
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
        // SAFETY: the bridge upholds the boundary contract; request buffers
        // are valid for the duration of the call.
        let request = unsafe { &*request };
        let command = unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(
                request.command,
                request.command_len as usize,
            ))
        }
        .to_string();
        let input = if request.data_len > 0 {
            unsafe {
                std::str::from_utf8_unchecked(std::slice::from_raw_parts(
                    request.data,
                    request.data_len as usize,
                ))
            }
            .to_string()
        } else {
            String::new()
        };
        let script = self.scripts.lock().unwrap().get(&command).cloned();
        self.calls.lock().unwrap().push((command, input));
        script
    }
}

impl Default for FakeCore {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCore for FakeCore {
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

/// Minimal model-info JSON in the shape `get_model_list` returns.
pub fn model_info_json(id: &str, name: &str, alias: &str, cached: bool) -> String {
    format!(
        r#"{{"id":"{id}","name":"{name}","alias":"{alias}","providerType":"local","uri":"","modelType":"ONNX","cached":{cached}}}"#
    )
}

/// A two-model catalog: `phi-4-mini` with GPU and cached CPU variants, and a
/// single-variant `whisper-tiny`.
pub fn sample_model_list() -> String {
    format!(
        "[{},{},{}]",
        model_info_json("phi-4-mini-gpu:1", "phi-4-mini-gpu", "phi-4-mini", false),
        model_info_json("phi-4-mini-cpu:1", "phi-4-mini-cpu", "phi-4-mini", true),
        model_info_json("whisper-tiny-cpu:1", "whisper-tiny-cpu", "whisper-tiny", false),
    )
}

/// A fake core pre-scripted with everything a catalog fetch needs.
pub fn catalog_core() -> FakeCore {
    FakeCore::new()
        .with_data("get_catalog_name", "test-catalog")
        .with_data("get_model_list", &sample_model_list())
        .with_data("get_cached_models", r#"["phi-4-mini-cpu:1"]"#)
        .with_data("list_loaded_models", "[]")
}

pub fn make_config(app_name: &str) -> Configuration {
    Configuration::new(app_name)
}
