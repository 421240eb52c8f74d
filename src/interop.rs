//! Command execution bridge to the native core.
//!
//! Every SDK operation bottoms out here as a named command with an optional
//! JSON parameter payload. [`CoreInterop`] marshals the request into the flat
//! buffer ABI, runs the blocking native call on a worker thread, and decodes
//! the response. Streaming commands additionally route chunk callbacks from
//! the native thread to an async [`ChunkStream`], with first-fault-wins error
//! capture: once a consumer callback fails, later chunks are suppressed and
//! the fault surfaces after the native call returns, taking priority over any
//! native-reported error.

pub mod abi;
pub mod channel;
pub mod library;

use crate::error::{LocalError, Result};
use abi::{MarshaledRequest, NativeCallbackFn, RequestBuffer, ResponseBuffer};
use channel::ChunkStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Command input payload: a flat string-to-string parameter map, serialized as
/// `{"Params": {...}}` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "Params")]
    pub params: HashMap<String, String>,
}

impl CommandRequest {
    /// An empty parameter map. Legal input for commands that take none.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LocalError::Marshaling(format!("failed to encode command input: {e}")))
    }
}

/// Decoded command response: at most one of `data` and `error` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResponse {
    pub data: Option<String>,
    pub error: Option<String>,
}

impl CommandResponse {
    /// Convert into the command's result: the data payload on success (empty
    /// string when the core returned no data), or a
    /// [`LocalError::Native`] carrying the core's error text verbatim.
    pub fn into_result(self, command: &str, input: Option<&str>) -> Result<String> {
        match self.error {
            Some(message) => Err(LocalError::native(command, input, message)),
            None => Ok(self.data.unwrap_or_default()),
        }
    }
}

/// The native boundary as a seam.
///
/// The production implementation is [`library::LoadedCore`], backed by the
/// dynamically loaded core library; tests substitute scripted fakes. All three
/// operations follow the C ABI contract: the caller owns the request buffers
/// for the duration of the call, the core allocates into the response buffer,
/// and [`NativeCore::free_response`] must be called exactly once per executed
/// command to release what the core allocated.
pub trait NativeCore: Send + Sync + 'static {
    /// Execute one command round-trip, filling `response`.
    ///
    /// # Safety
    /// `request` and `response` must point to valid buffers for the duration
    /// of the call; the request's byte ranges must stay alive until it
    /// returns.
    unsafe fn execute(&self, request: *const RequestBuffer, response: *mut ResponseBuffer);

    /// Execute a streaming command. `callback` is invoked zero or more times
    /// with `(data, length, user_data)` before this function returns; it is
    /// never invoked afterwards.
    ///
    /// # Safety
    /// As [`NativeCore::execute`]; additionally `user_data` must be valid for
    /// every callback invocation.
    unsafe fn execute_with_callback(
        &self,
        request: *const RequestBuffer,
        response: *mut ResponseBuffer,
        callback: NativeCallbackFn,
        user_data: *mut c_void,
    );

    /// Release the buffers the core allocated into `response`.
    ///
    /// # Safety
    /// `response` must have been filled by one of the execute operations and
    /// not yet freed; its pointers are invalid afterwards.
    unsafe fn free_response(&self, response: *mut ResponseBuffer);
}

/// Consumer-side chunk handler for streaming commands. Runs on the native
/// call's worker thread; an `Err` becomes the call's fault and suppresses
/// all later chunks.
pub type CallbackFn = Box<dyn FnMut(String) -> Result<()> + Send>;

/// Captures the first error raised during a streaming call's callback phase.
/// Later errors are dropped; a set fault also suppresses chunk delivery.
struct FaultCell(Option<LocalError>);

impl FaultCell {
    fn record(&mut self, error: LocalError) {
        if self.0.is_none() {
            self.0 = Some(error);
        }
    }

    fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

struct CallbackContext {
    callback: CallbackFn,
    fault: FaultCell,
}

/// Trampoline handed to the native core for streaming commands. `user_data`
/// points at the [`CallbackContext`] scoped to exactly this call.
unsafe extern "C" fn dispatch_chunk(data: *const u8, length: i32, user_data: *mut c_void) {
    // SAFETY: user_data is the CallbackContext owned by the frame driving this
    // native call, alive until the call returns.
    let ctx = unsafe { &mut *(user_data as *mut CallbackContext) };
    if ctx.fault.is_set() {
        return;
    }

    let chunk = if data.is_null() || length <= 0 {
        String::new()
    } else {
        // SAFETY: the core guarantees `data` points to `length` readable
        // bytes for the duration of this invocation.
        let bytes = unsafe { std::slice::from_raw_parts(data, length as usize) };
        match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(e) => {
                ctx.fault
                    .record(LocalError::Marshaling(format!("chunk is not valid UTF-8: {e}")));
                return;
            }
        }
    };

    // A panic must not unwind across the C boundary.
    match std::panic::catch_unwind(AssertUnwindSafe(|| (ctx.callback)(chunk))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => ctx.fault.record(e),
        Err(_) => ctx
            .fault
            .record(LocalError::Callback("panic in chunk callback".to_string())),
    }
}

/// Async command executor over a [`NativeCore`] boundary.
///
/// Cheap to clone; clones share the underlying core handle.
#[derive(Clone)]
pub struct CoreInterop {
    core: Arc<dyn NativeCore>,
}

impl std::fmt::Debug for CoreInterop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreInterop").finish_non_exhaustive()
    }
}

impl CoreInterop {
    /// Executor over the process-wide native core library, resolving and
    /// binding it on first use.
    pub fn from_library() -> Result<Self> {
        Ok(Self {
            core: library::resolve()?,
        })
    }

    /// Executor over an explicit boundary implementation.
    pub fn with_core(core: Arc<dyn NativeCore>) -> Self {
        Self { core }
    }

    /// One synchronous round-trip on the current thread. The response buffer
    /// is decoded by copy and released via `free_response` on every path,
    /// including decode failure. A callback fault takes priority over the
    /// decoded outcome.
    fn execute_blocking(
        &self,
        command: &str,
        input: Option<&str>,
        callback: Option<CallbackFn>,
    ) -> Result<CommandResponse> {
        let marshaled = MarshaledRequest::new(command, input)?;
        let request = marshaled.buffer();
        let mut response = ResponseBuffer::zeroed();

        match callback {
            None => {
                // SAFETY: `marshaled` outlives the call; `response` is a valid
                // local buffer.
                unsafe { self.core.execute(&request, &mut response) };
                self.decode_and_free(&mut response)
            }
            Some(callback) => {
                let mut ctx = CallbackContext {
                    callback,
                    fault: FaultCell(None),
                };
                let user_data = &mut ctx as *mut CallbackContext as *mut c_void;
                // SAFETY: as above; `ctx` outlives the call and the core never
                // invokes the callback after returning.
                unsafe {
                    self.core
                        .execute_with_callback(&request, &mut response, dispatch_chunk, user_data)
                };
                let decoded = self.decode_and_free(&mut response);
                match ctx.fault.0.take() {
                    Some(fault) => Err(fault),
                    None => decoded,
                }
            }
        }
    }

    fn decode_and_free(&self, response: &mut ResponseBuffer) -> Result<CommandResponse> {
        let decoded = CommandResponse::decode(response);
        // SAFETY: `response` was filled by the execute call just made and has
        // not been freed; this is the single release for it.
        unsafe { self.core.free_response(response) };
        decoded
    }

    /// Execute a non-streaming command off the async runtime, returning the
    /// decoded response as-is. Most callers want [`CoreInterop::run`], which
    /// also unwraps the payload.
    #[tracing::instrument(level = "debug", skip(self, request))]
    pub async fn execute(
        &self,
        command: &str,
        request: Option<&CommandRequest>,
    ) -> Result<CommandResponse> {
        let input = request.map(CommandRequest::to_json).transpose()?;
        self.run_blocking(command.to_string(), input, None).await
    }

    /// Execute a streaming command, delivering each chunk to `callback` on the
    /// worker thread. The returned response reflects the native outcome; a
    /// callback fault preempts it.
    #[tracing::instrument(level = "debug", skip(self, request, callback))]
    pub async fn execute_with_callback(
        &self,
        command: &str,
        request: Option<&CommandRequest>,
        callback: CallbackFn,
    ) -> Result<CommandResponse> {
        let input = request.map(CommandRequest::to_json).transpose()?;
        self.run_blocking(command.to_string(), input, Some(callback))
            .await
    }

    /// Execute a non-streaming command and unwrap its payload. A
    /// native-reported failure comes back as a [`LocalError::Native`] carrying
    /// the command name and the serialized input that was sent with it.
    #[tracing::instrument(level = "debug", skip(self, request))]
    pub async fn run(&self, command: &str, request: Option<&CommandRequest>) -> Result<String> {
        let input = request.map(CommandRequest::to_json).transpose()?;
        self.run_blocking(command.to_string(), input.clone(), None)
            .await?
            .into_result(command, input.as_deref())
    }

    /// As [`CoreInterop::run`], delivering streamed chunks to `callback` on
    /// the worker thread before the final payload is unwrapped.
    #[tracing::instrument(level = "debug", skip(self, request, callback))]
    pub async fn run_with_callback(
        &self,
        command: &str,
        request: Option<&CommandRequest>,
        callback: CallbackFn,
    ) -> Result<String> {
        let input = request.map(CommandRequest::to_json).transpose()?;
        self.run_blocking(command.to_string(), input.clone(), Some(callback))
            .await?
            .into_result(command, input.as_deref())
    }

    async fn run_blocking(
        &self,
        command: String,
        input: Option<String>,
        callback: Option<CallbackFn>,
    ) -> Result<CommandResponse> {
        let this = self.clone();
        let start = Instant::now();
        let label = command.clone();
        let result = tokio::task::spawn_blocking(move || {
            this.execute_blocking(&command, input.as_deref(), callback)
        })
        .await
        .map_err(|e| LocalError::Lifecycle(format!("command worker aborted: {e}")))?;

        let status = match &result {
            Ok(response) if response.error.is_none() => "success",
            _ => "failure",
        };
        metrics::counter!("corelocal_commands_total", "command" => label.clone(), "status" => status)
            .increment(1);
        metrics::histogram!("corelocal_command_duration_seconds", "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    /// Execute a streaming command as an async [`ChunkStream`], decoding each
    /// raw chunk with `decode` on the worker thread.
    ///
    /// Chunk order is preserved. The stream ends after the native call
    /// returns: with nothing (success), or with a single error that is the
    /// first decode fault if one occurred, else the native-reported error.
    /// Dropping the stream cancels consumption without an error; the native
    /// call still runs to completion and its outcome is discarded.
    pub fn execute_streaming_map<T, F>(
        &self,
        command: &str,
        request: Option<&CommandRequest>,
        mut decode: F,
    ) -> ChunkStream<T>
    where
        T: Send + 'static,
        F: FnMut(String) -> Result<T> + Send + 'static,
    {
        let (sender, stream) = channel::channel();
        let input = match request.map(CommandRequest::to_json).transpose() {
            Ok(input) => input,
            Err(e) => {
                sender.complete(Some(e));
                return stream;
            }
        };

        let this = self.clone();
        let command = command.to_string();
        let sender = Arc::new(sender);
        let producer = Arc::clone(&sender);
        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let callback: CallbackFn = Box::new(move |chunk| {
                let item = decode(chunk)?;
                // A false send means the consumer went away; keep draining the
                // native call without faulting.
                producer.send(item);
                Ok(())
            });
            let outcome = this
                .execute_blocking(&command, input.as_deref(), Some(callback))
                .and_then(|response| response.into_result(&command, input.as_deref()));

            let status = if outcome.is_ok() { "success" } else { "failure" };
            metrics::counter!("corelocal_commands_total", "command" => command.clone(), "status" => status)
                .increment(1);
            metrics::histogram!("corelocal_command_duration_seconds", "command" => command.clone())
                .record(start.elapsed().as_secs_f64());
            match outcome {
                Ok(_) => sender.complete(None),
                Err(e) => {
                    tracing::debug!(command = %command, error = %e, "streaming command failed");
                    sender.complete(Some(e))
                }
            };
        });
        stream
    }

    /// [`CoreInterop::execute_streaming_map`] with chunks passed through
    /// undecoded.
    pub fn execute_streaming(
        &self,
        command: &str,
        request: Option<&CommandRequest>,
    ) -> ChunkStream<String> {
        self.execute_streaming_map(command, request, Ok)
    }
}
