//! Error types for the corelocal SDK.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LocalError>;

/// Unified error type covering library resolution, marshaling, native-reported
/// failures, and SDK lifecycle misuse.
///
/// Variants are intentionally coarse-grained so that callers can match on error
/// *category* (e.g. bridge bug vs native-reported) rather than on the text of a
/// native error string.
#[derive(Debug, Error)]
pub enum LocalError {
    /// The native core library (or one of its dependents) could not be
    /// resolved or loaded. Fatal; command execution fails fast afterwards.
    #[error("Native library not found: {0}")]
    LibraryNotFound(String),

    /// Failure encoding a request or decoding a response buffer. Indicates a
    /// bridge bug or a corrupted buffer, not a native-side failure.
    #[error("Marshaling error: {0}")]
    Marshaling(String),

    /// The native core explicitly returned an error string for a command.
    /// Carries the command name and serialized input for diagnostics; the
    /// original native error text is preserved verbatim in `message`.
    #[error("Command '{command}' failed: {message}")]
    Native {
        /// The command that was dispatched.
        command: String,
        /// The serialized JSON input, when one was sent.
        input: Option<String>,
        /// The error text reported by the native core, unmodified.
        message: String,
    },

    /// An error raised inside a consumer-supplied chunk callback during a
    /// streaming call. Only the first such error per call is captured.
    #[error("Callback error: {0}")]
    Callback(String),

    /// A chunk or final payload could not be parsed as the expected JSON.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Invalid or missing configuration (empty app name, bad URL, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// SDK lifecycle fault: manager misuse (double create, use after
    /// dispose) or a command worker that aborted before completing.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl LocalError {
    /// Returns `true` when the failure originated inside the native core
    /// (as opposed to the bridge itself or the calling code).
    pub fn is_native_reported(&self) -> bool {
        matches!(self, Self::Native { .. })
    }

    /// Wrap a native error string with the call context required to reproduce
    /// the failing command.
    pub(crate) fn native(command: &str, input: Option<&str>, message: impl Into<String>) -> Self {
        Self::Native {
            command: command.to_string(),
            input: input.map(str::to_string),
            message: message.into(),
        }
    }
}
