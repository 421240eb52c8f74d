//! Native core library resolution and symbol binding.
//!
//! The core library ships next to the host executable, either directly in the
//! executable's directory or under the packaged `runtimes/<os>-<arch>/native/`
//! layout. Resolution happens at most once per process; both the loaded handle
//! and a resolution failure are cached, so every later call observes the same
//! outcome without touching the filesystem again.

use crate::error::{LocalError, Result};
use crate::interop::NativeCore;
use crate::interop::abi::{NativeCallbackFn, RequestBuffer, ResponseBuffer};
use libloading::Library;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Base name of the native core library, without platform decoration.
const CORE_LIBRARY: &str = "corelocal_core";

/// Libraries the core links against dynamically. On Windows these must be
/// loaded from the package directory before the core itself, otherwise the
/// loader falls back to whatever is on PATH.
#[cfg(windows)]
const DEPENDENT_LIBRARIES: &[&str] = &["onnxruntime", "onnxruntime-genai"];

type ExecuteCommandFn = unsafe extern "C" fn(*const RequestBuffer, *mut ResponseBuffer);
type ExecuteCommandWithCallbackFn =
    unsafe extern "C" fn(*const RequestBuffer, *mut ResponseBuffer, NativeCallbackFn, *mut c_void);
type FreeResponseFn = unsafe extern "C" fn(*mut ResponseBuffer);

/// Platform file name for a native library base name.
fn library_file_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{base}.dll")
    } else if cfg!(target_os = "macos") {
        format!("{base}.dylib")
    } else {
        format!("{base}.so")
    }
}

/// The `runtimes/<os>-<arch>/native` directory for the current platform,
/// relative to a base directory.
fn runtimes_dir(base: &Path) -> PathBuf {
    let os = if cfg!(target_os = "windows") {
        "win"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    base.join("runtimes").join(format!("{os}-{arch}")).join("native")
}

/// Candidate directories to probe, in order.
fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(base) = exe.parent()
    {
        dirs.push(base.to_path_buf());
        dirs.push(runtimes_dir(base));
    }
    dirs
}

/// Loaded native core: the bound symbols plus the handles that keep them
/// valid for the life of the process.
#[derive(Debug)]
pub struct LoadedCore {
    execute: ExecuteCommandFn,
    execute_with_callback: ExecuteCommandWithCallbackFn,
    free_response: FreeResponseFn,
    // Held only to keep the mapped libraries alive.
    _library: Library,
    #[cfg(windows)]
    _dependents: Vec<Library>,
}

impl LoadedCore {
    fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(library_file_name(CORE_LIBRARY));
        if !path.is_file() {
            return Err(LocalError::LibraryNotFound(format!(
                "{} not present in {}",
                library_file_name(CORE_LIBRARY),
                dir.display()
            )));
        }

        // Windows resolves the core's dynamic dependencies through the default
        // search order, which does not include the package directory. Load
        // them explicitly first; failures are tolerated since the core may be
        // linked statically.
        #[cfg(windows)]
        let dependents: Vec<Library> = DEPENDENT_LIBRARIES
            .iter()
            .filter_map(|name| {
                let dep = dir.join(library_file_name(name));
                // SAFETY: library initialization runs arbitrary code; these
                // are the runtime libraries the core was packaged with.
                unsafe { Library::new(&dep) }.ok()
            })
            .collect();

        // SAFETY: as above; the path was probed from the package layout.
        let library = unsafe { Library::new(&path) }
            .map_err(|e| LocalError::LibraryNotFound(format!("{}: {e}", path.display())))?;

        let missing = |name: &str, e: libloading::Error| {
            LocalError::LibraryNotFound(format!(
                "{} does not export '{name}': {e}",
                path.display()
            ))
        };
        // SAFETY: symbol types match the core's exported C ABI.
        let execute = unsafe {
            *library
                .get::<ExecuteCommandFn>(b"execute_command")
                .map_err(|e| missing("execute_command", e))?
        };
        let execute_with_callback = unsafe {
            *library
                .get::<ExecuteCommandWithCallbackFn>(b"execute_command_with_callback")
                .map_err(|e| missing("execute_command_with_callback", e))?
        };
        let free_response = unsafe {
            *library
                .get::<FreeResponseFn>(b"free_response")
                .map_err(|e| missing("free_response", e))?
        };

        Ok(Self {
            execute,
            execute_with_callback,
            free_response,
            _library: library,
            #[cfg(windows)]
            _dependents: dependents,
        })
    }
}

impl NativeCore for LoadedCore {
    unsafe fn execute(&self, request: *const RequestBuffer, response: *mut ResponseBuffer) {
        unsafe { (self.execute)(request, response) }
    }

    unsafe fn execute_with_callback(
        &self,
        request: *const RequestBuffer,
        response: *mut ResponseBuffer,
        callback: NativeCallbackFn,
        user_data: *mut c_void,
    ) {
        unsafe { (self.execute_with_callback)(request, response, callback, user_data) }
    }

    unsafe fn free_response(&self, response: *mut ResponseBuffer) {
        unsafe { (self.free_response)(response) }
    }
}

static CORE: OnceLock<std::result::Result<Arc<LoadedCore>, String>> = OnceLock::new();

fn resolve_uncached() -> Result<Arc<LoadedCore>> {
    let dirs = candidate_dirs();
    for dir in &dirs {
        match LoadedCore::open(dir) {
            Ok(core) => {
                tracing::info!(dir = %dir.display(), "native core library loaded");
                return Ok(Arc::new(core));
            }
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "core library probe failed");
            }
        }
    }
    Err(LocalError::LibraryNotFound(format!(
        "'{}' not found in any of: {}",
        library_file_name(CORE_LIBRARY),
        dirs.iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// Resolve and bind the native core library, at most once per process.
///
/// A failed resolution is also cached: once this returns
/// [`LocalError::LibraryNotFound`], every later call fails fast with the same
/// message.
pub fn resolve() -> Result<Arc<LoadedCore>> {
    CORE.get_or_init(|| {
        resolve_uncached().map_err(|e| match e {
            LocalError::LibraryNotFound(message) => message,
            other => other.to_string(),
        })
    })
    .clone()
    .map_err(LocalError::LibraryNotFound)
}
