//! SDK configuration passed to the native core at initialization.
//!
//! The native core consumes configuration as a flat string-to-string parameter
//! map attached to the `initialize` command; [`Configuration::as_params`]
//! produces that map. Unset optional fields are simply omitted so the core
//! applies its own defaults (`{home}/.{appname}` for the data directory, etc.).

use crate::error::{LocalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log verbosity forwarded to the native core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Verbose,
    Debug,
    Information,
    #[default]
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Verbose => "Verbose",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        };
        write!(f, "{s}")
    }
}

/// Settings for the optional built-in web service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebServiceConfig {
    /// URL(s) to bind when the service is started, as a semicolon-separated
    /// list. Defaults to `127.0.0.1:0` (random ephemeral port) when unset.
    /// The actual bound URLs are reported by
    /// [`LocalManager::start_service`](crate::manager::LocalManager::start_service).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<String>,
}

/// Configuration for the SDK and the native core it initializes.
///
/// Only `app_name` is required. Directory fields default inside the core to a
/// per-application layout under the user's home directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Application name. Must be non-empty and a valid directory name, since
    /// the core derives its default data directory from it.
    pub app_name: String,
    /// Application data directory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_data_dir: Option<String>,
    /// Model cache directory override. When set, the manager reconciles the
    /// core's cache directory with this value during initialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_cache_dir: Option<String>,
    /// Log directory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_dir: Option<String>,
    /// Core log verbosity. Defaults to [`LogLevel::Warning`].
    #[serde(default)]
    pub log_level: LogLevel,
    /// Optional web service settings. `None` disables the service commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebServiceConfig>,
    /// Additional settings forwarded verbatim to the core. Empty keys are
    /// skipped.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub additional_settings: HashMap<String, String>,
}

impl Configuration {
    /// Create a configuration with the given application name and defaults
    /// for everything else.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_data_dir: None,
            model_cache_dir: None,
            logs_dir: None,
            log_level: LogLevel::default(),
            web: None,
            additional_settings: HashMap::new(),
        }
    }

    /// Validate invariants: `app_name` must be non-empty and usable as a
    /// directory name.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.is_empty() {
            return Err(LocalError::Config(
                "app_name must be set to a valid application name".to_string(),
            ));
        }
        // Characters invalid in file names on at least one supported OS.
        const INVALID: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];
        if self.app_name.contains(INVALID) {
            return Err(LocalError::Config(format!(
                "app_name '{}' contains invalid characters",
                self.app_name
            )));
        }
        Ok(())
    }

    /// Flatten into the string-to-string parameter map the `initialize`
    /// command consumes. Unset fields are omitted, never emitted as empty
    /// strings.
    pub fn as_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert("AppName".to_string(), self.app_name.clone());
        params.insert("LogLevel".to_string(), self.log_level.to_string());

        if let Some(dir) = &self.app_data_dir {
            params.insert("AppDataDir".to_string(), dir.clone());
        }
        if let Some(dir) = &self.model_cache_dir {
            params.insert("ModelCacheDir".to_string(), dir.clone());
        }
        if let Some(dir) = &self.logs_dir {
            params.insert("LogsDir".to_string(), dir.clone());
        }
        if let Some(web) = &self.web
            && let Some(urls) = &web.urls
        {
            params.insert("WebServiceUrls".to_string(), urls.clone());
        }
        for (key, value) in &self.additional_settings {
            if key.is_empty() {
                continue;
            }
            params.insert(key.clone(), value.clone());
        }

        params
    }
}
