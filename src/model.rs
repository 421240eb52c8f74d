//! Model metadata and per-model operations.
//!
//! The catalog groups what the core reports into [`Model`] entries, one per
//! alias, each holding the concrete [`ModelVariant`]s (one per execution
//! target). Variant handles carry their own executor and can be used
//! independently of the catalog that produced them.

use crate::client::{AudioClient, ChatClient};
use crate::error::{LocalError, Result};
use crate::interop::{CommandRequest, CoreInterop};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Execution device a variant targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceType {
    #[default]
    Invalid,
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "GPU")]
    Gpu,
    #[serde(rename = "NPU")]
    Npu,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PromptTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    #[serde(default)]
    pub device_type: DeviceType,
    /// Open-ended; the core adds execution providers over time.
    #[serde(default)]
    pub execution_provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ModelParameter>>,
}

/// Model metadata as reported by the core's `get_model_list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Unique variant identifier, e.g. `qwen2.5-0.5b-instruct-cuda-gpu:1`.
    pub id: String,
    /// Variant name without the version suffix.
    pub name: String,
    #[serde(default)]
    pub version: i32,
    /// Alias shared by all variants of the same model.
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub provider_type: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub model_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<PromptTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_settings: Option<ModelSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_description: Option<String>,
    /// Whether the variant was locally cached when the catalog was fetched.
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_mb: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_tool_calling: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Parse a JSON string array, the shape `list_loaded_models` and
/// `get_cached_models` return.
pub(crate) fn parse_id_list(command: &str, data: &str) -> Result<Vec<String>> {
    serde_json::from_str(data).map_err(|e| {
        LocalError::Deserialization(format!("'{command}' returned malformed id list: {e}"))
    })
}

/// Ids of models currently loaded in the core.
pub(crate) async fn loaded_model_ids(interop: &CoreInterop) -> Result<Vec<String>> {
    let data = interop.run("list_loaded_models", None).await?;
    parse_id_list("list_loaded_models", &data)
}

/// Ids of models present in the local cache.
pub(crate) async fn cached_model_ids(interop: &CoreInterop) -> Result<Vec<String>> {
    let data = interop.run("get_cached_models", None).await?;
    parse_id_list("get_cached_models", &data)
}

/// One concrete model build for a specific execution target.
///
/// Holds its own executor handle, so operations work whether the variant came
/// from a catalog lookup or was constructed directly.
#[derive(Clone)]
pub struct ModelVariant {
    info: ModelInfo,
    interop: CoreInterop,
}

impl ModelVariant {
    pub(crate) fn new(info: ModelInfo, interop: CoreInterop) -> Self {
        Self { info, interop }
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn alias(&self) -> &str {
        &self.info.alias
    }

    pub fn version(&self) -> i32 {
        self.info.version
    }

    fn model_request(&self) -> CommandRequest {
        CommandRequest::new().with_param("Model", self.id())
    }

    /// Whether this variant is currently loaded, per the core. Always asks the
    /// core rather than caching, so concurrent variant handles stay accurate.
    pub async fn is_loaded(&self) -> Result<bool> {
        let loaded = loaded_model_ids(&self.interop).await?;
        Ok(loaded.iter().any(|id| id == self.id()))
    }

    /// Whether this variant is present in the local cache.
    pub async fn is_cached(&self) -> Result<bool> {
        let cached = cached_model_ids(&self.interop).await?;
        Ok(cached.iter().any(|id| id == self.id()))
    }

    /// Filesystem path of the downloaded variant.
    pub async fn path(&self) -> Result<String> {
        let request = self.model_request();
        self.interop
            .run("get_model_path", Some(&request))
            .await
            .map_err(|e| match e {
                LocalError::Native {
                    command,
                    input,
                    message,
                } => LocalError::Native {
                    command,
                    input,
                    message: format!("{message}. Has the model been downloaded?"),
                },
                other => other,
            })
    }

    /// Load the variant into memory, making it available to clients.
    #[tracing::instrument(level = "info", skip(self), fields(model = %self.id()))]
    pub async fn load(&self) -> Result<()> {
        let request = self.model_request();
        self.interop.run("load_model", Some(&request)).await?;
        Ok(())
    }

    /// Unload the variant from memory.
    #[tracing::instrument(level = "info", skip(self), fields(model = %self.id()))]
    pub async fn unload(&self) -> Result<()> {
        let request = self.model_request();
        self.interop.run("unload_model", Some(&request)).await?;
        Ok(())
    }

    /// Download the variant into the local cache.
    ///
    /// When `progress` is given, the core reports percentages as it goes; a
    /// report that does not parse as a number is skipped. The call returns
    /// once the download has fully completed.
    #[tracing::instrument(level = "info", skip(self, progress), fields(model = %self.id()))]
    pub async fn download(&self, progress: Option<Box<dyn FnMut(f32) + Send>>) -> Result<()> {
        let request = self.model_request();
        match progress {
            None => {
                self.interop.run("download_model", Some(&request)).await?;
            }
            Some(mut report) => {
                let callback = Box::new(move |chunk: String| {
                    if let Ok(percent) = chunk.trim().parse::<f32>() {
                        report(percent);
                    }
                    Ok(())
                });
                self.interop
                    .run_with_callback("download_model", Some(&request), callback)
                    .await?;
            }
        }
        Ok(())
    }

    /// Remove the variant from the local cache.
    pub async fn remove_from_cache(&self) -> Result<()> {
        let request = self.model_request();
        self.interop
            .run("remove_cached_model", Some(&request))
            .await?;
        Ok(())
    }

    /// Chat completions client bound to this variant. The variant must be
    /// loaded first.
    pub async fn chat_client(&self) -> Result<ChatClient> {
        self.require_loaded().await?;
        Ok(ChatClient::new(self.id().to_string(), self.interop.clone()))
    }

    /// Audio transcription client bound to this variant. The variant must be
    /// loaded first.
    pub async fn audio_client(&self) -> Result<AudioClient> {
        self.require_loaded().await?;
        Ok(AudioClient::new(self.id().to_string(), self.interop.clone()))
    }

    async fn require_loaded(&self) -> Result<()> {
        if !self.is_loaded().await? {
            return Err(LocalError::Lifecycle(format!(
                "model {} is not loaded; load it first",
                self.id()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelVariant")
            .field("id", &self.info.id)
            .field("alias", &self.info.alias)
            .field("cached", &self.info.cached)
            .finish()
    }
}

/// All variants sharing one alias, with one of them selected.
///
/// Handles are independent: selecting a variant affects only this handle, not
/// the catalog or other handles for the same alias.
#[derive(Debug, Clone)]
pub struct Model {
    alias: String,
    variants: Vec<Arc<ModelVariant>>,
    selected: usize,
}

impl Model {
    pub(crate) fn new(variant: Arc<ModelVariant>) -> Self {
        Self {
            alias: variant.alias().to_string(),
            // The core reports variants in priority order, so the first one
            // added is the default selection.
            variants: vec![variant],
            selected: 0,
        }
    }

    pub(crate) fn add_variant(&mut self, variant: Arc<ModelVariant>) -> Result<()> {
        if variant.alias() != self.alias {
            return Err(LocalError::Lifecycle(format!(
                "variant alias '{}' does not match model alias '{}'",
                variant.alias(),
                self.alias
            )));
        }
        // Prefer a locally cached variant over a non-cached default.
        if variant.info().cached && !self.selected().info().cached {
            self.selected = self.variants.len();
        }
        self.variants.push(variant);
        Ok(())
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Id of the selected variant.
    pub fn id(&self) -> &str {
        self.selected().id()
    }

    pub fn variants(&self) -> &[Arc<ModelVariant>] {
        &self.variants
    }

    pub fn selected(&self) -> &Arc<ModelVariant> {
        &self.variants[self.selected]
    }

    /// Select the variant with the given id for subsequent operations on this
    /// handle.
    pub fn select_variant(&mut self, id: &str) -> Result<()> {
        match self.variants.iter().position(|v| v.id() == id) {
            Some(index) => {
                self.selected = index;
                Ok(())
            }
            None => Err(LocalError::Lifecycle(format!(
                "model '{}' does not have a '{id}' variant",
                self.alias
            ))),
        }
    }

    /// Latest version of the variant with the given name. Variants are
    /// version-sorted by the core, so the first name match is the latest.
    pub fn latest_version(&self, name: &str) -> Option<&Arc<ModelVariant>> {
        self.variants.iter().find(|v| v.info().name == name)
    }

    pub async fn is_cached(&self) -> Result<bool> {
        self.selected().is_cached().await
    }

    pub async fn is_loaded(&self) -> Result<bool> {
        self.selected().is_loaded().await
    }

    pub async fn path(&self) -> Result<String> {
        self.selected().path().await
    }

    pub async fn load(&self) -> Result<()> {
        self.selected().load().await
    }

    pub async fn unload(&self) -> Result<()> {
        self.selected().unload().await
    }

    pub async fn download(&self, progress: Option<Box<dyn FnMut(f32) + Send>>) -> Result<()> {
        self.selected().download(progress).await
    }

    pub async fn remove_from_cache(&self) -> Result<()> {
        self.selected().remove_from_cache().await
    }

    pub async fn chat_client(&self) -> Result<ChatClient> {
        self.selected().chat_client().await
    }

    pub async fn audio_client(&self) -> Result<AudioClient> {
        self.selected().audio_client().await
    }
}
