//! Process-wide SDK entry point.
//!
//! [`LocalManager`] owns the executor over the native core and hands out the
//! catalog and service controls. Exactly one manager exists per process; the
//! core keeps global state, so a second [`LocalManager::create`] is rejected
//! rather than silently re-initializing with a possibly different
//! configuration. [`LocalManager::dispose`] tears the instance down (stopping
//! the web service best-effort if it was started) and is idempotent.

use crate::catalog::Catalog;
use crate::config::Configuration;
use crate::error::{LocalError, Result};
use crate::interop::{CommandRequest, CoreInterop, NativeCore};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

static INSTANCE: Mutex<Option<Arc<LocalManager>>> = Mutex::const_new(None);

/// The SDK's singleton manager.
pub struct LocalManager {
    config: Configuration,
    interop: CoreInterop,
    catalog: OnceCell<Arc<Catalog>>,
    /// Bound URLs while the web service is running.
    urls: Mutex<Option<Vec<String>>>,
}

impl LocalManager {
    /// Create and initialize the process-wide manager over the packaged
    /// native core library.
    ///
    /// Fails with [`LocalError::Lifecycle`] if a manager already exists; the
    /// existing one keeps its original configuration. On initialization
    /// failure nothing is published, so a corrected `create` can be retried.
    pub async fn create(config: Configuration) -> Result<Arc<Self>> {
        let interop = CoreInterop::from_library()?;
        Self::create_over(config, interop).await
    }

    /// As [`LocalManager::create`], but over an explicit native boundary
    /// implementation instead of the packaged library.
    pub async fn create_with_core(
        config: Configuration,
        core: Arc<dyn NativeCore>,
    ) -> Result<Arc<Self>> {
        Self::create_over(config, CoreInterop::with_core(core)).await
    }

    async fn create_over(config: Configuration, interop: CoreInterop) -> Result<Arc<Self>> {
        let mut instance = INSTANCE.lock().await;
        if instance.is_some() {
            return Err(LocalError::Lifecycle(
                "manager has already been created; dispose it first".to_string(),
            ));
        }

        let manager = Arc::new(Self {
            config,
            interop,
            catalog: OnceCell::new(),
            urls: Mutex::new(None),
        });
        manager.initialize().await?;

        tracing::info!(app = %manager.config.app_name, "manager initialized");
        *instance = Some(Arc::clone(&manager));
        Ok(manager)
    }

    /// The already-created manager.
    pub async fn instance() -> Result<Arc<Self>> {
        INSTANCE.lock().await.clone().ok_or_else(|| {
            LocalError::Lifecycle("manager has not been created; call create first".to_string())
        })
    }

    /// Tear down the process-wide manager, if one exists.
    ///
    /// Stops the web service best-effort when it was left running. Safe to
    /// call repeatedly; after it returns, `create` may be called again.
    pub async fn dispose() -> Result<()> {
        let taken = INSTANCE.lock().await.take();
        if let Some(manager) = taken {
            if let Err(e) = manager.stop_service_if_running().await {
                tracing::warn!(error = %e, "error stopping web service during dispose");
            }
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        self.config.validate()?;

        let request = CommandRequest::from_params(self.config.as_params());
        self.interop.run("initialize", Some(&request)).await?;

        // The core persists its cache directory across runs; reconcile it
        // with the configured one.
        if let Some(wanted) = &self.config.model_cache_dir {
            let current = self.interop.run("get_cache_directory", None).await?;
            if &current != wanted {
                let request = CommandRequest::new().with_param("Directory", wanted);
                self.interop
                    .run("set_cache_directory", Some(&request))
                    .await?;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Executor for issuing commands directly. Most callers go through the
    /// catalog and clients instead.
    pub fn interop(&self) -> &CoreInterop {
        &self.interop
    }

    /// The model catalog, fetched on first use.
    pub async fn catalog(&self) -> Result<Arc<Catalog>> {
        self.catalog
            .get_or_try_init(|| Catalog::create(self.interop.clone()))
            .await
            .cloned()
    }

    /// Start the optional OpenAI-compatible web service and return the URLs
    /// it actually bound (requested URLs may use port 0).
    ///
    /// Requires [`Configuration::web`] to be set.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn start_service(&self) -> Result<Vec<String>> {
        if self.config.web.is_none() {
            return Err(LocalError::Config(
                "web service is not configured; set Configuration::web".to_string(),
            ));
        }

        let data = self.interop.run("start_service", None).await?;
        let bound: Vec<String> = serde_json::from_str(&data).map_err(|e| {
            LocalError::Deserialization(format!("malformed bound URL list from core: {e}"))
        })?;
        if bound.is_empty() {
            return Err(LocalError::Deserialization(
                "core reported no bound URLs for the web service".to_string(),
            ));
        }

        *self.urls.lock().await = Some(bound.clone());
        Ok(bound)
    }

    /// Stop the web service.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn stop_service(&self) -> Result<()> {
        if self.config.web.is_none() {
            return Err(LocalError::Config(
                "web service is not configured; set Configuration::web".to_string(),
            ));
        }

        self.interop.run("stop_service", None).await?;
        *self.urls.lock().await = None;
        Ok(())
    }

    /// Bound URLs of the running web service, or `None` when it is stopped.
    pub async fn urls(&self) -> Option<Vec<String>> {
        self.urls.lock().await.clone()
    }

    async fn stop_service_if_running(&self) -> Result<()> {
        if self.urls.lock().await.is_some() {
            self.stop_service().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalManager")
            .field("app_name", &self.config.app_name)
            .finish()
    }
}
