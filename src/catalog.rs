//! Model catalog backed by the core's `get_model_list`.
//!
//! The catalog groups variants by alias into [`Model`] entries and keeps an
//! id index for direct variant lookup. The fetched view is cached with a TTL;
//! a refresh builds the replacement maps off to the side and publishes them
//! with a single assignment under the lock, so concurrent readers see either
//! the old complete view or the new complete view, never a partially rebuilt
//! one.

use crate::error::{LocalError, Result};
use crate::interop::CoreInterop;
use crate::model::{self, Model, ModelInfo, ModelVariant};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long a fetched catalog view stays fresh. Use [`Catalog::refresh`] to
/// force an earlier re-fetch.
pub const CATALOG_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Default)]
struct CatalogView {
    alias_to_model: HashMap<String, Model>,
    id_to_variant: HashMap<String, Arc<ModelVariant>>,
    fetched_at: Option<Instant>,
}

impl CatalogView {
    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < CATALOG_TTL)
    }
}

/// Catalog of models the core can serve.
///
/// Obtained from [`LocalManager::catalog`](crate::manager::LocalManager::catalog).
pub struct Catalog {
    name: String,
    interop: CoreInterop,
    view: Mutex<CatalogView>,
}

impl Catalog {
    /// Create a catalog over an executor and fetch the initial view. Usually
    /// reached through [`LocalManager::catalog`](crate::manager::LocalManager::catalog).
    pub async fn create(interop: CoreInterop) -> Result<Arc<Self>> {
        let name = interop.run("get_catalog_name", None).await?;
        let catalog = Arc::new(Self {
            name,
            interop,
            view: Mutex::new(CatalogView::default()),
        });
        catalog.refresh().await?;
        Ok(catalog)
    }

    /// Name of the catalog the core is configured for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-fetch the model list now, regardless of TTL.
    #[tracing::instrument(level = "debug", skip(self), fields(catalog = %self.name))]
    pub async fn refresh(&self) -> Result<()> {
        let data = self.interop.run("get_model_list", None).await?;
        let infos: Vec<ModelInfo> = serde_json::from_str(&data).map_err(|e| {
            LocalError::Deserialization(format!("malformed model list from core: {e}"))
        })?;

        // Build the replacement view without holding the lock.
        let mut alias_to_model: HashMap<String, Model> = HashMap::new();
        let mut id_to_variant = HashMap::new();
        for info in infos {
            let variant = Arc::new(ModelVariant::new(info, self.interop.clone()));
            match alias_to_model.get_mut(variant.alias()) {
                Some(model) => model.add_variant(Arc::clone(&variant))?,
                None => {
                    alias_to_model.insert(
                        variant.alias().to_string(),
                        Model::new(Arc::clone(&variant)),
                    );
                }
            }
            id_to_variant.insert(variant.id().to_string(), variant);
        }
        tracing::debug!(
            models = alias_to_model.len(),
            variants = id_to_variant.len(),
            "catalog view refreshed"
        );

        let mut view = self.view.lock().await;
        *view = CatalogView {
            alias_to_model,
            id_to_variant,
            fetched_at: Some(Instant::now()),
        };
        Ok(())
    }

    async fn refresh_if_stale(&self) -> Result<()> {
        let fresh = self.view.lock().await.is_fresh();
        if !fresh {
            self.refresh().await?;
        }
        Ok(())
    }

    /// All models, sorted by alias. Refreshes the view first if it has gone
    /// stale.
    pub async fn list_models(&self) -> Result<Vec<Model>> {
        self.refresh_if_stale().await?;
        let view = self.view.lock().await;
        let mut models: Vec<Model> = view.alias_to_model.values().cloned().collect();
        models.sort_by(|a, b| a.alias().cmp(b.alias()));
        Ok(models)
    }

    /// Look up a model by alias. Returns a handle with its own variant
    /// selection, detached from the catalog.
    pub async fn get_model(&self, alias: &str) -> Result<Option<Model>> {
        self.refresh_if_stale().await?;
        let view = self.view.lock().await;
        Ok(view.alias_to_model.get(alias).cloned())
    }

    /// Look up a single variant by its unique id.
    pub async fn get_variant(&self, id: &str) -> Result<Option<Arc<ModelVariant>>> {
        self.refresh_if_stale().await?;
        let view = self.view.lock().await;
        Ok(view.id_to_variant.get(id).cloned())
    }

    /// Variants currently present in the local cache, in the order the core
    /// reports them. Ids the catalog does not know are skipped.
    pub async fn cached_models(&self) -> Result<Vec<Arc<ModelVariant>>> {
        let ids = model::cached_model_ids(&self.interop).await?;
        self.variants_for(&ids).await
    }

    /// Variants currently loaded in the core.
    pub async fn loaded_models(&self) -> Result<Vec<Arc<ModelVariant>>> {
        let ids = model::loaded_model_ids(&self.interop).await?;
        self.variants_for(&ids).await
    }

    async fn variants_for(&self, ids: &[String]) -> Result<Vec<Arc<ModelVariant>>> {
        let view = self.view.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| view.id_to_variant.get(id).cloned())
            .collect())
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("name", &self.name).finish()
    }
}
