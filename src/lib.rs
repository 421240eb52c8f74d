//! SDK for running AI models locally through a packaged native core runtime.
//!
//! Corelocal manages the full local model lifecycle — catalog discovery,
//! download, load/unload — and exposes OpenAI-compatible chat completion and
//! audio transcription clients. Everything executes against a native core
//! library resolved from the application's package at first use; there is no
//! separate server process to manage.
//!
//! # Key concepts
//!
//! - **[`LocalManager`](manager::LocalManager)** — the process-wide entry
//!   point. Created once per process with a [`Configuration`](config::Configuration),
//!   it initializes the native core and hands out the catalog.
//! - **[`Catalog`](catalog::Catalog)** — the models the core can serve,
//!   grouped by alias into [`Model`](model::Model) entries with one
//!   [`ModelVariant`](model::ModelVariant) per execution target (CPU, GPU,
//!   NPU).
//! - **Clients** — [`ChatClient`](client::ChatClient) and
//!   [`AudioClient`](client::AudioClient) are bound to a loaded variant and
//!   offer one-shot and streaming forms; streaming yields a
//!   [`ChunkStream`](interop::channel::ChunkStream).
//! - **[`CoreInterop`](interop::CoreInterop)** — the command bridge the rest
//!   of the SDK is built on, available directly for commands the typed API
//!   does not cover.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use corelocal::config::Configuration;
//! use corelocal::client::ChatMessage;
//! use corelocal::manager::LocalManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = LocalManager::create(Configuration::new("my-app")).await?;
//!
//! let catalog = manager.catalog().await?;
//! let model = catalog
//!     .get_model("qwen2.5-0.5b")
//!     .await?
//!     .ok_or("model not in catalog")?;
//!
//! model.download(None).await?;
//! model.load().await?;
//!
//! let chat = model.chat_client().await?;
//! let response = chat.complete(&[ChatMessage::user("Why is the sky blue?")]).await?;
//! println!("{}", response.content().unwrap_or_default());
//!
//! model.unload().await?;
//! LocalManager::dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod interop;
pub mod manager;
pub mod model;

#[cfg(test)]
mod mock;

pub use config::Configuration;
pub use error::{LocalError, Result};
pub use manager::LocalManager;
