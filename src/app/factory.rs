use crate::{
    app::{backend::AppBackend, local::AppLocal, remote::AppRemote},
    config::{Config, EmbeddingProviderKind},
    reconcile::{EmbeddingModel, EmbeddingProvider, OpenAiEmbedder},
    tags::{BackendCsv, StoredTag, TagStore},
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Wires configuration, embedding provider and tag store into a backend
pub struct AppFactory;

impl AppFactory {
    /// Remote backend when `RENTAG_ADDR` is set, local engine otherwise.
    pub fn create_backend(paths: &AppPaths) -> Result<Box<dyn AppBackend>> {
        match Self::remote_addr() {
            Some(addr) => {
                log::info!("Using remote backend: {}", addr);
                Ok(Box::new(AppRemote::new(&addr)))
            }
            None => {
                let config = Config::load_with(&paths.base_path)?;
                Ok(Box::new(Self::create_local_app(paths, &config)?))
            }
        }
    }

    /// Canonical vocabulary, read straight from `tags.csv` unless a daemon
    /// is configured. No embedding model is loaded.
    pub fn list_tags(paths: &AppPaths) -> Result<Vec<StoredTag>> {
        match Self::remote_addr() {
            Some(addr) => Ok(AppRemote::new(&addr).tags()?),
            None => Ok(Self::open_tag_store(paths)?.list()?),
        }
    }

    fn remote_addr() -> Option<String> {
        std::env::var("RENTAG_ADDR").ok()
    }

    pub fn open_tag_store(paths: &AppPaths) -> Result<BackendCsv> {
        BackendCsv::load(&paths.tags_path)
            .with_context(|| format!("failed to open tag store {}", paths.tags_path))
    }

    pub fn create_local_app(paths: &AppPaths, config: &Config) -> Result<AppLocal> {
        let store = Self::open_tag_store(paths)?;
        let embedder = Self::create_embedder(config)?;

        Ok(AppLocal::new(
            embedder,
            Arc::new(store),
            config.similarity_threshold,
            config.embedding.parallelism()?,
        )?)
    }

    pub fn create_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
        let emb = &config.embedding;
        match emb.provider {
            EmbeddingProviderKind::Local => {
                let model = EmbeddingModel::new(
                    &emb.model,
                    PathBuf::from(config.base_path()),
                    Duration::from_secs(emb.download_timeout_secs),
                )
                .context("failed to load local embedding model")?;
                log::info!(
                    "Loaded embedding model '{}' ({} dimensions)",
                    model.name(),
                    model.dimensions()
                );
                Ok(Arc::new(model))
            }
            EmbeddingProviderKind::OpenAi => {
                let api_key = std::env::var(&emb.openai.api_key_env).ok();
                if api_key.is_none() {
                    log::warn!(
                        "{} is not set, sending embedding requests without credentials",
                        emb.openai.api_key_env
                    );
                }
                let embedder = OpenAiEmbedder::new(
                    &emb.openai.base_url,
                    &emb.openai.model,
                    api_key,
                    Duration::from_secs(emb.openai.timeout_secs),
                )?;
                Ok(Arc::new(embedder))
            }
        }
    }

    /// Get application paths, creating the base directory if needed
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::in_dir(&base_path))
    }

    fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var("RENTAG_BASE_PATH") {
            return Ok(base_path);
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(format!("{}/.local/share/rentag", home.to_string_lossy()))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: String,
    pub tags_path: String,
}

impl AppPaths {
    pub fn in_dir(base_path: &str) -> Self {
        AppPaths {
            base_path: base_path.to_string(),
            tags_path: format!("{base_path}/tags.csv"),
        }
    }
}
