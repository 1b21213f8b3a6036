use crate::reconcile::DEFAULT_THRESHOLD;
use crate::storage::{self, StorageManager};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOCAL_MODEL: &str = "bge-small-en-v1.5";
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_OPENAI_TIMEOUT_SECS: u64 = 30;

const CONFIG_FILE: &str = "config.yaml";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// fastembed running in-process
    #[default]
    Local,
    /// OpenAI-compatible `/embeddings` endpoint
    OpenAi,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            api_key_env: DEFAULT_OPENAI_API_KEY_ENV.to_string(),
            timeout_secs: DEFAULT_OPENAI_TIMEOUT_SECS,
        }
    }
}

/// Configuration for the embedding provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    /// Local model name (e.g., "bge-small-en-v1.5")
    #[serde(default = "default_local_model")]
    pub model: String,

    /// Concurrent embedding calls: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default)]
    pub openai: OpenAiConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: DEFAULT_LOCAL_MODEL.to_string(),
            parallelism: default_parallelism(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            openai: OpenAiConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Number of worker threads for embedding calls, `None` meaning "auto".
    pub fn parallelism(&self) -> anyhow::Result<Option<usize>> {
        if self.parallelism == "auto" {
            return Ok(None);
        }

        match self.parallelism.parse::<usize>() {
            Ok(0) | Err(_) => bail!(
                "embedding.parallelism must be 'auto' or a positive integer, got '{}'",
                self.parallelism
            ),
            Ok(threads) => Ok(Some(threads)),
        }
    }
}

fn default_local_model() -> String {
    DEFAULT_LOCAL_MODEL.to_string()
}

fn default_parallelism() -> String {
    "auto".to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_openai_api_key_env() -> String {
    DEFAULT_OPENAI_API_KEY_ENV.to_string()
}

fn default_openai_timeout_secs() -> u64 {
    DEFAULT_OPENAI_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_THRESHOLD,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            embedding: EmbeddingConfig::default(),
            base_path: String::new(),
        }
    }
}

fn similarity_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            bail!(
                "similarity_threshold must be between 0.0 and 1.0, got {}",
                self.similarity_threshold
            );
        }

        if self.listen_addr.trim().is_empty() {
            bail!("listen_addr must not be empty");
        }

        let emb = &self.embedding;
        emb.parallelism()?;

        if emb.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }

        if emb.provider == EmbeddingProviderKind::OpenAi {
            if emb.openai.model.trim().is_empty() {
                bail!("embedding.openai.model must not be empty");
            }
            if emb.openai.timeout_secs == 0 {
                bail!("embedding.openai.timeout_secs must be greater than 0");
            }
        }

        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("failed to create config dir {base_path}"))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("Creating default config at {base_path}/{CONFIG_FILE}");
            store.write(
                CONFIG_FILE,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}
