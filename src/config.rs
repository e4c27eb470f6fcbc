use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::api_connection::endpoints::{GenerateOptions, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::search::embedding_engine::DEFAULT_MODEL_ID;

pub const DEFAULT_CONFIG_PATH: &str = "meal_retrieval.toml";
pub const ENV_PREFIX: &str = "MEAL_RETRIEVAL";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub paths: PathsConfig,
    pub retrieval: RetrievalConfig,
    pub encoder: EncoderConfig,
    pub completion: CompletionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub food_csv: PathBuf,
    pub embedding_store: PathBuf,
    pub index: PathBuf,
    pub metadata_db: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            food_csv: PathBuf::from("embedding_database/food.csv"),
            embedding_store: PathBuf::from("embedding_database/embeddings.femb"),
            index: PathBuf::from("embedding_database/food_index.fidx"),
            metadata_db: PathBuf::from("embedding_database/food.db"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Rebuild from the embedding store when the index file cannot be loaded.
    pub rebuild_on_load_failure: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            rebuild_on_load_failure: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EncoderConfig {
    pub model_id: String,
    pub batch_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            batch_size: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Sampling temperature; the model's own default when unset.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl CompletionConfig {
    /// Generation options to send with each request, if any are configured.
    pub fn generate_options(&self) -> Option<GenerateOptions> {
        if self.temperature.is_none() && self.max_tokens.is_none() {
            return None;
        }
        Some(GenerateOptions {
            temperature: self.temperature,
            num_predict: self.max_tokens,
        })
    }
}

impl Settings {
    /// Defaults, overlaid by the TOML file at `path` (if present), overlaid by
    /// `MEAL_RETRIEVAL__<SECTION>__<KEY>` environment variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
