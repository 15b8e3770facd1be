use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment};
use serde::Deserialize;

/// Which hosted reranker answers rerank requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankProviderKind {
    Voyage,
    Jina,
}

/// Process settings, read from the environment (and `.env` when present).
///
/// Variable names are the upper-cased field names, e.g. `QDRANT_URL`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,

    #[serde(default = "default_embedding_base_url")]
    pub embedding_base_url: String,
    #[serde(default)]
    pub dashscope_api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    #[serde(default = "default_rerank_provider")]
    pub rerank_provider: RerankProviderKind,
    #[serde(default)]
    pub voyage_api_key: Option<String>,
    #[serde(default = "default_voyage_base_url")]
    pub voyage_base_url: String,
    #[serde(default = "default_voyage_rerank_model")]
    pub voyage_rerank_model: String,
    /// Jina token, with or without a leading `Bearer `; the prefix is added on each request.
    #[serde(default)]
    pub jina_api_key: Option<String>,
    #[serde(default = "default_jina_base_url")]
    pub jina_base_url: String,
    #[serde(default = "default_jina_rerank_model")]
    pub jina_rerank_model: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_enhance_model")]
    pub enhance_model: String,
    #[serde(default = "default_chat_temperature")]
    pub chat_temperature: f32,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let config = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_embedding_base_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-v3".to_string()
}

fn default_embedding_dimensions() -> usize {
    1024
}

fn default_rerank_provider() -> RerankProviderKind {
    RerankProviderKind::Voyage
}

fn default_voyage_base_url() -> String {
    "https://api.voyageai.com/v1".to_string()
}

fn default_voyage_rerank_model() -> String {
    "rerank-2".to_string()
}

fn default_jina_base_url() -> String {
    "https://api.jina.ai/v1".to_string()
}

fn default_jina_rerank_model() -> String {
    "jina-reranker-v2-base-multilingual".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_enhance_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_chat_temperature() -> f32 {
    0.1
}

fn default_http_timeout_secs() -> u64 {
    60
}
