//! Service configuration.
//!
//! All values are compiled in and frozen into one immutable [`Settings`]
//! at process start; components receive it by reference through the
//! server state rather than reading ambient globals.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_API_KEY: &str = "";
pub const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1/chat/completions";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_MODEL_NAME: &str = "Qwen/Qwen2.5-7B-Instruct";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

pub const DEFAULT_RETRIEVAL_URL: &str = "http://localhost:8000/search/docs";
pub const DEFAULT_RETRIEVAL_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_RETRIEVAL_TOP_K: u32 = 5;
pub const DEFAULT_USE_RERANK: bool = true;
pub const DEFAULT_RERANK_MODE: RerankMode = RerankMode::Cross;

pub const DEFAULT_REWRITER_ENABLED: bool = true;
pub const DEFAULT_REWRITER_MODEL_NAME: &str = "Qwen/Qwen2.5-7B-Instruct";
pub const DEFAULT_REWRITER_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_REWRITER_MAX_TOKENS: u32 = 128;

pub const DEFAULT_PORT: u16 = 3009;

/// Maximum accepted value for `top_k` / `rerank_top_k` on inbound requests.
pub const MAX_TOP_K: u32 = 50;

/// Secondary relevance model used by the retrieval service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMode {
    Cross,
    Bi,
}

impl std::fmt::Display for RerankMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RerankMode::Cross => write!(f, "cross"),
            RerankMode::Bi => write!(f, "bi"),
        }
    }
}

/// Generation parameters for the upstream chat-completion model.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model_name: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.into(),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Settings for the external RAG retrieval service.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub url: String,
    pub timeout: Duration,
    pub top_k: u32,
    pub use_rerank: bool,
    pub rerank_mode: RerankMode,
    pub rerank_top_k: Option<u32>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_RETRIEVAL_URL.into(),
            timeout: Duration::from_secs(DEFAULT_RETRIEVAL_TIMEOUT_SECS),
            top_k: DEFAULT_RETRIEVAL_TOP_K,
            use_rerank: DEFAULT_USE_RERANK,
            rerank_mode: DEFAULT_RERANK_MODE,
            rerank_top_k: None,
        }
    }
}

/// Settings for rewriting user queries before retrieval.
#[derive(Debug, Clone)]
pub struct RewriterSettings {
    pub enabled: bool,
    pub model_name: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for RewriterSettings {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_REWRITER_ENABLED,
            model_name: DEFAULT_REWRITER_MODEL_NAME.into(),
            temperature: DEFAULT_REWRITER_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_tokens: DEFAULT_REWRITER_MAX_TOKENS,
        }
    }
}

/// Top-level service configuration, immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub upstream: UpstreamSettings,
    pub model: ModelSettings,
    pub retrieval: RetrievalSettings,
    pub rewriter: RewriterSettings,
    pub server: ServerSettings,
}

/// Connection settings for the chat-completion upstream.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.trim().into(),
            base_url: DEFAULT_BASE_URL.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Inbound HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl Settings {
    /// Return the upstream API key or fail when none is configured.
    pub fn require_api_key(&self) -> Result<&str> {
        if self.upstream.api_key.is_empty() {
            return Err(Error::Config(
                "upstream API key is not configured; set DEFAULT_API_KEY before building".into(),
            ));
        }
        Ok(&self.upstream.api_key)
    }
}
