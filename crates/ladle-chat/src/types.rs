//! Inbound and outbound API types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ladle_core::RerankMode;
use ladle_retrieval::Document;

/// Incoming chat request from the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// End-user query text.
    pub query: String,
    /// Override number of documents to retrieve (defaults to config).
    #[serde(default)]
    pub top_k: Option<u32>,
    /// When true, respond with Server-Sent Events.
    #[serde(default)]
    pub stream: bool,
    /// Override whether the retriever reranks.
    #[serde(default)]
    pub use_rerank: Option<bool>,
    /// Override rerank mode when reranking.
    #[serde(default)]
    pub rerank_mode: Option<RerankMode>,
    /// Override how many documents to keep after rerank.
    #[serde(default)]
    pub rerank_top_k: Option<u32>,
}

/// Token usage reported by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Normalized non-streaming response returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    /// Model-generated answer.
    pub answer: String,
    /// Model that produced the answer.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Documents that grounded the answer, most relevant first.
    pub documents: Vec<Document>,
    /// Raw upstream payload, passed through for inspection.
    pub raw_response: Value,
}

/// SSE stream event payloads. The SSE event name carries the tag
/// (`meta`/`delta`/`end`/`error`), so payloads serialize untagged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Meta {
        model: String,
        documents: Vec<Document>,
    },
    Delta {
        text: String,
    },
    End {
        answer: String,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Meta { .. } => "meta",
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::End { .. } => "end",
            StreamEvent::Error { .. } => "error",
        }
    }
}
