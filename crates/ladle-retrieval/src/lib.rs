//! Retrieval client for the external RAG service.
//!
//! Issues one POST per query and normalizes the response into an ordered
//! list of scored documents. The ordering contract is descending score,
//! ties keeping the upstream arrival order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use ladle_core::config::RetrievalSettings;
use ladle_core::{Error, RerankMode, Result};

/// Document returned by the retrieval service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub score: f64,
}

/// Per-request overrides for retrieval; unset fields fall back to settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveOptions {
    pub top_k: Option<u32>,
    pub use_rerank: Option<bool>,
    pub rerank_mode: Option<RerankMode>,
    pub rerank_top_k: Option<u32>,
}

/// Async client for the vector-store RAG service.
#[derive(Debug, Clone)]
pub struct RetrievalClient {
    http: reqwest::Client,
    settings: RetrievalSettings,
}

impl RetrievalClient {
    pub fn new(settings: RetrievalSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_default();
        Self { http, settings }
    }

    fn effective_top_k(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.settings.top_k)
    }

    /// Fetch documents for a query, most relevant first.
    pub async fn retrieve(&self, query: &str, opts: RetrieveOptions) -> Result<Vec<Document>> {
        let top_k = self.effective_top_k(opts.top_k);
        let use_rerank = opts.use_rerank.unwrap_or(self.settings.use_rerank);
        let rerank_mode = opts.rerank_mode.unwrap_or(self.settings.rerank_mode);
        let rerank_top_k = opts
            .rerank_top_k
            .or(self.settings.rerank_top_k)
            .unwrap_or(top_k);

        let mut payload = json!({
            "query": query,
            "k": top_k,
            "use_rerank": use_rerank,
            "rerank_mode": rerank_mode,
        });
        if use_rerank {
            payload["rerank_top_k"] = json!(rerank_top_k);
        }

        info!(url = %self.settings.url, %payload, "retrieval request");

        let response = self
            .http
            .post(&self.settings.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Retrieval("retrieval request timed out".into())
                } else {
                    Error::Retrieval(format!("retrieval request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Retrieval(format!(
                "retrieval service returned {status}: {body}"
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Retrieval(format!("malformed retrieval response: {e}")))?;

        let documents = parse_documents(&data);
        info!(count = documents.len(), "retrieval response");
        Ok(documents)
    }
}

/// Normalize a retrieval payload into ordered documents.
///
/// Accepts either a bare array or `{"results": [...]}`. Entries with no
/// usable content are dropped. Score preference: `combined_score`, then
/// `rerank_score`, then `score`.
pub fn parse_documents(data: &Value) -> Vec<Document> {
    let items = match data {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("results")
            .and_then(Value::as_array)
            .map(|v| v.as_slice())
            .unwrap_or(&[]),
        _ => &[],
    };

    let mut documents: Vec<Document> = items
        .iter()
        .filter_map(|item| {
            let content = item
                .get("text")
                .or_else(|| item.get("name"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())?;
            let score = ["combined_score", "rerank_score", "score"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_f64))
                .unwrap_or(0.0);
            Some(Document {
                id: maybe_string(item.get("id")),
                title: maybe_string(item.get("name")),
                content: content.to_string(),
                score,
            })
        })
        .collect();

    // Stable: ties keep upstream order.
    documents.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    documents
}

fn maybe_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let data = json!([
            {"id": "a", "name": "Doc A", "text": "tofu curry", "score": 0.5},
            {"id": "b", "name": "Doc B", "text": "lentil soup", "score": 0.9},
        ]);
        let docs = parse_documents(&data);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id.as_deref(), Some("b"));
        assert_eq!(docs[1].content, "tofu curry");
    }

    #[test]
    fn parses_results_object() {
        let data = json!({"results": [{"text": "chickpea stew", "score": 0.4}]});
        let docs = parse_documents(&data);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].score, 0.4);
        assert!(docs[0].id.is_none());
    }

    #[test]
    fn prefers_combined_then_rerank_then_plain_score() {
        let data = json!([
            {"text": "a", "combined_score": 0.7, "rerank_score": 0.1, "score": 0.2},
            {"text": "b", "rerank_score": 0.6, "score": 0.3},
            {"text": "c", "score": 0.5},
        ]);
        let docs = parse_documents(&data);
        assert_eq!(docs[0].score, 0.7);
        assert_eq!(docs[1].score, 0.6);
        assert_eq!(docs[2].score, 0.5);
    }

    #[test]
    fn drops_entries_without_content() {
        let data = json!([
            {"text": "   ", "score": 0.9},
            {"score": 0.8},
            {"text": "kept", "score": 0.1},
        ]);
        let docs = parse_documents(&data);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "kept");
    }

    #[test]
    fn sorts_descending_and_keeps_tie_order() {
        let data = json!([
            {"id": "low", "text": "x", "score": 0.1},
            {"id": "tie-1", "text": "y", "score": 0.8},
            {"id": "tie-2", "text": "z", "score": 0.8},
        ]);
        let docs = parse_documents(&data);
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["tie-1", "tie-2", "low"]);
    }

    #[test]
    fn numeric_id_is_stringified() {
        let data = json!([{"id": 42, "text": "numbered", "score": 0.2}]);
        let docs = parse_documents(&data);
        assert_eq!(docs[0].id.as_deref(), Some("42"));
    }

    #[test]
    fn non_list_payload_yields_nothing() {
        assert!(parse_documents(&json!("oops")).is_empty());
        assert!(parse_documents(&json!({"other": []})).is_empty());
    }
}
