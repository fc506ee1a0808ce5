//! Chat-completion upstream client.

use serde_json::{json, Value};
use tracing::{info, warn};

use ladle_core::{Error, Result, Settings};
use ladle_prompt::{build_rewriter_messages, extract_rewrite, ChatMessage};

use crate::stream::{stream_tokens, StreamChunk, TokenStream};
use crate::types::Usage;

/// Client for the OpenAI-compatible chat-completions upstream.
///
/// Holds two HTTP clients: one bounded by the configured timeout for
/// batched calls, and one with only a connect timeout for streaming,
/// where a total deadline would sever long generations.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    settings: Settings,
}

impl ChatClient {
    pub fn new(settings: Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.upstream.timeout)
            .build()
            .unwrap_or_default();
        let stream_http = reqwest::Client::builder()
            .connect_timeout(settings.upstream.timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            stream_http,
            settings,
        }
    }

    fn completion_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let model = &self.settings.model;
        json!({
            "model": model.model_name,
            "messages": messages,
            "temperature": model.temperature,
            "top_p": model.top_p,
            "max_tokens": model.max_tokens,
            "stream": stream,
        })
    }

    async fn post_completion(&self, body: Value) -> Result<Value> {
        let api_key = self.settings.require_api_key()?;
        let response = self
            .http
            .post(&self.settings.upstream.base_url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Upstream("chat request timed out".into())
                } else {
                    Error::Upstream(format!("chat request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "chat upstream returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("malformed chat response: {e}")))
    }

    /// One blocking completion call; returns the raw upstream payload.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<Value> {
        info!(model = %self.settings.model.model_name, "chat completion request");
        self.post_completion(self.completion_body(messages, false))
            .await
    }

    /// Rewrite a query for retrieval. Any failure falls back to the
    /// original query; this call never fails the request.
    pub async fn rewrite_query(&self, query: &str) -> String {
        let cfg = &self.settings.rewriter;
        if !cfg.enabled {
            return query.to_string();
        }

        let messages = build_rewriter_messages(query);
        let body = json!({
            "model": cfg.model_name,
            "messages": messages,
            "temperature": cfg.temperature,
            "top_p": cfg.top_p,
            "max_tokens": cfg.max_tokens,
            "stream": false,
        });

        let content = match self.post_completion(body).await.and_then(|v| extract_answer(&v)) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "query rewrite failed; using original query");
                return query.to_string();
            }
        };

        match extract_rewrite(&content) {
            Some(rewritten) => {
                info!(original = %query, %rewritten, "query rewritten for retrieval");
                rewritten
            }
            None => {
                warn!("rewrite output had no <rewrite> span; using original query");
                query.to_string()
            }
        }
    }

    /// Open a lazy token stream for the given messages.
    pub fn stream(&self, messages: &[ChatMessage]) -> TokenStream {
        let api_key = match self.settings.require_api_key() {
            Ok(key) => key.to_string(),
            Err(e) => {
                let message = e.to_string();
                return Box::pin(async_stream::stream! {
                    yield StreamChunk::Error(message);
                });
            }
        };
        Box::pin(stream_tokens(
            self.stream_http.clone(),
            self.settings.upstream.base_url.clone(),
            api_key,
            self.completion_body(messages, true),
        ))
    }

    /// Model name used for completions.
    pub fn model_name(&self) -> &str {
        &self.settings.model.model_name
    }
}

/// Extract the assistant message text from an upstream payload.
pub fn extract_answer(raw: &Value) -> Result<String> {
    let content = raw["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(Error::Upstream(
            "chat upstream returned no message content".into(),
        ));
    }
    Ok(content.to_string())
}

/// Normalize upstream usage stats, when present.
pub fn extract_usage(raw: &Value) -> Option<Usage> {
    let usage = raw.get("usage")?;
    if usage.is_null() {
        return None;
    }
    serde_json::from_value(usage.clone()).ok()
}
