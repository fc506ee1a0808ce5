//! SSE token streaming from the chat-completion upstream.
//!
//! The upstream delivers incremental deltas as `data:` lines terminated
//! by a `[DONE]` sentinel. Fragments are yielded in arrival order; the
//! only buffering is the partial line still being read. Dropping the
//! stream drops the upstream connection.

use std::pin::Pin;

use futures::Stream;
use reqwest::Client;
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::debug;

/// Boxed token stream handed to the relay.
pub type TokenStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A single streamed fragment, end-of-stream marker, or error.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done,
    Error(String),
}

/// One parsed SSE line from the upstream byte stream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Parse one line of the upstream SSE framing.
pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
        return SseLine::Skip;
    };
    match parsed["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseLine::Delta(content.to_string()),
        _ => SseLine::Skip,
    }
}

/// Open the streaming request and yield fragments as they arrive.
pub(crate) fn stream_tokens(
    client: Client,
    url: String,
    api_key: String,
    body: Value,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    async_stream::stream! {
        debug!(%url, "opening streaming chat request");

        let response = match client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Upstream request failed: {e}"));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("Upstream error {status}: {body}"));
            return;
        }

        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {e}"));
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Relay every complete line before the next read.
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].to_string();
                buffer = buffer[line_end + 1..].to_string();

                match parse_sse_line(&line) {
                    SseLine::Delta(text) => yield StreamChunk::Token(text),
                    SseLine::Done => {
                        yield StreamChunk::Done;
                        return;
                    }
                    SseLine::Skip => {}
                }
            }
        }

        // Upstream closed without a [DONE] sentinel.
        yield StreamChunk::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta_line(text: &str) -> String {
        format!(
            "data: {}",
            json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    #[test]
    fn parses_delta_content() {
        assert_eq!(
            parse_sse_line(&delta_line("hello")),
            SseLine::Delta("hello".into())
        );
    }

    #[test]
    fn done_sentinel_terminates() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line("data:[DONE]"), SseLine::Done);
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line("   "), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message"), SseLine::Skip);
    }

    #[test]
    fn malformed_json_is_skipped() {
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Skip);
    }

    #[test]
    fn empty_delta_is_skipped() {
        assert_eq!(parse_sse_line(&delta_line("")), SseLine::Skip);
        assert_eq!(
            parse_sse_line("data: {\"choices\": [{\"delta\": {}}]}"),
            SseLine::Skip
        );
    }
}
