//! Chat relay — retrieval, grounded prompting, and batched or streamed
//! generation over one `POST /chat` endpoint.
//!
//! Request lifecycle: validate, rewrite (best-effort), retrieve, prompt,
//! generate. Retrieval must finish before generation starts; each request
//! makes at most one retrieval call and one chat call.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use ladle_chat::{
    extract_answer, extract_usage, ChatRequest, ChatResponse, StreamChunk, StreamEvent,
    TokenStream,
};
use ladle_core::config::MAX_TOP_K;
use ladle_core::Error;
use ladle_prompt::build_messages;
use ladle_retrieval::{Document, RetrieveOptions};

use crate::state::AppState;

type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// Maps the error taxonomy onto HTTP statuses for batched responses.
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Retrieval(_) | Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

fn check_range(field: &str, value: Option<u32>) -> Result<(), Error> {
    if let Some(v) = value {
        if v == 0 || v > MAX_TOP_K {
            return Err(Error::Validation(format!(
                "{field} must be between 1 and {MAX_TOP_K}, got {v}"
            )));
        }
    }
    Ok(())
}

/// Reject bad requests before any upstream call is made.
fn validate(req: &ChatRequest) -> Result<(), Error> {
    if req.query.trim().is_empty() {
        return Err(Error::Validation("query must not be empty".into()));
    }
    check_range("top_k", req.top_k)?;
    check_range("rerank_top_k", req.rerank_top_k)?;
    Ok(())
}

async fn chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    info!(
        query = %req.query,
        stream = req.stream,
        top_k = ?req.top_k,
        use_rerank = ?req.use_rerank,
        rerank_mode = ?req.rerank_mode,
        "incoming /chat"
    );

    if let Err(e) = validate(&req) {
        return ApiError(e).into_response();
    }

    // The rewritten query feeds retrieval only; the prompt and response
    // always carry the caller's original query.
    let retrieval_query = state.chat.rewrite_query(&req.query).await;

    let opts = RetrieveOptions {
        top_k: req.top_k,
        use_rerank: req.use_rerank,
        rerank_mode: req.rerank_mode,
        rerank_top_k: req.rerank_top_k,
    };

    let mut documents = match state.retriever.retrieve(&retrieval_query, opts).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!(error = %e, "retrieval failed");
            if req.stream {
                return failed_stream(e.to_string()).into_response();
            }
            return ApiError(e).into_response();
        }
    };

    let keep = req.top_k.unwrap_or(state.settings.retrieval.top_k) as usize;
    documents.truncate(keep);
    info!(count = documents.len(), "documents after trim");

    // Zero documents proceed ungrounded; the prompt instructs the model
    // to say it does not know.
    let messages = build_messages(&req.query, &documents);

    if req.stream {
        let tokens = state.chat.stream(&messages);
        let model = state.chat.model_name().to_string();
        let events: SseStream =
            Box::pin(relay_events(model, documents, tokens).map(|ev| Ok(to_sse_event(&ev))));
        return Sse::new(events).into_response();
    }

    let raw = match state.chat.chat(&messages).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "chat upstream failed");
            return ApiError(e).into_response();
        }
    };

    let answer = match extract_answer(&raw) {
        Ok(answer) => answer,
        Err(e) => return ApiError(e).into_response(),
    };
    let usage = extract_usage(&raw);
    let model = raw
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(state.chat.model_name())
        .to_string();

    Json(ChatResponse {
        answer,
        model,
        usage,
        documents,
        raw_response: raw,
    })
    .into_response()
}

/// Relay upstream fragments as stream events.
///
/// Exactly one `meta` event precedes any `delta`; one `delta` per
/// fragment in arrival order; exactly one terminal event (`end` or
/// `error`). Already-sent deltas are never rolled back. Dropping the
/// returned stream drops the upstream token stream.
fn relay_events(
    model: String,
    documents: Vec<Document>,
    tokens: TokenStream,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        yield StreamEvent::Meta { model, documents };

        let mut tokens = tokens;
        let mut answer = String::new();

        while let Some(chunk) = tokens.next().await {
            match chunk {
                StreamChunk::Token(text) => {
                    answer.push_str(&text);
                    yield StreamEvent::Delta { text };
                }
                StreamChunk::Done => {
                    yield StreamEvent::End { answer: answer.trim().to_string() };
                    return;
                }
                StreamChunk::Error(message) => {
                    yield StreamEvent::Error { message };
                    return;
                }
            }
        }

        // Token stream ended without a terminal chunk.
        yield StreamEvent::End { answer: answer.trim().to_string() };
    }
}

fn to_sse_event(event: &StreamEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.name()).data(data)
}

/// Single `error` event for failures before generation starts.
fn failed_stream(message: String) -> Sse<SseStream> {
    let stream: SseStream = Box::pin(async_stream::stream! {
        yield Ok::<_, Infallible>(to_sse_event(&StreamEvent::Error { message }));
    });
    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str, top_k: Option<u32>, rerank_top_k: Option<u32>) -> ChatRequest {
        serde_json::from_value(serde_json::json!({
            "query": query,
            "top_k": top_k,
            "rerank_top_k": rerank_top_k,
        }))
        .unwrap()
    }

    fn doc(id: &str, score: f64) -> Document {
        Document {
            id: Some(id.into()),
            title: None,
            content: format!("content of {id}"),
            score,
        }
    }

    fn tokens(chunks: Vec<StreamChunk>) -> TokenStream {
        Box::pin(futures::stream::iter(chunks))
    }

    async fn collect(stream: impl Stream<Item = StreamEvent>) -> Vec<StreamEvent> {
        futures::pin_mut!(stream);
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev);
        }
        events
    }

    #[test]
    fn error_taxonomy_maps_to_statuses() {
        let cases = [
            (Error::Validation("v".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::Retrieval("r".into()), StatusCode::BAD_GATEWAY),
            (Error::Upstream("u".into()), StatusCode::BAD_GATEWAY),
            (Error::Config("c".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError(error).into_response().status(), status);
        }
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(matches!(
            validate(&request("   ", None, None)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn zero_and_oversized_top_k_are_rejected() {
        assert!(validate(&request("q", Some(0), None)).is_err());
        assert!(validate(&request("q", Some(51), None)).is_err());
        assert!(validate(&request("q", None, Some(0))).is_err());
        assert!(validate(&request("q", Some(1), Some(50))).is_ok());
        assert!(validate(&request("q", None, None)).is_ok());
    }

    #[tokio::test]
    async fn meta_precedes_deltas_and_end_carries_answer() {
        let stream = relay_events(
            "test-model".into(),
            vec![doc("doc-1", 0.88), doc("doc-2", 0.86)],
            tokens(vec![
                StreamChunk::Token("Use ".into()),
                StreamChunk::Token("tofu.".into()),
                StreamChunk::Done,
            ]),
        );
        let events = collect(stream).await;

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::Meta { model, documents }
            if model == "test-model" && documents.len() == 2));
        assert_eq!(events[1], StreamEvent::Delta { text: "Use ".into() });
        assert_eq!(events[2], StreamEvent::Delta { text: "tofu.".into() });
        assert_eq!(events[3], StreamEvent::End { answer: "Use tofu.".into() });
    }

    #[tokio::test]
    async fn upstream_failure_after_fragments_yields_single_error() {
        // Scenario: upstream fails after three fragments.
        let stream = relay_events(
            "test-model".into(),
            Vec::new(),
            tokens(vec![
                StreamChunk::Token("a".into()),
                StreamChunk::Token("b".into()),
                StreamChunk::Token("c".into()),
                StreamChunk::Error("connection reset".into()),
            ]),
        );
        let events = collect(stream).await;

        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], StreamEvent::Meta { .. }));
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(
                events[i + 1],
                StreamEvent::Delta { text: (*text).into() }
            );
        }
        assert_eq!(
            events[4],
            StreamEvent::Error { message: "connection reset".into() }
        );
    }

    #[tokio::test]
    async fn empty_token_stream_still_ends_cleanly() {
        let stream = relay_events("m".into(), Vec::new(), tokens(Vec::new()));
        let events = collect(stream).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::Meta { .. }));
        assert_eq!(events[1], StreamEvent::End { answer: String::new() });
    }

    #[tokio::test]
    async fn exactly_one_meta_and_one_terminal_event() {
        let stream = relay_events(
            "m".into(),
            Vec::new(),
            tokens(vec![StreamChunk::Token("x".into()), StreamChunk::Done]),
        );
        let events = collect(stream).await;

        let metas = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Meta { .. }))
            .count();
        let terminals = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::End { .. } | StreamEvent::Error { .. }))
            .count();
        assert_eq!(metas, 1);
        assert_eq!(terminals, 1);
        assert!(matches!(events.first(), Some(StreamEvent::Meta { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::End { .. })));
    }
}
