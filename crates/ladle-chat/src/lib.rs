//! Chat upstream client for the ladle RAG relay.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint: one batched
//! call, or a lazy SSE token stream relayed fragment by fragment.

pub mod client;
pub mod stream;
pub mod types;

pub use client::{extract_answer, extract_usage, ChatClient};
pub use stream::{StreamChunk, TokenStream};
pub use types::*;
