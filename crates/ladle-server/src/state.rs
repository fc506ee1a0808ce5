//! Shared application state.
//!
//! Everything here is immutable after startup; requests share it through
//! an `Arc` with no locking.

use ladle_chat::ChatClient;
use ladle_core::Settings;
use ladle_retrieval::RetrievalClient;

/// State accessible from all route handlers.
pub struct AppState {
    pub settings: Settings,
    pub retriever: RetrievalClient,
    pub chat: ChatClient,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let retriever = RetrievalClient::new(settings.retrieval.clone());
        let chat = ChatClient::new(settings.clone());
        Self {
            settings,
            retriever,
            chat,
        }
    }
}
