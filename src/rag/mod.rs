//! RAG backend contract.
//!
//! The router depends only on [`RagBackend`]; [`RagClient`] is the HTTP
//! implementation and tests substitute in-memory fakes.

mod client;
pub mod models;

pub use client::RagClient;
pub use models::{ChatRequest, CreateConversation};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// Operations the router needs from the conversational backend.
#[async_trait]
pub trait RagBackend: Send + Sync {
    /// Highest conversation id the backend currently knows (0 if none).
    async fn highest_conversation_id(&self) -> Result<i64, TransportError>;

    /// Create a conversation. Returns the id if the backend echoes one.
    async fn create_conversation(
        &self,
        request: CreateConversation,
    ) -> Result<Option<i64>, TransportError>;

    /// Submit one chat turn and return the backend's response body.
    async fn post_chat(&self, request: ChatRequest) -> Result<Value, TransportError>;
}
