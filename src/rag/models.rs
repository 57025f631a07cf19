//! Request/response bodies for the RAG backend's HTTP contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ChatDefaults, SessionConfig};

/// `POST /api/chat/conversation_chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: i64,
    pub message: String,
    pub use_memory: bool,
    pub use_knowledge: bool,
    /// Defaults to the message text.
    pub knowledge_query: String,
    pub knowledge_limit: u32,
    pub use_web_search: bool,
    /// Defaults to the message text.
    pub web_search_query: String,
    pub web_search_limit: u32,
    pub conversation_files: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(conversation_id: i64, message: impl Into<String>, defaults: &ChatDefaults) -> Self {
        let message = message.into();
        Self {
            conversation_id,
            knowledge_query: message.clone(),
            web_search_query: message.clone(),
            message,
            use_memory: defaults.use_memory,
            use_knowledge: defaults.use_knowledge,
            knowledge_limit: defaults.knowledge_limit,
            use_web_search: defaults.use_web_search,
            web_search_limit: defaults.web_search_limit,
            conversation_files: Vec::new(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }
}

/// `POST /api/conversation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateConversation {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub settings: serde_json::Map<String, Value>,
    pub files: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CreateConversation {
    pub fn new(title: impl Into<String>, session: &SessionConfig) -> Self {
        Self {
            title: title.into(),
            description: None,
            settings: serde_json::Map::new(),
            files: Vec::new(),
            temperature: session.temperature,
            max_tokens: session.max_tokens,
        }
    }
}

/// Query string for `GET /api/conversation/conversations`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConversationPage {
    pub page: u32,
    pub page_size: u32,
}

impl ConversationPage {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size,
        }
    }
}

/// Pull the conversation ids out of a listing body.
///
/// The backend may answer with a bare array or wrap it in `items`,
/// `conversations` or `data`. Entries without an integer `id` are ignored.
/// Returns `None` if the body has no recognisable list.
pub fn conversation_ids(body: &Value) -> Option<Vec<i64>> {
    let list = match body {
        Value::Array(items) => items,
        Value::Object(map) => ["items", "conversations", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))?,
        _ => return None,
    };
    Some(
        list.iter()
            .filter_map(|entry| entry.get("id").and_then(Value::as_i64))
            .collect(),
    )
}

/// Id echoed back by `POST /api/conversation`, at the top level or under
/// `data`.
pub fn created_id(body: &Value) -> Option<i64> {
    body.get("id")
        .and_then(Value::as_i64)
        .or_else(|| body.get("data")?.get("id")?.as_i64())
}
