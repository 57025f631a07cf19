//! reqwest-backed RAG client.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::config::RagConfig;
use crate::error::TransportError;
use crate::rag::RagBackend;
use crate::rag::models::{
    ChatRequest, ConversationPage, CreateConversation, conversation_ids, created_id,
};

const CHAT_PATH: &str = "/api/chat/conversation_chat";
const CONVERSATION_PATH: &str = "/api/conversation";
const LIST_PATH: &str = "/api/conversation/conversations";

/// HTTP client for the conversational backend.
pub struct RagClient {
    base_url: String,
    api_token: Option<SecretString>,
    page_size: u32,
    max_pages: u32,
    client: reqwest::Client,
}

impl RagClient {
    pub fn new(config: &RagConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TransportError::RequestFailed {
                endpoint: config.base_url.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            page_size: config.list_page_size,
            max_pages: config.max_list_pages.max(1),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Send a request and decode the JSON body, mapping non-2xx to
    /// [`TransportError::Status`].
    async fn send_json(&self, path: &str, request: RequestBuilder) -> Result<Value, TransportError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await.map_err(|e| TransportError::RequestFailed {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::InvalidResponse {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn list_page(&self, page: ConversationPage) -> Result<Vec<i64>, TransportError> {
        let body = self
            .send_json(LIST_PATH, self.client.get(self.url(LIST_PATH)).query(&page))
            .await?;
        conversation_ids(&body).ok_or_else(|| TransportError::InvalidResponse {
            endpoint: LIST_PATH.to_string(),
            reason: "no conversation list in response".to_string(),
        })
    }
}

#[async_trait]
impl RagBackend for RagClient {
    async fn highest_conversation_id(&self) -> Result<i64, TransportError> {
        let mut highest = 0;
        for page in 1..=self.max_pages {
            let ids = self
                .list_page(ConversationPage::new(page, self.page_size))
                .await?;
            highest = ids.iter().copied().fold(highest, i64::max);
            if (ids.len() as u32) < self.page_size {
                return Ok(highest);
            }
        }
        tracing::warn!(
            max_pages = self.max_pages,
            highest,
            "Conversation listing truncated at page limit"
        );
        Ok(highest)
    }

    async fn create_conversation(
        &self,
        request: CreateConversation,
    ) -> Result<Option<i64>, TransportError> {
        let body = self
            .send_json(
                CONVERSATION_PATH,
                self.client.post(self.url(CONVERSATION_PATH)).json(&request),
            )
            .await?;
        Ok(created_id(&body))
    }

    async fn post_chat(&self, request: ChatRequest) -> Result<Value, TransportError> {
        self.send_json(CHAT_PATH, self.client.post(self.url(CHAT_PATH)).json(&request))
            .await
    }
}
