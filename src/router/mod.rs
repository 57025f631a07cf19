//! Session router: the dialogue core.
//!
//! Drains the inbound queue in order. For each message it resolves (or
//! provisions) the sender's remote conversation, forwards the content to the
//! RAG backend and publishes the response on the sender's topic. Failures are
//! logged, counted and the message is dropped; nothing here terminates the
//! loop.

mod session;

use std::future::Future;
use std::sync::{Arc, OnceLock};

use metrics::counter;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChatDefaults, SessionConfig};
use crate::error::{RouteError, TransportError};
use crate::message::Message;
use crate::metrics::router as router_metrics;
use crate::processors::Processor;
use crate::publish::Publisher;
use crate::rag::{ChatRequest, CreateConversation, RagBackend};
use session::SessionTable;

/// Items on the inbound queue.
#[derive(Debug, Clone)]
pub enum Inbound {
    Message(Message),
    /// Stop the router loop.
    Shutdown,
}

pub type InboundSender = mpsc::UnboundedSender<Inbound>;
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}

pub struct SessionRouter {
    rag: Arc<dyn RagBackend>,
    publisher: Arc<dyn Publisher>,
    chat: ChatDefaults,
    session: SessionConfig,
    sessions: SessionTable,
    cancel: CancellationToken,
    /// Optional memory processor fed with every routed message.
    memory: OnceLock<Arc<dyn Processor>>,
    /// In-flight memory feeds, awaited by [`SessionRouter::drain_memory`].
    memory_tasks: Mutex<JoinSet<()>>,
}

impl SessionRouter {
    pub fn new(
        rag: Arc<dyn RagBackend>,
        publisher: Arc<dyn Publisher>,
        chat: ChatDefaults,
        session: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rag,
            publisher,
            chat,
            session,
            sessions: SessionTable::default(),
            cancel,
            memory: OnceLock::new(),
            memory_tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Attach the memory processor. Only the first call has any effect.
    pub fn attach_memory(&self, memory: Arc<dyn Processor>) {
        if self.memory.set(memory).is_err() {
            warn!("Memory processor already attached, ignoring");
        }
    }

    /// Drain the inbound queue until the shutdown sentinel, a closed channel
    /// or cancellation.
    pub async fn run(&self, mut inbound: InboundReceiver) {
        info!("Session router started");
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Session router cancelled");
                    break;
                }
                item = inbound.recv() => item,
            };

            match item {
                Some(Inbound::Message(message)) => self.route(&message).await,
                Some(Inbound::Shutdown) => {
                    info!("Session router received shutdown");
                    break;
                }
                None => {
                    info!("Inbound queue closed");
                    break;
                }
            }
        }
    }

    /// Route one message. Never fails: errors are logged and counted.
    pub async fn route(&self, message: &Message) {
        match self.try_route(message).await {
            Ok(_) => {
                counter!(router_metrics::MESSAGES_ROUTED_TOTAL).increment(1);
            }
            Err(e) => {
                error!(
                    sender_id = message.sender_id(),
                    message_type = %message.message_type(),
                    error = %e,
                    "Message dropped"
                );
                counter!(router_metrics::MESSAGES_DROPPED_TOTAL, "kind" => e.kind()).increment(1);
            }
        }
    }

    /// Route one message and return the backend's chat response.
    pub async fn try_route(&self, message: &Message) -> Result<Value, RouteError> {
        let sender_id = message.sender_id();
        let text = message.chat_text();
        self.feed_memory(&text).await;

        let conversation_id = self.resolve_session(sender_id).await?;
        debug!(sender_id, conversation_id, message_type = %message.message_type(), "Forwarding message");

        let request = ChatRequest::new(conversation_id, text, &self.chat);
        let response = self.guarded(self.rag.post_chat(request)).await?;

        let payload = serde_json::to_string(&response)?;
        self.guarded(self.publisher.publish(&sender_id.to_string(), payload))
            .await?;

        info!(sender_id, conversation_id, "Response published");
        Ok(response)
    }

    /// Number of senders with a mapped conversation.
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn conversation_for(&self, sender_id: i64) -> Option<i64> {
        self.sessions.get(sender_id).await
    }

    async fn resolve_session(&self, sender_id: i64) -> Result<i64, RouteError> {
        if let Some(id) = self.sessions.get(sender_id).await {
            return Ok(id);
        }

        let allocation = self.sessions.begin_allocation().await;
        if let Some(id) = allocation.existing(sender_id).await {
            return Ok(id);
        }

        let highest = self.guarded(self.rag.highest_conversation_id()).await?;
        let allocated = allocation.next_id(highest);
        let request = CreateConversation::new(self.session.title_for(allocated), &self.session);
        let echoed = self.guarded(self.rag.create_conversation(request)).await?;

        let conversation_id = match echoed {
            Some(id) if id != allocated => {
                warn!(
                    sender_id,
                    allocated,
                    echoed = id,
                    "Backend assigned a different conversation id, using it"
                );
                id
            }
            _ => allocated,
        };

        allocation.commit(sender_id, conversation_id).await;
        counter!(router_metrics::SESSIONS_CREATED_TOTAL).increment(1);
        info!(sender_id, conversation_id, "Session created");
        Ok(conversation_id)
    }

    /// Wait for every memory feed still in flight. Call before the memory
    /// processor is released.
    pub async fn drain_memory(&self) {
        let mut tasks = std::mem::take(&mut *self.memory_tasks.lock().await);
        if !tasks.is_empty() {
            debug!(in_flight = tasks.len(), "Draining memory feeds");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Memory feed task ended abnormally");
            }
        }
    }

    async fn feed_memory(&self, text: &str) {
        let Some(memory) = self.memory.get() else {
            return;
        };
        let memory = Arc::clone(memory);
        let text = text.to_string();

        let mut tasks = self.memory_tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            match memory.handle(&text).await {
                Ok(recall) => debug!(recall = %recall, "Memory recall"),
                Err(e) => warn!(error = %e, "Memory processor failed"),
            }
        });
    }

    /// Race a backend call against cancellation.
    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, RouteError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RouteError::Cancelled),
            result = call => result.map_err(RouteError::from),
        }
    }
}
