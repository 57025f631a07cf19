//! Application context: everything built once at startup.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::processors::{DialogueProcessor, MemoryProcessor};
use crate::publish::Publisher;
use crate::rag::RagBackend;
use crate::registry::Processors;
use crate::router::{InboundReceiver, SessionRouter};

/// Shared handles passed by reference to the registry factories and the
/// server. Tests build one around fakes.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub rag: Arc<dyn RagBackend>,
    pub publisher: Arc<dyn Publisher>,
    pub router: Arc<SessionRouter>,
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        rag: Arc<dyn RagBackend>,
        publisher: Arc<dyn Publisher>,
        cancel: CancellationToken,
    ) -> Self {
        let router = Arc::new(SessionRouter::new(
            Arc::clone(&rag),
            Arc::clone(&publisher),
            config.chat.clone(),
            config.session.clone(),
            cancel.child_token(),
        ));
        Self {
            config: Arc::new(config),
            rag,
            publisher,
            router,
            cancel,
        }
    }

    /// Start the router loop if the `dialogue` processor was loaded.
    ///
    /// Without it the inbound receiver is dropped, so ingress answers 503
    /// for every message. A loaded `memory` processor is attached first.
    pub fn start_router(
        &self,
        processors: &Processors,
        inbound: InboundReceiver,
    ) -> Option<JoinHandle<()>> {
        if !processors.contains(DialogueProcessor::NAME) {
            warn!("No dialogue processor loaded, inbound messages will be refused");
            return None;
        }
        if let Some(memory) = processors.get(MemoryProcessor::NAME) {
            self.router.attach_memory(memory);
        }

        let router = Arc::clone(&self.router);
        info!("Starting session router");
        Some(tokio::spawn(async move { router.run(inbound).await }))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::message::{ChatType, Message};
    use crate::registry::{Manifest, ProcessorRegistry};
    use crate::router::testing::{FakeRag, RecordingPublisher};
    use crate::router::{Inbound, inbound_channel};

    fn context(rag: Arc<FakeRag>) -> AppContext {
        AppContext::new(
            AppConfig::default(),
            rag,
            Arc::new(RecordingPublisher::default()),
            CancellationToken::new(),
        )
    }

    fn load(ctx: &AppContext, raw: &str) -> Processors {
        let manifest = Manifest::parse(raw, Path::new("registry.yaml")).unwrap();
        ProcessorRegistry::builtin().load(&manifest, ctx)
    }

    #[tokio::test]
    async fn router_is_not_started_without_dialogue() {
        let rag = Arc::new(FakeRag::default());
        let ctx = context(Arc::clone(&rag));
        let processors = load(
            &ctx,
            "modules:\n  base: {}\n  system:\n    memory: { path: processors/memory, enabled: true }\n",
        );
        assert!(processors.contains("memory"));

        let (tx, rx) = inbound_channel();
        assert!(ctx.start_router(&processors, rx).is_none());

        let message = Message::text(1, "tester", ChatType::Private, "hello").unwrap();
        assert!(tx.send(Inbound::Message(message)).is_err());
        assert_eq!(rag.chat_count(), 0);

        processors.release_all().await;
    }

    #[tokio::test]
    async fn router_runs_when_dialogue_is_loaded() {
        let rag = Arc::new(FakeRag::default());
        let ctx = context(Arc::clone(&rag));
        let processors = load(&ctx, "modules:\n  base:\n    dialogue: { path: processors/dialogue }\n");

        let (tx, rx) = inbound_channel();
        let handle = ctx.start_router(&processors, rx).expect("router not started");

        let message = Message::text(1, "tester", ChatType::Private, "hello").unwrap();
        tx.send(Inbound::Message(message)).unwrap();
        tx.send(Inbound::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("router loop did not stop")
            .unwrap();

        assert_eq!(rag.chat_count(), 1);
        processors.release_all().await;
    }
}
