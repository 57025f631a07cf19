use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use chat_relay::config::AppConfig;
use chat_relay::context::AppContext;
use chat_relay::ingress::ingress_routes;
use chat_relay::publish::{PublishHub, subscribe_routes};
use chat_relay::rag::RagClient;
use chat_relay::registry::{Manifest, ProcessorRegistry};
use chat_relay::router::{Inbound, inbound_channel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    let _log_guard = chat_relay::logging::init(&config.logging)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    eprintln!("📨 Chat Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   RAG backend: {}", config.rag.base_url);
    eprintln!("   Ingress: http://{}/message/{{text,image,voice,file}}", addr);
    eprintln!("   Subscribe: ws://{}/ws/{{sender_id}}", addr);
    eprintln!("   Registry: {}", config.registry.manifest_path.display());

    let cancel = CancellationToken::new();

    // ── Context ──────────────────────────────────────────────────────────
    let rag = Arc::new(RagClient::new(&config.rag)?);
    let hub = PublishHub::new(config.publish.backlog_capacity);
    let manifest_path = config.registry.manifest_path.clone();
    let upload_dir = config.server.upload_dir.clone();
    let ctx = AppContext::new(config, rag, hub.clone(), cancel.clone());

    // ── Processors ───────────────────────────────────────────────────────
    let manifest = Manifest::load(&manifest_path)
        .with_context(|| format!("cannot start without a registry manifest ({})", manifest_path.display()))?;
    let processors = ProcessorRegistry::builtin().load(&manifest, &ctx);
    if processors.is_empty() {
        tracing::warn!("No processors loaded");
    }
    eprintln!("   Processors: {}", processors.names().join(", "));

    // ── Router loop ──────────────────────────────────────────────────────
    let (inbound_tx, inbound_rx) = inbound_channel();
    let router_handle = ctx.start_router(&processors, inbound_rx);

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = ingress_routes(inbound_tx.clone(), upload_dir).merge(subscribe_routes(hub));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Chat relay listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down");
                }
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    // ── Drain ────────────────────────────────────────────────────────────
    if let Some(handle) = router_handle {
        let _ = inbound_tx.send(Inbound::Shutdown);
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Router task ended abnormally");
        }
    }
    ctx.router.drain_memory().await;
    processors.release_all().await;
    cancel.cancel();

    tracing::info!("Chat relay stopped");
    Ok(())
}
