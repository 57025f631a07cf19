use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{Processor, ProcessorOutput};
use crate::bus::{EchoSearch, JournalWriter, Task, TaskBus};
use crate::context::AppContext;
use crate::error::ProcessorError;

/// Memory recall and persistence, offloaded to the task bus.
///
/// `handle` stores the content through the write worker and returns whatever
/// the search worker recalls for it.
pub struct MemoryProcessor {
    bus: TaskBus,
}

impl MemoryProcessor {
    pub const NAME: &'static str = "memory";

    pub fn new(ctx: &AppContext) -> Self {
        let journal = ctx.config.memory.journal_path.clone();
        Self::with_bus(TaskBus::spawn(
            Arc::new(EchoSearch),
            Arc::new(JournalWriter::new(journal)),
            ctx.cancel.child_token(),
        ))
    }

    pub fn with_bus(bus: TaskBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Processor for MemoryProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, content: &str) -> Result<ProcessorOutput, ProcessorError> {
        if content.trim().is_empty() {
            return Err(ProcessorError::InvalidInput {
                name: Self::NAME.to_string(),
                reason: "content is empty".to_string(),
            });
        }

        let task = Task::new(content).with_metadata("timestamp", chrono::Utc::now().timestamp());
        let result = self.bus.submit(task).await?;
        debug!(task_id = %result.task_id, "Memory recall complete");

        Ok(json!({
            "task_id": result.task_id,
            "result": result.output,
        }))
    }

    async fn release(&self) -> Result<(), ProcessorError> {
        self.bus.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use tokio_util::sync::CancellationToken;

    fn processor() -> MemoryProcessor {
        MemoryProcessor::with_bus(TaskBus::spawn(
            Arc::new(EchoSearch),
            Arc::new(JournalWriter::new(None)),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn handle_returns_search_result() {
        let memory = processor();
        let out = memory.handle("hello").await.unwrap();
        assert_eq!(out["result"], "Search results for: hello");
        memory.release().await.unwrap();
    }

    #[tokio::test]
    async fn handle_after_release_reports_closed_bus() {
        let memory = processor();
        memory.release().await.unwrap();
        memory.release().await.unwrap();

        let err = memory.handle("late").await.unwrap_err();
        assert!(matches!(err, ProcessorError::Bus(BusError::Closed)));
    }

    #[tokio::test]
    async fn journal_gets_timestamp_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let memory = MemoryProcessor::with_bus(TaskBus::spawn(
            Arc::new(EchoSearch),
            Arc::new(JournalWriter::new(Some(path.clone()))),
            CancellationToken::new(),
        ));

        memory.handle("remember me").await.unwrap();
        memory.release().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let entry: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(entry["content"], "remember me");
        assert!(entry["metadata"]["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn empty_content_rejected() {
        let memory = processor();
        assert!(matches!(
            memory.handle("  ").await,
            Err(ProcessorError::InvalidInput { .. })
        ));
        memory.release().await.unwrap();
    }
}
