//! Pluggable background processors.
//!
//! Every processor exposes the same surface: take a content string, return a
//! structured response, release held resources on shutdown. Consumers look
//! processors up by name in [`crate::registry::Processors`] and never branch
//! on their concrete type.

mod dialogue;
mod memory;

pub use dialogue::DialogueProcessor;
pub use memory::MemoryProcessor;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProcessorError;

/// Structured response returned by [`Processor::handle`].
pub type ProcessorOutput = Value;

#[async_trait]
pub trait Processor: Send + Sync {
    /// Registry key (e.g. "memory").
    fn name(&self) -> &str;

    async fn handle(&self, content: &str) -> Result<ProcessorOutput, ProcessorError>;

    /// Release workers, connections and the like. Safe to call twice.
    async fn release(&self) -> Result<(), ProcessorError>;
}
