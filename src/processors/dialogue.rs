use std::sync::Arc;

use async_trait::async_trait;

use super::{Processor, ProcessorOutput};
use crate::error::ProcessorError;
use crate::message::{Message, WireMessage};
use crate::router::SessionRouter;

/// Routes a JSON wire message through the session router and returns the
/// backend's chat response.
pub struct DialogueProcessor {
    router: Arc<SessionRouter>,
}

impl DialogueProcessor {
    pub const NAME: &'static str = "dialogue";

    pub fn new(router: Arc<SessionRouter>) -> Self {
        Self { router }
    }

    fn invalid(reason: impl ToString) -> ProcessorError {
        ProcessorError::InvalidInput {
            name: Self::NAME.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Processor for DialogueProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, content: &str) -> Result<ProcessorOutput, ProcessorError> {
        let wire: WireMessage = serde_json::from_str(content).map_err(Self::invalid)?;
        let message = Message::from_wire(wire).map_err(Self::invalid)?;
        Ok(self.router.try_route(&message).await?)
    }

    async fn release(&self) -> Result<(), ProcessorError> {
        Ok(())
    }
}
