//! Outbound publish transport.
//!
//! Results are published to a topic equal to the sender id's string form.

mod hub;
mod ws;

pub use hub::{Envelope, PublishHub, Subscription};
pub use ws::subscribe_routes;

use async_trait::async_trait;

use crate::error::TransportError;

/// Anything that can deliver a serialized payload to a topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError>;
}
