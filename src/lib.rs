//! Chat relay: routes inbound chat messages to a RAG backend and publishes
//! the responses per sender.

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod ingress;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod processors;
pub mod publish;
pub mod rag;
pub mod registry;
pub mod router;
