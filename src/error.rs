//! Error types for the chat relay.

use uuid::Uuid;

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required file: {path}")]
    MissingFile { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A malformed inbound message. Rejected at ingress, never reaches the router.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("content is empty")]
    EmptyContent,

    #[error("unsupported content type for {field}: {content_type}")]
    UnsupportedContentType { field: String, content_type: String },
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// RAG backend or publish transport unreachable / non-2xx.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Publish to topic {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// A registry manifest entry that cannot be resolved into a processor.
///
/// Always local to one entry: the registry logs it and keeps loading.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No processor {type_name} registered for {name} (path {path})")]
    Unresolved {
        name: String,
        path: String,
        type_name: String,
    },

    #[error("Processor {name} is registered at {expected}, manifest says {path}")]
    PathMismatch {
        name: String,
        path: String,
        expected: String,
    },

    #[error("Malformed manifest entry {tier}.{name}: {reason}")]
    MalformedEntry {
        tier: String,
        name: String,
        reason: String,
    },

    #[error("Failed to construct processor {name}: {reason}")]
    ConstructionFailed { name: String, reason: String },
}

/// Task bus errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Task bus is shut down")]
    Closed,

    #[error("Worker {worker} faulted on task {task_id}: {reason}")]
    WorkerFault {
        worker: String,
        task_id: Uuid,
        reason: String,
    },
}

/// Errors surfaced by a processor's `handle`/`release`.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Invalid input for processor {name}: {reason}")]
    InvalidInput { name: String, reason: String },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Why routing a single message failed. Logged and the message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Routing cancelled")]
    Cancelled,

    #[error("Failed to serialize chat response: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RouteError {
    /// Label used for the per-kind drop counter.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::Transport(_) => "transport",
            RouteError::Cancelled => "cancelled",
            RouteError::Serialization(_) => "serialization",
        }
    }
}

