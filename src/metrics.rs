//! Metric name definitions.
//!
//! Counters are emitted through the `metrics` facade. Without an installed
//! recorder they are no-ops, so nothing here requires an exporter.

/// Session router metrics
pub mod router {
    /// Messages successfully routed and published
    pub const MESSAGES_ROUTED_TOTAL: &str = "chat_relay_messages_routed_total";
    /// Messages dropped, labelled by `kind`
    pub const MESSAGES_DROPPED_TOTAL: &str = "chat_relay_messages_dropped_total";
    /// Remote conversations created for new senders
    pub const SESSIONS_CREATED_TOTAL: &str = "chat_relay_sessions_created_total";
}

/// Processor registry metrics
pub mod registry {
    /// Manifest entries skipped because they could not be resolved
    pub const ENTRIES_SKIPPED_TOTAL: &str = "chat_relay_registry_entries_skipped_total";
}

/// Task bus metrics
pub mod bus {
    /// Tasks that faulted inside a worker, labelled by `worker`
    pub const WORKER_FAULTS_TOTAL: &str = "chat_relay_bus_worker_faults_total";
}

/// Ingress metrics
pub mod ingress {
    /// Requests rejected at validation, labelled by `route`
    pub const REJECTED_TOTAL: &str = "chat_relay_ingress_rejected_total";
}
