//! Task bus: isolated workers for blocking auxiliary work.
//!
//! Two queues ("search" and "write"), each drained by one long-lived worker.
//! Task bodies run on the blocking pool, so a slow or panicking handler never
//! stalls the routing path. Every submission owns a private reply slot keyed
//! by the task's correlation id, so concurrent callers cannot receive each
//! other's results.

pub mod handlers;
pub mod task;

pub use handlers::{EchoSearch, JournalWriter, TaskHandler};
pub use task::{Task, TaskKind, TaskResult};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::metrics::bus as bus_metrics;
use task::{ReplySlot, WorkItem};

/// Handle to the running workers.
pub struct TaskBus {
    search_tx: mpsc::UnboundedSender<WorkItem>,
    write_tx: mpsc::UnboundedSender<WorkItem>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl TaskBus {
    /// Start one worker per queue. Workers stop on the sentinel or when
    /// `cancel` fires.
    pub fn spawn(
        search: Arc<dyn TaskHandler>,
        write: Arc<dyn TaskHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let (search_tx, search_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let workers = vec![
            tokio::spawn(worker_loop(TaskKind::Search, search, search_rx, cancel.clone())),
            tokio::spawn(worker_loop(TaskKind::Write, write, write_rx, cancel.clone())),
        ];
        info!("Task bus started (search, write)");

        Self {
            search_tx,
            write_tx,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            cancel,
        }
    }

    /// Fan the task out to both queues and wait for the search result.
    pub async fn submit(&self, task: Task) -> Result<TaskResult, BusError> {
        self.ensure_open()?;
        self.enqueue(TaskKind::Write, task.clone(), None)?;
        self.submit_to(TaskKind::Search, task).await
    }

    /// Place the task on a single queue and wait for that worker's result.
    pub async fn submit_to(&self, kind: TaskKind, task: Task) -> Result<TaskResult, BusError> {
        self.ensure_open()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let task_id = task.id;
        self.enqueue(kind, task, Some(reply_tx))?;
        debug!(task_id = %task_id, worker = %kind, "Task submitted");

        tokio::select! {
            result = reply_rx => result.unwrap_or(Err(BusError::Closed)),
            _ = self.cancel.cancelled() => Err(BusError::Closed),
        }
    }

    /// Send the stop sentinel to both workers and wait for them to exit.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.search_tx.send(WorkItem::Stop);
        let _ = self.write_tx.send(WorkItem::Stop);

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Task bus worker ended abnormally");
            }
        }
        info!("Task bus shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    fn enqueue(&self, kind: TaskKind, task: Task, reply: Option<ReplySlot>) -> Result<(), BusError> {
        let tx = match kind {
            TaskKind::Search => &self.search_tx,
            TaskKind::Write => &self.write_tx,
        };
        tx.send(WorkItem::Run { task, reply })
            .map_err(|_| BusError::Closed)
    }
}

/// Drain one queue until the sentinel, a closed channel, or cancellation.
async fn worker_loop(
    kind: TaskKind,
    handler: Arc<dyn TaskHandler>,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    cancel: CancellationToken,
) {
    debug!(worker = %kind, handler = handler.name(), "Worker started");

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(worker = %kind, "Worker cancelled");
                break;
            }
            item = rx.recv() => item,
        };

        let (task, reply) = match item {
            Some(WorkItem::Run { task, reply }) => (task, reply),
            Some(WorkItem::Stop) | None => break,
        };

        let task_id = task.id;
        let job = Arc::clone(&handler);
        let outcome = tokio::task::spawn_blocking(move || job.handle(&task)).await;

        let result = match outcome {
            Ok(Ok(output)) => Ok(TaskResult {
                task_id,
                worker: kind,
                output,
            }),
            Ok(Err(e)) => Err(fault(kind, task_id, e.to_string())),
            Err(join_err) => Err(fault(kind, task_id, join_err.to_string())),
        };

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    debug!(worker = %kind, "Worker stopped");
}

fn fault(kind: TaskKind, task_id: uuid::Uuid, reason: String) -> BusError {
    error!(worker = %kind, task_id = %task_id, reason = %reason, "Worker fault, task dropped");
    counter!(bus_metrics::WORKER_FAULTS_TOTAL, "worker" => kind.to_string()).increment(1);
    BusError::WorkerFault {
        worker: kind.to_string(),
        task_id,
        reason,
    }
}
