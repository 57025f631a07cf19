//! Task handlers run by the bus workers.
//!
//! Handlers are synchronous: they run on the blocking pool and may do slow
//! I/O without stalling the async runtime.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::info;

use super::task::Task;

/// Work performed for one queue.
pub trait TaskHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Handle a task. `Ok(None)` acknowledges without producing output.
    fn handle(&self, task: &Task) -> anyhow::Result<Option<String>>;
}

/// Search worker that echoes the query back as its result.
pub struct EchoSearch;

impl TaskHandler for EchoSearch {
    fn name(&self) -> &str {
        "echo_search"
    }

    fn handle(&self, task: &Task) -> anyhow::Result<Option<String>> {
        info!(task_id = %task.id, content = %task.content, "Search worker processing task");
        Ok(Some(format!("Search results for: {}", task.content)))
    }
}

/// Write worker that appends each task to a JSON-lines journal.
pub struct JournalWriter {
    path: Option<PathBuf>,
}

impl JournalWriter {
    /// Without a path the writer only logs.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl TaskHandler for JournalWriter {
    fn name(&self) -> &str {
        "journal_writer"
    }

    fn handle(&self, task: &Task) -> anyhow::Result<Option<String>> {
        let Some(path) = &self.path else {
            info!(task_id = %task.id, content = %task.content, "Write worker processed task (no journal)");
            return Ok(None);
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::json!({
            "id": task.id,
            "content": task.content,
            "metadata": task.metadata,
            "written_at": chrono::Utc::now().to_rfc3339(),
        });
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;

        info!(task_id = %task.id, path = %path.display(), "Task written to journal");
        Ok(None)
    }
}
