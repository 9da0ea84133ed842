//! Priority task queue with an append-only journal
//!
//! The queue is the only component allowed to change task status.
//! Every creation and transition is appended to a JSONL journal; on
//! restart the journal is replayed and any non-terminal task returns to
//! PENDING (workers are idempotent against the page cache, so re-running
//! them refetches nothing already stored).

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revline_core::{Paper, is_shutdown_requested};

use crate::task::{SearchTask, TaskError, TaskStatus};

const JOURNAL_FILE: &str = "task_journal.jsonl";

#[derive(Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JournalEvent {
    Created {
        task: SearchTask,
    },
    Transition {
        task_id: String,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
        at: DateTime<Utc>,
    },
}

struct Inner {
    tasks: BTreeMap<String, SearchTask>,
    /// Task ids in PENDING; claim order is (priority, created_at, id)
    pending: BTreeSet<String>,
    /// RUNNING tasks whose cancellation was requested
    cancel_requested: BTreeSet<String>,
    journal: Option<BufWriter<File>>,
}

impl Inner {
    fn append(&mut self, event: &JournalEvent) {
        if let Some(journal) = self.journal.as_mut() {
            let write = serde_json::to_string(event)
                .map_err(io::Error::other)
                .and_then(|line| {
                    journal.write_all(line.as_bytes())?;
                    journal.write_all(b"\n")?;
                    journal.flush()
                });
            if let Err(e) = write {
                // In-memory state stays authoritative for this run
                log::error!("journal append failed: {e}");
            }
        }
    }

    fn transition(&mut self, task_id: &str, status: TaskStatus, error: Option<TaskError>) {
        self.append(&JournalEvent::Transition {
            task_id: task_id.to_string(),
            status,
            error,
            at: Utc::now(),
        });
    }
}

/// Shared, journal-backed task queue.
pub struct TaskQueue {
    inner: Mutex<Inner>,
}

impl TaskQueue {
    /// In-memory queue without persistence (tests, one-shot runs).
    pub fn ephemeral() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: BTreeMap::new(),
                pending: BTreeSet::new(),
                cancel_requested: BTreeSet::new(),
                journal: None,
            }),
        }
    }

    /// Open a queue journaled under `dir`, replaying any prior state.
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let mut tasks = BTreeMap::new();
        if path.exists() {
            replay(&path, &mut tasks)?;
        }

        let mut pending = BTreeSet::new();
        for task in tasks.values_mut() {
            if !task.status.is_terminal() {
                // Crash recovery: RUNNING goes back to PENDING
                task.status = TaskStatus::Pending;
                task.started_at = None;
                pending.insert(task.task_id.clone());
            }
        }
        if !tasks.is_empty() {
            log::info!(
                "restored {} tasks from journal ({} pending)",
                tasks.len(),
                pending.len()
            );
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                tasks,
                pending,
                cancel_requested: BTreeSet::new(),
                journal: Some(BufWriter::new(file)),
            }),
        })
    }

    /// Add a task in PENDING. Returns its id.
    pub fn enqueue(&self, task: SearchTask) -> String {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let task_id = task.task_id.clone();
        log::info!(
            "enqueued task {}: {} query={:?} priority={}",
            task.short_id(),
            task.source,
            truncate(&task.query, 50),
            task.priority
        );
        inner.append(&JournalEvent::Created { task: task.clone() });
        inner.pending.insert(task_id.clone());
        inner.tasks.insert(task_id.clone(), task);
        task_id
    }

    /// Atomically claim the highest-priority PENDING task (lowest
    /// priority number, FIFO tie-break) and mark it RUNNING.
    ///
    /// Returns `None` when no PENDING task remains — tasks never move
    /// back to PENDING within a run, so workers drain and exit.
    pub fn claim_next(&self) -> Option<SearchTask> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if is_shutdown_requested() {
            return None;
        }
        let best = inner
            .pending
            .iter()
            .min_by_key(|id| {
                let task = &inner.tasks[*id];
                (task.priority, task.created_at, task.task_id.clone())
            })?
            .clone();
        inner.pending.remove(&best);
        let task = inner.tasks.get_mut(&best).expect("pending id without task");
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let snapshot = task.clone();
        inner.transition(&best, TaskStatus::Running, None);
        Some(snapshot)
    }

    /// Record the cache key once the worker registered the query.
    pub fn set_query_id(&self, task_id: &str, query_id: &str) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.query_id = Some(query_id.to_string());
        }
    }

    /// Update live counters for status displays.
    pub fn update_progress(&self, task_id: &str, pages_fetched: u32, papers_fetched: usize) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.pages_fetched = pages_fetched;
            task.papers_fetched = papers_fetched;
        }
    }

    /// Terminal transition: COMPLETED with results.
    pub fn complete(&self, task_id: &str, papers: Vec<Paper>) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.cancel_requested.remove(task_id);
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Completed;
        task.finished_at = Some(Utc::now());
        task.papers_fetched = papers.len();
        task.papers = papers;
        task.error = None;
        let short = task.short_id().to_string();
        let count = task.papers_fetched;
        inner.transition(task_id, TaskStatus::Completed, None);
        log::info!("task {short} completed: {count} papers");
    }

    /// Terminal transition: FAILED with its error descriptor.
    pub fn fail(&self, task_id: &str, error: TaskError) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.cancel_requested.remove(task_id);
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Failed;
        task.finished_at = Some(Utc::now());
        task.attempts = error.attempts;
        task.error = Some(error.clone());
        let short = task.short_id().to_string();
        inner.transition(task_id, TaskStatus::Failed, Some(error.clone()));
        log::error!(
            "task {short} failed after {} attempts: {}",
            error.attempts,
            error.message
        );
    }

    /// Request cancellation. PENDING tasks terminate immediately;
    /// RUNNING tasks get a flag the worker observes between pages.
    pub fn cancel(&self, task_id: &str) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        match task.status {
            TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(Utc::now());
                let short = task.short_id().to_string();
                inner.pending.remove(task_id);
                inner.transition(task_id, TaskStatus::Cancelled, None);
                log::info!("task {short} cancelled");
            }
            TaskStatus::Running => {
                inner.cancel_requested.insert(task_id.to_string());
            }
            _ => {}
        }
    }

    /// Worker-side check between pages.
    pub fn cancel_requested(&self, task_id: &str) -> bool {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.cancel_requested.contains(task_id)
    }

    /// Worker acknowledges a cancel: terminal CANCELLED, cached pages
    /// stay for a future identical query.
    pub fn mark_cancelled(&self, task_id: &str) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.cancel_requested.remove(task_id);
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Cancelled;
        task.finished_at = Some(Utc::now());
        let short = task.short_id().to_string();
        inner.transition(task_id, TaskStatus::Cancelled, None);
        log::info!("task {short} cancelled");
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.tasks.get(task_id).map(|t| t.status)
    }

    pub fn get(&self, task_id: &str) -> Option<SearchTask> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.tasks.get(task_id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<SearchTask> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.tasks.values().cloned().collect()
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<SearchTask> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// Number of PENDING tasks.
    pub fn size(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.pending.len()
    }

    /// True when nothing is pending or running.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner
            .tasks
            .values()
            .all(|t| t.status.is_terminal())
    }

    /// Completed results for a task, if it is COMPLETED.
    pub fn results(&self, task_id: &str) -> Option<Vec<Paper>> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let task = inner.tasks.get(task_id)?;
        if task.status == TaskStatus::Completed {
            Some(task.papers.clone())
        } else {
            None
        }
    }

    /// (pending, running, completed, failed, cancelled)
    pub fn status_counts(&self) -> (usize, usize, usize, usize, usize) {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let mut counts = (0, 0, 0, 0, 0);
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.0 += 1,
                TaskStatus::Running => counts.1 += 1,
                TaskStatus::Completed => counts.2 += 1,
                TaskStatus::Failed => counts.3 += 1,
                TaskStatus::Cancelled => counts.4 += 1,
            }
        }
        counts
    }
}

fn replay(path: &PathBuf, tasks: &mut BTreeMap<String, SearchTask>) -> io::Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEvent>(&line) {
            Ok(JournalEvent::Created { task }) => {
                tasks.insert(task.task_id.clone(), task);
            }
            Ok(JournalEvent::Transition {
                task_id,
                status,
                error,
                at,
            }) => {
                if let Some(task) = tasks.get_mut(&task_id) {
                    task.status = status;
                    task.error = error;
                    if status.is_terminal() {
                        task.finished_at = Some(at);
                    }
                } else {
                    log::warn!("journal line {}: transition for unknown task", line_no + 1);
                }
            }
            Err(e) => {
                // A torn final line after a crash is expected; anything
                // else is worth surfacing
                log::warn!("journal line {} unreadable: {e}", line_no + 1);
            }
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
