//! Search task model and status lifecycle
//!
//! Only the queue mutates task status; workers request transitions
//! through it. Terminal states are COMPLETED, FAILED, and CANCELLED.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revline_core::{DateRange, ErrorKind, Paper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What a FAILED task exposes to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKindTag,
    pub message: String,
    /// Adapter attempts made for the failing page
    pub attempts: u32,
    /// Final backoff slept before giving up, if any
    pub last_backoff_ms: Option<u64>,
}

/// Serializable mirror of [`ErrorKind`] for the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKindTag {
    RateLimit,
    Network,
    Api,
    Parse,
    Validation,
    Permanent,
    CircuitOpen,
    Cache,
    Internal,
}

impl From<ErrorKind> for ErrorKindTag {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::RateLimit => Self::RateLimit,
            ErrorKind::Network => Self::Network,
            ErrorKind::Api => Self::Api,
            ErrorKind::Parse => Self::Parse,
            ErrorKind::Validation => Self::Validation,
            ErrorKind::Permanent => Self::Permanent,
            ErrorKind::CircuitOpen => Self::CircuitOpen,
            ErrorKind::Cache => Self::Cache,
            ErrorKind::Internal => Self::Internal,
        }
    }
}

impl From<ErrorKindTag> for ErrorKind {
    fn from(tag: ErrorKindTag) -> Self {
        match tag {
            ErrorKindTag::RateLimit => Self::RateLimit,
            ErrorKindTag::Network => Self::Network,
            ErrorKindTag::Api => Self::Api,
            ErrorKindTag::Parse => Self::Parse,
            ErrorKindTag::Validation => Self::Validation,
            ErrorKindTag::Permanent => Self::Permanent,
            ErrorKindTag::CircuitOpen => Self::CircuitOpen,
            ErrorKindTag::Cache => Self::Cache,
            ErrorKindTag::Internal => Self::Internal,
        }
    }
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            attempts,
            last_backoff_ms: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Option<Duration>) -> Self {
        self.last_backoff_ms = backoff.map(|d| d.as_millis() as u64);
        self
    }
}

/// One (source, query, date-range, limit, config) unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTask {
    pub task_id: String,
    pub source: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Lower runs earlier; FIFO on ties
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    pub status: TaskStatus,
    /// Adapter attempts recorded for the last page worked on
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub pages_fetched: u32,
    #[serde(default)]
    pub papers_fetched: usize,
    /// Cache key once registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Accumulated results; not journaled, rebuilt from the cache
    #[serde(skip)]
    pub papers: Vec<Paper>,
}

impl SearchTask {
    pub fn new(
        source: impl Into<String>,
        query: impl Into<String>,
        date_range: Option<DateRange>,
        limit: Option<u32>,
        priority: i32,
        config: BTreeMap<String, String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            task_id: next_task_id(created_at),
            source: source.into(),
            query: query.into(),
            date_range,
            limit,
            priority,
            config,
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
            pages_fetched: 0,
            papers_fetched: 0,
            query_id: None,
            created_at,
            started_at: None,
            finished_at: None,
            papers: Vec::new(),
        }
    }

    /// Short prefix for log lines.
    pub fn short_id(&self) -> &str {
        &self.task_id[..self.task_id.len().min(8)]
    }
}

/// Opaque, unique task id: creation time plus a process-local counter,
/// hashed so ids do not sort by anything meaningful.
fn next_task_id(created_at: DateTime<Utc>) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = format!(
        "{}:{seq}:{}",
        created_at.timestamp_nanos_opt().unwrap_or_default(),
        std::process::id()
    );
    blake3::hash(seed.as_bytes()).to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        let a = SearchTask::new("openalex", "q", None, None, 0, BTreeMap::new());
        let b = SearchTask::new("openalex", "q", None, None, 0, BTreeMap::new());
        assert_ne!(a.task_id, b.task_id);
        assert_eq!(a.task_id.len(), 16);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn journal_roundtrip_skips_papers() {
        let mut task = SearchTask::new("arxiv", "attention", None, Some(5), 2, BTreeMap::new());
        task.papers_fetched = 5;
        let json = serde_json::to_string(&task).unwrap();
        let back: SearchTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, task.task_id);
        assert_eq!(back.papers_fetched, 5);
        assert!(back.papers.is_empty());
    }
}
