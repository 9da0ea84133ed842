//! Aggregate progress counters and optional metrics export
//!
//! In-memory only. Workers bump counters as pages land; the manager's
//! printer thread and the metrics endpoint read snapshots.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use revline_core::ErrorKind;

use crate::queue::TaskQueue;

#[derive(Default)]
struct Counters {
    pages_fetched: u64,
    papers_fetched: u64,
    tasks_finished: u64,
    errors: BTreeMap<ErrorKind, u64>,
    per_source: BTreeMap<String, (u64, u64)>, // (pages, papers)
}

/// Point-in-time view of the run.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub pages_fetched: u64,
    pub papers_fetched: u64,
    pub tasks_finished: u64,
    pub errors: BTreeMap<ErrorKind, u64>,
    pub per_source: BTreeMap<String, (u64, u64)>,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    pub fn papers_per_minute(&self) -> f64 {
        let minutes = self.elapsed.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.papers_fetched as f64 / minutes
        } else {
            0.0
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.errors.values().sum()
    }
}

/// Shared counter hub; updates are cheap and atomic per counter set.
pub struct ProgressTracker {
    started: Instant,
    inner: Mutex<Counters>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(Counters::default()),
        }
    }

    pub fn page_fetched(&self, source: &str, papers: usize) {
        let mut c = self.inner.lock().expect("tracker lock poisoned");
        c.pages_fetched += 1;
        c.papers_fetched += papers as u64;
        let entry = c.per_source.entry(source.to_string()).or_default();
        entry.0 += 1;
        entry.1 += papers as u64;
    }

    pub fn error(&self, kind: ErrorKind) {
        let mut c = self.inner.lock().expect("tracker lock poisoned");
        *c.errors.entry(kind).or_default() += 1;
    }

    pub fn task_finished(&self, _task_id: &str) {
        let mut c = self.inner.lock().expect("tracker lock poisoned");
        c.tasks_finished += 1;
    }

    pub fn stats(&self) -> StatsSnapshot {
        let c = self.inner.lock().expect("tracker lock poisoned");
        StatsSnapshot {
            pages_fetched: c.pages_fetched,
            papers_fetched: c.papers_fetched,
            tasks_finished: c.tasks_finished,
            errors: c.errors.clone(),
            per_source: c.per_source.clone(),
            elapsed: self.started.elapsed(),
        }
    }

    pub fn papers_per_minute(&self) -> f64 {
        self.stats().papers_per_minute()
    }

    /// Render counters in the Prometheus text exposition format.
    pub fn render_metrics(&self, queue: &TaskQueue) -> String {
        let stats = self.stats();
        let mut out = String::new();
        out.push_str(&format!(
            "revline_pages_fetched_total {}\n",
            stats.pages_fetched
        ));
        out.push_str(&format!(
            "revline_papers_fetched_total {}\n",
            stats.papers_fetched
        ));
        for (source, (pages, papers)) in &stats.per_source {
            out.push_str(&format!(
                "revline_source_pages_total{{source=\"{source}\"}} {pages}\n"
            ));
            out.push_str(&format!(
                "revline_source_papers_total{{source=\"{source}\"}} {papers}\n"
            ));
        }
        for kind in ErrorKind::ALL {
            let count = stats.errors.get(&kind).copied().unwrap_or(0);
            out.push_str(&format!(
                "revline_errors_total{{kind=\"{}\"}} {count}\n",
                kind.label()
            ));
        }
        let (pending, running, completed, failed, cancelled) = queue.status_counts();
        for (label, count) in [
            ("pending", pending),
            ("running", running),
            ("completed", completed),
            ("failed", failed),
            ("cancelled", cancelled),
        ] {
            out.push_str(&format!(
                "revline_tasks{{status=\"{label}\"}} {count}\n"
            ));
        }
        out.push_str(&format!(
            "revline_papers_per_minute {:.2}\n",
            stats.papers_per_minute()
        ));
        out
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
