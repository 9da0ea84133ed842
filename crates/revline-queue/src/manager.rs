//! Queue manager — the public facade over the search pipeline
//!
//! Owns the cache connection, the queue journal, the worker pool, and
//! the shared limiter/breaker registries. Construction opens every
//! resource; results flush on every transition, so dropping the manager
//! (on success or failure paths alike) leaves durable state behind.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;

use revline_cache::SearchCache;
use revline_core::{
    BreakerConfig, BreakerRegistry, DateRange, LimiterRegistry, Paper, ProgressContext,
    SharedProgress, fmt_num,
};
use revline_sources::SourceRegistry;

use crate::queue::TaskQueue;
use crate::task::{SearchTask, TaskStatus};
use crate::tracker::{ProgressTracker, StatsSnapshot};
use crate::worker::{WorkerContext, run_workers};

/// Manager construction parameters.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Worker pool size
    pub workers: usize,
    /// Directory for the cache database and the task journal
    pub cache_dir: PathBuf,
    /// Circuit breaker tuning shared by all sources
    pub breaker: BreakerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            cache_dir: PathBuf::from(".cache/revline"),
            breaker: BreakerConfig::default(),
        }
    }
}

/// One search to enqueue.
#[derive(Debug, Clone, Default)]
pub struct SearchSpec {
    pub source: String,
    pub query: String,
    pub date_range: Option<DateRange>,
    pub limit: Option<u32>,
    pub priority: i32,
    pub config: BTreeMap<String, String>,
}

/// High-level API for running search queues.
pub struct SearchQueueManager {
    workers: usize,
    queue: Arc<TaskQueue>,
    cache: Arc<SearchCache>,
    registry: Arc<SourceRegistry>,
    limiters: Arc<LimiterRegistry>,
    breakers: Arc<BreakerRegistry>,
    tracker: Arc<ProgressTracker>,
    progress: SharedProgress,
}

impl SearchQueueManager {
    /// Open all resources with the built-in source registry.
    pub fn new(config: ManagerConfig) -> anyhow::Result<Self> {
        Self::with_registry(config, SourceRegistry::with_defaults())
    }

    /// Open with a caller-provided registry (stub sources in tests,
    /// extra adapters in embedders).
    pub fn with_registry(
        config: ManagerConfig,
        registry: SourceRegistry,
    ) -> anyhow::Result<Self> {
        let cache = SearchCache::open(&config.cache_dir).with_context(|| {
            format!("cannot open search cache in {}", config.cache_dir.display())
        })?;
        let queue = TaskQueue::open(&config.cache_dir).with_context(|| {
            format!("cannot open task journal in {}", config.cache_dir.display())
        })?;
        log::info!(
            "search queue manager ready: {} workers, cache at {}",
            config.workers,
            config.cache_dir.display()
        );
        Ok(Self {
            workers: config.workers.max(1),
            queue: Arc::new(queue),
            cache: Arc::new(cache),
            registry: Arc::new(registry),
            limiters: Arc::new(LimiterRegistry::new()),
            breakers: Arc::new(BreakerRegistry::new(config.breaker)),
            tracker: Arc::new(ProgressTracker::new()),
            progress: Arc::new(ProgressContext::new()),
        })
    }

    /// Swap in custom limiters (tests tighten or loosen rates here).
    pub fn set_limiters(&mut self, limiters: LimiterRegistry) {
        self.limiters = Arc::new(limiters);
    }

    /// Enqueue one search; returns its task id.
    pub fn add_search(&self, spec: SearchSpec) -> String {
        let task = SearchTask::new(
            spec.source,
            spec.query,
            spec.date_range,
            spec.limit,
            spec.priority,
            spec.config,
        );
        self.queue.enqueue(task)
    }

    /// Enqueue a batch; returns task ids in input order.
    pub fn add_multiple(&self, specs: Vec<SearchSpec>) -> Vec<String> {
        let ids: Vec<String> = specs.into_iter().map(|s| self.add_search(s)).collect();
        log::info!("added {} searches to queue", ids.len());
        ids
    }

    /// Run every queued task to a terminal state. Blocks. With
    /// `show_progress`, a status line updates every `interval`.
    pub fn run_all(&self, show_progress: bool, interval: Duration) {
        log::info!("starting {} workers", self.workers);
        let ctx = WorkerContext {
            queue: self.queue.clone(),
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            limiters: self.limiters.clone(),
            breakers: self.breakers.clone(),
            tracker: self.tracker.clone(),
            progress: self.progress.clone(),
        };

        let done = Arc::new(AtomicBool::new(false));
        let printer = if show_progress {
            let done = done.clone();
            let queue = self.queue.clone();
            let tracker = self.tracker.clone();
            let progress = self.progress.clone();
            Some(
                std::thread::Builder::new()
                    .name("progress-printer".into())
                    .spawn(move || print_progress(&done, &queue, &tracker, &progress, interval))
                    .expect("failed to spawn progress printer"),
            )
        } else {
            None
        };

        run_workers(&ctx, self.workers);
        done.store(true, Ordering::Relaxed);
        if let Some(handle) = printer {
            let _ = handle.join();
        }

        let stats = self.tracker.stats();
        let (_, _, completed, failed, cancelled) = self.queue.status_counts();
        log::info!(
            "queue drained: {completed} completed, {failed} failed, {cancelled} cancelled, {} papers in {:.1}s",
            fmt_num(stats.papers_fetched as usize),
            stats.elapsed.as_secs_f64()
        );
    }

    /// Results of a COMPLETED task. Tasks restored from the journal
    /// carry no in-memory papers; those reload from the cache.
    pub fn get_results(&self, task_id: &str) -> Option<Vec<Paper>> {
        let task = self.queue.get(task_id)?;
        if task.status != TaskStatus::Completed {
            log::warn!(
                "task {} not completed (status={})",
                task.short_id(),
                task.status
            );
            return None;
        }
        if !task.papers.is_empty() {
            return Some(task.papers);
        }
        let query_id = task.query_id.as_deref()?;
        match self.cache.papers_for(query_id) {
            Ok(mut papers) => {
                if let Some(limit) = task.limit {
                    papers.truncate(limit as usize);
                }
                Some(papers)
            }
            Err(e) => {
                log::error!("cannot reload results for {}: {e}", task.short_id());
                None
            }
        }
    }

    /// task_id → papers for every COMPLETED task.
    pub fn get_all_results(&self) -> BTreeMap<String, Vec<Paper>> {
        self.queue
            .tasks_by_status(TaskStatus::Completed)
            .into_iter()
            .filter_map(|task| {
                let id = task.task_id.clone();
                self.get_results(&task.task_id).map(|papers| (id, papers))
            })
            .collect()
    }

    pub fn cancel(&self, task_id: &str) {
        self.queue.cancel(task_id);
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.queue.status(task_id)
    }

    pub fn all_tasks(&self) -> Vec<SearchTask> {
        self.queue.all_tasks()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.tracker.stats()
    }

    /// Counters in the Prometheus text format.
    pub fn metrics_text(&self) -> String {
        self.tracker.render_metrics(&self.queue)
    }

    /// Flush and close the cache. Optional — every write is already
    /// transactional — but gives a deterministic shutdown point.
    pub fn close(self) -> anyhow::Result<()> {
        let Self { cache, queue, .. } = self;
        drop(queue);
        match Arc::try_unwrap(cache) {
            Ok(cache) => cache.close().context("closing search cache")?,
            Err(_) => log::warn!("cache still shared at close; relying on drop"),
        }
        Ok(())
    }
}

fn print_progress(
    done: &AtomicBool,
    queue: &TaskQueue,
    tracker: &ProgressTracker,
    progress: &ProgressContext,
    interval: Duration,
) {
    let line = progress.status_line();
    let tick = Duration::from_millis(200);
    let mut since_report = Duration::ZERO;
    while !done.load(Ordering::Relaxed) {
        std::thread::sleep(tick);
        since_report += tick;
        if since_report < interval {
            continue;
        }
        since_report = Duration::ZERO;
        let stats = tracker.stats();
        let (pending, running, completed, failed, cancelled) = queue.status_counts();
        let msg = format!(
            "{pending} pending · {running} running · {completed} done · {failed} failed · {cancelled} cancelled · {} papers ({:.0}/min)",
            fmt_num(stats.papers_fetched as usize),
            stats.papers_per_minute()
        );
        if progress.is_tty() {
            line.set_message(msg);
        } else {
            log::info!("{msg}");
        }
    }
    line.finish_and_clear();
}
