//! Worker pool draining the task queue
//!
//! Each worker owns one task end-to-end: it registers the query with
//! the cache, resumes from the first missing page, and fetches pages in
//! strictly ascending order. Every adapter call passes the circuit
//! breaker and the rate limiter; failures are classified and retried
//! with the backoff family for their kind. A page is attempted at most
//! `max_retries + 1` times.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use revline_cache::{QueryParams, ResumePoint, SearchCache};
use revline_core::{
    BreakerRegistry, ErrorKind, LimiterRegistry, SearchError, SharedProgress, fmt_num,
    is_shutdown_requested, sleep_interruptible,
};
use revline_sources::{AdapterOptions, PageRequest, SourceAdapter, SourceRegistry};

use crate::queue::TaskQueue;
use crate::task::{SearchTask, TaskError};
use crate::tracker::ProgressTracker;

/// Everything a worker needs, shared across the pool.
pub struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub cache: Arc<SearchCache>,
    pub registry: Arc<SourceRegistry>,
    pub limiters: Arc<LimiterRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub tracker: Arc<ProgressTracker>,
    pub progress: SharedProgress,
}

impl WorkerContext {
    /// Count an error and build the task-level descriptor for it.
    fn task_error(&self, err: &SearchError, attempts: u32) -> TaskError {
        self.tracker.error(err.kind());
        TaskError::new(err.kind(), err.message(), attempts)
    }
}

/// Drain the queue with `workers` parallel executors. Blocks until no
/// PENDING task remains (or shutdown is requested).
pub fn run_workers(ctx: &WorkerContext, workers: usize) {
    let worker_slot = AtomicUsize::new(0);
    rayon::scope(|s| {
        for _ in 0..workers {
            s.spawn(|_| {
                let worker_id = worker_slot.fetch_add(1, Ordering::Relaxed);
                log::debug!("worker {worker_id} started");
                while let Some(task) = ctx.queue.claim_next() {
                    execute_task(ctx, &task);
                }
                log::debug!("worker {worker_id} stopped");
            });
        }
    });
}

/// How a page's retry loop ended.
enum PageOutcome {
    /// Page stored. `end` is the adapter's END signal
    Fetched { end: bool, papers_added: usize },
    Cancelled,
    Failed(TaskError),
}

fn execute_task(ctx: &WorkerContext, task: &SearchTask) {
    let pb = ctx
        .progress
        .task_bar(&format!("{}:{}", task.source, task.short_id()));
    pb.set_message("starting");

    let outcome = prepare_and_run(ctx, task, &pb);
    match outcome {
        Ok(TaskEnd::Completed(papers)) => {
            pb.set_message(format!("done · {} papers", fmt_num(papers.len())));
            ctx.tracker.task_finished(&task.task_id);
            ctx.queue.complete(&task.task_id, papers);
        }
        Ok(TaskEnd::Cancelled) => {
            ctx.tracker.task_finished(&task.task_id);
            ctx.queue.mark_cancelled(&task.task_id);
        }
        Err(error) => {
            if error.kind == crate::task::ErrorKindTag::Cache {
                escalate_cache_errors(ctx);
            }
            ctx.tracker.task_finished(&task.task_id);
            ctx.queue.fail(&task.task_id, error);
        }
    }
    pb.finish_and_clear();
}

/// A task-level cache failure is usually self-healing (transactions
/// roll back), but a cache that keeps failing takes the whole run down.
fn escalate_cache_errors(ctx: &WorkerContext) {
    const CACHE_ERROR_LIMIT: u64 = 3;
    let cache_errors = ctx
        .tracker
        .stats()
        .errors
        .get(&ErrorKind::Cache)
        .copied()
        .unwrap_or(0);
    if cache_errors >= CACHE_ERROR_LIMIT {
        log::error!("{cache_errors} cache failures, shutting the queue down");
        revline_core::request_shutdown();
    }
}

enum TaskEnd {
    Completed(Vec<revline_core::Paper>),
    Cancelled,
}

fn prepare_and_run(
    ctx: &WorkerContext,
    task: &SearchTask,
    pb: &indicatif::ProgressBar,
) -> Result<TaskEnd, TaskError> {
    let options = AdapterOptions::from_map(&task.source, &task.config)
        .map_err(|e| ctx.task_error(&e, 0))?;
    let adapter = ctx
        .registry
        .create(&task.source, &options)
        .map_err(|e| ctx.task_error(&e, 0))?;

    let fingerprint = options.fingerprint();
    let query_id = ctx
        .cache
        .register_query(&QueryParams {
            source: &task.source,
            query: &task.query,
            date_range: task.date_range.as_ref(),
            limit: task.limit,
            config_fingerprint: &fingerprint,
        })
        .map_err(|e| ctx.task_error(&SearchError::from(e), 0))?;
    ctx.queue.set_query_id(&task.task_id, &query_id);

    if !run_pages(ctx, task, adapter.as_ref(), &options, &query_id, pb)? {
        return Ok(TaskEnd::Cancelled);
    }

    let mut papers = ctx
        .cache
        .papers_for(&query_id)
        .map_err(|e| ctx.task_error(&SearchError::from(e), 0))?;
    if let Some(limit) = task.limit {
        papers.truncate(limit as usize);
    }
    Ok(TaskEnd::Completed(papers))
}

/// Fetch pages until END, limit, cancellation, or failure.
///
/// `Ok(true)` — query complete (flag set in cache).
/// `Ok(false)` — cancelled between pages.
fn run_pages(
    ctx: &WorkerContext,
    task: &SearchTask,
    adapter: &dyn SourceAdapter,
    options: &AdapterOptions,
    query_id: &str,
    pb: &indicatif::ProgressBar,
) -> Result<bool, TaskError> {
    let cache_err = |e: revline_cache::CacheError| ctx.task_error(&SearchError::from(e), 0);

    let (mut page_index, mut cursor) = match ctx.cache.resume_point(query_id).map_err(cache_err)? {
        ResumePoint::Complete => return Ok(true),
        ResumePoint::Page { index, cursor } => (index, cursor),
    };
    let mut fetched = if page_index > 0 {
        let cached = ctx.cache.papers_for(query_id).map_err(cache_err)?.len();
        log::info!(
            "task {}: resuming {} at page {page_index} ({} papers cached)",
            task.short_id(),
            task.source,
            fmt_num(cached)
        );
        cached
    } else {
        0
    };

    loop {
        if is_shutdown_requested() || ctx.queue.cancel_requested(&task.task_id) {
            return Ok(false);
        }
        if let Some(limit) = task.limit {
            if fetched >= limit as usize {
                ctx.cache.mark_completed(query_id).map_err(cache_err)?;
                return Ok(true);
            }
        }

        pb.set_message(format!("page {page_index} · {} papers", fmt_num(fetched)));
        match fetch_one_page(ctx, task, adapter, options, query_id, page_index, cursor.as_deref())? {
            PageOutcome::Cancelled => return Ok(false),
            PageOutcome::Failed(error) => return Err(error),
            PageOutcome::Fetched { end, papers_added } => {
                fetched += papers_added;
                ctx.queue
                    .update_progress(&task.task_id, page_index + 1, fetched);
                if end {
                    ctx.cache.mark_completed(query_id).map_err(cache_err)?;
                    return Ok(true);
                }
                cursor = match ctx.cache.resume_point(query_id).map_err(cache_err)? {
                    ResumePoint::Page { cursor, .. } => cursor,
                    ResumePoint::Complete => None,
                };
                page_index += 1;
            }
        }
    }
}

/// Retry loop for a single page. At most `max_retries + 1` attempts; a
/// circuit-open short-circuit consumes an attempt without touching the
/// adapter.
fn fetch_one_page(
    ctx: &WorkerContext,
    task: &SearchTask,
    adapter: &dyn SourceAdapter,
    options: &AdapterOptions,
    query_id: &str,
    page_index: u32,
    cursor: Option<&str>,
) -> Result<PageOutcome, TaskError> {
    let limiter = ctx.limiters.for_source(&task.source);
    let breaker = ctx.breakers.for_source(&task.source);
    let max_retries = options.max_retries;
    let mut attempts: u32 = 0;
    let mut last_backoff: Option<Duration> = None;

    loop {
        if is_shutdown_requested() || ctx.queue.cancel_requested(&task.task_id) {
            return Ok(PageOutcome::Cancelled);
        }

        // Breaker gate: short-circuit without calling the adapter
        if let Err(remaining) = breaker.acquire() {
            attempts += 1;
            let err = SearchError::circuit_open(format!(
                "{} circuit open, {:.0}s to half-open",
                task.source,
                remaining.as_secs_f64()
            ));
            ctx.tracker.error(err.kind());
            if attempts > max_retries {
                return Ok(PageOutcome::Failed(
                    TaskError::new(err.kind(), err.message(), attempts).with_backoff(last_backoff),
                ));
            }
            // Wait out the cooldown, then contend for the probe
            log::debug!(
                "task {}: waiting {:.1}s for {} half-open window",
                task.short_id(),
                remaining.as_secs_f64(),
                task.source
            );
            last_backoff = Some(remaining);
            if !sleep_interruptible(remaining) {
                return Ok(PageOutcome::Cancelled);
            }
            continue;
        }

        if !limiter.acquire() {
            return Ok(PageOutcome::Cancelled);
        }

        let request = PageRequest {
            query: &task.query,
            date_range: task.date_range.as_ref(),
            limit: task.limit,
            page_index,
            cursor,
            options,
        };
        match adapter.fetch_page(&request) {
            Ok(page) => {
                breaker.record_success();
                let papers_added = page.papers.len();
                ctx.cache
                    .store_page(
                        query_id,
                        page_index,
                        &page.raw,
                        page.next_cursor.as_deref(),
                        &page.papers,
                    )
                    .map_err(|e| ctx.task_error(&SearchError::from(e), attempts))?;
                ctx.tracker.page_fetched(&task.source, papers_added);
                return Ok(PageOutcome::Fetched {
                    end: page.next_cursor.is_none(),
                    papers_added,
                });
            }
            Err(err) => {
                breaker.record_failure();
                ctx.tracker.error(err.kind());
                attempts += 1;
                if !err.is_retryable() || attempts > max_retries {
                    if err.is_retryable() {
                        log::warn!(
                            "task {}: page {page_index} exhausted {attempts} attempts",
                            task.short_id()
                        );
                    }
                    return Ok(PageOutcome::Failed(
                        TaskError::new(err.kind(), err.message(), attempts)
                            .with_backoff(last_backoff),
                    ));
                }
                if err.kind() == ErrorKind::RateLimit {
                    // Server hint (or the base delay) empties the bucket
                    let hold = err.retry_after().unwrap_or(Duration::from_secs(2));
                    limiter.reset_after(hold);
                }
                let backoff = err.backoff(attempts).unwrap_or(Duration::from_secs(1));
                log::debug!(
                    "task {}: page {page_index} attempt {attempts}/{} failed ({err}), retrying in {:.1}s",
                    task.short_id(),
                    max_retries + 1,
                    backoff.as_secs_f64()
                );
                last_backoff = Some(backoff);
                if !sleep_interruptible(backoff) {
                    return Ok(PageOutcome::Cancelled);
                }
            }
        }
    }
}
