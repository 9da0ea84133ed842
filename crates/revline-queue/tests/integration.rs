//! End-to-end pipeline tests against scripted stub adapters.
//!
//! No network: a scripted source is registered under a private registry
//! and the real queue, cache, limiters, and breakers run around it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tempfile::TempDir;

use revline_cache::SearchCache;
use revline_core::{
    Author, BreakerConfig, BreakerRegistry, BreakerState, ErrorKind, LimiterRegistry, Paper,
    ProgressContext, Provenance, RateLimiter, SearchError, SourceLimits,
};
use revline_queue::task::ErrorKindTag;
use revline_queue::{
    ManagerConfig, ProgressTracker, SearchQueueManager, SearchSpec, SearchTask, TaskQueue,
    TaskStatus, WorkerContext, run_workers,
};
use revline_sources::{AdapterPage, SourceAdapter, SourceRegistry};

type PageScript =
    dyn Fn(u32, u32) -> Result<AdapterPage, SearchError> + Send + Sync + 'static;

/// Adapter driven by a closure of (page_index, call_number).
struct ScriptedSource {
    name: &'static str,
    calls: Arc<AtomicU32>,
    pages_served: Arc<Mutex<Vec<u32>>>,
    script: Arc<PageScript>,
}

impl SourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    fn fetch_page(
        &self,
        req: &revline_sources::PageRequest<'_>,
    ) -> Result<AdapterPage, SearchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.script)(req.page_index, call);
        if result.is_ok() {
            self.pages_served.lock().unwrap().push(req.page_index);
        }
        result
    }
}

struct Stub {
    calls: Arc<AtomicU32>,
    pages_served: Arc<Mutex<Vec<u32>>>,
}

impl Stub {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn pages(&self) -> Vec<u32> {
        self.pages_served.lock().unwrap().clone()
    }
}

/// Register a scripted source and return its observation handles.
fn register_stub<F>(registry: &mut SourceRegistry, name: &'static str, script: F) -> Stub
where
    F: Fn(u32, u32) -> Result<AdapterPage, SearchError> + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicU32::new(0));
    let pages_served = Arc::new(Mutex::new(Vec::new()));
    let script: Arc<PageScript> = Arc::new(script);
    let handles = Stub {
        calls: calls.clone(),
        pages_served: pages_served.clone(),
    };
    registry.register(name, move |_opts| {
        Box::new(ScriptedSource {
            name,
            calls: calls.clone(),
            pages_served: pages_served.clone(),
            script: script.clone(),
        })
    });
    handles
}

fn stub_paper(doi: &str, title: &str, database: &str) -> Paper {
    Paper {
        paper_id: String::new(),
        doi: Some(doi.to_string()),
        arxiv_id: None,
        title: title.to_string(),
        title_hash: String::new(),
        authors: vec![Author::from_display_name("Stub Author")],
        year: Some(2021),
        venue: None,
        abstract_text: None,
        fields_of_study: vec![],
        keywords: vec![],
        citation_count: 0,
        open_access_pdf: None,
        external_ids: BTreeMap::new(),
        source: Provenance {
            database: database.to_string(),
            query: "q".to_string(),
            retrieved_at: Utc::now(),
        },
    }
    .finalize()
    .unwrap()
}

/// A page of `count` unique papers; `more` controls the END signal.
fn page_of(count: usize, page_index: u32, more: bool) -> AdapterPage {
    let papers = (0..count)
        .map(|i| {
            stub_paper(
                &format!("10.9999/p{page_index}n{i}"),
                &format!("Stub Paper {page_index} {i}"),
                "stub",
            )
        })
        .collect();
    AdapterPage {
        papers,
        next_cursor: more.then(|| (page_index + 1).to_string()),
        raw: format!("{{\"page\":{page_index}}}"),
    }
}

/// Worker harness around an ephemeral queue and a temp cache.
struct Harness {
    _dir: TempDir,
    queue: Arc<TaskQueue>,
    cache: Arc<SearchCache>,
    registry: Arc<SourceRegistry>,
    limiters: Arc<LimiterRegistry>,
    breakers: Arc<BreakerRegistry>,
    tracker: Arc<ProgressTracker>,
}

impl Harness {
    fn new(registry: SourceRegistry, breaker: BreakerConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let limiters = LimiterRegistry::new();
        // Keep stub sources fast; individual tests override as needed
        limiters.insert(
            "stub",
            RateLimiter::new(SourceLimits {
                rate: 10_000.0,
                burst: 10_000.0,
                min_spacing: None,
            }),
        );
        Self {
            queue: Arc::new(TaskQueue::ephemeral()),
            cache: Arc::new(SearchCache::open(dir.path()).unwrap()),
            registry: Arc::new(registry),
            limiters: Arc::new(limiters),
            breakers: Arc::new(BreakerRegistry::new(breaker)),
            tracker: Arc::new(ProgressTracker::new()),
            _dir: dir,
        }
    }

    fn context(&self) -> WorkerContext {
        WorkerContext {
            queue: self.queue.clone(),
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            limiters: self.limiters.clone(),
            breakers: self.breakers.clone(),
            tracker: self.tracker.clone(),
            progress: Arc::new(ProgressContext::new()),
        }
    }

    fn enqueue(&self, query: &str, limit: Option<u32>, config: BTreeMap<String, String>) -> String {
        self.queue
            .enqueue(SearchTask::new("stub", query, None, limit, 0, config))
    }
}

fn max_retries(n: u32) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("max_retries".to_string(), n.to_string());
    map
}

#[test]
fn rate_limit_429_then_recovery() {
    // E5: 429 with Retry-After: 2 on the first call, success after
    let mut registry = SourceRegistry::new();
    let stub = register_stub(&mut registry, "stub", |page, call| {
        if call == 0 {
            Err(SearchError::rate_limit(
                "too many requests",
                Some(Duration::from_secs(2)),
            ))
        } else {
            Ok(page_of(10, page, false))
        }
    });
    let harness = Harness::new(registry, BreakerConfig::default());
    let task_id = harness.enqueue("rate limited", None, BTreeMap::new());

    let start = Instant::now();
    run_workers(&harness.context(), 1);
    let elapsed = start.elapsed();

    assert_eq!(harness.queue.status(&task_id), Some(TaskStatus::Completed));
    assert_eq!(stub.calls(), 2, "adapter called exactly twice");
    assert!(
        elapsed >= Duration::from_secs(2),
        "Retry-After honored, elapsed {elapsed:?}"
    );
    assert_eq!(
        harness.breakers.for_source("stub").state(),
        BreakerState::Closed
    );
    let papers = harness.queue.results(&task_id).unwrap();
    assert_eq!(papers.len(), 10);
}

#[test]
fn circuit_opens_after_threshold_and_short_circuits() {
    // E6: persistent 500s; threshold 5; 10 tasks, max_retries 0
    let mut registry = SourceRegistry::new();
    let stub = register_stub(&mut registry, "stub", |_page, _call| {
        Err(SearchError::from_status(500, "internal error", None))
    });
    let harness = Harness::new(
        registry,
        BreakerConfig {
            threshold: 5,
            cooldown: Duration::from_secs(60),
        },
    );
    let mut task_ids = Vec::new();
    for i in 0..10 {
        task_ids.push(harness.enqueue(&format!("query {i}"), None, max_retries(0)));
    }

    run_workers(&harness.context(), 1);

    assert_eq!(stub.calls(), 5, "breaker must stop adapter calls at the threshold");
    let mut api_failures = 0;
    let mut circuit_failures = 0;
    for task_id in &task_ids {
        let task = harness.queue.get(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        match task.error.as_ref().unwrap().kind {
            ErrorKindTag::Api => api_failures += 1,
            ErrorKindTag::CircuitOpen => circuit_failures += 1,
            other => panic!("unexpected failure kind {other:?}"),
        }
    }
    assert_eq!(api_failures, 5);
    assert_eq!(circuit_failures, 5);
    assert_eq!(
        harness.breakers.for_source("stub").state(),
        BreakerState::Open
    );
}

#[test]
fn retry_budget_bounds_adapter_calls() {
    // Property: no task issues more than max_retries + 1 calls per page
    let mut registry = SourceRegistry::new();
    let stub = register_stub(&mut registry, "stub", |_page, _call| {
        Err(SearchError::network("connection reset"))
    });
    let harness = Harness::new(registry, BreakerConfig {
        threshold: 100, // keep the breaker out of this test
        cooldown: Duration::from_secs(60),
    });
    let task_id = harness.enqueue("flaky", None, max_retries(2));

    run_workers(&harness.context(), 1);

    assert_eq!(stub.calls(), 3, "max_retries=2 allows exactly 3 attempts");
    let task = harness.queue.get(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert_eq!(error.kind, ErrorKindTag::Network);
    assert_eq!(error.attempts, 3);
    assert!(error.last_backoff_ms.is_some());
}

#[test]
fn cancel_running_task_keeps_cached_pages() {
    // Endless source; cancel lands between pages
    let mut registry = SourceRegistry::new();
    let _stub = register_stub(&mut registry, "stub", |page, _call| {
        std::thread::sleep(Duration::from_millis(30));
        Ok(page_of(5, page, true))
    });
    let harness = Harness::new(registry, BreakerConfig::default());
    let task_id = harness.enqueue("endless", None, BTreeMap::new());

    let ctx = harness.context();
    let queue = harness.queue.clone();
    let canceller_id = task_id.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(120));
        queue.cancel(&canceller_id);
    });
    run_workers(&ctx, 1);
    canceller.join().unwrap();

    let task = harness.queue.get(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    let query_id = task.query_id.unwrap();
    assert!(
        harness.cache.page_count(&query_id).unwrap() >= 1,
        "fetched pages must survive cancellation"
    );
    assert!(!harness.cache.is_completed(&query_id).unwrap());
}

#[test]
fn at_most_one_worker_observes_a_task() {
    // Many short tasks, more workers than tasks; per-query concurrency
    // must never exceed one
    let active: Arc<Mutex<BTreeMap<String, u32>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let overlap_seen = Arc::new(AtomicU32::new(0));

    let mut registry = SourceRegistry::new();
    let active_in = active.clone();
    let overlap_in = overlap_seen.clone();
    registry.register("stub", move |_opts| {
        let active = active_in.clone();
        let overlap = overlap_in.clone();
        struct Guarded {
            active: Arc<Mutex<BTreeMap<String, u32>>>,
            overlap: Arc<AtomicU32>,
        }
        impl SourceAdapter for Guarded {
            fn name(&self) -> &str {
                "stub"
            }
            fn fetch_page(
                &self,
                req: &revline_sources::PageRequest<'_>,
            ) -> Result<AdapterPage, SearchError> {
                let query = req.query.to_string();
                {
                    let mut map = self.active.lock().unwrap();
                    let entry = map.entry(query.clone()).or_insert(0);
                    *entry += 1;
                    if *entry > 1 {
                        self.overlap.fetch_add(1, Ordering::SeqCst);
                    }
                }
                std::thread::sleep(Duration::from_millis(10));
                let mut map = self.active.lock().unwrap();
                *map.get_mut(&query).unwrap() -= 1;
                Ok(page_of(3, req.page_index, false))
            }
        }
        Box::new(Guarded { active, overlap })
    });

    let harness = Harness::new(registry, BreakerConfig::default());
    for i in 0..8 {
        harness.enqueue(&format!("task number {i}"), None, BTreeMap::new());
    }
    run_workers(&harness.context(), 4);

    assert_eq!(overlap_seen.load(Ordering::SeqCst), 0);
    assert!(harness.queue.is_drained());
}

#[test]
fn resume_refetches_only_missing_pages() {
    // E4: limit 100, 25 per page; die after 2 pages; restart completes
    // with calls only for pages 2 and 3
    let dir = TempDir::new().unwrap();
    let spec = || SearchSpec {
        source: "stub".to_string(),
        query: "resumable corpus".to_string(),
        limit: Some(100),
        ..SearchSpec::default()
    };

    // Phase 1: the source dies on page 2
    {
        let mut registry = SourceRegistry::new();
        let stub = register_stub(&mut registry, "stub", |page, _call| {
            if page < 2 {
                Ok(page_of(25, page, true))
            } else {
                Err(SearchError::from_status(403, "forbidden", None))
            }
        });
        let mut manager = SearchQueueManager::with_registry(
            ManagerConfig {
                workers: 1,
                cache_dir: dir.path().to_path_buf(),
                ..ManagerConfig::default()
            },
            registry,
        )
        .unwrap();
        manager.set_limiters(fast_limiters());
        let task_id = manager.add_search(spec());
        manager.run_all(false, Duration::from_millis(100));
        assert_eq!(manager.task_status(&task_id), Some(TaskStatus::Failed));
        assert_eq!(stub.pages(), vec![0, 1]);
        manager.close().unwrap();
    }

    // Phase 2: healthy source, same QueryIdentity
    {
        let mut registry = SourceRegistry::new();
        let stub = register_stub(&mut registry, "stub", |page, _call| {
            Ok(page_of(25, page, true))
        });
        let mut manager = SearchQueueManager::with_registry(
            ManagerConfig {
                workers: 1,
                cache_dir: dir.path().to_path_buf(),
                ..ManagerConfig::default()
            },
            registry,
        )
        .unwrap();
        manager.set_limiters(fast_limiters());
        let task_id = manager.add_search(spec());
        manager.run_all(false, Duration::from_millis(100));

        assert_eq!(manager.task_status(&task_id), Some(TaskStatus::Completed));
        let papers = manager.get_results(&task_id).unwrap();
        assert_eq!(papers.len(), 100);
        assert_eq!(
            stub.pages(),
            vec![2, 3],
            "cached pages must not be refetched"
        );
        manager.close().unwrap();
    }
}

#[test]
fn cross_source_doi_dedup_end_to_end() {
    // E1: two sources return a record with the same DOI
    const SHARED_DOI: &str = "10.1145/3442188.3445922";
    let mut registry = SourceRegistry::new();
    let _alpha = register_stub(&mut registry, "alpha", |page, _call| {
        Ok(AdapterPage {
            papers: vec![
                stub_paper(SHARED_DOI, "Fairness in Machine Learning", "alpha"),
                stub_paper("10.9999/alpha-only", "An Alpha Exclusive", "alpha"),
            ],
            next_cursor: None,
            raw: format!("{{\"page\":{page}}}"),
        })
    });
    let _beta = register_stub(&mut registry, "beta", |page, _call| {
        Ok(AdapterPage {
            papers: vec![
                stub_paper(SHARED_DOI, "Fairness in machine learning.", "beta"),
                stub_paper("10.9999/beta-only", "A Beta Exclusive", "beta"),
            ],
            next_cursor: None,
            raw: format!("{{\"page\":{page}}}"),
        })
    });

    let dir = TempDir::new().unwrap();
    let mut manager = SearchQueueManager::with_registry(
        ManagerConfig {
            workers: 2,
            cache_dir: dir.path().to_path_buf(),
            ..ManagerConfig::default()
        },
        registry,
    )
    .unwrap();
    manager.set_limiters(fast_limiters());
    for source in ["alpha", "beta"] {
        manager.add_search(SearchSpec {
            source: source.to_string(),
            query: "machine learning fairness".to_string(),
            limit: Some(2),
            ..SearchSpec::default()
        });
    }
    manager.run_all(false, Duration::from_millis(100));

    let corpus: Vec<Paper> = manager
        .get_all_results()
        .into_values()
        .flatten()
        .collect();
    assert_eq!(corpus.len(), 4);

    let outcome = revline_dedup::Deduplicator::default()
        .deduplicate(corpus)
        .unwrap();
    let canonical_with_doi: Vec<_> = outcome
        .canonical
        .iter()
        .filter(|p| p.doi.as_deref() == Some(SHARED_DOI))
        .collect();
    assert_eq!(canonical_with_doi.len(), 1);
    assert_eq!(outcome.clusters.len(), 1);
    assert_eq!(
        outcome.clusters[0].match_kind,
        revline_dedup::MatchKind::Doi
    );
    let canonical_id = format!("doi:{SHARED_DOI}");
    assert_eq!(
        outcome.duplicate_map.get(&canonical_id),
        Some(&canonical_id)
    );
    manager.close().unwrap();
}

#[test]
fn unknown_source_fails_validation() {
    let harness = Harness::new(SourceRegistry::new(), BreakerConfig::default());
    let task_id = harness.enqueue("no such source", None, BTreeMap::new());
    run_workers(&harness.context(), 1);
    let task = harness.queue.get(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.unwrap().kind, ErrorKindTag::Validation);
}

fn fast_limiters() -> LimiterRegistry {
    let limiters = LimiterRegistry::new();
    for source in ["stub", "alpha", "beta"] {
        limiters.insert(
            source,
            RateLimiter::new(SourceLimits {
                rate: 10_000.0,
                burst: 10_000.0,
                min_spacing: None,
            }),
        );
    }
    limiters
}
