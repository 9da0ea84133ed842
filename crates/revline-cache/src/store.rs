//! SQLite-backed page store with WAL durability
//!
//! Schema v1, three tables:
//! - `queries`  — one row per QueryIdentity with a completion flag
//! - `pages`    — raw response blob per (query_id, page_index)
//! - `papers`   — one row per parsed paper, keyed to its page
//!
//! Pages for a query are contiguous from 0; each page is written in one
//! transaction together with its papers, so a crash mid-write leaves no
//! partial page behind.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use revline_core::{DateRange, Paper};

use crate::error::CacheError;
use crate::identity::query_identity;

const DB_FILE: &str = "search_cache.db";
const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS queries (
    query_id    TEXT PRIMARY KEY,
    source      TEXT NOT NULL,
    query       TEXT NOT NULL,
    start_date  TEXT,
    end_date    TEXT,
    max_results INTEGER,
    config      TEXT NOT NULL,
    completed   INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queries_source ON queries(source, query);

CREATE TABLE IF NOT EXISTS pages (
    query_id    TEXT NOT NULL,
    page_index  INTEGER NOT NULL,
    raw         TEXT NOT NULL,
    next_cursor TEXT,
    fetched_at  TEXT NOT NULL,
    PRIMARY KEY (query_id, page_index)
);

CREATE TABLE IF NOT EXISTS papers (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    query_id   TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    record     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_papers_query ON papers(query_id, page_index);
";

/// Parameters identifying a query for registration.
#[derive(Debug, Clone)]
pub struct QueryParams<'a> {
    pub source: &'a str,
    pub query: &'a str,
    pub date_range: Option<&'a DateRange>,
    pub limit: Option<u32>,
    /// Canonical adapter-config fingerprint (part of the identity)
    pub config_fingerprint: &'a str,
}

/// Where to pick up a registered query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// All pages fetched; load papers instead of calling the network
    Complete,
    /// Fetch `index` next, passing `cursor` to the adapter
    Page {
        index: u32,
        cursor: Option<String>,
    },
}

/// Durable search cache. Safe to share across worker threads; writes to
/// the same query are serialized by task ownership, not by this lock.
pub struct SearchCache {
    conn: Mutex<Connection>,
}

impl SearchCache {
    /// Open (or create) the cache under `dir` with WAL journaling.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CacheError::Corrupt(format!("cannot create cache dir: {e}")))?;
        let conn = Connection::open(dir.join(DB_FILE))?;
        // journal_mode returns the resulting mode as a row
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;

        let version: Option<i64> = conn
            .query_row("SELECT version FROM schema_version", [], |r| r.get(0))
            .optional()?;
        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(CacheError::Corrupt(format!(
                    "unsupported cache schema version {v}"
                )));
            }
        }
        log::debug!("search cache ready at {}", dir.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Register a query, returning its deterministic id. Idempotent:
    /// re-registering an existing identity is a no-op.
    pub fn register_query(&self, p: &QueryParams<'_>) -> Result<String, CacheError> {
        let query_id = query_identity(
            p.source,
            p.query,
            p.date_range,
            p.limit,
            p.config_fingerprint,
        );
        let conn = self.conn.lock().expect("cache lock poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO queries
             (query_id, source, query, start_date, end_date, max_results, config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                query_id,
                p.source,
                p.query,
                p.date_range.and_then(|r| r.start).map(|d| d.to_string()),
                p.date_range.and_then(|r| r.end).map(|d| d.to_string()),
                p.limit,
                p.config_fingerprint,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(query_id)
    }

    /// Smallest page index not yet stored, with the cursor that fetches
    /// it, or [`ResumePoint::Complete`] when the completion flag is set.
    pub fn resume_point(&self, query_id: &str) -> Result<ResumePoint, CacheError> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        let completed: Option<i64> = conn
            .query_row(
                "SELECT completed FROM queries WHERE query_id = ?1",
                params![query_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(completed) = completed else {
            return Err(CacheError::Corrupt(format!(
                "query {query_id} not registered"
            )));
        };
        if completed != 0 {
            return Ok(ResumePoint::Complete);
        }

        let (count, max): (u32, Option<u32>) = conn.query_row(
            "SELECT COUNT(*), MAX(page_index) FROM pages WHERE query_id = ?1",
            params![query_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        if let Some(max) = max {
            if max + 1 != count {
                return Err(CacheError::Corrupt(format!(
                    "page gap for {query_id}: {count} pages but max index {max}"
                )));
            }
        }
        let cursor: Option<String> = conn
            .query_row(
                "SELECT next_cursor FROM pages WHERE query_id = ?1
                 ORDER BY page_index DESC LIMIT 1",
                params![query_id],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        Ok(ResumePoint::Page {
            index: count,
            cursor,
        })
    }

    /// Atomically store a page and its parsed papers.
    ///
    /// `page_index` must be the next free index; storing out of order is
    /// a programming error, as is storing past a completed query.
    pub fn store_page(
        &self,
        query_id: &str,
        page_index: u32,
        raw: &str,
        next_cursor: Option<&str>,
        papers: &[Paper],
    ) -> Result<(), CacheError> {
        for paper in papers {
            paper
                .validate()
                .map_err(|e| CacheError::Corrupt(format!("invalid paper entering cache: {e}")))?;
        }

        let mut conn = self.conn.lock().expect("cache lock poisoned");
        let tx = conn.transaction()?;
        {
            let completed: i64 = tx.query_row(
                "SELECT completed FROM queries WHERE query_id = ?1",
                params![query_id],
                |r| r.get(0),
            )?;
            if completed != 0 {
                return Err(CacheError::Corrupt(format!(
                    "page write after completion for {query_id}"
                )));
            }
            let count: u32 = tx.query_row(
                "SELECT COUNT(*) FROM pages WHERE query_id = ?1",
                params![query_id],
                |r| r.get(0),
            )?;
            if page_index != count {
                return Err(CacheError::NonContiguous {
                    query_id: query_id.to_string(),
                    expected: count,
                    got: page_index,
                });
            }
            tx.execute(
                "INSERT INTO pages (query_id, page_index, raw, next_cursor, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    query_id,
                    page_index,
                    raw,
                    next_cursor,
                    Utc::now().to_rfc3339()
                ],
            )?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO papers (query_id, page_index, record) VALUES (?1, ?2, ?3)",
            )?;
            for paper in papers {
                stmt.execute(params![query_id, page_index, serde_json::to_string(paper)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Set the completion flag; no further pages may be stored.
    pub fn mark_completed(&self, query_id: &str) -> Result<(), CacheError> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        conn.execute(
            "UPDATE queries SET completed = 1 WHERE query_id = ?1",
            params![query_id],
        )?;
        Ok(())
    }

    pub fn is_completed(&self, query_id: &str) -> Result<bool, CacheError> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        let completed: Option<i64> = conn
            .query_row(
                "SELECT completed FROM queries WHERE query_id = ?1",
                params![query_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(completed.unwrap_or(0) != 0)
    }

    /// All cached papers for a query, in fetch order. Records are
    /// re-validated on the way out.
    pub fn papers_for(&self, query_id: &str) -> Result<Vec<Paper>, CacheError> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT record FROM papers WHERE query_id = ?1 ORDER BY page_index, id",
        )?;
        let rows = stmt.query_map(params![query_id], |r| r.get::<_, String>(0))?;
        let mut papers = Vec::new();
        for row in rows {
            let paper: Paper = serde_json::from_str(&row?)?;
            paper
                .validate()
                .map_err(|e| CacheError::Corrupt(format!("invalid paper leaving cache: {e}")))?;
            papers.push(paper);
        }
        Ok(papers)
    }

    pub fn page_count(&self, query_id: &str) -> Result<u32, CacheError> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE query_id = ?1",
            params![query_id],
            |r| r.get(0),
        )?)
    }

    /// Stored page indices for a query, ascending (test/diagnostic aid).
    pub fn page_indices(&self, query_id: &str) -> Result<Vec<u32>, CacheError> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT page_index FROM pages WHERE query_id = ?1 ORDER BY page_index",
        )?;
        let rows = stmt.query_map(params![query_id], |r| r.get(0))?;
        let mut indices = Vec::new();
        for row in rows {
            indices.push(row?);
        }
        Ok(indices)
    }

    /// Flush WAL and close. Dropping without calling this is safe; WAL
    /// recovery handles it on the next open.
    pub fn close(self) -> Result<(), CacheError> {
        let conn = self.conn.into_inner().expect("cache lock poisoned");
        conn.close().map_err(|(_, e)| CacheError::Db(e))
    }
}
