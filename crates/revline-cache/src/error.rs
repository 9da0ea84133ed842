//! Cache error type

use revline_core::SearchError;

/// Error from the page cache.
#[derive(Debug)]
pub enum CacheError {
    Db(rusqlite::Error),
    Encode(serde_json::Error),
    /// Attempt to store page `got` when `expected` is the next free index
    NonContiguous {
        query_id: String,
        expected: u32,
        got: u32,
    },
    /// On-disk state violates an invariant (gap in pages, bad record)
    Corrupt(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(e) => write!(f, "cache database: {e}"),
            Self::Encode(e) => write!(f, "cache encoding: {e}"),
            Self::NonContiguous {
                query_id,
                expected,
                got,
            } => write!(
                f,
                "non-contiguous page write for {query_id}: expected index {expected}, got {got}"
            ),
            Self::Corrupt(msg) => write!(f, "cache corrupt: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Db(e)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e)
    }
}

impl From<CacheError> for SearchError {
    fn from(e: CacheError) -> Self {
        match e {
            // A contiguity violation is a programming error, not bad disk state
            CacheError::NonContiguous { .. } => SearchError::internal(e.to_string()),
            other => SearchError::cache(other.to_string()),
        }
    }
}
