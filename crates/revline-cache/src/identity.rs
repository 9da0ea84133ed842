//! Content-addressed query identity
//!
//! Two tasks with the same (source, normalized query, date range, limit,
//! adapter config) share cached pages. The identity must be stable
//! across runs — it is the cache key.

use revline_core::DateRange;

/// Collapse whitespace and lowercase so trivially different query
/// strings share a cache entry.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic 16-hex-char identity for a search.
///
/// `config_fingerprint` is the adapter options rendered in a canonical
/// order (see `AdapterOptions::fingerprint`).
pub fn query_identity(
    source: &str,
    query: &str,
    date_range: Option<&DateRange>,
    limit: Option<u32>,
    config_fingerprint: &str,
) -> String {
    let range = date_range.map(|r| r.to_string()).unwrap_or_default();
    let limit = limit.map(|l| l.to_string()).unwrap_or_default();
    let key = format!(
        "{source}|{}|{range}|{limit}|{config_fingerprint}",
        normalize_query(query)
    );
    blake3::hash(key.as_bytes()).to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn whitespace_and_case_insensitive() {
        let a = query_identity("openalex", "Machine  Learning", None, None, "");
        let b = query_identity("openalex", "machine learning", None, None, "");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn parameters_change_identity() {
        let base = query_identity("openalex", "ml", None, None, "");
        assert_ne!(base, query_identity("crossref", "ml", None, None, ""));
        assert_ne!(base, query_identity("openalex", "ml", None, Some(10), ""));
        assert_ne!(
            base,
            query_identity("openalex", "ml", None, None, "page_size=50")
        );
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2020, 1, 1),
            end: None,
        };
        assert_ne!(
            base,
            query_identity("openalex", "ml", Some(&range), None, "")
        );
    }

    #[test]
    fn deterministic_across_calls() {
        let a = query_identity("arxiv", "quantum error correction", None, Some(100), "x");
        let b = query_identity("arxiv", "quantum error correction", None, Some(100), "x");
        assert_eq!(a, b);
    }
}
