//! Closed adapter option set
//!
//! Task configuration arrives as a string map; it is folded over the
//! per-source defaults into this struct. Unknown keys are an error —
//! silent typos in rate-sensitive settings are worse than a rejection.

use std::collections::BTreeMap;
use std::time::Duration;

use revline_core::SearchError;

/// Recognized per-task adapter options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Records per page (source-dependent default)
    pub page_size: u32,
    /// Per-request timeout
    pub timeout: Duration,
    /// Credential header value, if the source supports one
    pub api_key: Option<String>,
    /// Contact email for sources honoring a polite pool
    pub polite_email: Option<String>,
    /// Retry cap for one page (attempts = max_retries + 1)
    pub max_retries: u32,
}

impl AdapterOptions {
    /// Documented defaults per source; unknown sources get conservative
    /// values.
    pub fn defaults_for(source: &str) -> Self {
        let (page_size, timeout_secs) = match source {
            "openalex" => (100, 30),
            "semantic_scholar" => (20, 30),
            "arxiv" => (50, 60),
            "crossref" => (100, 30),
            _ => (25, 30),
        };
        Self {
            page_size,
            timeout: Duration::from_secs(timeout_secs),
            api_key: None,
            polite_email: None,
            max_retries: 5,
        }
    }

    /// Apply a task's option map over the source defaults.
    ///
    /// Every key must be one of the enumerated options; anything else is
    /// a VALIDATION error.
    pub fn from_map(source: &str, map: &BTreeMap<String, String>) -> Result<Self, SearchError> {
        let mut options = Self::defaults_for(source);
        for (key, value) in map {
            match key.as_str() {
                "page_size" => {
                    let size: u32 = value.parse().map_err(|_| {
                        SearchError::validation(format!("page_size must be an integer: {value:?}"))
                    })?;
                    if size == 0 {
                        return Err(SearchError::validation("page_size must be positive"));
                    }
                    options.page_size = size;
                }
                "timeout_seconds" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        SearchError::validation(format!(
                            "timeout_seconds must be an integer: {value:?}"
                        ))
                    })?;
                    options.timeout = Duration::from_secs(secs);
                }
                "api_key" => options.api_key = Some(value.clone()),
                "polite_email" => options.polite_email = Some(value.clone()),
                "max_retries" => {
                    options.max_retries = value.parse().map_err(|_| {
                        SearchError::validation(format!(
                            "max_retries must be an integer: {value:?}"
                        ))
                    })?;
                }
                other => {
                    return Err(SearchError::validation(format!(
                        "unknown adapter option '{other}'"
                    )));
                }
            }
        }
        Ok(options)
    }

    /// Canonical rendering for the QueryIdentity hash. Field order is
    /// fixed; two equal option sets always fingerprint identically.
    pub fn fingerprint(&self) -> String {
        format!(
            "page_size={};timeout={};api_key={};polite_email={};max_retries={}",
            self.page_size,
            self.timeout.as_secs(),
            self.api_key.as_deref().unwrap_or(""),
            self.polite_email.as_deref().unwrap_or(""),
            self.max_retries,
        )
    }
}
