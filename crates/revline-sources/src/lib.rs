//! Revline Sources - pluggable scholarly source adapters
//!
//! An adapter turns one page request into typed [`Paper`] records plus a
//! pagination cursor. Adapters own pagination token semantics and field
//! normalization only: rate limiting belongs to the limiter, retries to
//! the worker loop. Failures come back as classified
//! [`SearchError`](revline_core::SearchError) values.

pub mod arxiv;
pub mod config;
pub mod crossref;
pub mod openalex;
pub mod semantic_scholar;

use std::collections::HashMap;

use revline_core::{DateRange, Paper, SearchError};

pub use config::AdapterOptions;

/// One page worth of work for an adapter.
#[derive(Debug)]
pub struct PageRequest<'a> {
    pub query: &'a str,
    pub date_range: Option<&'a DateRange>,
    /// Total records the task wants (adapters may cap their page size)
    pub limit: Option<u32>,
    /// Zero-based page index (offset-paginated sources derive the offset)
    pub page_index: u32,
    /// Cursor returned by the previous page, if the source uses cursors
    pub cursor: Option<&'a str>,
    pub options: &'a AdapterOptions,
}

/// Adapter result for one page.
#[derive(Debug)]
pub struct AdapterPage {
    pub papers: Vec<Paper>,
    /// Cursor for the next page; `None` signals END
    pub next_cursor: Option<String>,
    /// Raw response body, persisted by the cache
    pub raw: String,
}

/// Contract every concrete source implements.
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch and normalize one page. Must not rate-limit or retry.
    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<AdapterPage, SearchError>;
}

/// Factory producing an adapter for a given option set.
pub type AdapterFactory = Box<dyn Fn(&AdapterOptions) -> Box<dyn SourceAdapter> + Send + Sync>;

/// Registry of source-name → adapter factory.
///
/// The manager holds one registry; tests register stub factories on a
/// private instance instead of touching the real sources.
pub struct SourceRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl SourceRegistry {
    /// Empty registry (for tests and embedders).
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the four built-in sources.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("openalex", |opts| {
            Box::new(openalex::OpenAlexAdapter::new(opts.clone()))
        });
        registry.register("semantic_scholar", |opts| {
            Box::new(semantic_scholar::SemanticScholarAdapter::new(opts.clone()))
        });
        registry.register("crossref", |opts| {
            Box::new(crossref::CrossrefAdapter::new(opts.clone()))
        });
        registry.register("arxiv", |opts| {
            Box::new(arxiv::ArxivAdapter::new(opts.clone()))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&AdapterOptions) -> Box<dyn SourceAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Instantiate an adapter, or a VALIDATION error for unknown names.
    pub fn create(
        &self,
        source: &str,
        options: &AdapterOptions,
    ) -> Result<Box<dyn SourceAdapter>, SearchError> {
        let factory = self.factories.get(source).ok_or_else(|| {
            SearchError::validation(format!(
                "unknown source '{source}' (registered: {})",
                self.source_names().join(", ")
            ))
        })?;
        Ok(factory(options))
    }

    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_contractual_sources() {
        let registry = SourceRegistry::with_defaults();
        assert_eq!(
            registry.source_names(),
            ["arxiv", "crossref", "openalex", "semantic_scholar"]
        );
    }

    #[test]
    fn unknown_source_is_validation_error() {
        let registry = SourceRegistry::with_defaults();
        let err = match registry.create("scopus", &AdapterOptions::defaults_for("scopus")) {
            Err(e) => e,
            Ok(_) => panic!("expected unknown source to be rejected"),
        };
        assert_eq!(err.kind(), revline_core::ErrorKind::Validation);
    }

    #[test]
    fn custom_factory_plugs_in() {
        struct Nop;
        impl SourceAdapter for Nop {
            fn name(&self) -> &str {
                "nop"
            }
            fn fetch_page(&self, _req: &PageRequest<'_>) -> Result<AdapterPage, SearchError> {
                Ok(AdapterPage {
                    papers: vec![],
                    next_cursor: None,
                    raw: String::new(),
                })
            }
        }
        let mut registry = SourceRegistry::new();
        registry.register("nop", |_| Box::new(Nop));
        let adapter = registry
            .create("nop", &AdapterOptions::defaults_for("nop"))
            .unwrap();
        assert_eq!(adapter.name(), "nop");
    }
}
