//! Semantic Scholar adapter — offset pagination over the graph API
//!
//! An `api_key` option becomes the `x-api-key` header. The graph API
//! caps page size at 100 and reports the next offset in `next`.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;

use revline_core::model::clean_abstract;
use revline_core::{Author, Paper, Provenance, SearchError, http};

use crate::{AdapterPage, AdapterOptions, PageRequest, SourceAdapter};

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
const MAX_PER_PAGE: u32 = 100;
const FIELDS: &str = "paperId,externalIds,title,abstract,venue,year,citationCount,\
                      fieldsOfStudy,authors,openAccessPdf,publicationDate";

pub struct SemanticScholarAdapter {
    options: AdapterOptions,
    base_url: String,
}

impl SemanticScholarAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self {
            options,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
    next: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    #[serde(default)]
    external_ids: BTreeMap<String, serde_json::Value>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    venue: Option<String>,
    year: Option<i32>,
    #[serde(default)]
    citation_count: u32,
    fields_of_study: Option<Vec<String>>,
    #[serde(default)]
    authors: Vec<S2Author>,
    open_access_pdf: Option<OpenAccessPdf>,
}

#[derive(Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Deserialize)]
struct OpenAccessPdf {
    url: Option<String>,
}

fn external_id(map: &BTreeMap<String, serde_json::Value>, key: &str) -> Option<String> {
    map.get(key).map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn parse_record(record: &S2Paper, query: &str) -> Result<Paper, SearchError> {
    let doi = external_id(&record.external_ids, "DOI");
    let arxiv_id = external_id(&record.external_ids, "ArXiv");

    let authors: Vec<Author> = record
        .authors
        .iter()
        .filter_map(|a| a.name.as_deref())
        .map(Author::from_display_name)
        .collect();

    let mut external_ids = BTreeMap::new();
    if let Some(id) = &record.paper_id {
        external_ids.insert("semantic_scholar".to_string(), id.clone());
    }
    if let Some(doi) = &doi {
        external_ids.insert("doi".to_string(), doi.clone());
    }

    Paper {
        paper_id: String::new(),
        doi,
        arxiv_id,
        title: record.title.clone().unwrap_or_default(),
        title_hash: String::new(),
        authors,
        year: record.year,
        venue: record.venue.clone().filter(|v| !v.is_empty()),
        abstract_text: record
            .abstract_text
            .as_deref()
            .and_then(clean_abstract),
        fields_of_study: record.fields_of_study.clone().unwrap_or_default(),
        keywords: vec![],
        citation_count: record.citation_count,
        open_access_pdf: record.open_access_pdf.as_ref().and_then(|p| p.url.clone()),
        external_ids,
        source: Provenance {
            database: "semantic_scholar".to_string(),
            query: query.to_string(),
            retrieved_at: Utc::now(),
        },
    }
    .finalize()
    .map_err(|e| SearchError::parse(format!("semantic_scholar record: {e}")))
}

impl SourceAdapter for SemanticScholarAdapter {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<AdapterPage, SearchError> {
        let page_size = self.options.page_size.min(MAX_PER_PAGE);
        // Cursor is the stringified next offset; first page starts at 0
        let offset: u32 = match req.cursor {
            Some(cursor) => cursor.parse().map_err(|_| {
                SearchError::internal(format!("bad semantic_scholar cursor {cursor:?}"))
            })?,
            None => req.page_index * page_size,
        };

        let mut params: Vec<(&str, String)> = vec![
            ("query", req.query.to_string()),
            ("offset", offset.to_string()),
            ("limit", page_size.to_string()),
            ("fields", FIELDS.to_string()),
        ];
        if let Some(range) = req.date_range {
            // The graph API filters by year only
            let from = range.start.map(|d| d.format("%Y").to_string());
            let to = range.end.map(|d| d.format("%Y").to_string());
            if from.is_some() || to.is_some() {
                params.push((
                    "year",
                    format!(
                        "{}-{}",
                        from.unwrap_or_default(),
                        to.unwrap_or_default()
                    ),
                ));
            }
        }

        let url = reqwest::Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| SearchError::internal(format!("bad semantic_scholar url: {e}")))?;
        let mut headers: Vec<(&str, String)> = vec![("User-Agent", "revline/0.1".to_string())];
        if let Some(key) = &self.options.api_key {
            headers.push(("x-api-key", key.clone()));
        }
        let resp = http::get(url.as_str(), &headers, self.options.timeout)?.error_for_status()?;

        let parsed: SearchResponse = serde_json::from_str(&resp.body)
            .map_err(|e| SearchError::parse(format!("semantic_scholar response: {e}")))?;

        let mut papers = Vec::with_capacity(parsed.data.len());
        for record in &parsed.data {
            match parse_record(record, req.query) {
                Ok(paper) => papers.push(paper),
                Err(e) => log::debug!("skipping semantic_scholar record: {e}"),
            }
        }

        let next_cursor = if parsed.data.is_empty() {
            None
        } else {
            parsed.next.map(|n| n.to_string())
        };
        Ok(AdapterPage {
            papers,
            next_cursor,
            raw: resp.body,
        })
    }
}
