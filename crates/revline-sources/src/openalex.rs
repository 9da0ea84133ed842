//! OpenAlex adapter — cursor pagination over the works endpoint
//!
//! Abstracts arrive as an inverted index and are rebuilt into plain
//! text. A `polite_email` joins the polite pool via the User-Agent.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;

use revline_core::model::clean_abstract;
use revline_core::{Author, Paper, Provenance, SearchError, http};

use crate::{AdapterPage, AdapterOptions, PageRequest, SourceAdapter};

const BASE_URL: &str = "https://api.openalex.org/works";
const MAX_PER_PAGE: u32 = 200;
/// Concepts below this score are noise, not fields of study
const CONCEPT_SCORE_FLOOR: f64 = 0.3;

pub struct OpenAlexAdapter {
    options: AdapterOptions,
    base_url: String,
}

impl OpenAlexAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self {
            options,
            base_url: BASE_URL.to_string(),
        }
    }

    fn user_agent(&self) -> String {
        match &self.options.polite_email {
            Some(email) => format!("revline/0.1 (mailto:{email})"),
            None => "revline/0.1".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct WorksResponse {
    #[serde(default)]
    meta: Meta,
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Deserialize, Default)]
struct Meta {
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct Work {
    id: Option<String>,
    title: Option<String>,
    doi: Option<String>,
    publication_year: Option<i32>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    abstract_inverted_index: Option<BTreeMap<String, Vec<u32>>>,
    primary_location: Option<Location>,
    open_access: Option<OpenAccess>,
    #[serde(default)]
    concepts: Vec<Concept>,
    #[serde(default)]
    cited_by_count: u32,
}

#[derive(Deserialize)]
struct Authorship {
    author: Option<WorkAuthor>,
}

#[derive(Deserialize)]
struct WorkAuthor {
    display_name: Option<String>,
    orcid: Option<String>,
}

#[derive(Deserialize)]
struct Location {
    source: Option<LocationSource>,
}

#[derive(Deserialize)]
struct LocationSource {
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct OpenAccess {
    #[serde(default)]
    is_oa: bool,
    oa_url: Option<String>,
}

#[derive(Deserialize)]
struct Concept {
    display_name: Option<String>,
    #[serde(default)]
    score: f64,
}

/// Rebuild abstract text from OpenAlex's word → positions map.
fn reconstruct_abstract(index: &BTreeMap<String, Vec<u32>>) -> Option<String> {
    let mut words: Vec<(u32, &str)> = Vec::new();
    for (word, positions) in index {
        for &pos in positions {
            words.push((pos, word));
        }
    }
    words.sort_unstable_by_key(|&(pos, _)| pos);
    let text = words
        .iter()
        .map(|&(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ");
    clean_abstract(&text)
}

fn parse_work(work: &Work, query: &str) -> Result<Paper, SearchError> {
    let native_id = work
        .id
        .as_deref()
        .and_then(|id| id.rsplit('/').next())
        .unwrap_or_default()
        .to_string();

    let authors: Vec<Author> = work
        .authorships
        .iter()
        .filter_map(|a| a.author.as_ref())
        .filter_map(|a| {
            a.display_name.as_deref().map(|name| {
                let mut author = Author::from_display_name(name);
                author.orcid = a.orcid.clone();
                author
            })
        })
        .collect();

    let venue = work
        .primary_location
        .as_ref()
        .and_then(|l| l.source.as_ref())
        .and_then(|s| s.display_name.clone());

    let fields: Vec<String> = work
        .concepts
        .iter()
        .filter(|c| c.score > CONCEPT_SCORE_FLOOR)
        .filter_map(|c| c.display_name.clone())
        .collect();

    let open_access_pdf = work.open_access.as_ref().and_then(|oa| {
        if oa.is_oa {
            oa.oa_url.clone()
        } else {
            None
        }
    });

    let mut external_ids = BTreeMap::new();
    if !native_id.is_empty() {
        external_ids.insert("openalex".to_string(), native_id);
    }
    if let Some(doi) = &work.doi {
        external_ids.insert("doi".to_string(), doi.clone());
    }

    Paper {
        paper_id: String::new(),
        doi: work.doi.clone(),
        arxiv_id: None,
        title: work.title.clone().unwrap_or_default(),
        title_hash: String::new(),
        authors,
        year: work.publication_year,
        venue,
        abstract_text: work
            .abstract_inverted_index
            .as_ref()
            .and_then(reconstruct_abstract),
        fields_of_study: fields,
        keywords: vec![],
        citation_count: work.cited_by_count,
        open_access_pdf,
        external_ids,
        source: Provenance {
            database: "openalex".to_string(),
            query: query.to_string(),
            retrieved_at: Utc::now(),
        },
    }
    .finalize()
    .map_err(|e| SearchError::parse(format!("openalex record: {e}")))
}

impl SourceAdapter for OpenAlexAdapter {
    fn name(&self) -> &str {
        "openalex"
    }

    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<AdapterPage, SearchError> {
        let per_page = self.options.page_size.min(MAX_PER_PAGE).to_string();
        let cursor = req.cursor.unwrap_or("*");

        let mut params: Vec<(&str, String)> = vec![
            ("search", req.query.to_string()),
            ("per-page", per_page),
            ("cursor", cursor.to_string()),
        ];
        let mut filters = Vec::new();
        if let Some(range) = req.date_range {
            if let Some(start) = range.start {
                filters.push(format!("from_publication_date:{start}"));
            }
            if let Some(end) = range.end {
                filters.push(format!("to_publication_date:{end}"));
            }
        }
        if !filters.is_empty() {
            params.push(("filter", filters.join(",")));
        }

        let url = reqwest::Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| SearchError::internal(format!("bad openalex url: {e}")))?;
        let headers = [("User-Agent", self.user_agent())];
        let resp = http::get(url.as_str(), &headers, self.options.timeout)?.error_for_status()?;

        let parsed: WorksResponse = serde_json::from_str(&resp.body)
            .map_err(|e| SearchError::parse(format!("openalex response: {e}")))?;

        let mut papers = Vec::with_capacity(parsed.results.len());
        for work in &parsed.results {
            match parse_work(work, req.query) {
                Ok(paper) => papers.push(paper),
                Err(e) => log::debug!("skipping openalex record: {e}"),
            }
        }

        let next_cursor = if parsed.results.is_empty() {
            None
        } else {
            parsed.meta.next_cursor
        };
        Ok(AdapterPage {
            papers,
            next_cursor,
            raw: resp.body,
        })
    }
}
