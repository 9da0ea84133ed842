//! Crossref adapter — offset pagination over the works endpoint
//!
//! A `polite_email` is sent as the `mailto` query parameter, which
//! Crossref uses to route requests into the polite pool. Abstracts
//! arrive as JATS fragments and are stripped to plain text.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;

use revline_core::model::clean_abstract;
use revline_core::{Author, Paper, Provenance, SearchError, http};

use crate::{AdapterPage, AdapterOptions, PageRequest, SourceAdapter};

const BASE_URL: &str = "https://api.crossref.org/works";
const MAX_ROWS: u32 = 1000;

pub struct CrossrefAdapter {
    options: AdapterOptions,
    base_url: String,
}

impl CrossrefAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self {
            options,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct WorksResponse {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Deserialize)]
struct Item {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<ItemAuthor>,
    issued: Option<DateParts>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(rename = "is-referenced-by-count", default)]
    is_referenced_by_count: u32,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    subject: Vec<String>,
    #[serde(default)]
    link: Vec<Link>,
}

#[derive(Deserialize)]
struct ItemAuthor {
    family: Option<String>,
    given: Option<String>,
    #[serde(rename = "ORCID")]
    orcid: Option<String>,
}

#[derive(Deserialize)]
struct DateParts {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<i32>>,
}

#[derive(Deserialize)]
struct Link {
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "content-type")]
    content_type: Option<String>,
}

/// Strip JATS/XML tags from a Crossref abstract.
fn strip_jats(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn parse_item(item: &Item, query: &str) -> Result<Paper, SearchError> {
    let authors: Vec<Author> = item
        .author
        .iter()
        .filter_map(|a| {
            a.family.as_ref().map(|family| Author {
                family: family.clone(),
                given: a.given.clone(),
                orcid: a.orcid.clone(),
            })
        })
        .collect();

    let year = item
        .issued
        .as_ref()
        .and_then(|d| d.date_parts.first())
        .and_then(|parts| parts.first())
        .copied();

    let pdf_url = item
        .link
        .iter()
        .find(|l| {
            l.content_type
                .as_deref()
                .is_some_and(|ct| ct == "application/pdf")
        })
        .and_then(|l| l.url.clone());

    let mut external_ids = BTreeMap::new();
    if let Some(doi) = &item.doi {
        external_ids.insert("doi".to_string(), doi.clone());
    }

    Paper {
        paper_id: String::new(),
        doi: item.doi.clone(),
        arxiv_id: None,
        title: item.title.first().cloned().unwrap_or_default(),
        title_hash: String::new(),
        authors,
        year,
        venue: item.container_title.first().cloned(),
        abstract_text: item
            .abstract_text
            .as_deref()
            .map(strip_jats)
            .as_deref()
            .and_then(clean_abstract),
        fields_of_study: item.subject.clone(),
        keywords: vec![],
        citation_count: item.is_referenced_by_count,
        open_access_pdf: pdf_url,
        external_ids,
        source: Provenance {
            database: "crossref".to_string(),
            query: query.to_string(),
            retrieved_at: Utc::now(),
        },
    }
    .finalize()
    .map_err(|e| SearchError::parse(format!("crossref record: {e}")))
}

impl SourceAdapter for CrossrefAdapter {
    fn name(&self) -> &str {
        "crossref"
    }

    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<AdapterPage, SearchError> {
        let rows = self.options.page_size.min(MAX_ROWS);
        let offset: u32 = match req.cursor {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| SearchError::internal(format!("bad crossref cursor {cursor:?}")))?,
            None => req.page_index * rows,
        };

        let mut params: Vec<(&str, String)> = vec![
            ("query", req.query.to_string()),
            ("rows", rows.to_string()),
            ("offset", offset.to_string()),
        ];
        let mut filters = Vec::new();
        if let Some(range) = req.date_range {
            if let Some(start) = range.start {
                filters.push(format!("from-pub-date:{start}"));
            }
            if let Some(end) = range.end {
                filters.push(format!("until-pub-date:{end}"));
            }
        }
        if !filters.is_empty() {
            params.push(("filter", filters.join(",")));
        }
        if let Some(email) = &self.options.polite_email {
            params.push(("mailto", email.clone()));
        }

        let url = reqwest::Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| SearchError::internal(format!("bad crossref url: {e}")))?;
        let headers = [("User-Agent", "revline/0.1".to_string())];
        let resp = http::get(url.as_str(), &headers, self.options.timeout)?.error_for_status()?;

        let parsed: WorksResponse = serde_json::from_str(&resp.body)
            .map_err(|e| SearchError::parse(format!("crossref response: {e}")))?;

        let mut papers = Vec::with_capacity(parsed.message.items.len());
        for item in &parsed.message.items {
            match parse_item(item, req.query) {
                Ok(paper) => papers.push(paper),
                Err(e) => log::debug!("skipping crossref record: {e}"),
            }
        }

        // A short page means the result set is exhausted
        let next_cursor = if parsed.message.items.len() < rows as usize {
            None
        } else {
            Some((offset + rows).to_string())
        };
        Ok(AdapterPage {
            papers,
            next_cursor,
            raw: resp.body,
        })
    }
}
