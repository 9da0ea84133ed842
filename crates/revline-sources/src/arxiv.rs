//! arXiv adapter — Atom feed over the export API
//!
//! Offset pagination via `start`/`max_results`. Date ranges become a
//! `submittedDate:[... TO ...]` clause in the search query. The feed is
//! XML, parsed with a small event-driven state machine.

use std::collections::BTreeMap;

use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::Event;

use revline_core::model::clean_abstract;
use revline_core::{Author, Paper, Provenance, SearchError, http};

use crate::{AdapterPage, AdapterOptions, PageRequest, SourceAdapter};

const BASE_URL: &str = "https://export.arxiv.org/api/query";

pub struct ArxivAdapter {
    options: AdapterOptions,
    base_url: String,
}

impl ArxivAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self {
            options,
            base_url: BASE_URL.to_string(),
        }
    }
}

/// One `<entry>` worth of accumulated fields.
#[derive(Default)]
struct Entry {
    id_url: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    doi: String,
    pdf_url: String,
    categories: Vec<String>,
}

impl Entry {
    fn into_paper(self, query: &str) -> Result<Paper, SearchError> {
        // The Atom id is a URL like http://arxiv.org/abs/2301.12345v1
        let native_id = self
            .id_url
            .rsplit("/abs/")
            .next()
            .unwrap_or(&self.id_url)
            .trim()
            .to_string();

        let year = self
            .published
            .get(..4)
            .and_then(|y| y.parse::<i32>().ok());

        let mut external_ids = BTreeMap::new();
        if !native_id.is_empty() {
            external_ids.insert("arxiv".to_string(), native_id.clone());
        }

        Paper {
            paper_id: String::new(),
            doi: if self.doi.is_empty() {
                None
            } else {
                Some(self.doi)
            },
            arxiv_id: Some(native_id),
            title: self.title.split_whitespace().collect::<Vec<_>>().join(" "),
            title_hash: String::new(),
            authors: self
                .authors
                .iter()
                .map(|name| Author::from_display_name(name))
                .collect(),
            year,
            venue: None,
            abstract_text: clean_abstract(&self.summary),
            fields_of_study: self.categories,
            keywords: vec![],
            citation_count: 0,
            open_access_pdf: if self.pdf_url.is_empty() {
                None
            } else {
                Some(self.pdf_url)
            },
            external_ids,
            source: Provenance {
                database: "arxiv".to_string(),
                query: query.to_string(),
                retrieved_at: Utc::now(),
            },
        }
        .finalize()
        .map_err(|e| SearchError::parse(format!("arxiv record: {e}")))
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn capture_link(e: &quick_xml::events::BytesStart<'_>, entry: &mut Entry) {
    if attr_value(e, "title").as_deref() == Some("pdf") {
        if let Some(href) = attr_value(e, "href") {
            entry.pdf_url = href;
        }
    }
}

/// Parse an Atom feed into entries; returns a PARSE error on broken XML.
fn parse_feed(xml: &str, query: &str) -> Result<Vec<Paper>, SearchError> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entry: Option<Entry> = None;
    let mut current_tag = String::new();
    let mut in_author = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tag == "entry" {
                    entry = Some(Entry::default());
                } else if let Some(entry) = entry.as_mut() {
                    if tag == "author" {
                        in_author = true;
                    } else if tag == "link" {
                        capture_link(&e, entry);
                    }
                    current_tag = tag;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = entry.as_mut() {
                    match e.name().as_ref() {
                        b"link" => capture_link(&e, entry),
                        b"category" => {
                            if let Some(term) = attr_value(&e, "term") {
                                entry.categories.push(term);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(entry) = entry.as_mut() {
                    let text = e.unescape().unwrap_or_default();
                    match current_tag.as_str() {
                        "id" => entry.id_url.push_str(&text),
                        "title" => entry.title.push_str(&text),
                        "summary" => entry.summary.push_str(&text),
                        "published" => entry.published.push_str(&text),
                        "name" if in_author => {
                            let name = text.trim().to_string();
                            if !name.is_empty() {
                                entry.authors.push(name);
                            }
                        }
                        "arxiv:doi" => entry.doi.push_str(text.trim()),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tag == "entry" {
                    if let Some(done) = entry.take() {
                        match done.into_paper(query) {
                            Ok(paper) => papers.push(paper),
                            Err(e) => log::debug!("skipping arxiv entry: {e}"),
                        }
                    }
                } else if tag == "author" {
                    in_author = false;
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SearchError::parse(format!("arxiv feed: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(papers)
}

impl SourceAdapter for ArxivAdapter {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<AdapterPage, SearchError> {
        let page_size = self.options.page_size;
        let start: u32 = match req.cursor {
            Some(cursor) => cursor
                .parse()
                .map_err(|_| SearchError::internal(format!("bad arxiv cursor {cursor:?}")))?,
            None => req.page_index * page_size,
        };

        let mut search_query = format!("all:{}", req.query);
        if let Some(range) = req.date_range {
            if !range.is_empty() {
                let from = range
                    .start
                    .map(|d| d.format("%Y%m%d0000").to_string())
                    .unwrap_or_else(|| "190001010000".to_string());
                let to = range
                    .end
                    .map(|d| d.format("%Y%m%d2359").to_string())
                    .unwrap_or_else(|| Utc::now().format("%Y%m%d2359").to_string());
                search_query.push_str(&format!(" AND submittedDate:[{from} TO {to}]"));
            }
        }

        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("search_query", search_query.as_str()),
                ("start", &start.to_string()),
                ("max_results", &page_size.to_string()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ],
        )
        .map_err(|e| SearchError::internal(format!("bad arxiv url: {e}")))?;

        let headers = [("User-Agent", "revline/0.1".to_string())];
        let resp = http::get(url.as_str(), &headers, self.options.timeout)?.error_for_status()?;

        let papers = parse_feed(&resp.body, req.query)?;
        let next_cursor = if papers.is_empty() {
            None
        } else {
            Some((start + page_size).to_string())
        };
        Ok(AdapterPage {
            papers,
            next_cursor,
            raw: resp.body,
        })
    }
}
