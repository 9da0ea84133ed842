//! Paper records and related value types
//!
//! A [`Paper`] is a validated value: adapters fill in the raw fields and
//! call [`Paper::finalize`], which canonicalizes identifiers, derives the
//! deterministic `paper_id`, and checks the record invariant (at least
//! one of DOI, arXiv id, or title+year). The cache re-validates records
//! on both entry and exit.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;

/// Years below this are treated as data corruption, not history.
const MIN_YEAR: i32 = 1500;

/// One author, ordered as received from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

impl Author {
    /// Split a display name on the last space: everything after it is
    /// the family name. Single-token names become the family name.
    pub fn from_display_name(name: &str) -> Self {
        let name = name.trim();
        match name.rsplit_once(' ') {
            Some((given, family)) => Self {
                family: family.to_string(),
                given: Some(given.trim().to_string()),
                orcid: None,
            },
            None => Self {
                family: name.to_string(),
                given: None,
                orcid: None,
            },
        }
    }

    pub fn display_name(&self) -> String {
        match &self.given {
            Some(given) => format!("{given} {}", self.family),
            None => self.family.clone(),
        }
    }
}

/// Inclusive publication-date window for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_part = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        write!(f, "{}..{}", fmt_part(self.start), fmt_part(self.end))
    }
}

/// Where a record came from: origin database, the query that retrieved
/// it, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub database: String,
    pub query: String,
    pub retrieved_at: DateTime<Utc>,
}

/// A cited work, used as deduplicator input when enrichment is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Canonical DOI of the cited work
    pub cited_doi: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// A normalized paper record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Deterministic id derived from DOI / arXiv / title+year+surname
    pub paper_id: String,
    /// Canonical DOI (lowercased, prefix-stripped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Canonical arXiv id (version-stripped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    pub title: String,
    /// Stable hash of the normalized title
    pub title_hash: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub fields_of_study: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub citation_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_access_pdf: Option<String>,
    /// source-name → native id
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    pub source: Provenance,
}

/// Why a record was rejected at construction or a cache boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// None of DOI, arXiv id, or (title, year) present
    MissingIdentifier,
    YearOutOfRange(i32),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => {
                write!(f, "record has no DOI, arXiv id, or (title, year)")
            }
            Self::YearOutOfRange(y) => write!(f, "publication year {y} out of range"),
        }
    }
}

impl std::error::Error for ModelError {}

impl Paper {
    /// Canonicalize identifiers, derive `paper_id` and `title_hash`, and
    /// validate. Adapters call this on every record they emit; invalid
    /// DOIs/arXiv ids are dropped rather than kept malformed.
    pub fn finalize(mut self) -> Result<Self, ModelError> {
        self.doi = self.doi.as_deref().and_then(ids::normalize_doi);
        self.arxiv_id = self.arxiv_id.as_deref().and_then(ids::normalize_arxiv_id);
        self.title = self.title.trim().to_string();
        self.title_hash = ids::title_hash(&self.title);
        let surname = self.authors.first().map(|a| a.family.clone());
        self.paper_id = ids::derive_paper_id(
            self.doi.as_deref(),
            self.arxiv_id.as_deref(),
            &self.title,
            self.year,
            surname.as_deref(),
        )
        .ok_or(ModelError::MissingIdentifier)?;
        self.validate()?;
        Ok(self)
    }

    /// Check the record invariant without rebuilding derived fields.
    pub fn validate(&self) -> Result<(), ModelError> {
        if let Some(year) = self.year {
            let max = Utc::now().year() + 1;
            if !(MIN_YEAR..=max).contains(&year) {
                return Err(ModelError::YearOutOfRange(year));
            }
        }
        let has_title_year = !self.title.is_empty() && self.year.is_some();
        if self.doi.is_none() && self.arxiv_id.is_none() && !has_title_year {
            return Err(ModelError::MissingIdentifier);
        }
        Ok(())
    }

    /// Number of non-empty metadata fields among abstract, venue,
    /// authors, year, open-access PDF, and fields of study. Used for
    /// canonical selection in deduplication.
    pub fn completeness_score(&self) -> u32 {
        u32::from(self.abstract_text.as_deref().is_some_and(|a| !a.is_empty()))
            + u32::from(self.venue.as_deref().is_some_and(|v| !v.is_empty()))
            + u32::from(!self.authors.is_empty())
            + u32::from(self.year.is_some())
            + u32::from(self.open_access_pdf.is_some())
            + u32::from(!self.fields_of_study.is_empty())
    }

    pub fn first_author_surname(&self) -> Option<&str> {
        self.authors.first().map(|a| a.family.as_str())
    }
}

/// Collapse whitespace and truncate an abstract; empty results become
/// `None`.
pub fn clean_abstract(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 5000;
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        Some(format!("{}...", &cleaned[..cut]))
    } else {
        Some(cleaned)
    }
}
