//! Identifier normalization and deterministic paper ids
//!
//! DOI/arXiv canonicalization, title hashing, and flexible date parsing.
//! Every function here is deterministic across runs — derived ids and
//! hashes are cache keys and dedup inputs.

use chrono::NaiveDate;

/// Canonicalize a DOI: strip any URL prefix up to `doi.org/` and a
/// leading `doi:` scheme, lowercase, trim. Returns `None` when the
/// remainder is not of the form `10.<digits>/<suffix>`.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    if let Some(idx) = doi.find("doi.org/") {
        doi = doi[idx + "doi.org/".len()..].to_string();
    }
    if let Some(stripped) = doi.strip_prefix("doi:") {
        doi = stripped.to_string();
    }
    let doi = doi.trim();
    if is_valid_doi(doi) {
        Some(doi.to_string())
    } else {
        None
    }
}

/// `10.<digits>/<non-empty suffix without whitespace>`
fn is_valid_doi(doi: &str) -> bool {
    let Some(rest) = doi.strip_prefix("10.") else {
        return false;
    };
    let Some(slash) = rest.find('/') else {
        return false;
    };
    let registrant = &rest[..slash];
    let suffix = &rest[slash + 1..];
    !registrant.is_empty()
        && registrant.bytes().all(|b| b.is_ascii_digit())
        && !suffix.is_empty()
        && !suffix.chars().any(char::is_whitespace)
}

/// Canonicalize an arXiv id: strip a case-insensitive `arXiv:` prefix
/// and a trailing `vN` version suffix, lowercase. Old-style
/// `hep-th/9901001` and new-style `2103.12345` are both kept as-is.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let mut id = raw.trim();
    if id.len() >= 6 && id[..6].eq_ignore_ascii_case("arxiv:") {
        id = &id[6..];
    }
    let id = id.trim();
    let stripped = match id.rfind(['v', 'V']) {
        Some(pos) if pos > 0 && !id[pos + 1..].is_empty() => {
            if id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) {
                &id[..pos]
            } else {
                id
            }
        }
        _ => id,
    };
    let normalized = stripped.to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalize a title for comparison: lowercase, drop punctuation,
/// collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else {
                ' '
            }
        })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable 64-bit content hash of the normalized title, as 16 hex chars.
pub fn title_hash(title: &str) -> String {
    let normalized = normalize_title(title);
    blake3::hash(normalized.as_bytes()).to_hex()[..16].to_string()
}

/// Derive the deterministic paper id.
///
/// Preference order: DOI, then arXiv id, then (title hash, year, first
/// author surname). Inputs must already be normalized. Returns `None`
/// when no identifier basis exists — the record is rejected upstream.
pub fn derive_paper_id(
    doi: Option<&str>,
    arxiv_id: Option<&str>,
    title: &str,
    year: Option<i32>,
    first_author_surname: Option<&str>,
) -> Option<String> {
    if let Some(doi) = doi {
        return Some(format!("doi:{doi}"));
    }
    if let Some(arxiv) = arxiv_id {
        return Some(format!("arxiv:{arxiv}"));
    }
    let year = year?;
    if title.trim().is_empty() {
        return None;
    }
    let surname = first_author_surname.unwrap_or("").to_lowercase();
    Some(format!("title:{}:{year}:{surname}", title_hash(title)))
}

/// Parse a date in one of the accepted layouts:
/// `YYYY-MM-DD`, `YYYY/MM/DD`, `DD-MM-YYYY`, `DD/MM/YYYY`, `YYYY-MM`,
/// `YYYY`. Anything else is rejected.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let b = s.as_bytes();
    match b.len() {
        10 if b[4] == b'-' && b[7] == b'-' => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
        10 if b[4] == b'/' && b[7] == b'/' => NaiveDate::parse_from_str(s, "%Y/%m/%d").ok(),
        10 if b[2] == b'-' && b[5] == b'-' => NaiveDate::parse_from_str(s, "%d-%m-%Y").ok(),
        10 if b[2] == b'/' && b[5] == b'/' => NaiveDate::parse_from_str(s, "%d/%m/%Y").ok(),
        7 if b[4] == b'-' => {
            let year: i32 = s[..4].parse().ok()?;
            let month: u32 = s[5..].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1)
        }
        4 if b.iter().all(|c| c.is_ascii_digit()) => {
            let year: i32 = s.parse().ok()?;
            NaiveDate::from_ymd_opt(year, 1, 1)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_strips_url_prefixes() {
        for raw in [
            "https://doi.org/10.1145/3442188.3445922",
            "http://dx.doi.org/10.1145/3442188.3445922",
            "doi:10.1145/3442188.3445922",
            "10.1145/3442188.3445922",
            "  10.1145/3442188.3445922  ",
        ] {
            assert_eq!(
                normalize_doi(raw).as_deref(),
                Some("10.1145/3442188.3445922"),
                "input: {raw}"
            );
        }
    }

    #[test]
    fn doi_lowercases() {
        assert_eq!(
            normalize_doi("10.1000/ABC.Def").as_deref(),
            Some("10.1000/abc.def")
        );
    }

    #[test]
    fn doi_rejects_malformed() {
        for raw in ["", "not-a-doi", "11.1000/x", "10./x", "10.1000/", "10.1000", "10.1a00/x"] {
            assert_eq!(normalize_doi(raw), None, "input: {raw}");
        }
    }

    #[test]
    fn doi_normalization_is_idempotent() {
        let once = normalize_doi("https://doi.org/10.1038/NPHYS1170").unwrap();
        assert_eq!(normalize_doi(&once).as_deref(), Some(once.as_str()));
    }

    #[test]
    fn arxiv_strips_prefix_and_version() {
        assert_eq!(
            normalize_arxiv_id("arXiv:1706.03762v5").as_deref(),
            Some("1706.03762")
        );
        assert_eq!(
            normalize_arxiv_id("1706.03762v1").as_deref(),
            Some("1706.03762")
        );
        assert_eq!(
            normalize_arxiv_id("1706.03762").as_deref(),
            Some("1706.03762")
        );
    }

    #[test]
    fn arxiv_old_style_survives() {
        assert_eq!(
            normalize_arxiv_id("hep-th/9901001").as_deref(),
            Some("hep-th/9901001")
        );
        assert_eq!(
            normalize_arxiv_id("arXiv:hep-th/9901001v2").as_deref(),
            Some("hep-th/9901001")
        );
    }

    #[test]
    fn arxiv_normalization_is_idempotent() {
        let once = normalize_arxiv_id("arXiv:2103.12345v3").unwrap();
        assert_eq!(normalize_arxiv_id(&once).as_deref(), Some(once.as_str()));
    }

    #[test]
    fn arxiv_empty_rejected() {
        assert_eq!(normalize_arxiv_id(""), None);
        assert_eq!(normalize_arxiv_id("arXiv:"), None);
    }

    #[test]
    fn title_normalization() {
        assert_eq!(
            normalize_title("Deep Learning for Image Classification."),
            "deep learning for image classification"
        );
        assert_eq!(normalize_title("  A:  B--C  "), "a b c");
    }

    #[test]
    fn title_hash_stable_across_variants() {
        let a = title_hash("Deep Learning for Image Classification.");
        let b = title_hash("deep learning  for image CLASSIFICATION");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn paper_id_prefers_doi() {
        let id = derive_paper_id(
            Some("10.1/x"),
            Some("2103.12345"),
            "Some Title",
            Some(2020),
            Some("Doe"),
        );
        assert_eq!(id.as_deref(), Some("doi:10.1/x"));
    }

    #[test]
    fn paper_id_falls_back_to_arxiv_then_title() {
        assert_eq!(
            derive_paper_id(None, Some("2103.12345"), "T", None, None).as_deref(),
            Some("arxiv:2103.12345")
        );
        let id = derive_paper_id(None, None, "Some Title", Some(2020), Some("Doe")).unwrap();
        assert!(id.starts_with("title:"));
        assert!(id.ends_with(":2020:doe"));
    }

    #[test]
    fn paper_id_requires_some_identifier() {
        assert_eq!(derive_paper_id(None, None, "Title only", None, None), None);
        assert_eq!(derive_paper_id(None, None, "", Some(2020), None), None);
    }

    #[test]
    fn date_formats() {
        let d = NaiveDate::from_ymd_opt(2021, 3, 14).unwrap();
        assert_eq!(parse_date("2021-03-14"), Some(d));
        assert_eq!(parse_date("2021/03/14"), Some(d));
        assert_eq!(parse_date("14-03-2021"), Some(d));
        assert_eq!(parse_date("14/03/2021"), Some(d));
        assert_eq!(
            parse_date("2021-03"),
            NaiveDate::from_ymd_opt(2021, 3, 1)
        );
        assert_eq!(parse_date("2021"), NaiveDate::from_ymd_opt(2021, 1, 1));
    }

    #[test]
    fn date_rejects_other_layouts() {
        for raw in ["March 14, 2021", "2021-3-4", "14.03.2021", "", "21"] {
            assert_eq!(parse_date(raw), None, "input: {raw}");
        }
    }
}
