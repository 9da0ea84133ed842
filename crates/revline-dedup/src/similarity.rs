//! Order-insensitive title similarity
//!
//! Titles are normalized (lowercase, punctuation dropped, whitespace
//! collapsed), tokenized, deduplicated and sorted, then compared with a
//! normalized edit distance. Word order and repetition differences
//! therefore cost nothing; real wording differences do.

use std::collections::BTreeSet;

use revline_core::ids::normalize_title;

/// Similarity in [0, 1] between two titles, insensitive to case,
/// punctuation, and token order.
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let key_a = token_set_key(a);
    let key_b = token_set_key(b);
    if key_a.is_empty() || key_b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&key_a, &key_b)
}

fn token_set_key(title: &str) -> String {
    let normalized = normalize_title(title);
    let tokens: BTreeSet<&str> = normalized.split_whitespace().collect();
    tokens.into_iter().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_after_normalization() {
        let sim = token_set_similarity(
            "Deep Learning for Image Classification.",
            "deep learning for image classification",
        );
        assert!((sim - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn word_order_ignored() {
        let sim = token_set_similarity("image classification deep learning", "deep learning image classification");
        assert!((sim - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn different_titles_score_low() {
        let sim = token_set_similarity(
            "Quantum Error Correction Codes",
            "A Survey of Graph Neural Networks",
        );
        assert!(sim < 0.5, "similarity {sim}");
    }

    #[test]
    fn near_identical_titles_score_high() {
        let sim = token_set_similarity(
            "A Survey of Graph Neural Networks",
            "A Survey of Graph Neural Network",
        );
        assert!(sim >= 0.9, "similarity {sim}");
    }

    #[test]
    fn empty_title_scores_zero() {
        assert_eq!(token_set_similarity("", "anything"), 0.0);
        assert_eq!(token_set_similarity("...", "anything"), 0.0);
    }
}
