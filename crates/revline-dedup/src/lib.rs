//! Revline Dedup - duplicate clustering for the combined corpus
//!
//! Three passes over the input set, each claiming records the later
//! passes skip: exact DOI, exact arXiv id, then fuzzy title+year via
//! union-find. Clusters elect a canonical record and merge metadata
//! into it. Pure over its inputs: no I/O, no network.

pub mod engine;
pub mod similarity;

pub use engine::{DedupError, DedupOutcome, Deduplicator, DuplicateCluster, MatchKind};
pub use similarity::token_set_similarity;
