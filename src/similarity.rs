// similarity.rs - Linear-scan cosine similarity over the stored corpus.
//
// No index structure: every run scores the candidate against every stored vector,
// O(N*D). Fine for the hundreds-to-low-thousands of pages a Notion database holds;
// beyond that this scan is the ceiling, not the store.

use std::cmp::Ordering;

use crate::embeddings::text_prep::prepare_item_text;
use crate::embeddings::Embedder;
use crate::error::{EmbedError, SimilarityError};
use crate::item::EmbeddedItem;
use crate::logging::truncate_for_log;

/// A stored item scoring at or above the threshold against a candidate.
#[derive(Debug, Clone)]
pub struct SimilarityMatch<'a> {
    pub candidate: &'a EmbeddedItem,
    pub existing: &'a EmbeddedItem,
    pub score: f64,
}

/// Cosine similarity `dot(a,b) / (|a| * |b|)`, accumulated in f64.
///
/// Symmetric in its arguments. Zero-norm input is `DegenerateVector` rather than 0.0
/// so an empty-text embedding is never silently reported as "unrelated".
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(SimilarityError::DegenerateVector);
    }

    // rounding can land a hair outside [-1, 1] for parallel vectors
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Find corpus entries similar to `candidate`, best first.
///
/// If the candidate has no vector yet it is embedded with `embedder` (the candidate
/// itself is left untouched). Corpus entries without a vector are skipped.
pub fn find_similar<'a>(
    candidate: &'a EmbeddedItem,
    corpus: &'a [EmbeddedItem],
    threshold: f64,
    embedder: &dyn Embedder,
) -> Result<Vec<SimilarityMatch<'a>>, EmbedError> {
    let owned;
    let vector: &[f32] = match candidate.vector.as_deref() {
        Some(v) => v,
        None => {
            owned = embedder.embed(&prepare_item_text(candidate.subject(), &candidate.item.body))?;
            &owned
        }
    };
    Ok(rank_matches(candidate, vector, corpus, threshold))
}

/// Score `vector` against every comparable corpus entry and keep `score >= threshold`.
///
/// Sorted descending by score; the sort is stable so ties keep corpus order.
/// Comparisons that fail (zero norm, length mismatch) are logged and skipped.
pub fn rank_matches<'a>(
    candidate: &'a EmbeddedItem,
    vector: &[f32],
    corpus: &'a [EmbeddedItem],
    threshold: f64,
) -> Vec<SimilarityMatch<'a>> {
    let mut matches: Vec<SimilarityMatch<'a>> = Vec::new();

    for existing in corpus {
        let Some(existing_vector) = existing.vector.as_deref() else {
            continue;
        };

        match cosine_similarity(vector, existing_vector) {
            Ok(score) if score >= threshold => matches.push(SimilarityMatch {
                candidate,
                existing,
                score,
            }),
            Ok(_) => {}
            Err(e) => {
                log::warn!(
                    "Skipping comparison {} vs {}: {}",
                    truncate_for_log(candidate.id()),
                    truncate_for_log(existing.id()),
                    e
                );
            }
        }
    }

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    matches
}
