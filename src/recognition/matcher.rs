// src/recognition/matcher.rs
//
// Nearest-centroid matching by cosine similarity, with runner-up score.

use crate::types::{ClassificationOutcome, FeatureVector};

/// Guards the denominator against zero-length vectors.
const EPSILON: f32 = 1e-8;

/// Lower bound of cosine similarity; initial runner-up score.
const MIN_SIMILARITY: f32 = -1.0;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt() + EPSILON)
}

/// Score `features` against every centroid and keep the best two.
///
/// Comparisons are strict, so on equal scores the centroid visited first
/// keeps the lead. Centroids whose length differs from `features` are
/// skipped. No centroids (or an empty input) yields `(None, 0, 0)`.
pub fn best_match<'a, I>(centroids: I, features: &[f32]) -> ClassificationOutcome
where
    I: IntoIterator<Item = (&'a String, &'a FeatureVector)>,
{
    if features.is_empty() {
        return ClassificationOutcome::none();
    }

    let mut best_label: Option<&String> = None;
    let mut best = MIN_SIMILARITY;
    let mut second = MIN_SIMILARITY;

    for (label, centroid) in centroids {
        if centroid.len() != features.len() {
            continue;
        }
        let score = cosine_similarity(features, centroid);
        if best_label.is_none() || score > best {
            if best_label.is_some() {
                second = best;
            }
            best = score;
            best_label = Some(label);
        } else if score > second {
            second = score;
        }
    }

    match best_label {
        Some(label) => ClassificationOutcome {
            best_label: Some(label.clone()),
            best_score: best,
            second_best_score: second,
        },
        None => ClassificationOutcome::none(),
    }
}
