//! Embedding distances and per-identity score aggregation.

use crate::types::{IdentityRecord, Metric};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("embedding length mismatch: query has {expected} values, gallery entry has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("cosine similarity undefined for a zero-magnitude vector")]
    DegenerateVector,
}

fn check_len(a: &[f32], b: &[f32]) -> Result<(), ScoringError> {
    if a.len() != b.len() {
        return Err(ScoringError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Euclidean distance. Lower = more similar.
pub fn l2_distance(a: &[f32], b: &[f32]) -> Result<f32, ScoringError> {
    check_len(a, b)?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Cosine similarity in [-1, 1]. Higher = more similar.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, ScoringError> {
    check_len(a, b)?;

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Err(ScoringError::DegenerateVector);
    }
    Ok(dot / denom)
}

impl Metric {
    /// Score two vectors under this metric.
    pub fn score(self, a: &[f32], b: &[f32]) -> Result<f32, ScoringError> {
        match self {
            Metric::L2 => l2_distance(a, b),
            Metric::Cosine => cosine_similarity(a, b),
        }
    }

    /// True if `candidate` is strictly better than `best` under this metric.
    pub fn is_better(self, candidate: f32, best: f32) -> bool {
        match self {
            Metric::L2 => candidate < best,
            Metric::Cosine => candidate > best,
        }
    }
}

/// Raw per-sample scores collected under one identity label.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityScores {
    pub label: String,
    /// Index into the gallery of the first record carrying `label`.
    pub first_index: usize,
    pub samples: Vec<f32>,
}

impl IdentityScores {
    /// Arithmetic mean of the samples.
    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }
}

/// Score `query` against every gallery record, grouping samples by label.
///
/// Groups are returned in the order their label first appears in `gallery`,
/// which keeps tie-breaking independent of any hash ordering.
pub fn score(
    metric: Metric,
    query: &[f32],
    gallery: &[IdentityRecord],
) -> Result<Vec<IdentityScores>, ScoringError> {
    let mut groups: Vec<IdentityScores> = Vec::new();

    for (i, record) in gallery.iter().enumerate() {
        let s = metric.score(query, &record.embedding.values)?;
        match groups.iter_mut().find(|g| g.label == record.label) {
            Some(group) => group.samples.push(s),
            None => groups.push(IdentityScores {
                label: record.label.clone(),
                first_index: i,
                samples: vec![s],
            }),
        }
    }

    tracing::trace!(%metric, identities = groups.len(), samples = gallery.len(), "scored gallery");
    Ok(groups)
}
