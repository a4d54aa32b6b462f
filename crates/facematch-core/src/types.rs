use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label reported when no gallery identity clears the acceptance threshold.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Axis-aligned face region in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (128, 192 or 512 values depending on the model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Name of the model that produced this embedding (e.g., "FaceNet").
    pub model: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model: None }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Split a flat model output into rows of `dims` values.
    ///
    /// Returns `None` when the buffer is empty or not a whole number of rows.
    pub fn rows_from_flat(flat: &[f32], dims: usize, model: &str) -> Option<Vec<Embedding>> {
        if dims == 0 || flat.is_empty() || flat.len() % dims != 0 {
            return None;
        }
        Some(
            flat.chunks_exact(dims)
                .map(|row| Embedding {
                    values: row.to_vec(),
                    model: Some(model.to_string()),
                })
                .collect(),
        )
    }
}

/// A registered face: one embedding captured at one registration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub label: String,
    pub embedding: Embedding,
    /// RFC 3339 registration time.
    pub created_at: String,
}

impl IdentityRecord {
    /// Create a record with a fresh random id, stamped with the current time.
    pub fn new(label: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            embedding,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Distance function used to compare embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Euclidean distance; lower is more similar.
    #[default]
    L2,
    /// Cosine similarity; higher is more similar.
    Cosine,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::L2 => f.write_str("l2"),
            Metric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

/// Acceptance cutoffs, one per metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Cosine similarity must strictly exceed this value.
    pub cosine: f32,
    /// L2 distance must not exceed this value.
    pub l2: f32,
}

/// Mean score of one gallery identity against a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityScore {
    pub label: String,
    pub score: f32,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub accepted: bool,
    /// First gallery record carrying the winning label, if accepted.
    pub best_identity: Option<IdentityRecord>,
    /// Best mean score (distance for L2, similarity for cosine).
    pub score: f32,
    /// Mean score per identity label, in gallery order of first appearance.
    pub scores: Vec<IdentityScore>,
}

impl MatchResult {
    pub fn rejected(score: f32, scores: Vec<IdentityScore>) -> Self {
        Self {
            accepted: false,
            best_identity: None,
            score,
            scores,
        }
    }

    /// Label of the accepted identity, or `"Unknown"`.
    pub fn label(&self) -> &str {
        self.best_identity
            .as_ref()
            .map(|r| r.label.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }

    /// One line per identity, used in diagnostics for rejected matches.
    pub fn score_summary(&self) -> String {
        self.scores
            .iter()
            .map(|s| format!("{}: {}", s.label, s.score))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of a one-shot "same person?" check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairComparison {
    pub identical: bool,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_from_flat_single_row() {
        let rows = Embedding::rows_from_flat(&[1.0, 2.0, 3.0], 3, "m").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![1.0, 2.0, 3.0]);
        assert_eq!(rows[0].model.as_deref(), Some("m"));
    }

    #[test]
    fn test_rows_from_flat_batch() {
        let rows = Embedding::rows_from_flat(&[1.0, 2.0, 3.0, 4.0], 2, "m").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].values, vec![3.0, 4.0]);
    }

    #[test]
    fn test_rows_from_flat_rejects_partial_row() {
        assert!(Embedding::rows_from_flat(&[1.0, 2.0, 3.0], 2, "m").is_none());
        assert!(Embedding::rows_from_flat(&[], 2, "m").is_none());
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert!("manhattan".parse::<Metric>().is_err());
        assert_eq!(Metric::default(), Metric::L2);
    }

    #[test]
    fn test_rejected_label_is_unknown() {
        let result = MatchResult::rejected(0.0, vec![]);
        assert_eq!(result.label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_identity_record_ids_are_unique() {
        let a = IdentityRecord::new("A", Embedding::new(vec![1.0]));
        let b = IdentityRecord::new("A", Embedding::new(vec![1.0]));
        assert_ne!(a.id, b.id);
        assert_eq!(a.label, b.label);
    }
}
