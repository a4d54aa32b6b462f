//! Gallery matching: best candidate selection and threshold acceptance.

use crate::scoring::{self, ScoringError};
use crate::types::{
    Embedding, IdentityRecord, IdentityScore, MatchResult, Metric, PairComparison, Thresholds,
};

/// Fixed cosine cutoff for one-shot "same person?" checks.
///
/// Independent of the active model's tuned thresholds.
pub const PAIR_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Strategy for comparing a query embedding against a gallery snapshot.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &[IdentityRecord]) -> Result<MatchResult, ScoringError>;
}

/// Mean-per-identity matcher with metric-specific acceptance.
#[derive(Debug, Clone, Copy)]
pub struct GalleryMatcher {
    pub metric: Metric,
    pub thresholds: Thresholds,
}

impl Matcher for GalleryMatcher {
    fn compare(&self, query: &Embedding, gallery: &[IdentityRecord]) -> Result<MatchResult, ScoringError> {
        match_gallery(self.metric, &query.values, gallery, self.thresholds)
    }
}

/// Match `query` against `gallery` under `metric`.
///
/// Cosine accepts when the best mean similarity strictly exceeds
/// `thresholds.cosine`; L2 accepts when the best mean distance is at most
/// `thresholds.l2`. On exact ties the identity seen first in `gallery` wins.
pub fn match_gallery(
    metric: Metric,
    query: &[f32],
    gallery: &[IdentityRecord],
    thresholds: Thresholds,
) -> Result<MatchResult, ScoringError> {
    if gallery.is_empty() {
        return Ok(MatchResult::rejected(0.0, Vec::new()));
    }

    let groups = scoring::score(metric, query, gallery)?;
    let means: Vec<f32> = groups.iter().map(|g| g.mean()).collect();

    let mut best = 0;
    for (i, &mean) in means.iter().enumerate().skip(1) {
        if metric.is_better(mean, means[best]) {
            best = i;
        }
    }
    let best_score = means[best];

    let accepted = match metric {
        Metric::Cosine => best_score > thresholds.cosine,
        Metric::L2 => best_score <= thresholds.l2,
    };

    let scores: Vec<IdentityScore> = groups
        .iter()
        .zip(means.iter())
        .map(|(g, &score)| IdentityScore {
            label: g.label.clone(),
            score,
        })
        .collect();

    tracing::debug!(
        %metric,
        candidate = %groups[best].label,
        score = best_score,
        accepted,
        "gallery match"
    );

    if !accepted {
        return Ok(MatchResult::rejected(best_score, scores));
    }

    Ok(MatchResult {
        accepted: true,
        best_identity: Some(gallery[groups[best].first_index].clone()),
        score: best_score,
        scores,
    })
}

/// Decide whether two embeddings belong to the same person.
///
/// Scored through the same engine as a one-entry cosine gallery, then
/// accepted at `similarity >= 0.8`.
pub fn compare_pair(a: &Embedding, b: &Embedding) -> Result<PairComparison, ScoringError> {
    let comparator = [IdentityRecord {
        id: String::new(),
        label: "Comparator".into(),
        embedding: b.clone(),
        created_at: String::new(),
    }];
    let groups = scoring::score(Metric::Cosine, &a.values, &comparator)?;
    let similarity = groups.first().map(|g| g.mean()).unwrap_or(0.0);

    Ok(PairComparison {
        identical: similarity >= PAIR_SIMILARITY_THRESHOLD,
        similarity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN_LABEL;

    const T: Thresholds = Thresholds { cosine: 0.4, l2: 10.0 };

    fn record(id: &str, label: &str, values: Vec<f32>) -> IdentityRecord {
        IdentityRecord {
            id: id.into(),
            label: label.into(),
            embedding: Embedding::new(values),
            created_at: String::new(),
        }
    }

    fn unit(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_cosine_accepts_matching_identity() {
        let gallery = vec![record("1", "Alice", unit(8, 0))];
        let result = match_gallery(Metric::Cosine, &unit(8, 0), &gallery, T).unwrap();
        assert!(result.accepted);
        assert_eq!(result.label(), "Alice");
        assert_eq!(result.best_identity.as_ref().map(|r| r.id.as_str()), Some("1"));
        assert!((result.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_rejects_orthogonal_query() {
        let gallery = vec![record("1", "Alice", unit(8, 0))];
        let result = match_gallery(Metric::Cosine, &unit(8, 1), &gallery, T).unwrap();
        assert!(!result.accepted);
        assert!(result.best_identity.is_none());
        assert_eq!(result.label(), UNKNOWN_LABEL);
        assert_eq!(result.scores.len(), 1);
    }

    #[test]
    fn test_empty_gallery_never_accepts() {
        for metric in [Metric::L2, Metric::Cosine] {
            let loose = Thresholds { cosine: -2.0, l2: f32::MAX };
            let result = match_gallery(metric, &[1.0, 0.0], &[], loose).unwrap();
            assert!(!result.accepted);
            assert!(result.best_identity.is_none());
            assert_eq!(result.score, 0.0);
        }
    }

    #[test]
    fn test_l2_boundary_is_accepted() {
        // Distance from origin to (3, 4) is exactly 5.
        let gallery = vec![record("1", "A", vec![3.0, 4.0])];
        let t = Thresholds { cosine: 0.4, l2: 5.0 };
        let result = match_gallery(Metric::L2, &[0.0, 0.0], &gallery, t).unwrap();
        assert_eq!(result.score, 5.0);
        assert!(result.accepted);
    }

    #[test]
    fn test_l2_above_threshold_is_unknown() {
        let gallery = vec![record("1", "A", vec![3.0, 4.0])];
        let t = Thresholds { cosine: 0.4, l2: 4.99 };
        let result = match_gallery(Metric::L2, &[0.0, 0.0], &gallery, t).unwrap();
        assert!(!result.accepted);
        assert_eq!(result.label(), UNKNOWN_LABEL);
        assert_eq!(result.score, 5.0);
    }

    #[test]
    fn test_cosine_boundary_is_rejected() {
        let gallery = vec![record("1", "A", vec![1.0, 0.0, 0.0])];
        let t = Thresholds { cosine: 1.0, l2: 10.0 };
        let result = match_gallery(Metric::Cosine, &[1.0, 0.0, 0.0], &gallery, t).unwrap();
        assert_eq!(result.score, 1.0);
        assert!(!result.accepted);
    }

    #[test]
    fn test_l2_selects_lowest_mean_not_lowest_sample() {
        // "A" has the single closest sample (1.0) but a mean of 3.0;
        // "B" has a mean of 2.5 and wins.
        let gallery = vec![
            record("a1", "A", vec![1.0, 0.0]),
            record("b1", "B", vec![2.5, 0.0]),
            record("a2", "A", vec![5.0, 0.0]),
        ];
        let result = match_gallery(Metric::L2, &[0.0, 0.0], &gallery, T).unwrap();
        assert!(result.accepted);
        assert_eq!(result.label(), "B");
        assert!((result.score - 2.5).abs() < 1e-6);
        let a = result.scores.iter().find(|s| s.label == "A").unwrap();
        assert!((a.score - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_first_in_gallery_order() {
        let gallery = vec![
            record("z", "Zed", unit(4, 0)),
            record("a", "Amy", unit(4, 0)),
        ];
        for metric in [Metric::L2, Metric::Cosine] {
            let result = match_gallery(metric, &unit(4, 0), &gallery, T).unwrap();
            assert!(result.accepted);
            assert_eq!(result.label(), "Zed");
        }
    }

    #[test]
    fn test_best_identity_is_first_record_of_label() {
        let gallery = vec![
            record("first", "A", vec![1.0, 0.0]),
            record("second", "A", vec![1.0, 0.1]),
        ];
        let result = match_gallery(Metric::Cosine, &[1.0, 0.0], &gallery, T).unwrap();
        assert_eq!(result.best_identity.unwrap().id, "first");
    }

    #[test]
    fn test_scores_keep_gallery_order() {
        let gallery = vec![
            record("1", "C", unit(3, 0)),
            record("2", "A", unit(3, 1)),
            record("3", "B", unit(3, 2)),
        ];
        let result = match_gallery(Metric::Cosine, &unit(3, 0), &gallery, T).unwrap();
        let labels: Vec<&str> = result.scores.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_degenerate_query_is_an_error() {
        let gallery = vec![record("1", "A", vec![1.0, 0.0])];
        let err = match_gallery(Metric::Cosine, &[0.0, 0.0], &gallery, T).unwrap_err();
        assert_eq!(err, ScoringError::DegenerateVector);
    }

    #[test]
    fn test_gallery_matcher_trait() {
        let matcher = GalleryMatcher { metric: Metric::Cosine, thresholds: T };
        let gallery = vec![
            record("1", "decoy1", unit(3, 1)),
            record("2", "decoy2", unit(3, 2)),
            record("3", "match", unit(3, 0)),
        ];
        let result = matcher.compare(&Embedding::new(unit(3, 0)), &gallery).unwrap();
        assert!(result.accepted);
        assert_eq!(result.label(), "match");
    }

    #[test]
    fn test_compare_pair_inclusive_cutoff() {
        // cos((1, 0), (4, 3)) is exactly 0.8.
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![4.0, 3.0]);
        let pair = compare_pair(&a, &b).unwrap();
        assert_eq!(pair.similarity, 0.8);
        assert!(pair.identical);

        // The general matcher's strict rule rejects the same score.
        let gallery = vec![record("1", "B", b.values.clone())];
        let t = Thresholds { cosine: PAIR_SIMILARITY_THRESHOLD, l2: 10.0 };
        let result = match_gallery(Metric::Cosine, &a.values, &gallery, t).unwrap();
        assert!(!result.accepted);
    }

    #[test]
    fn test_compare_pair_agrees_with_single_entry_gallery() {
        let a = Embedding::new(vec![0.3, 0.9, -0.2]);
        let b = Embedding::new(vec![0.1, 1.0, 0.4]);
        let pair = compare_pair(&a, &b).unwrap();
        let gallery = vec![record("1", "B", b.values.clone())];
        let result = match_gallery(Metric::Cosine, &a.values, &gallery, T).unwrap();
        assert_eq!(pair.similarity, result.score);
    }

    #[test]
    fn test_compare_pair_rejects_dissimilar() {
        let pair = compare_pair(&Embedding::new(unit(4, 0)), &Embedding::new(unit(4, 3))).unwrap();
        assert!(!pair.identical);
        assert!(pair.similarity.abs() < 1e-6);
    }
}
