//! Nearest-neighbor identity matching.

use crate::store::EmbeddingStore;
use crate::types::{Embedding, MatchResult};
use thiserror::Error;

/// Probe and store embeddings live in different embedding spaces.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("probe has {actual} dimensions, store expects {expected}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Strategy for comparing a probe embedding against the enrolled store.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        store: &EmbeddingStore,
        threshold: f32,
    ) -> Result<MatchResult, DimensionMismatch>;
}

/// Exact linear scan under Euclidean distance.
///
/// Ties keep the identity seen first in store order. The reported distance
/// is the true minimum even when it is over `threshold`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        store: &EmbeddingStore,
        threshold: f32,
    ) -> Result<MatchResult, DimensionMismatch> {
        if store.is_empty() {
            return Ok(MatchResult::unknown(f32::INFINITY));
        }
        if probe.dimensions() != store.dimensions() {
            return Err(DimensionMismatch {
                expected: store.dimensions(),
                actual: probe.dimensions(),
            });
        }

        let mut best_name: Option<&str> = None;
        let mut best_dist = f32::INFINITY;

        for (name, reference) in store.iter() {
            let dist = probe.euclidean_distance(reference);
            // Strict improvement: equal distances never displace an earlier name.
            if best_name.is_none() || dist < best_dist {
                best_dist = dist;
                best_name = Some(name);
            }
        }

        let identity = best_name
            .filter(|_| best_dist <= threshold)
            .map(str::to_owned);

        Ok(MatchResult {
            identity,
            distance: best_dist,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN;

    fn store(entries: &[(&str, &[f32])]) -> EmbeddingStore {
        EmbeddingStore::from_identities(
            "ArcFace",
            entries
                .iter()
                .map(|(n, v)| (n.to_string(), Embedding::new(v.to_vec()))),
        )
        .unwrap()
    }

    fn probe(v: &[f32]) -> Embedding {
        Embedding::new(v.to_vec())
    }

    #[test]
    fn test_match_within_threshold() {
        let store = store(&[("Alice", &[0.0, 0.0, 0.0])]);
        let result = EuclideanMatcher.compare(&probe(&[1.0, 1.0, 1.0]), &store, 4.0).unwrap();
        assert_eq!(result.identity.as_deref(), Some("Alice"));
        assert!((result.distance - 3.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_over_threshold_reports_true_distance() {
        let store = store(&[("Alice", &[0.0, 0.0, 0.0])]);
        let result = EuclideanMatcher.compare(&probe(&[10.0, 10.0, 10.0]), &store, 4.0).unwrap();
        assert_eq!(result.label(), UNKNOWN);
        assert!((result.distance - 300.0f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_distance_equal_to_threshold_is_accepted() {
        let store = store(&[("Alice", &[0.0, 0.0])]);
        let result = EuclideanMatcher.compare(&probe(&[3.0, 4.0]), &store, 5.0).unwrap();
        assert_eq!(result.identity.as_deref(), Some("Alice"));
        assert_eq!(result.distance, 5.0);
    }

    #[test]
    fn test_nearest_of_several() {
        let store = store(&[
            ("Alice", &[0.0, 0.0]),
            ("Bob", &[5.0, 5.0]),
            ("Carol", &[10.0, 0.0]),
        ]);
        let result = EuclideanMatcher.compare(&probe(&[4.0, 4.0]), &store, 4.0).unwrap();
        assert_eq!(result.identity.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_tie_keeps_first_in_store_order() {
        // Both references are at distance 1.0; "Anna" sorts first.
        let store = store(&[("Zoe", &[1.0, 0.0]), ("Anna", &[-1.0, 0.0])]);
        for _ in 0..3 {
            let result = EuclideanMatcher.compare(&probe(&[0.0, 0.0]), &store, 4.0).unwrap();
            assert_eq!(result.identity.as_deref(), Some("Anna"));
        }
    }

    #[test]
    fn test_empty_store_is_unknown_at_infinity() {
        let empty = EmbeddingStore::empty("ArcFace");
        let result = EuclideanMatcher.compare(&probe(&[1.0, 2.0, 3.0]), &empty, 4.0).unwrap();
        assert_eq!(result.identity, None);
        assert_eq!(result.distance, f32::INFINITY);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let store = store(&[("Alice", &[0.0, 0.0, 0.0])]);
        let err = EuclideanMatcher.compare(&probe(&[0.0, 0.0]), &store, 4.0).unwrap_err();
        assert_eq!(err, DimensionMismatch { expected: 3, actual: 2 });
    }

    #[test]
    fn test_zero_threshold_requires_exact_match() {
        let store = store(&[("Alice", &[0.5, 0.5])]);
        assert!(EuclideanMatcher.compare(&probe(&[0.5, 0.5]), &store, 0.0).unwrap().is_match());
        assert!(!EuclideanMatcher.compare(&probe(&[0.5, 0.6]), &store, 0.0).unwrap().is_match());
    }
}
