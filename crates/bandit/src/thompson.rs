//! Thompson Sampling over per-creative Beta posteriors.
//!
//! Each candidate's prior blends the model's predicted CTR, counted as
//! `prior_weight` pseudo-observations, with its observed history:
//!
//! ```text
//! alpha = 1 + clicks + predicted_ctr * prior_weight
//! beta  = 1 + (impressions - clicks) + (1 - predicted_ctr) * prior_weight
//! ```
//!
//! One draw per candidate; the highest draw wins, ties to the lowest id.

use crate::stats::PerformanceStore;
use adselect_core::types::{CandidateScore, CreativeStats};
use adselect_core::{EngineError, EngineResult};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use std::sync::Arc;

/// A candidate creative with its predicted CTR.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub creative_id: String,
    pub predicted_ctr: f64,
}

impl ScoredCandidate {
    pub fn new(creative_id: impl Into<String>, predicted_ctr: f64) -> Self {
        Self {
            creative_id: creative_id.into(),
            predicted_ctr,
        }
    }
}

/// Every candidate's draw plus the index of the winner.
#[derive(Debug, Clone)]
pub struct ThompsonDraw {
    pub winner: usize,
    pub draws: Vec<CandidateScore>,
}

impl ThompsonDraw {
    pub fn winner(&self) -> &CandidateScore {
        &self.draws[self.winner]
    }

    pub fn into_parts(self) -> (usize, Vec<CandidateScore>) {
        (self.winner, self.draws)
    }
}

/// Stateless apart from the shared counters; randomness comes from the
/// caller's generator.
#[derive(Clone)]
pub struct ThompsonSelector {
    store: Arc<PerformanceStore>,
    prior_weight: f64,
}

impl ThompsonSelector {
    pub fn new(store: Arc<PerformanceStore>, prior_weight: f64) -> Self {
        Self {
            store,
            prior_weight,
        }
    }

    /// Beta shape parameters for a creative's posterior.
    pub fn posterior(&self, stats: CreativeStats, predicted_ctr: f64) -> (f64, f64) {
        let alpha = 1.0 + stats.clicks as f64 + predicted_ctr * self.prior_weight;
        let beta = 1.0 + stats.non_clicks() as f64 + (1.0 - predicted_ctr) * self.prior_weight;
        (alpha, beta)
    }

    pub fn choose<R: Rng + ?Sized>(
        &self,
        candidates: &[ScoredCandidate],
        rng: &mut R,
    ) -> EngineResult<ThompsonDraw> {
        if candidates.is_empty() {
            return Err(EngineError::NoEligibleCandidates);
        }

        let mut draws = Vec::with_capacity(candidates.len());
        let mut winner = 0usize;
        let mut best_sample = f64::NEG_INFINITY;

        for (i, candidate) in candidates.iter().enumerate() {
            if !candidate.predicted_ctr.is_finite() {
                return Err(EngineError::NumericInstability(format!(
                    "predicted CTR for '{}' is {}",
                    candidate.creative_id, candidate.predicted_ctr
                )));
            }
            let predicted_ctr = candidate.predicted_ctr.clamp(0.0, 1.0);
            let stats = self.store.snapshot(&candidate.creative_id);
            let (alpha, beta) = self.posterior(stats, predicted_ctr);

            let dist = Beta::new(alpha, beta).map_err(|e| {
                EngineError::NumericInstability(format!(
                    "Beta({alpha}, {beta}) for '{}': {e}",
                    candidate.creative_id
                ))
            })?;
            let sample = dist.sample(rng);

            if outranks(
                sample,
                &candidate.creative_id,
                best_sample,
                &candidates[winner].creative_id,
            ) {
                best_sample = sample;
                winner = i;
            }

            draws.push(CandidateScore {
                creative_id: candidate.creative_id.clone(),
                predicted_ctr,
                alpha,
                beta,
                sample,
            });
        }

        Ok(ThompsonDraw { winner, draws })
    }
}

/// Higher sample wins; an exact tie goes to the lexicographically lower id.
fn outranks(sample: f64, id: &str, best_sample: f64, best_id: &str) -> bool {
    sample > best_sample || (sample == best_sample && id < best_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::EntropySource;

    fn store_with(entries: &[(&str, u64, u64)]) -> Arc<PerformanceStore> {
        let store = Arc::new(PerformanceStore::new());
        for &(id, impressions, clicks) in entries {
            for i in 0..impressions {
                store.record_outcome(id, i < clicks);
            }
        }
        store
    }

    fn share_of(selector: &ThompsonSelector, candidates: &[ScoredCandidate], id: &str) -> f64 {
        let mut rng = EntropySource::rng_for(2024);
        let rounds = 10_000;
        let wins = (0..rounds)
            .filter(|_| {
                let draw = selector.choose(candidates, &mut rng).unwrap();
                draw.winner().creative_id == id
            })
            .count();
        wins as f64 / rounds as f64
    }

    #[test]
    fn test_empty_candidates() {
        let selector = ThompsonSelector::new(Arc::new(PerformanceStore::new()), 10.0);
        let mut rng = EntropySource::rng_for(1);
        let err = selector.choose(&[], &mut rng).unwrap_err();
        assert_eq!(err, EngineError::NoEligibleCandidates);
    }

    #[test]
    fn test_posterior_formula() {
        let selector = ThompsonSelector::new(Arc::new(PerformanceStore::new()), 10.0);
        let (alpha, beta) = selector.posterior(
            CreativeStats {
                impressions: 1000,
                clicks: 50,
            },
            0.05,
        );
        assert!((alpha - 51.5).abs() < 1e-9);
        assert!((beta - 960.5).abs() < 1e-9);
    }

    #[test]
    fn test_winner_is_a_candidate() {
        let selector = ThompsonSelector::new(store_with(&[("a", 10, 1)]), 10.0);
        let candidates = vec![
            ScoredCandidate::new("a", 0.1),
            ScoredCandidate::new("b", 0.2),
            ScoredCandidate::new("c", 0.05),
        ];
        let mut rng = EntropySource::rng_for(9);
        for _ in 0..500 {
            let draw = selector.choose(&candidates, &mut rng).unwrap();
            assert!(candidates
                .iter()
                .any(|c| c.creative_id == draw.winner().creative_id));
            assert_eq!(draw.draws.len(), 3);
            let best = draw
                .draws
                .iter()
                .map(|d| d.sample)
                .fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(draw.winner().sample, best);
        }
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let selector = ThompsonSelector::new(store_with(&[("a", 100, 3), ("b", 20, 1)]), 10.0);
        let candidates = vec![
            ScoredCandidate::new("a", 0.03),
            ScoredCandidate::new("b", 0.04),
            ScoredCandidate::new("c", 0.02),
        ];
        let run = || {
            let mut rng = EntropySource::rng_for(77);
            (0..50)
                .map(|_| selector.choose(&candidates, &mut rng).unwrap().winner)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_cold_start_creative_is_explored() {
        let selector = ThompsonSelector::new(store_with(&[("a", 1000, 50), ("b", 5, 0)]), 10.0);
        let candidates = vec![
            ScoredCandidate::new("a", 0.05),
            ScoredCandidate::new("b", 0.05),
        ];
        let b_share = share_of(&selector, &candidates, "b");
        assert!(b_share > 0.01, "cold-start share {b_share}");
        // the established creative still wins a real share of traffic
        assert!(b_share < 0.99, "cold-start share {b_share}");
    }

    #[test]
    fn test_proven_creative_is_exploited() {
        let selector =
            ThompsonSelector::new(store_with(&[("a", 1000, 50), ("b", 50, 0)]), 10.0);
        let candidates = vec![
            ScoredCandidate::new("a", 0.05),
            ScoredCandidate::new("b", 0.05),
        ];
        let a_share = share_of(&selector, &candidates, "a");
        assert!(a_share > 0.5, "proven share {a_share}");
        assert!(a_share < 0.99, "proven share {a_share}");
    }

    #[test]
    fn test_ties_break_to_lowest_id() {
        assert!(outranks(0.3, "a", 0.3, "b"));
        assert!(!outranks(0.3, "b", 0.3, "a"));
        assert!(outranks(0.4, "z", 0.3, "a"));
        assert!(!outranks(0.2, "a", 0.3, "z"));
    }

    #[test]
    fn test_non_finite_prediction_rejected() {
        let selector = ThompsonSelector::new(Arc::new(PerformanceStore::new()), 10.0);
        let mut rng = EntropySource::rng_for(3);
        let err = selector
            .choose(&[ScoredCandidate::new("a", f64::NAN)], &mut rng)
            .unwrap_err();
        assert_eq!(err.kind(), "numeric_instability");
    }
}
