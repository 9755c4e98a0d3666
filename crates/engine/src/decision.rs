//! Per-request selection pipeline and the feedback/retraining entry points.
//!
//! A request moves through `Start → FeaturesExtracted → Scored → Selected →
//! Done`. Nothing is written while a request is in flight, so an abandoned
//! request leaves no trace; counters change only when outcome events arrive.

use crate::heuristic::HeuristicPrior;
use crate::history::TrainingHistory;
use adselect_bandit::{EntropySource, PerformanceStore, ScoredCandidate, ThompsonSelector};
use adselect_core::config::{AppConfig, TrainingConfig};
use adselect_core::types::{
    Creative, FeatureVector, OutcomeEvent, OutcomeKind, PageContext, PredictionSource,
    SelectionRequest, SelectionResult, TrainingExample, UserContext,
};
use adselect_core::{EngineError, EngineResult};
use adselect_model::{
    FeatureExtractor, FeatureSchema, ModelRegistry, ModelSnapshot, Prediction, TrainedModel,
    TrainingParams, TrainingSummary,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionStage {
    Start,
    FeaturesExtracted,
    Scored,
    Selected,
    Done,
}

/// How much labeled history a retrain may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingWindow {
    pub max_examples: usize,
}

impl From<&TrainingConfig> for TrainingWindow {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            max_examples: config.window,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    pub generation: u64,
    pub examples: usize,
    pub summary: Option<TrainingSummary>,
}

/// Outcome of the most recent retrain, kept for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrainStatus {
    Installed {
        generation: u64,
        examples: usize,
        at: DateTime<Utc>,
    },
    Failed {
        kind: &'static str,
        message: String,
        at: DateTime<Utc>,
    },
}

pub struct DecisionEngine {
    extractor: FeatureExtractor,
    registry: Arc<ModelRegistry>,
    store: Arc<PerformanceStore>,
    selector: ThompsonSelector,
    heuristic: HeuristicPrior,
    history: TrainingHistory,
    entropy: EntropySource,
    training: TrainingConfig,
    last_retrain: Mutex<Option<RetrainStatus>>,
}

impl DecisionEngine {
    /// Build an engine around an existing registry and statistics store.
    /// Fails fast if the configured feature set does not match the registry.
    pub fn new(
        config: &AppConfig,
        registry: Arc<ModelRegistry>,
        store: Arc<PerformanceStore>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let schema = FeatureSchema::from_names(&config.features)?;

        let engine = Self {
            extractor: FeatureExtractor::new(schema),
            selector: ThompsonSelector::new(store.clone(), config.bandit.prior_weight),
            registry,
            store,
            heuristic: HeuristicPrior::from(&config.heuristic),
            history: TrainingHistory::new(config.history.capacity),
            entropy: EntropySource::from_seed(config.bandit.seed),
            training: config.training.clone(),
            last_retrain: Mutex::new(None),
        };
        engine.self_check()?;
        Ok(engine)
    }

    /// Engine with a fresh untrained registry and an empty store.
    pub fn from_config(config: &AppConfig) -> EngineResult<Self> {
        let schema = FeatureSchema::from_names(&config.features)?;
        Self::new(
            config,
            Arc::new(ModelRegistry::new(schema.arity())),
            Arc::new(PerformanceStore::new()),
        )
    }

    /// Verify extractor, registry and active model agree on feature arity.
    pub fn self_check(&self) -> EngineResult<()> {
        let expected = self.extractor.arity();
        if self.registry.feature_arity() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                got: self.registry.feature_arity(),
            });
        }

        let probe = self.extractor.extract(
            &Creative::default(),
            &UserContext::default(),
            &PageContext::default(),
        );
        self.registry.current().model.predict(&probe)?;
        Ok(())
    }

    /// Pick one creative for an ad request using the engine's entropy source.
    ///
    /// The result records the generator seed, so the same draws can be
    /// replayed with `select_with_rng(.., &mut EntropySource::rng_for(seed))`
    /// against the same statistics.
    pub fn select_creative(&self, request: &SelectionRequest) -> EngineResult<SelectionResult> {
        let seed = self.entropy.next_seed();
        let mut rng = EntropySource::rng_for(seed);
        self.select_traced(
            &request.candidates,
            &request.user,
            &request.page,
            &mut rng,
            Some(seed),
        )
    }

    /// Same as [`select_creative`](Self::select_creative) but with a caller
    /// supplied generator, for replaying a decision.
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        candidates: &[Creative],
        user: &UserContext,
        page: &PageContext,
        rng: &mut R,
    ) -> EngineResult<SelectionResult> {
        self.select_traced(candidates, user, page, rng, None)
    }

    fn select_traced<R: Rng + ?Sized>(
        &self,
        candidates: &[Creative],
        user: &UserContext,
        page: &PageContext,
        rng: &mut R,
        rng_seed: Option<u64>,
    ) -> EngineResult<SelectionResult> {
        let start = Instant::now();
        metrics::counter!("selection.requests").increment(1);

        let mut stage = DecisionStage::Start;
        let result = self
            .run_selection(candidates, user, page, rng, &mut stage)
            .map(|decision| SelectionResult {
                rng_seed,
                ..decision
            });

        match &result {
            Ok(decision) => {
                metrics::histogram!("selection.latency_us")
                    .record(start.elapsed().as_micros() as f64);
                debug!(
                    decision_id = %decision.decision_id,
                    creative_id = %decision.creative_id,
                    predicted_ctr = decision.predicted_ctr,
                    sample = decision.sample,
                    candidates = candidates.len(),
                    "Creative selected"
                );
            }
            Err(EngineError::NoEligibleCandidates) => {
                metrics::counter!("selection.no_candidates").increment(1);
            }
            Err(e) => {
                metrics::counter!("selection.failed", "kind" => e.kind()).increment(1);
                warn!(stage = ?stage, error = %e, "Selection failed");
            }
        }

        result
    }

    fn run_selection<R: Rng + ?Sized>(
        &self,
        candidates: &[Creative],
        user: &UserContext,
        page: &PageContext,
        rng: &mut R,
        stage: &mut DecisionStage,
    ) -> EngineResult<SelectionResult> {
        if candidates.is_empty() {
            return Err(EngineError::NoEligibleCandidates);
        }

        let mut features: Vec<FeatureVector> = candidates
            .iter()
            .map(|c| self.extractor.extract(c, user, page))
            .collect();
        *stage = DecisionStage::FeaturesExtracted;

        // One snapshot for the whole request: every candidate is scored by
        // the same model even if a swap lands mid-request.
        let snapshot = self.registry.current();
        let (source, scored) = self.score(&snapshot, candidates, &features, user, page)?;
        *stage = DecisionStage::Scored;

        let (winner, draws) = self.selector.choose(&scored, rng)?.into_parts();
        *stage = DecisionStage::Selected;

        let chosen = &draws[winner];
        let result = SelectionResult {
            decision_id: Uuid::new_v4(),
            creative_id: chosen.creative_id.clone(),
            predicted_ctr: chosen.predicted_ctr,
            prediction_source: source,
            alpha: chosen.alpha,
            beta: chosen.beta,
            sample: chosen.sample,
            features: features.swap_remove(winner),
            candidates: draws,
            rng_seed: None,
            decided_at: Utc::now(),
        };
        *stage = DecisionStage::Done;
        Ok(result)
    }

    fn score(
        &self,
        snapshot: &ModelSnapshot,
        candidates: &[Creative],
        features: &[FeatureVector],
        user: &UserContext,
        page: &PageContext,
    ) -> EngineResult<(PredictionSource, Vec<ScoredCandidate>)> {
        let mut source = PredictionSource::Model {
            generation: snapshot.generation,
        };
        let mut fallback = None;
        let mut scored = Vec::with_capacity(candidates.len());

        for (creative, fv) in candidates.iter().zip(features) {
            let predicted_ctr = match snapshot.model.predict(fv)? {
                Prediction::Ctr(p) => p,
                Prediction::Untrained => {
                    source = PredictionSource::Heuristic;
                    *fallback.get_or_insert_with(|| self.heuristic.estimate(user, page))
                }
            };
            scored.push(ScoredCandidate::new(creative.creative_id.clone(), predicted_ctr));
        }

        if source == PredictionSource::Heuristic {
            metrics::counter!("selection.heuristic_fallback").increment(1);
        }
        Ok((source, scored))
    }

    /// Count one outcome against a creative's statistics.
    pub fn record_outcome(&self, creative_id: &str, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Impression => {
                self.store.record_impression(creative_id);
                metrics::counter!("outcomes.impressions").increment(1);
            }
            OutcomeKind::Click => {
                self.store.record_click(creative_id);
                metrics::counter!("outcomes.clicks").increment(1);
            }
        }
    }

    /// Apply a decision-linked outcome: statistics plus training history.
    ///
    /// Statistics count every event received. The history keeps one entry
    /// per decision, so a redelivered impression raises the counters but is
    /// not trained on twice.
    pub fn ingest(&self, event: OutcomeEvent) {
        self.record_outcome(event.creative_id(), event.kind());

        match event {
            OutcomeEvent::Impression {
                decision_id,
                creative_id,
                features,
            } => {
                if features.len() != self.extractor.arity() {
                    warn!(
                        %decision_id,
                        expected = self.extractor.arity(),
                        got = features.len(),
                        "Impression features do not match the feature set, not kept for training"
                    );
                    return;
                }
                if !self
                    .history
                    .record_impression(decision_id, &creative_id, features)
                {
                    metrics::counter!("outcomes.duplicate_impressions").increment(1);
                    warn!(
                        %decision_id,
                        creative_id = %creative_id,
                        "Duplicate impression counted in stats, already in training history"
                    );
                }
            }
            OutcomeEvent::Click { decision_id, .. } => {
                if !self.history.mark_click(&decision_id) {
                    debug!(%decision_id, "Click for a decision outside the training window");
                }
            }
        }
    }

    /// Train on the latest labeled history and install the result. On any
    /// error the active model is left untouched and the failure is reported.
    pub fn retrain(&self, window: TrainingWindow) -> EngineResult<RetrainReport> {
        let examples = self.history.window(window.max_examples);
        let started = Instant::now();
        let result = self.train_and_install(&examples);
        let at = Utc::now();

        let status = match &result {
            Ok(report) => {
                metrics::counter!("retrain.success").increment(1);
                info!(
                    generation = report.generation,
                    examples = report.examples,
                    accuracy = report.summary.map(|s| s.accuracy),
                    log_loss = report.summary.map(|s| s.log_loss),
                    oldest = ?self.history.oldest_served_at(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Retrain complete"
                );
                RetrainStatus::Installed {
                    generation: report.generation,
                    examples: report.examples,
                    at,
                }
            }
            Err(e) => {
                metrics::counter!("retrain.failed", "kind" => e.kind()).increment(1);
                if let EngineError::InsufficientData { .. } = e {
                    warn!(error = %e, "Retrain skipped, keeping current model");
                } else {
                    error!(
                        error = %e,
                        kind = e.kind(),
                        generation = self.registry.generation(),
                        "Retrain failed, keeping current model"
                    );
                }
                RetrainStatus::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                    at,
                }
            }
        };
        *self.last_retrain.lock() = Some(status);

        result
    }

    fn train_and_install(&self, examples: &[TrainingExample]) -> EngineResult<RetrainReport> {
        let required = self.training.min_examples.max(1);
        if examples.len() < required {
            return Err(EngineError::InsufficientData {
                required,
                got: examples.len(),
            });
        }

        let model = TrainedModel::train(examples, &TrainingParams::from(&self.training))?;
        let summary = model.summary().copied();
        let generation = self.registry.install(model)?;

        Ok(RetrainReport {
            generation,
            examples: examples.len(),
            summary,
        })
    }

    pub fn retrain_status(&self) -> Option<RetrainStatus> {
        self.last_retrain.lock().clone()
    }

    /// Evict a permanently retired creative's statistics.
    pub fn retire_creative(&self, creative_id: &str) -> bool {
        let retired = self.store.retire(creative_id);
        if let Some(stats) = retired {
            info!(
                creative_id,
                impressions = stats.impressions,
                clicks = stats.clicks,
                "Creative retired"
            );
        }
        retired.is_some()
    }

    pub fn training_window(&self) -> TrainingWindow {
        TrainingWindow::from(&self.training)
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<PerformanceStore> {
        &self.store
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }
}
