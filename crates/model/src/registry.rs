//! Model registry: owns the active CTR model and hot-swaps it without
//! blocking scorers.
//!
//! Readers take an `Arc` to an immutable [`ModelSnapshot`]; an install
//! replaces that pointer in one atomic store. A replaced snapshot is freed
//! when its last reader drops it.

use crate::ctr::{CtrModel, TrainedModel};
use adselect_core::{EngineError, EngineResult};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// The model in force at some instant, tagged with a monotonically
/// increasing generation. Generation 0 is the untrained sentinel.
#[derive(Debug)]
pub struct ModelSnapshot {
    pub generation: u64,
    pub model: CtrModel,
    pub installed_at: DateTime<Utc>,
}

pub struct ModelRegistry {
    current: ArcSwap<ModelSnapshot>,
    feature_arity: usize,
    // Serializes installs so generations stay gap-free; readers never take it.
    install_lock: Mutex<()>,
}

impl ModelRegistry {
    /// Start with the untrained sentinel for a schema of `feature_arity`
    /// features.
    pub fn new(feature_arity: usize) -> Self {
        Self {
            current: ArcSwap::from_pointee(ModelSnapshot {
                generation: 0,
                model: CtrModel::untrained(feature_arity),
                installed_at: Utc::now(),
            }),
            feature_arity,
            install_lock: Mutex::new(()),
        }
    }

    /// The active snapshot. Never blocks and never observes a partial swap.
    pub fn current(&self) -> Arc<ModelSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn feature_arity(&self) -> usize {
        self.feature_arity
    }

    /// Make `model` the active model and return its generation.
    pub fn install(&self, model: TrainedModel) -> EngineResult<u64> {
        if model.feature_arity() != self.feature_arity {
            return Err(EngineError::DimensionMismatch {
                expected: self.feature_arity,
                got: model.feature_arity(),
            });
        }

        let _guard = self.install_lock.lock();
        let generation = self.current.load().generation + 1;
        self.current.store(Arc::new(ModelSnapshot {
            generation,
            model: CtrModel::Trained(model),
            installed_at: Utc::now(),
        }));

        metrics::gauge!("model.generation").set(generation as f64);
        info!(generation, "CTR model installed");
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_model(arity: usize, value: f64) -> TrainedModel {
        TrainedModel::from_weights(vec![value; arity + 1]).unwrap()
    }

    #[test]
    fn test_starts_untrained() {
        let registry = ModelRegistry::new(7);
        let snapshot = registry.current();
        assert_eq!(snapshot.generation, 0);
        assert!(!snapshot.model.is_trained());
        assert_eq!(snapshot.model.feature_arity(), 7);
    }

    #[test]
    fn test_install_bumps_generation() {
        let registry = ModelRegistry::new(2);
        assert_eq!(registry.install(constant_model(2, 0.1)).unwrap(), 1);
        assert_eq!(registry.install(constant_model(2, 0.2)).unwrap(), 2);
        assert_eq!(registry.generation(), 2);
        assert!(registry.current().model.is_trained());
    }

    #[test]
    fn test_install_rejects_wrong_arity() {
        let registry = ModelRegistry::new(3);
        let err = registry.install(constant_model(2, 0.1)).unwrap_err();
        assert_eq!(err, EngineError::DimensionMismatch { expected: 3, got: 2 });
        assert_eq!(registry.generation(), 0);
    }

    #[test]
    fn test_held_snapshot_survives_swap() {
        let registry = ModelRegistry::new(1);
        registry.install(constant_model(1, 1.0)).unwrap();
        let held = registry.current();
        registry.install(constant_model(1, 2.0)).unwrap();

        match &held.model {
            CtrModel::Trained(m) => assert!(m.weights().iter().all(|&w| w == 1.0)),
            CtrModel::Untrained { .. } => panic!("expected trained model"),
        }
        assert_eq!(registry.generation(), 2);
    }

    #[test]
    fn test_readers_never_see_mixed_weights() {
        let registry = ModelRegistry::new(16);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..2_000 {
                        let snapshot = registry.current();
                        if let CtrModel::Trained(m) = &snapshot.model {
                            let first = m.weights()[0];
                            assert!(m.weights().iter().all(|&w| w == first));
                        }
                    }
                });
            }
            scope.spawn(|| {
                for i in 0..200 {
                    registry.install(constant_model(16, i as f64)).unwrap();
                }
            });
        });
        assert_eq!(registry.generation(), 200);
    }
}
