//! Scoring keeps working, and never blends two models, while the registry
//! is swapped underneath concurrent requests.

use adselect_core::config::AppConfig;
use adselect_core::types::{Creative, PageContext, PredictionSource, SelectionRequest, UserContext};
use adselect_engine::DecisionEngine;
use adselect_model::{sigmoid, TrainedModel};
use std::collections::HashMap;
use std::sync::Barrier;

const SCORERS: usize = 100;
const INSTALLS: usize = 50;

fn weight_for(generation: u64) -> f64 {
    generation as f64 * 0.01
}

fn request() -> SelectionRequest {
    SelectionRequest {
        candidates: vec![
            Creative {
                bid_price: Some(1.5),
                historical_ctr: Some(0.03),
                revenue_per_view: Some(0.2),
                ..Creative::new("cr-1")
            },
            Creative {
                bid_price: Some(0.7),
                ..Creative::new("cr-2")
            },
            Creative::new("cr-3"),
        ],
        user: UserContext {
            recency_score: Some(0.4),
            ..Default::default()
        },
        page: PageContext {
            is_home: Some(true),
            ..Default::default()
        },
    }
}

#[test]
fn test_swap_during_concurrent_scoring() {
    let mut config = AppConfig::default();
    config.bandit.seed = Some(99);
    let engine = DecisionEngine::from_config(&config).unwrap();
    let arity = engine.extractor().arity();
    let request = request();

    // Sum of features plus the bias input, per candidate.
    let inputs: HashMap<String, f64> = request
        .candidates
        .iter()
        .map(|c| {
            let fv = engine.extractor().extract(c, &request.user, &request.page);
            (c.creative_id.clone(), 1.0 + fv.as_slice().iter().sum::<f64>())
        })
        .collect();

    let barrier = Barrier::new(SCORERS + 1);
    let results = std::thread::scope(|scope| {
        let scorers: Vec<_> = (0..SCORERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    (0..20)
                        .map(|_| engine.select_creative(&request))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        scope.spawn(|| {
            barrier.wait();
            for g in 1..=INSTALLS as u64 {
                let model = TrainedModel::from_weights(vec![weight_for(g); arity + 1]).unwrap();
                assert_eq!(engine.registry().install(model).unwrap(), g);
            }
        });

        scorers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(results.len(), SCORERS * 20);
    for result in results {
        let decision = result.expect("scoring must not fail during a swap");
        match decision.prediction_source {
            PredictionSource::Heuristic => {
                for c in &decision.candidates {
                    assert!((c.predicted_ctr - 0.015).abs() < 1e-12);
                }
            }
            PredictionSource::Model { generation } => {
                assert!(generation >= 1 && generation <= INSTALLS as u64);
                let w = weight_for(generation);
                for c in &decision.candidates {
                    let expected = sigmoid(w * inputs[&c.creative_id]);
                    assert!(
                        (c.predicted_ctr - expected).abs() < 1e-12,
                        "{} scored {} under generation {generation}, expected {expected}",
                        c.creative_id,
                        c.predicted_ctr
                    );
                }
            }
        }
    }

    assert_eq!(engine.registry().generation(), INSTALLS as u64);
}
