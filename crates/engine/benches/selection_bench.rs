//! Selection latency over a full candidate set.
//! Run with: cargo bench -p adselect-engine

use adselect_core::config::AppConfig;
use adselect_core::types::{Creative, DeviceType, PageContext, SelectionRequest, UserContext};
use adselect_engine::DecisionEngine;
use adselect_model::TrainedModel;

fn request(candidates: usize) -> SelectionRequest {
    SelectionRequest {
        candidates: (0..candidates)
            .map(|i| Creative {
                bid_price: Some(0.5 + i as f64 * 0.01),
                historical_ctr: Some(0.01 + (i % 7) as f64 * 0.002),
                revenue_per_view: Some(0.03),
                ..Creative::new(format!("cr-{i:04}"))
            })
            .collect(),
        user: UserContext {
            country: Some("US".to_string()),
            device_type: Some(DeviceType::Mobile),
            recency_score: Some(0.85),
            ..Default::default()
        },
        page: PageContext {
            category: Some("finance".to_string()),
            is_home: Some(true),
            ..Default::default()
        },
    }
}

fn run(label: &str, engine: &DecisionEngine, request: &SelectionRequest) {
    for _ in 0..100 {
        engine.select_creative(request).unwrap();
    }

    let iterations = 10_000u32;
    let start = std::time::Instant::now();
    for _ in 0..iterations {
        let _ = engine.select_creative(request).unwrap();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations;

    println!("=== {label} ===");
    println!("Candidates:  {}", request.candidates.len());
    println!("Iterations:  {}", iterations);
    println!("Total time:  {:?}", elapsed);
    println!("Per request: {:?}", per_iter);
    println!(
        "Throughput:  {:.0} req/s",
        iterations as f64 / elapsed.as_secs_f64()
    );
}

fn main() {
    let mut config = AppConfig::default();
    config.bandit.seed = Some(1);
    let engine = DecisionEngine::from_config(&config).unwrap();
    let request = request(64);

    for c in &request.candidates {
        for _ in 0..500 {
            engine.store().record_outcome(&c.creative_id, false);
        }
        engine.store().record_outcome(&c.creative_id, true);
    }

    run("Heuristic selection", &engine, &request);

    let arity = engine.extractor().arity();
    let weights = (0..=arity).map(|i| -3.0 + i as f64 * 0.1).collect();
    engine
        .registry()
        .install(TrainedModel::from_weights(weights).unwrap())
        .unwrap();

    run("Model selection", &engine, &request);
}
