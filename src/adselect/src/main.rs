//! adselect: online ad-creative selection service.
//!
//! Boots the decision engine, the outcome ingestor and the retrain
//! scheduler, then either replays a synthetic traffic simulation or idles
//! until interrupted.

use adselect_bandit::EntropySource;
use adselect_core::config::AppConfig;
use adselect_core::types::{
    Creative, DeviceType, OutcomeEvent, PageContext, SelectionRequest, UserContext,
};
use adselect_engine::{DecisionEngine, OutcomeIngestor};
use clap::Parser;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "adselect")]
#[command(about = "Online ad-creative selection with CTR scoring and Thompson sampling")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "ADSELECT_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "ADSELECT__NODE_ID")]
    node_id: Option<String>,

    /// Seed for reproducible sampling (overrides config)
    #[arg(long, env = "ADSELECT__BANDIT__SEED")]
    seed: Option<u64>,

    /// Retrain interval in seconds (overrides config)
    #[arg(long, env = "ADSELECT__TRAINING__INTERVAL_SECS")]
    retrain_interval_secs: Option<u64>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "ADSELECT__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Skip the Prometheus exporter
    #[arg(long, default_value_t = false)]
    no_metrics: bool,

    /// Run N synthetic requests through the engine and exit
    #[arg(long)]
    simulate: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adselect=info,adselect_engine=info,adselect_model=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("adselect starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(seed) = cli.seed {
        config.bandit.seed = Some(seed);
    }
    if let Some(secs) = cli.retrain_interval_secs {
        config.training.interval_secs = secs;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }

    info!(
        node_id = %config.node_id,
        features = ?config.features,
        prior_weight = config.bandit.prior_weight,
        seeded = config.bandit.seed.is_some(),
        retrain_interval_secs = config.training.interval_secs,
        "Configuration loaded"
    );

    if !cli.no_metrics {
        if let Err(e) = start_metrics(&config) {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    // Refuses to start when the feature set and registry disagree.
    let engine = Arc::new(DecisionEngine::from_config(&config)?);
    info!(
        feature_arity = engine.extractor().arity(),
        generation = engine.registry().generation(),
        "Decision engine ready"
    );

    let (ingestor, ingest_handle) =
        OutcomeIngestor::spawn(engine.clone(), config.ingest.channel_capacity);

    let scheduler = spawn_retrain_scheduler(engine.clone(), config.training.interval_secs);

    match cli.simulate {
        Some(requests) => {
            let seed = config.bandit.seed.unwrap_or(0);
            simulate(&engine, &ingestor, requests, seed).await;
            scheduler.abort();

            drop(ingestor);
            if let Err(e) = ingest_handle.await {
                error!(error = %e, "Outcome ingestor task failed");
            }

            retrain_now(engine.clone()).await;
            report(&engine);
        }
        None => {
            info!("adselect is ready to serve decisions");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            scheduler.abort();
            drop(ingestor);
            if let Err(e) = ingest_handle.await {
                error!(error = %e, "Outcome ingestor task failed");
            }
        }
    }

    Ok(())
}

fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(
            config.metrics.host.parse()?,
            config.metrics.port,
        ))
        .install()?;

    info!(port = config.metrics.port, "Metrics exporter started");
    Ok(())
}

fn spawn_retrain_scheduler(
    engine: Arc<DecisionEngine>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // First tick fires immediately; there is nothing to learn from yet.
        interval.tick().await;
        loop {
            interval.tick().await;
            retrain_now(engine.clone()).await;
        }
    })
}

/// Training is CPU-bound, so it runs off the async workers. Failures are
/// logged and recorded by the engine itself.
async fn retrain_now(engine: Arc<DecisionEngine>) {
    let result = tokio::task::spawn_blocking(move || {
        let window = engine.training_window();
        engine.retrain(window)
    })
    .await;

    match result {
        Ok(Err(e)) if !e.is_recoverable() => {
            error!(error = %e, "Retrain cannot succeed with this configuration");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Retrain task panicked"),
    }
}

struct SimCreative {
    creative: Creative,
    true_ctr: f64,
}

fn sim_creatives() -> Vec<SimCreative> {
    let make = |id: &str, bid: f64, hist: f64, rpv: f64, true_ctr: f64| SimCreative {
        creative: Creative {
            bid_price: Some(bid),
            historical_ctr: Some(hist),
            revenue_per_view: Some(rpv),
            ..Creative::new(id)
        },
        true_ctr,
    };
    vec![
        make("cr-banner-a", 1.10, 0.012, 0.020, 0.010),
        make("cr-banner-b", 0.90, 0.020, 0.030, 0.020),
        make("cr-video-c", 1.60, 0.030, 0.050, 0.035),
        make("cr-native-d", 0.70, 0.015, 0.025, 0.050),
    ]
}

fn sim_request(creatives: &[SimCreative], rng: &mut StdRng) -> SelectionRequest {
    const COUNTRIES: [&str; 5] = ["US", "GB", "FR", "DE", "CA"];
    const CATEGORIES: [&str; 4] = ["healthcare", "sports", "finance", "news"];
    let device = match rng.gen_range(0..3) {
        0 => DeviceType::Mobile,
        1 => DeviceType::Tablet,
        _ => DeviceType::Desktop,
    };

    SelectionRequest {
        candidates: creatives.iter().map(|c| c.creative.clone()).collect(),
        user: UserContext {
            user_id: Some(format!("u-{}", rng.gen_range(0..10_000))),
            country: Some(COUNTRIES[rng.gen_range(0..COUNTRIES.len())].to_string()),
            device_type: Some(device),
            recency_score: Some(rng.gen::<f64>()),
            purchase_score: Some(rng.gen::<f64>()),
        },
        page: PageContext {
            url: None,
            category: Some(CATEGORIES[rng.gen_range(0..CATEGORIES.len())].to_string()),
            is_home: Some(rng.gen_bool(0.3)),
        },
    }
}

async fn simulate(
    engine: &Arc<DecisionEngine>,
    ingestor: &OutcomeIngestor,
    requests: usize,
    seed: u64,
) {
    let creatives = sim_creatives();
    let true_ctr: HashMap<&str, f64> = creatives
        .iter()
        .map(|c| (c.creative.creative_id.as_str(), c.true_ctr))
        .collect();
    let mut traffic = EntropySource::rng_for(seed ^ 0x5151_5151);
    let checkpoint = (requests / 5).max(1);

    info!(requests, creatives = creatives.len(), "Simulation started");

    for i in 0..requests {
        let request = sim_request(&creatives, &mut traffic);
        let result = match engine.select_creative(&request) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Simulated request failed");
                continue;
            }
        };

        ingestor.submit(OutcomeEvent::impression_for(&result));
        let p = true_ctr
            .get(result.creative_id.as_str())
            .copied()
            .unwrap_or(0.0);
        if traffic.gen_bool(p) {
            ingestor.submit(OutcomeEvent::click_for(&result));
        }

        if i % 256 == 255 {
            tokio::task::yield_now().await;
        }
        if (i + 1) % checkpoint == 0 {
            retrain_now(engine.clone()).await;
        }
    }

    info!(requests, "Simulation finished");
}

fn report(engine: &DecisionEngine) {
    let mut stats = engine.store().snapshot_all();
    stats.sort_by(|a, b| a.0.cmp(&b.0));
    let total: u64 = stats.iter().map(|(_, s)| s.impressions).sum();

    for (creative_id, s) in &stats {
        let (windowed, windowed_clicks) = engine.history().creative_summary(creative_id);
        info!(
            creative_id = %creative_id,
            impressions = s.impressions,
            clicks = s.clicks,
            observed_ctr = s.ctr(),
            share = s.impressions as f64 / total.max(1) as f64,
            windowed,
            windowed_clicks,
            "Creative summary"
        );
    }

    match engine.retrain_status() {
        Some(status) => match serde_json::to_string(&status) {
            Ok(json) => info!(status = %json, generation = engine.registry().generation(), "Last retrain"),
            Err(e) => warn!(error = %e, "Could not serialize retrain status"),
        },
        None => info!("No retrain has run"),
    }
}
