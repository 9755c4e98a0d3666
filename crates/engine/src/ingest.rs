//! Asynchronous outcome ingestion. Uses a channel so the serving path can
//! hand off impression/click events without waiting on the engine.

use crate::decision::DecisionEngine;
use adselect_core::types::OutcomeEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Sender half of the outcome pipeline. Cloning shares the same queue.
#[derive(Clone)]
pub struct OutcomeIngestor {
    sender: mpsc::Sender<OutcomeEvent>,
}

impl OutcomeIngestor {
    /// Create the queue and spawn the background applier. The task ends
    /// once every `OutcomeIngestor` clone has been dropped and the queue is
    /// drained.
    pub fn spawn(engine: Arc<DecisionEngine>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<OutcomeEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut applied = 0u64;
            while let Some(event) = receiver.recv().await {
                engine.ingest(event);
                applied += 1;
            }
            info!(applied, "Outcome ingestor stopped");
        });

        info!(capacity, "Outcome ingestor started");
        (Self { sender }, handle)
    }

    /// Queue an event without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, event: OutcomeEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => {
                metrics::counter!("outcomes.queued").increment(1);
                true
            }
            Err(e) => {
                metrics::counter!("outcomes.dropped").increment(1);
                warn!("Outcome event dropped: {}", e);
                false
            }
        }
    }
}
