//! Decision engine. Composes feature extraction, CTR scoring and Thompson
//! selection per ad request, and folds outcome events back into the
//! statistics store and training history.

pub mod decision;
pub mod heuristic;
pub mod history;
pub mod ingest;

pub use decision::{DecisionEngine, DecisionStage, RetrainReport, RetrainStatus, TrainingWindow};
pub use heuristic::HeuristicPrior;
pub use history::TrainingHistory;
pub use ingest::OutcomeIngestor;
