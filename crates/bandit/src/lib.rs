//! Explore/exploit creative selection: per-creative performance counters
//! and Thompson Sampling over a CTR-informed Beta prior.

pub mod entropy;
pub mod stats;
pub mod thompson;

pub use entropy::EntropySource;
pub use stats::PerformanceStore;
pub use thompson::{ScoredCandidate, ThompsonDraw, ThompsonSelector};
