use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Feature vector and model disagree on arity. A configuration bug, never
    /// a data problem.
    #[error("Dimension mismatch: expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Insufficient training data: need at least {required} examples, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("Numeric instability: {0}")]
    NumericInstability(String),

    #[error("No eligible candidates for selection")]
    NoEligibleCandidates,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable short name, used as a metric label and in retrain status reports.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DimensionMismatch { .. } => "dimension_mismatch",
            EngineError::InsufficientData { .. } => "insufficient_data",
            EngineError::NumericInstability(_) => "numeric_instability",
            EngineError::NoEligibleCandidates => "no_eligible_candidates",
            EngineError::Config(_) => "config",
        }
    }

    /// Whether the training path may simply try again on the next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData { .. } | EngineError::NumericInstability(_)
        )
    }
}
