use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed-arity numeric features for one (creative, user, page) triple.
/// The bias term is not stored here; models prepend it when scoring.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Ctv,
}

/// A candidate creative with the static attributes supplied by the
/// campaign/creative store. Every attribute is optional; extraction
/// substitutes zero for anything missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Creative {
    pub creative_id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub bid_price: Option<f64>,
    #[serde(default)]
    pub historical_ctr: Option<f64>,
    #[serde(default)]
    pub revenue_per_view: Option<f64>,
}

impl Creative {
    pub fn new(creative_id: impl Into<String>) -> Self {
        Self {
            creative_id: creative_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub user_id: Option<String>,
    /// ISO 3166-1 alpha-2 country code.
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub recency_score: Option<f64>,
    #[serde(default)]
    pub purchase_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContext {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_home: Option<bool>,
}

/// One ad request: the eligible candidates plus the request context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub candidates: Vec<Creative>,
    #[serde(default)]
    pub user: UserContext,
    #[serde(default)]
    pub page: PageContext,
}

/// A labeled row of training history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub clicked: bool,
}

impl TrainingExample {
    pub fn new(features: impl Into<FeatureVector>, clicked: bool) -> Self {
        Self {
            features: features.into(),
            clicked,
        }
    }

    pub fn label(&self) -> f64 {
        if self.clicked {
            1.0
        } else {
            0.0
        }
    }
}

/// Point-in-time copy of a creative's counters. `clicks <= impressions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeStats {
    pub impressions: u64,
    pub clicks: u64,
}

impl CreativeStats {
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }

    pub fn non_clicks(&self) -> u64 {
        self.impressions.saturating_sub(self.clicks)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Impression,
    Click,
}

/// Feedback pushed in by the serving/analytics pipeline after a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeEvent {
    /// The decision's creative was actually served. Carries the winner's
    /// features so the impression can join the training history.
    Impression {
        decision_id: Uuid,
        creative_id: String,
        features: FeatureVector,
    },
    Click {
        decision_id: Uuid,
        creative_id: String,
    },
}

impl OutcomeEvent {
    /// Build the impression event for a decision that was served.
    pub fn impression_for(result: &SelectionResult) -> Self {
        OutcomeEvent::Impression {
            decision_id: result.decision_id,
            creative_id: result.creative_id.clone(),
            features: result.features.clone(),
        }
    }

    pub fn click_for(result: &SelectionResult) -> Self {
        OutcomeEvent::Click {
            decision_id: result.decision_id,
            creative_id: result.creative_id.clone(),
        }
    }

    pub fn creative_id(&self) -> &str {
        match self {
            OutcomeEvent::Impression { creative_id, .. } => creative_id,
            OutcomeEvent::Click { creative_id, .. } => creative_id,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            OutcomeEvent::Impression { .. } => OutcomeKind::Impression,
            OutcomeEvent::Click { .. } => OutcomeKind::Click,
        }
    }
}

/// Where a candidate's predicted CTR came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PredictionSource {
    Model { generation: u64 },
    Heuristic,
}

/// Per-candidate breakdown of one Thompson draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub creative_id: String,
    pub predicted_ctr: f64,
    pub alpha: f64,
    pub beta: f64,
    pub sample: f64,
}

/// The engine's answer to one ad request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResult {
    pub decision_id: Uuid,
    pub creative_id: String,
    pub predicted_ctr: f64,
    pub prediction_source: PredictionSource,
    pub alpha: f64,
    pub beta: f64,
    pub sample: f64,
    /// Features of the winning creative, echoed back on the impression event.
    pub features: FeatureVector,
    pub candidates: Vec<CandidateScore>,
    /// Seed of the generator that produced the draws. `None` when the
    /// caller supplied its own generator.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creative_stats_ctr() {
        let stats = CreativeStats {
            impressions: 200,
            clicks: 5,
        };
        assert!((stats.ctr() - 0.025).abs() < 1e-12);
        assert_eq!(stats.non_clicks(), 195);
        assert_eq!(CreativeStats::default().ctr(), 0.0);
    }

    #[test]
    fn test_outcome_event_serialization() {
        let event = OutcomeEvent::Click {
            decision_id: Uuid::new_v4(),
            creative_id: "cr-1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"click\""));

        let decoded: OutcomeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.kind(), OutcomeKind::Click);
        assert_eq!(decoded.creative_id(), "cr-1");
    }

    #[test]
    fn test_selection_request_defaults_missing_context() {
        let request: SelectionRequest =
            serde_json::from_str(r#"{"candidates":[{"creative_id":"a"}]}"#).unwrap();
        assert_eq!(request.candidates.len(), 1);
        assert!(request.user.country.is_none());
        assert!(request.page.category.is_none());
        assert!(request.candidates[0].bid_price.is_none());
    }

    #[test]
    fn test_training_example_label() {
        assert_eq!(TrainingExample::new(vec![1.0], true).label(), 1.0);
        assert_eq!(TrainingExample::new(vec![1.0], false).label(), 0.0);
    }
}
