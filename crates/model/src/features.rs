//! Feature extraction for CTR scoring.
//!
//! The ordered [`FeatureSchema`] is the contract between the extractor and
//! every model scored against it: a model trained under one schema has
//! `schema.arity() + 1` weights (bias first) and must be retrained when the
//! schema changes.

use adselect_core::types::{Creative, DeviceType, FeatureVector, PageContext, UserContext};
use adselect_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Creative's historical click-through rate.
    HistoricalCtr,
    /// Creative's historical revenue per view.
    RevenuePerView,
    BidPrice,
    /// User recency score, higher means seen more recently.
    UserRecency,
    /// User purchase-history score.
    PurchaseScore,
    PageIsHome,
    DeviceIsMobile,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 7] = [
        FeatureKind::HistoricalCtr,
        FeatureKind::RevenuePerView,
        FeatureKind::BidPrice,
        FeatureKind::UserRecency,
        FeatureKind::PurchaseScore,
        FeatureKind::PageIsHome,
        FeatureKind::DeviceIsMobile,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::HistoricalCtr => "historical_ctr",
            FeatureKind::RevenuePerView => "revenue_per_view",
            FeatureKind::BidPrice => "bid_price",
            FeatureKind::UserRecency => "user_recency",
            FeatureKind::PurchaseScore => "purchase_score",
            FeatureKind::PageIsHome => "page_is_home",
            FeatureKind::DeviceIsMobile => "device_is_mobile",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

/// Ordered, duplicate-free list of features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    kinds: Vec<FeatureKind>,
}

impl FeatureSchema {
    pub fn new(kinds: Vec<FeatureKind>) -> EngineResult<Self> {
        if kinds.is_empty() {
            return Err(EngineError::Config("feature schema is empty".to_string()));
        }
        for (i, kind) in kinds.iter().enumerate() {
            if kinds[..i].contains(kind) {
                return Err(EngineError::Config(format!(
                    "feature '{}' listed twice",
                    kind.name()
                )));
            }
        }
        Ok(Self { kinds })
    }

    /// Parse the configured feature names, preserving order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> EngineResult<Self> {
        let kinds = names
            .iter()
            .map(|n| {
                let n = n.as_ref().trim();
                FeatureKind::from_name(n)
                    .ok_or_else(|| EngineError::Config(format!("unknown feature '{n}'")))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Self::new(kinds)
    }

    /// Number of features, excluding the bias term.
    pub fn arity(&self) -> usize {
        self.kinds.len()
    }

    pub fn kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            kinds: FeatureKind::ALL.to_vec(),
        }
    }
}

/// Turns a (creative, user, page) triple into a [`FeatureVector`].
///
/// Extraction is total: missing or non-finite inputs become `0.0`.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    schema: FeatureSchema,
}

impl FeatureExtractor {
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn arity(&self) -> usize {
        self.schema.arity()
    }

    pub fn extract(
        &self,
        creative: &Creative,
        user: &UserContext,
        page: &PageContext,
    ) -> FeatureVector {
        let values = self
            .schema
            .kinds()
            .iter()
            .map(|kind| Self::value(*kind, creative, user, page))
            .collect();
        FeatureVector::new(values)
    }

    fn value(kind: FeatureKind, creative: &Creative, user: &UserContext, page: &PageContext) -> f64 {
        let raw = match kind {
            FeatureKind::HistoricalCtr => creative.historical_ctr,
            FeatureKind::RevenuePerView => creative.revenue_per_view,
            FeatureKind::BidPrice => creative.bid_price,
            FeatureKind::UserRecency => user.recency_score,
            FeatureKind::PurchaseScore => user.purchase_score,
            FeatureKind::PageIsHome => Some(flag(page.is_home.unwrap_or(false))),
            FeatureKind::DeviceIsMobile => Some(match user.device_type {
                Some(DeviceType::Mobile) => 1.0,
                Some(DeviceType::Tablet) => 0.5,
                Some(DeviceType::Desktop) | Some(DeviceType::Ctv) | None => 0.0,
            }),
        };
        raw.filter(|v| v.is_finite()).unwrap_or(0.0)
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
