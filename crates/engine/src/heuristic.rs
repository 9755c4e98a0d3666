//! Cold-start CTR estimate used until a trained model is installed.

use adselect_core::config::HeuristicConfig;
use adselect_core::types::{PageContext, UserContext};

#[derive(Debug, Clone)]
pub struct HeuristicPrior {
    base_ctr: f64,
    preferred_countries: Vec<String>,
    country_multiplier: f64,
    premium_categories: Vec<String>,
    category_multiplier: f64,
    max_ctr: f64,
}

impl HeuristicPrior {
    /// Base rate, boosted for preferred countries and premium page
    /// categories, capped at `max_ctr`.
    pub fn estimate(&self, user: &UserContext, page: &PageContext) -> f64 {
        let mut ctr = self.base_ctr;

        if let Some(country) = user.country.as_deref() {
            if self
                .preferred_countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(country.trim()))
            {
                ctr *= self.country_multiplier;
            }
        }

        if let Some(category) = page.category.as_deref() {
            if self
                .premium_categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(category.trim()))
            {
                ctr *= self.category_multiplier;
            }
        }

        ctr.min(self.max_ctr)
    }

    pub fn max_ctr(&self) -> f64 {
        self.max_ctr
    }
}

impl From<&HeuristicConfig> for HeuristicPrior {
    fn from(config: &HeuristicConfig) -> Self {
        Self {
            base_ctr: config.base_ctr,
            preferred_countries: config.preferred_countries.clone(),
            country_multiplier: config.preferred_country_multiplier,
            premium_categories: config.premium_categories.clone(),
            category_multiplier: config.premium_category_multiplier,
            max_ctr: config.max_ctr,
        }
    }
}

impl Default for HeuristicPrior {
    fn default() -> Self {
        Self::from(&HeuristicConfig::default())
    }
}
