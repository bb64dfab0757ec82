//! Table-declared constraints, read from a rate table's metadata.
//!
//! ```json
//! {
//!   "rate_key_dimensions": ["age_band", "underwriting_class"],
//!   "eligibility": {
//!     "monthly_benefit": { "min": "500", "max": "15000" },
//!     "elimination_periods": [30, 90, 180],
//!     "benefit_periods": ["2y", "5y", "to_65"],
//!     "occupation_classes": ["1A", "2A", "3A"],
//!     "underwriting_classes": ["preferred", "standard"],
//!     "definitions_of_disability": ["own_occ", "any_occ"]
//!   }
//! }
//! ```
//!
//! An empty list leaves that attribute unconstrained. A request that does
//! not supply an attribute is never rejected for it.

use crate::{
    error::{RatingError, RatingResult},
    request::RatingRequest,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RATE_KEY_SEPARATOR: &str = "|";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    #[serde(default)]
    pub rate_key_dimensions: Vec<String>,
    #[serde(default)]
    pub eligibility:         EligibilityRules,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityRules {
    #[serde(default)]
    pub monthly_benefit:           Option<BenefitRange>,
    #[serde(default)]
    pub elimination_periods:       Vec<u32>,
    #[serde(default)]
    pub benefit_periods:           Vec<String>,
    #[serde(default)]
    pub occupation_classes:        Vec<String>,
    #[serde(default)]
    pub underwriting_classes:      Vec<String>,
    #[serde(default)]
    pub definitions_of_disability: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenefitRange {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl TableProfile {
    pub fn from_metadata(metadata: &serde_json::Value) -> RatingResult<Self> {
        if metadata.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(metadata.clone())
            .map_err(|e| RatingError::EngineFault(format!("malformed table metadata: {e}")))
    }

    /// Build the canonical rate key from the request's selections.
    /// `None` when a declared dimension has no value in the request.
    pub fn rate_key(&self, request: &RatingRequest) -> Option<String> {
        if let Some(key) = &request.overrides.rate_key {
            return Some(key.clone());
        }
        if self.rate_key_dimensions.is_empty() {
            return None;
        }
        let selections: BTreeMap<String, String> = request.selections();
        let parts = self
            .rate_key_dimensions
            .iter()
            .map(|dim| selections.get(dim).map(String::as_str))
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join(RATE_KEY_SEPARATOR))
    }
}

impl EligibilityRules {
    /// Every violated constraint, in a stable order. Empty means eligible.
    ///
    /// `selections` is the merged attribute/override map from
    /// `RatingRequest::selections`, so a value is checked wherever it
    /// came from.
    pub fn violations(
        &self,
        selections: &BTreeMap<String, String>,
        monthly_benefit: Option<Decimal>,
    ) -> Vec<String> {
        let mut out = Vec::new();

        if let (Some(range), Some(benefit)) = (&self.monthly_benefit, monthly_benefit) {
            if let Some(min) = range.min {
                if benefit < min {
                    out.push(format!("monthly benefit {benefit} is below the minimum {min}"));
                }
            }
            if let Some(max) = range.max {
                if benefit > max {
                    out.push(format!("monthly benefit {benefit} exceeds the maximum {max}"));
                }
            }
        }

        if let Some(raw) = selections.get("elimination_period_days") {
            if !self.elimination_periods.is_empty() {
                match raw.trim().parse::<u32>() {
                    Ok(days) if self.elimination_periods.contains(&days) => {}
                    Ok(days) => out.push(format!("elimination period {days} days is not offered")),
                    Err(_) => out.push(format!("elimination period '{raw}' is not a number of days")),
                }
            }
        }

        let get = |key: &str| selections.get(key).map(String::as_str);
        check_option(&mut out, "benefit period", &self.benefit_periods, get("benefit_period"));
        check_option(&mut out, "occupation class", &self.occupation_classes, get("occupation_class"));
        check_option(
            &mut out,
            "underwriting class",
            &self.underwriting_classes,
            get("underwriting_class"),
        );
        check_option(
            &mut out,
            "definition of disability",
            &self.definitions_of_disability,
            get("definition_of_disability"),
        );

        out
    }
}

fn check_option(out: &mut Vec<String>, label: &str, allowed: &[String], value: Option<&str>) {
    if let Some(v) = value {
        if !allowed.is_empty() && !allowed.iter().any(|a| a == v) {
            out.push(format!("{label} '{v}' is not recognized"));
        }
    }
}
