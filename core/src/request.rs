//! Rating request: what the scenario/lead subsystem hands the engine.

use crate::model::PaymentMode;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRequest {
    #[serde(default)]
    pub scenario_id:        Option<String>,
    pub product_type:       String,
    #[serde(default)]
    pub carrier_id:         Option<String>,
    #[serde(default)]
    pub payment_mode:       PaymentMode,
    /// Pin an exact table version (re-running a historical quote).
    #[serde(default)]
    pub rate_table_version: Option<String>,
    /// Resolve tables in force on this date instead of today.
    #[serde(default)]
    pub as_of:              Option<NaiveDate>,
    /// Insured-object and coverage attributes from the scenario.
    #[serde(default)]
    pub attributes:         BTreeMap<String, String>,
    #[serde(default)]
    pub overrides:          Overrides,
}

/// Manual overrides supplied with the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(default)]
    pub monthly_benefit_requested: Option<Decimal>,
    #[serde(default)]
    pub elimination_period_days:   Option<u32>,
    #[serde(default)]
    pub benefit_period:            Option<String>,
    #[serde(default)]
    pub occupation_class:          Option<String>,
    #[serde(default)]
    pub underwriting_class:        Option<String>,
    #[serde(default)]
    pub definition_of_disability:  Option<String>,
    #[serde(default)]
    pub factor_selections:         BTreeMap<String, String>,
    #[serde(default)]
    pub rider_selections:          Vec<String>,
    /// Default riders the applicant declined.
    #[serde(default)]
    pub excluded_riders:           Vec<String>,
    /// Bypass rate-key construction and look this key up directly.
    #[serde(default)]
    pub rate_key:                  Option<String>,
}

impl RatingRequest {
    pub fn new(product_type: impl Into<String>) -> Self {
        Self {
            scenario_id: None,
            product_type: product_type.into(),
            carrier_id: None,
            payment_mode: PaymentMode::Annual,
            rate_table_version: None,
            as_of: None,
            attributes: BTreeMap::new(),
            overrides: Overrides::default(),
        }
    }

    /// Attribute values used to build the rate key and pick factor options.
    ///
    /// Layered: scenario attributes, then the named override fields, then
    /// explicit factor selections. Later layers win.
    pub fn selections(&self) -> BTreeMap<String, String> {
        let mut out = self.attributes.clone();
        let o = &self.overrides;
        let named = [
            ("elimination_period_days", o.elimination_period_days.map(|d| d.to_string())),
            ("benefit_period", o.benefit_period.clone()),
            ("occupation_class", o.occupation_class.clone()),
            ("underwriting_class", o.underwriting_class.clone()),
            ("definition_of_disability", o.definition_of_disability.clone()),
        ];
        for (key, value) in named {
            if let Some(v) = value {
                out.insert(key.to_string(), v);
            }
        }
        out.extend(o.factor_selections.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    /// Canonical form used for the audit input hash: decimals stripped of
    /// trailing zeros, rider lists sorted and deduplicated.
    pub fn normalized(&self) -> RatingRequest {
        let mut req = self.clone();
        let o = &mut req.overrides;
        o.monthly_benefit_requested = o.monthly_benefit_requested.map(|d| d.normalize());
        o.rider_selections.sort();
        o.rider_selections.dedup();
        o.excluded_riders.sort();
        o.excluded_riders.dedup();
        req
    }
}
