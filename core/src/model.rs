//! Rate table data model.
//!
//! A `RateTable` owns five rule collections (entries, factors, riders,
//! fees, modal factors). Sub-resources carry no surrogate ids: inside a
//! table each one is identified by its natural key, which is also the
//! upsert key used by the importer.

use crate::{
    error::{RatingError, RatingResult},
    types::TableId,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

// ── Rate table ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    pub id:              TableId,
    pub product_type:    String,
    pub version:         String,
    pub name:            String,
    pub carrier_id:      Option<String>,
    pub effective_date:  Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub is_active:       bool,
    pub metadata:        serde_json::Value,
    /// Bumped on every write to the table or its rules.
    pub revision:        i64,
    pub created_at:      DateTime<Utc>,
}

/// Input for `RateStore::create_table`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRateTable {
    pub product_type:    String,
    pub version:         String,
    pub name:            String,
    #[serde(default)]
    pub carrier_id:      Option<String>,
    #[serde(default)]
    pub effective_date:  Option<NaiveDate>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_active:       bool,
    #[serde(default = "empty_object")]
    pub metadata:        serde_json::Value,
}

/// Partial update for `RateStore::update_table`. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableUpdate {
    pub name:            Option<String>,
    pub effective_date:  Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub metadata:        Option<serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// ── Sub-resources ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTableEntry {
    pub rate_key:   String,
    pub rate_value: Decimal,
    #[serde(default)]
    pub dimensions: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateFactor {
    pub factor_code:  String,
    pub option_value: String,
    pub label:        Option<String>,
    pub apply_mode:   ApplyMode,
    pub factor_value: Decimal,
    pub sort_order:   i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRider {
    pub rider_code:       String,
    pub label:            Option<String>,
    pub apply_mode:       ApplyMode,
    pub rider_value:      Decimal,
    pub is_default:       bool,
    pub rate_key_pattern: Option<String>,
    pub sort_order:       i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateFee {
    pub fee_code:   String,
    pub label:      Option<String>,
    pub fee_type:   FeeType,
    pub apply_mode: ApplyMode,
    pub fee_value:  Decimal,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateModalFactor {
    pub mode:     PaymentMode,
    pub factor:   Decimal,
    pub flat_fee: Decimal,
}

/// A point-in-time snapshot of one table and all of its rules.
///
/// Collections are ordered by `sort_order`, ties broken by natural key,
/// so iterating them is already the evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub table:         RateTable,
    pub entries:       Vec<RateTableEntry>,
    pub factors:       Vec<RateFactor>,
    pub riders:        Vec<RateRider>,
    pub fees:          Vec<RateFee>,
    pub modal_factors: Vec<RateModalFactor>,
}

impl RuleSet {
    pub fn entry(&self, rate_key: &str) -> Option<&RateTableEntry> {
        self.entries.iter().find(|e| e.rate_key == rate_key)
    }

    pub fn modal_factor(&self, mode: PaymentMode) -> Option<&RateModalFactor> {
        self.modal_factors.iter().find(|m| m.mode == mode)
    }
}

// ── Apply mode ─────────────────────────────────────────────────────

/// How a factor, rider or fee value combines with the running premium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    Multiply,
    Add,
    Subtract,
    Percent,
}

impl ApplyMode {
    pub const FACTOR_MODES: &'static [ApplyMode] =
        &[ApplyMode::Multiply, ApplyMode::Add, ApplyMode::Subtract];
    pub const RIDER_MODES: &'static [ApplyMode] = &[ApplyMode::Add, ApplyMode::Multiply];
    pub const FEE_MODES: &'static [ApplyMode] = &[ApplyMode::Add, ApplyMode::Percent];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyMode::Multiply => "multiply",
            ApplyMode::Add      => "add",
            ApplyMode::Subtract => "subtract",
            ApplyMode::Percent  => "percent",
        }
    }

    /// Combine `value` with `running`. `percent_base` is the amount a
    /// `Percent` value is taken of (the pre-fee premium).
    ///
    /// `None` when the result does not fit in a `Decimal`.
    pub fn apply(&self, running: Decimal, value: Decimal, percent_base: Decimal) -> Option<Decimal> {
        match self {
            ApplyMode::Multiply => running.checked_mul(value),
            ApplyMode::Add      => running.checked_add(value),
            ApplyMode::Subtract => running.checked_sub(value),
            ApplyMode::Percent  => percent_base
                .checked_mul(value)
                .and_then(|p| running.checked_add(p)),
        }
    }

    /// Parse and restrict to the modes a resource type supports.
    pub fn parse_for(
        raw: &str,
        allowed: &[ApplyMode],
        field: &'static str,
    ) -> RatingResult<Self> {
        let mode: ApplyMode = raw.parse()?;
        if allowed.contains(&mode) {
            Ok(mode)
        } else {
            Err(RatingError::InvalidValue { field, value: raw.to_string() })
        }
    }
}

impl FromStr for ApplyMode {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multiply" => Ok(ApplyMode::Multiply),
            "add"      => Ok(ApplyMode::Add),
            "subtract" => Ok(ApplyMode::Subtract),
            "percent"  => Ok(ApplyMode::Percent),
            _ => Err(RatingError::InvalidValue { field: "apply_mode", value: s.to_string() }),
        }
    }
}

impl fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Fee type ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Fee,
    Credit,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeType::Fee    => "fee",
            FeeType::Credit => "credit",
        }
    }

    /// Fees raise the premium, credits lower it.
    pub fn signed(&self, value: Decimal) -> Decimal {
        match self {
            FeeType::Fee    => value,
            FeeType::Credit => -value,
        }
    }
}

impl FromStr for FeeType {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fee"    => Ok(FeeType::Fee),
            "credit" => Ok(FeeType::Credit),
            _ => Err(RatingError::InvalidValue { field: "fee_type", value: s.to_string() }),
        }
    }
}

// ── Payment mode ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    #[default]
    Annual,
    Semiannual,
    Quarterly,
    Monthly,
}

impl PaymentMode {
    pub const ALL: [PaymentMode; 4] = [
        PaymentMode::Annual,
        PaymentMode::Semiannual,
        PaymentMode::Quarterly,
        PaymentMode::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Annual     => "annual",
            PaymentMode::Semiannual => "semiannual",
            PaymentMode::Quarterly  => "quarterly",
            PaymentMode::Monthly    => "monthly",
        }
    }

    pub fn installments_per_year(&self) -> u32 {
        match self {
            PaymentMode::Annual     => 1,
            PaymentMode::Semiannual => 2,
            PaymentMode::Quarterly  => 4,
            PaymentMode::Monthly    => 12,
        }
    }
}

impl FromStr for PaymentMode {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual"     => Ok(PaymentMode::Annual),
            "semiannual" => Ok(PaymentMode::Semiannual),
            "quarterly"  => Ok(PaymentMode::Quarterly),
            "monthly"    => Ok(PaymentMode::Monthly),
            _ => Err(RatingError::InvalidValue { field: "mode", value: s.to_string() }),
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn apply_modes_combine_with_running_premium() {
        assert_eq!(ApplyMode::Multiply.apply(d("100"), d("0.9"), d("0")), Some(d("90")));
        assert_eq!(ApplyMode::Add.apply(d("100"), d("25"), d("0")), Some(d("125")));
        assert_eq!(ApplyMode::Subtract.apply(d("100"), d("10"), d("0")), Some(d("90")));
        // Percent is taken of the base, not of the running value.
        assert_eq!(ApplyMode::Percent.apply(d("110"), d("0.1"), d("100")), Some(d("120")));
    }

    #[test]
    fn overflow_yields_none() {
        assert_eq!(ApplyMode::Multiply.apply(Decimal::MAX, d("1.2"), d("0")), None);
        assert_eq!(ApplyMode::Add.apply(Decimal::MAX, d("1"), d("0")), None);
        assert_eq!(ApplyMode::Subtract.apply(Decimal::MIN, d("1"), d("0")), None);
        assert_eq!(ApplyMode::Percent.apply(d("1"), d("2"), Decimal::MAX), None);
    }

    #[test]
    fn resource_mode_restrictions_are_enforced() {
        assert!(ApplyMode::parse_for("percent", ApplyMode::FACTOR_MODES, "apply_mode").is_err());
        assert!(ApplyMode::parse_for("subtract", ApplyMode::RIDER_MODES, "apply_mode").is_err());
        assert_eq!(
            ApplyMode::parse_for("Percent", ApplyMode::FEE_MODES, "apply_mode").unwrap(),
            ApplyMode::Percent
        );
    }

    #[test]
    fn credit_fees_are_negative() {
        assert_eq!(FeeType::Credit.signed(d("5")), d("-5"));
        assert_eq!(FeeType::Fee.signed(d("5")), d("5"));
    }
}
