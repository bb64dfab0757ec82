//! The rating engine: pure pipeline over one rate table snapshot.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Resolve table        (caller: `RatingService`, via the store)
//!   2. Eligibility gate
//!   3. Base rate lookup
//!   4. Factors              (ascending sort_order)
//!   5. Riders               (ascending sort_order)
//!   6. Fees                 (ascending sort_order) -> annual premium
//!   7. Modal conversion     (all four payment modes)
//!   8. Result assembly
//!
//! RULES:
//!   - Reordering steps changes the premium. Don't.
//!   - All arithmetic is `Decimal`. Rounding to the currency minor unit
//!     happens once, in step 7/8, never between steps.
//!   - The engine holds no mutable state; `evaluate` is safe to call from
//!     any number of threads against owned snapshots.

use crate::{
    config::RatingConfig,
    eligibility::TableProfile,
    error::{RatingError, RatingResult},
    model::{ApplyMode, PaymentMode, RateModalFactor, RateRider, RuleSet},
    request::RatingRequest,
    types::TableId,
};
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Result types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IneligibleReason {
    EligibilityViolation,
    NoMatchingRate,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IneligibleReason::EligibilityViolation => "EligibilityViolation",
            IneligibleReason::NoMatchingRate       => "NoMatchingRate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ineligibility {
    pub code:    IneligibleReason,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Base,
    Factor,
    Rider,
    Fee,
}

/// One applied pipeline step, for regulatory explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTrace {
    pub kind:          StepKind,
    pub code:          String,
    pub mode:          Option<ApplyMode>,
    pub value:         Decimal,
    /// Change to the running premium caused by this step.
    pub effect:        Decimal,
    pub running_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalPremium {
    pub mode:                PaymentMode,
    pub factor:              Decimal,
    pub flat_fee:            Decimal,
    pub installments:        u32,
    pub installment_premium: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingOutcome {
    pub eligible:            bool,
    pub reason:              Option<Ineligibility>,
    pub rate_key:            Option<String>,
    pub payment_mode:        PaymentMode,
    pub annual_premium:      Option<Decimal>,
    /// Premium per installment for the requested payment mode.
    pub installment_premium: Option<Decimal>,
    pub modal_premiums:      Vec<ModalPremium>,
    pub steps:               Vec<StepTrace>,
    pub rate_table_id:       TableId,
    pub rate_table_version:  String,
    pub engine_version:      String,
}

impl RatingOutcome {
    pub fn modal(&self, mode: PaymentMode) -> Option<&ModalPremium> {
        self.modal_premiums.iter().find(|m| m.mode == mode)
    }
}

// ── Engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RatingEngine {
    engine_version: String,
    minor_units:    u32,
}

impl RatingEngine {
    pub fn new(config: &RatingConfig) -> Self {
        Self {
            engine_version: config.engine_version.clone(),
            minor_units:    config.currency_minor_units,
        }
    }

    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    /// Run steps 2–8 against an already-resolved table.
    ///
    /// Ineligibility is an `Ok` outcome with `eligible = false`. `Err` is
    /// reserved for engine faults (malformed table data).
    pub fn evaluate(&self, request: &RatingRequest, rules: &RuleSet) -> RatingResult<RatingOutcome> {
        let table = &rules.table;
        let profile = TableProfile::from_metadata(&table.metadata)?;

        // 2. Eligibility gate
        let selections = request.selections();
        let violations = profile
            .eligibility
            .violations(&selections, request.overrides.monthly_benefit_requested);
        if !violations.is_empty() {
            log::debug!(
                "engine: {} {} ineligible: {}",
                table.product_type, table.version, violations.join("; ")
            );
            return Ok(self.ineligible(request, rules, None, IneligibleReason::EligibilityViolation, violations));
        }

        // 3. Base rate lookup
        let Some(rate_key) = profile.rate_key(request) else {
            let missing = missing_dimensions(&profile, request);
            return Ok(self.ineligible(
                request,
                rules,
                None,
                IneligibleReason::NoMatchingRate,
                vec![format!("no value for rate dimensions: {}", missing.join(", "))],
            ));
        };
        let Some(entry) = rules.entry(&rate_key) else {
            return Ok(self.ineligible(
                request,
                rules,
                Some(rate_key.clone()),
                IneligibleReason::NoMatchingRate,
                vec![format!("no base rate for key '{rate_key}'")],
            ));
        };

        let mut running = entry.rate_value;
        let mut steps = vec![StepTrace {
            kind:          StepKind::Base,
            code:          rate_key.clone(),
            mode:          None,
            value:         entry.rate_value,
            effect:        entry.rate_value,
            running_total: running,
        }];

        // 4. Factors
        running = apply_factors(rules, &selections, running, &mut steps)?;

        // 5. Riders
        running = apply_riders(rules, request, &rate_key, running, &mut steps)?;

        // 6. Fees
        let annual = apply_fees(rules, running, &mut steps)?;

        // 7. Modal conversion
        let modal_premiums = self.modal_premiums(rules, annual, request.payment_mode)?;
        let installment_premium = modal_premiums
            .iter()
            .find(|m| m.mode == request.payment_mode)
            .map(|m| m.installment_premium);

        // 8. Result assembly
        let annual_premium = self.round(annual);
        log::debug!(
            "engine: {} {} key={rate_key} annual={annual_premium} steps={}",
            table.product_type, table.version, steps.len()
        );

        Ok(RatingOutcome {
            eligible: true,
            reason: None,
            rate_key: Some(rate_key),
            payment_mode: request.payment_mode,
            annual_premium: Some(annual_premium),
            installment_premium,
            modal_premiums,
            steps,
            rate_table_id: table.id,
            rate_table_version: table.version.clone(),
            engine_version: self.engine_version.clone(),
        })
    }

    fn ineligible(
        &self,
        request: &RatingRequest,
        rules: &RuleSet,
        rate_key: Option<String>,
        code: IneligibleReason,
        details: Vec<String>,
    ) -> RatingOutcome {
        RatingOutcome {
            eligible: false,
            reason: Some(Ineligibility { code, details }),
            rate_key,
            payment_mode: request.payment_mode,
            annual_premium: None,
            installment_premium: None,
            modal_premiums: Vec::new(),
            steps: Vec::new(),
            rate_table_id: rules.table.id,
            rate_table_version: rules.table.version.clone(),
            engine_version: self.engine_version.clone(),
        }
    }

    /// Installment premium for every mode the table prices.
    ///
    /// Annual with no modal row is the identity conversion. Other modes
    /// without a row are left out, unless the request asked for one.
    fn modal_premiums(
        &self,
        rules: &RuleSet,
        annual: Decimal,
        requested: PaymentMode,
    ) -> RatingResult<Vec<ModalPremium>> {
        let identity = RateModalFactor {
            mode:     PaymentMode::Annual,
            factor:   Decimal::ONE,
            flat_fee: Decimal::ZERO,
        };

        let mut out = Vec::with_capacity(PaymentMode::ALL.len());
        for mode in PaymentMode::ALL {
            let row = match rules.modal_factor(mode) {
                Some(row) => row,
                None if mode == PaymentMode::Annual => &identity,
                None if mode == requested => {
                    return Err(RatingError::EngineFault(format!(
                        "rate table {} has no modal factor for {mode}",
                        rules.table.version
                    )));
                }
                None => continue,
            };
            let installments = mode.installments_per_year();
            let premium = annual
                .checked_mul(row.factor)
                .and_then(|p| p.checked_div(Decimal::from(installments)))
                .and_then(|p| p.checked_add(row.flat_fee))
                .ok_or_else(|| overflow("modal factor", mode.as_str()))?;
            out.push(ModalPremium {
                mode,
                factor: row.factor,
                flat_fee: row.flat_fee,
                installments,
                installment_premium: self.round(premium),
            });
        }
        Ok(out)
    }

    fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.minor_units, RoundingStrategy::MidpointAwayFromZero)
    }
}

// ── Pipeline steps ─────────────────────────────────────────────────

fn apply_factors(
    rules: &RuleSet,
    selections: &BTreeMap<String, String>,
    mut running: Decimal,
    steps: &mut Vec<StepTrace>,
) -> RatingResult<Decimal> {
    // rules.factors is already in (sort_order, factor_code, option_value) order.
    for factor in &rules.factors {
        if selections.get(&factor.factor_code) != Some(&factor.option_value) {
            continue;
        }
        let code = format!("{}={}", factor.factor_code, factor.option_value);
        let after = factor
            .apply_mode
            .apply(running, factor.factor_value, Decimal::ZERO)
            .ok_or_else(|| overflow("factor", &code))?;
        steps.push(trace(StepKind::Factor, code, factor.apply_mode, factor.factor_value, running, after)?);
        running = after;
    }
    Ok(running)
}

fn apply_riders(
    rules: &RuleSet,
    request: &RatingRequest,
    rate_key: &str,
    mut running: Decimal,
    steps: &mut Vec<StepTrace>,
) -> RatingResult<Decimal> {
    let selected: BTreeSet<&str> = request
        .overrides
        .rider_selections
        .iter()
        .map(String::as_str)
        .collect();
    let excluded: BTreeSet<&str> = request
        .overrides
        .excluded_riders
        .iter()
        .map(String::as_str)
        .collect();

    for rider in &rules.riders {
        let code = rider.rider_code.as_str();
        let wanted = selected.contains(code) || (rider.is_default && !excluded.contains(code));
        if !wanted {
            continue;
        }
        if !rider_attaches_to(rider, rate_key)? {
            log::debug!("engine: rider {code} skipped, pattern does not match key {rate_key}");
            continue;
        }
        let after = rider
            .apply_mode
            .apply(running, rider.rider_value, Decimal::ZERO)
            .ok_or_else(|| overflow("rider", code))?;
        steps.push(trace(StepKind::Rider, code.to_string(), rider.apply_mode, rider.rider_value, running, after)?);
        running = after;
    }
    Ok(running)
}

fn apply_fees(rules: &RuleSet, mut running: Decimal, steps: &mut Vec<StepTrace>) -> RatingResult<Decimal> {
    let pre_fee = running;
    for fee in &rules.fees {
        let value = fee.fee_type.signed(fee.fee_value);
        let after = fee
            .apply_mode
            .apply(running, value, pre_fee)
            .ok_or_else(|| overflow("fee", &fee.fee_code))?;
        steps.push(trace(StepKind::Fee, fee.fee_code.clone(), fee.apply_mode, value, running, after)?);
        running = after;
    }
    Ok(running)
}

fn trace(
    kind: StepKind,
    code: String,
    mode: ApplyMode,
    value: Decimal,
    before: Decimal,
    after: Decimal,
) -> RatingResult<StepTrace> {
    let effect = after
        .checked_sub(before)
        .ok_or_else(|| overflow("step", &code))?;
    Ok(StepTrace {
        kind,
        code,
        mode: Some(mode),
        value,
        effect,
        running_total: after,
    })
}

fn overflow(stage: &str, code: &str) -> RatingError {
    RatingError::EngineFault(format!("premium overflowed the decimal range at {stage} {code}"))
}

/// Riders without a pattern attach to every base entry. Patterns are
/// globs over the rate key: `*` matches any run, `?` one character.
fn rider_attaches_to(rider: &RateRider, rate_key: &str) -> RatingResult<bool> {
    let Some(pattern) = rider.rate_key_pattern.as_deref().filter(|p| !p.is_empty()) else {
        return Ok(true);
    };
    let re = glob_regex(pattern).map_err(|e| {
        RatingError::EngineFault(format!("rider {} has a bad rate_key_pattern: {e}", rider.rider_code))
    })?;
    Ok(re.is_match(rate_key))
}

fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
}

fn missing_dimensions(profile: &TableProfile, request: &RatingRequest) -> Vec<String> {
    if profile.rate_key_dimensions.is_empty() {
        return vec!["(table declares no rate_key_dimensions)".to_string()];
    }
    let selections = request.selections();
    profile
        .rate_key_dimensions
        .iter()
        .filter(|d| !selections.contains_key(*d))
        .cloned()
        .collect()
}
