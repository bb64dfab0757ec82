//! Audit recorder: one immutable `RatingRun` per evaluation.
//!
//! RULES:
//!   - Every evaluation is recorded, including ineligible and failed ones.
//!   - The recorder writes through its own connection in autocommit mode,
//!     so nothing a caller rolls back can take an audit row with it.
//!   - Runs are never updated or deleted (the schema aborts both).
//!   - A run that cannot be written is an error: no unaudited premiums.

use crate::{
    engine::RatingOutcome,
    error::{RatingError, RatingResult},
    model::{PaymentMode, RateTable},
    request::RatingRequest,
    store::RateStore,
    types::{RunId, TableId, UserId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Ineligible,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success    => "success",
            RunStatus::Ineligible => "ineligible",
            RunStatus::Error      => "error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success"    => Ok(RunStatus::Success),
            "ineligible" => Ok(RunStatus::Ineligible),
            "error"      => Ok(RunStatus::Error),
            _ => Err(RatingError::InvalidValue { field: "status", value: s.to_string() }),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The permanent record of what was quoted and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRun {
    pub run_id:             RunId,
    pub scenario_id:        Option<String>,
    pub product_type:       String,
    pub rate_table_id:      Option<TableId>,
    pub rate_table_version: Option<String>,
    pub engine_version:     String,
    pub input_hash:         String,
    pub input_snapshot:     serde_json::Value,
    pub output_snapshot:    serde_json::Value,
    pub annual_premium:     Option<Decimal>,
    pub monthly_premium:    Option<Decimal>,
    pub status:             RunStatus,
    pub error_message:      Option<String>,
    pub duration_ms:        i64,
    pub acting_user_id:     Option<UserId>,
    pub created_at:         DateTime<Utc>,
}

/// What happened to one evaluation, as handed to the recorder.
#[derive(Debug)]
pub enum Evaluation<'a> {
    Rated(&'a RatingOutcome),
    Failed {
        /// The table, if resolution got that far.
        table: Option<&'a RateTable>,
        error: &'a RatingError,
    },
}

/// SHA-256 (hex) over the normalized request. Map keys serialize sorted
/// and decimals are normalized, so logically identical requests hash the
/// same whatever their field order.
pub fn input_hash(request: &RatingRequest) -> RatingResult<String> {
    let canonical = serde_json::to_string(&serde_json::to_value(request.normalized())?)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

pub struct AuditRecorder {
    store:          RateStore,
    engine_version: String,
}

impl AuditRecorder {
    /// `store` should be a connection of its own, not one the caller
    /// runs business transactions on.
    pub fn new(store: RateStore, engine_version: impl Into<String>) -> Self {
        Self {
            store,
            engine_version: engine_version.into(),
        }
    }

    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    pub fn record(
        &self,
        request: &RatingRequest,
        evaluation: Evaluation<'_>,
        duration_ms: i64,
        acting_user_id: Option<&str>,
    ) -> RatingResult<RatingRun> {
        let input_snapshot = serde_json::to_value(request)?;
        let input_hash = input_hash(request)?;

        let run = match evaluation {
            Evaluation::Rated(outcome) => RatingRun {
                run_id:             uuid::Uuid::new_v4().to_string(),
                scenario_id:        request.scenario_id.clone(),
                product_type:       request.product_type.clone(),
                rate_table_id:      Some(outcome.rate_table_id),
                rate_table_version: Some(outcome.rate_table_version.clone()),
                engine_version:     self.engine_version.clone(),
                input_hash,
                input_snapshot,
                output_snapshot:    serde_json::to_value(outcome)?,
                annual_premium:     outcome.annual_premium,
                monthly_premium:    outcome
                    .modal(PaymentMode::Monthly)
                    .map(|m| m.installment_premium),
                status:             if outcome.eligible {
                    RunStatus::Success
                } else {
                    RunStatus::Ineligible
                },
                error_message:      outcome
                    .reason
                    .as_ref()
                    .map(|r| format!("{}: {}", r.code.as_str(), r.details.join("; "))),
                duration_ms,
                acting_user_id:     acting_user_id.map(str::to_string),
                created_at:         Utc::now(),
            },
            Evaluation::Failed { table, error } => RatingRun {
                run_id:             uuid::Uuid::new_v4().to_string(),
                scenario_id:        request.scenario_id.clone(),
                product_type:       request.product_type.clone(),
                rate_table_id:      table.map(|t| t.id),
                rate_table_version: table.map(|t| t.version.clone()),
                engine_version:     self.engine_version.clone(),
                input_hash,
                input_snapshot,
                output_snapshot:    serde_json::json!({ "error": error.to_string() }),
                annual_premium:     None,
                monthly_premium:    None,
                status:             RunStatus::Error,
                error_message:      Some(error.to_string()),
                duration_ms,
                acting_user_id:     acting_user_id.map(str::to_string),
                created_at:         Utc::now(),
            },
        };

        self.store.insert_rating_run(&run)?;
        log::info!(
            "audit: run {} product={} table={} status={} hash={}",
            run.run_id,
            run.product_type,
            run.rate_table_version.as_deref().unwrap_or("-"),
            run.status,
            &run.input_hash[..12]
        );
        Ok(run)
    }

    pub fn get(&self, run_id: &str) -> RatingResult<Option<RatingRun>> {
        self.store.get_rating_run(run_id)
    }

    pub fn runs_for_scenario(&self, scenario_id: &str) -> RatingResult<Vec<RatingRun>> {
        self.store.rating_runs_for_scenario(scenario_id)
    }

    /// Earlier runs of a logically identical request (duplicate or retried
    /// submissions).
    pub fn runs_for_input(&self, request: &RatingRequest) -> RatingResult<Vec<RatingRun>> {
        self.store.rating_runs_for_input_hash(&input_hash(request)?)
    }
}
