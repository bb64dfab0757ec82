//! Rating service: wires store, engine and audit recorder together.
//!
//! Control flow for one `rate` call:
//!   resolve table (store) -> load rule snapshot (store)
//!   -> evaluate (engine, pure) -> record run (audit recorder)
//!
//! The recorder runs on its own connection, so every call leaves exactly
//! one rating run behind whether it succeeded, was ineligible or failed.

use crate::{
    audit::{AuditRecorder, Evaluation, RatingRun},
    config::RatingConfig,
    engine::{RatingEngine, RatingOutcome},
    error::RatingResult,
    model::RuleSet,
    request::RatingRequest,
    store::{RateStore, TableQuery},
};
use chrono::Utc;
use std::time::Instant;

/// A rating outcome together with the audit run that recorded it.
#[derive(Debug, Clone)]
pub struct Quote {
    pub outcome: RatingOutcome,
    pub run:     RatingRun,
}

pub struct RatingService {
    store:    RateStore,
    recorder: AuditRecorder,
    engine:   RatingEngine,
    config:   RatingConfig,
}

impl RatingService {
    pub fn new(store: RateStore, recorder: AuditRecorder, config: RatingConfig) -> Self {
        Self {
            engine: RatingEngine::new(&config),
            store,
            recorder,
            config,
        }
    }

    /// Open `path`, migrate, and give the recorder a connection of its own.
    pub fn open(path: &str, config: RatingConfig) -> RatingResult<Self> {
        Self::from_store(RateStore::open(path)?, config)
    }

    /// Migrate `store` and attach a recorder on a second connection to the
    /// same database. A private `:memory:` store would hand the recorder an
    /// empty database; use `RateStore::shared_memory` instead.
    pub fn from_store(store: RateStore, config: RatingConfig) -> RatingResult<Self> {
        store.migrate()?;
        let recorder = AuditRecorder::new(store.reopen()?, config.engine_version.clone());
        Ok(Self::new(store, recorder, config))
    }

    pub fn store(&self) -> &RateStore {
        &self.store
    }

    /// Administrative access (create, import, clone, activate).
    pub fn store_mut(&mut self) -> &mut RateStore {
        &mut self.store
    }

    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Rate one request and record the run.
    ///
    /// Ineligibility comes back as `Ok` with `outcome.eligible == false`.
    /// Table resolution failures and engine faults are recorded with
    /// status `error` and then returned as `Err`.
    pub fn rate(&self, request: &RatingRequest, acting_user_id: Option<&str>) -> RatingResult<Quote> {
        let started = Instant::now();

        let rules = match self.resolve(request) {
            Ok(rules) => rules,
            Err(err) => {
                log::warn!("rating: {} could not resolve a table: {err}", request.product_type);
                self.recorder.record(
                    request,
                    Evaluation::Failed { table: None, error: &err },
                    elapsed_ms(started),
                    acting_user_id,
                )?;
                return Err(err);
            }
        };

        match self.engine.evaluate(request, &rules) {
            Ok(outcome) => {
                let run = self.recorder.record(
                    request,
                    Evaluation::Rated(&outcome),
                    elapsed_ms(started),
                    acting_user_id,
                )?;
                Ok(Quote { outcome, run })
            }
            Err(err) => {
                log::warn!(
                    "rating: engine fault on {} {}: {err}",
                    rules.table.product_type, rules.table.version
                );
                self.recorder.record(
                    request,
                    Evaluation::Failed { table: Some(&rules.table), error: &err },
                    elapsed_ms(started),
                    acting_user_id,
                )?;
                Err(err)
            }
        }
    }

    /// Step 1: pick the table and take a snapshot of its rules.
    pub fn resolve(&self, request: &RatingRequest) -> RatingResult<RuleSet> {
        let query = TableQuery {
            product_type: &request.product_type,
            carrier_id:   request.carrier_id.as_deref(),
            version:      request.rate_table_version.as_deref(),
            as_of:        request.as_of.unwrap_or_else(|| Utc::now().date_naive()),
        };
        let table = self.store.resolve_active_table(&query)?;
        self.store.load_rules(table.id)
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
