//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use rating_core::{
    config::RatingConfig,
    model::{
        ApplyMode, FeeType, NewRateTable, PaymentMode, RateFactor, RateFee, RateModalFactor,
        RateRider, RateTable, RateTableEntry,
    },
    request::RatingRequest,
    service::RatingService,
    store::RateStore,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;

pub const PRODUCT: &str = "disability_ltd";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn d(s: &str) -> Decimal {
    s.parse().expect("decimal literal")
}

/// A service over a fresh database file. Keep the `TempDir` alive for
/// as long as the service is used.
pub fn open_service() -> (TempDir, RatingService) {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("rating.db");
    let service = RatingService::open(
        path.to_str().expect("utf-8 temp path"),
        RatingConfig::default_test(),
    )
    .expect("open service");
    (dir, service)
}

pub fn db_path(dir: &TempDir) -> String {
    dir.path().join("rating.db").to_string_lossy().into_owned()
}

pub fn new_table(version: &str, active: bool) -> NewRateTable {
    NewRateTable {
        product_type:    PRODUCT.into(),
        version:         version.into(),
        name:            format!("LTD base rates {version}"),
        carrier_id:      None,
        effective_date:  None,
        expiration_date: None,
        is_active:       active,
        metadata:        json!({
            "rate_key_dimensions": ["underwriting_class"],
            "eligibility": {
                "monthly_benefit": { "min": "500", "max": "10000" },
                "elimination_periods": [30, 90, 180]
            }
        }),
    }
}

/// Active table `version` with:
///   entries    standard=100, preferred=80
///   factors    occupation_class 1A x0.9, 4A x1.2; smoker yes +15
///   riders     cola +12, waiver x1.05 (default, preferred keys only)
///   fees       policy_fee +25
///   modal      annual 1, semiannual 1.02, quarterly 1.03, monthly 1 + 2 flat
pub fn seed_ltd_table(store: &mut RateStore, version: &str) -> RateTable {
    let table = store
        .create_table(&new_table(version, true))
        .expect("create table");
    let id = table.id;

    for (key, value) in [("standard", "100"), ("preferred", "80")] {
        store
            .upsert_entry(
                id,
                &RateTableEntry {
                    rate_key:   key.into(),
                    rate_value: d(value),
                    dimensions: BTreeMap::new(),
                },
            )
            .expect("entry");
    }

    for (code, option, mode, value, order) in [
        ("occupation_class", "1A", ApplyMode::Multiply, "0.9", 1),
        ("occupation_class", "4A", ApplyMode::Multiply, "1.2", 1),
        ("smoker", "yes", ApplyMode::Add, "15", 2),
    ] {
        store
            .upsert_factor(
                id,
                &RateFactor {
                    factor_code:  code.into(),
                    option_value: option.into(),
                    label:        None,
                    apply_mode:   mode,
                    factor_value: d(value),
                    sort_order:   order,
                },
            )
            .expect("factor");
    }

    store
        .upsert_rider(
            id,
            &RateRider {
                rider_code:       "cola".into(),
                label:            Some("Cost of living adjustment".into()),
                apply_mode:       ApplyMode::Add,
                rider_value:      d("12"),
                is_default:       false,
                rate_key_pattern: None,
                sort_order:       1,
            },
        )
        .expect("rider");
    store
        .upsert_rider(
            id,
            &RateRider {
                rider_code:       "waiver".into(),
                label:            None,
                apply_mode:       ApplyMode::Multiply,
                rider_value:      d("1.05"),
                is_default:       true,
                rate_key_pattern: Some("preferred*".into()),
                sort_order:       2,
            },
        )
        .expect("rider");

    store
        .upsert_fee(
            id,
            &RateFee {
                fee_code:   "policy_fee".into(),
                label:      None,
                fee_type:   FeeType::Fee,
                apply_mode: ApplyMode::Add,
                fee_value:  d("25"),
                sort_order: 1,
            },
        )
        .expect("fee");

    for (mode, factor, flat) in [
        (PaymentMode::Annual, "1", "0"),
        (PaymentMode::Semiannual, "1.02", "0"),
        (PaymentMode::Quarterly, "1.03", "0"),
        (PaymentMode::Monthly, "1", "2"),
    ] {
        store
            .upsert_modal_factor(
                id,
                &RateModalFactor { mode, factor: d(factor), flat_fee: d(flat) },
            )
            .expect("modal factor");
    }

    store.get_table(id).expect("reload table")
}

/// Standard-class, 1A applicant asking for a 5000 monthly benefit.
pub fn standard_request() -> RatingRequest {
    let mut req = RatingRequest::new(PRODUCT);
    req.scenario_id = Some("scn-1".into());
    req.payment_mode = PaymentMode::Monthly;
    req.overrides.underwriting_class = Some("standard".into());
    req.overrides.occupation_class = Some("1A".into());
    req.overrides.monthly_benefit_requested = Some(d("5000"));
    req.overrides.elimination_period_days = Some(90);
    req
}
