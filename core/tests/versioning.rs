//! Table versioning: resolution, cloning, freezing and deletion.

mod common;

use chrono::NaiveDate;
use common::{d, new_table, open_service, seed_ltd_table, standard_request, PRODUCT};
use rating_core::{
    clone::clone_table,
    error::RatingError,
    model::{ApplyMode, FeeType, RateFactor, RateFee, RateRider, RateTableEntry, TableUpdate},
    store::TableQuery,
};
use std::collections::BTreeMap;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[test]
fn clone_names_skip_taken_versions() {
    let (_dir, mut service) = open_service();
    let v1 = seed_ltd_table(service.store_mut(), "v1");

    let first = clone_table(service.store_mut(), v1.id).unwrap();
    let second = clone_table(service.store_mut(), v1.id).unwrap();
    let third = clone_table(service.store_mut(), v1.id).unwrap();

    assert_eq!(first.version, "v1-copy");
    assert_eq!(second.version, "v1-copy-1");
    assert_eq!(third.version, "v1-copy-2");

    let versions: Vec<_> = service
        .store()
        .list_tables(PRODUCT)
        .unwrap()
        .into_iter()
        .map(|t| t.version)
        .collect();
    assert_eq!(versions, vec!["v1-copy-2", "v1-copy-1", "v1-copy", "v1"]);
}

#[test]
fn clone_copies_every_collection_and_starts_inactive() {
    let (_dir, mut service) = open_service();
    let v1 = seed_ltd_table(service.store_mut(), "v1");

    let copy = clone_table(service.store_mut(), v1.id).unwrap();
    assert!(!copy.is_active);
    assert_eq!(copy.name, v1.name);
    assert_eq!(copy.metadata["cloned_from"]["table_id"], v1.id);
    assert_eq!(copy.metadata["cloned_from"]["version"], "v1");
    assert_eq!(copy.metadata["rate_key_dimensions"], v1.metadata["rate_key_dimensions"]);

    let source = service.store().load_rules(v1.id).unwrap();
    let cloned = service.store().load_rules(copy.id).unwrap();
    assert_eq!(source.entries, cloned.entries);
    assert_eq!(source.factors, cloned.factors);
    assert_eq!(source.riders, cloned.riders);
    assert_eq!(source.fees, cloned.fees);
    assert_eq!(source.modal_factors, cloned.modal_factors);
}

#[test]
fn editing_a_clone_leaves_the_source_untouched() {
    let (_dir, mut service) = open_service();
    let v1 = seed_ltd_table(service.store_mut(), "v1");
    let copy = clone_table(service.store_mut(), v1.id).unwrap();

    service
        .store_mut()
        .upsert_entry(
            copy.id,
            &RateTableEntry { rate_key: "standard".into(), rate_value: d("140"), dimensions: BTreeMap::new() },
        )
        .unwrap();

    let source_entries = service.store().entries(v1.id).unwrap();
    let standard = source_entries.iter().find(|e| e.rate_key == "standard").unwrap();
    assert_eq!(standard.rate_value, d("100"));

    // Rating still goes to v1: the clone is inactive.
    let quote = service.rate(&standard_request(), None).unwrap();
    assert_eq!(quote.outcome.rate_table_version, "v1");
    assert_eq!(quote.outcome.annual_premium, Some(d("115.00")));

    // Pinning the clone's version rates against it regardless of the flag.
    let mut pinned = standard_request();
    pinned.rate_table_version = Some("v1-copy".into());
    let quote = service.rate(&pinned, None).unwrap();
    assert_eq!(quote.outcome.rate_table_id, copy.id);
    assert_eq!(quote.outcome.annual_premium, Some(d("151.00")));
}

#[test]
fn clone_and_source_do_not_share_rule_rows() {
    let (_dir, mut service) = open_service();
    let v1 = seed_ltd_table(service.store_mut(), "v1");
    let copy = clone_table(service.store_mut(), v1.id).unwrap();

    let copy_factors = service.store().factors(copy.id).unwrap();
    let copy_riders = service.store().riders(copy.id).unwrap();
    let copy_fees = service.store().fees(copy.id).unwrap();
    assert_eq!(copy_factors, service.store().factors(v1.id).unwrap());
    assert_eq!(copy_riders, service.store().riders(v1.id).unwrap());
    assert_eq!(copy_fees, service.store().fees(v1.id).unwrap());

    // Source edits (v1 has no runs yet, so it is still editable).
    let store = service.store_mut();
    store
        .upsert_factor(
            v1.id,
            &RateFactor {
                factor_code:  "occupation_class".into(),
                option_value: "4A".into(),
                label:        None,
                apply_mode:   ApplyMode::Multiply,
                factor_value: d("1.5"),
                sort_order:   1,
            },
        )
        .unwrap();
    store
        .upsert_rider(
            v1.id,
            &RateRider {
                rider_code:       "cola".into(),
                label:            None,
                apply_mode:       ApplyMode::Add,
                rider_value:      d("30"),
                is_default:       true,
                rate_key_pattern: None,
                sort_order:       1,
            },
        )
        .unwrap();
    store
        .upsert_fee(
            v1.id,
            &RateFee {
                fee_code:   "policy_fee".into(),
                label:      None,
                fee_type:   FeeType::Fee,
                apply_mode: ApplyMode::Add,
                fee_value:  d("40"),
                sort_order: 1,
            },
        )
        .unwrap();

    assert_eq!(service.store().factors(copy.id).unwrap(), copy_factors);
    assert_eq!(service.store().riders(copy.id).unwrap(), copy_riders);
    assert_eq!(service.store().fees(copy.id).unwrap(), copy_fees);

    // Clone edits stay out of the source.
    service
        .store_mut()
        .upsert_fee(
            copy.id,
            &RateFee {
                fee_code:   "policy_fee".into(),
                label:      None,
                fee_type:   FeeType::Fee,
                apply_mode: ApplyMode::Add,
                fee_value:  d("10"),
                sort_order: 1,
            },
        )
        .unwrap();
    let source_fees = service.store().fees(v1.id).unwrap();
    assert_eq!(source_fees.len(), 1);
    assert_eq!(source_fees[0].fee_value, d("40"));
    let copy_fees_now = service.store().fees(copy.id).unwrap();
    assert_eq!(copy_fees_now[0].fee_value, d("10"));
}

#[test]
fn duplicate_version_is_rejected() {
    let (_dir, mut service) = open_service();
    service.store_mut().create_table(&new_table("v1", true)).unwrap();
    let err = service
        .store_mut()
        .create_table(&new_table("v1", false))
        .unwrap_err();
    assert!(matches!(err, RatingError::DuplicateVersion { .. }), "{err}");
}

#[test]
fn resolution_prefers_most_recently_effective_active_table() {
    let (_dir, mut service) = open_service();
    let store = service.store_mut();

    let mut old = new_table("2025.1", true);
    old.effective_date = Some(date("2025-01-01"));
    let old = store.create_table(&old).unwrap();

    let mut current = new_table("2026.1", true);
    current.effective_date = Some(date("2026-01-01"));
    let current = store.create_table(&current).unwrap();

    let mut future = new_table("2027.1", true);
    future.effective_date = Some(date("2027-01-01"));
    store.create_table(&future).unwrap();

    let mut retired = new_table("2026.2", false);
    retired.effective_date = Some(date("2026-06-01"));
    store.create_table(&retired).unwrap();

    let store = service.store();
    let mut query = TableQuery::new(PRODUCT);

    query.as_of = date("2026-07-01");
    assert_eq!(store.resolve_active_table(&query).unwrap().id, current.id);

    query.as_of = date("2025-07-01");
    assert_eq!(store.resolve_active_table(&query).unwrap().id, old.id);

    query.as_of = date("2024-07-01");
    let err = store.resolve_active_table(&query).unwrap_err();
    assert!(matches!(err, RatingError::NoActiveTable { .. }));

    // Explicit version ignores the active flag.
    query.version = Some("2026.2");
    assert_eq!(store.resolve_active_table(&query).unwrap().version, "2026.2");
}

#[test]
fn expired_tables_do_not_resolve() {
    let (_dir, mut service) = open_service();
    let mut t = new_table("v1", true);
    t.effective_date = Some(date("2025-01-01"));
    t.expiration_date = Some(date("2026-01-01"));
    service.store_mut().create_table(&t).unwrap();

    let mut query = TableQuery::new(PRODUCT);
    query.as_of = date("2025-12-31");
    assert!(service.store().resolve_active_table(&query).is_ok());
    query.as_of = date("2026-01-01");
    assert!(service.store().resolve_active_table(&query).is_err());
}

#[test]
fn carrier_filter_is_strict() {
    let (_dir, mut service) = open_service();
    let mut acme = new_table("acme-1", true);
    acme.carrier_id = Some("acme".into());
    let acme = service.store_mut().create_table(&acme).unwrap();
    let generic = service.store_mut().create_table(&new_table("generic-1", true)).unwrap();

    let mut query = TableQuery::new(PRODUCT);
    query.carrier_id = Some("acme");
    assert_eq!(service.store().resolve_active_table(&query).unwrap().id, acme.id);

    query.carrier_id = Some("globex");
    let err = service.store().resolve_active_table(&query).unwrap_err();
    assert!(err.to_string().contains("globex"));

    // Without a carrier the newest active table wins.
    query.carrier_id = None;
    assert_eq!(service.store().resolve_active_table(&query).unwrap().id, generic.id);
}

#[test]
fn referenced_table_is_frozen_but_can_be_retired() {
    let (_dir, mut service) = open_service();
    let v1 = seed_ltd_table(service.store_mut(), "v1");
    assert!(!service.store().is_frozen(v1.id).unwrap());

    service.rate(&standard_request(), None).unwrap();
    assert!(service.store().is_frozen(v1.id).unwrap());

    let err = service
        .store_mut()
        .update_table(v1.id, &TableUpdate { name: Some("renamed".into()), ..TableUpdate::default() })
        .unwrap_err();
    assert!(matches!(err, RatingError::TableFrozen { .. }));

    let err = service.store_mut().delete_table(v1.id).unwrap_err();
    assert!(matches!(err, RatingError::TableInUse { .. }));

    let before = service.store().get_table(v1.id).unwrap().revision;
    let retired = service.store_mut().set_active(v1.id, false).unwrap();
    assert!(!retired.is_active);
    assert_eq!(retired.revision, before + 1);

    // The frozen table can still seed its successor.
    let next = clone_table(service.store_mut(), v1.id).unwrap();
    service.store_mut().set_active(next.id, true).unwrap();
    let quote = service.rate(&standard_request(), None).unwrap();
    assert_eq!(quote.outcome.rate_table_version, "v1-copy");
}

#[test]
fn deleting_an_unreferenced_table_cascades() {
    let (_dir, mut service) = open_service();
    let v1 = seed_ltd_table(service.store_mut(), "v1");
    assert!(!service.store().entries(v1.id).unwrap().is_empty());

    service.store_mut().delete_table(v1.id).unwrap();
    assert!(matches!(
        service.store().get_table(v1.id).unwrap_err(),
        RatingError::TableNotFound { .. }
    ));
    assert!(service.store().entries(v1.id).unwrap().is_empty());
    assert!(service.store().factors(v1.id).unwrap().is_empty());
    assert!(service.store().riders(v1.id).unwrap().is_empty());
    assert!(service.store().fees(v1.id).unwrap().is_empty());
    assert!(service.store().modal_factors(v1.id).unwrap().is_empty());
}

#[test]
fn every_write_bumps_the_revision() {
    let (_dir, mut service) = open_service();
    let table = service.store_mut().create_table(&new_table("v1", false)).unwrap();
    assert_eq!(table.revision, 0);

    let updated = service
        .store_mut()
        .update_table(
            table.id,
            &TableUpdate {
                effective_date: Some(date("2026-03-01")),
                ..TableUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(updated.revision, 1);
    assert_eq!(updated.effective_date, Some(date("2026-03-01")));
    assert_eq!(updated.name, table.name);

    let activated = service.store_mut().set_active(table.id, true).unwrap();
    assert_eq!(activated.revision, 2);
}
