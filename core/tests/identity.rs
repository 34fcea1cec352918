//! Temporal identity resolution tests.

use chrono::NaiveDate;
use std::collections::HashSet;
use zombie_core::{
    category::InstitutionCategory,
    event::BuildEvent,
    identity::{fill_nearest, resolve_identities, TemporalIdentities},
    quarter::{far_future, Quarter, QuarterGrid},
    registry::InstitutionRecord,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn q(s: &str) -> Quarter {
    s.parse().unwrap()
}

fn grid() -> QuarterGrid {
    QuarterGrid::new(q("2010Q1"), q("2025Q2")).unwrap()
}

fn record(
    id: &str,
    name: &str,
    charter: Option<u32>,
    valid_from: NaiveDate,
    valid_until: NaiveDate,
) -> InstitutionRecord {
    InstitutionRecord {
        identifier: id.to_string(),
        legal_name: name.to_string(),
        charter_type_code: charter,
        entity_type_code: None,
        valid_from,
        valid_until,
        city: None,
        state: None,
        source_file: "fixture".to_string(),
    }
}

#[test]
fn conflicting_categories_resolve_to_highest_priority() {
    let window = (date(2020, 1, 1), date(2020, 3, 31));
    for rows in [
        vec![
            record("10", "MIXED TRUST", Some(200), window.0, window.1),
            record("11", "MIXED TRUST", None, window.0, window.1),
        ],
        vec![
            record("11", "MIXED TRUST", None, window.0, window.1),
            record("10", "MIXED TRUST", Some(200), window.0, window.1),
        ],
    ] {
        let identities = TemporalIdentities::resolve(&rows, grid());
        let resolved = identities.lookup("MIXED TRUST", q("2020Q1")).unwrap();
        assert_eq!(resolved.category, InstitutionCategory::Bank);
        assert_eq!(resolved.identifier.as_deref(), Some("10"));
    }
}

#[test]
fn single_identifier_applies_outside_every_window() {
    let rows = vec![
        record("5", "LONE BANK", Some(200), date(2012, 1, 1), date(2012, 12, 31)),
        record("5", "LONE BANK", Some(200), date(2014, 1, 1), date(2014, 6, 30)),
    ];
    let identities = TemporalIdentities::resolve(&rows, grid());
    for quarter in ["2010Q1", "2013Q2", "2020Q1", "2025Q2"] {
        let resolved = identities.lookup("LONE BANK", q(quarter)).unwrap();
        assert_eq!(resolved.identifier.as_deref(), Some("5"), "quarter {quarter}");
        assert_eq!(resolved.category, InstitutionCategory::Bank);
    }
}

#[test]
fn sentinel_rows_do_not_break_the_short_circuit() {
    let rows = vec![
        record("unknown", "SOLO CU", Some(330), date(2011, 1, 1), date(2011, 12, 31)),
        record("7", "SOLO CU", Some(330), date(2018, 1, 1), far_future()),
    ];
    let identities = TemporalIdentities::resolve(&rows, grid());
    let resolved = identities.lookup("SOLO CU", q("2011Q2")).unwrap();
    assert_eq!(resolved.identifier.as_deref(), Some("7"));
    assert_eq!(resolved.category, InstitutionCategory::CreditUnion);
}

#[test]
fn gaps_fill_from_nearest_resolved_quarter() {
    let rows = vec![
        record("1", "TWIN BANK", Some(200), date(2011, 1, 1), date(2012, 12, 31)),
        record("2", "TWIN BANK", None, date(2015, 1, 1), far_future()),
    ];
    let identities = TemporalIdentities::resolve(&rows, grid());

    // Leading gap: backward-filled from 2011Q1.
    assert_eq!(identities.lookup("TWIN BANK", q("2010Q2")).unwrap().identifier.as_deref(), Some("1"));
    // Interior gap: forward-filled from 2012Q4.
    let gap = identities.lookup("TWIN BANK", q("2013Q3")).unwrap();
    assert_eq!(gap.identifier.as_deref(), Some("1"));
    assert_eq!(gap.category, InstitutionCategory::Bank);
    // Second window.
    let later = identities.lookup("TWIN BANK", q("2016Q1")).unwrap();
    assert_eq!(later.identifier.as_deref(), Some("2"));
    assert_eq!(later.category, InstitutionCategory::Others);
}

#[test]
fn one_identity_per_name_and_quarter() {
    let rows = vec![
        record("1", "A BANK", Some(200), date(2010, 1, 1), far_future()),
        record("2", "A BANK", Some(330), date(2010, 1, 1), far_future()),
        record("3", "B HOLDINGS", None, date(2015, 1, 1), date(2019, 12, 31)),
    ];
    let identities = TemporalIdentities::resolve(&rows, grid());
    let out = identities.to_rows();
    let keys: HashSet<(String, Quarter)> = out.iter().map(|r| (r.legal_name.clone(), r.quarter)).collect();
    assert_eq!(keys.len(), out.len());
    assert_eq!(out.len(), 2 * grid().len());
}

#[test]
fn cached_rows_rebuild_the_same_lookup() {
    let rows = vec![
        record("1", "A BANK", Some(200), date(2010, 1, 1), date(2015, 12, 31)),
        record("2", "A BANK", Some(330), date(2016, 1, 1), far_future()),
    ];
    let identities = TemporalIdentities::resolve(&rows, grid());
    let restored = TemporalIdentities::from_rows(&identities.to_rows(), grid());
    for quarter in grid().iter() {
        assert_eq!(identities.lookup("A BANK", quarter), restored.lookup("A BANK", quarter));
    }
    assert_eq!(restored.category_of("2", q("2020Q1")), Some(InstitutionCategory::CreditUnion));
}

#[test]
fn resolved_table_is_cached_until_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache").join("temporal_identity.csv");
    let original = vec![record("1", "A BANK", Some(200), date(2010, 1, 1), far_future())];
    let renumbered = vec![record("9", "A BANK", Some(200), date(2010, 1, 1), far_future())];
    let id_at = |identities: &TemporalIdentities| {
        identities.lookup("A BANK", q("2020Q1")).and_then(|r| r.identifier.clone())
    };

    let mut events = Vec::new();
    let first = resolve_identities(&original, grid(), &cache, false, &mut events).unwrap();
    assert!(cache.exists());
    assert!(!events.iter().any(|e| matches!(e, BuildEvent::CacheHit { .. })));

    let mut events = Vec::new();
    let cached = resolve_identities(&renumbered, grid(), &cache, false, &mut events).unwrap();
    assert_eq!(id_at(&cached), id_at(&first));
    assert_eq!(cached.category_of("1", q("2020Q1")), Some(InstitutionCategory::Bank));
    assert!(events.iter().any(|e| matches!(e, BuildEvent::CacheHit { .. })));

    let rebuilt = resolve_identities(&renumbered, grid(), &cache, true, &mut Vec::new()).unwrap();
    assert_eq!(id_at(&rebuilt), Some("9".to_string()));
}

#[test]
fn fill_is_a_fixed_point() {
    let mut once = vec![None, Some(1), None, None, Some(4), None];
    fill_nearest(&mut once);
    let mut twice = once.clone();
    fill_nearest(&mut twice);
    assert_eq!(once, vec![Some(1), Some(1), Some(1), Some(1), Some(4), Some(4)]);
    assert_eq!(once, twice);

    let mut empty: Vec<Option<u8>> = vec![None, None];
    fill_nearest(&mut empty);
    assert_eq!(empty, vec![None, None]);
}

#[test]
fn renamed_bank_resolves_under_its_new_name() {
    let rows = vec![
        record("1", "ACME BANK", Some(200), date(2015, 1, 1), date(2019, 12, 31)),
        record("1", "ACME NATIONAL BANK", Some(200), date(2020, 1, 1), far_future()),
    ];
    let identities = TemporalIdentities::resolve(&rows, grid());
    let resolved = identities.lookup("ACME NATIONAL BANK", q("2021Q2")).unwrap();
    assert_eq!(resolved.identifier.as_deref(), Some("1"));
    assert_eq!(resolved.category, InstitutionCategory::Bank);
    assert_eq!(identities.category_of("1", q("2021Q2")), Some(InstitutionCategory::Bank));
}
