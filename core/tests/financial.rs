//! Financial-attribute join tests.

use chrono::NaiveDate;
use std::fs;
use zombie_core::{
    category::InstitutionCategory,
    complaint::ComplaintRecord,
    event::BuildEvent,
    financial::{
        join_financials, parse_bank_call_report, parse_holding_company_report, FinancialIndex, FinancialReport,
        InstitutionKind, MatchTier,
    },
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn report(kind: InstitutionKind, id: Option<&str>, name: &str, quarter_end: NaiveDate, assets: Option<f64>) -> FinancialReport {
    FinancialReport {
        kind,
        identifier: id.map(str::to_string),
        institution_name: Some(name.to_string()),
        quarter_end,
        total_assets: assets,
    }
}

fn complaint(name: &str, id: Option<&str>, category: Option<InstitutionCategory>) -> ComplaintRecord {
    let mut r = ComplaintRecord::new(name, date(2021, 5, 3), date(2021, 5, 3));
    r.resolved_identifier = id.map(str::to_string);
    r.institution_category = category;
    r
}

#[test]
fn first_kind_with_a_value_claims_the_record() {
    let q2 = date(2021, 6, 30);
    let banks = FinancialIndex::build(
        InstitutionKind::Bank,
        &[report(InstitutionKind::Bank, Some("1"), "ACME", q2, Some(100.0))],
    );
    let unions = FinancialIndex::build(
        InstitutionKind::CreditUnion,
        &[report(InstitutionKind::CreditUnion, Some("1"), "ACME", q2, Some(200.0))],
    );

    let mut records = vec![complaint("ACME", Some("1"), Some(InstitutionCategory::Bank))];
    let mut events = Vec::new();
    let stats = join_financials(&mut records, &[banks, unions], &mut events);

    let m = records[0].financial.as_ref().unwrap();
    assert_eq!(m.kind, InstitutionKind::Bank);
    assert_eq!(m.total_assets, Some(100.0));
    assert_eq!(stats[0].1.matched_by_id, 1);
    assert_eq!(stats[1].1.attempted, 0, "credit-union path must not see a valued record");
    assert_eq!(events.iter().filter(|e| matches!(e, BuildEvent::MatchRate { .. })).count(), 2);
}

#[test]
fn unvalued_match_stays_in_the_residual_population() {
    let q2 = date(2021, 6, 30);
    let banks = FinancialIndex::build(
        InstitutionKind::Bank,
        &[report(InstitutionKind::Bank, Some("1"), "ACME", q2, None)],
    );
    let unions = FinancialIndex::build(
        InstitutionKind::CreditUnion,
        &[report(InstitutionKind::CreditUnion, Some("1"), "ACME", q2, Some(200.0))],
    );
    let mut records = vec![complaint("ACME", Some("1"), None)];
    join_financials(&mut records, &[banks, unions], &mut Vec::new());

    let m = records[0].financial.as_ref().unwrap();
    assert_eq!(m.kind, InstitutionKind::CreditUnion);
    assert_eq!(m.total_assets, Some(200.0));
    assert_eq!(records[0].institution_category, Some(InstitutionCategory::CreditUnion));
}

#[test]
fn ambiguous_names_are_never_name_matched() {
    let q2 = date(2021, 6, 30);
    let banks = FinancialIndex::build(
        InstitutionKind::Bank,
        &[
            report(InstitutionKind::Bank, Some("21"), "FIRST BANK", q2, Some(1.0)),
            report(InstitutionKind::Bank, Some("22"), "FIRST BANK", q2, Some(2.0)),
            report(InstitutionKind::Bank, Some("9"), "SOLO BANK", q2, Some(9.0)),
        ],
    );
    assert_eq!(banks.ambiguous_pairs(), 1);

    let mut records = vec![complaint("FIRST BANK", None, None), complaint("SOLO BANK", None, None)];
    let mut events = Vec::new();
    let stats = join_financials(&mut records, &[banks], &mut events);

    assert!(records[0].financial.is_none());
    assert!(records[0].resolved_identifier.is_none());

    let m = records[1].financial.as_ref().unwrap();
    assert_eq!(m.tier, MatchTier::Name);
    assert_eq!(records[1].resolved_identifier.as_deref(), Some("9"));
    assert_eq!(records[1].institution_category, Some(InstitutionCategory::Bank));
    assert_eq!(stats[0].1.matched_by_name, 1);
    assert!(events.contains(&BuildEvent::AmbiguousNames { kind: InstitutionKind::Bank, pairs: 1 }));
}

#[test]
fn report_kind_overrides_registry_category() {
    let q2 = date(2021, 6, 30);
    let banks = FinancialIndex::build(
        InstitutionKind::Bank,
        &[report(InstitutionKind::Bank, Some("3"), "ODD TRUST", q2, Some(5.0))],
    );
    let mut records = vec![
        complaint("ODD TRUST", Some("3"), Some(InstitutionCategory::Others)),
        complaint("ODD TRUST", Some("3"), Some(InstitutionCategory::MajorCreditBureau)),
    ];
    join_financials(&mut records, &[banks], &mut Vec::new());

    assert_eq!(records[0].institution_category, Some(InstitutionCategory::Bank));
    assert!(records[1].financial.is_none(), "name-list overrides are not matched");
    assert_eq!(records[1].institution_category, Some(InstitutionCategory::MajorCreditBureau));
}

#[test]
fn call_report_prefers_consolidated_and_scales_thousands() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Call Reports RC 06302021.txt");
    fs::write(
        &path,
        "IDRSSD\tFinancial Institution Name\tRCFD2170\tRCON2170\n\
         \t\tTOTAL ASSETS\tTOTAL ASSETS\n\
         1\tAcme  National Bank\t5,000\t4000\n\
         2\tDomestic Bank\t\t700\n",
    )
    .unwrap();

    let (rows, unparsed) = parse_bank_call_report(&path).unwrap();
    assert_eq!(unparsed, 1);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].quarter_end, date(2021, 6, 30));
    assert_eq!(rows[0].institution_name.as_deref(), Some("ACME NATIONAL BANK"));
    assert_eq!(rows[0].total_assets, Some(5_000_000.0));
    assert_eq!(rows[1].total_assets, Some(700_000.0));
}

#[test]
fn holding_company_report_falls_back_to_parent_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("BHCF20210630.txt");
    fs::write(
        &path,
        "RSSD9001^RSSD9999^RSSD9017^BHCK2170^BHCP2170\n\
         100^20210630^ACME HOLDINGS^12000^\n\
         200^20210630^SMALL HOLDINGS^^300\n",
    )
    .unwrap();

    let (rows, unparsed) = parse_holding_company_report(&path).unwrap();
    assert_eq!(unparsed, 0);
    assert_eq!(rows[0].total_assets, Some(12_000_000.0));
    assert_eq!(rows[1].total_assets, Some(300_000.0));
    assert_eq!(rows[1].quarter_end, date(2021, 6, 30));
}
