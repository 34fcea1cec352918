//! Asset reconciliation, imputation and quarter-lag tests.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use zombie_core::{
    category::InstitutionCategory,
    complaint::ComplaintRecord,
    event::{AssetSource, BuildEvent},
    financial::{FinancialIndex, FinancialMatch, FinancialReport, InstitutionKind, MatchTier},
    hierarchy::SubsidiaryAggregate,
    quarter::{lag_quarter_end, Quarter, QuarterGrid},
    reconcile::{assign_total_assets, reconcile_holding_company, AssetPanel, AssetPanels},
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn q(s: &str) -> Quarter {
    s.parse().unwrap()
}

fn grid() -> QuarterGrid {
    QuarterGrid::new(q("2019Q1"), q("2022Q4")).unwrap()
}

fn report(kind: InstitutionKind, id: &str, quarter_end: NaiveDate, assets: Option<f64>) -> FinancialReport {
    FinancialReport {
        kind,
        identifier: Some(id.to_string()),
        institution_name: None,
        quarter_end,
        total_assets: assets,
    }
}

fn matched(kind: InstitutionKind, id: &str, sent: NaiveDate) -> ComplaintRecord {
    let mut r = ComplaintRecord::new("FIXTURE", sent, sent);
    r.resolved_identifier = Some(id.to_string());
    r.institution_category = Some(kind.category());
    r.financial = Some(FinancialMatch {
        kind,
        tier: MatchTier::Identifier,
        identifier: Some(id.to_string()),
        total_assets: None,
    });
    r
}

fn subsidiaries(parent: &str, quarter: &str, sum: Option<f64>) -> BTreeMap<(String, Quarter), SubsidiaryAggregate> {
    BTreeMap::from([(
        (parent.to_string(), q(quarter)),
        SubsidiaryAggregate { with_assets: usize::from(sum.is_some()), bank_assets: sum, subsidiary_count: 1 },
    )])
}

#[test]
fn low_subsidiary_ratio_keeps_reported_total() {
    let choice = reconcile_holding_company(Some(1000.0), Some(250.0), 0.3);
    assert_eq!(choice.value, Some(1000.0));
    assert_eq!(choice.source, AssetSource::ReportedTotal);
    assert_eq!(choice.ratio, Some(0.25));

    let choice = reconcile_holding_company(Some(1000.0), Some(500.0), 0.3);
    assert_eq!(choice.value, Some(500.0));
    assert_eq!(choice.source, AssetSource::SubsidiarySum);
}

#[test]
fn one_sided_reconciliation_keeps_what_exists() {
    assert_eq!(reconcile_holding_company(None, Some(7.0), 0.3).value, Some(7.0));
    assert_eq!(reconcile_holding_company(Some(9.0), None, 0.3).value, Some(9.0));
    let none = reconcile_holding_company(None, None, 0.3);
    assert_eq!(none.value, None);
    assert_eq!(none.source, AssetSource::Missing);
}

#[test]
fn threshold_is_configurable() {
    assert_eq!(reconcile_holding_company(Some(1000.0), Some(250.0), 0.2).value, Some(250.0));
}

#[test]
fn first_path_with_a_value_wins() {
    let banks = FinancialIndex::build(
        InstitutionKind::Bank,
        &[
            report(InstitutionKind::Bank, "7", date(2020, 12, 31), Some(65.0)),
            report(InstitutionKind::Bank, "7", date(2021, 3, 31), Some(70.0)),
        ],
    );
    let holding = FinancialIndex::build(
        InstitutionKind::HoldingCompany,
        &[
            report(InstitutionKind::HoldingCompany, "7", date(2021, 3, 31), Some(700.0)),
            report(InstitutionKind::HoldingCompany, "7", date(2021, 9, 30), Some(900.0)),
        ],
    );
    let panels = AssetPanels::build(grid(), &[banks, holding], &BTreeMap::new(), 0.3, false);

    let registry_bank = |sent: NaiveDate| {
        let mut r = ComplaintRecord::new("DUAL FILER", sent, sent);
        r.resolved_identifier = Some("7".to_string());
        r.institution_category = Some(InstitutionCategory::Bank);
        r
    };
    let mut records = vec![
        registry_bank(date(2021, 2, 1)),
        registry_bank(date(2021, 8, 1)),
        matched(InstitutionKind::HoldingCompany, "7", date(2021, 2, 1)),
    ];
    assign_total_assets(&mut records, &panels, &mut Vec::new());

    // Bank path first.
    assert_eq!(records[0].total_assets, Some(70.0));
    assert_eq!(records[0].lagged_total_assets, Some(65.0));
    // No bank value in 2021Q3: falls through to the holding-company path,
    // and the lag follows it.
    assert_eq!(records[1].total_assets, Some(900.0));
    assert_eq!(records[1].lagged_total_assets, None);
    // A report match pins the record to the matched kind.
    assert_eq!(records[2].total_assets, Some(700.0));
}

#[test]
fn lag_crosses_year_boundary() {
    assert_eq!(lag_quarter_end(date(2021, 3, 31)), date(2020, 12, 31));
    assert_eq!(lag_quarter_end(date(2021, 6, 30)), date(2021, 3, 31));
    assert_eq!(q("2021Q1").prev(), q("2020Q4"));
}

#[test]
fn imputation_fills_gaps_only_when_enabled() {
    let obs = vec![("1", q("2020Q1"), Some(10.0)), ("1", q("2020Q3"), Some(30.0))];
    let filled = AssetPanel::from_observations(grid(), obs.clone(), true);
    assert_eq!(filled.value("1", q("2020Q2")), Some(10.0));
    assert_eq!(filled.value("1", q("2019Q1")), Some(10.0));
    assert_eq!(filled.value("1", q("2022Q4")), Some(30.0));

    let raw = AssetPanel::from_observations(grid(), obs, false);
    assert_eq!(raw.value("1", q("2020Q2")), None);
    assert_eq!(raw.value("1", q("2020Q3")), Some(30.0));
}

#[test]
fn total_and_lag_come_from_the_same_path() {
    let banks = FinancialIndex::build(
        InstitutionKind::Bank,
        &[
            report(InstitutionKind::Bank, "1", date(2020, 12, 31), Some(50.0)),
            report(InstitutionKind::Bank, "1", date(2021, 3, 31), Some(60.0)),
        ],
    );
    let panels = AssetPanels::build(grid(), &[banks], &BTreeMap::new(), 0.3, false);
    let mut records = vec![matched(InstitutionKind::Bank, "1", date(2021, 2, 1))];
    assign_total_assets(&mut records, &panels, &mut Vec::new());

    assert_eq!(records[0].total_assets, Some(60.0));
    assert_eq!(records[0].lagged_total_assets, Some(50.0));
}

#[test]
fn holding_company_total_is_reconciled_and_audited() {
    let holding = FinancialIndex::build(
        InstitutionKind::HoldingCompany,
        &[report(InstitutionKind::HoldingCompany, "100", date(2020, 3, 31), Some(1000.0))],
    );
    let mut events = Vec::new();

    let panels = AssetPanels::build(grid(), &[holding.clone()], &subsidiaries("100", "2020Q1", Some(250.0)), 0.3, false);
    let mut records = vec![
        matched(InstitutionKind::HoldingCompany, "100", date(2020, 2, 15)),
        matched(InstitutionKind::HoldingCompany, "100", date(2020, 3, 1)),
    ];
    assign_total_assets(&mut records, &panels, &mut events);
    assert_eq!(records[0].total_assets, Some(1000.0));

    let audits: Vec<&BuildEvent> = events
        .iter()
        .filter(|e| matches!(e, BuildEvent::AssetsReconciled { .. }))
        .collect();
    assert_eq!(audits.len(), 1, "one audit per parent-quarter");
    assert!(matches!(
        audits[0],
        BuildEvent::AssetsReconciled { chosen: AssetSource::ReportedTotal, .. }
    ));

    let panels = AssetPanels::build(grid(), &[holding], &subsidiaries("100", "2020Q1", Some(500.0)), 0.3, false);
    let mut records = vec![matched(InstitutionKind::HoldingCompany, "100", date(2020, 2, 15))];
    assign_total_assets(&mut records, &panels, &mut Vec::new());
    assert_eq!(records[0].total_assets, Some(500.0));
}

#[test]
fn unmatched_holding_company_uses_subsidiary_sum() {
    let panels = AssetPanels::build(
        grid(),
        &[FinancialIndex::build(InstitutionKind::HoldingCompany, &[])],
        &subsidiaries("100", "2020Q1", Some(400.0)),
        0.3,
        false,
    );
    let mut record = ComplaintRecord::new("ACME HOLDINGS", date(2020, 2, 15), date(2020, 2, 15));
    record.resolved_identifier = Some("100".to_string());
    record.institution_category = Some(InstitutionCategory::HoldingCompany);
    let mut records = vec![record];
    assign_total_assets(&mut records, &panels, &mut Vec::new());
    assert_eq!(records[0].total_assets, Some(400.0));
}

#[test]
fn unmatched_records_stay_missing() {
    let panels = AssetPanels::build(grid(), &[], &BTreeMap::new(), 0.3, true);
    let mut records = vec![ComplaintRecord::new("NOBODY LLC", date(2020, 2, 15), date(2020, 2, 15))];
    assign_total_assets(&mut records, &panels, &mut Vec::new());
    assert_eq!(records[0].total_assets, None);
    assert_eq!(records[0].lagged_total_assets, None);
}
