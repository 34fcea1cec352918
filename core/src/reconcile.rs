//! Imputation & Reconciliation Layer.
//!
//! Builds one quarterly asset panel per institution kind, fills gaps in
//! each entity's series from its nearest observed quarter, reconciles
//! holding-company totals against their bank-subsidiary sums, and writes
//! exactly one `total_assets` (plus its prior-quarter lag) per complaint.

use crate::{
    category::InstitutionCategory,
    complaint::ComplaintRecord,
    event::{AssetSource, BuildEvent, Stage},
    financial::{FinancialIndex, InstitutionKind},
    hierarchy::SubsidiaryAggregate,
    identity::fill_nearest,
    quarter::{Quarter, QuarterGrid},
    types::Rssd,
};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    pub value: Option<f64>,
    pub source: AssetSource,
    /// `subsidiary_sum / reported_total`, when both exist and the total is non-zero.
    pub ratio: Option<f64>,
}

/// Choose between a holding company's reported total and its
/// bank-subsidiary sum.
///
/// With both present, a ratio below `threshold` marks the subsidiary sum as
/// incomplete and the reported total is kept; otherwise the subsidiary sum
/// is kept. With one present, that one is kept.
pub fn reconcile_holding_company(reported: Option<f64>, subsidiary_sum: Option<f64>, threshold: f64) -> Reconciliation {
    match (reported, subsidiary_sum) {
        (Some(total), Some(sum)) => {
            let ratio = (total != 0.0).then(|| sum / total);
            let source = match ratio {
                Some(r) if r < threshold => AssetSource::ReportedTotal,
                _ => AssetSource::SubsidiarySum,
            };
            let value = if source == AssetSource::ReportedTotal { total } else { sum };
            Reconciliation { value: Some(value), source, ratio }
        }
        (Some(total), None) => Reconciliation { value: Some(total), source: AssetSource::ReportedTotal, ratio: None },
        (None, Some(sum)) => Reconciliation { value: Some(sum), source: AssetSource::SubsidiarySum, ratio: None },
        (None, None) => Reconciliation { value: None, source: AssetSource::Missing, ratio: None },
    }
}

/// Per-entity quarterly series over a grid.
#[derive(Debug, Clone)]
pub struct AssetPanel {
    grid: QuarterGrid,
    series: HashMap<Rssd, Vec<Option<f64>>>,
}

impl AssetPanel {
    /// Lay `(identifier, quarter, value)` observations over `grid`; the
    /// first non-missing observation per slot wins. With `impute`, each
    /// series is forward- then backward-filled.
    pub fn from_observations<'a>(
        grid: QuarterGrid,
        observations: impl IntoIterator<Item = (&'a str, Quarter, Option<f64>)>,
        impute: bool,
    ) -> Self {
        let mut series: HashMap<Rssd, Vec<Option<f64>>> = HashMap::new();
        for (id, quarter, value) in observations {
            let Some(idx) = grid.index_of(quarter) else { continue };
            let slots = series.entry(id.to_string()).or_insert_with(|| vec![None; grid.len()]);
            if slots[idx].is_none() {
                slots[idx] = value;
            }
        }
        if impute {
            series.values_mut().for_each(|s| fill_nearest(s));
        }
        Self { grid, series }
    }

    pub fn value(&self, identifier: &str, quarter: Quarter) -> Option<f64> {
        let idx = self.grid.index_of(quarter)?;
        *self.series.get(identifier)?.get(idx)?
    }

    pub fn entity_count(&self) -> usize {
        self.series.len()
    }
}

/// The three kind panels plus the holding-company reconciliation choices.
#[derive(Debug, Clone)]
pub struct AssetPanels {
    panels: HashMap<InstitutionKind, AssetPanel>,
    holding_choices: HashMap<(Rssd, Quarter), (Option<f64>, Option<f64>, Reconciliation)>,
}

impl AssetPanels {
    pub fn build(
        grid: QuarterGrid,
        indexes: &[FinancialIndex],
        aggregates: &BTreeMap<(Rssd, Quarter), SubsidiaryAggregate>,
        threshold: f64,
        impute: bool,
    ) -> Self {
        let mut panels = HashMap::new();
        let mut holding_choices = HashMap::new();

        for index in indexes {
            let panel = if index.kind == InstitutionKind::HoldingCompany {
                let mut reported: BTreeMap<(Rssd, Quarter), Option<f64>> = BTreeMap::new();
                for (id, date, value) in index.observations() {
                    let slot = reported.entry((id.to_string(), Quarter::from_date(date))).or_insert(None);
                    if slot.is_none() {
                        *slot = value;
                    }
                }
                for key in aggregates.keys() {
                    reported.entry(key.clone()).or_insert(None);
                }

                let mut reconciled = Vec::with_capacity(reported.len());
                for ((id, quarter), total) in &reported {
                    let sum = aggregates.get(&(id.clone(), *quarter)).and_then(|a| a.bank_assets);
                    let choice = reconcile_holding_company(*total, sum, threshold);
                    holding_choices.insert((id.clone(), *quarter), (*total, sum, choice));
                    reconciled.push((id.as_str(), *quarter, choice.value));
                }
                AssetPanel::from_observations(grid, reconciled, impute)
            } else {
                AssetPanel::from_observations(
                    grid,
                    index.observations().map(|(id, date, v)| (id, Quarter::from_date(date), v)),
                    impute,
                )
            };
            log::debug!("[reconciliation] {} panel: {} entities", index.kind.as_str(), panel.entity_count());
            panels.insert(index.kind, panel);
        }

        Self { panels, holding_choices }
    }

    pub fn value(&self, kind: InstitutionKind, identifier: &str, quarter: Quarter) -> Option<f64> {
        self.panels.get(&kind)?.value(identifier, quarter)
    }
}

/// Identifier a record contributes under `kind`, if it is eligible for
/// that kind's path at all.
///
/// A report match pins the record to the matched kind. A record of a
/// report-filing category without a match at its own quarter is eligible
/// on every path under its registry identifier, so imputed panel values
/// still reach it and [`InstitutionKind::ATTEMPT_ORDER`] decides.
fn path_identifier(record: &ComplaintRecord, kind: InstitutionKind) -> Option<&str> {
    match &record.financial {
        Some(m) if m.kind == kind => m.identifier.as_deref().or(record.resolved_identifier.as_deref()),
        Some(_) => None,
        None if record
            .institution_category
            .is_some_and(InstitutionCategory::files_financial_reports) =>
        {
            record.resolved_identifier.as_deref()
        }
        None => None,
    }
}

/// Assign `total_assets` and `lagged_total_assets` to every record.
pub fn assign_total_assets(records: &mut [ComplaintRecord], panels: &AssetPanels, events: &mut Vec<BuildEvent>) {
    events.push(BuildEvent::StageStarted { stage: Stage::Reconciliation });
    let mut audited: HashSet<(Rssd, Quarter)> = HashSet::new();

    for record in records.iter_mut() {
        let Some(quarter) = record.reporting_quarter else { continue };

        let mut chosen: Option<(InstitutionKind, String, f64)> = None;
        let mut fallback: Option<(InstitutionKind, String)> = None;
        for kind in InstitutionKind::ATTEMPT_ORDER {
            let Some(id) = path_identifier(record, kind) else { continue };
            if fallback.is_none() {
                fallback = Some((kind, id.to_string()));
            }
            if let Some(value) = panels.value(kind, id, quarter) {
                chosen = Some((kind, id.to_string(), value));
                break;
            }
        }

        let lag_source = match &chosen {
            Some((kind, id, _)) => Some((*kind, id.clone())),
            None => fallback,
        };
        record.total_assets = chosen.as_ref().map(|(_, _, v)| *v);
        record.lagged_total_assets = lag_source
            .as_ref()
            .and_then(|(kind, id)| panels.value(*kind, id, quarter.prev()));

        if let Some((InstitutionKind::HoldingCompany, id, _)) = &chosen {
            let key = (id.clone(), quarter);
            if let Some((total, sum, choice)) = panels.holding_choices.get(&key) {
                if total.is_some() && sum.is_some() && audited.insert(key) {
                    log::debug!(
                        "[reconciliation] {id} {quarter}: reported={total:?} subsidiaries={sum:?} ratio={:?} -> {:?}",
                        choice.ratio,
                        choice.source
                    );
                    events.push(BuildEvent::AssetsReconciled {
                        parent: id.clone(),
                        quarter,
                        reported_total: *total,
                        subsidiary_sum: *sum,
                        ratio: choice.ratio,
                        chosen: choice.source,
                    });
                }
            }
        }
    }

    let with_assets = records.iter().filter(|r| r.total_assets.is_some()).count();
    events.push(BuildEvent::row_count(Stage::Reconciliation, "records with total assets", with_assets));
    events.push(BuildEvent::StageCompleted { stage: Stage::Reconciliation, rows: with_assets });
}
