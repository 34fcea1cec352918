//! Hierarchical Aggregator.
//!
//! Traces parent-subsidiary ownership over the quarterly grid and sums the
//! reported assets of each holding company's bank subsidiaries. The sum
//! complements the holding company's own reported total; choosing between
//! the two happens in `reconcile`.

use crate::{
    category::InstitutionCategory,
    error::BuildResult,
    event::{BuildEvent, Stage},
    financial::FinancialIndex,
    identity::TemporalIdentities,
    interval::IntervalIndex,
    quarter::{far_future, far_past, parse_loose_date, Quarter, QuarterGrid},
    table::{cell, RawTable},
    types::{normalize_rssd, Rssd},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// One row of the relationship registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub parent: Rssd,
    pub child: Rssd,
    /// 1 = direct ownership, 2 = one level indirect, ...
    pub depth: u8,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentSubsidiaryLink {
    pub parent: Rssd,
    pub child: Rssd,
    pub quarter: Quarter,
}

/// Bank-subsidiary assets of one parent in one quarter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsidiaryAggregate {
    /// Bank subsidiaries with a reported value.
    pub with_assets: usize,
    /// Sum over `with_assets` subsidiaries; `None` when there are none.
    pub bank_assets: Option<f64>,
    /// All bank subsidiaries, valued or not.
    pub subsidiary_count: usize,
}

/// Parse the relationship registry (NIC relationships export).
pub fn load_relationships(path: &Path, events: &mut Vec<BuildEvent>) -> BuildResult<Vec<RelationshipRecord>> {
    let table = RawTable::read(path, b',', 0)?;
    let parent_col = table.require(&["#ID_RSSD_PARENT", "ID_RSSD_PARENT"])?;
    let child_col = table.require(&["ID_RSSD_OFFSPRING"])?;
    let depth_col = table.require(&["RELN_LVL"])?;
    let start_col = table.column(&["D_DT_START", "DT_START"]);
    let end_col = table.column(&["D_DT_END", "DT_END"]);

    let mut out = Vec::with_capacity(table.len());
    let mut dropped = 0;
    for row in table.rows() {
        let parent = cell(row, Some(parent_col)).and_then(normalize_rssd);
        let child = cell(row, Some(child_col)).and_then(normalize_rssd);
        let depth = cell(row, Some(depth_col)).and_then(|d| d.parse::<u8>().ok());
        let (Some(parent), Some(child), Some(depth)) = (parent, child, depth) else {
            dropped += 1;
            continue;
        };
        let valid_from = cell(row, start_col).and_then(parse_loose_date).unwrap_or_else(far_past);
        let valid_until = cell(row, end_col).and_then(parse_loose_date).unwrap_or_else(far_future);
        if valid_from > valid_until {
            dropped += 1;
            continue;
        }
        out.push(RelationshipRecord { parent, child, depth, valid_from, valid_until });
    }

    if dropped > 0 {
        events.push(BuildEvent::rows_dropped(Stage::Hierarchy, "malformed relationship rows", dropped));
    }
    events.push(BuildEvent::row_count(Stage::Hierarchy, "relationships", out.len()));
    Ok(out)
}

/// Expand relationships over `grid`, keeping depth `<= max_depth` and
/// quarters whose end date lies in the validity window. Deduplicated.
pub fn expand_links(
    relationships: &[RelationshipRecord],
    grid: QuarterGrid,
    max_depth: u8,
) -> Vec<ParentSubsidiaryLink> {
    let index = IntervalIndex::build(
        relationships
            .iter()
            .filter(|r| r.depth <= max_depth)
            .map(|r| (r.valid_from, r.valid_until, r)),
    );

    let mut seen: HashSet<ParentSubsidiaryLink> = HashSet::new();
    let mut links = Vec::new();
    for quarter in grid.iter() {
        for rel in index.containing(quarter.end_date()) {
            let link = ParentSubsidiaryLink {
                parent: rel.parent.clone(),
                child: rel.child.clone(),
                quarter,
            };
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }
    links
}

/// Subsidiaries of each parent per quarter, for tag roll-ups.
pub fn children_by_parent(links: &[ParentSubsidiaryLink]) -> HashMap<(Rssd, Quarter), Vec<Rssd>> {
    let mut out: HashMap<(Rssd, Quarter), Vec<Rssd>> = HashMap::new();
    for link in links {
        out.entry((link.parent.clone(), link.quarter))
            .or_default()
            .push(link.child.clone());
    }
    out
}

/// Sum bank-subsidiary assets per `(parent, quarter)`.
///
/// Only subsidiaries resolved as banks in that quarter count. A group whose
/// subsidiaries are all unvalued has `bank_assets: None`, never zero.
pub fn aggregate_bank_subsidiaries(
    links: &[ParentSubsidiaryLink],
    identities: &TemporalIdentities,
    bank_reports: &FinancialIndex,
    events: &mut Vec<BuildEvent>,
) -> BTreeMap<(Rssd, Quarter), SubsidiaryAggregate> {
    events.push(BuildEvent::StageStarted { stage: Stage::Hierarchy });
    events.push(BuildEvent::row_count(Stage::Hierarchy, "relationship-quarters", links.len()));

    let bank_links: Vec<&ParentSubsidiaryLink> = links
        .iter()
        .filter(|l| identities.category_of(&l.child, l.quarter) == Some(InstitutionCategory::Bank))
        .collect();
    events.push(BuildEvent::row_count(Stage::Hierarchy, "bank subsidiary-quarters", bank_links.len()));

    let mut out: BTreeMap<(Rssd, Quarter), SubsidiaryAggregate> = BTreeMap::new();
    for link in bank_links {
        let agg = out
            .entry((link.parent.clone(), link.quarter))
            .or_insert(SubsidiaryAggregate { with_assets: 0, bank_assets: None, subsidiary_count: 0 });
        agg.subsidiary_count += 1;
        if let Some(value) = bank_reports.assets_for(&link.child, link.quarter.end_date()) {
            agg.with_assets += 1;
            agg.bank_assets = Some(agg.bank_assets.unwrap_or(0.0) + value);
        }
    }

    events.push(BuildEvent::StageCompleted { stage: Stage::Hierarchy, rows: out.len() });
    out
}
