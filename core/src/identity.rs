//! Temporal Identity Resolver.
//!
//! Maps `(legal_name, quarter)` to one identifier and one category.
//!
//! For each legal name:
//!   1. Count the distinct identifiers it was ever registered under.
//!   2. If exactly one, every row is valid in every quarter and that
//!      identifier is assigned everywhere. Otherwise a row counts for a
//!      quarter only when the quarter-end date lies in its validity window.
//!   3. Among the rows counting for a quarter, the highest-priority
//!      category wins; ties keep the first row.
//!   4. Quarters with no row are forward-filled, then backward-filled, from
//!      the nearest resolved quarter of the same name.
//!
//! Names are independent of each other; resolution is one pass per name
//! over an interval index of its rows.

use crate::{
    cache,
    category::InstitutionCategory,
    complaint::ComplaintRecord,
    error::BuildResult,
    event::{BuildEvent, Stage},
    interval::IntervalIndex,
    quarter::{Quarter, QuarterGrid},
    registry::InstitutionRecord,
    types::Rssd,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identifier: Option<Rssd>,
    pub category: InstitutionCategory,
}

/// One row of the resolver's cached output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalIdentityRow {
    pub legal_name: String,
    pub quarter: Quarter,
    pub identifier: Option<Rssd>,
    pub category: InstitutionCategory,
}

/// Forward-fill then backward-fill empty slots from their nearest
/// non-empty neighbour. Applying it twice changes nothing.
pub fn fill_nearest<T: Clone>(slots: &mut [Option<T>]) {
    let mut last: Option<T> = None;
    for slot in slots.iter_mut() {
        match slot {
            Some(v) => last = Some(v.clone()),
            None => *slot = last.clone(),
        }
    }
    let mut next: Option<T> = None;
    for slot in slots.iter_mut().rev() {
        match slot {
            Some(v) => next = Some(v.clone()),
            None => *slot = next.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemporalIdentities {
    grid: QuarterGrid,
    by_name: BTreeMap<String, Vec<Option<ResolvedIdentity>>>,
    by_identifier: HashMap<Rssd, Vec<Option<InstitutionCategory>>>,
}

impl TemporalIdentities {
    /// Resolve every legal name in `records` over `grid`.
    pub fn resolve(records: &[InstitutionRecord], grid: QuarterGrid) -> Self {
        let mut groups: BTreeMap<&str, Vec<&InstitutionRecord>> = BTreeMap::new();
        for rec in records {
            groups.entry(rec.legal_name.as_str()).or_default().push(rec);
        }

        let mut by_name = BTreeMap::new();
        for (name, rows) in groups {
            by_name.insert(name.to_string(), resolve_name(&rows, grid));
        }

        let mut identities = Self { grid, by_name, by_identifier: HashMap::new() };
        identities.index_identifiers();
        identities
    }

    /// Rebuild from the resolver's cached rows.
    pub fn from_rows(rows: &[TemporalIdentityRow], grid: QuarterGrid) -> Self {
        let mut by_name: BTreeMap<String, Vec<Option<ResolvedIdentity>>> = BTreeMap::new();
        for row in rows {
            let Some(idx) = grid.index_of(row.quarter) else { continue };
            let slots = by_name
                .entry(row.legal_name.clone())
                .or_insert_with(|| vec![None; grid.len()]);
            slots[idx] = Some(ResolvedIdentity {
                identifier: row.identifier.clone(),
                category: row.category,
            });
        }
        let mut identities = Self { grid, by_name, by_identifier: HashMap::new() };
        identities.index_identifiers();
        identities
    }

    /// `(identifier, quarter) → category`, keeping the highest priority when
    /// several names share an identifier in the same quarter.
    fn index_identifiers(&mut self) {
        let len = self.grid.len();
        for slots in self.by_name.values() {
            for (idx, slot) in slots.iter().enumerate() {
                let Some(ResolvedIdentity { identifier: Some(id), category }) = slot else { continue };
                let cats = self
                    .by_identifier
                    .entry(id.clone())
                    .or_insert_with(|| vec![None; len]);
                cats[idx] = Some(match cats[idx] {
                    Some(existing) => existing.min(*category),
                    None => *category,
                });
            }
        }
    }

    pub fn grid(&self) -> QuarterGrid {
        self.grid
    }

    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }

    /// Identity of a (normalized) legal name at `quarter`.
    pub fn lookup(&self, legal_name: &str, quarter: Quarter) -> Option<&ResolvedIdentity> {
        let idx = self.grid.index_of(quarter)?;
        self.by_name.get(legal_name)?.get(idx)?.as_ref()
    }

    /// Category of an identifier at `quarter`.
    pub fn category_of(&self, identifier: &str, quarter: Quarter) -> Option<InstitutionCategory> {
        let idx = self.grid.index_of(quarter)?;
        *self.by_identifier.get(identifier)?.get(idx)?
    }

    /// Flatten to cacheable rows. Unresolved slots are omitted.
    pub fn to_rows(&self) -> Vec<TemporalIdentityRow> {
        let mut rows = Vec::new();
        for (name, slots) in &self.by_name {
            for (idx, slot) in slots.iter().enumerate() {
                let (Some(resolved), Some(quarter)) = (slot, self.grid.quarter_at(idx)) else { continue };
                rows.push(TemporalIdentityRow {
                    legal_name: name.clone(),
                    quarter,
                    identifier: resolved.identifier.clone(),
                    category: resolved.category,
                });
            }
        }
        rows
    }
}

fn resolve_name(rows: &[&InstitutionRecord], grid: QuarterGrid) -> Vec<Option<ResolvedIdentity>> {
    let distinct: BTreeSet<&str> = rows
        .iter()
        .filter(|r| r.has_identifier())
        .map(|r| r.identifier.as_str())
        .collect();
    let single_identifier = if distinct.len() == 1 {
        distinct.iter().next().map(|id| id.to_string())
    } else {
        None
    };

    let index = IntervalIndex::build(rows.iter().map(|r| (r.valid_from, r.valid_until, *r)));
    let mut slots: Vec<Option<ResolvedIdentity>> = grid
        .iter()
        .map(|quarter| {
            let candidates = if single_identifier.is_some() {
                index.all()
            } else {
                index.containing(quarter.end_date())
            };
            best_candidate(&candidates).map(|rec| ResolvedIdentity {
                identifier: match &single_identifier {
                    Some(id) => Some(id.clone()),
                    None if rec.has_identifier() => Some(rec.identifier.clone()),
                    None => None,
                },
                category: rec.category(),
            })
        })
        .collect();

    fill_nearest(&mut slots);
    slots
}

/// Lowest-priority-number category wins; the first row wins ties.
fn best_candidate<'a>(candidates: &[&&'a InstitutionRecord]) -> Option<&'a InstitutionRecord> {
    let mut best: Option<(&InstitutionRecord, InstitutionCategory)> = None;
    for rec in candidates {
        let category = rec.category();
        if best.map_or(true, |(_, c)| category < c) {
            best = Some((**rec, category));
        }
    }
    best.map(|(rec, _)| rec)
}

/// Cached entry point: reuse the resolved table at `cache_path` unless
/// `rebuild` is set. Callers must rebuild whenever the registry itself was
/// rebuilt, or the cache would describe a different registry.
pub fn resolve_identities(
    records: &[InstitutionRecord],
    grid: QuarterGrid,
    cache_path: &Path,
    rebuild: bool,
    events: &mut Vec<BuildEvent>,
) -> BuildResult<TemporalIdentities> {
    events.push(BuildEvent::StageStarted { stage: Stage::Identity });
    let rows = cache::load_or_build(cache_path, rebuild, Stage::Identity, events, |_| {
        Ok(TemporalIdentities::resolve(records, grid).to_rows())
    })?;
    let identities = TemporalIdentities::from_rows(&rows, grid);
    events.push(BuildEvent::row_count(Stage::Identity, "legal names", identities.name_count()));
    events.push(BuildEvent::StageCompleted { stage: Stage::Identity, rows: rows.len() });
    Ok(identities)
}

/// Attach the resolved identity of each complaint's company at its
/// reporting quarter. Returns how many records resolved.
pub fn assign_identities(
    records: &mut [ComplaintRecord],
    identities: &TemporalIdentities,
    events: &mut Vec<BuildEvent>,
) -> usize {
    let mut resolved = 0;
    for record in records.iter_mut() {
        let Some(quarter) = record.reporting_quarter else { continue };
        if let Some(identity) = identities.lookup(&record.company_name, quarter) {
            record.resolved_identifier = identity.identifier.clone();
            record.institution_category = Some(identity.category);
            resolved += 1;
        }
    }
    events.push(BuildEvent::row_count(Stage::Identity, "complaints with a registry identity", resolved));
    resolved
}
