//! Regulation/Jurisdiction Tagger.
//!
//! Each regulatory registry is a series of vintages under one tag. An
//! institution-quarter carries a tag when the vintage in force at that
//! quarter lists it: identifier first, then a name listed under exactly
//! one identifier in that vintage. Holding companies also inherit their
//! subsidiaries' tags. Multiple regimes join sorted with '-'; no match
//! at any level yields `NO_REGULATION`, never a missing value.

use crate::{
    category::InstitutionCategory,
    complaint::ComplaintRecord,
    error::BuildResult,
    event::{BuildEvent, Stage},
    quarter::{parse_loose_date, Quarter},
    registry::{discover_sources, read_source, vintage_from_name, ID_COLUMNS, NAME_COLUMNS},
    table::{cell, RawTable},
    types::{normalize_name, normalize_rssd, Rssd},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const NO_REGULATION: &str = "NoRegulation";

/// One configured registry: every file under `dir` is a vintage of `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatorSource {
    pub tag: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
struct Vintage {
    identifiers: HashSet<Rssd>,
    unique_names: HashSet<String>,
}

impl Vintage {
    fn from_entries(entries: &[(Option<Rssd>, String)]) -> Self {
        let identifiers = entries.iter().filter_map(|(id, _)| id.clone()).collect();
        let mut ids_by_name: HashMap<&str, HashSet<Option<&str>>> = HashMap::new();
        for (id, name) in entries {
            if !name.is_empty() {
                ids_by_name.entry(name).or_default().insert(id.as_deref());
            }
        }
        let unique_names = ids_by_name
            .into_iter()
            .filter(|(_, ids)| ids.len() == 1)
            .map(|(name, _)| name.to_string())
            .collect();
        Self { identifiers, unique_names }
    }

    fn lists(&self, identifier: Option<&str>, name: Option<&str>) -> bool {
        if identifier.is_some_and(|id| self.identifiers.contains(id)) {
            return true;
        }
        name.is_some_and(|n| self.unique_names.contains(n))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegulatoryRegistry {
    regimes: BTreeMap<String, BTreeMap<Quarter, Vintage>>,
}

impl RegulatoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vintage of `tag` effective from `quarter`. Entries are
    /// `(identifier, normalized name)` pairs.
    pub fn add_vintage(&mut self, tag: &str, quarter: Quarter, entries: &[(Option<Rssd>, String)]) {
        self.regimes
            .entry(tag.to_string())
            .or_default()
            .insert(quarter, Vintage::from_entries(entries));
    }

    pub fn regime_count(&self) -> usize {
        self.regimes.len()
    }

    /// Read every configured registry. Unreadable vintages are skipped.
    pub fn load(sources: &[RegulatorSource], events: &mut Vec<BuildEvent>) -> Self {
        let mut registry = Self::new();
        for source in sources {
            let paths = match discover_sources(&source.dir) {
                Ok(p) => p,
                Err(e) => {
                    events.push(BuildEvent::source_skipped(
                        Stage::Regulation,
                        &source.dir.display().to_string(),
                        &e.to_string(),
                    ));
                    continue;
                }
            };
            for path in paths {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
                match read_vintage(&path) {
                    Ok((quarter, entries)) => {
                        log::debug!("[regulation] {}: {name} as of {quarter}, {} rows", source.tag, entries.len());
                        registry.add_vintage(&source.tag, quarter, &entries);
                    }
                    Err(reason) => events.push(BuildEvent::source_skipped(Stage::Regulation, &name, &reason)),
                }
            }
        }
        registry
    }

    /// Latest vintage at or before `quarter`, else the earliest.
    fn vintage_at(vintages: &BTreeMap<Quarter, Vintage>, quarter: Quarter) -> Option<&Vintage> {
        vintages
            .range(..=quarter)
            .next_back()
            .or_else(|| vintages.iter().next())
            .map(|(_, v)| v)
    }

    /// Tags whose in-force vintage lists the institution itself.
    pub fn direct_tags(&self, identifier: Option<&str>, name: Option<&str>, quarter: Quarter) -> BTreeSet<String> {
        self.regimes
            .iter()
            .filter(|(_, vintages)| Self::vintage_at(vintages, quarter).is_some_and(|v| v.lists(identifier, name)))
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Final tag for one institution-quarter. `subsidiaries` are the
    /// holding company's children at `quarter`, matched by identifier.
    pub fn tag_for(
        &self,
        identifier: Option<&str>,
        name: Option<&str>,
        quarter: Quarter,
        subsidiaries: &[Rssd],
    ) -> String {
        let mut tags = self.direct_tags(identifier, name, quarter);
        for child in subsidiaries {
            tags.extend(self.direct_tags(Some(child), None, quarter));
        }
        combine_tags(&tags)
    }
}

/// Sorted, hyphen-joined, or `NO_REGULATION` when empty.
pub fn combine_tags(tags: &BTreeSet<String>) -> String {
    if tags.is_empty() {
        NO_REGULATION.to_string()
    } else {
        tags.iter().map(String::as_str).collect::<Vec<_>>().join("-")
    }
}

/// Reporting period from the banner rows above the header, e.g.
/// `"Depository institutions as of 06/30/2014"`.
fn period_from_preamble(table: &RawTable) -> Option<Quarter> {
    table
        .preamble
        .iter()
        .flatten()
        .flat_map(|c| c.split_whitespace())
        .find_map(parse_loose_date)
        .map(Quarter::from_date)
}

fn read_vintage(path: &Path) -> Result<(Quarter, Vec<(Option<Rssd>, String)>), String> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let table: RawTable = read_source(path).map_err(|e| e.to_string())?;
    let quarter = period_from_preamble(&table)
        .or_else(|| vintage_from_name(file_name).map(Quarter::from_date))
        .ok_or_else(|| "no reporting period in banner or file name".to_string())?;

    let id = table.column(ID_COLUMNS);
    let name = table.column(NAME_COLUMNS);
    if id.is_none() && name.is_none() {
        return Err("neither an identifier nor a name column".to_string());
    }
    let entries = table
        .rows()
        .iter()
        .map(|row| {
            (
                cell(row, id).and_then(normalize_rssd),
                cell(row, name).map(normalize_name).unwrap_or_default(),
            )
        })
        .filter(|(id, name)| id.is_some() || !name.is_empty())
        .collect();
    Ok((quarter, entries))
}

/// Tag every complaint. Records without a quarter get the default.
pub fn tag_regulation(
    records: &mut [ComplaintRecord],
    registry: &RegulatoryRegistry,
    children: &HashMap<(Rssd, Quarter), Vec<Rssd>>,
    events: &mut Vec<BuildEvent>,
) {
    events.push(BuildEvent::StageStarted { stage: Stage::Regulation });
    let mut tagged = 0usize;
    for record in records.iter_mut() {
        let tag = match record.reporting_quarter {
            Some(quarter) => {
                let identifier = record.resolved_identifier.as_deref();
                let subsidiaries: &[Rssd] = match (record.institution_category, identifier) {
                    (Some(InstitutionCategory::HoldingCompany), Some(id)) => children
                        .get(&(id.to_string(), quarter))
                        .map(Vec::as_slice)
                        .unwrap_or_default(),
                    _ => &[],
                };
                let name = Some(record.company_name.as_str()).filter(|n| !n.is_empty());
                registry.tag_for(identifier, name, quarter, subsidiaries)
            }
            None => NO_REGULATION.to_string(),
        };
        if tag != NO_REGULATION {
            tagged += 1;
        }
        record.regulation_tag = Some(tag);
    }
    events.push(BuildEvent::row_count(Stage::Regulation, "records under a regulatory regime", tagged));
    events.push(BuildEvent::StageCompleted { stage: Stage::Regulation, rows: records.len() });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quarter {
        s.parse().unwrap()
    }

    #[test]
    fn as_of_vintage_falls_back_to_earliest() {
        let mut reg = RegulatoryRegistry::new();
        reg.add_vintage("Depository", q("2015Q1"), &[(Some("1".into()), "ACME BANK".into())]);
        reg.add_vintage("Depository", q("2018Q1"), &[(Some("2".into()), "OTHER BANK".into())]);

        assert!(reg.direct_tags(Some("1"), None, q("2012Q3")).contains("Depository"));
        assert!(reg.direct_tags(Some("1"), None, q("2017Q4")).contains("Depository"));
        assert!(reg.direct_tags(Some("1"), None, q("2018Q1")).is_empty());
    }

    #[test]
    fn shared_names_do_not_match() {
        let mut reg = RegulatoryRegistry::new();
        reg.add_vintage(
            "Depository",
            q("2015Q1"),
            &[(Some("1".into()), "FIRST BANK".into()), (Some("2".into()), "FIRST BANK".into())],
        );
        assert_eq!(reg.tag_for(None, Some("FIRST BANK"), q("2016Q1"), &[]), NO_REGULATION);
    }

    #[test]
    fn combine_sorts_and_joins() {
        let tags: BTreeSet<String> = ["State".to_string(), "Depository".to_string()].into();
        assert_eq!(combine_tags(&tags), "Depository-State");
        assert_eq!(combine_tags(&BTreeSet::new()), NO_REGULATION);
    }
}
