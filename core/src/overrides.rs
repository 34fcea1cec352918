//! Name-list category overrides for non-depository companies.
//!
//! EXECUTION ORDER (fixed, later lists win):
//!   1. major credit bureaus (configured names)
//!   2. specialized consumer reporting agencies (SCRA list)
//!   3. data brokers (broker registry)

use crate::{
    category::InstitutionCategory,
    complaint::ComplaintRecord,
    error::BuildResult,
    event::{BuildEvent, Stage},
    table::{cell, RawTable},
    types::normalize_name,
};
use std::collections::HashSet;
use std::path::Path;

const LIST_NAME_COLUMNS: &[&str] = &["Company", "Name", "Company Name"];

#[derive(Debug, Clone, Default)]
pub struct NameListOverrides {
    lists: Vec<(InstitutionCategory, HashSet<String>)>,
}

/// Normalized names from the first name-like column of a list file.
pub fn load_name_list(path: &Path) -> BuildResult<HashSet<String>> {
    let table = RawTable::read(path, b',', 0)?;
    let col = table.require(LIST_NAME_COLUMNS)?;
    Ok(table
        .rows()
        .iter()
        .filter_map(|row| cell(row, Some(col)))
        .map(normalize_name)
        .collect())
}

impl NameListOverrides {
    pub fn new(
        credit_bureaus: impl IntoIterator<Item = String>,
        scra: HashSet<String>,
        data_brokers: HashSet<String>,
    ) -> Self {
        let bureaus = credit_bureaus.into_iter().map(|n| normalize_name(&n)).collect();
        Self {
            lists: vec![
                (InstitutionCategory::MajorCreditBureau, bureaus),
                (InstitutionCategory::Scra, scra),
                (InstitutionCategory::DataBroker, data_brokers),
            ],
        }
    }

    /// Build from configured bureau names plus the SCRA and broker list
    /// files. A missing or unreadable list is skipped.
    pub fn load(
        credit_bureaus: &[String],
        scra_path: &Path,
        data_broker_path: &Path,
        events: &mut Vec<BuildEvent>,
    ) -> Self {
        let mut read = |path: &Path| match load_name_list(path) {
            Ok(names) => names,
            Err(e) => {
                events.push(BuildEvent::source_skipped(Stage::Identity, &path.display().to_string(), &e.to_string()));
                HashSet::new()
            }
        };
        let scra = read(scra_path);
        let brokers = read(data_broker_path);
        Self::new(credit_bureaus.iter().cloned(), scra, brokers)
    }

    pub fn category_for(&self, company_name: &str) -> Option<InstitutionCategory> {
        self.lists
            .iter()
            .rev()
            .find(|(_, names)| names.contains(company_name))
            .map(|(category, _)| *category)
    }

    /// Overwrite the category of listed companies. Returns how many
    /// records were overridden.
    pub fn apply(&self, records: &mut [ComplaintRecord], events: &mut Vec<BuildEvent>) -> usize {
        let mut applied = 0;
        for record in records.iter_mut() {
            if let Some(category) = self.category_for(&record.company_name) {
                record.institution_category = Some(category);
                applied += 1;
            }
        }
        events.push(BuildEvent::row_count(Stage::Identity, "name-list category overrides", applied));
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_list_wins() {
        let both: HashSet<String> = ["ACME DATA".to_string()].into();
        let overrides = NameListOverrides::new(["Equifax, Inc.".to_string()], both.clone(), both);
        assert_eq!(overrides.category_for("ACME DATA"), Some(InstitutionCategory::DataBroker));
        assert_eq!(overrides.category_for("EQUIFAX, INC."), Some(InstitutionCategory::MajorCreditBureau));
        assert_eq!(overrides.category_for("ACME BANK"), None);
    }
}
