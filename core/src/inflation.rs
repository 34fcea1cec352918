//! Consumer-price deflator for real total assets.

use crate::{
    complaint::ComplaintRecord,
    error::{BuildError, BuildResult},
    quarter::parse_loose_date,
    table::{cell, numeric_cell, RawTable},
};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::path::Path;

const DATE_COLUMNS: &[&str] = &["observation_date", "DATE"];
const VALUE_COLUMNS: &[&str] = &["CPIAUCSL", "CPI"];

/// Monthly index levels keyed by `(year, month)`.
#[derive(Debug, Clone, Default)]
pub struct CpiTable {
    monthly: BTreeMap<(i32, u32), f64>,
}

impl CpiTable {
    pub fn from_monthly(values: impl IntoIterator<Item = (NaiveDate, f64)>) -> Self {
        let monthly = values
            .into_iter()
            .map(|(date, v)| ((date.year(), date.month()), v))
            .collect();
        Self { monthly }
    }

    pub fn load(path: &Path) -> BuildResult<Self> {
        let table = RawTable::read(path, b',', 0)?;
        let date = table.require(DATE_COLUMNS)?;
        let value = table.require(VALUE_COLUMNS)?;
        let values = table.rows().iter().filter_map(|row| {
            let d = cell(row, Some(date)).and_then(parse_loose_date)?;
            Some((d, numeric_cell(row, Some(value))?))
        });
        let cpi = Self::from_monthly(values);
        if cpi.monthly.is_empty() {
            return Err(BuildError::Config {
                message: format!("no CPI observations in {}", path.display()),
            });
        }
        Ok(cpi)
    }

    pub fn at(&self, date: NaiveDate) -> Option<f64> {
        self.monthly.get(&(date.year(), date.month())).copied()
    }

    /// Mean monthly level over `year`.
    pub fn base(&self, year: i32) -> Option<f64> {
        let values: Vec<f64> = self.monthly.range((year, 1)..=(year, 12)).map(|(_, v)| *v).collect();
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    }

    /// `nominal` at `date`, in `base_year` dollars.
    pub fn real(&self, nominal: f64, date: NaiveDate, base_year: i32) -> Option<f64> {
        let level = self.at(date).filter(|v| *v != 0.0)?;
        Some(nominal * self.base(base_year)? / level)
    }
}

/// Set `real_total_assets` from `total_assets` at the reporting
/// quarter-end month. Returns how many records lacked a CPI month.
pub fn deflate_assets(records: &mut [ComplaintRecord], cpi: &CpiTable, base_year: i32) -> usize {
    let mut unpriced = 0;
    for record in records.iter_mut() {
        let (Some(nominal), Some(date)) = (record.total_assets, record.reporting_quarter_end()) else {
            continue;
        };
        record.real_total_assets = cpi.real(nominal, date, base_year);
        if record.real_total_assets.is_none() {
            unpriced += 1;
        }
    }
    if unpriced > 0 {
        log::warn!("[reconciliation] {unpriced} records with assets but no CPI for their quarter-end month");
    }
    unpriced
}
