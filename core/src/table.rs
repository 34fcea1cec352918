//! Raw delimited tables.
//!
//! Every source file (registry export, call report, relationship file)
//! arrives as a delimited text table with a source-specific header row.
//! `RawTable` reads it once, decodes cells lossily so cp1252 exports do
//! not fail the run, normalizes header names, and exposes alias-based
//! column lookup so loaders tolerate naming drift across vintages.

use crate::error::{BuildError, BuildResult};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub source: String,
    /// Lines above the header row (title cells, reporting-period banners).
    pub preamble: Vec<Vec<String>>,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Uppercase, trim, and collapse whitespace in a header cell.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

impl RawTable {
    /// Read `path`, treating line `header_row` (0-based) as the header.
    pub fn read(path: &Path, delimiter: u8, header_row: usize) -> BuildResult<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .quoting(delimiter != b'^')
            .from_path(path)?;

        let mut preamble = Vec::new();
        let mut headers = None;
        let mut rows = Vec::new();
        for (line, record) in reader.byte_records().enumerate() {
            let record = record?;
            let cells: Vec<String> = record
                .iter()
                .map(|c| String::from_utf8_lossy(c).trim().to_string())
                .collect();
            if line < header_row {
                preamble.push(cells);
            } else if line == header_row {
                headers = Some(cells.iter().map(|c| normalize_header(c)).collect());
            } else if cells.iter().any(|c| !c.is_empty()) {
                rows.push(cells);
            }
        }

        let source = path.display().to_string();
        let headers = headers.ok_or_else(|| BuildError::MissingColumn {
            file: source.clone(),
            column: format!("<header row {header_row}>"),
        })?;
        Ok(Self { source, preamble, headers, rows })
    }

    pub fn from_rows(source: &str, headers: &[&str], rows: Vec<Vec<String>>) -> Self {
        Self {
            source: source.to_string(),
            preamble: Vec::new(),
            headers: headers.iter().map(|h| normalize_header(h)).collect(),
            rows,
        }
    }

    /// Stack tables with differing column sets. Columns are aligned by
    /// normalized header name; cells missing from a part are left blank.
    pub fn concat(source: &str, parts: Vec<RawTable>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for part in &parts {
            for h in &part.headers {
                if !positions.contains_key(h) {
                    positions.insert(h.clone(), headers.len());
                    headers.push(h.clone());
                }
            }
        }

        let mut preamble = Vec::new();
        let mut rows = Vec::new();
        for part in parts {
            if preamble.is_empty() {
                preamble = part.preamble;
            }
            let map: Vec<usize> = part.headers.iter().map(|h| positions[h]).collect();
            for row in part.rows {
                let mut aligned = vec![String::new(); headers.len()];
                for (i, cell) in row.into_iter().enumerate() {
                    if let Some(&pos) = map.get(i) {
                        aligned[pos] = cell;
                    }
                }
                rows.push(aligned);
            }
        }
        Self { source: source.to_string(), preamble, headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Index of the first header matching any alias.
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            let wanted = normalize_header(alias);
            self.headers.iter().position(|h| *h == wanted)
        })
    }

    /// Like [`RawTable::column`], but a missing column is an error.
    pub fn require(&self, aliases: &[&str]) -> BuildResult<usize> {
        self.column(aliases).ok_or_else(|| BuildError::MissingColumn {
            file: self.source.clone(),
            column: aliases.join("|"),
        })
    }
}

/// A non-blank cell, or `None`.
pub fn cell(row: &[String], idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| row.get(i))
        .map(String::as_str)
        .filter(|c| !c.is_empty())
}

/// A numeric cell. Thousands separators are tolerated; anything else that
/// does not parse coerces to `None`.
pub fn numeric_cell(row: &[String], idx: Option<usize>) -> Option<f64> {
    cell(row, idx).and_then(|c| c.replace(',', "").parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_aligns_columns_by_header() {
        let a = RawTable::from_rows("a", &["ID", "Institution"], vec![vec!["1".into(), "ACME".into()]]);
        let b = RawTable::from_rows("b", &["Institution", "City"], vec![vec!["BETA".into(), "Boston".into()]]);
        let t = RawTable::concat("ab", vec![a, b]);
        assert_eq!(t.headers(), &["ID", "INSTITUTION", "CITY"]);
        let id = t.column(&["ID"]);
        let city = t.column(&["city"]);
        assert_eq!(cell(&t.rows()[0], id), Some("1"));
        assert_eq!(cell(&t.rows()[1], id), None);
        assert_eq!(cell(&t.rows()[1], city), Some("Boston"));
    }

    #[test]
    fn numeric_cells_coerce() {
        let row = vec!["1,234".to_string(), "n/a".to_string()];
        assert_eq!(numeric_cell(&row, Some(0)), Some(1234.0));
        assert_eq!(numeric_cell(&row, Some(1)), None);
        assert_eq!(numeric_cell(&row, Some(7)), None);
    }
}
