//! Consumer complaints: loading, derived features, enriched output.
//!
//! Every original column is carried through untouched; enrichment columns
//! are appended on output. Enriched fields are written once per pass.

use crate::{
    category::InstitutionCategory,
    error::{BuildError, BuildResult},
    event::{BuildEvent, Stage},
    financial::FinancialMatch,
    quarter::{parse_loose_date, Quarter},
    table::normalize_header,
    types::{normalize_name, Rssd},
};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Writer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const COMPANY: &str = "Company";
pub const DATE_RECEIVED: &str = "Date received";
pub const DATE_SENT: &str = "Date sent to company";
const COMPLAINT_ID: &str = "Complaint ID";
const STATE: &str = "State";
const ISSUE: &str = "Issue";
const SUB_ISSUE: &str = "Sub-issue";
const RESPONSE: &str = "Company response to consumer";
const NARRATIVE: &str = "Consumer complaint narrative";

/// Appended after the original columns, in this order.
pub const ENRICHED_COLUMNS: [&str; 16] = [
    "quarter_sent",
    "reporting_quarter_end",
    "resolved_identifier",
    "institution_category",
    "total_assets",
    "real_total_assets",
    "lagged_total_assets",
    "regulation_tag",
    "zombie_data",
    "is_relief",
    "with_narrative",
    "duration_sending",
    "duration_category",
    "duration_group",
    "state_privacy_law",
    "ccpa_phase",
];

const ZOMBIE_ISSUES: [(&str, &str); 2] = [
    ("Incorrect information on your report", "Old information reappears or never goes away"),
    ("Incorrect information on credit report", "Reinserted previously deleted info"),
];

const RELIEF_RESPONSES: [&str; 2] = ["Closed with monetary relief", "Closed with non-monetary relief"];

#[derive(Debug, Clone, Default)]
pub struct ComplaintRecord {
    /// Original cells, in input column order.
    pub raw: Vec<String>,
    pub complaint_id: Option<String>,
    /// Normalized company name, the join key into the identity table.
    pub company_name: String,
    pub state: Option<String>,
    pub issue: Option<String>,
    pub sub_issue: Option<String>,
    pub company_response: Option<String>,
    pub with_narrative: bool,
    pub date_received: Option<NaiveDate>,
    pub date_sent_to_company: Option<NaiveDate>,
    pub reporting_quarter: Option<Quarter>,

    pub resolved_identifier: Option<Rssd>,
    pub institution_category: Option<InstitutionCategory>,
    pub financial: Option<FinancialMatch>,
    pub total_assets: Option<f64>,
    pub real_total_assets: Option<f64>,
    pub lagged_total_assets: Option<f64>,
    pub regulation_tag: Option<String>,
}

impl ComplaintRecord {
    pub fn new(company_name: &str, date_received: NaiveDate, date_sent_to_company: NaiveDate) -> Self {
        Self {
            company_name: normalize_name(company_name),
            date_received: Some(date_received),
            date_sent_to_company: Some(date_sent_to_company),
            reporting_quarter: Some(Quarter::from_date(date_sent_to_company)),
            ..Self::default()
        }
    }

    pub fn reporting_quarter_end(&self) -> Option<NaiveDate> {
        self.reporting_quarter.map(Quarter::end_date)
    }

    pub fn zombie_data(&self) -> bool {
        match (self.issue.as_deref(), self.sub_issue.as_deref()) {
            (Some(issue), Some(sub)) => ZOMBIE_ISSUES.iter().any(|(i, s)| *i == issue && *s == sub),
            _ => false,
        }
    }

    pub fn is_relief(&self) -> bool {
        self.company_response
            .as_deref()
            .is_some_and(|r| RELIEF_RESPONSES.contains(&r))
    }

    /// Days from receipt to sending.
    pub fn duration_sending(&self) -> Option<i64> {
        Some((self.date_sent_to_company? - self.date_received?).num_days())
    }

    pub fn ccpa_phase(&self) -> Option<&'static str> {
        self.date_received.map(ccpa_phase)
    }
}

pub fn duration_category(days: i64) -> &'static str {
    match days {
        d if d < 1 => "< 1 day",
        1 => "1 day",
        2 => "2 days",
        3 => "3 days",
        4 => "4 days",
        5 => "5 days",
        6 => "6 days",
        7 => "7 days",
        8..=14 => "within two weeks",
        15..=30 => "within a month",
        31..=90 => "within 90 days",
        91..=180 => "within 180 days",
        181..=366 => "within a year",
        _ => "more than a year",
    }
}

pub fn duration_group(category: &str) -> &'static str {
    match category {
        "< 1 day" => "< 1 day",
        "1 day" | "2 days" | "3 days" | "4 days" | "5 days" | "6 days" | "7 days" => "within a week",
        "within two weeks" | "within a month" => "within a month",
        _ => "more than a month",
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

/// California privacy-regime phase on `date`. Each boundary date opens
/// the next phase.
pub fn ccpa_phase(date: NaiveDate) -> &'static str {
    if date < ymd(2018, 6, 28) {
        "Pre-CCPA"
    } else if date < ymd(2020, 1, 1) {
        "CCPA enacted, pre-implement"
    } else if date < ymd(2020, 11, 3) {
        "CCPA implemented, pre-CPRA"
    } else if date < ymd(2023, 1, 1) {
        "CPRA amended, pre-implementation"
    } else {
        "CPRA implemented"
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComplaintTable {
    /// Original header row, as read.
    pub headers: Vec<String>,
    pub records: Vec<ComplaintRecord>,
}

fn column_of(headers: &[String], name: &str) -> Option<usize> {
    let wanted = normalize_header(name);
    headers.iter().position(|h| normalize_header(h) == wanted)
}

fn non_blank(row: &[String], idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| row.get(i))
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

impl ComplaintTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read the complaint export. `Company` and `Date sent to company` are
    /// required; every other column is optional.
    pub fn load(path: &Path, events: &mut Vec<BuildEvent>) -> BuildResult<Self> {
        events.push(BuildEvent::StageStarted { stage: Stage::Complaints });
        let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim_start_matches('\u{feff}').to_string())
            .collect();

        let file = path.display().to_string();
        let require = |name: &str| {
            column_of(&headers, name).ok_or_else(|| BuildError::MissingColumn {
                file: file.clone(),
                column: name.to_string(),
            })
        };
        let company = require(COMPANY)?;
        let sent = require(DATE_SENT)?;
        let received = column_of(&headers, DATE_RECEIVED);
        let id = column_of(&headers, COMPLAINT_ID);
        let state = column_of(&headers, STATE);
        let issue = column_of(&headers, ISSUE);
        let sub_issue = column_of(&headers, SUB_ISSUE);
        let response = column_of(&headers, RESPONSE);
        let narrative = column_of(&headers, NARRATIVE);

        let mut records = Vec::new();
        let mut undated = 0usize;
        for row in reader.byte_records() {
            let raw: Vec<String> = row?.iter().map(|c| String::from_utf8_lossy(c).to_string()).collect();
            let date_sent_to_company = non_blank(&raw, Some(sent)).and_then(|d| parse_loose_date(&d));
            if date_sent_to_company.is_none() {
                undated += 1;
            }
            records.push(ComplaintRecord {
                complaint_id: non_blank(&raw, id),
                company_name: non_blank(&raw, Some(company)).map(|c| normalize_name(&c)).unwrap_or_default(),
                state: non_blank(&raw, state),
                issue: non_blank(&raw, issue),
                sub_issue: non_blank(&raw, sub_issue),
                company_response: non_blank(&raw, response),
                with_narrative: non_blank(&raw, narrative).is_some(),
                date_received: non_blank(&raw, received).and_then(|d| parse_loose_date(&d)),
                date_sent_to_company,
                reporting_quarter: date_sent_to_company.map(Quarter::from_date),
                raw,
                ..ComplaintRecord::default()
            });
        }

        if undated > 0 {
            log::warn!("[complaints] {undated} rows without a parseable {DATE_SENT}");
        }
        events.push(BuildEvent::row_count(Stage::Complaints, "loaded", records.len()));
        Ok(Self { headers, records })
    }

    /// Keep complaints sent no later than `last_quarter`. Undated rows are
    /// kept; they simply never match a quarter-keyed source.
    pub fn truncate_after(&mut self, last_quarter: Quarter, events: &mut Vec<BuildEvent>) {
        let before = self.records.len();
        self.records
            .retain(|r| r.reporting_quarter.map_or(true, |q| q <= last_quarter));
        let dropped = before - self.records.len();
        events.push(BuildEvent::rows_dropped(
            Stage::Complaints,
            &format!("sent to company after {last_quarter}"),
            dropped,
        ));
        events.push(BuildEvent::row_count(Stage::Complaints, "after quarter cutoff", self.records.len()));
    }

    /// Write the enriched table: original columns, then [`ENRICHED_COLUMNS`].
    pub fn write(&self, path: &Path, state_privacy_laws: &BTreeMap<String, NaiveDate>) -> BuildResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = Writer::from_path(path)?;
        let header: Vec<&str> = self
            .headers
            .iter()
            .map(String::as_str)
            .chain(ENRICHED_COLUMNS)
            .collect();
        writer.write_record(&header)?;

        for record in &self.records {
            let mut row = record.raw.clone();
            row.resize(self.headers.len(), String::new());
            row.extend(enriched_cells(record, state_privacy_laws));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

fn enriched_cells(record: &ComplaintRecord, state_privacy_laws: &BTreeMap<String, NaiveDate>) -> Vec<String> {
    let duration = record.duration_sending();
    let category = duration.map(duration_category);
    vec![
        opt(record.reporting_quarter),
        opt(record.reporting_quarter_end()),
        opt(record.resolved_identifier.as_deref()),
        opt(record.institution_category),
        opt(record.total_assets),
        opt(record.real_total_assets),
        opt(record.lagged_total_assets),
        opt(record.regulation_tag.as_deref()),
        flag(record.zombie_data()),
        flag(record.is_relief()),
        flag(record.with_narrative),
        opt(duration),
        opt(category),
        opt(category.map(duration_group)),
        opt(record.state.as_ref().and_then(|s| state_privacy_laws.get(s))),
        opt(record.ccpa_phase()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_buckets() {
        assert_eq!(duration_category(0), "< 1 day");
        assert_eq!(duration_category(7), "7 days");
        assert_eq!(duration_category(14), "within two weeks");
        assert_eq!(duration_category(366), "within a year");
        assert_eq!(duration_category(367), "more than a year");
        assert_eq!(duration_group("3 days"), "within a week");
        assert_eq!(duration_group("within two weeks"), "within a month");
        assert_eq!(duration_group("within 90 days"), "more than a month");
    }

    #[test]
    fn ccpa_boundaries_open_next_phase() {
        assert_eq!(ccpa_phase(ymd(2018, 6, 27)), "Pre-CCPA");
        assert_eq!(ccpa_phase(ymd(2018, 6, 28)), "CCPA enacted, pre-implement");
        assert_eq!(ccpa_phase(ymd(2020, 11, 3)), "CPRA amended, pre-implementation");
        assert_eq!(ccpa_phase(ymd(2024, 5, 1)), "CPRA implemented");
    }

    #[test]
    fn zombie_and_relief_flags() {
        let mut r = ComplaintRecord::new("x", ymd(2021, 4, 28), ymd(2021, 5, 1));
        assert_eq!(r.duration_sending(), Some(3));
        r.issue = Some("Incorrect information on credit report".into());
        r.sub_issue = Some("Reinserted previously deleted info".into());
        r.company_response = Some("Closed with monetary relief".into());
        assert!(r.zombie_data());
        assert!(r.is_relief());

        r.sub_issue = Some("Old information reappears or never goes away".into());
        r.company_response = Some("Closed with explanation".into());
        assert!(!r.zombie_data());
        assert!(!r.is_relief());
    }
}
