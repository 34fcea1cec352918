//! Financial-Attribute Joiner.
//!
//! Loads time-stamped total-assets reports for the three institution kinds
//! and joins them to complaints at the reporting quarter-end date.
//!
//! ATTEMPT ORDER (fixed): bank, credit union, holding company.
//!   - Each kind only sees the residual population: records that have not
//!     yet acquired a non-missing asset value from an earlier kind.
//!   - Primary match on `(identifier, quarter_end)`.
//!   - Secondary match on `(normalized name, quarter_end)`, restricted to
//!     pairs that occur exactly once in the kind's source.
//!   - A match makes the report authoritative: the record's category is set
//!     to the matched kind and a missing identifier is backfilled.

use crate::{
    cache,
    category::InstitutionCategory,
    complaint::ComplaintRecord,
    error::BuildResult,
    event::{BuildEvent, Stage},
    quarter::parse_loose_date,
    table::{cell, numeric_cell, RawTable},
    types::{normalize_name, normalize_rssd, Rssd},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionKind {
    Bank,
    CreditUnion,
    HoldingCompany,
}

impl InstitutionKind {
    pub const ATTEMPT_ORDER: [InstitutionKind; 3] = [
        InstitutionKind::Bank,
        InstitutionKind::CreditUnion,
        InstitutionKind::HoldingCompany,
    ];

    pub fn category(self) -> InstitutionCategory {
        match self {
            InstitutionKind::Bank => InstitutionCategory::Bank,
            InstitutionKind::CreditUnion => InstitutionCategory::CreditUnion,
            InstitutionKind::HoldingCompany => InstitutionCategory::HoldingCompany,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstitutionKind::Bank => "bank",
            InstitutionKind::CreditUnion => "credit_union",
            InstitutionKind::HoldingCompany => "holding_company",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialReport {
    pub kind: InstitutionKind,
    pub identifier: Option<Rssd>,
    pub institution_name: Option<String>,
    pub quarter_end: NaiveDate,
    /// Dollars.
    pub total_assets: Option<f64>,
}

// ── Loaders ────────────────────────────────────────────────────────

/// Bank call reports and holding-company reports are in thousands.
const THOUSANDS: f64 = 1_000.0;

fn collect_txt_files(dir: &Path, recurse: bool, out: &mut Vec<PathBuf>) -> BuildResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recurse {
                collect_txt_files(&path, false, out)?;
            }
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_ascii_lowercase();
        if name.ends_with(".txt") && name != "readme.txt" {
            out.push(path);
        }
    }
    Ok(())
}

/// Trailing `MMDDYYYY` in a call-report file name (`... 12312020.txt`).
fn date_from_file_name(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return None;
    }
    let digits: String = digits.chars().take(8).collect::<String>().chars().rev().collect();
    NaiveDate::parse_from_str(&digits, "%m%d%Y").ok()
}

/// Parse one tab-delimited bank call-report file.
///
/// Total assets appear as `RCFD2170` (consolidated form) or `RCON2170`
/// (domestic form); the consolidated value is preferred when both are
/// present. The descriptive second header line is dropped because its date
/// cell does not parse.
pub fn parse_bank_call_report(path: &Path) -> BuildResult<(Vec<FinancialReport>, usize)> {
    let table = RawTable::read(path, b'\t', 0)?;
    let id_col = table.require(&["IDRSSD"])?;
    let consolidated = table.column(&["RCFD2170"]);
    let domestic = table.column(&["RCON2170"]);
    if consolidated.is_none() && domestic.is_none() {
        table.require(&["RCFD2170", "RCON2170"])?;
    }
    let date_col = table.column(&["Reporting Period End Date"]);
    let name_col = table.column(&["Financial Institution Name"]);
    let file_date = date_from_file_name(path);

    let mut reports = Vec::new();
    let mut unparsed = 0;
    for row in table.rows() {
        let date = match date_col {
            Some(_) => cell(row, date_col).and_then(parse_loose_date),
            None => file_date,
        };
        let (Some(quarter_end), Some(identifier)) = (date, cell(row, Some(id_col)).and_then(normalize_rssd)) else {
            unparsed += 1;
            continue;
        };
        let total = numeric_cell(row, consolidated).or_else(|| numeric_cell(row, domestic));
        reports.push(FinancialReport {
            kind: InstitutionKind::Bank,
            identifier: Some(identifier),
            institution_name: cell(row, name_col).map(normalize_name),
            quarter_end,
            total_assets: total.map(|v| v * THOUSANDS),
        });
    }
    Ok((reports, unparsed))
}

/// Parse one credit-union call-report period: `foicu.txt` (entity metadata)
/// joined to `fs220.txt` (financial metrics) on the credit-union number.
pub fn parse_credit_union_period(foicu: &Path, fs220: &Path) -> BuildResult<(Vec<FinancialReport>, usize)> {
    let meta = RawTable::read(foicu, b',', 0)?;
    let meta_num = meta.require(&["CU_NUMBER"])?;
    let meta_name = meta.column(&["CU_NAME"]);
    let meta_rssd = meta.column(&["RSSD"]);

    let mut entities: HashMap<String, (Option<Rssd>, Option<String>)> = HashMap::new();
    for row in meta.rows() {
        if let Some(num) = cell(row, Some(meta_num)) {
            entities.entry(num.to_string()).or_insert((
                cell(row, meta_rssd).and_then(normalize_rssd),
                cell(row, meta_name).map(normalize_name),
            ));
        }
    }

    let metrics = RawTable::read(fs220, b',', 0)?;
    let num_col = metrics.require(&["CU_NUMBER"])?;
    let date_col = metrics.require(&["CYCLE_DATE"])?;
    let assets_col = metrics.require(&["ACCT_010"])?;

    let mut reports = Vec::new();
    let mut unparsed = 0;
    for row in metrics.rows() {
        let (Some(num), Some(quarter_end)) = (
            cell(row, Some(num_col)),
            cell(row, Some(date_col)).and_then(parse_loose_date),
        ) else {
            unparsed += 1;
            continue;
        };
        let (identifier, institution_name) = entities.get(num).cloned().unwrap_or((None, None));
        reports.push(FinancialReport {
            kind: InstitutionKind::CreditUnion,
            identifier,
            institution_name,
            quarter_end,
            total_assets: numeric_cell(row, Some(assets_col)),
        });
    }
    Ok((reports, unparsed))
}

/// Parse one caret-delimited holding-company financial file.
///
/// `BHCK2170` (consolidated) is preferred; when it is missing the
/// parent-only total `BHCP2170` is used.
pub fn parse_holding_company_report(path: &Path) -> BuildResult<(Vec<FinancialReport>, usize)> {
    let table = RawTable::read(path, b'^', 0)?;
    let id_col = table.require(&["RSSD9001"])?;
    let date_col = table.require(&["RSSD9999"])?;
    let consolidated = table.column(&["BHCK2170"]);
    let parent_only = table.column(&["BHCP2170"]);
    if consolidated.is_none() && parent_only.is_none() {
        table.require(&["BHCK2170", "BHCP2170"])?;
    }
    let name_col = table.column(&["RSSD9017"]);

    let mut reports = Vec::new();
    let mut unparsed = 0;
    for row in table.rows() {
        let (Some(identifier), Some(quarter_end)) = (
            cell(row, Some(id_col)).and_then(normalize_rssd),
            cell(row, Some(date_col)).and_then(parse_loose_date),
        ) else {
            unparsed += 1;
            continue;
        };
        let total = numeric_cell(row, consolidated).or_else(|| numeric_cell(row, parent_only));
        reports.push(FinancialReport {
            kind: InstitutionKind::HoldingCompany,
            identifier: Some(identifier),
            institution_name: cell(row, name_col).map(normalize_name),
            quarter_end,
            total_assets: total.map(|v| v * THOUSANDS),
        });
    }
    Ok((reports, unparsed))
}

fn find_case_insensitive(dir: &Path, file_name: &str) -> Option<PathBuf> {
    fs::read_dir(dir).ok()?.filter_map(|e| e.ok().map(|e| e.path())).find(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(file_name))
    })
}

/// Read every report file of `kind` under `dir`. Unreadable files are
/// logged and skipped.
pub fn build_reports(kind: InstitutionKind, dir: &Path, events: &mut Vec<BuildEvent>) -> BuildResult<Vec<FinancialReport>> {
    let mut reports = Vec::new();
    let mut unparsed = 0;
    let mut absorb = |result: BuildResult<(Vec<FinancialReport>, usize)>, label: &str, events: &mut Vec<BuildEvent>| {
        match result {
            Ok((rows, bad)) => {
                log::debug!("[financial] {label}: {} rows", rows.len());
                unparsed += bad;
                reports.extend(rows);
            }
            Err(e) => events.push(BuildEvent::source_skipped(Stage::Financial, label, &e.to_string())),
        }
    };

    match kind {
        InstitutionKind::Bank | InstitutionKind::HoldingCompany => {
            let mut files = Vec::new();
            collect_txt_files(dir, kind == InstitutionKind::Bank, &mut files)?;
            files.sort();
            for file in files {
                let label = file.display().to_string();
                let parsed = if kind == InstitutionKind::Bank {
                    parse_bank_call_report(&file)
                } else {
                    parse_holding_company_report(&file)
                };
                absorb(parsed, &label, events);
            }
        }
        InstitutionKind::CreditUnion => {
            let mut periods: Vec<PathBuf> = fs::read_dir(dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_dir())
                .collect();
            periods.sort();
            for period in periods {
                let label = period.display().to_string();
                match (find_case_insensitive(&period, "foicu.txt"), find_case_insensitive(&period, "fs220.txt")) {
                    (Some(foicu), Some(fs220)) => absorb(parse_credit_union_period(&foicu, &fs220), &label, events),
                    _ => events.push(BuildEvent::source_skipped(
                        Stage::Financial,
                        &label,
                        "foicu.txt or fs220.txt missing",
                    )),
                }
            }
        }
    }

    if unparsed > 0 {
        events.push(BuildEvent::rows_dropped(
            Stage::Financial,
            &format!("{}: unparseable identifier or date", kind.as_str()),
            unparsed,
        ));
    }
    events.push(BuildEvent::row_count(Stage::Financial, &format!("{} report rows", kind.as_str()), reports.len()));
    let deduped = dedup_reports(reports);
    events.push(BuildEvent::row_count(Stage::Financial, &format!("{} after dedup", kind.as_str()), deduped.len()));
    Ok(deduped)
}

/// Cached entry point for one kind's reports.
pub fn load_reports(
    kind: InstitutionKind,
    dir: &Path,
    cache_path: &Path,
    rebuild: bool,
    events: &mut Vec<BuildEvent>,
) -> BuildResult<Vec<FinancialReport>> {
    cache::load_or_build(cache_path, rebuild, Stage::Financial, events, |ev| build_reports(kind, dir, ev))
}

/// At most one row per `(identifier, quarter_end)`: the first row carrying
/// a value wins, else the first row. Rows without an identifier pass through.
pub fn dedup_reports(reports: Vec<FinancialReport>) -> Vec<FinancialReport> {
    let mut out: Vec<FinancialReport> = Vec::with_capacity(reports.len());
    let mut seen: HashMap<(Rssd, NaiveDate), usize> = HashMap::new();
    for report in reports {
        let Some(id) = report.identifier.clone() else {
            out.push(report);
            continue;
        };
        match seen.get(&(id.clone(), report.quarter_end)) {
            Some(&pos) => {
                if out[pos].total_assets.is_none() && report.total_assets.is_some() {
                    out[pos] = report;
                }
            }
            None => {
                seen.insert((id, report.quarter_end), out.len());
                out.push(report);
            }
        }
    }
    out
}

// ── Index and join ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Identifier,
    Name,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialMatch {
    pub kind: InstitutionKind,
    pub tier: MatchTier,
    /// Identifier of the matched report row.
    pub identifier: Option<Rssd>,
    pub total_assets: Option<f64>,
}

#[derive(Debug, Clone)]
struct NameEntry {
    identifier: Option<Rssd>,
    total_assets: Option<f64>,
}

/// One kind's reports, indexed for the two-tier join.
#[derive(Debug, Clone)]
pub struct FinancialIndex {
    pub kind: InstitutionKind,
    by_id: HashMap<(Rssd, NaiveDate), Option<f64>>,
    by_name: HashMap<(String, NaiveDate), NameEntry>,
    ambiguous_pairs: usize,
}

impl FinancialIndex {
    pub fn build(kind: InstitutionKind, reports: &[FinancialReport]) -> Self {
        let mut by_id: HashMap<(Rssd, NaiveDate), Option<f64>> = HashMap::new();
        let mut name_counts: HashMap<(String, NaiveDate), (usize, NameEntry)> = HashMap::new();

        for r in reports.iter().filter(|r| r.kind == kind) {
            if let Some(id) = &r.identifier {
                let slot = by_id.entry((id.clone(), r.quarter_end)).or_insert(None);
                if slot.is_none() {
                    *slot = r.total_assets;
                }
            }
            if let Some(name) = &r.institution_name {
                let entry = name_counts.entry((name.clone(), r.quarter_end)).or_insert((
                    0,
                    NameEntry { identifier: r.identifier.clone(), total_assets: r.total_assets },
                ));
                entry.0 += 1;
            }
        }

        let ambiguous_pairs = name_counts.values().filter(|(n, _)| *n > 1).count();
        let by_name = name_counts
            .into_iter()
            .filter(|(_, (n, _))| *n == 1)
            .map(|(key, (_, entry))| (key, entry))
            .collect();

        Self { kind, by_id, by_name, ambiguous_pairs }
    }

    /// `(name, quarter_end)` pairs excluded from name matching.
    pub fn ambiguous_pairs(&self) -> usize {
        self.ambiguous_pairs
    }

    /// Reported total assets of `identifier` at `quarter_end`.
    pub fn assets_for(&self, identifier: &str, quarter_end: NaiveDate) -> Option<f64> {
        self.by_id
            .get(&(identifier.to_string(), quarter_end))
            .copied()
            .flatten()
    }

    /// Every `(identifier, quarter_end, total_assets)` row.
    pub fn observations(&self) -> impl Iterator<Item = (&str, NaiveDate, Option<f64>)> + '_ {
        self.by_id.iter().map(|((id, date), v)| (id.as_str(), *date, *v))
    }

    /// Identifier match first, then unique-name match.
    pub fn match_record(&self, identifier: Option<&str>, name: &str, quarter_end: NaiveDate) -> Option<FinancialMatch> {
        if let Some(id) = identifier {
            if let Some(total) = self.by_id.get(&(id.to_string(), quarter_end)) {
                return Some(FinancialMatch {
                    kind: self.kind,
                    tier: MatchTier::Identifier,
                    identifier: Some(id.to_string()),
                    total_assets: *total,
                });
            }
        }
        self.by_name
            .get(&(name.to_string(), quarter_end))
            .map(|entry| FinancialMatch {
                kind: self.kind,
                tier: MatchTier::Name,
                identifier: entry.identifier.clone(),
                total_assets: entry.total_assets,
            })
    }
}

/// Per-kind join outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub attempted: usize,
    pub matched_by_id: usize,
    pub matched_by_name: usize,
    pub with_assets: usize,
}

fn has_assets(record: &ComplaintRecord) -> bool {
    record.financial.as_ref().is_some_and(|m| m.total_assets.is_some())
}

/// Join `indexes` (in the order given) against the residual population.
pub fn join_financials(
    records: &mut [ComplaintRecord],
    indexes: &[FinancialIndex],
    events: &mut Vec<BuildEvent>,
) -> Vec<(InstitutionKind, MatchStats)> {
    events.push(BuildEvent::StageStarted { stage: Stage::Financial });
    let mut all_stats = Vec::with_capacity(indexes.len());

    for index in indexes {
        let mut stats = MatchStats::default();
        for record in records.iter_mut() {
            if has_assets(record) {
                continue;
            }
            if record.institution_category.is_some_and(InstitutionCategory::is_name_list_override) {
                continue;
            }
            let Some(quarter_end) = record.reporting_quarter_end() else { continue };

            stats.attempted += 1;
            let Some(m) = index.match_record(record.resolved_identifier.as_deref(), &record.company_name, quarter_end) else {
                continue;
            };
            match m.tier {
                MatchTier::Identifier => stats.matched_by_id += 1,
                MatchTier::Name => stats.matched_by_name += 1,
            }
            if m.total_assets.is_some() {
                stats.with_assets += 1;
            }
            if record.resolved_identifier.is_none() {
                record.resolved_identifier = m.identifier.clone();
            }
            record.institution_category = Some(index.kind.category());
            record.financial = Some(m);
        }

        log::info!(
            "[financial] {}: matched {} by id + {} by name of {} attempted ({} with assets)",
            index.kind.as_str(),
            stats.matched_by_id,
            stats.matched_by_name,
            stats.attempted,
            stats.with_assets
        );
        events.push(BuildEvent::MatchRate {
            kind: index.kind,
            attempted: stats.attempted,
            matched_by_id: stats.matched_by_id,
            matched_by_name: stats.matched_by_name,
        });
        events.push(BuildEvent::AmbiguousNames { kind: index.kind, pairs: index.ambiguous_pairs() });
        all_stats.push((index.kind, stats));
    }

    let with_assets = records.iter().filter(|r| has_assets(r)).count();
    events.push(BuildEvent::StageCompleted { stage: Stage::Financial, rows: with_assets });
    all_stats
}
