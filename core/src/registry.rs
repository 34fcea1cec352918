//! Registry Normalizer.
//!
//! Loads heterogeneous institution registries (NIC attribute exports,
//! per-vintage depository-institution lists, ...) into one canonical
//! `InstitutionRecord` table. Header offsets and sheet sets come from a
//! fixed lookup keyed by file name; they are never sniffed from content.
//! A file that fails to parse is logged and skipped.

use crate::{
    cache,
    category::{classify, InstitutionCategory},
    error::BuildResult,
    event::{BuildEvent, Stage},
    quarter::{far_future, far_past, parse_loose_date, Quarter},
    table::{cell, RawTable},
    types::{normalize_name, normalize_rssd, Rssd, UNKNOWN_RSSD},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionRecord {
    /// RSSD ID, or [`UNKNOWN_RSSD`] when the source row had none.
    pub identifier: Rssd,
    pub legal_name: String,
    pub charter_type_code: Option<u32>,
    pub entity_type_code: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub city: Option<String>,
    pub state: Option<String>,
    pub source_file: String,
}

impl InstitutionRecord {
    pub fn has_identifier(&self) -> bool {
        self.identifier != UNKNOWN_RSSD
    }

    pub fn category(&self) -> InstitutionCategory {
        classify(self.charter_type_code, self.entity_type_code.as_deref())
    }
}

// ── Source layouts ─────────────────────────────────────────────────

/// How to read one registry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLayout {
    /// 0-based line holding the column names.
    pub header_row: usize,
    pub delimiter: u8,
    /// Sheets to keep when the source is a workbook directory. `None` keeps all.
    pub sheets: Option<&'static [&'static str]>,
}

const DEFAULT_LAYOUT: SourceLayout = SourceLayout { header_row: 0, delimiter: b',', sheets: None };

/// Known problematic files, matched on the exact file stem.
const LAYOUT_EXCEPTIONS: &[(&str, SourceLayout)] = &[
    (
        "201209_CFPB_depository-institutions-list",
        SourceLayout { header_row: 2, delimiter: b',', sheets: None },
    ),
    (
        "201406_CFPB_depository-institutions-list",
        SourceLayout { header_row: 1, delimiter: b',', sheets: Some(&["Banks", "Credit Unions"]) },
    ),
];

/// Family conventions, matched by substring of the file stem.
const LAYOUT_PATTERNS: &[(&str, SourceLayout)] = &[
    (
        "CFPB_depository-institutions-list",
        SourceLayout { header_row: 1, delimiter: b',', sheets: None },
    ),
    ("CSV_ATTRIBUTES", DEFAULT_LAYOUT),
    ("CSV_RELATIONSHIPS", DEFAULT_LAYOUT),
];

/// Look up the layout for a source by its file stem, then by family
/// pattern. Plain `.txt` sources default to tab-delimited.
pub fn layout_for(file_name: &str) -> SourceLayout {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    if let Some((_, layout)) = LAYOUT_EXCEPTIONS.iter().find(|(name, _)| *name == stem) {
        return *layout;
    }
    if let Some((_, layout)) = LAYOUT_PATTERNS.iter().find(|(pat, _)| stem.contains(pat)) {
        return *layout;
    }
    if file_name.to_ascii_lowercase().ends_with(".txt") {
        return SourceLayout { delimiter: b'\t', ..DEFAULT_LAYOUT };
    }
    DEFAULT_LAYOUT
}

/// Vintage encoded as a leading `YYYYMM` in a file name (`201209_...`).
pub fn vintage_from_name(file_name: &str) -> Option<NaiveDate> {
    let prefix: String = file_name.chars().take(6).collect();
    if prefix.len() != 6 || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = prefix[..4].parse().ok()?;
    let month: u32 = prefix[4..].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Registry sources under `dir`: delimited files plus workbook directories
/// (one delimited file per sheet), in name order.
pub fn discover_sources(dir: &Path) -> BuildResult<Vec<PathBuf>> {
    let mut sources: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() || is_delimited_file(p))
        .collect();
    sources.sort();
    Ok(sources)
}

fn is_delimited_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("csv" | "txt")
    )
}

/// Read one source. Workbook directories are read sheet by sheet with the
/// workbook's layout and stacked.
pub fn read_source(path: &Path) -> BuildResult<RawTable> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let layout = layout_for(name);
    if !path.is_dir() {
        return RawTable::read(path, layout.delimiter, layout.header_row);
    }

    let mut sheets: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_delimited_file(p))
        .filter(|p| match layout.sheets {
            None => true,
            Some(keep) => p
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| keep.contains(&stem)),
        })
        .collect();
    sheets.sort();

    let parts = sheets
        .iter()
        .map(|sheet| RawTable::read(sheet, layout.delimiter, layout.header_row))
        .collect::<BuildResult<Vec<_>>>()?;
    Ok(RawTable::concat(&path.display().to_string(), parts))
}

// ── Normalization ──────────────────────────────────────────────────

pub(crate) const ID_COLUMNS: &[&str] = &["#ID_RSSD", "ID_RSSD", "ID", "IDRSSD", "RSSD ID", "RSSD"];
pub(crate) const NAME_COLUMNS: &[&str] = &["NM_LGL", "Institution", "Institution Name", "Name", "Company"];
const CHARTER_COLUMNS: &[&str] = &["CHTR_TYPE_CD"];
const ENTITY_COLUMNS: &[&str] = &["ENTITY_TYPE"];
const START_COLUMNS: &[&str] = &["D_DT_START", "DT_START", "DT_OPEN"];
const END_COLUMNS: &[&str] = &["D_DT_END", "DT_END"];
const CITY_COLUMNS: &[&str] = &["CITY", "City"];
const STATE_COLUMNS: &[&str] = &["STATE_ABBR_NM", "State"];

/// Outcome of normalizing one source table.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<InstitutionRecord>,
    pub missing_name: usize,
    pub inverted_window: usize,
}

/// Map a raw registry table onto `InstitutionRecord`s.
///
/// Rows without a usable identifier get the [`UNKNOWN_RSSD`] sentinel.
/// Sources without validity columns are valid from their vintage month to
/// the end of the vintage quarter when the file name carries one, and
/// always valid otherwise.
pub fn normalize_table(table: &RawTable, source_file: &str) -> BuildResult<Normalized> {
    let name_col = table.require(NAME_COLUMNS)?;
    let id_col = table.column(ID_COLUMNS);
    let charter_col = table.column(CHARTER_COLUMNS);
    let entity_col = table.column(ENTITY_COLUMNS);
    let start_col = table.column(START_COLUMNS);
    let end_col = table.column(END_COLUMNS);
    let city_col = table.column(CITY_COLUMNS);
    let state_col = table.column(STATE_COLUMNS);

    let (default_from, default_until) = match vintage_from_name(source_file) {
        Some(v) if start_col.is_none() && end_col.is_none() => {
            (v, Quarter::from_date(v).end_date())
        }
        _ => (far_past(), far_future()),
    };

    let mut out = Normalized::default();
    for row in table.rows() {
        let Some(raw_name) = cell(row, Some(name_col)) else {
            out.missing_name += 1;
            continue;
        };
        let legal_name = normalize_name(raw_name);
        if legal_name.is_empty() {
            out.missing_name += 1;
            continue;
        }

        let valid_from = cell(row, start_col)
            .and_then(parse_loose_date)
            .unwrap_or(if start_col.is_some() { far_past() } else { default_from });
        let valid_until = cell(row, end_col)
            .and_then(parse_loose_date)
            .unwrap_or(if end_col.is_some() { far_future() } else { default_until });
        if valid_from > valid_until {
            out.inverted_window += 1;
            continue;
        }

        out.records.push(InstitutionRecord {
            identifier: cell(row, id_col)
                .and_then(normalize_rssd)
                .unwrap_or_else(|| UNKNOWN_RSSD.to_string()),
            legal_name,
            charter_type_code: cell(row, charter_col)
                .and_then(|c| c.strip_suffix(".0").unwrap_or(c).parse().ok()),
            entity_type_code: cell(row, entity_col).map(|c| c.trim().to_uppercase()),
            valid_from,
            valid_until,
            city: cell(row, city_col).map(normalize_name),
            state: cell(row, state_col).map(|s| s.trim().to_uppercase()),
            source_file: source_file.to_string(),
        });
    }
    Ok(out)
}

/// Deduplicate by `(identifier, legal_name)`, or by `(legal_name, city,
/// state)` for sentinel-identifier rows.
///
/// Duplicates merge only when their validity windows overlap or touch:
/// the first occurrence keeps its position and attributes, fills codes it
/// lacks from the later row, and widens its window to cover both. A
/// duplicate separated by a gap stays a separate row, so the identifier is
/// never valid in quarters no source row covered.
pub fn dedup_records(records: Vec<InstitutionRecord>) -> Vec<InstitutionRecord> {
    let mut out: Vec<InstitutionRecord> = Vec::with_capacity(records.len());
    let mut seen: HashMap<(String, String, String), Vec<usize>> = HashMap::new();

    for rec in records {
        let key = if rec.has_identifier() {
            (rec.identifier.clone(), rec.legal_name.clone(), String::new())
        } else {
            (
                rec.legal_name.clone(),
                rec.city.clone().unwrap_or_default(),
                format!("{UNKNOWN_RSSD}:{}", rec.state.clone().unwrap_or_default()),
            )
        };
        let positions = seen.entry(key).or_default();
        match positions.iter().copied().find(|&pos| windows_touch(&out[pos], &rec)) {
            Some(pos) => {
                let kept = &mut out[pos];
                if kept.charter_type_code.is_none() {
                    kept.charter_type_code = rec.charter_type_code;
                }
                if kept.entity_type_code.is_none() {
                    kept.entity_type_code = rec.entity_type_code;
                }
                kept.valid_from = kept.valid_from.min(rec.valid_from);
                kept.valid_until = kept.valid_until.max(rec.valid_until);
            }
            None => {
                positions.push(out.len());
                out.push(rec);
            }
        }
    }
    out
}

fn windows_touch(a: &InstitutionRecord, b: &InstitutionRecord) -> bool {
    let day_after = |d: NaiveDate| d.succ_opt().unwrap_or(d);
    a.valid_from <= day_after(b.valid_until) && b.valid_from <= day_after(a.valid_until)
}

/// Read, normalize and deduplicate every source under `dirs`.
pub fn build_registry(dirs: &[PathBuf], events: &mut Vec<BuildEvent>) -> BuildResult<Vec<InstitutionRecord>> {
    let mut all = Vec::new();
    for dir in dirs {
        let sources = match discover_sources(dir) {
            Ok(s) => s,
            Err(e) => {
                events.push(BuildEvent::source_skipped(Stage::Registry, &dir.display().to_string(), &e.to_string()));
                continue;
            }
        };
        for path in sources {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            let normalized = read_source(&path).and_then(|table| normalize_table(&table, &name));
            match normalized {
                Ok(n) => {
                    log::debug!(
                        "[registry] {name}: {} rows ({} without name, {} inverted windows)",
                        n.records.len(),
                        n.missing_name,
                        n.inverted_window
                    );
                    if n.inverted_window > 0 {
                        events.push(BuildEvent::rows_dropped(
                            Stage::Registry,
                            &format!("{name}: valid_from after valid_until"),
                            n.inverted_window,
                        ));
                    }
                    all.extend(n.records);
                }
                Err(e) => events.push(BuildEvent::source_skipped(Stage::Registry, &name, &e.to_string())),
            }
        }
    }
    events.push(BuildEvent::row_count(Stage::Registry, "combined sources", all.len()));

    let deduped = dedup_records(all);
    events.push(BuildEvent::row_count(Stage::Registry, "after dedup", deduped.len()));

    let identified: HashSet<(&str, Option<&str>, Option<&str>)> = deduped
        .iter()
        .filter(|r| r.has_identifier())
        .map(|r| (r.legal_name.as_str(), r.city.as_deref(), r.state.as_deref()))
        .collect();
    let uncovered = deduped
        .iter()
        .filter(|r| !r.has_identifier())
        .filter(|r| !identified.contains(&(r.legal_name.as_str(), r.city.as_deref(), r.state.as_deref())))
        .count();
    events.push(BuildEvent::row_count(Stage::Registry, "sentinel rows without identified twin", uncovered));

    Ok(deduped)
}

/// Cached entry point: reuse `cache_path` unless `rebuild` is set.
pub fn load_registry(
    dirs: &[PathBuf],
    cache_path: &Path,
    rebuild: bool,
    events: &mut Vec<BuildEvent>,
) -> BuildResult<Vec<InstitutionRecord>> {
    events.push(BuildEvent::StageStarted { stage: Stage::Registry });
    let records = cache::load_or_build(cache_path, rebuild, Stage::Registry, events, |ev| {
        build_registry(dirs, ev)
    })?;
    events.push(BuildEvent::StageCompleted { stage: Stage::Registry, rows: records.len() });
    Ok(records)
}
