//! Build diagnostics.
//!
//! RULE: Every row-count checkpoint, match rate, skipped source and
//! reconciliation choice is emitted as a `BuildEvent`. Stages push events;
//! the pipeline persists them to the build log in emission order.

use crate::{
    financial::InstitutionKind,
    quarter::Quarter,
    types::{Rssd, RunId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registry,
    Identity,
    Complaints,
    Financial,
    Hierarchy,
    Reconciliation,
    Regulation,
    Output,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Registry => "registry",
            Stage::Identity => "identity",
            Stage::Complaints => "complaints",
            Stage::Financial => "financial",
            Stage::Hierarchy => "hierarchy",
            Stage::Reconciliation => "reconciliation",
            Stage::Regulation => "regulation",
            Stage::Output => "output",
        }
    }
}

/// Which measure the holding-company reconciliation kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSource {
    ReportedTotal,
    SubsidiarySum,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    RunInitialized {
        run_id: RunId,
    },
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
        rows: usize,
    },
    /// Row-count checkpoint after a filtering or merge step.
    RowCount {
        stage: Stage,
        step: String,
        rows: usize,
    },
    RowsDropped {
        stage: Stage,
        reason: String,
        rows: usize,
    },
    SourceSkipped {
        stage: Stage,
        file: String,
        reason: String,
    },
    CacheHit {
        stage: Stage,
        path: String,
        rows: usize,
    },
    MatchRate {
        kind: InstitutionKind,
        attempted: usize,
        matched_by_id: usize,
        matched_by_name: usize,
    },
    /// `(name, quarter)` pairs excluded from name-based matching.
    AmbiguousNames {
        kind: InstitutionKind,
        pairs: usize,
    },
    AssetsReconciled {
        parent: Rssd,
        quarter: Quarter,
        reported_total: Option<f64>,
        subsidiary_sum: Option<f64>,
        ratio: Option<f64>,
        chosen: AssetSource,
    },
}

impl BuildEvent {
    pub fn row_count(stage: Stage, step: &str, rows: usize) -> Self {
        log::info!("[{}] {step}: {rows} rows", stage.as_str());
        BuildEvent::RowCount { stage, step: step.to_string(), rows }
    }

    pub fn rows_dropped(stage: Stage, reason: &str, rows: usize) -> Self {
        log::info!("[{}] dropped {rows} rows: {reason}", stage.as_str());
        BuildEvent::RowsDropped { stage, reason: reason.to_string(), rows }
    }

    pub fn source_skipped(stage: Stage, file: &str, reason: &str) -> Self {
        log::warn!("[{}] skipping {file}: {reason}", stage.as_str());
        BuildEvent::SourceSkipped {
            stage,
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The stage an event belongs to, for the build-log `stage` column.
    pub fn stage_name(&self) -> &'static str {
        match self {
            BuildEvent::RunInitialized { .. } => "pipeline",
            BuildEvent::StageStarted { stage }
            | BuildEvent::StageCompleted { stage, .. }
            | BuildEvent::RowCount { stage, .. }
            | BuildEvent::RowsDropped { stage, .. }
            | BuildEvent::SourceSkipped { stage, .. }
            | BuildEvent::CacheHit { stage, .. } => stage.as_str(),
            BuildEvent::MatchRate { .. } | BuildEvent::AmbiguousNames { .. } => {
                Stage::Financial.as_str()
            }
            BuildEvent::AssetsReconciled { .. } => Stage::Reconciliation.as_str(),
        }
    }

    /// Stable name of the variant, for the build-log `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            BuildEvent::RunInitialized { .. } => "run_initialized",
            BuildEvent::StageStarted { .. } => "stage_started",
            BuildEvent::StageCompleted { .. } => "stage_completed",
            BuildEvent::RowCount { .. } => "row_count",
            BuildEvent::RowsDropped { .. } => "rows_dropped",
            BuildEvent::SourceSkipped { .. } => "source_skipped",
            BuildEvent::CacheHit { .. } => "cache_hit",
            BuildEvent::MatchRate { .. } => "match_rate",
            BuildEvent::AmbiguousNames { .. } => "ambiguous_names",
            BuildEvent::AssetsReconciled { .. } => "assets_reconciled",
        }
    }
}

/// A persisted build-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub seq: u64,
    pub stage: String,
    pub event_type: String,
    pub payload: String,
}
