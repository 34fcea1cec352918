//! The build pipeline.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Load inputs       (complaints, registries, reports, relationships,
//!                         regulatory registries, name lists, CPI)
//!   2. Quarter cutoff    (drop complaints sent after the last full quarter)
//!   3. Identity          (temporal resolution, then name-list overrides)
//!   4. Financial join    (bank, credit union, holding company; residual only)
//!   5. Hierarchy         (bank-subsidiary sums per holding company)
//!   6. Reconciliation    (panels, imputation, total and lagged assets)
//!   7. Real assets       (CPI deflation)
//!   8. Regulation tags
//!   9. Default category  (anything still uncategorized is "others")
//!
//! RULES:
//!   - Stages take their tables as arguments; no stage reads shared state.
//!   - A missing or unreadable optional source degrades coverage; it never
//!     aborts the run. Only the complaint file is required.
//!   - Every checkpoint is a `BuildEvent`, persisted to the build log.

use crate::{
    category::InstitutionCategory,
    complaint::ComplaintTable,
    config::BuildConfig,
    error::BuildResult,
    event::{BuildEvent, Stage},
    financial::{join_financials, load_reports, FinancialIndex, FinancialReport, InstitutionKind, MatchStats},
    hierarchy::{aggregate_bank_subsidiaries, children_by_parent, expand_links, load_relationships, RelationshipRecord},
    identity::{assign_identities, resolve_identities},
    inflation::{deflate_assets, CpiTable},
    overrides::NameListOverrides,
    reconcile::{assign_total_assets, AssetPanels},
    registry::{load_registry, InstitutionRecord},
    regulation::{tag_regulation, RegulatorSource, RegulatoryRegistry, NO_REGULATION},
    store::BuildStore,
    types::RunId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which caches to ignore and regenerate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildFlags {
    pub registry: bool,
    pub financials: bool,
}

impl RebuildFlags {
    pub fn all() -> Self {
        Self { registry: true, financials: true }
    }
}

/// Everything the enrichment stages consume.
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub complaints: ComplaintTable,
    pub registry: Vec<InstitutionRecord>,
    /// In attempt order.
    pub reports: Vec<(InstitutionKind, Vec<FinancialReport>)>,
    pub relationships: Vec<RelationshipRecord>,
    pub regulatory: RegulatoryRegistry,
    pub overrides: NameListOverrides,
    pub cpi: Option<CpiTable>,
    /// Ignore the cached identity table. Set whenever the registry did not
    /// come from its own cache.
    pub rebuild_identities: bool,
}

/// End-of-run figures, printed by the driver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildSummary {
    pub run_id: RunId,
    pub rows_in: usize,
    pub rows_out: usize,
    pub registry_rows: usize,
    pub match_stats: Vec<(InstitutionKind, MatchStats)>,
    pub categories: BTreeMap<String, usize>,
    pub with_total_assets: usize,
    pub with_real_assets: usize,
    pub regulated: usize,
    pub reconciled_parents: usize,
    pub events: usize,
    pub output: Option<PathBuf>,
}

pub struct BuildPipeline {
    pub run_id: RunId,
    pub config: BuildConfig,
    data_dir: PathBuf,
    store: BuildStore,
    events: Vec<BuildEvent>,
    persisted: usize,
}

impl BuildPipeline {
    /// Migrate the store and open a run.
    pub fn new(config: BuildConfig, data_dir: impl Into<PathBuf>, store: BuildStore) -> BuildResult<Self> {
        let data_dir = data_dir.into();
        let run_id = uuid::Uuid::new_v4().to_string();
        store.migrate()?;
        store.insert_run(
            &run_id,
            env!("CARGO_PKG_VERSION"),
            &data_dir.display().to_string(),
            &serde_json::to_string(&config)?,
        )?;
        log::info!("[pipeline] run {run_id} over {}", data_dir.display());
        Ok(Self {
            events: vec![BuildEvent::RunInitialized { run_id: run_id.clone() }],
            run_id,
            config,
            data_dir,
            store,
            persisted: 0,
        })
    }

    fn path(&self, p: &Path) -> PathBuf {
        BuildConfig::resolve(&self.data_dir, p)
    }

    pub fn events(&self) -> &[BuildEvent] {
        &self.events
    }

    pub fn store(&self) -> &BuildStore {
        &self.store
    }

    /// Persist events emitted since the last flush.
    pub fn flush_events(&mut self) -> BuildResult<()> {
        let pending = &self.events[self.persisted..];
        if !pending.is_empty() {
            self.store.append_events(&self.run_id, self.persisted as u64, pending)?;
            self.persisted = self.events.len();
        }
        Ok(())
    }

    // ── Stage 1 ────────────────────────────────────────────────

    pub fn load_inputs(&mut self, rebuild: RebuildFlags) -> BuildResult<PipelineInputs> {
        let inputs = self.config.inputs.clone();
        let events = &mut self.events;

        let complaints = ComplaintTable::load(&BuildConfig::resolve(&self.data_dir, &inputs.complaints_file), events)?;

        let registry_dirs: Vec<PathBuf> = inputs
            .registry_dirs
            .iter()
            .map(|d| BuildConfig::resolve(&self.data_dir, d))
            .collect();
        let before = events.len();
        let registry = load_registry(
            &registry_dirs,
            &self.config.registry_cache(&self.data_dir),
            rebuild.registry,
            events,
        )?;
        let registry_cached = events[before..]
            .iter()
            .any(|e| matches!(e, BuildEvent::CacheHit { stage: Stage::Registry, .. }));

        let mut reports = Vec::with_capacity(InstitutionKind::ATTEMPT_ORDER.len());
        for kind in InstitutionKind::ATTEMPT_ORDER {
            let dir = match kind {
                InstitutionKind::Bank => &inputs.call_report_dir,
                InstitutionKind::CreditUnion => &inputs.credit_union_dir,
                InstitutionKind::HoldingCompany => &inputs.holding_company_dir,
            };
            let dir = BuildConfig::resolve(&self.data_dir, dir);
            let cache = self.config.financial_cache(&self.data_dir, kind.as_str());
            let rows = match load_reports(kind, &dir, &cache, rebuild.financials, events) {
                Ok(rows) => rows,
                Err(e) => {
                    events.push(BuildEvent::source_skipped(Stage::Financial, &dir.display().to_string(), &e.to_string()));
                    Vec::new()
                }
            };
            reports.push((kind, rows));
        }

        let relationship_file = BuildConfig::resolve(&self.data_dir, &inputs.relationship_file);
        let relationships = load_relationships(&relationship_file, events).unwrap_or_else(|e| {
            events.push(BuildEvent::source_skipped(
                Stage::Hierarchy,
                &relationship_file.display().to_string(),
                &e.to_string(),
            ));
            Vec::new()
        });

        let regulators: Vec<_> = inputs
            .regulators
            .iter()
            .map(|r| RegulatorSource {
                tag: r.tag.clone(),
                dir: BuildConfig::resolve(&self.data_dir, &r.dir),
            })
            .collect();
        let regulatory = RegulatoryRegistry::load(&regulators, events);
        events.push(BuildEvent::row_count(Stage::Regulation, "regulatory regimes loaded", regulatory.regime_count()));

        let overrides = NameListOverrides::load(
            &self.config.major_credit_bureaus,
            &BuildConfig::resolve(&self.data_dir, &inputs.scra_file),
            &BuildConfig::resolve(&self.data_dir, &inputs.data_broker_file),
            events,
        );

        let cpi_file = BuildConfig::resolve(&self.data_dir, &inputs.cpi_file);
        let cpi = match CpiTable::load(&cpi_file) {
            Ok(cpi) => Some(cpi),
            Err(e) => {
                events.push(BuildEvent::source_skipped(Stage::Reconciliation, &cpi_file.display().to_string(), &e.to_string()));
                None
            }
        };

        Ok(PipelineInputs {
            complaints,
            registry,
            reports,
            relationships,
            regulatory,
            overrides,
            cpi,
            rebuild_identities: !registry_cached,
        })
    }

    // ── Stages 2–9 ─────────────────────────────────────────────

    /// Enrich the complaint table in place of `inputs`.
    pub fn enrich(&mut self, inputs: PipelineInputs) -> BuildResult<(ComplaintTable, Vec<(InstitutionKind, MatchStats)>)> {
        let grid = self.config.grid()?;
        let identity_cache = self.config.identity_cache(&self.data_dir);
        let PipelineInputs {
            mut complaints,
            registry,
            reports,
            relationships,
            regulatory,
            overrides,
            cpi,
            rebuild_identities,
        } = inputs;
        let events = &mut self.events;

        complaints.truncate_after(self.config.last_complaint_quarter, events);
        let records = &mut complaints.records;

        let identities = resolve_identities(&registry, grid, &identity_cache, rebuild_identities, events)?;
        assign_identities(records, &identities, events);
        overrides.apply(records, events);

        let indexes: Vec<FinancialIndex> = reports
            .iter()
            .map(|(kind, rows)| FinancialIndex::build(*kind, rows))
            .collect();
        let stats = join_financials(records, &indexes, events);

        let links = expand_links(&relationships, grid, self.config.max_relationship_depth);
        let empty_banks;
        let bank_index = match indexes.iter().find(|i| i.kind == InstitutionKind::Bank) {
            Some(index) => index,
            None => {
                empty_banks = FinancialIndex::build(InstitutionKind::Bank, &[]);
                &empty_banks
            }
        };
        let aggregates = aggregate_bank_subsidiaries(&links, &identities, bank_index, events);

        let panels = AssetPanels::build(
            grid,
            &indexes,
            &aggregates,
            self.config.reconciliation_threshold,
            self.config.impute_assets,
        );
        assign_total_assets(records, &panels, events);

        if let Some(cpi) = &cpi {
            deflate_assets(records, cpi, self.config.cpi_base_year);
        }

        tag_regulation(records, &regulatory, &children_by_parent(&links), events);

        let mut defaulted = 0;
        for record in records.iter_mut().filter(|r| r.institution_category.is_none()) {
            record.institution_category = Some(InstitutionCategory::Others);
            defaulted += 1;
        }
        events.push(BuildEvent::row_count(Stage::Output, "defaulted to others", defaulted));

        Ok((complaints, stats))
    }

    /// Full run: load, enrich, write the output table, persist the log.
    pub fn run(&mut self, rebuild: RebuildFlags) -> BuildResult<BuildSummary> {
        let inputs = self.load_inputs(rebuild)?;
        let rows_in = inputs.complaints.len();
        let registry_rows = inputs.registry.len();
        self.flush_events()?;

        let (table, match_stats) = self.enrich(inputs)?;
        let output = self.path(&self.config.output_file.clone());
        table.write(&output, &self.config.state_privacy_laws)?;
        self.events.push(BuildEvent::StageCompleted { stage: Stage::Output, rows: table.len() });
        log::info!("[output] wrote {} rows to {}", table.len(), output.display());

        let mut summary = summarize(&table, &self.events);
        summary.run_id = self.run_id.clone();
        summary.rows_in = rows_in;
        summary.registry_rows = registry_rows;
        summary.match_stats = match_stats;
        summary.output = Some(output);

        self.flush_events()?;
        summary.events = self.persisted;
        self.store.complete_run(&self.run_id, summary.rows_out)?;
        Ok(summary)
    }
}

/// Counts over an enriched table.
pub fn summarize(table: &ComplaintTable, events: &[BuildEvent]) -> BuildSummary {
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    for record in &table.records {
        let name = record
            .institution_category
            .map(|c| c.as_str().to_string())
            .unwrap_or_default();
        *categories.entry(name).or_default() += 1;
    }
    BuildSummary {
        rows_out: table.len(),
        categories,
        with_total_assets: table.records.iter().filter(|r| r.total_assets.is_some()).count(),
        with_real_assets: table.records.iter().filter(|r| r.real_total_assets.is_some()).count(),
        regulated: table
            .records
            .iter()
            .filter(|r| r.regulation_tag.as_deref().is_some_and(|t| t != NO_REGULATION))
            .count(),
        reconciled_parents: events
            .iter()
            .filter(|e| matches!(e, BuildEvent::AssetsReconciled { .. }))
            .count(),
        ..BuildSummary::default()
    }
}
