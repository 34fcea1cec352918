use crate::{
    quarter::{Quarter, QuarterGrid},
    regulation::RegulatorSource,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Input locations. Relative paths resolve against the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub registry_dirs: Vec<PathBuf>,
    pub call_report_dir: PathBuf,
    pub credit_union_dir: PathBuf,
    pub holding_company_dir: PathBuf,
    pub relationship_file: PathBuf,
    pub regulators: Vec<RegulatorSource>,
    pub complaints_file: PathBuf,
    pub cpi_file: PathBuf,
    pub scra_file: PathBuf,
    pub data_broker_file: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            registry_dirs: vec!["input/CFPB/depository_institutions".into(), "input/NIC".into()],
            call_report_dir: "input/FFIEC/CDR Call Reports".into(),
            credit_union_dir: "input/NCUA".into(),
            holding_company_dir: "input/FFIEC/Holding Company Financial Data".into(),
            relationship_file: "input/NIC/CSV_RELATIONSHIPS.csv".into(),
            regulators: vec![RegulatorSource {
                tag: "Depository".to_string(),
                dir: "input/CFPB/depository_institutions".into(),
            }],
            complaints_file: "input/CFPB/complaints.csv".into(),
            cpi_file: "input/CPIAUCSL.csv".into(),
            scra_file: "input/CFPB/cfpb-consumer-reporting-companies_list.csv".into(),
            data_broker_file: "input/Data_Broker_Registry.csv".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub inputs: InputPaths,
    pub cache_dir: PathBuf,
    pub output_file: PathBuf,
    pub grid_start: Quarter,
    pub grid_end: Quarter,
    /// Complaints sent after this quarter are dropped.
    pub last_complaint_quarter: Quarter,
    /// Holding-company subsidiary-sum / reported-total ratio below which
    /// the reported total is kept.
    pub reconciliation_threshold: f64,
    pub max_relationship_depth: u8,
    pub impute_assets: bool,
    pub cpi_base_year: i32,
    pub major_credit_bureaus: Vec<String>,
    /// State code → date the state's privacy law took effect.
    pub state_privacy_laws: BTreeMap<String, NaiveDate>,
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

fn default_state_privacy_laws() -> BTreeMap<String, NaiveDate> {
    [
        ("CA", date(2020, 1, 1)),
        ("VA", date(2023, 1, 1)),
        ("CO", date(2023, 7, 1)),
        ("CT", date(2023, 7, 1)),
        ("UT", date(2023, 12, 31)),
        ("TX", date(2024, 7, 1)),
        ("OR", date(2024, 7, 1)),
        ("FL", date(2024, 7, 1)),
        ("MT", date(2024, 10, 1)),
        ("DE", date(2025, 1, 1)),
        ("NH", date(2025, 1, 1)),
        ("IA", date(2025, 1, 1)),
        ("NE", date(2025, 1, 1)),
        ("NJ", date(2025, 1, 15)),
    ]
    .into_iter()
    .map(|(state, d)| (state.to_string(), d))
    .collect()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            inputs: InputPaths::default(),
            cache_dir: "temp".into(),
            output_file: "output/complaints_enriched.csv".into(),
            grid_start: Quarter { year: 2010, q: 1 },
            grid_end: Quarter { year: 2025, q: 2 },
            last_complaint_quarter: Quarter { year: 2025, q: 1 },
            reconciliation_threshold: 0.3,
            max_relationship_depth: 2,
            impute_assets: true,
            cpi_base_year: 2013,
            major_credit_bureaus: vec![
                "EXPERIAN INFORMATION SOLUTIONS INC.".to_string(),
                "TRANSUNION INTERMEDIATE HOLDINGS, INC.".to_string(),
                "EQUIFAX, INC.".to_string(),
            ],
            state_privacy_laws: default_state_privacy_laws(),
        }
    }
}

impl BuildConfig {
    /// Load from `<data_dir>/config/build_config.json`.
    /// In tests, use BuildConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/config/build_config.json");
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: BuildConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Hard-coded defaults for tests. No regulatory registries; callers
    /// add what a test needs.
    pub fn default_test() -> Self {
        Self {
            inputs: InputPaths { regulators: Vec::new(), ..InputPaths::default() },
            cache_dir: "cache".into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grid_start > self.grid_end {
            anyhow::bail!("grid_start {} is after grid_end {}", self.grid_start, self.grid_end);
        }
        if !(self.reconciliation_threshold.is_finite() && self.reconciliation_threshold >= 0.0) {
            anyhow::bail!("reconciliation_threshold must be a non-negative number");
        }
        if self.max_relationship_depth == 0 {
            anyhow::bail!("max_relationship_depth must be at least 1");
        }
        Ok(())
    }

    pub fn grid(&self) -> anyhow::Result<QuarterGrid> {
        Ok(QuarterGrid::new(self.grid_start, self.grid_end)?)
    }

    /// `path` if absolute, else `data_dir/path`.
    pub fn resolve(data_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            data_dir.join(path)
        }
    }

    pub fn registry_cache(&self, data_dir: &Path) -> PathBuf {
        Self::resolve(data_dir, &self.cache_dir.join("institution_registry.csv"))
    }

    pub fn identity_cache(&self, data_dir: &Path) -> PathBuf {
        Self::resolve(data_dir, &self.cache_dir.join("temporal_identity.csv"))
    }

    pub fn financial_cache(&self, data_dir: &Path, kind: &str) -> PathBuf {
        Self::resolve(data_dir, &self.cache_dir.join(format!("financial_{kind}.csv")))
    }
}
