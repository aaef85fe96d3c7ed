//! `lifepath` run configuration, read once at start-up.

use anyhow::{Result, ensure};
use lp_core::Year;
use lp_inference::CovarianceMode;
use lp_panel::CohortPanelAssembler;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Input tables.
    pub inputs: InputPaths,
    /// Output directory (panels and results are written below it).
    pub out_dir: PathBuf,

    /// Dependent variables evaluated by every estimation family.
    pub dependent: Vec<String>,

    /// First sample year (inclusive).
    #[serde(default = "default_year_min")]
    pub year_min: Year,
    /// Last sample year (inclusive).
    #[serde(default = "default_year_max")]
    pub year_max: Year,

    /// Error-covariance mode shared by all specifications.
    #[serde(default = "default_covariance")]
    pub covariance: CovarianceMode,

    /// Highest lag joined onto each observation.
    #[serde(default = "default_max_lag")]
    pub max_lag: u8,

    /// Shift-share baseline year. Defaults to the earliest probability year.
    #[serde(default)]
    pub baseline_year: Option<Year>,

    /// Two-sided confidence level of reported intervals.
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Also fit a pooled sector × age IV over ages `1..=7` that absorbs one
    /// dummy per age bucket next to the sector and year effects.
    #[serde(default)]
    pub age_dummies: bool,

    /// Age buckets kept in the cohort-robust panel.
    #[serde(default = "default_robust_ages")]
    pub robust_ages: Vec<u8>,

    /// Threads (0 = auto).
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputPaths {
    /// Firm dynamics by (year, 4-digit sector, firm age).
    pub sector_age: PathBuf,
    /// Firm dynamics by (year, sector, firm age, firm size).
    pub sector_age_size: PathBuf,
    /// Regulation source.
    pub regulation: RegulationInput,
    /// Wide sector × year GDP table.
    pub gdp: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulationInput {
    /// Document word counts plus document → industry probabilities; the index
    /// and the shift-share instrument are built from them.
    Documents { words: PathBuf, probabilities: PathBuf },
    /// Pre-aggregated sector-year index (no instrument).
    Index(PathBuf),
}

fn default_year_min() -> Year {
    1986
}

fn default_year_max() -> Year {
    2019
}

fn default_covariance() -> CovarianceMode {
    CovarianceMode::HeteroskedasticRobust
}

fn default_max_lag() -> u8 {
    CohortPanelAssembler::DEFAULT_MAX_LAG
}

fn default_confidence() -> f64 {
    0.95
}

fn default_robust_ages() -> Vec<u8> {
    (1..=7).collect()
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.dependent.is_empty(), "`dependent` must list at least one variable");
        ensure!(
            self.year_min <= self.year_max,
            "year window is empty: year_min {} > year_max {}",
            self.year_min,
            self.year_max
        );
        ensure!(
            self.confidence > 0.0 && self.confidence < 1.0,
            "confidence must lie in (0, 1), got {}",
            self.confidence
        );
        ensure!(self.max_lag >= 1, "max_lag must be at least 1");
        ensure!(self.robust_ages.iter().all(|&a| a <= 7), "robust_ages must lie in 0..=7");
        Ok(())
    }

    /// Persisted panels.
    pub fn panels_dir(&self) -> PathBuf {
        self.out_dir.join("panels")
    }

    /// Coefficient tables and run summaries.
    pub fn results_dir(&self) -> PathBuf {
        self.out_dir.join("results")
    }
}

pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        // Default: YAML (serde_yaml_ng).
        serde_yaml_ng::from_slice(&bytes)?
    };
    cfg.validate()?;
    Ok(cfg)
}
