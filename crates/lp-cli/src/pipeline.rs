//! Build and estimate stages of a `lifepath` run.

use anyhow::{Context, Result};
use lp_core::{AgeBucket, Frame, IntoFrame, Year, sample_std};
use lp_inference::{
    CoefficientPathExtractor, CoefficientTable, EstimationEngine, EstimationResult, EstimationSpec, FixedEffects,
    KeyResult, SampleFilter, key_result,
};
use lp_panel::{
    BasePanel, CohortPanelAssembler, CohortRobustAssembler, EntryRecord, GdpRecord, LagColumn, LagVar, Metric,
    PanelVariant, RegulationIndexBuilder, RegulationRecord, SectorEntryAggregator, SectorLevel, build_patterns,
};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{RegulationInput, RunConfig};
use crate::{ingest, output};

pub const ROBUST_PANEL: &str = "cohort_robust_panel";
pub const PATTERN_PANEL: &str = "sector_patterns";
pub const REGULATION_INDEX: &str = "regulation_index";

fn column(var: LagVar, lag: u8) -> String {
    LagColumn::new(var, lag).to_string()
}

fn csv_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.csv"))
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelSummary {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub regulation_rows: usize,
    pub gdp_rows: usize,
    pub panels: Vec<PanelSummary>,
}

fn load_regulation(cfg: &RunConfig) -> Result<Vec<RegulationRecord>> {
    match &cfg.inputs.regulation {
        RegulationInput::Documents { words, probabilities } => {
            let docs = ingest::read_documents(words)?;
            let probs = ingest::read_probabilities(probabilities)?;
            let builder = match cfg.baseline_year {
                Some(year) => RegulationIndexBuilder::new().with_baseline_year(year),
                None => RegulationIndexBuilder::new(),
            };
            builder.build(&docs, &probs).context("building the regulation index")
        }
        RegulationInput::Index(path) => {
            Ok(ingest::read_regulation_index(path)?.into_iter().map(RegulationRecord::from).collect())
        }
    }
}

fn regulation_frame(records: &[RegulationRecord]) -> Result<Frame> {
    let names = [
        "year",
        "sector_reg",
        "industry_restrictions_1_0",
        "industry_restrictions_2_0",
        "industry_restrictions_2_0_prev",
        "bartik_iv",
    ];
    let rows = records.iter().map(|r| {
        vec![
            f64::from(r.year),
            f64::from(r.sector.code()),
            r.restrictions_coarse,
            r.restrictions_fine,
            r.restrictions_fine_prev,
            r.bartik_iv,
        ]
    });
    Ok(Frame::from_rows(names.iter().map(|n| n.to_string()).collect(), rows)?)
}

/// Metrics lagged in addition to the assembler defaults.
fn tracked_metrics(cfg: &RunConfig) -> Vec<Metric> {
    cfg.dependent.iter().filter_map(|d| Metric::parse(d)).collect()
}

/// Clean inputs, assemble every panel and persist them under `panels/`.
pub fn build(cfg: &RunConfig) -> Result<BuildSummary> {
    let dir = cfg.panels_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let raw_age = ingest::read_firm_table(&cfg.inputs.sector_age)?;
    let raw_size = ingest::read_firm_table(&cfg.inputs.sector_age_size)?;
    let regulation = load_regulation(cfg)?;
    let gdp: Vec<GdpRecord> = ingest::read_wide_gdp(&cfg.inputs.gdp)?.melt()?;
    tracing::info!(regulation = regulation.len(), gdp = gdp.len(), "auxiliary series ready");

    let bases: Vec<BasePanel> = PanelVariant::ALL
        .par_iter()
        .map(|&variant| {
            let raw = if variant.by_size() { &raw_size } else { &raw_age };
            BasePanel::build(variant, raw).with_context(|| format!("cleaning {}", variant.name()))
        })
        .collect::<Result<_>>()?;
    let sector_age = base_of(&bases, PanelVariant::SectorAge)?;
    let entry_sector = SectorEntryAggregator::new(SectorLevel::AsPanel, false).aggregate(sector_age)?;
    let sector_age_size = base_of(&bases, PanelVariant::SectorAgeSize)?;
    let entry_size = SectorEntryAggregator::new(SectorLevel::AsPanel, true).aggregate(sector_age_size)?;

    let tracked = tracked_metrics(cfg);
    let assembler = |entry: &[EntryRecord]| -> Result<CohortPanelAssembler> {
        Ok(CohortPanelAssembler::new(&regulation, &gdp, entry)?
            .with_max_lag(cfg.max_lag)
            .with_tracked_metrics(tracked.iter().copied()))
    };
    let by_sector = assembler(&entry_sector)?;
    let by_size = assembler(&entry_size)?;

    let mut panels: Vec<PanelSummary> = bases
        .par_iter()
        .map(|base| -> Result<PanelSummary> {
            let variant = base.variant();
            let assembler = if variant.by_size() { &by_size } else { &by_sector };
            let frame = assembler
                .assemble(base)
                .and_then(|panel| panel.to_frame())
                .with_context(|| format!("assembling {}", variant.name()))?;
            persist(&dir, variant.name(), &frame)
        })
        .collect::<Result<_>>()?;

    let ages: Vec<AgeBucket> = cfg.robust_ages.iter().map(|&a| AgeBucket::from_rank(usize::from(a))).collect();
    let robust = CohortRobustAssembler::new(&regulation, &gdp, sector_age)?.assemble(sector_age, &ages)?;
    panels.push(persist(&dir, ROBUST_PANEL, &robust.to_frame()?)?);

    let patterns = build_patterns(sector_age, &regulation, &gdp)?;
    panels.push(persist(&dir, PATTERN_PANEL, &patterns.to_frame()?)?);
    panels.push(persist(&dir, REGULATION_INDEX, &regulation_frame(&regulation)?)?);

    Ok(BuildSummary { regulation_rows: regulation.len(), gdp_rows: gdp.len(), panels })
}

fn base_of(bases: &[BasePanel], variant: PanelVariant) -> Result<&BasePanel> {
    bases.iter().find(|b| b.variant() == variant).with_context(|| format!("{} was not built", variant.name()))
}

fn persist(dir: &Path, name: &str, frame: &Frame) -> Result<PanelSummary> {
    let path = csv_path(dir, name);
    output::write_frame(&path, frame)?;
    Ok(PanelSummary { name: name.to_string(), path, rows: frame.n_rows(), columns: frame.names().len() })
}

/// Outcome of one specification instance.
#[derive(Debug, Clone, Serialize)]
pub struct SpecOutcome {
    pub spec_id: String,
    pub panel: String,
    pub model: String,
    pub dependent: String,
    pub age: Option<u8>,
    pub error: Option<String>,
    pub result: Option<EstimationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateSummary {
    pub n_specs: usize,
    pub n_failed: usize,
    /// Sample s.d. of `L_0_log_restriction` in the sector × age panel.
    pub restriction_std: f64,
    pub key_results: Vec<KeyResult>,
    pub outcomes: Vec<SpecOutcome>,
}

/// One planned fit, with the labels it is reported under.
struct Planned {
    spec: EstimationSpec,
    model: &'static str,
    dependent: String,
    age: Option<u8>,
}

/// Dependent variable with no age-family counterpart (it is a regressor there).
fn entry_rate_column() -> String {
    column(LagVar::EntryRate, 0)
}

fn base_spec(cfg: &RunConfig, id: String, dependent: &str, regressors: &[&str]) -> EstimationSpec {
    EstimationSpec::new(id, dependent, regressors)
        .weighted(Metric::Firms.name())
        .absorb(FixedEffects::two_way("sector", "year"))
        .covariance(cfg.covariance.clone())
        .confidence(cfg.confidence)
}

fn window(cfg: &RunConfig, ages: Option<Vec<u8>>) -> SampleFilter {
    SampleFilter { year_min: Some(cfg.year_min), year_max: Some(cfg.year_max), ages }
}

/// OLS and IV of each dependent variable on the sector panel.
fn sector_family(cfg: &RunConfig, dependents: &[String]) -> Vec<Planned> {
    let restriction = column(LagVar::LogRestriction, 0);
    let instrument = column(LagVar::BartikIv, 0);
    let gdp_0 = column(LagVar::LogGdp, 0);
    let gdp_1 = column(LagVar::LogGdp, 1);

    let mut planned = Vec::new();
    for dep in dependents {
        let ols_regressors = [gdp_0.as_str(), gdp_1.as_str(), restriction.as_str()];
        let ols = base_spec(cfg, format!("{dep}/sector/ols"), dep, &ols_regressors).filter(window(cfg, None));
        let iv = base_spec(cfg, format!("{dep}/sector/iv"), dep, &[gdp_0.as_str(), gdp_1.as_str()])
            .instrument(&restriction, &instrument)
            .filter(window(cfg, None));
        planned.push(Planned { spec: ols, model: "ols", dependent: dep.clone(), age: None });
        planned.push(Planned { spec: iv, model: "iv", dependent: dep.clone(), age: None });
    }
    planned
}

/// IV per age bucket `1..=7` on the sector × age panel, plus the pooled
/// age-dummy IV when `age_dummies` is set.
fn age_family(cfg: &RunConfig, dependents: &[String]) -> Vec<Planned> {
    let restriction = column(LagVar::LogRestriction, 0);
    let instrument = column(LagVar::BartikIv, 0);
    let entry_rate = entry_rate_column();
    let gdp_0 = column(LagVar::LogGdp, 0);
    let regressors = [entry_rate.as_str(), gdp_0.as_str()];
    let ages: Vec<u8> = (1..=AgeBucket::MATURE.get()).collect();

    let mut planned = Vec::new();
    for dep in dependents.iter().filter(|d| **d != entry_rate) {
        for &age in &ages {
            let id = format!("{dep}/sector_age/age_{age}");
            let spec = base_spec(cfg, id, dep, &regressors)
                .instrument(&restriction, &instrument)
                .filter(window(cfg, Some(vec![age])));
            planned.push(Planned { spec, model: "iv", dependent: dep.clone(), age: Some(age) });
        }
        if cfg.age_dummies {
            let fe = FixedEffects { age_dummies: true, ..FixedEffects::two_way("sector", "year") };
            let spec = base_spec(cfg, format!("{dep}/sector_age/pooled"), dep, &regressors)
                .absorb(fe)
                .instrument(&restriction, &instrument)
                .filter(window(cfg, Some(ages.clone())));
            planned.push(Planned { spec, model: "iv_pooled", dependent: dep.clone(), age: None });
        }
    }
    planned
}

fn fit_family(engine: &EstimationEngine, frame: &Frame, panel: &str, planned: Vec<Planned>) -> Vec<SpecOutcome> {
    planned
        .into_par_iter()
        .map(|p| {
            let fitted = engine.fit(frame, &p.spec);
            let (error, result) = match fitted {
                Ok(r) => (None, Some(r)),
                Err(e) => {
                    tracing::warn!(spec = %p.spec.id, panel, error = %e, "specification failed");
                    (Some(e.to_string()), None)
                }
            };
            SpecOutcome {
                spec_id: p.spec.id,
                panel: panel.to_string(),
                model: p.model.to_string(),
                dependent: p.dependent,
                age: p.age,
                error,
                result,
            }
        })
        .collect()
}

/// Fit every specification family on the persisted panels and write the result tables.
pub fn estimate(cfg: &RunConfig) -> Result<EstimateSummary> {
    let panels = cfg.panels_dir();
    let sector_name = PanelVariant::Sector.name();
    let age_name = PanelVariant::SectorAge.name();
    let sector = output::read_frame(&csv_path(&panels, sector_name))?;
    let sector_age = output::read_frame(&csv_path(&panels, age_name))?;
    for (name, frame) in [(sector_name, &sector), (age_name, &sector_age)] {
        if let Some((first, last)) = year_span(frame) {
            tracing::info!(panel = name, rows = frame.n_rows(), first, last, "loaded panel");
        }
    }

    let mut dependents = cfg.dependent.clone();
    dependents.sort();
    dependents.dedup();

    let engine = EstimationEngine::new();
    let mut outcomes = fit_family(&engine, &sector, sector_name, sector_family(cfg, &dependents));
    outcomes.extend(fit_family(&engine, &sector_age, age_name, age_family(cfg, &dependents)));

    let restriction = column(LagVar::LogRestriction, 0);
    let extractor = CoefficientPathExtractor::new(&[restriction.as_str()]);
    let mut table = CoefficientTable::new();
    let mut key_results = Vec::new();
    for o in &outcomes {
        let Some(res) = &o.result else { continue };
        table.extend(extractor.extract(res, o.age));
        if o.panel == sector_name {
            key_results.extend(key_result(&o.dependent, &o.model, res, &restriction));
        }
    }

    let restriction_std = sample_std(sector_age.column(&restriction)?);
    let scaled = table.scaled(restriction_std);

    let dir = cfg.results_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    output::write_records(&csv_path(&dir, "coefficients"), table.records())?;
    output::write_records(&csv_path(&dir, "coefficients_scaled"), scaled.records())?;
    output::write_records(&csv_path(&dir, "key_results"), &key_results)?;

    let n_failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    tracing::info!(specs = outcomes.len(), failed = n_failed, coefficients = table.len(), "estimation finished");
    Ok(EstimateSummary { n_specs: outcomes.len(), n_failed, restriction_std, key_results, outcomes })
}

/// Years spanned by a persisted panel, for progress messages.
pub fn year_span(frame: &Frame) -> Option<(Year, Year)> {
    let years = frame.keys(lp_inference::YEAR_COLUMN).ok()?;
    let present = years.into_iter().flatten();
    let (lo, hi) = present.fold((i64::MAX, i64::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));
    (lo <= hi).then(|| (lo as Year, hi as Year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputPaths;
    use lp_inference::CovarianceMode;

    fn cfg(dependent: &[&str]) -> RunConfig {
        RunConfig {
            inputs: InputPaths {
                sector_age: "a.csv".into(),
                sector_age_size: "b.csv".into(),
                regulation: RegulationInput::Index("r.csv".into()),
                gdp: "g.csv".into(),
            },
            out_dir: "out".into(),
            dependent: dependent.iter().map(|d| d.to_string()).collect(),
            year_min: 1990,
            year_max: 2010,
            covariance: CovarianceMode::Clustered("sector_2".into()),
            max_lag: 6,
            baseline_year: None,
            confidence: 0.9,
            age_dummies: false,
            robust_ages: vec![1],
            threads: 0,
        }
    }

    #[test]
    fn test_sector_family_layout() {
        let c = cfg(&["death_rate"]);
        let planned = sector_family(&c, &c.dependent);
        assert_eq!(planned.len(), 2);
        let ols = &planned[0].spec;
        assert_eq!(ols.regressors, vec!["L_0_log_gdp", "L_1_log_gdp", "L_0_log_restriction"]);
        assert_eq!(ols.weight.as_deref(), Some("firms"));
        assert_eq!(ols.filters.year_min, Some(1990));
        assert_eq!(ols.confidence, 0.9);
        let iv = &planned[1].spec;
        let inst = iv.instrumented.as_ref().unwrap();
        assert_eq!(inst.endogenous, "L_0_log_restriction");
        assert_eq!(inst.instrument, "L_0_bartik_iv");
        assert_eq!(iv.covariance, CovarianceMode::Clustered("sector_2".into()));
    }

    #[test]
    fn test_age_family_skips_entry_rate_dependent() {
        let c = cfg(&["L_0_entry_rate", "death_rate"]);
        let planned = age_family(&c, &c.dependent);
        assert_eq!(planned.len(), 7);
        assert!(planned.iter().all(|p| p.dependent == "death_rate"));
        assert_eq!(planned[0].spec.filters.ages, Some(vec![1]));
        assert_eq!(planned[6].age, Some(7));
        assert_eq!(planned[6].spec.id, "death_rate/sector_age/age_7");
        assert_eq!(planned[0].spec.regressors, vec!["L_0_entry_rate", "L_0_log_gdp"]);
    }

    #[test]
    fn test_pooled_age_dummy_spec() {
        let mut c = cfg(&["death_rate"]);
        c.age_dummies = true;
        let planned = age_family(&c, &c.dependent);
        assert_eq!(planned.len(), 8);
        let pooled = planned.last().unwrap();
        assert_eq!(pooled.spec.id, "death_rate/sector_age/pooled");
        assert_eq!(pooled.age, None);
        assert!(pooled.spec.fixed_effects.age_dummies);
        assert_eq!(pooled.spec.filters.ages, Some((1..=7).collect::<Vec<u8>>()));
        assert!(pooled.spec.required_columns().contains(&"age"));
    }

    #[test]
    fn test_tracked_metrics_from_dependents() {
        let c = cfg(&["death_rate", "L_0_entry_rate", "job_creation_rate"]);
        assert_eq!(tracked_metrics(&c), vec![Metric::DeathRate, Metric::JobCreationRate]);
    }

    #[test]
    fn test_year_span() {
        let f = Frame::from_columns(vec![("year".into(), vec![2003.0, f64::NAN, 1999.0])]).unwrap();
        assert_eq!(year_span(&f), Some((1999, 2003)));
    }
}
