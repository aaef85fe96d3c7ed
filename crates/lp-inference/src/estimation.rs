//! Declarative panel estimation: weighted two-way fixed-effects OLS and 2SLS
//! with robust or clustered standard errors.
//!
//! A fit runs in fixed stages: sample filters and the complete-case
//! restriction, fixed-effect absorption (MAP), `√w` scaling, collinearity
//! screening, least squares, sandwich covariance, then normal-based inference.

use std::collections::{BTreeMap, BTreeSet};

use lp_core::{Error, Frame, Result, Year, is_present};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::econometrics::covariance::{CovarianceMode, cluster_robust_cov, heteroskedastic_cov, std_errors};
use crate::econometrics::hdfe::FixedEffectsSolver;
use crate::econometrics::linear::{
    COLLINEARITY_TOL, FirstStage, LeastSquares, independent_columns, least_squares, rss, to_matrix, two_stage,
};

/// Column holding the observation year.
pub const YEAR_COLUMN: &str = "year";
/// Column holding the age bucket.
pub const AGE_COLUMN: &str = "age";
/// Name of the intercept added when no fixed effect is absorbed.
pub const INTERCEPT: &str = "const";

/// One endogenous regressor and its excluded instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrumented {
    /// Endogenous regressor.
    pub endogenous: String,
    /// Excluded instrument.
    pub instrument: String,
}

/// Absorbed fixed-effect axes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedEffects {
    /// Cross-sectional entity column.
    pub entity: Option<String>,
    /// Time column.
    pub time: Option<String>,
    /// Also absorb one dummy per age bucket.
    #[serde(default)]
    pub age_dummies: bool,
}

impl FixedEffects {
    /// Entity and time effects.
    pub fn two_way(entity: &str, time: &str) -> Self {
        Self { entity: Some(entity.into()), time: Some(time.into()), age_dummies: false }
    }

    fn columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.entity.iter().chain(&self.time).map(String::as_str).collect();
        if self.age_dummies {
            cols.push(AGE_COLUMN);
        }
        cols
    }
}

/// Row filters applied before the complete-case restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFilter {
    /// Keep `year >= year_min`.
    pub year_min: Option<Year>,
    /// Keep `year <= year_max`.
    pub year_max: Option<Year>,
    /// Keep only these age buckets.
    pub ages: Option<Vec<u8>>,
}

/// Declarative regression specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationSpec {
    /// Identifier used in logs and result tables.
    pub id: String,
    /// Dependent variable.
    pub dependent: String,
    /// Exogenous regressors, in order.
    pub regressors: Vec<String>,
    /// Instrumented regressor, for 2SLS.
    pub instrumented: Option<Instrumented>,
    /// Weight column (strictly positive weights only).
    pub weight: Option<String>,
    /// Absorbed fixed effects.
    pub fixed_effects: FixedEffects,
    /// Error-covariance mode.
    pub covariance: CovarianceMode,
    /// Sample filters.
    pub filters: SampleFilter,
    /// Two-sided confidence level.
    pub confidence: f64,
}

impl EstimationSpec {
    /// OLS of `dependent` on `regressors` with heteroskedasticity-robust errors and no fixed effects.
    pub fn new(id: impl Into<String>, dependent: impl Into<String>, regressors: &[&str]) -> Self {
        Self {
            id: id.into(),
            dependent: dependent.into(),
            regressors: regressors.iter().map(|r| r.to_string()).collect(),
            instrumented: None,
            weight: None,
            fixed_effects: FixedEffects::default(),
            covariance: CovarianceMode::HeteroskedasticRobust,
            filters: SampleFilter::default(),
            confidence: 0.95,
        }
    }

    /// Instrument `endogenous` with `instrument`.
    pub fn instrument(mut self, endogenous: &str, instrument: &str) -> Self {
        self.instrumented = Some(Instrumented { endogenous: endogenous.into(), instrument: instrument.into() });
        self
    }

    /// Weight observations by `column`.
    pub fn weighted(mut self, column: &str) -> Self {
        self.weight = Some(column.into());
        self
    }

    /// Absorb these fixed effects.
    pub fn absorb(mut self, fe: FixedEffects) -> Self {
        self.fixed_effects = fe;
        self
    }

    /// Use this covariance mode.
    pub fn covariance(mut self, mode: CovarianceMode) -> Self {
        self.covariance = mode;
        self
    }

    /// Restrict the sample.
    pub fn filter(mut self, filters: SampleFilter) -> Self {
        self.filters = filters;
        self
    }

    /// Confidence level of reported intervals.
    pub fn confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }

    /// Every column the fit reads.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = vec![self.dependent.as_str()];
        cols.extend(self.regressors.iter().map(String::as_str));
        if let Some(iv) = &self.instrumented {
            cols.push(&iv.endogenous);
            cols.push(&iv.instrument);
        }
        cols.extend(self.weight.as_deref());
        cols.extend(self.fixed_effects.columns());
        cols.extend(self.covariance.cluster_column());
        if self.filters.year_min.is_some() || self.filters.year_max.is_some() {
            cols.push(YEAR_COLUMN);
        }
        if self.filters.ages.is_some() {
            cols.push(AGE_COLUMN);
        }
        let mut seen = BTreeSet::new();
        cols.retain(|c| seen.insert(*c));
        cols
    }
}

/// Inference for one regressor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    /// Regressor name.
    pub name: String,
    /// Point estimate.
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
    /// Lower confidence bound.
    pub lower: f64,
    /// Upper confidence bound.
    pub upper: f64,
    /// Two-sided p-value (normal reference).
    pub p_value: f64,
}

impl Coefficient {
    /// Confidence interval excludes zero.
    pub fn significant(&self) -> bool {
        self.lower > 0.0 || self.upper < 0.0
    }
}

/// Output of one specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationResult {
    /// Specification id.
    pub spec_id: String,
    /// Kept regressors, exogenous first, endogenous last.
    pub coefficients: Vec<Coefficient>,
    /// Regressors dropped as absorbed or collinear.
    pub dropped: Vec<String>,
    /// Observations after filtering.
    pub n_obs: usize,
    /// Number of clusters, when clustered.
    pub n_clusters: Option<usize>,
    /// Degrees of freedom absorbed by fixed effects.
    pub df_absorbed: usize,
    /// Within R² (weighted).
    pub r_squared_within: f64,
    /// Confidence level of the intervals.
    pub confidence: f64,
    /// Covariance mode used.
    pub covariance: CovarianceMode,
    /// First-stage diagnostics, for IV.
    pub first_stage: Option<FirstStage>,
}

impl EstimationResult {
    /// Coefficient on `name`, if it was kept.
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

/// Rows surviving filters and the complete-case restriction.
struct Sample<'a> {
    rows: Vec<usize>,
    frame: &'a Frame,
}

impl<'a> Sample<'a> {
    fn select(frame: &'a Frame, spec: &EstimationSpec) -> Result<Self> {
        let required = spec.required_columns();
        let columns = required.iter().map(|c| frame.column(c)).collect::<Result<Vec<&[f64]>>>()?;
        let integral: BTreeSet<&str> = spec
            .fixed_effects
            .columns()
            .into_iter()
            .chain(spec.covariance.cluster_column())
            .collect();
        let weight = spec.weight.as_deref().map(|w| frame.column(w)).transpose()?;
        let year = frame.column(YEAR_COLUMN).ok();
        let age = frame.column(AGE_COLUMN).ok();
        let f = &spec.filters;

        let rows: Vec<usize> = (0..frame.n_rows())
            .filter(|&i| {
                required.iter().zip(&columns).all(|(name, col)| {
                    let v = col[i];
                    is_present(v) && (!integral.contains(name) || v.fract() == 0.0)
                })
            })
            .filter(|&i| weight.is_none_or(|w| w[i] > 0.0))
            .filter(|&i| {
                let y = year.map_or(f64::NAN, |c| c[i]);
                f.year_min.is_none_or(|m| y >= f64::from(m)) && f.year_max.is_none_or(|m| y <= f64::from(m))
            })
            .filter(|&i| {
                f.ages.as_ref().is_none_or(|ages| age.is_some_and(|c| ages.iter().any(|&a| f64::from(a) == c[i])))
            })
            .collect();

        if rows.is_empty() {
            return Err(Error::EmptySample { spec: spec.id.clone() });
        }
        Ok(Self { rows, frame })
    }

    fn n(&self) -> usize {
        self.rows.len()
    }

    fn take(&self, name: &str) -> Result<Vec<f64>> {
        let col = self.frame.column(name)?;
        Ok(self.rows.iter().map(|&i| col[i]).collect())
    }

    /// Dense 0-based ids of an integral key column.
    fn group_ids(&self, name: &str) -> Result<Vec<usize>> {
        let mut levels: BTreeMap<i64, usize> = BTreeMap::new();
        let keys = self.take(name)?;
        let mut ids = Vec::with_capacity(keys.len());
        for k in keys {
            let next = levels.len();
            ids.push(*levels.entry(k as i64).or_insert(next));
        }
        Ok(ids)
    }
}

/// Fits [`EstimationSpec`]s against panels.
#[derive(Debug, Clone)]
pub struct EstimationEngine {
    map_tol: f64,
    collinearity_tol: f64,
}

impl Default for EstimationEngine {
    fn default() -> Self {
        Self { map_tol: 1e-10, collinearity_tol: COLLINEARITY_TOL }
    }
}

impl EstimationEngine {
    /// Engine with default tolerances.
    pub fn new() -> Self {
        Self::default()
    }

    /// MAP convergence tolerance, relative to each column's largest absolute entry.
    pub fn with_map_tol(mut self, tol: f64) -> Self {
        self.map_tol = tol;
        self
    }

    /// Fit every spec independently (in parallel); failures stay with their spec.
    pub fn fit_many(&self, frame: &Frame, specs: &[EstimationSpec]) -> Vec<(String, Result<EstimationResult>)> {
        specs.par_iter().map(|s| (s.id.clone(), self.fit(frame, s))).collect()
    }

    /// Fit one specification.
    pub fn fit(&self, frame: &Frame, spec: &EstimationSpec) -> Result<EstimationResult> {
        if !(spec.confidence > 0.0 && spec.confidence < 1.0) {
            return Err(Error::Validation(format!("{}: confidence must be in (0, 1)", spec.id)));
        }
        let sample = Sample::select(frame, spec)?;
        let n = sample.n();
        let weights = match &spec.weight {
            Some(w) => sample.take(w)?,
            None => vec![1.0; n],
        };
        let sqrt_w: Vec<f64> = weights.iter().map(|w| w.sqrt()).collect();

        // Raw columns, exogenous block first; the endogenous regressor and instrument follow.
        let mut names: Vec<String> = spec.regressors.clone();
        let mut raw: Vec<Vec<f64>> = spec.regressors.iter().map(|r| sample.take(r)).collect::<Result<_>>()?;
        let fe_cols = spec.fixed_effects.columns();
        if fe_cols.is_empty() {
            names.insert(0, INTERCEPT.to_string());
            raw.insert(0, vec![1.0; n]);
        }
        let k_exog = raw.len();
        if let Some(iv) = &spec.instrumented {
            raw.push(sample.take(&iv.endogenous)?);
            raw.push(sample.take(&iv.instrument)?);
        }
        let y_raw = sample.take(&spec.dependent)?;

        let (solver, df_absorbed) = if fe_cols.is_empty() {
            (None, 0)
        } else {
            let groups = fe_cols.iter().map(|c| sample.group_ids(c)).collect::<Result<Vec<_>>>()?;
            let solver = FixedEffectsSolver::weighted(groups, weights.clone())?.with_tol(self.map_tol);
            let df = solver.degrees_of_freedom_absorbed();
            (Some(solver), df)
        };
        let transform = |v: &[f64]| -> Result<Vec<f64>> {
            let dm = match &solver {
                Some(s) => s.partial_out(v)?,
                None => v.to_vec(),
            };
            Ok(dm.iter().zip(&sqrt_w).map(|(a, s)| a * s).collect())
        };
        let scaled_norm =
            |v: &[f64]| v.iter().zip(&sqrt_w).map(|(a, s)| (a * s).powi(2)).sum::<f64>().sqrt();

        let y = transform(&y_raw)?;
        let cols = raw.iter().map(|c| transform(c)).collect::<Result<Vec<_>>>()?;
        let scale: Vec<f64> = raw.iter().map(|c| scaled_norm(c)).collect();

        // Structural regressors: exogenous block plus the endogenous column, if any.
        let n_structural = k_exog + usize::from(spec.instrumented.is_some());
        let refs: Vec<&[f64]> = cols[..n_structural].iter().map(Vec::as_slice).collect();
        let keep = independent_columns(&refs, &scale[..n_structural], self.collinearity_tol);
        let dropped: Vec<String> =
            names.iter().zip(&keep).filter(|(_, k)| !**k).map(|(name, _)| name.clone()).collect();
        if !dropped.is_empty() {
            log::warn!("{}: dropped absorbed or collinear regressors {:?}", spec.id, dropped);
        }

        let kept_exog: Vec<usize> = (0..k_exog).filter(|&j| keep[j]).collect();
        let mut kept_names: Vec<String> = kept_exog.iter().map(|&j| names[j].clone()).collect();
        let exog = to_matrix(&kept_exog.iter().map(|&j| cols[j].as_slice()).collect::<Vec<_>>(), n);
        let y_vec = DVector::from_column_slice(&y);

        let (fit, design, first_stage): (LeastSquares, DMatrix<f64>, Option<FirstStage>) = match &spec.instrumented {
            None => {
                if kept_exog.is_empty() {
                    return Err(Error::Computation(format!("{}: every regressor was dropped", spec.id)));
                }
                (least_squares(&exog, &y_vec)?, exog, None)
            }
            Some(iv) => {
                if !keep[k_exog] {
                    return Err(Error::Computation(format!(
                        "{}: endogenous regressor `{}` is absorbed or collinear",
                        spec.id, iv.endogenous
                    )));
                }
                let mut z_check: Vec<&[f64]> = kept_exog.iter().map(|&j| cols[j].as_slice()).collect();
                z_check.push(&cols[k_exog + 1]);
                let mut z_scale: Vec<f64> = kept_exog.iter().map(|&j| scale[j]).collect();
                z_scale.push(scale[k_exog + 1]);
                if !independent_columns(&z_check, &z_scale, self.collinearity_tol).last().copied().unwrap_or(false) {
                    return Err(Error::Computation(format!(
                        "{}: instrument `{}` is absorbed or collinear with the exogenous regressors",
                        spec.id, iv.instrument
                    )));
                }
                kept_names.push(iv.endogenous.clone());
                let endog = DVector::from_column_slice(&cols[k_exog]);
                let z = DMatrix::from_column_slice(n, 1, &cols[k_exog + 1]);
                let ts = two_stage(&y_vec, &exog, &endog, &z, df_absorbed)?;
                (ts.fit, ts.design, Some(ts.first_stage))
            }
        };

        let p = kept_names.len();
        let df_resid = n.saturating_sub(p + df_absorbed);
        if df_resid == 0 {
            return Err(Error::Computation(format!(
                "{}: no residual degrees of freedom (n = {}, k = {}, absorbed = {})",
                spec.id, n, p, df_absorbed
            )));
        }

        let (cov, n_clusters) = match &spec.covariance {
            CovarianceMode::Clustered(col) => {
                let ids: Vec<i64> = sample.take(col)?.into_iter().map(|v| v as i64).collect();
                let (cov, g) = cluster_robust_cov(&design, &fit.residuals, &fit.bread, &ids);
                if g < 2 {
                    log::warn!("{}: only {} cluster(s) in `{}`", spec.id, g, col);
                }
                (cov, Some(g))
            }
            CovarianceMode::HeteroskedasticRobust => {
                (heteroskedastic_cov(&design, &fit.residuals, &fit.bread, df_absorbed), None)
            }
        };
        let se = std_errors(&cov);

        let tss: f64 = if solver.is_some() {
            y.iter().map(|v| v * v).sum()
        } else {
            let w_sum: f64 = weights.iter().sum();
            let mean = y_raw.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>() / w_sum;
            y_raw.iter().zip(&weights).map(|(a, w)| w * (a - mean).powi(2)).sum()
        };
        let r_squared_within = if tss > 0.0 { 1.0 - rss(&fit.residuals) / tss } else { 0.0 };

        let normal = Normal::new(0.0, 1.0).map_err(|e| Error::Computation(format!("normal reference: {e}")))?;
        let z_crit = normal.inverse_cdf(0.5 + spec.confidence / 2.0);
        let coefficients = kept_names
            .into_iter()
            .zip(fit.beta.iter().zip(&se))
            .map(|(name, (&estimate, &std_error))| {
                let t = estimate / std_error;
                let p_value = if t.is_finite() { 2.0 * (1.0 - normal.cdf(t.abs())) } else { f64::NAN };
                Coefficient {
                    name,
                    estimate,
                    std_error,
                    lower: estimate - z_crit * std_error,
                    upper: estimate + z_crit * std_error,
                    p_value,
                }
            })
            .collect();

        log::debug!("{}: n = {}, k = {}, absorbed df = {}", spec.id, n, p, df_absorbed);
        Ok(EstimationResult {
            spec_id: spec.id.clone(),
            coefficients,
            dropped,
            n_obs: n,
            n_clusters,
            df_absorbed,
            r_squared_within,
            confidence: spec.confidence,
            covariance: spec.covariance.clone(),
            first_stage,
        })
    }
}
