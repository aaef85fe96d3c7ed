//! Coefficient paths: named coefficients pulled from fitted specifications and
//! accumulated into a long (spec × age × regressor) table.

use serde::{Deserialize, Serialize};

use crate::estimation::EstimationResult;

/// One regressor of one fitted specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRecord {
    /// Specification id.
    pub spec_id: String,
    /// Regressor name.
    pub regressor: String,
    /// Age bucket the specification was restricted to, if any.
    pub age: Option<u8>,
    /// Point estimate.
    pub estimate: f64,
    /// Lower confidence bound.
    pub lower: f64,
    /// Upper confidence bound.
    pub upper: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Confidence interval excludes zero.
    pub significant: bool,
    /// Observations used.
    pub n_obs: usize,
}

/// Pulls a fixed list of regressors out of fitted results.
#[derive(Debug, Clone)]
pub struct CoefficientPathExtractor {
    regressors: Vec<String>,
}

impl CoefficientPathExtractor {
    /// Extract these regressors.
    pub fn new(regressors: &[&str]) -> Self {
        Self { regressors: regressors.iter().map(|r| r.to_string()).collect() }
    }

    /// One record per requested regressor that survived the fit.
    pub fn extract(&self, result: &EstimationResult, age: Option<u8>) -> Vec<CoefficientRecord> {
        self.regressors
            .iter()
            .filter_map(|name| {
                let Some(c) = result.coefficient(name) else {
                    log::debug!("{}: `{}` not in the fitted model", result.spec_id, name);
                    return None;
                };
                Some(CoefficientRecord {
                    spec_id: result.spec_id.clone(),
                    regressor: name.clone(),
                    age,
                    estimate: c.estimate,
                    lower: c.lower,
                    upper: c.upper,
                    p_value: c.p_value,
                    significant: c.significant(),
                    n_obs: result.n_obs,
                })
            })
            .collect()
    }
}

/// Append-only table of coefficient records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoefficientTable {
    records: Vec<CoefficientRecord>,
}

impl CoefficientTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records.
    pub fn extend<I: IntoIterator<Item = CoefficientRecord>>(&mut self, records: I) {
        self.records.extend(records);
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[CoefficientRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy with estimates and bounds multiplied by `factor`
    /// (e.g. the standard deviation of the regressor, giving one-s.d. effects).
    pub fn scaled(&self, factor: f64) -> CoefficientTable {
        let records = self
            .records
            .iter()
            .map(|r| CoefficientRecord {
                estimate: r.estimate * factor,
                lower: r.lower * factor,
                upper: r.upper * factor,
                ..r.clone()
            })
            .collect();
        CoefficientTable { records }
    }
}

/// Significance stars: `*` p<0.1, `**` p<0.05, `***` p<0.01.
pub fn stars(p_value: f64) -> &'static str {
    if p_value < 0.01 {
        "***"
    } else if p_value < 0.05 {
        "**"
    } else if p_value < 0.1 {
        "*"
    } else {
        ""
    }
}

/// Formatted headline coefficient of one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyResult {
    /// Dependent variable.
    pub dependent: String,
    /// Model label (e.g. `ols`, `iv`).
    pub model: String,
    /// Estimate rounded to 5 decimals, with stars.
    pub coefficient: String,
    /// Bracketed standard error.
    pub std_error: String,
    /// Observations used.
    pub n_obs: usize,
}

/// Headline summary of `regressor`, if it was kept.
pub fn key_result(dependent: &str, model: &str, result: &EstimationResult, regressor: &str) -> Option<KeyResult> {
    let c = result.coefficient(regressor)?;
    Some(KeyResult {
        dependent: dependent.to_string(),
        model: model.to_string(),
        coefficient: format!("{:.5}{}", c.estimate, stars(c.p_value)),
        std_error: format!("[{:.5}]", c.std_error),
        n_obs: result.n_obs,
    })
}
