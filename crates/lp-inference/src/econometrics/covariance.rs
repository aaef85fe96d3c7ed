//! Sandwich covariance estimators for (weighted, demeaned) linear models.
//!
//! Every estimator takes the already-transformed design `X*` (rows scaled by
//! `√w`), the matching residuals `e*` and the bread `(X*'X*)⁻¹`.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Error-covariance mode of a specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CovarianceMode {
    /// Cluster-robust, grouping on the named column.
    #[serde(rename = "clustered")]
    Clustered(String),
    /// Heteroskedasticity-robust (White), no clustering.
    #[serde(rename = "heteroskedastic")]
    HeteroskedasticRobust,
}

impl CovarianceMode {
    /// Column the mode clusters on, if any.
    pub fn cluster_column(&self) -> Option<&str> {
        match self {
            CovarianceMode::Clustered(col) => Some(col),
            CovarianceMode::HeteroskedasticRobust => None,
        }
    }
}

/// Liang–Zeger cluster-robust covariance.
///
/// `V = c · (X'X)⁻¹ [Σ_g X_g' e_g e_g' X_g] (X'X)⁻¹` with the small-sample
/// correction `c = G/(G−1) · (N−1)/(N−K)`. Returns the matrix and `G`.
pub fn cluster_robust_cov(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    bread: &DMatrix<f64>,
    clusters: &[i64],
) -> (DMatrix<f64>, usize) {
    let n = x.nrows();
    let p = x.ncols();

    let mut scores: BTreeMap<i64, DVector<f64>> = BTreeMap::new();
    for (i, &c) in clusters.iter().enumerate() {
        let s = scores.entry(c).or_insert_with(|| DVector::zeros(p));
        let e = residuals[i];
        for j in 0..p {
            s[j] += x[(i, j)] * e;
        }
    }
    let g = scores.len();

    let mut meat = DMatrix::zeros(p, p);
    for s in scores.values() {
        meat += s * s.transpose();
    }

    let (g_f, n_f, p_f) = (g as f64, n as f64, p as f64);
    let correction =
        if g_f > 1.0 && n_f > p_f { (g_f / (g_f - 1.0)) * ((n_f - 1.0) / (n_f - p_f)) } else { 1.0 };
    (bread * meat * bread * correction, g)
}

/// White heteroskedasticity-robust covariance.
///
/// `V = n/(n − a) · (X'X)⁻¹ [Σ_i e_i² x_i x_i'] (X'X)⁻¹` where `a` is the number of
/// absorbed fixed-effect degrees of freedom. Regressors are not counted: this is the
/// undebiased panel estimator, and it reduces to HC0 when nothing is absorbed.
pub fn heteroskedastic_cov(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    bread: &DMatrix<f64>,
    df_absorbed: usize,
) -> DMatrix<f64> {
    let n = x.nrows();
    let p = x.ncols();
    let mut meat = DMatrix::zeros(p, p);
    for i in 0..n {
        let xi = x.row(i).transpose();
        meat += &xi * xi.transpose() * residuals[i].powi(2);
    }
    let correction = if n > df_absorbed { n as f64 / (n - df_absorbed) as f64 } else { f64::NAN };
    bread * meat * bread * correction
}

/// Square roots of the diagonal (negative round-off clamps to 0).
pub fn std_errors(cov: &DMatrix<f64>) -> Vec<f64> {
    (0..cov.nrows()).map(|j| cov[(j, j)].max(0.0).sqrt()).collect()
}
