//! Least-squares kernels on transformed (demeaned, √w-scaled) columns:
//! collinearity screening, OLS, 2SLS and first-stage diagnostics.

use nalgebra::{DMatrix, DVector};
use lp_core::{Error, Result};
use serde::Serialize;

/// Relative residual norm below which a column counts as a linear combination
/// of the columns kept before it.
pub const COLLINEARITY_TOL: f64 = 1e-8;

/// Screen columns in order; `true` marks a column independent of the kept
/// predecessors.
///
/// `scale[j]` is the norm the residual of column `j` is compared against
/// (typically its norm before fixed-effect absorption, so that an absorbed
/// column is detected even though its demeaned norm is tiny).
pub fn independent_columns(cols: &[&[f64]], scale: &[f64], tol: f64) -> Vec<bool> {
    let mut basis: Vec<Vec<f64>> = Vec::new();
    cols.iter()
        .zip(scale)
        .map(|(col, &s)| {
            let mut r = col.to_vec();
            for q in &basis {
                let dot: f64 = r.iter().zip(q).map(|(a, b)| a * b).sum();
                for (ri, qi) in r.iter_mut().zip(q) {
                    *ri -= dot * qi;
                }
            }
            let norm = r.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm <= tol * s.max(f64::MIN_POSITIVE) || norm == 0.0 {
                return false;
            }
            basis.push(r.into_iter().map(|v| v / norm).collect());
            true
        })
        .collect()
}

/// Column-major matrix from equal-length columns.
pub fn to_matrix(cols: &[&[f64]], n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, cols.len(), |i, j| cols[j][i])
}

/// Fitted least-squares system.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    /// Coefficients.
    pub beta: DVector<f64>,
    /// `(X'X)⁻¹`
    pub bread: DMatrix<f64>,
    /// Residuals `y − Xβ`.
    pub residuals: DVector<f64>,
}

/// `β = (X'X)⁻¹ X'y`.
pub fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<LeastSquares> {
    let bread = (x.transpose() * x)
        .try_inverse()
        .ok_or_else(|| Error::Computation("X'X is singular".into()))?;
    let beta = &bread * (x.transpose() * y);
    let residuals = y - x * &beta;
    Ok(LeastSquares { beta, bread, residuals })
}

/// Residual sum of squares.
pub fn rss(residuals: &DVector<f64>) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// First-stage diagnostics of the excluded instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FirstStage {
    /// Partial F statistic of the excluded instruments.
    pub f_stat: f64,
    /// First-stage R² (of the transformed endogenous regressor).
    pub r_squared: f64,
    /// Partial R² of the excluded instruments.
    pub partial_r_squared: f64,
    /// F above the Stock–Yogo 10% maximal-size critical value.
    pub passes_stock_yogo_10: bool,
}

/// Two-stage least squares result.
#[derive(Debug, Clone)]
pub struct TwoStage {
    /// Second-stage fit; residuals use the original endogenous regressor.
    pub fit: LeastSquares,
    /// Second-stage design `[X_exog | X̂_endog]`, used for the sandwich.
    pub design: DMatrix<f64>,
    /// First-stage diagnostics.
    pub first_stage: FirstStage,
}

/// 2SLS with one endogenous regressor, placed last in the coefficient vector.
///
/// `df_absorbed` enters the denominator degrees of freedom of the partial F.
pub fn two_stage(
    y: &DVector<f64>,
    exog: &DMatrix<f64>,
    endog: &DVector<f64>,
    instruments: &DMatrix<f64>,
    df_absorbed: usize,
) -> Result<TwoStage> {
    let n = y.len();
    let k_exog = exog.ncols();
    let m = instruments.ncols();
    if m == 0 {
        return Err(Error::Validation("2SLS needs at least one excluded instrument".into()));
    }

    let z_full = DMatrix::from_fn(n, k_exog + m, |i, j| {
        if j < k_exog { exog[(i, j)] } else { instruments[(i, j - k_exog)] }
    });
    let first = least_squares(&z_full, endog)
        .map_err(|_| Error::Computation("first stage: [X_exog | Z] is singular".into()))?;
    let endog_hat = endog - &first.residuals;
    let rss_u = rss(&first.residuals);
    let tss: f64 = endog.iter().map(|v| v * v).sum();
    let rss_r = if k_exog > 0 { least_squares(exog, endog).map_or(tss, |r| rss(&r.residuals)) } else { tss };

    let df_denom = n as f64 - (k_exog + m) as f64 - df_absorbed as f64;
    let f_stat = if rss_u > 0.0 && df_denom > 0.0 {
        ((rss_r - rss_u) / m as f64) / (rss_u / df_denom)
    } else {
        f64::NAN
    };
    let stock_yogo_cv = match m {
        1 => 16.38,
        2 => 19.93,
        _ => 10.0,
    };
    let first_stage = FirstStage {
        f_stat,
        r_squared: if tss > 0.0 { 1.0 - rss_u / tss } else { 0.0 },
        partial_r_squared: if rss_r > 0.0 { (rss_r - rss_u) / rss_r } else { 0.0 },
        passes_stock_yogo_10: f_stat > stock_yogo_cv,
    };

    let stacked = |last: &DVector<f64>| {
        DMatrix::from_fn(n, k_exog + 1, |i, j| if j < k_exog { exog[(i, j)] } else { last[i] })
    };
    let design = stacked(&endog_hat);
    let second = least_squares(&design, y)
        .map_err(|_| Error::Computation("second stage: [X_exog | X̂_endog] is singular".into()))?;
    let residuals = y - stacked(endog) * &second.beta;

    Ok(TwoStage { fit: LeastSquares { residuals, ..second }, design, first_stage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_and_scaled_columns_are_dropped() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [1.0, 0.0, 1.0, 0.0];
        let keep = independent_columns(&[&a, &b, &c], &[1.0, 1.0, 1.0], COLLINEARITY_TOL);
        assert_eq!(keep, vec![true, false, true]);
    }

    #[test]
    fn test_absorbed_column_is_dropped_against_raw_scale() {
        let tiny = [1e-12, -1e-12, 0.0];
        let keep = independent_columns(&[&tiny], &[10.0], COLLINEARITY_TOL);
        assert_eq!(keep, vec![false]);
    }

    #[test]
    fn test_ols_exact_fit() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DVector::from_column_slice(&[1.0, 3.0, 5.0, 7.0]);
        let fit = least_squares(&x, &y).unwrap();
        assert!((fit.beta[0] - 1.0).abs() < 1e-12);
        assert!((fit.beta[1] - 2.0).abs() < 1e-12);
        assert!(rss(&fit.residuals) < 1e-20);
    }

    #[test]
    fn test_two_stage_recovers_structural_slope() {
        // endog = z + u, y = 3·endog + u: OLS is biased, 2SLS is exact in z.
        let z = [1.0, -1.0, 2.0, -2.0, 0.5, -0.5];
        let u = [0.3, 0.3, -0.2, -0.2, -0.1, -0.1];
        let endog: Vec<f64> = z.iter().zip(&u).map(|(a, b)| a + b).collect();
        let y: Vec<f64> = endog.iter().zip(&u).map(|(e, b)| 3.0 * e + b).collect();

        let exog = DMatrix::from_element(6, 1, 1.0);
        let inst = DMatrix::from_column_slice(6, 1, &z);
        let res = two_stage(
            &DVector::from_column_slice(&y),
            &exog,
            &DVector::from_column_slice(&endog),
            &inst,
            0,
        )
        .unwrap();
        // u is orthogonal to z and sums to zero, so the IV slope is exactly 3.
        assert!((res.fit.beta[1] - 3.0).abs() < 1e-10, "beta = {}", res.fit.beta[1]);
        assert!(res.first_stage.f_stat > 16.38);
        assert!(res.first_stage.passes_stock_yogo_10);
        assert!(res.first_stage.partial_r_squared > 0.9);
    }
}
