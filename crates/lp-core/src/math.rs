//! Numeric conventions shared by every stage.
//!
//! Undefined results (log of a non-positive number, division by zero or by an
//! absent denominator) are represented by [`MISSING`] (`NaN`). `NaN` propagates
//! through ordinary arithmetic, so derived columns inherit the marker without
//! special casing, and the estimation engine drops such rows in its
//! complete-case filter.

/// The "missing" marker.
pub const MISSING: f64 = f64::NAN;

/// `true` if `v` carries a usable value.
#[inline]
pub fn is_present(v: f64) -> bool {
    v.is_finite()
}

/// Natural log; [`MISSING`] for non-positive or missing input.
#[inline]
pub fn safe_ln(x: f64) -> f64 {
    if x > 0.0 && x.is_finite() { x.ln() } else { MISSING }
}

/// `num / den`; [`MISSING`] if the denominator is zero or either side is missing.
#[inline]
pub fn safe_div(num: f64, den: f64) -> f64 {
    if !is_present(num) || !is_present(den) || den == 0.0 { MISSING } else { num / den }
}

/// Symmetric (Davis–Haltiwanger) growth rate `2 (x_t − x_{t−1}) / (x_t + x_{t−1})`.
///
/// Bounded in `[−2, 2]` for non-negative levels; [`MISSING`] when both levels are zero
/// or either is missing.
#[inline]
pub fn symmetric_growth(current: f64, previous: f64) -> f64 {
    safe_div(2.0 * (current - previous), current + previous)
}

/// Sum that skips missing values; [`MISSING`] if nothing was present.
pub fn sum_present<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut acc = 0.0;
    let mut any = false;
    for v in values {
        if is_present(v) {
            acc += v;
            any = true;
        }
    }
    if any { acc } else { MISSING }
}

/// Sample standard deviation (n − 1) of the present values.
pub fn sample_std(values: &[f64]) -> f64 {
    let present: Vec<f64> = values.iter().copied().filter(|v| is_present(*v)).collect();
    let n = present.len();
    if n < 2 {
        return MISSING;
    }
    let mean = present.iter().sum::<f64>() / n as f64;
    let ss: f64 = present.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (n as f64 - 1.0)).sqrt()
}
