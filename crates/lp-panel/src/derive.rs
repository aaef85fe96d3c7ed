//! Rate and log variables derived from summed firm counts.
//!
//! Every ratio and log follows the "undefined on invalid input" convention of
//! [`lp_core::math`]: a zero or missing denominator, or a non-positive log
//! argument, yields `MISSING` instead of an error.

use lp_core::{safe_div, safe_ln};
use serde::Serialize;

use crate::observation::FirmCounts;

/// Flow rates and log levels of one panel cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedRates {
    /// `estabs_entry / estabs`
    pub estabs_entry_rate: f64,
    /// `estabs_exit / estabs`
    pub estabs_exit_rate: f64,
    /// `job_creation / denom`
    pub job_creation_rate: f64,
    /// `job_destruction / denom`
    pub job_destruction_rate: f64,
    /// `net_job_creation / denom`
    pub net_job_creation_rate: f64,
    /// See [`reallocation_rate`].
    pub reallocation_rate: f64,
    /// `firmdeath_firms / firms`
    pub death_rate: f64,
    /// `ln(emp)`
    pub log_emp: f64,
    /// `ln(emp) − ln(firms)`, the log of average employment per firm.
    pub log_avg_emp: f64,
}

/// Symmetric job reallocation: `cr + dr − |cr − dr|`, i.e. twice the smaller flow.
pub fn reallocation_rate(creation_rate: f64, destruction_rate: f64) -> f64 {
    creation_rate + destruction_rate - (creation_rate - destruction_rate).abs()
}

/// Compute every derived variable from summed counts.
pub fn derive_rates(c: &FirmCounts) -> DerivedRates {
    let job_creation_rate = safe_div(c.job_creation, c.denom);
    let job_destruction_rate = safe_div(c.job_destruction, c.denom);
    DerivedRates {
        estabs_entry_rate: safe_div(c.estabs_entry, c.estabs),
        estabs_exit_rate: safe_div(c.estabs_exit, c.estabs),
        job_creation_rate,
        job_destruction_rate,
        net_job_creation_rate: safe_div(c.net_job_creation, c.denom),
        reallocation_rate: reallocation_rate(job_creation_rate, job_destruction_rate),
        death_rate: safe_div(c.firmdeath_firms, c.firms),
        log_emp: safe_ln(c.emp),
        log_avg_emp: safe_ln(c.emp) - safe_ln(c.firms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reallocation_is_twice_min_flow() {
        assert!((reallocation_rate(0.3, 0.1) - 0.2).abs() < 1e-15);
        assert!((reallocation_rate(0.1, 0.3) - 0.2).abs() < 1e-15);
        assert!(reallocation_rate(f64::NAN, 0.3).is_nan());
    }

    #[test]
    fn test_derive_rates() {
        let c = FirmCounts {
            firms: 10.0,
            emp: 200.0,
            estabs: 20.0,
            estabs_entry: 2.0,
            estabs_exit: 1.0,
            denom: 100.0,
            job_creation: 15.0,
            job_destruction: 5.0,
            net_job_creation: 10.0,
            firmdeath_firms: 1.0,
            ..FirmCounts::default()
        };
        let r = derive_rates(&c);
        assert!((r.estabs_entry_rate - 0.1).abs() < 1e-15);
        assert!((r.estabs_exit_rate - 0.05).abs() < 1e-15);
        assert!((r.job_creation_rate - 0.15).abs() < 1e-15);
        assert!((r.reallocation_rate - 0.1).abs() < 1e-15);
        assert!((r.death_rate - 0.1).abs() < 1e-15);
        assert!((r.log_avg_emp - 20f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_denominators_are_missing() {
        let c = FirmCounts { firms: 0.0, emp: 0.0, ..FirmCounts::default() };
        let r = derive_rates(&c);
        assert!(r.death_rate.is_nan());
        assert!(r.log_emp.is_nan());
        assert!(r.log_avg_emp.is_nan());
        assert!(r.job_creation_rate.is_nan());
    }
}
