//! Per-lag values keyed by (variable, lag) instead of formatted column names.

use std::collections::BTreeMap;
use std::fmt;

use lp_core::MISSING;
use serde::Serialize;

use crate::observation::Metric;

/// A variable carried at one or more lags of the cohort life-path panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LagVar {
    /// Fine restriction intensity (`industry_restrictions_2_0`).
    RestrictionFine,
    /// Coarse restriction intensity (`industry_restrictions_1_0`).
    RestrictionCoarse,
    /// Fine restriction intensity scored with previous-year word counts.
    RestrictionFinePrev,
    /// Shift-share instrument.
    BartikIv,
    /// Sector GDP.
    Gdp,
    /// Entrant firms.
    Entry,
    /// Incumbent firms.
    Incumbents,
    /// The panel's own metric for the same key.
    Own(Metric),
    /// `ln(RestrictionFine)`
    LogRestriction,
    /// `ln(Gdp)`
    LogGdp,
    /// `ln(Own(Emp))`
    LogEmp,
    /// `Entry / Incumbents`
    EntryRate,
    /// `LogRestriction[a] − LogRestriction[a+1]`
    ChgLogRestriction,
    /// `BartikIv[a] − BartikIv[a+1]`
    ChgBartikIv,
    /// `LogGdp[a] − LogGdp[a+1]`
    ChgLogGdp,
    /// `LogEmp[a] − LogEmp[a+1]`
    ChgLogEmp,
    /// `EntryRate[a] − EntryRate[a+1]`
    ChgEntryRate,
    /// Symmetric growth of employment between lags `a+1` and `a`.
    EmpGrowth,
}

impl LagVar {
    /// Variables filled by the per-lag joins, excluding own metrics.
    pub const JOINED: [LagVar; 7] = [
        LagVar::RestrictionFine,
        LagVar::RestrictionCoarse,
        LagVar::RestrictionFinePrev,
        LagVar::BartikIv,
        LagVar::Gdp,
        LagVar::Entry,
        LagVar::Incumbents,
    ];

    /// Logs and ratios computed right after each join.
    pub const DERIVED: [LagVar; 4] = [LagVar::LogRestriction, LagVar::LogGdp, LagVar::LogEmp, LagVar::EntryRate];

    /// Between-lag changes: `(change, level)` pairs, plus employment growth handled separately.
    pub const CHANGES: [(LagVar, LagVar); 5] = [
        (LagVar::ChgLogRestriction, LagVar::LogRestriction),
        (LagVar::ChgBartikIv, LagVar::BartikIv),
        (LagVar::ChgLogGdp, LagVar::LogGdp),
        (LagVar::ChgLogEmp, LagVar::LogEmp),
        (LagVar::ChgEntryRate, LagVar::EntryRate),
    ];

    /// Column stem.
    pub fn name(&self) -> &'static str {
        match self {
            LagVar::RestrictionFine => "industry_restrictions_2_0",
            LagVar::RestrictionCoarse => "industry_restrictions_1_0",
            LagVar::RestrictionFinePrev => "industry_restrictions_2_0_prev",
            LagVar::BartikIv => "bartik_iv",
            LagVar::Gdp => "gdp",
            LagVar::Entry => "entry",
            LagVar::Incumbents => "incumbents",
            LagVar::Own(m) => m.name(),
            LagVar::LogRestriction => "log_restriction",
            LagVar::LogGdp => "log_gdp",
            LagVar::LogEmp => "log_emp",
            LagVar::EntryRate => "entry_rate",
            LagVar::ChgLogRestriction => "chg_log_restriction",
            LagVar::ChgBartikIv => "chg_bartik_iv",
            LagVar::ChgLogGdp => "chg_log_gdp",
            LagVar::ChgLogEmp => "chg_log_emp",
            LagVar::ChgEntryRate => "chg_entry_rate",
            LagVar::EmpGrowth => "emp_growth",
        }
    }
}

/// A (variable, lag) cell address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LagColumn {
    /// Years back from the observation year.
    pub lag: u8,
    /// Variable.
    pub var: LagVar,
}

impl LagColumn {
    /// Address of `var` at `lag`.
    pub fn new(var: LagVar, lag: u8) -> Self {
        Self { lag, var }
    }
}

impl fmt::Display for LagColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L_{}_{}", self.lag, self.var.name())
    }
}

/// Lagged values of one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LagValues(BTreeMap<LagColumn, f64>);

impl LagValues {
    /// Value of `var` at `lag`; `MISSING` if never set.
    pub fn get(&self, var: LagVar, lag: u8) -> f64 {
        self.0.get(&LagColumn::new(var, lag)).copied().unwrap_or(MISSING)
    }

    /// `true` if the cell was produced (even if its value is missing).
    pub fn contains(&self, var: LagVar, lag: u8) -> bool {
        self.0.contains_key(&LagColumn::new(var, lag))
    }

    /// Cells in (lag, variable) order.
    pub fn iter(&self) -> impl Iterator<Item = (LagColumn, f64)> + '_ {
        self.0.iter().map(|(c, v)| (*c, *v))
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no cells were produced.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// New value set extended by `cells`.
    pub fn extended<I>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = (LagColumn, f64)>,
    {
        self.0.extend(cells);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names() {
        assert_eq!(LagColumn::new(LagVar::LogRestriction, 0).to_string(), "L_0_log_restriction");
        assert_eq!(LagColumn::new(LagVar::Own(Metric::DeathRate), 3).to_string(), "L_3_death_rate");
        assert_eq!(LagColumn::new(LagVar::EmpGrowth, 1).to_string(), "L_1_emp_growth");
    }

    #[test]
    fn test_get_defaults_to_missing() {
        let v = LagValues::default().extended([(LagColumn::new(LagVar::Gdp, 1), 2.0)]);
        assert_eq!(v.get(LagVar::Gdp, 1), 2.0);
        assert!(v.get(LagVar::Gdp, 0).is_nan());
        assert!(v.contains(LagVar::Gdp, 1));
        assert!(!v.contains(LagVar::Gdp, 0));
    }
}
