//! Cohort life-path panel: the lag-join engine.
//!
//! Each base-panel row is extended lag by lag. For lag `a` the row is joined on
//! `year − a` to the regulation index and GDP (2-digit recoded sector), to the
//! entry series (panel sector and size class) and to its own panel key. The
//! per-lag extensions are folded into fresh records, so no working table is
//! reassigned across iterations. Two further passes add between-lag changes and,
//! for age-split panels, cohort summaries anchored at the pre-entry year.

use std::collections::{BTreeMap, BTreeSet};

use lp_core::{
    AgeBucket, Frame, IntoFrame, MISSING, Result, SectorCode, Year, safe_div, safe_ln, symmetric_growth,
};
use serde::Serialize;

use crate::entry::{EntryKey, EntryRecord};
use crate::gdp::GdpRecord;
use crate::join::UniqueIndex;
use crate::lag::{LagColumn, LagValues, LagVar};
use crate::observation::{BasePanel, Metric, Observation, PanelKey, PanelVariant};
use crate::regulation::RegulationRecord;

/// Variables summarised over a cohort's life since entry.
pub const SUMMARY_VARS: [LagVar; 5] =
    [LagVar::LogRestriction, LagVar::BartikIv, LagVar::LogGdp, LagVar::LogEmp, LagVar::EntryRate];

/// Own metrics lagged by default.
pub const DEFAULT_TRACKED: [Metric; 4] = [Metric::Firms, Metric::Emp, Metric::DeathRate, Metric::LogAvgEmp];

/// Life-since-entry summary of one variable for one record.
///
/// For a record of age bucket `k`, "pre-cohort" means lag `k + 1`, the year
/// before the cohort entered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CohortSummary {
    /// Value at lag `k + 1`.
    pub pre_cohort_level: f64,
    /// `L_0 − L_{k+1}`.
    pub level_change: f64,
    /// `level_change / k`; undefined for `k = 0`.
    pub avg_change: f64,
    /// `level_change / (k − 1)`; undefined for `k ≤ 1`.
    pub avg_change_post_entry: f64,
}

impl CohortSummary {
    /// Every field missing.
    pub const UNDEFINED: CohortSummary = CohortSummary {
        pre_cohort_level: MISSING,
        level_change: MISSING,
        avg_change: MISSING,
        avg_change_post_entry: MISSING,
    };

    fn compute(current: f64, pre: f64, age: u8) -> Self {
        let level_change = current - pre;
        let avg_change_post_entry =
            if age >= 2 { safe_div(level_change, f64::from(age) - 1.0) } else { MISSING };
        Self {
            pre_cohort_level: pre,
            level_change,
            avg_change: safe_div(level_change, f64::from(age)),
            avg_change_post_entry,
        }
    }
}

/// One row of the cohort life-path panel.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortLifePathRecord {
    observation: Observation,
    lags: LagValues,
    own_changes: BTreeMap<Metric, f64>,
    summaries: BTreeMap<LagVar, CohortSummary>,
}

impl CohortLifePathRecord {
    fn seed(observation: &Observation) -> Self {
        Self {
            observation: observation.clone(),
            lags: LagValues::default(),
            own_changes: BTreeMap::new(),
            summaries: BTreeMap::new(),
        }
    }

    fn with_lags<I>(self, cells: I) -> Self
    where
        I: IntoIterator<Item = (LagColumn, f64)>,
    {
        Self { lags: self.lags.extended(cells), ..self }
    }

    /// Underlying base-panel observation.
    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    /// Panel key.
    pub fn key(&self) -> PanelKey {
        self.observation.key
    }

    /// Entry year `year − age`, for age-split panels.
    pub fn cohort(&self) -> Option<Year> {
        self.observation.key.age.map(|a| self.observation.key.year - Year::from(a.get()))
    }

    /// Value of `var` at `lag` (missing if not produced).
    pub fn lag(&self, var: LagVar, lag: u8) -> f64 {
        self.lags.get(var, lag)
    }

    /// All lagged cells.
    pub fn lags(&self) -> &LagValues {
        &self.lags
    }

    /// `metric − L_1 metric`.
    pub fn own_change(&self, metric: Metric) -> f64 {
        self.own_changes.get(&metric).copied().unwrap_or(MISSING)
    }

    /// Cohort summary of `var`; undefined for panels without age buckets.
    pub fn summary(&self, var: LagVar) -> CohortSummary {
        self.summaries.get(&var).copied().unwrap_or(CohortSummary::UNDEFINED)
    }
}

/// Builds [`CohortPanel`]s from a base panel and the auxiliary series.
#[derive(Debug, Clone)]
pub struct CohortPanelAssembler {
    regulation: UniqueIndex<(Year, SectorCode), RegulationRecord>,
    gdp: UniqueIndex<(Year, SectorCode), f64>,
    entry: UniqueIndex<EntryKey, EntryRecord>,
    max_lag: u8,
    tracked: BTreeSet<Metric>,
}

impl CohortPanelAssembler {
    /// Lags `0..=6` are joined unless configured otherwise.
    pub const DEFAULT_MAX_LAG: u8 = 6;

    /// Index the right-hand tables; a repeated key in any of them is fatal.
    pub fn new(regulation: &[RegulationRecord], gdp: &[GdpRecord], entry: &[EntryRecord]) -> Result<Self> {
        Ok(Self {
            regulation: UniqueIndex::build("regulation", regulation.iter().map(|r| ((r.year, r.sector), *r)))?,
            gdp: UniqueIndex::build("gdp", gdp.iter().map(|g| ((g.year, g.sector), g.gdp)))?,
            entry: UniqueIndex::build("entry", entry.iter().map(|e| (e.key, *e)))?,
            max_lag: Self::DEFAULT_MAX_LAG,
            tracked: DEFAULT_TRACKED.into_iter().collect(),
        })
    }

    /// Highest lag joined.
    pub fn with_max_lag(mut self, max_lag: u8) -> Self {
        self.max_lag = max_lag;
        self
    }

    /// Lag these own metrics in addition to the defaults.
    ///
    /// `log_emp` is always available as [`LagVar::LogEmp`] and is not tracked twice.
    pub fn with_tracked_metrics<I>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = Metric>,
    {
        self.tracked.extend(metrics.into_iter().filter(|m| *m != Metric::LogEmp));
        self
    }

    /// Highest lag joined.
    pub fn max_lag(&self) -> u8 {
        self.max_lag
    }

    /// Assemble the life-path panel of `base`.
    pub fn assemble(&self, base: &BasePanel) -> Result<CohortPanel> {
        let own = UniqueIndex::build("own panel", base.rows().iter().map(|o| (o.key, o)))?;
        let seed: Vec<CohortLifePathRecord> = base.rows().iter().map(CohortLifePathRecord::seed).collect();

        let joined = (0..=self.max_lag).fold(seed, |records, lag| {
            records
                .into_iter()
                .map(|r| {
                    let cells = self.lag_cells(&r.observation, &own, lag);
                    r.with_lags(cells)
                })
                .collect()
        });

        let records: Vec<CohortLifePathRecord> = joined
            .into_iter()
            .map(|r| self.with_changes(r))
            .map(|r| self.with_summaries(r))
            .collect();

        log::info!(
            "{}: assembled {} life-path records over lags 0..={}",
            base.variant().name(),
            records.len(),
            self.max_lag
        );
        Ok(CohortPanel {
            variant: base.variant(),
            max_lag: self.max_lag,
            tracked: self.tracked.clone(),
            records,
        })
    }

    fn lag_cells(
        &self,
        obs: &Observation,
        own: &UniqueIndex<PanelKey, &Observation>,
        lag: u8,
    ) -> Vec<(LagColumn, f64)> {
        let year = obs.key.year - Year::from(lag);
        let sector_2 = obs.sector_2();

        let (fine, coarse, fine_prev, bartik) = match self.regulation.get(&(year, sector_2)) {
            Some(r) => (r.restrictions_fine, r.restrictions_coarse, r.restrictions_fine_prev, r.bartik_iv),
            None => (MISSING, MISSING, MISSING, MISSING),
        };
        let gdp = self.gdp.get(&(year, sector_2)).copied().unwrap_or(MISSING);
        let entry_key = EntryKey { year, sector: obs.key.sector, size: obs.key.size };
        let (entry, incumbents) = self.entry.get(&entry_key).map_or((MISSING, MISSING), |e| (e.entry, e.incumbents));
        let lagged = own.get(&obs.key.lagged(lag));
        let own_value = |m: Metric| lagged.map_or(MISSING, |o| o.metric(m));

        let mut cells = vec![
            (LagVar::RestrictionFine, fine),
            (LagVar::RestrictionCoarse, coarse),
            (LagVar::RestrictionFinePrev, fine_prev),
            (LagVar::BartikIv, bartik),
            (LagVar::Gdp, gdp),
            (LagVar::Entry, entry),
            (LagVar::Incumbents, incumbents),
            (LagVar::LogRestriction, safe_ln(fine)),
            (LagVar::LogGdp, safe_ln(gdp)),
            (LagVar::LogEmp, safe_ln(own_value(Metric::Emp))),
            (LagVar::EntryRate, safe_div(entry, incumbents)),
        ];
        cells.extend(self.tracked.iter().map(|&m| (LagVar::Own(m), own_value(m))));
        cells.into_iter().map(|(var, v)| (LagColumn::new(var, lag), v)).collect()
    }

    fn with_changes(&self, r: CohortLifePathRecord) -> CohortLifePathRecord {
        let mut cells = Vec::new();
        for lag in 0..self.max_lag {
            for (change, level) in LagVar::CHANGES {
                cells.push((LagColumn::new(change, lag), r.lag(level, lag) - r.lag(level, lag + 1)));
            }
            let growth = symmetric_growth(r.lag(LagVar::Own(Metric::Emp), lag), r.lag(LagVar::Own(Metric::Emp), lag + 1));
            cells.push((LagColumn::new(LagVar::EmpGrowth, lag), growth));
        }

        let mut own_changes: BTreeMap<Metric, f64> = self
            .tracked
            .iter()
            .map(|&m| (m, r.observation.metric(m) - r.lag(LagVar::Own(m), 1)))
            .collect();
        own_changes.insert(Metric::LogEmp, r.observation.metric(Metric::LogEmp) - r.lag(LagVar::LogEmp, 1));

        CohortLifePathRecord { own_changes, ..r.with_lags(cells) }
    }

    fn with_summaries(&self, r: CohortLifePathRecord) -> CohortLifePathRecord {
        let Some(age) = r.observation.key.age.map(|a| a.get()) else {
            return r;
        };
        let pre_lag = age + 1;
        let summaries = SUMMARY_VARS
            .iter()
            .map(|&var| {
                let summary = if pre_lag <= self.max_lag {
                    CohortSummary::compute(r.lag(var, 0), r.lag(var, pre_lag), age)
                } else {
                    CohortSummary::UNDEFINED
                };
                (var, summary)
            })
            .collect();
        CohortLifePathRecord { summaries, ..r }
    }
}

/// Assembled cohort life-path panel of one [`PanelVariant`].
#[derive(Debug, Clone)]
pub struct CohortPanel {
    variant: PanelVariant,
    max_lag: u8,
    tracked: BTreeSet<Metric>,
    records: Vec<CohortLifePathRecord>,
}

impl CohortPanel {
    /// Panel granularity.
    pub fn variant(&self) -> PanelVariant {
        self.variant
    }

    /// Highest lag carried.
    pub fn max_lag(&self) -> u8 {
        self.max_lag
    }

    /// Records in base-panel key order.
    pub fn records(&self) -> &[CohortLifePathRecord] {
        &self.records
    }

    /// Records observed at age bucket `age`.
    pub fn at_age(&self, age: AgeBucket) -> impl Iterator<Item = &CohortLifePathRecord> + '_ {
        self.records.iter().filter(move |r| r.key().age == Some(age))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` if the panel has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every lagged cell a record carries, in (lag, variable) order.
    pub fn lag_columns(&self) -> Vec<LagColumn> {
        let mut cols = BTreeSet::new();
        for lag in 0..=self.max_lag {
            let own = self.tracked.iter().map(|&m| LagVar::Own(m));
            for var in LagVar::JOINED.into_iter().chain(LagVar::DERIVED).chain(own) {
                cols.insert(LagColumn::new(var, lag));
            }
        }
        for lag in 0..self.max_lag {
            for (change, _) in LagVar::CHANGES {
                cols.insert(LagColumn::new(change, lag));
            }
            cols.insert(LagColumn::new(LagVar::EmpGrowth, lag));
        }
        cols.into_iter().collect()
    }

    fn change_metrics(&self) -> Vec<Metric> {
        let mut metrics: BTreeSet<Metric> = self.tracked.clone();
        metrics.insert(Metric::LogEmp);
        metrics.into_iter().collect()
    }
}

/// Key columns shared by panels persisted from base-panel observations.
pub(crate) fn key_columns(variant: PanelVariant) -> Vec<String> {
    let mut names = vec!["year".to_string(), "sector".to_string(), "sector_2".to_string()];
    if variant.sector_digits() >= 4 {
        names.push("sector_3".into());
        names.push("sector_4".into());
    }
    if variant.by_size() {
        names.push("large_firm".into());
    }
    if variant.by_age() {
        names.push("age".into());
        names.push("cohort".into());
    }
    names
}

pub(crate) fn key_values(variant: PanelVariant, obs: &Observation) -> Vec<f64> {
    let k = obs.key;
    let mut row = vec![f64::from(k.year), f64::from(k.sector.code()), f64::from(obs.sector_2().code())];
    if variant.sector_digits() >= 4 {
        row.push(f64::from(k.sector.truncate(3).code()));
        row.push(f64::from(k.sector.truncate(4).code()));
    }
    if variant.by_size() {
        row.push(k.size.map_or(MISSING, |s| f64::from(s.indicator())));
    }
    if variant.by_age() {
        let age = k.age.map(|a| a.get());
        row.push(age.map_or(MISSING, f64::from));
        row.push(age.map_or(MISSING, |a| f64::from(k.year - Year::from(a))));
    }
    row
}

const SUMMARY_FIELDS: [&str; 4] = ["pre", "chg_since_entry", "avg_chg", "avg_chg_post_entry"];

impl IntoFrame for CohortPanel {
    fn to_frame(&self) -> Result<Frame> {
        let lag_cols = self.lag_columns();
        let change_metrics = self.change_metrics();

        let mut names = key_columns(self.variant);
        names.extend(Metric::ALL.iter().map(|m| m.name().to_string()));
        names.extend(change_metrics.iter().map(|m| format!("{}_chg", m.name())));
        names.extend(lag_cols.iter().map(|c| c.to_string()));
        if self.variant.by_age() {
            for var in SUMMARY_VARS {
                names.extend(SUMMARY_FIELDS.iter().map(|f| format!("{}_{}", f, var.name())));
            }
        }

        let rows = self.records.iter().map(|r| {
            let mut row = key_values(self.variant, &r.observation);
            row.extend(Metric::ALL.iter().map(|&m| r.observation.metric(m)));
            row.extend(change_metrics.iter().map(|&m| r.own_change(m)));
            row.extend(lag_cols.iter().map(|c| r.lag(c.var, c.lag)));
            if self.variant.by_age() {
                for var in SUMMARY_VARS {
                    let s = r.summary(var);
                    row.extend([s.pre_cohort_level, s.level_change, s.avg_change, s.avg_change_post_entry]);
                }
            }
            row
        });
        Frame::from_rows(names, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::FirmCounts;
    use lp_core::Error;

    fn obs(year: Year, sector: u32, age: u8, firms: f64, emp: f64) -> Observation {
        let key = PanelKey {
            year,
            sector: SectorCode::new(sector),
            size: None,
            age: Some(AgeBucket::from_rank(age as usize)),
        };
        Observation::new(key, FirmCounts { firms, emp, ..FirmCounts::default() })
    }

    fn reg(year: Year, sector: u32, fine: f64) -> RegulationRecord {
        RegulationRecord {
            year,
            sector: SectorCode::new(sector),
            restrictions_coarse: fine / 2.0,
            restrictions_fine: fine,
            restrictions_fine_prev: MISSING,
            bartik_iv: fine / 10.0,
        }
    }

    #[test]
    fn test_duplicate_regulation_key_is_fatal() {
        let regs = vec![reg(2000, 31, 1.0), reg(2000, 31, 2.0)];
        let err = CohortPanelAssembler::new(&regs, &[], &[]).unwrap_err();
        assert!(matches!(err, Error::JoinCardinality { ref table, .. } if table == "regulation"), "{err}");
    }

    #[test]
    fn test_lag_join_and_own_lags() {
        let base = BasePanel::from_observations(
            PanelVariant::SectorAge,
            vec![obs(2000, 3111, 1, 4.0, 40.0), obs(2001, 3111, 1, 5.0, 60.0)],
        )
        .unwrap();
        let regs = vec![reg(2000, 31, 100.0), reg(2001, 31, 200.0)];
        let gdp = vec![GdpRecord { year: 2000, sector: SectorCode::new(31), gdp: 0.0 }];
        let panel = CohortPanelAssembler::new(&regs, &gdp, &[]).unwrap().with_max_lag(1).assemble(&base).unwrap();

        let r = &panel.records()[1];
        assert_eq!(r.key().year, 2001);
        assert_eq!(r.lag(LagVar::RestrictionFine, 1), 100.0);
        assert!((r.lag(LagVar::LogRestriction, 0) - 200.0_f64.ln()).abs() < 1e-12);
        assert!((r.lag(LagVar::ChgLogRestriction, 0) - 2.0_f64.ln()).abs() < 1e-12);
        assert!(r.lag(LagVar::LogGdp, 1).is_nan(), "ln(0) must be missing");
        assert_eq!(r.lag(LagVar::Own(Metric::Emp), 1), 40.0);
        assert!((r.lag(LagVar::EmpGrowth, 0) - 0.4).abs() < 1e-12);
        assert!((r.own_change(Metric::LogEmp) - (60.0_f64.ln() - 40.0_f64.ln())).abs() < 1e-12);
        assert_eq!(r.own_change(Metric::Firms), 1.0);
        assert_eq!(r.cohort(), Some(2000));

        let first = &panel.records()[0];
        assert!(first.lag(LagVar::Own(Metric::Emp), 1).is_nan());
        assert!(first.lag(LagVar::RestrictionFine, 1).is_nan());
    }

    #[test]
    fn test_age_one_post_entry_average_is_undefined() {
        let s = CohortSummary::compute(3.0, 1.0, 1);
        assert_eq!(s.level_change, 2.0);
        assert_eq!(s.avg_change, 2.0);
        assert!(s.avg_change_post_entry.is_nan());

        let s = CohortSummary::compute(3.0, 1.0, 0);
        assert!(s.avg_change.is_nan());

        let s = CohortSummary::compute(7.0, 1.0, 3);
        assert_eq!(s.avg_change, 2.0);
        assert_eq!(s.avg_change_post_entry, 3.0);
    }

    #[test]
    fn test_summary_beyond_max_lag_is_undefined() {
        let base =
            BasePanel::from_observations(PanelVariant::SectorAge, vec![obs(2005, 2111, 7, 1.0, 1.0)]).unwrap();
        let panel = CohortPanelAssembler::new(&[], &[], &[]).unwrap().assemble(&base).unwrap();
        assert!(panel.records()[0].summary(LagVar::LogRestriction).pre_cohort_level.is_nan());
    }

    #[test]
    fn test_frame_shape() {
        let base = BasePanel::from_observations(
            PanelVariant::SectorAge,
            vec![obs(2000, 3111, 0, 4.0, 40.0), obs(2000, 3112, 2, 5.0, 60.0)],
        )
        .unwrap();
        let panel = CohortPanelAssembler::new(&[], &[], &[]).unwrap().with_max_lag(2).assemble(&base).unwrap();
        let frame = panel.to_frame().unwrap();
        assert_eq!(frame.n_rows(), 2);
        for col in ["year", "sector_4", "age", "cohort", "emp_chg", "L_2_log_restriction", "L_1_emp_growth"] {
            assert!(frame.has_column(col), "missing column {col}");
        }
        assert!(!frame.has_column("L_2_emp_growth"));
        assert!(frame.has_column("pre_log_restriction"));
        assert_eq!(frame.column("cohort").unwrap(), &[2000.0, 1998.0]);
    }
}
