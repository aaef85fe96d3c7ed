//! Cohort-robust panel: regulation, GDP and entry anchored at the cohort's
//! entry year minus one instead of a rolling per-age lag.

use lp_core::{AgeBucket, Error, Frame, IntoFrame, MISSING, Result, SectorCode, Year, safe_ln};
use serde::Serialize;

use crate::cohort::{key_columns, key_values};
use crate::entry::{EntryKey, EntryRecord, SectorEntryAggregator, SectorLevel};
use crate::gdp::GdpRecord;
use crate::join::UniqueIndex;
use crate::observation::{BasePanel, Metric, Observation, PanelVariant};
use crate::regulation::RegulationRecord;

/// Sector granularities at which entry rates are reported.
pub const ENTRY_LEVELS: [(SectorLevel, &str); 3] =
    [(SectorLevel::TwoDigit, "2"), (SectorLevel::Digits(3), "3"), (SectorLevel::Digits(4), "4")];

/// Regulation, GDP and entry values of one anchor year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnchorValues {
    /// Anchor year.
    pub year: Year,
    /// `industry_restrictions_2_0`
    pub restrictions_fine: f64,
    /// `ln(restrictions_fine)`
    pub log_restriction: f64,
    /// Shift-share instrument.
    pub bartik_iv: f64,
    /// Sector GDP.
    pub gdp: f64,
    /// `ln(gdp)`
    pub log_gdp: f64,
    /// Entry rate at 2, 3 and 4 digits.
    pub entry_rate: [f64; 3],
}

/// One (sector, year, age) row of the cohort-robust panel.
#[derive(Debug, Clone, PartialEq)]
pub struct RobustCohortRecord {
    /// Base-panel observation.
    pub observation: Observation,
    /// Entry year.
    pub cohort: Year,
    /// Values in the observation year.
    pub current: AnchorValues,
    /// Values in the year before entry.
    pub entry_adjacent: AnchorValues,
}

/// Builds the cohort-robust panel from a sector×age base panel.
#[derive(Debug, Clone)]
pub struct CohortRobustAssembler {
    regulation: UniqueIndex<(Year, SectorCode), RegulationRecord>,
    gdp: UniqueIndex<(Year, SectorCode), f64>,
    entry: Vec<(SectorLevel, UniqueIndex<EntryKey, EntryRecord>)>,
}

impl CohortRobustAssembler {
    /// Index regulation and GDP, and aggregate entry at every level of [`ENTRY_LEVELS`].
    pub fn new(regulation: &[RegulationRecord], gdp: &[GdpRecord], base: &BasePanel) -> Result<Self> {
        if base.variant() != PanelVariant::SectorAge {
            return Err(Error::Validation(format!(
                "cohort-robust panel needs the sector_age_panel, got {}",
                base.variant().name()
            )));
        }
        let entry = ENTRY_LEVELS
            .iter()
            .map(|&(level, digits)| -> Result<(SectorLevel, UniqueIndex<EntryKey, EntryRecord>)> {
                let records = SectorEntryAggregator::new(level, false).aggregate(base)?;
                let index = UniqueIndex::build(&format!("entry_{digits}"), records.into_iter().map(|e| (e.key, e)))?;
                Ok((level, index))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            regulation: UniqueIndex::build("regulation", regulation.iter().map(|r| ((r.year, r.sector), *r)))?,
            gdp: UniqueIndex::build("gdp", gdp.iter().map(|g| ((g.year, g.sector), g.gdp)))?,
            entry,
        })
    }

    /// One record per base row whose age bucket is in `ages`.
    pub fn assemble(&self, base: &BasePanel, ages: &[AgeBucket]) -> Result<RobustPanel> {
        let records: Vec<RobustCohortRecord> = base
            .rows()
            .iter()
            .filter_map(|o| {
                let age = o.key.age.filter(|a| ages.contains(a))?;
                let cohort = o.key.year - Year::from(age.get());
                Some(RobustCohortRecord {
                    observation: o.clone(),
                    cohort,
                    current: self.anchor(o, o.key.year),
                    entry_adjacent: self.anchor(o, cohort - 1),
                })
            })
            .collect();
        if records.is_empty() {
            log::warn!("cohort-robust panel is empty for ages {:?}", ages);
        }
        Ok(RobustPanel { records })
    }

    fn anchor(&self, obs: &Observation, year: Year) -> AnchorValues {
        let sector_2 = obs.sector_2();
        let reg = self.regulation.get(&(year, sector_2));
        let restrictions_fine = reg.map_or(MISSING, |r| r.restrictions_fine);
        let gdp = self.gdp.get(&(year, sector_2)).copied().unwrap_or(MISSING);
        let mut entry_rate = [MISSING; 3];
        for (slot, (level, index)) in entry_rate.iter_mut().zip(&self.entry) {
            let key = EntryKey { year, sector: level.apply(obs.key.sector), size: None };
            *slot = index.get(&key).map_or(MISSING, EntryRecord::entry_rate);
        }
        AnchorValues {
            year,
            restrictions_fine,
            log_restriction: safe_ln(restrictions_fine),
            bartik_iv: reg.map_or(MISSING, |r| r.bartik_iv),
            gdp,
            log_gdp: safe_ln(gdp),
            entry_rate,
        }
    }
}

/// Assembled cohort-robust panel.
#[derive(Debug, Clone, Default)]
pub struct RobustPanel {
    records: Vec<RobustCohortRecord>,
}

impl RobustPanel {
    /// Records in base-panel key order.
    pub fn records(&self) -> &[RobustCohortRecord] {
        &self.records
    }
}

fn anchor_columns(prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = ["year", "industry_restrictions_2_0", "log_restriction", "bartik_iv", "gdp", "log_gdp"]
        .iter()
        .map(|n| format!("{prefix}_{n}"))
        .collect();
    names.extend(ENTRY_LEVELS.iter().map(|(_, d)| format!("{prefix}_entry_rate_{d}")));
    names
}

fn anchor_values(a: &AnchorValues) -> Vec<f64> {
    let mut row =
        vec![f64::from(a.year), a.restrictions_fine, a.log_restriction, a.bartik_iv, a.gdp, a.log_gdp];
    row.extend(a.entry_rate);
    row
}

impl IntoFrame for RobustPanel {
    fn to_frame(&self) -> Result<Frame> {
        let variant = PanelVariant::SectorAge;
        let mut names = key_columns(variant);
        names.extend(Metric::ALL.iter().map(|m| m.name().to_string()));
        names.extend(anchor_columns("cur"));
        names.extend(anchor_columns("entry"));

        let rows = self.records.iter().map(|r| {
            let mut row = key_values(variant, &r.observation);
            row.extend(Metric::ALL.iter().map(|&m| r.observation.metric(m)));
            row.extend(anchor_values(&r.current));
            row.extend(anchor_values(&r.entry_adjacent));
            row
        });
        Frame::from_rows(names, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{FirmCounts, PanelKey};

    fn obs(year: Year, sector: u32, age: u8, firms: f64) -> Observation {
        let key = PanelKey {
            year,
            sector: SectorCode::new(sector),
            size: None,
            age: Some(AgeBucket::from_rank(age as usize)),
        };
        Observation::new(key, FirmCounts { firms, emp: 10.0, ..FirmCounts::default() })
    }

    #[test]
    fn test_anchor_is_entry_year_minus_one() {
        let base = BasePanel::from_observations(
            PanelVariant::SectorAge,
            vec![
                obs(1999, 3111, 0, 2.0),
                obs(1999, 3112, 3, 8.0),
                obs(2003, 3111, 3, 6.0),
                obs(2003, 3111, 0, 1.0),
            ],
        )
        .unwrap();
        let regs: Vec<RegulationRecord> = [1999, 2003]
            .into_iter()
            .map(|year| RegulationRecord {
                year,
                sector: SectorCode::new(31),
                restrictions_coarse: 1.0,
                restrictions_fine: f64::from(year - 1990),
                restrictions_fine_prev: MISSING,
                bartik_iv: 0.5,
            })
            .collect();
        let assembler = CohortRobustAssembler::new(&regs, &[], &base).unwrap();
        let panel = assembler.assemble(&base, &[AgeBucket::from_rank(3)]).unwrap();

        let r = panel.records().iter().find(|r| r.observation.key.year == 2003).unwrap();
        assert_eq!(r.cohort, 2000);
        assert_eq!(r.entry_adjacent.year, 1999);
        assert_eq!(r.entry_adjacent.restrictions_fine, 9.0);
        assert_eq!(r.current.restrictions_fine, 13.0);
        // 1999 at 3 digits (311): 2 entrants over 8 incumbents; at 4 digits (3111): no incumbents.
        assert_eq!(r.entry_adjacent.entry_rate[0], 0.25);
        assert_eq!(r.entry_adjacent.entry_rate[1], 0.25);
        assert!(r.entry_adjacent.entry_rate[2].is_nan());
        assert!(r.current.log_gdp.is_nan());

        let frame = panel.to_frame().unwrap();
        assert_eq!(frame.n_rows(), 2);
        assert!(frame.has_column("entry_entry_rate_3"));
    }

    #[test]
    fn test_requires_sector_age_panel() {
        let base = BasePanel::from_observations(PanelVariant::Sector, vec![]).unwrap();
        assert!(CohortRobustAssembler::new(&[], &[], &base).is_err());
    }
}
