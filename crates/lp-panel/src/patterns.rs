//! Aggregate sector-year pattern panel: the sector×age panel summed to
//! (year, 2-digit sector) and joined to regulation, GDP and entry.

use std::collections::BTreeMap;

use lp_core::{Error, Frame, IntoFrame, MISSING, Result, SectorCode, Year, safe_div};

use crate::derive::{DerivedRates, derive_rates};
use crate::entry::{EntryKey, EntryRecord, SectorEntryAggregator, SectorLevel};
use crate::gdp::GdpRecord;
use crate::join::UniqueIndex;
use crate::observation::{BasePanel, FirmCounts};
use crate::regulation::RegulationRecord;

/// One (year, 2-digit sector) row.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternRecord {
    /// Year.
    pub year: Year,
    /// Recoded 2-digit sector.
    pub sector: SectorCode,
    /// Counts summed over ages and finer sectors.
    pub counts: FirmCounts,
    /// Rates of the summed counts.
    pub rates: DerivedRates,
    /// Matching regulation row, if any.
    pub regulation: Option<RegulationRecord>,
    /// Sector GDP.
    pub gdp: f64,
    /// Entrant firms.
    pub entry: f64,
    /// Incumbent firms.
    pub incumbents: f64,
}

impl PatternRecord {
    /// `entry / firms`
    pub fn entry_rate(&self) -> f64 {
        safe_div(self.entry, self.counts.firms)
    }
}

/// Build the pattern panel from the sector×age base panel.
pub fn build_patterns(base: &BasePanel, regulation: &[RegulationRecord], gdp: &[GdpRecord]) -> Result<PatternPanel> {
    let variant = base.variant();
    if !variant.by_age() || variant.by_size() {
        return Err(Error::Validation(format!(
            "pattern panel needs the sector_age_panel, got {}",
            variant.name()
        )));
    }
    let regulation = UniqueIndex::build("regulation", regulation.iter().map(|r| ((r.year, r.sector), *r)))?;
    let gdp = UniqueIndex::build("gdp", gdp.iter().map(|g| ((g.year, g.sector), g.gdp)))?;
    let entry_rows = SectorEntryAggregator::new(SectorLevel::TwoDigit, false).aggregate(base)?;
    let entry: UniqueIndex<EntryKey, EntryRecord> =
        UniqueIndex::build("entry_2", entry_rows.into_iter().map(|e| (e.key, e)))?;

    let mut sums: BTreeMap<(Year, SectorCode), FirmCounts> = BTreeMap::new();
    for o in base.rows() {
        sums.entry((o.key.year, o.sector_2())).or_default().accumulate(&o.counts);
    }

    let rows = sums
        .into_iter()
        .map(|((year, sector), counts)| {
            let e = entry.get(&EntryKey { year, sector, size: None });
            PatternRecord {
                year,
                sector,
                counts,
                rates: derive_rates(&counts),
                regulation: regulation.get(&(year, sector)).copied(),
                gdp: gdp.get(&(year, sector)).copied().unwrap_or(MISSING),
                entry: e.map_or(MISSING, |e| e.entry),
                incumbents: e.map_or(MISSING, |e| e.incumbents),
            }
        })
        .collect();
    Ok(PatternPanel(rows))
}

/// Pattern panel ready for persistence.
#[derive(Debug, Clone, Default)]
pub struct PatternPanel(pub Vec<PatternRecord>);

const COLUMNS: [&str; 21] = [
    "year",
    "sector_2",
    "firms",
    "estabs",
    "emp",
    "estabs_entry",
    "estabs_exit",
    "firmdeath_firms",
    "industry_restrictions_1_0",
    "industry_restrictions_2_0",
    "bartik_iv",
    "gdp",
    "entry",
    "incumbents",
    "entry_rate",
    "death_rate",
    "estabs_entry_rate",
    "estabs_exit_rate",
    "job_creation_rate",
    "job_destruction_rate",
    "net_job_creation_rate",
];

impl IntoFrame for PatternPanel {
    fn to_frame(&self) -> Result<Frame> {
        let names: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows = self.0.iter().map(|p| {
            let (coarse, fine, bartik) = p
                .regulation
                .map_or((MISSING, MISSING, MISSING), |r| (r.restrictions_coarse, r.restrictions_fine, r.bartik_iv));
            vec![
                f64::from(p.year),
                f64::from(p.sector.code()),
                p.counts.firms,
                p.counts.estabs,
                p.counts.emp,
                p.counts.estabs_entry,
                p.counts.estabs_exit,
                p.counts.firmdeath_firms,
                coarse,
                fine,
                bartik,
                p.gdp,
                p.entry,
                p.incumbents,
                p.entry_rate(),
                p.rates.death_rate,
                p.rates.estabs_entry_rate,
                p.rates.estabs_exit_rate,
                p.rates.job_creation_rate,
                p.rates.job_destruction_rate,
                p.rates.net_job_creation_rate,
            ]
        });
        Frame::from_rows(names, rows)
    }
}
