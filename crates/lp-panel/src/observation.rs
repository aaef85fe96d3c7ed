//! Base panel: cleaned firm-dynamics observations keyed by
//! (year, sector[, size class][, age bucket]).

use std::collections::{BTreeMap, HashSet};

use lp_core::{AgeBracket, AgeBucket, Error, MISSING, Result, SectorCode, SizeClass, Year, is_present};
use serde::Serialize;

use crate::derive::{DerivedRates, derive_rates};

/// Additive firm-dynamics counts of one table cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FirmCounts {
    /// Number of firms.
    pub firms: f64,
    /// Number of establishments.
    pub estabs: f64,
    /// Employment.
    pub emp: f64,
    /// Employment denominator (average of current and prior year).
    pub denom: f64,
    /// Establishment births.
    pub estabs_entry: f64,
    /// Establishment deaths.
    pub estabs_exit: f64,
    /// Gross job creation.
    pub job_creation: f64,
    /// Job creation by establishment births.
    pub job_creation_births: f64,
    /// Job creation by continuing establishments.
    pub job_creation_continuers: f64,
    /// Gross job destruction.
    pub job_destruction: f64,
    /// Job destruction by establishment deaths.
    pub job_destruction_deaths: f64,
    /// Job destruction by continuing establishments.
    pub job_destruction_continuers: f64,
    /// Net job creation.
    pub net_job_creation: f64,
    /// Firm deaths.
    pub firmdeath_firms: f64,
    /// Establishments of dying firms.
    pub firmdeath_estabs: f64,
    /// Employment of dying firms.
    pub firmdeath_emp: f64,
}

impl Default for FirmCounts {
    fn default() -> Self {
        Self {
            firms: 0.0,
            estabs: 0.0,
            emp: 0.0,
            denom: 0.0,
            estabs_entry: 0.0,
            estabs_exit: 0.0,
            job_creation: 0.0,
            job_creation_births: 0.0,
            job_creation_continuers: 0.0,
            job_destruction: 0.0,
            job_destruction_deaths: 0.0,
            job_destruction_continuers: 0.0,
            net_job_creation: 0.0,
            firmdeath_firms: 0.0,
            firmdeath_estabs: 0.0,
            firmdeath_emp: 0.0,
        }
    }
}

/// Add `b` into `a`, treating a missing addend as contributing nothing.
fn add_present(a: &mut f64, b: f64) {
    if is_present(b) {
        *a += b;
    }
}

impl FirmCounts {
    /// Accumulate another cell (missing values are skipped, as in a grouped sum).
    pub fn accumulate(&mut self, o: &FirmCounts) {
        add_present(&mut self.firms, o.firms);
        add_present(&mut self.estabs, o.estabs);
        add_present(&mut self.emp, o.emp);
        add_present(&mut self.denom, o.denom);
        add_present(&mut self.estabs_entry, o.estabs_entry);
        add_present(&mut self.estabs_exit, o.estabs_exit);
        add_present(&mut self.job_creation, o.job_creation);
        add_present(&mut self.job_creation_births, o.job_creation_births);
        add_present(&mut self.job_creation_continuers, o.job_creation_continuers);
        add_present(&mut self.job_destruction, o.job_destruction);
        add_present(&mut self.job_destruction_deaths, o.job_destruction_deaths);
        add_present(&mut self.job_destruction_continuers, o.job_destruction_continuers);
        add_present(&mut self.net_job_creation, o.net_job_creation);
        add_present(&mut self.firmdeath_firms, o.firmdeath_firms);
        add_present(&mut self.firmdeath_estabs, o.firmdeath_estabs);
        add_present(&mut self.firmdeath_emp, o.firmdeath_emp);
    }
}

/// Variables of a base-panel cell that can be lagged, differenced or used as outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[allow(missing_docs)]
pub enum Metric {
    Firms,
    Estabs,
    Emp,
    Denom,
    EstabsEntry,
    EstabsExit,
    JobCreation,
    JobCreationBirths,
    JobCreationContinuers,
    JobDestruction,
    JobDestructionDeaths,
    JobDestructionContinuers,
    NetJobCreation,
    FirmdeathFirms,
    FirmdeathEstabs,
    FirmdeathEmp,
    EstabsEntryRate,
    EstabsExitRate,
    JobCreationRate,
    JobDestructionRate,
    NetJobCreationRate,
    ReallocationRate,
    DeathRate,
    LogEmp,
    LogAvgEmp,
}

impl Metric {
    /// All metrics in column order.
    pub const ALL: [Metric; 25] = [
        Metric::Firms,
        Metric::Estabs,
        Metric::Emp,
        Metric::Denom,
        Metric::EstabsEntry,
        Metric::EstabsExit,
        Metric::JobCreation,
        Metric::JobCreationBirths,
        Metric::JobCreationContinuers,
        Metric::JobDestruction,
        Metric::JobDestructionDeaths,
        Metric::JobDestructionContinuers,
        Metric::NetJobCreation,
        Metric::FirmdeathFirms,
        Metric::FirmdeathEstabs,
        Metric::FirmdeathEmp,
        Metric::EstabsEntryRate,
        Metric::EstabsExitRate,
        Metric::JobCreationRate,
        Metric::JobDestructionRate,
        Metric::NetJobCreationRate,
        Metric::ReallocationRate,
        Metric::DeathRate,
        Metric::LogEmp,
        Metric::LogAvgEmp,
    ];

    /// Column name.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Firms => "firms",
            Metric::Estabs => "estabs",
            Metric::Emp => "emp",
            Metric::Denom => "denom",
            Metric::EstabsEntry => "estabs_entry",
            Metric::EstabsExit => "estabs_exit",
            Metric::JobCreation => "job_creation",
            Metric::JobCreationBirths => "job_creation_births",
            Metric::JobCreationContinuers => "job_creation_continuers",
            Metric::JobDestruction => "job_destruction",
            Metric::JobDestructionDeaths => "job_destruction_deaths",
            Metric::JobDestructionContinuers => "job_destruction_continuers",
            Metric::NetJobCreation => "net_job_creation",
            Metric::FirmdeathFirms => "firmdeath_firms",
            Metric::FirmdeathEstabs => "firmdeath_estabs",
            Metric::FirmdeathEmp => "firmdeath_emp",
            Metric::EstabsEntryRate => "estabs_entry_rate",
            Metric::EstabsExitRate => "estabs_exit_rate",
            Metric::JobCreationRate => "job_creation_rate",
            Metric::JobDestructionRate => "job_destruction_rate",
            Metric::NetJobCreationRate => "net_job_creation_rate",
            Metric::ReallocationRate => "reallocation_rate",
            Metric::DeathRate => "death_rate",
            Metric::LogEmp => "log_emp",
            Metric::LogAvgEmp => "log_avg_emp",
        }
    }

    /// Look up a metric by column name.
    pub fn parse(name: &str) -> Option<Metric> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

/// Granularity of a base panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PanelVariant {
    /// (year, 4-digit sector)
    Sector,
    /// (year, 2-digit sector, size class)
    SectorSize,
    /// (year, 4-digit sector, age bucket)
    SectorAge,
    /// (year, 2-digit sector, size class, age bucket)
    SectorAgeSize,
}

impl PanelVariant {
    /// Every variant, in build order.
    pub const ALL: [PanelVariant; 4] =
        [PanelVariant::Sector, PanelVariant::SectorSize, PanelVariant::SectorAge, PanelVariant::SectorAgeSize];

    /// Whether observations are split by age bucket.
    pub fn by_age(&self) -> bool {
        matches!(self, PanelVariant::SectorAge | PanelVariant::SectorAgeSize)
    }

    /// Whether observations are split by size class.
    pub fn by_size(&self) -> bool {
        matches!(self, PanelVariant::SectorSize | PanelVariant::SectorAgeSize)
    }

    /// Sector code width of the panel.
    pub fn sector_digits(&self) -> u8 {
        if self.by_size() { 2 } else { 4 }
    }

    /// File stem used when persisting the panel.
    pub fn name(&self) -> &'static str {
        match self {
            PanelVariant::Sector => "sector_panel",
            PanelVariant::SectorSize => "sector_size_panel",
            PanelVariant::SectorAge => "sector_age_panel",
            PanelVariant::SectorAgeSize => "sector_age_size_panel",
        }
    }
}

/// Unique key of a base-panel observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PanelKey {
    /// Observation year.
    pub year: Year,
    /// Sector at the panel's granularity.
    pub sector: SectorCode,
    /// Size class (size variants only).
    pub size: Option<SizeClass>,
    /// Age bucket (age variants only).
    pub age: Option<AgeBucket>,
}

impl PanelKey {
    /// Same entity, `lag` years earlier.
    pub fn lagged(&self, lag: u8) -> PanelKey {
        PanelKey { year: self.year - Year::from(lag), ..*self }
    }
}

/// One cleaned base-panel row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Unique key.
    pub key: PanelKey,
    /// Summed counts.
    pub counts: FirmCounts,
    /// Derived rates and logs.
    pub rates: DerivedRates,
}

impl Observation {
    /// Build from summed counts, deriving the rates.
    pub fn new(key: PanelKey, counts: FirmCounts) -> Self {
        Self { key, counts, rates: derive_rates(&counts) }
    }

    /// Sector recoded at 2 digits (the regulation / GDP join granularity).
    pub fn sector_2(&self) -> SectorCode {
        self.key.sector.two_digit()
    }

    /// Value of `metric` in this cell.
    pub fn metric(&self, metric: Metric) -> f64 {
        let c = &self.counts;
        let r = &self.rates;
        match metric {
            Metric::Firms => c.firms,
            Metric::Estabs => c.estabs,
            Metric::Emp => c.emp,
            Metric::Denom => c.denom,
            Metric::EstabsEntry => c.estabs_entry,
            Metric::EstabsExit => c.estabs_exit,
            Metric::JobCreation => c.job_creation,
            Metric::JobCreationBirths => c.job_creation_births,
            Metric::JobCreationContinuers => c.job_creation_continuers,
            Metric::JobDestruction => c.job_destruction,
            Metric::JobDestructionDeaths => c.job_destruction_deaths,
            Metric::JobDestructionContinuers => c.job_destruction_continuers,
            Metric::NetJobCreation => c.net_job_creation,
            Metric::FirmdeathFirms => c.firmdeath_firms,
            Metric::FirmdeathEstabs => c.firmdeath_estabs,
            Metric::FirmdeathEmp => c.firmdeath_emp,
            Metric::EstabsEntryRate => r.estabs_entry_rate,
            Metric::EstabsExitRate => r.estabs_exit_rate,
            Metric::JobCreationRate => r.job_creation_rate,
            Metric::JobDestructionRate => r.job_destruction_rate,
            Metric::NetJobCreationRate => r.net_job_creation_rate,
            Metric::ReallocationRate => r.reallocation_rate,
            Metric::DeathRate => r.death_rate,
            Metric::LogEmp => r.log_emp,
            Metric::LogAvgEmp => r.log_avg_emp,
        }
    }
}

/// Raw firm-dynamics row as delivered by the ingestion layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFirmRecord {
    /// Observation year.
    pub year: Year,
    /// Sector code as text (may be a range such as `"31-33"`).
    pub sector: String,
    /// Firm-age bracket label, if the table is split by age.
    pub fage: Option<String>,
    /// Firm-size bracket label, if the table is split by size.
    pub fsize: Option<String>,
    /// Counts; unparseable cells are `MISSING`.
    pub counts: FirmCounts,
}

/// Cleaned base panel of one [`PanelVariant`], sorted by key.
#[derive(Debug, Clone)]
pub struct BasePanel {
    variant: PanelVariant,
    rows: Vec<Observation>,
}

impl BasePanel {
    /// Clean raw rows into a base panel.
    ///
    /// Duplicate raw rows (same year, sector, age and size labels) keep the first
    /// occurrence. Sector codes are truncated to the panel width, counts are
    /// summed per key, and keys without positive firms and employment are dropped.
    pub fn build(variant: PanelVariant, raw: &[RawFirmRecord]) -> Result<Self> {
        let mut seen: HashSet<(Year, &str, Option<&str>, Option<&str>)> = HashSet::new();
        let mut cells: BTreeMap<PanelKey, FirmCounts> = BTreeMap::new();
        let mut n_duplicates = 0usize;
        let mut n_unusable = 0usize;

        for r in raw {
            if !seen.insert((r.year, r.sector.as_str(), r.fage.as_deref(), r.fsize.as_deref())) {
                n_duplicates += 1;
                continue;
            }
            if !is_present(r.counts.firms) || !is_present(r.counts.emp) {
                n_unusable += 1;
                continue;
            }
            let Some(sector) = SectorCode::parse(&r.sector, variant.sector_digits()) else {
                n_unusable += 1;
                continue;
            };
            let age = if variant.by_age() {
                match r.fage.as_deref().and_then(AgeBracket::parse) {
                    Some(bracket) => Some(bracket.bucket()),
                    None => {
                        n_unusable += 1;
                        continue;
                    }
                }
            } else {
                None
            };
            let size = if variant.by_size() {
                Some(SizeClass::from_bracket(r.fsize.as_deref().unwrap_or_default()))
            } else {
                None
            };
            let key = PanelKey { year: r.year, sector, size, age };
            cells.entry(key).or_default().accumulate(&r.counts);
        }

        let rows: Vec<Observation> = cells
            .into_iter()
            .filter(|(_, c)| c.firms > 0.0 && c.emp > 0.0)
            .map(|(key, counts)| Observation::new(key, counts))
            .collect();

        log::debug!(
            "{}: {} raw rows -> {} cells ({} duplicates, {} unusable)",
            variant.name(),
            raw.len(),
            rows.len(),
            n_duplicates,
            n_unusable
        );
        Ok(Self { variant, rows })
    }

    /// Wrap already-clean observations, checking key shape and uniqueness.
    pub fn from_observations(variant: PanelVariant, mut rows: Vec<Observation>) -> Result<Self> {
        rows.sort_by_key(|o| o.key);
        for w in rows.windows(2) {
            if w[0].key == w[1].key {
                return Err(Error::Validation(format!(
                    "{}: duplicate key {:?}",
                    variant.name(),
                    w[0].key
                )));
            }
        }
        for o in &rows {
            if o.key.age.is_some() != variant.by_age() || o.key.size.is_some() != variant.by_size() {
                return Err(Error::Validation(format!(
                    "{}: key {:?} does not match the panel variant",
                    variant.name(),
                    o.key
                )));
            }
        }
        Ok(Self { variant, rows })
    }

    /// Panel granularity.
    pub fn variant(&self) -> PanelVariant {
        self.variant
    }

    /// Observations in key order.
    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` if the panel has no observations.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct observation years.
    pub fn years(&self) -> Vec<Year> {
        let mut years: Vec<Year> = self.rows.iter().map(|o| o.key.year).collect();
        years.dedup();
        years
    }
}

/// Missing-count row, useful for ingestion defaults.
pub fn missing_counts() -> FirmCounts {
    FirmCounts {
        firms: MISSING,
        estabs: MISSING,
        emp: MISSING,
        denom: MISSING,
        estabs_entry: MISSING,
        estabs_exit: MISSING,
        job_creation: MISSING,
        job_creation_births: MISSING,
        job_creation_continuers: MISSING,
        job_destruction: MISSING,
        job_destruction_deaths: MISSING,
        job_destruction_continuers: MISSING,
        net_job_creation: MISSING,
        firmdeath_firms: MISSING,
        firmdeath_estabs: MISSING,
        firmdeath_emp: MISSING,
    }
}
