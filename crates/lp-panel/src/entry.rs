//! Entrant / incumbent firm counts per (year, sector[, size class]).

use std::collections::BTreeMap;

use lp_core::{Error, MISSING, Result, SectorCode, SizeClass, Year, safe_div};
use serde::Serialize;

use crate::observation::BasePanel;

/// Sector granularity an entry series is aggregated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SectorLevel {
    /// Keep the base panel's own sector code.
    AsPanel,
    /// Truncate to this many digits.
    Digits(u8),
    /// Recoded 2-digit sector (regulation / GDP granularity).
    TwoDigit,
}

impl SectorLevel {
    /// Map a panel sector code to this level.
    pub fn apply(&self, sector: SectorCode) -> SectorCode {
        match self {
            SectorLevel::AsPanel => sector,
            SectorLevel::Digits(d) => sector.truncate(*d),
            SectorLevel::TwoDigit => sector.two_digit(),
        }
    }
}

/// Key of an entry series row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntryKey {
    /// Year.
    pub year: Year,
    /// Sector at the aggregation level.
    pub sector: SectorCode,
    /// Size class, when grouped by size.
    pub size: Option<SizeClass>,
}

/// Entrant and incumbent firm counts of one key.
///
/// A partition with no rows is absent (`MISSING`), not zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntryRecord {
    /// Key.
    pub key: EntryKey,
    /// Firms in the entrant bucket.
    pub entry: f64,
    /// Firms in every other bucket.
    pub incumbents: f64,
}

impl EntryRecord {
    /// `entry / incumbents`, undefined when incumbents are zero or absent.
    pub fn entry_rate(&self) -> f64 {
        safe_div(self.entry, self.incumbents)
    }
}

/// Partitions a by-age base panel into entrants and incumbents.
#[derive(Debug, Clone, Copy)]
pub struct SectorEntryAggregator {
    level: SectorLevel,
    by_size: bool,
}

impl SectorEntryAggregator {
    /// Group by sector at `level`, optionally also by size class.
    pub fn new(level: SectorLevel, by_size: bool) -> Self {
        Self { level, by_size }
    }

    /// Sum firm counts per key and partition.
    pub fn aggregate(&self, panel: &BasePanel) -> Result<Vec<EntryRecord>> {
        let variant = panel.variant();
        if !variant.by_age() {
            return Err(Error::Validation(format!(
                "entry series need an age-split panel, got {}",
                variant.name()
            )));
        }
        if self.by_size && !variant.by_size() {
            return Err(Error::Validation(format!(
                "size-grouped entry series need a size-split panel, got {}",
                variant.name()
            )));
        }

        let mut sums: BTreeMap<EntryKey, (Option<f64>, Option<f64>)> = BTreeMap::new();
        for o in panel.rows() {
            let key = EntryKey {
                year: o.key.year,
                sector: self.level.apply(o.key.sector),
                size: if self.by_size { o.key.size } else { None },
            };
            let (entry, incumbents) = sums.entry(key).or_default();
            let slot = if o.key.age.is_some_and(|a| a.is_entrant()) { entry } else { incumbents };
            *slot.get_or_insert(0.0) += o.counts.firms;
        }

        Ok(sums
            .into_iter()
            .map(|(key, (entry, incumbents))| EntryRecord {
                key,
                entry: entry.unwrap_or(MISSING),
                incumbents: incumbents.unwrap_or(MISSING),
            })
            .collect())
    }
}
