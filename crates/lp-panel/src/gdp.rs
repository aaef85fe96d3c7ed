//! Sector GDP: wide (sector × year) table reshaped to one row per (year, sector).

use lp_core::{Error, Result, SectorCode, Year};
use serde::Serialize;

/// GDP of one 2-digit sector in one year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GdpRecord {
    /// Year.
    pub year: Year,
    /// 2-digit sector.
    pub sector: SectorCode,
    /// GDP level.
    pub gdp: f64,
}

/// Wide GDP table: one row per sector, one column per year.
#[derive(Debug, Clone, Default)]
pub struct WideGdpTable {
    /// Year of each value column.
    pub years: Vec<Year>,
    /// `(sector, values)` with one value per entry of `years`.
    pub rows: Vec<(SectorCode, Vec<f64>)>,
}

impl WideGdpTable {
    /// Reshape to long form.
    pub fn melt(&self) -> Result<Vec<GdpRecord>> {
        let mut out = Vec::with_capacity(self.years.len() * self.rows.len());
        for (sector, values) in &self.rows {
            if values.len() != self.years.len() {
                return Err(Error::Validation(format!(
                    "GDP row for sector {} has {} values, expected {}",
                    sector,
                    values.len(),
                    self.years.len()
                )));
            }
            out.extend(
                self.years.iter().zip(values).map(|(&year, &gdp)| GdpRecord { year, sector: *sector, gdp }),
            );
        }
        Ok(out)
    }
}
