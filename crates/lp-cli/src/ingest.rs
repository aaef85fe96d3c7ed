//! Lenient CSV readers for the raw input tables.
//!
//! Numeric cells that do not parse (suppression flags such as `D`, `S`, `X`)
//! are read as missing. Year cells use their first four characters.

use anyhow::{Context, Result};
use lp_core::{MISSING, SectorCode, Year, is_present};
use lp_panel::{
    DocumentMeasure, FirmCounts, IndustryProbability, RawFirmRecord, RegulationIndexRow, WideGdpTable, missing_counts,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Count columns of a firm-dynamics table, in [`FirmCounts`] field order.
const COUNT_COLUMNS: [&str; 16] = [
    "firms",
    "estabs",
    "emp",
    "denom",
    "estabs_entry",
    "estabs_exit",
    "job_creation",
    "job_creation_births",
    "job_creation_continuers",
    "job_destruction",
    "job_destruction_deaths",
    "job_destruction_continuers",
    "net_job_creation",
    "firmdeath_firms",
    "firmdeath_estabs",
    "firmdeath_emp",
];

fn count_slot(c: &mut FirmCounts, column: usize) -> Option<&mut f64> {
    Some(match column {
        0 => &mut c.firms,
        1 => &mut c.estabs,
        2 => &mut c.emp,
        3 => &mut c.denom,
        4 => &mut c.estabs_entry,
        5 => &mut c.estabs_exit,
        6 => &mut c.job_creation,
        7 => &mut c.job_creation_births,
        8 => &mut c.job_creation_continuers,
        9 => &mut c.job_destruction,
        10 => &mut c.job_destruction_deaths,
        11 => &mut c.job_destruction_continuers,
        12 => &mut c.net_job_creation,
        13 => &mut c.firmdeath_firms,
        14 => &mut c.firmdeath_estabs,
        15 => &mut c.firmdeath_emp,
        _ => return None,
    })
}

/// Add `v` into `acc`; a cell stays missing until a present value arrives.
fn add_present(acc: &mut f64, v: f64) {
    if is_present(v) {
        *acc = if is_present(*acc) { *acc + v } else { v };
    }
}

/// Parse a numeric cell; anything unparseable or non-finite is missing.
pub fn parse_number(raw: &str) -> f64 {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(MISSING)
}

/// Year from the first four characters (`"1998"`, `"1998-01-01"`, `"1998Q1"`).
pub fn parse_year(raw: &str) -> Option<Year> {
    let prefix: String = raw.trim().chars().take(4).collect();
    if prefix.len() != 4 {
        return None;
    }
    prefix.parse().ok()
}

struct CsvTable {
    path: PathBuf,
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<csv::StringRecord>,
}

impl CsvTable {
    fn read(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let headers: Vec<String> = rdr
            .headers()
            .context("failed to read CSV headers")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() {
            anyhow::bail!("{}: CSV file has no columns", path.display());
        }
        let index = headers.iter().enumerate().map(|(i, h)| (h.clone(), i)).collect();

        let mut rows = Vec::new();
        for (i, rec) in rdr.records().enumerate() {
            rows.push(rec.with_context(|| format!("{}: malformed record {}", path.display(), i + 1))?);
        }
        tracing::debug!(path = %path.display(), rows = rows.len(), "read table");
        Ok(Self { path: path.to_path_buf(), headers, index, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn require(&self, names: &[&str]) -> Result<usize> {
        names
            .iter()
            .find_map(|n| self.column(n))
            .with_context(|| format!("{}: missing column `{}`", self.path.display(), names.join("` / `")))
    }
}

fn cell(rec: &csv::StringRecord, column: usize) -> &str {
    rec.get(column).unwrap_or("").trim()
}

fn optional_label(rec: &csv::StringRecord, column: Option<usize>) -> Option<String> {
    column.map(|j| cell(rec, j).to_string()).filter(|s| !s.is_empty())
}

/// Firm-dynamics table (`year`, `sector`, optional `fage` / `fsize`, count columns).
///
/// Rows with an unreadable year are skipped; absent count columns are missing.
pub fn read_firm_table(path: &Path) -> Result<Vec<RawFirmRecord>> {
    let table = CsvTable::read(path)?;
    let year = table.require(&["year"])?;
    let sector = table.require(&["sector"])?;
    let fage = table.column("fage");
    let fsize = table.column("fsize");
    let counts: Vec<(usize, usize)> = COUNT_COLUMNS
        .iter()
        .enumerate()
        .filter_map(|(slot, name)| table.column(name).map(|j| (slot, j)))
        .collect();
    if !counts.iter().any(|&(slot, _)| slot == 0) || !counts.iter().any(|&(slot, _)| slot == 2) {
        anyhow::bail!("{}: firm table needs `firms` and `emp` columns", path.display());
    }

    let mut out = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for rec in &table.rows {
        let Some(y) = parse_year(cell(rec, year)) else {
            skipped += 1;
            continue;
        };
        let mut c = missing_counts();
        for &(slot, j) in &counts {
            if let Some(v) = count_slot(&mut c, slot) {
                *v = parse_number(cell(rec, j));
            }
        }
        out.push(RawFirmRecord {
            year: y,
            sector: cell(rec, sector).to_string(),
            fage: optional_label(rec, fage),
            fsize: optional_label(rec, fsize),
            counts: c,
        });
    }
    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "rows without a readable year were skipped");
    }
    tracing::info!(path = %path.display(), rows = out.len(), "loaded firm table");
    Ok(out)
}

/// Regulation document word counts (`year`, `document_reference`, `restrictions_1_0`, `restrictions_2_0`).
pub fn read_documents(path: &Path) -> Result<Vec<DocumentMeasure>> {
    let table = CsvTable::read(path)?;
    let year = table.require(&["year"])?;
    let doc = table.require(&["document_reference"])?;
    let coarse = table.column("restrictions_1_0");
    let fine = table.require(&["restrictions_2_0"])?;

    let out: Vec<DocumentMeasure> = table
        .rows
        .iter()
        .filter_map(|rec| {
            Some(DocumentMeasure {
                year: parse_year(cell(rec, year))?,
                document: cell(rec, doc).to_string(),
                restrictions_coarse: coarse.map_or(MISSING, |j| parse_number(cell(rec, j))),
                restrictions_fine: parse_number(cell(rec, fine)),
            })
        })
        .collect();
    tracing::info!(path = %path.display(), rows = out.len(), "loaded regulation documents");
    Ok(out)
}

/// Document → industry probabilities (`year`, `document_reference`, `NAICS`, `probability`).
///
/// Industry codes are read at the 2-digit regulation granularity. Finer codes
/// that fold into the same 2-digit sector have their probabilities summed, so
/// each (year, document, sector) appears once.
pub fn read_probabilities(path: &Path) -> Result<Vec<IndustryProbability>> {
    let table = CsvTable::read(path)?;
    let year = table.require(&["year"])?;
    let doc = table.require(&["document_reference"])?;
    let naics = table.require(&["NAICS", "sector_reg", "sector"])?;
    let prob = table.require(&["probability"])?;

    let mut cells: BTreeMap<(Year, String, SectorCode), f64> = BTreeMap::new();
    let mut n_rows = 0usize;
    for rec in &table.rows {
        let (Some(y), Some(sector)) = (parse_year(cell(rec, year)), SectorCode::parse(cell(rec, naics), 2)) else {
            continue;
        };
        n_rows += 1;
        let slot = cells.entry((y, cell(rec, doc).to_string(), sector)).or_insert(MISSING);
        add_present(slot, parse_number(cell(rec, prob)));
    }
    let out: Vec<IndustryProbability> = cells
        .into_iter()
        .map(|((year, document, sector), probability)| IndustryProbability { year, document, sector, probability })
        .collect();
    tracing::info!(path = %path.display(), rows = n_rows, cells = out.len(), "loaded industry probabilities");
    Ok(out)
}

/// Pre-aggregated regulation index (`year`, `NAICS`, `industry_restrictions_1_0`, `industry_restrictions_2_0`).
///
/// Rows whose codes fold into the same 2-digit sector are summed.
pub fn read_regulation_index(path: &Path) -> Result<Vec<RegulationIndexRow>> {
    let table = CsvTable::read(path)?;
    let year = table.require(&["year"])?;
    let naics = table.require(&["NAICS", "sector_reg", "sector"])?;
    let coarse = table.column("industry_restrictions_1_0");
    let fine = table.require(&["industry_restrictions_2_0"])?;

    let mut cells: BTreeMap<(Year, SectorCode), (f64, f64)> = BTreeMap::new();
    for rec in &table.rows {
        let (Some(y), Some(sector)) = (parse_year(cell(rec, year)), SectorCode::parse(cell(rec, naics), 2)) else {
            continue;
        };
        let (c, f) = cells.entry((y, sector)).or_insert((MISSING, MISSING));
        add_present(c, coarse.map_or(MISSING, |j| parse_number(cell(rec, j))));
        add_present(f, parse_number(cell(rec, fine)));
    }
    let out: Vec<RegulationIndexRow> = cells
        .into_iter()
        .map(|((year, sector), (restrictions_coarse, restrictions_fine))| RegulationIndexRow {
            year,
            sector,
            restrictions_coarse,
            restrictions_fine,
        })
        .collect();
    tracing::info!(path = %path.display(), rows = out.len(), "loaded regulation index");
    Ok(out)
}

/// Wide GDP table: a `sector_2` column plus one column per year.
pub fn read_wide_gdp(path: &Path) -> Result<WideGdpTable> {
    let table = CsvTable::read(path)?;
    let sector = table.require(&["sector_2"])?;
    let year_columns: Vec<(usize, Year)> = table
        .headers
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != sector)
        .filter_map(|(j, h)| h.parse::<Year>().ok().map(|y| (j, y)))
        .collect();
    if year_columns.is_empty() {
        anyhow::bail!("{}: GDP table has no year columns", path.display());
    }

    let rows = table
        .rows
        .iter()
        .filter_map(|rec| {
            let code = SectorCode::parse(cell(rec, sector), 2)?;
            Some((code, year_columns.iter().map(|&(j, _)| parse_number(cell(rec, j))).collect()))
        })
        .collect();
    Ok(WideGdpTable { years: year_columns.iter().map(|&(_, y)| y).collect(), rows })
}
