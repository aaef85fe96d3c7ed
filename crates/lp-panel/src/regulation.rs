//! Sector-year regulation intensity and the leave-one-out shift-share instrument.
//!
//! Inputs are document-level restriction word counts and a document → industry
//! probability mapping. The intensity of sector `s` in year `t` is
//! `Σ_d p(s, d, t) · words(d, t)`.
//!
//! The instrument fixes each sector's exposure share to each document at a
//! baseline year and combines it with the log exposure of *other* sectors to
//! the same document:
//!
//! ```text
//! share0(s, d)   = p0(s, d)·w0(d) / Σ_d' p0(s, d')·w0(d')
//! own(s, d, t)   = ln(p(s, d, t)·w(d, t))        (0 when non-positive)
//! loo(s, d, t)   = (Σ_s' own(s', d, t) − own(s, d, t)) / (n(d, t) − 1)
//! bartik(s, t)   = Σ_d share0(s, d) · loo(s, d, t)
//! ```
//!
//! `loo` is undefined for a document referenced by a single sector.

use std::collections::BTreeMap;

use lp_core::{Error, MISSING, Result, SectorCode, Year, is_present, math::sum_present};
use serde::Serialize;

use crate::join::UniqueIndex;

/// Restriction word counts of one document in one year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMeasure {
    /// Year.
    pub year: Year,
    /// Document identifier.
    pub document: String,
    /// Coarse restriction count (`restrictions_1_0`).
    pub restrictions_coarse: f64,
    /// Fine restriction count (`restrictions_2_0`).
    pub restrictions_fine: f64,
}

/// Probability that a document pertains to an industry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndustryProbability {
    /// Year.
    pub year: Year,
    /// Document identifier.
    pub document: String,
    /// Industry code.
    pub sector: SectorCode,
    /// Probability weight.
    pub probability: f64,
}

/// Sector-year regulation index row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegulationRecord {
    /// Year.
    pub year: Year,
    /// 2-digit sector.
    pub sector: SectorCode,
    /// Probability-weighted coarse restrictions (`industry_restrictions_1_0`).
    pub restrictions_coarse: f64,
    /// Probability-weighted fine restrictions (`industry_restrictions_2_0`).
    pub restrictions_fine: f64,
    /// Fine restrictions scored with each document's previous-year word count.
    pub restrictions_fine_prev: f64,
    /// Leave-one-out shift-share instrument.
    pub bartik_iv: f64,
}

/// One (year, sector, document) term of the instrument sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftShareContribution {
    /// Year.
    pub year: Year,
    /// Sector.
    pub sector: SectorCode,
    /// Document.
    pub document: String,
    /// `ln(p·w)` of this sector (0 when `p·w` is non-positive).
    pub own_value: f64,
    /// Mean of `own_value` over the other sectors referencing the document.
    pub loo_average: f64,
    /// Baseline share (0 when the pair is absent at baseline).
    pub share: f64,
    /// `loo_average · share`
    pub value: f64,
}

/// Builds [`RegulationRecord`]s from document-level inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegulationIndexBuilder {
    baseline_year: Option<Year>,
}

type DocIndex<'a> = UniqueIndex<(Year, &'a str), &'a DocumentMeasure>;

impl RegulationIndexBuilder {
    /// Builder whose baseline is the earliest probability year.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the shift-share baseline year.
    pub fn with_baseline_year(mut self, year: Year) -> Self {
        self.baseline_year = Some(year);
        self
    }

    fn index_documents(docs: &[DocumentMeasure]) -> Result<DocIndex<'_>> {
        UniqueIndex::build("regulation documents", docs.iter().map(|d| ((d.year, d.document.as_str()), d)))
    }

    fn baseline(&self, probs: &[IndustryProbability]) -> Result<Year> {
        self.baseline_year
            .or_else(|| probs.iter().map(|p| p.year).min())
            .ok_or_else(|| Error::Validation("industry probability table is empty".into()))
    }

    /// Probability-weighted restriction measures per (year, sector); `bartik_iv` is `MISSING`.
    pub fn intensity(
        &self,
        docs: &[DocumentMeasure],
        probs: &[IndustryProbability],
    ) -> Result<Vec<RegulationRecord>> {
        let doc_index = Self::index_documents(docs)?;
        let mut terms: BTreeMap<(Year, SectorCode), [Vec<f64>; 3]> = BTreeMap::new();
        for p in probs {
            let (coarse, fine) = doc_index
                .get(&(p.year, p.document.as_str()))
                .map_or((MISSING, MISSING), |d| (d.restrictions_coarse, d.restrictions_fine));
            let fine_prev = doc_index
                .get(&(p.year - 1, p.document.as_str()))
                .map_or(MISSING, |d| d.restrictions_fine);
            let slot = terms.entry((p.year, p.sector)).or_default();
            slot[0].push(p.probability * coarse);
            slot[1].push(p.probability * fine);
            slot[2].push(p.probability * fine_prev);
        }
        Ok(terms
            .into_iter()
            .map(|((year, sector), [coarse, fine, prev])| RegulationRecord {
                year,
                sector,
                restrictions_coarse: sum_present(coarse),
                restrictions_fine: sum_present(fine),
                restrictions_fine_prev: sum_present(prev),
                bartik_iv: MISSING,
            })
            .collect())
    }

    /// Baseline exposure shares per (sector, document), normalised to sum to 1 per sector.
    pub fn baseline_shares(
        &self,
        docs: &[DocumentMeasure],
        probs: &[IndustryProbability],
    ) -> Result<BTreeMap<(SectorCode, String), f64>> {
        let doc_index = Self::index_documents(docs)?;
        let baseline = self.baseline(probs)?;

        let exposures: Vec<(SectorCode, &str, f64)> = probs
            .iter()
            .filter(|p| p.year == baseline)
            .map(|p| {
                let words =
                    doc_index.get(&(p.year, p.document.as_str())).map_or(MISSING, |d| d.restrictions_fine);
                (p.sector, p.document.as_str(), p.probability * words)
            })
            .collect();
        // a (sector, document) pair must be unique at baseline
        UniqueIndex::build("baseline shares", exposures.iter().map(|(s, d, _)| ((*s, *d), ())))?;

        let mut totals: BTreeMap<SectorCode, f64> = BTreeMap::new();
        for (s, _, e) in &exposures {
            if is_present(*e) {
                *totals.entry(*s).or_default() += e;
            }
        }
        Ok(exposures
            .into_iter()
            .map(|(s, d, e)| {
                let share = if e > 0.0 { e / totals[&s] } else { 0.0 };
                ((s, d.to_string()), share)
            })
            .collect())
    }

    /// Every (year, sector, document) instrument term.
    pub fn shift_share_contributions(
        &self,
        docs: &[DocumentMeasure],
        probs: &[IndustryProbability],
    ) -> Result<Vec<ShiftShareContribution>> {
        let shares = self.baseline_shares(docs, probs)?;
        let doc_index = Self::index_documents(docs)?;

        let own: Vec<f64> = probs
            .iter()
            .map(|p| {
                let words =
                    doc_index.get(&(p.year, p.document.as_str())).map_or(MISSING, |d| d.restrictions_fine);
                let exposure = p.probability * words;
                if exposure > 0.0 { exposure.ln() } else { 0.0 }
            })
            .collect();

        let mut by_document: BTreeMap<(Year, &str), (f64, usize)> = BTreeMap::new();
        for (p, v) in probs.iter().zip(&own) {
            let acc = by_document.entry((p.year, p.document.as_str())).or_default();
            acc.0 += v;
            acc.1 += 1;
        }

        let mut n_undefined = 0usize;
        let out: Vec<ShiftShareContribution> = probs
            .iter()
            .zip(own)
            .map(|(p, own_value)| {
                let (sum, n) = by_document[&(p.year, p.document.as_str())];
                let loo_average = if n > 1 { (sum - own_value) / (n - 1) as f64 } else { MISSING };
                if !is_present(loo_average) {
                    n_undefined += 1;
                }
                let share = shares.get(&(p.sector, p.document.clone())).copied().unwrap_or(0.0);
                ShiftShareContribution {
                    year: p.year,
                    sector: p.sector,
                    document: p.document.clone(),
                    own_value,
                    loo_average,
                    share,
                    value: loo_average * share,
                }
            })
            .collect();
        if n_undefined > 0 {
            log::debug!("shift-share: {} single-sector document terms have no leave-one-out value", n_undefined);
        }
        Ok(out)
    }

    /// Intensity measures plus the summed instrument per (year, sector).
    pub fn build(&self, docs: &[DocumentMeasure], probs: &[IndustryProbability]) -> Result<Vec<RegulationRecord>> {
        let mut bartik: BTreeMap<(Year, SectorCode), Vec<f64>> = BTreeMap::new();
        for c in self.shift_share_contributions(docs, probs)? {
            bartik.entry((c.year, c.sector)).or_default().push(c.value);
        }
        let mut records = self.intensity(docs, probs)?;
        for r in &mut records {
            if let Some(values) = bartik.remove(&(r.year, r.sector)) {
                r.bartik_iv = sum_present(values);
            }
        }
        log::info!("regulation index: {} sector-year rows", records.len());
        Ok(records)
    }
}

/// Row of a pre-aggregated regulation index table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegulationIndexRow {
    /// Year.
    pub year: Year,
    /// Sector.
    pub sector: SectorCode,
    /// `industry_restrictions_1_0`
    pub restrictions_coarse: f64,
    /// `industry_restrictions_2_0`
    pub restrictions_fine: f64,
}

impl From<RegulationIndexRow> for RegulationRecord {
    fn from(r: RegulationIndexRow) -> Self {
        RegulationRecord {
            year: r.year,
            sector: r.sector,
            restrictions_coarse: r.restrictions_coarse,
            restrictions_fine: r.restrictions_fine,
            restrictions_fine_prev: MISSING,
            bartik_iv: MISSING,
        }
    }
}
