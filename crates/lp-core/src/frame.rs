//! Column-oriented numeric table exchanged between stages.
//!
//! Keys (years, sector codes, age buckets, size indicators) are stored as exact
//! integers in `f64` columns so a single representation covers persisted panels
//! and estimation inputs. Missing cells hold [`crate::math::MISSING`].

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Named, equal-length `f64` columns in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    names: Vec<String>,
    index: BTreeMap<String, usize>,
    columns: Vec<Vec<f64>>,
    n_rows: usize,
}

impl Frame {
    /// Empty frame with no columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, values)` pairs.
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut frame = Self::new();
        for (name, values) in columns {
            frame.push_column(name, values)?;
        }
        Ok(frame)
    }

    /// Build from a header and row vectors.
    pub fn from_rows<I>(names: Vec<String>, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = Vec<f64>>,
    {
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                return Err(Error::Validation(format!(
                    "row {} has {} cells, header has {}",
                    i,
                    row.len(),
                    names.len()
                )));
            }
            for (col, v) in columns.iter_mut().zip(row) {
                col.push(v);
            }
        }
        Self::from_columns(names.into_iter().zip(columns).collect())
    }

    /// Append a column; the first column fixes the row count.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::Validation(format!("duplicate column `{}`", name)));
        }
        if self.columns.is_empty() {
            self.n_rows = values.len();
        } else if values.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column `{}` has {} rows, expected {}",
                name,
                values.len(),
                self.n_rows
            )));
        }
        self.index.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `true` if the column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Borrow a column.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.index
            .get(name)
            .map(|&j| self.columns[j].as_slice())
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    /// Column as integer keys; `None` where the cell is missing or not integral.
    pub fn keys(&self, name: &str) -> Result<Vec<Option<i64>>> {
        Ok(self
            .column(name)?
            .iter()
            .map(|&v| if v.is_finite() && v.fract() == 0.0 { Some(v as i64) } else { None })
            .collect())
    }

    /// Cell at `(row, name)`.
    pub fn value(&self, row: usize, name: &str) -> Result<f64> {
        let col = self.column(name)?;
        col.get(row)
            .copied()
            .ok_or_else(|| Error::Validation(format!("row {} out of range ({})", row, self.n_rows)))
    }

    /// One row in column order.
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[i]).collect()
    }

    /// New frame holding only rows where `keep` is `true`.
    pub fn filter_rows(&self, keep: &[bool]) -> Result<Frame> {
        if keep.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "mask has {} entries, frame has {} rows",
                keep.len(),
                self.n_rows
            )));
        }
        let columns = self
            .names
            .iter()
            .zip(&self.columns)
            .map(|(name, col)| {
                let kept = col.iter().zip(keep).filter(|(_, k)| **k).map(|(v, _)| *v).collect();
                (name.clone(), kept)
            })
            .collect();
        Frame::from_columns(columns)
    }
}
