//! Persistence: frames as CSV (missing = empty cell), record tables, JSON summaries.

use anyhow::{Context, Result};
use lp_core::{Frame, MISSING, is_present};
use serde::Serialize;
use std::path::Path;

fn format_cell(v: f64) -> String {
    if !is_present(v) {
        String::new()
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

pub fn write_frame(path: &Path, frame: &Frame) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))?;
    wtr.write_record(frame.names())?;
    for i in 0..frame.n_rows() {
        wtr.write_record(frame.row(i).into_iter().map(format_cell))?;
    }
    wtr.flush()?;
    tracing::info!(path = %path.display(), rows = frame.n_rows(), columns = frame.names().len(), "wrote panel");
    Ok(())
}

/// Read a frame written by [`write_frame`]; empty or unparseable cells are missing.
pub fn read_frame(path: &Path) -> Result<Frame> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let names: Vec<String> =
        rdr.headers().context("failed to read CSV headers")?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("failed to read {}", path.display()))?;
        rows.push(rec.iter().map(|c| if c.is_empty() { MISSING } else { c.parse().unwrap_or(MISSING) }).collect());
    }
    Frame::from_rows(names, rows).with_context(|| format!("{} is not a rectangular panel", path.display()))
}

/// One CSV row per serialized record.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))?;
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    if let Some(path) = path {
        std::fs::write(path, serde_json::to_string_pretty(value)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn test_frame_survives_persistence() {
        let frame = Frame::from_columns(vec![
            ("year".into(), vec![2001.0, 2002.0]),
            ("L_0_log_restriction".into(), vec![0.125, MISSING]),
        ])
        .unwrap();
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let path = std::env::temp_dir().join(format!("lifepath_frame_{}_{}.csv", std::process::id(), nanos));
        write_frame(&path, &frame).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "year,L_0_log_restriction\n2001,0.125\n2002,\n");

        let back = read_frame(&path).unwrap();
        assert_eq!(back.names(), frame.names());
        assert_eq!(back.column("year").unwrap(), &[2001.0, 2002.0]);
        assert!(back.value(1, "L_0_log_restriction").unwrap().is_nan());
        std::fs::remove_file(path).ok();
    }
}
