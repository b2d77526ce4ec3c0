//! CSV loader for bulk-importing per-asset OHLC history.

pub mod cleaner;

use crate::models::{DailyReturn, OhlcRow, RawOhlcRow};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::StringRecord;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use self::cleaner::{csv_row_to_ohlc, normalise_asset};

/// Extract the asset id from a CSV filename: `0xabc…_daily.csv` → `0xabc…`.
pub fn asset_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let asset = stem
        .split(|c| c == '_' || c == ' ' || c == '.')
        .next()?
        .trim();

    if asset.is_empty() { None } else { Some(normalise_asset(asset)) }
}

/// Column positions resolved from the header row.
#[derive(Debug, Default)]
struct Columns {
    asset: Option<usize>,
    ts: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        Self {
            asset: find(&["asset_address", "asset", "address", "token"]),
            ts: find(&["ts", "timestamp", "time", "date", "datetime"]),
            open: find(&["price_open", "open"]),
            high: find(&["price_high", "high"]),
            low: find(&["price_low", "low"]),
            close: find(&["price_close", "close", "price"]),
        }
    }

    fn extract(&self, record: &StringRecord) -> RawOhlcRow {
        let get = |idx: Option<usize>| idx.and_then(|i| record.get(i)).map(|s| s.to_string());
        RawOhlcRow {
            asset: get(self.asset),
            ts: get(self.ts),
            open: get(self.open),
            high: get(self.high),
            low: get(self.low),
            close: get(self.close),
        }
    }
}

/// Parse one OHLC CSV. Rows that fail to parse are skipped with a warning.
pub fn load_csv(path: &Path) -> Result<Vec<OhlcRow>> {
    let default_asset = asset_from_filename(path).unwrap_or_default();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let columns = Columns::from_headers(reader.headers()?);
    if columns.ts.is_none() || columns.close.is_none() {
        anyhow::bail!("{:?}: need a timestamp and a close column", path);
    }
    if columns.asset.is_none() && default_asset.is_empty() {
        anyhow::bail!("{:?}: no asset column and no asset in the filename", path);
    }

    debug!("Loading {:?} (default asset {:?})", path, default_asset);

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                skipped += 1;
                continue;
            }
        };

        match csv_row_to_ohlc(&default_asset, &columns.extract(&record)) {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("{:?}: skipped {} unparseable rows", path, skipped);
    }
    info!("{:?}: {} rows loaded", path.file_name().unwrap_or_default(), rows.len());
    Ok(rows)
}

/// Row of an externally produced daily return table.
#[derive(Debug, Deserialize)]
struct DailyRecord {
    asset_address: String,
    day: NaiveDate,
    close: f64,
    log_return: Option<f64>,
}

/// Load `asset_address,day,close,log_return` rows; an empty `log_return` is null.
pub fn load_daily_csv(path: &Path) -> Result<Vec<DailyReturn>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize::<DailyRecord>().enumerate() {
        match result {
            Ok(r) => rows.push(DailyReturn {
                asset: normalise_asset(&r.asset_address),
                day: r.day,
                close: r.close,
                log_return: r.log_return,
            }),
            Err(e) => warn!("Row {} in {:?}: {}", i + 1, path, e),
        }
    }
    info!("{:?}: {} daily rows loaded", path.file_name().unwrap_or_default(), rows.len());
    Ok(rows)
}

/// `.csv` files directly inside `dir`, sorted by path.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read_dir {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("corrnet-loader-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_asset_from_filename() {
        assert_eq!(
            asset_from_filename(Path::new("data/0xABC_ohlc.csv")).as_deref(),
            Some("0xabc")
        );
        assert_eq!(asset_from_filename(Path::new("PEPE daily.csv")).as_deref(), Some("PEPE"));
        assert_eq!(asset_from_filename(Path::new("_x.csv")), None);
    }

    #[test]
    fn test_load_csv_by_header_name() {
        let dir = temp_dir("headers");
        let path = dir.join("0xAAA_1d.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "close,high,low,open,timestamp").unwrap();
        writeln!(f, "1.1,1.2,0.9,1.0,2024-01-01").unwrap();
        writeln!(f, "bad,1.2,0.9,1.0,2024-01-02").unwrap();
        writeln!(f, "1.3,1.4,1.0,1.1,2024-01-03 12:00:00").unwrap();
        drop(f);

        let rows = load_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.asset == "0xaaa"));
        assert_eq!(rows[0].close, 1.1);
        assert_eq!(rows[1].open, Some(1.1));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_csv_requires_close() {
        let dir = temp_dir("noclose");
        let path = dir.join("token.csv");
        std::fs::write(&path, "ts,open\n2024-01-01,1.0\n").unwrap();
        assert!(load_csv(&path).is_err());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_daily_csv() {
        let dir = temp_dir("daily");
        let path = dir.join("returns.csv");
        std::fs::write(
            &path,
            "asset_address,day,close,log_return\n\
             0xAA,2024-01-01,1.0,\n\
             0xaa,2024-01-02,1.1,0.0953\n\
             0xbb,not-a-date,1.0,0.1\n",
        )
        .unwrap();
        let rows = load_daily_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].asset, "0xaa");
        assert_eq!(rows[0].log_return, None);
        assert_eq!(rows[1].log_return, Some(0.0953));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_discover_csv_files_sorted() {
        let dir = temp_dir("discover");
        for name in ["b.csv", "a.CSV", "notes.txt"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let files = discover_csv_files(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a.CSV", "b.csv"]);
        assert!(discover_csv_files(&dir.join("missing")).unwrap().is_empty());
        std::fs::remove_dir_all(dir).ok();
    }
}
