//! Downstream outputs: metrics CSV for charting, terminal summaries.

use crate::models::NetworkMetrics;
use crate::storage::Repository;
use crate::utils::fmt_number;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const METRICS_FILE: &str = "network_metrics.csv";

const BAR_WIDTH: usize = 24;

/// Write the metrics time series to `<dir>/network_metrics.csv`.
pub fn write_metrics_csv(dir: &Path, metrics: &[NetworkMetrics]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;
    let path = dir.join(METRICS_FILE);

    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for m in metrics {
        writer.serialize(m)?;
    }
    writer.flush()?;
    Ok(path)
}

/// One line per month with a density bar.
pub fn render_summary(metrics: &[NetworkMetrics], threshold: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Temporal network (|corr| >= {threshold})");
    let _ = writeln!(
        out,
        "{:<8} {:>6} {:>7} {:>8} {:>8} {:>5} {:>6}  density",
        "month", "assets", "edges", "avg_deg", "clust", "maxd", "lcc"
    );
    for m in metrics {
        let filled = (m.density.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
        let _ = writeln!(
            out,
            "{:<8} {:>6} {:>7} {:>8.3} {:>8.4} {:>5} {:>6}  {}{} {:.3}",
            m.month.to_string(),
            m.n_assets,
            m.n_edges,
            m.avg_degree,
            m.avg_clustering,
            m.max_degree,
            m.lcc_size,
            "█".repeat(filled),
            "·".repeat(BAR_WIDTH - filled),
            m.density,
        );
    }
    out
}

// ── Database stats ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DbStats {
    pub ohlc_rows: i64,
    pub daily_rows: i64,
    pub assets: i64,
    pub correlation_rows: i64,
    pub metric_months: i64,
    pub months_with_data: usize,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub last_run: Option<String>,
}

impl DbStats {
    pub fn collect(repo: &Repository) -> Result<Self> {
        let (from, to) = repo.date_range().unwrap_or((None, None));
        Ok(Self {
            ohlc_rows: repo.ohlc_count()?,
            daily_rows: repo.daily_count()?,
            assets: repo.asset_count()?,
            correlation_rows: repo.correlation_count()?,
            metric_months: repo.metrics_count()?,
            months_with_data: repo.list_months()?.len(),
            from,
            to,
            last_run: repo.last_run()?.map(|(stage, status)| format!("{stage} ({status})")),
        })
    }

    pub fn render(&self) -> String {
        let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or("-".into());
        let rule = "─".repeat(36);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "  corrnet: database stats");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "  Assets       : {}", fmt_number(self.assets));
        let _ = writeln!(out, "  OHLC rows    : {}", fmt_number(self.ohlc_rows));
        let _ = writeln!(out, "  Daily rows   : {}", fmt_number(self.daily_rows));
        let _ = writeln!(out, "  Corr rows    : {}", fmt_number(self.correlation_rows));
        let _ = writeln!(out, "  Data months  : {}", self.months_with_data);
        let _ = writeln!(out, "  Metric months: {}", fmt_number(self.metric_months));
        let _ = writeln!(out, "  From         : {}", date(self.from));
        let _ = writeln!(out, "  To           : {}", date(self.to));
        let _ = writeln!(out, "  Last run     : {}", self.last_run.as_deref().unwrap_or("-"));
        let _ = write!(out, "{rule}");
        out
    }
}
