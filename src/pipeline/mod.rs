//! Pipeline orchestrator: ties the store and the monthly analytics together.
//!
//! ## Stages
//!
//! `build_daily()` rebuilds `ohlc_daily` (last close per day + log return) from `ohlcv`.
//!
//! `build_correlations()`:
//!   1. Load daily returns for the selected months, group by month
//!   2. Compute each month on the blocking pool, at most `pipeline.concurrency` at once
//!   3. Replace each month's rows in its own transaction (retried on failure)
//!
//! `build_network()` follows the same shape, reading correlations plus each month's
//! active asset set and writing one `temporal_network_metrics` row per month.
//!
//! A month that fails is logged and counted; the other months still land.

use crate::analysis::{
    AssetGraph, CorrelationOutcome, MonthContext, MonthPanel, group_by_month, monthly_correlations,
    network_metrics,
};
use crate::config::AppConfig;
use crate::models::{CorrelationEdge, MonthKey, MonthRange, NetworkMetrics};
use crate::storage::Repository;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, error, info, warn};

pub struct Pipeline {
    config: AppConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageStats {
    pub months: usize,
    pub rows_written: usize,
    pub errors: usize,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run a store write, retrying with jittered exponential backoff.
    async fn write_with_retry<T, F>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let p = &self.config.pipeline;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(p.retry_base_ms.max(1))
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(p.max_retries);

        Retry::spawn(strategy, || {
            let res = op();
            if let Err(e) = &res {
                warn!("{}: write attempt failed: {:#}", label, e);
            }
            std::future::ready(res)
        })
        .await
    }

    /// Fan month jobs out to the blocking pool, bounded by `pipeline.concurrency`.
    fn spawn_months<T, F>(&self, jobs: Vec<(MonthKey, F)>) -> Vec<(MonthKey, JoinHandle<Result<T>>)>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let sem = Arc::new(Semaphore::new(self.config.pipeline.concurrency.max(1)));
        jobs.into_iter()
            .map(|(month, job)| {
                let sem = Arc::clone(&sem);
                let handle = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await?;
                    Ok::<T, anyhow::Error>(tokio::task::spawn_blocking(job).await?)
                });
                (month, handle)
            })
            .collect()
    }

    fn finish_run(&self, repo: &Repository, run_id: i64, stats: &StageStats) {
        let error = (stats.errors > 0).then(|| format!("{} errors", stats.errors));
        repo.finish_run(run_id, stats.months, stats.rows_written, error.as_deref())
            .ok();
    }

    /// Close a run that could not read its input.
    fn abort_run(&self, repo: &Repository, run_id: i64, err: &anyhow::Error) {
        error!("Stage aborted: {:#}", err);
        repo.finish_run(run_id, 0, 0, Some(&format!("{:#}", err))).ok();
    }

    // ── Stage 0: daily returns ────────────────────────────────────────────────

    pub async fn build_daily(&self, repo: &Repository) -> Result<StageStats> {
        let run_id = repo.begin_run("daily").unwrap_or(0);
        info!("=== Rebuilding daily returns ===");

        let result = self
            .write_with_retry("ohlc_daily", || repo.rebuild_daily_returns())
            .await;

        let stats = match &result {
            Ok(n) => StageStats { months: 0, rows_written: *n, errors: 0 },
            Err(_) => StageStats { errors: 1, ..Default::default() },
        };
        self.finish_run(repo, run_id, &stats);

        let n = result?;
        let (min, max) = repo.date_range().unwrap_or((None, None));
        info!("{} daily rows, range {:?} → {:?}", n, min, max);
        Ok(stats)
    }

    // ── Stage 1: monthly correlations ─────────────────────────────────────────

    pub async fn build_correlations(&self, repo: &Repository, range: MonthRange) -> Result<StageStats> {
        let run_id = repo.begin_run("correlations").unwrap_or(0);
        let analysis = &self.config.analysis;

        let months = group_by_month(
            repo.load_daily_returns(&range)
                .inspect_err(|e| self.abort_run(repo, run_id, e))?,
        );
        info!(
            "=== Building correlations: {} months (min_overlap={}) ===",
            months.len(),
            analysis.min_overlap
        );

        let present: BTreeSet<MonthKey> = months.keys().copied().collect();
        let jobs: Vec<_> = months
            .into_iter()
            .map(|(month, rows)| {
                let ctx = MonthContext {
                    month,
                    rows,
                    min_overlap: analysis.min_overlap,
                    asset_order: analysis.asset_order,
                };
                (month, move || monthly_correlations(&ctx))
            })
            .collect();

        let mut stats = StageStats::default();
        for (month, handle) in self.spawn_months(jobs) {
            match handle.await {
                Ok(Ok(outcome)) => {
                    log_outcome(month, &outcome);
                    let label = format!("correlations {}", month);
                    match self
                        .write_with_retry(&label, || repo.replace_month_correlations(month, &outcome.edges))
                        .await
                    {
                        Ok(n) => {
                            stats.months += 1;
                            stats.rows_written += n;
                        }
                        Err(e) => {
                            warn!("{}: {:#}", label, e);
                            stats.errors += 1;
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("{}: {:#}", month, e);
                    stats.errors += 1;
                }
                Err(e) => {
                    error!("Task panic for {}: {}", month, e);
                    stats.errors += 1;
                }
            }
        }

        // Months that no longer have any daily data lose their stale rows.
        match repo.correlation_months() {
            Ok(stored) => {
                for month in stored {
                    if !range.contains(month) || present.contains(&month) {
                        continue;
                    }
                    debug!("{}: no daily data left, clearing correlations", month);
                    if let Err(e) = self
                        .write_with_retry("clear correlations", || repo.replace_month_correlations(month, &[]))
                        .await
                    {
                        warn!("{}: {:#}", month, e);
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Listing stored correlation months: {:#}", e);
                stats.errors += 1;
            }
        }

        self.finish_run(repo, run_id, &stats);
        info!(
            "=== Done: {} months | {} correlation rows | {} errors ===",
            stats.months, stats.rows_written, stats.errors
        );
        Ok(stats)
    }

    // ── Stage 2: temporal network ─────────────────────────────────────────────

    pub async fn build_network(&self, repo: &Repository, range: MonthRange) -> Result<StageStats> {
        let run_id = repo.begin_run("network").unwrap_or(0);
        let threshold = self.config.analysis.threshold;

        let months = group_by_month(
            repo.load_daily_returns(&range)
                .inspect_err(|e| self.abort_run(repo, run_id, e))?,
        );
        let correlations = repo
            .load_correlations(&range)
            .inspect_err(|e| self.abort_run(repo, run_id, e))?;
        let mut edges_by_month: BTreeMap<MonthKey, Vec<CorrelationEdge>> = BTreeMap::new();
        for e in correlations {
            edges_by_month.entry(e.month).or_default().push(e);
        }
        info!(
            "=== Building temporal network: {} months (|corr| >= {}) ===",
            months.len(),
            threshold
        );

        let present: BTreeSet<MonthKey> = months.keys().copied().collect();
        let jobs: Vec<_> = months
            .into_iter()
            .map(|(month, rows)| {
                let edges = edges_by_month.remove(&month).unwrap_or_default();
                (month, move || {
                    let (panel, _) = MonthPanel::build(month, &rows);
                    let graph = AssetGraph::from_correlations(panel.assets(), &edges, threshold);
                    network_metrics(month, &graph)
                })
            })
            .collect();
        for month in edges_by_month.keys() {
            warn!("{}: correlations without daily data, ignored", month);
        }

        let mut stats = StageStats::default();
        for (month, handle) in self.spawn_months(jobs) {
            match handle.await {
                Ok(Ok(metrics)) => {
                    log_metrics(&metrics);
                    let label = format!("metrics {}", month);
                    match self.write_with_retry(&label, || repo.replace_month_metrics(&metrics)).await {
                        Ok(()) => {
                            stats.months += 1;
                            stats.rows_written += 1;
                        }
                        Err(e) => {
                            warn!("{}: {:#}", label, e);
                            stats.errors += 1;
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("{}: {:#}", month, e);
                    stats.errors += 1;
                }
                Err(e) => {
                    error!("Task panic for {}: {}", month, e);
                    stats.errors += 1;
                }
            }
        }

        match repo.metrics_months() {
            Ok(stored) => {
                for month in stored {
                    if !range.contains(month) || present.contains(&month) {
                        continue;
                    }
                    debug!("{}: no daily data left, clearing metrics", month);
                    if let Err(e) = self
                        .write_with_retry("clear metrics", || repo.delete_month_metrics(month))
                        .await
                    {
                        warn!("{}: {:#}", month, e);
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Listing stored metric months: {:#}", e);
                stats.errors += 1;
            }
        }

        self.finish_run(repo, run_id, &stats);
        info!(
            "=== Done: {} months | {} metric rows | {} errors ===",
            stats.months, stats.rows_written, stats.errors
        );
        Ok(stats)
    }

    /// daily → correlations → network over every month.
    pub async fn run_all(&self, repo: &Repository) -> Result<Vec<(&'static str, StageStats)>> {
        let daily = self.build_daily(repo).await?;
        let corr = self.build_correlations(repo, MonthRange::all()).await?;
        let net = self.build_network(repo, MonthRange::all()).await?;
        Ok(vec![("daily", daily), ("correlations", corr), ("network", net)])
    }
}

fn log_outcome(month: MonthKey, outcome: &CorrelationOutcome) {
    for rejection in &outcome.rejected {
        warn!("{}: dropped row: {}", month, rejection);
    }
    debug!(
        "{}: {} assets, {} pairs, {} insufficient, {} degenerate",
        month,
        outcome.assets.len(),
        outcome.edges.len(),
        outcome.insufficient_pairs,
        outcome.degenerate_pairs
    );
}

fn log_metrics(m: &NetworkMetrics) {
    debug!(
        "{}: n={} e={} density={:.4} avg_deg={:.3} max_deg={} clust={:.4} lcc={}",
        m.month, m.n_assets, m.n_edges, m.density, m.avg_degree, m.max_degree, m.avg_clustering, m.lcc_size
    );
}
