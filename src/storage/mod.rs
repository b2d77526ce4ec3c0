use crate::models::{CorrelationEdge, DailyReturn, MonthKey, MonthRange, NetworkMetrics, OhlcRow};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{Connection, params, params_from_iter};
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ohlcv (
    asset_address   VARCHAR   NOT NULL,
    ts              TIMESTAMP NOT NULL,
    price_open      DOUBLE,
    price_high      DOUBLE,
    price_low       DOUBLE,
    price_close     DOUBLE    NOT NULL,
    PRIMARY KEY (asset_address, ts)
);

-- Derived tables are replaced wholesale (per month or in full), so
-- uniqueness comes from the replace, not from a key.

-- Last close per UTC day; log_return NULL on the first day or a non-positive close
CREATE TABLE IF NOT EXISTS ohlc_daily (
    asset_address   VARCHAR NOT NULL,
    day             DATE    NOT NULL,
    close           DOUBLE  NOT NULL,
    log_return      DOUBLE
);

CREATE TABLE IF NOT EXISTS monthly_correlations (
    month       DATE    NOT NULL,
    asset_i     VARCHAR NOT NULL,
    asset_j     VARCHAR NOT NULL,
    corr        DOUBLE  NOT NULL
);

CREATE TABLE IF NOT EXISTS temporal_network_metrics (
    month           DATE    NOT NULL,
    n_assets        BIGINT  NOT NULL,
    n_edges         BIGINT  NOT NULL,
    density         DOUBLE  NOT NULL,
    avg_degree      DOUBLE  NOT NULL,
    max_degree      BIGINT  NOT NULL,
    avg_clustering  DOUBLE  NOT NULL,
    lcc_size        BIGINT  NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS build_run_seq START 1;

CREATE TABLE IF NOT EXISTS build_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('build_run_seq'),
    stage               VARCHAR NOT NULL,
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    months_processed    BIGINT DEFAULT 0,
    rows_written        BIGINT DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_daily_day     ON ohlc_daily (day);
CREATE INDEX IF NOT EXISTS idx_corr_month    ON monthly_correlations (month);
CREATE INDEX IF NOT EXISTS idx_metrics_month ON temporal_network_metrics (month);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

/// `WHERE` fragment and parameters restricting `column` to a month range.
fn range_filter(column: &str, range: &MonthRange) -> (String, Vec<NaiveDate>) {
    let (lo, hi) = range.date_bounds();
    let mut clauses = Vec::new();
    let mut bounds = Vec::new();
    if let Some(lo) = lo {
        clauses.push(format!("{column} >= ?"));
        bounds.push(lo);
    }
    if let Some(hi) = hi {
        clauses.push(format!("{column} < ?"));
        bounds.push(hi);
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clauses.join(" AND "))
    };
    (sql, bounds)
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Raw OHLC ──────────────────────────────────────────────────────────────

    /// Upsert raw rows: idempotent, safe to re-run on the same files.
    pub fn upsert_ohlc(&self, rows: &[OhlcRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO ohlcv
                       (asset_address, ts, price_open, price_high, price_low, price_close)
                   VALUES (?, ?, ?, ?, ?, ?)
                   ON CONFLICT (asset_address, ts) DO UPDATE SET
                       price_open  = COALESCE(excluded.price_open,  ohlcv.price_open),
                       price_high  = COALESCE(excluded.price_high,  ohlcv.price_high),
                       price_low   = COALESCE(excluded.price_low,   ohlcv.price_low),
                       price_close = excluded.price_close"#,
            )?;
            for r in rows {
                stmt.execute(params![r.asset, r.ts, r.open, r.high, r.low, r.close])
                    .with_context(|| format!("insert ohlc {} {}", r.asset, r.ts))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    // ── Daily returns ─────────────────────────────────────────────────────────

    /// Rebuild `ohlc_daily` from `ohlcv` as one replace.
    pub fn rebuild_daily_returns(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM ohlc_daily", [])?;
        let n = tx
            .execute(
                r#"INSERT INTO ohlc_daily (asset_address, day, close, log_return)
                   SELECT asset_address, day, close,
                          CASE WHEN prev_close > 0 AND close > 0
                               THEN ln(close / prev_close) END
                   FROM (
                       SELECT asset_address, day, close,
                              lag(close) OVER (PARTITION BY asset_address ORDER BY day) AS prev_close
                       FROM (
                           SELECT asset_address,
                                  CAST(ts AS DATE) AS day,
                                  arg_max(price_close, ts) AS close
                           FROM ohlcv
                           GROUP BY asset_address, CAST(ts AS DATE)
                       ) daily
                   ) lagged"#,
                [],
            )
            .context("daily aggregation failed")?;
        tx.commit()?;
        Ok(n)
    }

    /// Replace `ohlc_daily` with rows produced elsewhere (backfills, tests).
    pub fn replace_daily_returns(&self, rows: &[DailyReturn]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM ohlc_daily", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ohlc_daily (asset_address, day, close, log_return) VALUES (?, ?, ?, ?)",
            )?;
            for r in rows {
                stmt.execute(params![r.asset, r.day, r.close, r.log_return])
                    .with_context(|| format!("insert daily {} {}", r.asset, r.day))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn load_daily_returns(&self, range: &MonthRange) -> Result<Vec<DailyReturn>> {
        let (filter, bounds) = range_filter("day", range);
        let sql = format!(
            "SELECT asset_address, day, close, log_return FROM ohlc_daily \
             WHERE 1 = 1{filter} ORDER BY day, asset_address"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bounds), |r| {
                Ok(DailyReturn {
                    asset: r.get(0)?,
                    day: r.get(1)?,
                    close: r.get(2)?,
                    log_return: r.get(3)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .context("read ohlc_daily")?;
        Ok(rows)
    }

    pub fn list_months(&self) -> Result<Vec<MonthKey>> {
        self.distinct_months(
            "SELECT DISTINCT CAST(date_trunc('month', day) AS DATE) AS m FROM ohlc_daily ORDER BY m",
        )
    }

    // ── Monthly correlations ──────────────────────────────────────────────────

    /// Replace one month's correlation rows in a single transaction.
    pub fn replace_month_correlations(&self, month: MonthKey, edges: &[CorrelationEdge]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM monthly_correlations WHERE month = ?",
            params![month.first_day()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO monthly_correlations (month, asset_i, asset_j, corr) VALUES (?, ?, ?, ?)",
            )?;
            for e in edges {
                stmt.execute(params![month.first_day(), e.asset_i, e.asset_j, e.corr])
                    .with_context(|| format!("insert corr {} {}/{}", month, e.asset_i, e.asset_j))?;
            }
        }
        tx.commit()?;
        debug!("{}: {} correlation rows written", month, edges.len());
        Ok(edges.len())
    }

    pub fn load_correlations(&self, range: &MonthRange) -> Result<Vec<CorrelationEdge>> {
        let (filter, bounds) = range_filter("month", range);
        let sql = format!(
            "SELECT month, asset_i, asset_j, corr FROM monthly_correlations \
             WHERE corr IS NOT NULL{filter} ORDER BY month, asset_i, asset_j"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let edges = stmt
            .query_map(params_from_iter(bounds), |r| {
                Ok(CorrelationEdge {
                    month: MonthKey::from_date(r.get(0)?),
                    asset_i: r.get(1)?,
                    asset_j: r.get(2)?,
                    corr: r.get(3)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .context("read monthly_correlations")?;
        Ok(edges)
    }

    // ── Network metrics ───────────────────────────────────────────────────────

    pub fn replace_month_metrics(&self, m: &NetworkMetrics) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM temporal_network_metrics WHERE month = ?",
            params![m.month.first_day()],
        )?;
        tx.execute(
            r#"INSERT INTO temporal_network_metrics
                   (month, n_assets, n_edges, density, avg_degree, max_degree, avg_clustering, lcc_size)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                m.month.first_day(),
                m.n_assets as i64,
                m.n_edges as i64,
                m.density,
                m.avg_degree,
                m.max_degree as i64,
                m.avg_clustering,
                m.lcc_size as i64,
            ],
        )
        .with_context(|| format!("insert metrics {}", m.month))?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_metrics(&self) -> Result<Vec<NetworkMetrics>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT month, n_assets, n_edges, density, avg_degree, max_degree, avg_clustering, lcc_size
               FROM temporal_network_metrics ORDER BY month"#,
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(NetworkMetrics {
                    month: MonthKey::from_date(r.get(0)?),
                    n_assets: r.get::<_, i64>(1)? as usize,
                    n_edges: r.get::<_, i64>(2)? as usize,
                    density: r.get(3)?,
                    avg_degree: r.get(4)?,
                    max_degree: r.get::<_, i64>(5)? as usize,
                    avg_clustering: r.get(6)?,
                    lcc_size: r.get::<_, i64>(7)? as usize,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .context("read temporal_network_metrics")?;
        Ok(rows)
    }

    pub fn delete_month_metrics(&self, month: MonthKey) -> Result<()> {
        self.conn.execute(
            "DELETE FROM temporal_network_metrics WHERE month = ?",
            params![month.first_day()],
        )?;
        Ok(())
    }

    fn distinct_months(&self, sql: &str) -> Result<Vec<MonthKey>> {
        let mut stmt = self.conn.prepare(sql)?;
        let months = stmt
            .query_map([], |r| r.get::<_, NaiveDate>(0))?
            .map(|d| d.map(MonthKey::from_date))
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(months)
    }

    /// Months that currently hold correlation rows.
    pub fn correlation_months(&self) -> Result<Vec<MonthKey>> {
        self.distinct_months("SELECT DISTINCT month FROM monthly_correlations ORDER BY month")
    }

    pub fn metrics_months(&self) -> Result<Vec<MonthKey>> {
        self.distinct_months("SELECT month FROM temporal_network_metrics ORDER BY month")
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    fn count(&self, sql: &str) -> Result<i64> {
        let mut s = self.conn.prepare(sql)?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn ohlc_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM ohlcv")
    }

    pub fn daily_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM ohlc_daily")
    }

    pub fn asset_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(DISTINCT asset_address) FROM ohlc_daily")
    }

    pub fn correlation_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM monthly_correlations")
    }

    pub fn metrics_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM temporal_network_metrics")
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self.conn.prepare("SELECT MIN(day), MAX(day) FROM ohlc_daily")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Build run log ─────────────────────────────────────────────────────────

    pub fn begin_run(&self, stage: &str) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO build_runs (stage, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![stage, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_run(
        &self, run_id: i64, months: usize, rows: usize, error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE build_runs SET
               finished_at = ?, status = ?,
               months_processed = ?, rows_written = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                months as i64, rows as i64, error, run_id,
            ],
        )?;
        Ok(())
    }

    /// (stage, status) of the most recent run, if any.
    pub fn last_run(&self) -> Result<Option<(String, String)>> {
        let mut s = self
            .conn
            .prepare("SELECT stage, status FROM build_runs ORDER BY id DESC LIMIT 1")?;
        let mut rows = s.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.next().transpose()?)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
