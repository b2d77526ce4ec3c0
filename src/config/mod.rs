use crate::analysis::AssetOrder;
use crate::error::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Correlation and network parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Minimum |corr| for an edge.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Minimum shared observations for a pair to get a correlation.
    #[serde(default = "default_min_overlap")]
    pub min_overlap: usize,

    #[serde(default)]
    pub asset_order: AssetOrder,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_dir")]
    pub dir: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_db_path() -> PathBuf {
    PathBuf::from("data/crypto.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_threshold() -> f64 {
    0.5
}
fn default_min_overlap() -> usize {
    10
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_overlap: default_min_overlap(),
            asset_order: AssetOrder::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_report_dir(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            analysis: AnalysisConfig::default(),
            pipeline: PipelineConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.min_overlap < 2 {
            return Err(ConfigError::MinOverlapTooSmall(self.min_overlap));
        }
        Ok(())
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("CORRNET").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Config unreadable ({}), using defaults", e);
            AppConfig::default()
        });
        app_cfg.analysis.validate()?;
        Ok(app_cfg)
    }
}
