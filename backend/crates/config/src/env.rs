use prodsync_common::error::{ProdsyncError, ProdsyncResult};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How the worker drives the sync pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Fire a cycle every poll interval until ctrl-c.
    Recurring,
    /// Run a single cycle and exit.
    Once,
    /// Run the end-to-end propagation check against the live systems.
    Check,
}

impl FromStr for RunMode {
    type Err = ProdsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "recurring" => Ok(Self::Recurring),
            "once" => Ok(Self::Once),
            "check" => Ok(Self::Check),
            other => Err(ProdsyncError::Config(format!(
                "invalid SYNC_MODE '{other}', expected recurring|once|check"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub log_level: String,
    pub job_name: String,
    pub mode: RunMode,
    pub poll_interval_secs: u64,
    pub watermark_default_offset_secs: u64,
    pub watermark_safety_lag_secs: u64,
    pub batch_block_size: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads the sync settings.
    pub fn from_env() -> ProdsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let config = Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            log_level: get_var_or("LOG_LEVEL", "info"),
            job_name: get_var_or("SYNC_JOB_NAME", "product-sync"),
            mode: get_var_or("SYNC_MODE", "recurring").parse()?,
            poll_interval_secs: parse_var("POLL_INTERVAL_SECS", "60")?,
            watermark_default_offset_secs: parse_var("WATERMARK_DEFAULT_OFFSET_SECS", "10")?,
            watermark_safety_lag_secs: parse_var("WATERMARK_SAFETY_LAG_SECS", "10")?,
            batch_block_size: parse_var("BATCH_BLOCK_SIZE", "100")?,
        };

        if config.poll_interval_secs == 0 {
            return Err(ProdsyncError::Config(
                "POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if config.batch_block_size == 0 {
            return Err(ProdsyncError::Config(
                "BATCH_BLOCK_SIZE must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn watermark_default_offset(&self) -> Duration {
        Duration::from_secs(self.watermark_default_offset_secs)
    }

    pub fn watermark_safety_lag(&self) -> Duration {
        Duration::from_secs(self.watermark_safety_lag_secs)
    }
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str, default: &str) -> ProdsyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_var_or(key, default)
        .trim()
        .parse()
        .map_err(|e| ProdsyncError::Config(format!("invalid {key}: {e}")))
}
