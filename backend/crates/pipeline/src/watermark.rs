use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use prodsync_common::error::{ProdsyncError, ProdsyncResult};

/// Half-open interval `[from, until)` of last-modified timestamps to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionWindow {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl ExtractionWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.until
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.until
    }
}

/// Decides where each extraction starts and stops.
///
/// The upper bound always trails now by `safety_lag` so rows still being written
/// are left for the next cycle. A job with no stored watermark looks back
/// `default_offset` further than that bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkPolicy {
    default_offset: Duration,
    safety_lag: Duration,
}

impl WatermarkPolicy {
    pub fn new(
        default_offset: std::time::Duration,
        safety_lag: std::time::Duration,
    ) -> ProdsyncResult<Self> {
        let convert = |name: &str, d: std::time::Duration| {
            Duration::from_std(d)
                .map_err(|e| ProdsyncError::Config(format!("{name} out of range: {e}")))
        };
        Ok(Self {
            default_offset: convert("watermark default offset", default_offset)?,
            safety_lag: convert("watermark safety lag", safety_lag)?,
        })
    }

    pub fn safety_lag(&self) -> Duration {
        self.safety_lag
    }

    /// Window for a cycle starting at `now`. The upper bound never falls below
    /// the stored watermark, so an empty window is returned instead of a
    /// backwards one.
    pub fn window(&self, stored: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ExtractionWindow {
        let lagged = now - self.safety_lag;
        let from = stored.unwrap_or(lagged - self.default_offset);
        let until = lagged.max(from);
        ExtractionWindow { from, until }
    }
}

impl Default for WatermarkPolicy {
    fn default() -> Self {
        Self {
            default_offset: Duration::seconds(10),
            safety_lag: Duration::seconds(10),
        }
    }
}

/// Render a timestamp the way Salesforce expects datetimes: `yyyy-MM-ddTHH:mm:ss.SSSZ`.
pub fn format_watermark(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
