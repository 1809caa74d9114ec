//! Environment-driven configuration.
//!
//! | variable                 | default                   |
//! |--------------------------|---------------------------|
//! | `BUS_URL`                | `redis://127.0.0.1:6379`  |
//! | `INFERENCE_URL`          | `http://localhost:8000`   |
//! | `INFERENCE_TIMEOUT_SECS` | `10`                      |
//! | `ZONE_COORDS`            | built-in layout           |
//! | `ZONE_COORDS_FILE`       | built-in layout           |
//! | `CONFIRMATION_THRESHOLD` | `0.70`                    |
//! | `MAILBOX_CAPACITY`       | `1024`                    |
//! | `MAILBOX_OVERFLOW`       | `block`                   |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use firewatch_core::ZoneCoordinateMap;
use firewatch_events::{MailboxConfig, OverflowPolicy};
use firewatch_infra::PipelineConfig;

pub const DEFAULT_BUS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_INFERENCE_URL: &str = "http://localhost:8000";
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Parse {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: &'static str },
}

/// Where the zone layout comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneSource {
    Inline(String),
    File(PathBuf),
    Builtin,
}

impl ZoneSource {
    /// Load the layout; an unusable source falls back to the built-in one.
    pub fn load(&self) -> ZoneCoordinateMap {
        match self {
            Self::Inline(raw) => ZoneCoordinateMap::parse_or_builtin(Some(raw)),
            Self::File(path) => ZoneCoordinateMap::or_builtin(ZoneCoordinateMap::from_path(path)),
            Self::Builtin => ZoneCoordinateMap::parse_or_builtin(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub bus_url: String,
    pub inference_url: String,
    pub inference_timeout: Duration,
    pub zones: ZoneSource,
    pub pipeline: PipelineConfig,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let bus_url = get("BUS_URL").unwrap_or_else(|| {
            warn!(default = DEFAULT_BUS_URL, "BUS_URL not set; using default");
            DEFAULT_BUS_URL.to_string()
        });
        let inference_url = get("INFERENCE_URL").unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string());

        let inference_timeout = match parse::<u64>("INFERENCE_TIMEOUT_SECS", get("INFERENCE_TIMEOUT_SECS"))? {
            Some(0) => {
                return Err(ConfigError::OutOfRange {
                    var: "INFERENCE_TIMEOUT_SECS",
                    reason: "must be greater than zero",
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_INFERENCE_TIMEOUT,
        };

        let zones = match (get("ZONE_COORDS"), get("ZONE_COORDS_FILE")) {
            (Some(raw), Some(path)) => {
                warn!(ignored = %path, "both ZONE_COORDS and ZONE_COORDS_FILE set; using ZONE_COORDS");
                ZoneSource::Inline(raw)
            }
            (Some(raw), None) => ZoneSource::Inline(raw),
            (None, Some(path)) => ZoneSource::File(PathBuf::from(path)),
            (None, None) => ZoneSource::Builtin,
        };

        let mut pipeline = PipelineConfig::default();
        if let Some(threshold) = parse::<f64>("CONFIRMATION_THRESHOLD", get("CONFIRMATION_THRESHOLD"))? {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::OutOfRange {
                    var: "CONFIRMATION_THRESHOLD",
                    reason: "must be within [0, 1]",
                });
            }
            pipeline.confirmation_threshold = threshold;
        }

        let mut mailbox = MailboxConfig::default();
        if let Some(capacity) = parse::<usize>("MAILBOX_CAPACITY", get("MAILBOX_CAPACITY"))? {
            if capacity == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "MAILBOX_CAPACITY",
                    reason: "must be greater than zero",
                });
            }
            mailbox = mailbox.with_capacity(capacity);
        }
        if let Some(overflow) = parse::<OverflowPolicy>("MAILBOX_OVERFLOW", get("MAILBOX_OVERFLOW"))? {
            mailbox = mailbox.with_overflow(overflow);
        }
        pipeline.mailbox = mailbox;

        Ok(Self {
            bus_url,
            inference_url,
            inference_timeout,
            zones,
            pipeline,
        })
    }
}

fn parse<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|e| ConfigError::Parse {
            var,
            reason: e.to_string(),
            value,
        })
    })
    .transpose()
}
