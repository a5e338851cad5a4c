//! Structured logging setup

use slidecast_core::{RelayError, RelayResult};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Debug logger for structured logging
#[derive(Debug, Default)]
pub struct DebugLogger;

impl DebugLogger {
    /// Build the filter: an explicit directive wins over `RUST_LOG`, which
    /// wins over the `info` default
    pub fn filter(directive: Option<&str>) -> RelayResult<EnvFilter> {
        match directive {
            Some(directive) => {
                EnvFilter::try_new(directive).map_err(|e| RelayError::InvalidConfiguration {
                    field: "log_level".to_string(),
                    reason: format!("'{}': {}", directive, e),
                })
            }
            None => Ok(EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()),
        }
    }

    /// Install the global subscriber
    pub fn init_logging(directive: Option<&str>) -> RelayResult<()> {
        let filter = Self::filter(directive)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .map_err(|e| RelayError::InvalidConfiguration {
                field: "logging".to_string(),
                reason: e.to_string(),
            })
    }
}
