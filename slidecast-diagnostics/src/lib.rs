//! # Slidecast Diagnostics
//!
//! Logging initialisation and the counters a relay session keeps about the
//! frames it moves.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;
pub mod relay_stats;

// Re-export main types
pub use debug_logger::DebugLogger;
pub use relay_stats::{RelayCounter, RelayStats, RelayStatsSnapshot};
