//! Relay counters
//!
//! Lock-free counters shared by the capture loop, the render loop and the
//! session supervisor. [`RelayStats::snapshot`] freezes them into a
//! serialisable report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counted relay events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCounter {
    /// Frame grabbed from the camera
    FramesCaptured,
    /// Frame handed to a connected channel
    FramesSent,
    /// Frame encoded while the channel was down
    FramesDroppedDisconnected,
    /// Processed frame received from the service
    FramesReceived,
    /// Processed frame drawn to the output surface
    FramesRendered,
    /// Decode superseded or cancelled before it could render
    StaleDecodes,
    /// Processed frame that failed to decode
    DecodeFailures,
    /// Inbound message without a usable payload
    MalformedMessages,
    /// Error event emitted by the service
    ServiceErrors,
    /// Reconnection attempt scheduled by the channel
    ReconnectAttempts,
}

/// Live counters
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped_disconnected: AtomicU64,
    frames_received: AtomicU64,
    frames_rendered: AtomicU64,
    stale_decodes: AtomicU64,
    decode_failures: AtomicU64,
    malformed_messages: AtomicU64,
    service_errors: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl RelayStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, counter: RelayCounter) -> &AtomicU64 {
        match counter {
            RelayCounter::FramesCaptured => &self.frames_captured,
            RelayCounter::FramesSent => &self.frames_sent,
            RelayCounter::FramesDroppedDisconnected => &self.frames_dropped_disconnected,
            RelayCounter::FramesReceived => &self.frames_received,
            RelayCounter::FramesRendered => &self.frames_rendered,
            RelayCounter::StaleDecodes => &self.stale_decodes,
            RelayCounter::DecodeFailures => &self.decode_failures,
            RelayCounter::MalformedMessages => &self.malformed_messages,
            RelayCounter::ServiceErrors => &self.service_errors,
            RelayCounter::ReconnectAttempts => &self.reconnect_attempts,
        }
    }

    /// Count one event
    pub fn record(&self, counter: RelayCounter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self, counter: RelayCounter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    /// Freeze the counters
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            taken_at: Utc::now(),
            frames_captured: self.get(RelayCounter::FramesCaptured),
            frames_sent: self.get(RelayCounter::FramesSent),
            frames_dropped_disconnected: self.get(RelayCounter::FramesDroppedDisconnected),
            frames_received: self.get(RelayCounter::FramesReceived),
            frames_rendered: self.get(RelayCounter::FramesRendered),
            stale_decodes: self.get(RelayCounter::StaleDecodes),
            decode_failures: self.get(RelayCounter::DecodeFailures),
            malformed_messages: self.get(RelayCounter::MalformedMessages),
            service_errors: self.get(RelayCounter::ServiceErrors),
            reconnect_attempts: self.get(RelayCounter::ReconnectAttempts),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatsSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Frames grabbed from the camera
    pub frames_captured: u64,
    /// Frames handed to a connected channel
    pub frames_sent: u64,
    /// Frames encoded while disconnected
    pub frames_dropped_disconnected: u64,
    /// Processed frames received
    pub frames_received: u64,
    /// Processed frames rendered
    pub frames_rendered: u64,
    /// Decodes dropped as stale
    pub stale_decodes: u64,
    /// Decodes that failed
    pub decode_failures: u64,
    /// Malformed inbound messages
    pub malformed_messages: u64,
    /// Service error events
    pub service_errors: u64,
    /// Reconnection attempts
    pub reconnect_attempts: u64,
}

impl RelayStatsSnapshot {
    /// Serialise as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for RelayStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured={} sent={} dropped={} received={} rendered={} stale={} decode_failures={} malformed={} service_errors={} reconnects={}",
            self.frames_captured,
            self.frames_sent,
            self.frames_dropped_disconnected,
            self.frames_received,
            self.frames_rendered,
            self.stale_decodes,
            self.decode_failures,
            self.malformed_messages,
            self.service_errors,
            self.reconnect_attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = RelayStats::new();
        stats.record(RelayCounter::FramesSent);
        stats.record(RelayCounter::FramesSent);
        stats.record(RelayCounter::MalformedMessages);

        assert_eq!(stats.get(RelayCounter::FramesSent), 2);
        assert_eq!(stats.get(RelayCounter::MalformedMessages), 1);
        assert_eq!(stats.get(RelayCounter::FramesRendered), 0);
    }

    #[test]
    fn test_snapshot_serialization() {
        let stats = RelayStats::new();
        stats.record(RelayCounter::FramesCaptured);
        let snapshot = stats.snapshot();

        let json = snapshot.to_json().unwrap();
        let parsed: RelayStatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
        assert!(snapshot.to_string().starts_with("captured=1 sent=0"));
    }
}
