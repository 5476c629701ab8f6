//! # Status-Transition Tracker
//!
//! Log throttling for the health worker. A fleet with a dead endpoint would
//! otherwise emit an identical warning every few seconds; the tracker decides
//! which probe outcomes deserve a log line.
//!
//! Rules, per endpoint URL:
//! - first observation: emit
//! - status change: emit, reset the error streak
//! - same status and the probe errored: count it, emit every 10th error or
//!   when more than 2 minutes passed since the last emitted line
//! - same status, no error: stay silent (steady healthy fleets log nothing)

use crate::endpoint::EndpointStatus;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Throttle tuning. Defaults match the rules above.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Emit every Nth repeated error
    pub error_log_every: u32,
    /// Also emit when this much time passed since the last emitted line
    pub max_log_silence: ChronoDuration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            error_log_every: 10,
            max_log_silence: ChronoDuration::minutes(2),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackerEntry {
    last_status: EndpointStatus,
    last_log_time: DateTime<Utc>,
    error_count: u32,
}

/// Serializable summary for the scheduler stats payload.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub tracked_endpoints: usize,
    /// URLs currently in an error streak, with the streak length
    pub error_streaks: Vec<(String, u32)>,
}

/// Per-endpoint status transition log throttle.
#[derive(Debug, Default)]
pub struct StatusTransitionTracker {
    entries: DashMap<String, TrackerEntry>,
    config: TrackerConfig,
}

impl StatusTransitionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Decide whether this probe outcome should be logged.
    ///
    /// Returns `(emit, error_count)`; the error count goes into the log line
    /// so operators can see how long an endpoint has been failing.
    pub fn should_log(&self, url: &str, new_status: EndpointStatus, is_error: bool) -> (bool, u32) {
        let now = Utc::now();
        let mut entry = match self.entries.get_mut(url) {
            Some(entry) => entry,
            None => {
                self.entries.insert(
                    url.to_string(),
                    TrackerEntry {
                        last_status: new_status,
                        last_log_time: now,
                        error_count: 0,
                    },
                );
                return (true, 0);
            }
        };

        if entry.last_status != new_status {
            entry.last_status = new_status;
            entry.last_log_time = now;
            entry.error_count = 0;
            return (true, 0);
        }

        if is_error {
            entry.error_count += 1;
            let overdue = now - entry.last_log_time > self.config.max_log_silence;
            if entry.error_count % self.config.error_log_every == 0 || overdue {
                entry.last_log_time = now;
                return (true, entry.error_count);
            }
            return (false, entry.error_count);
        }

        (false, entry.error_count)
    }

    /// Drop tracking state for an endpoint that left the fleet.
    pub fn cleanup_endpoint(&self, url: &str) {
        self.entries.remove(url);
    }

    /// URLs the tracker currently knows; consumed by the cleanup sweep.
    pub fn active_endpoints(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> TrackerStats {
        let mut error_streaks: Vec<(String, u32)> = self
            .entries
            .iter()
            .filter(|e| e.value().error_count > 0)
            .map(|e| (e.key().clone(), e.value().error_count))
            .collect();
        error_streaks.sort();
        TrackerStats {
            tracked_endpoints: self.entries.len(),
            error_streaks,
        }
    }
}
