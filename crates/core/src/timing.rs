//! Step timing: start timestamps keyed by step, durations on completion.
//!
//! Reporting is best-effort. A duplicate start overwrites the earlier one, a
//! finish without a start yields no duration; neither is an error.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::event::StepKey;

#[derive(Debug, Clone, Copy)]
struct StartMark {
    wall: DateTime<Utc>,
    instant: Instant,
}

/// Active step timings for one request.
#[derive(Debug, Default)]
pub struct TimingTracker {
    active: HashMap<StepKey, StartMark>,
}

impl TimingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `now` under `key` and return the wall-clock start time.
    pub fn start(&mut self, key: StepKey) -> DateTime<Utc> {
        let mark = StartMark {
            wall: Utc::now(),
            instant: Instant::now(),
        };
        if self.active.insert(key, mark).is_some() {
            warn!(step = %key, "Step started twice without finishing, restarting its timer");
        }
        mark.wall
    }

    /// Stop timing `key` and return the elapsed seconds, if it was started.
    pub fn finish(&mut self, key: StepKey) -> Option<f64> {
        match self.active.remove(&key) {
            Some(mark) => Some(mark.instant.elapsed().as_secs_f64()),
            None => {
                debug!(step = %key, "No start recorded for step, duration unavailable");
                None
            }
        }
    }

    /// Wall-clock start of an active step.
    pub fn started_at(&self, key: StepKey) -> Option<DateTime<Utc>> {
        self.active.get(&key).map(|m| m.wall)
    }

    pub fn is_active(&self, key: StepKey) -> bool {
        self.active.contains_key(&key)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Forget every active step (used when a run unwinds).
    pub fn clear(&mut self) {
        self.active.clear();
    }
}
