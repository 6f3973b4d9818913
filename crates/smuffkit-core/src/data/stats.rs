//! Tool change statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Accumulated tool change count and duration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolChangeStats {
    pub total_changes: u64,
    pub total_duration_secs: f64,
}

impl ToolChangeStats {
    /// Account for one finished tool change
    pub fn record(&mut self, elapsed: Duration) {
        self.total_changes += 1;
        self.total_duration_secs += elapsed.as_secs_f64();
    }

    /// Average duration of a tool change in seconds
    pub fn average_secs(&self) -> f64 {
        if self.total_changes == 0 {
            0.0
        } else {
            self.total_duration_secs / self.total_changes as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
