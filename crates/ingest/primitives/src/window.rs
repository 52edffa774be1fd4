//! The buffer window: where reads switch stores and where the buffer is evicted.

use crate::SECS_PER_HOUR;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a [`BufferWindow`] violates its invariant.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum WindowError {
    /// Blocks could be evicted from the buffer before the historical store serves them.
    #[error(
        "retention_hours ({retention_hours}) must be >= lag_hours ({lag_hours}) + safety margin ({safety_margin_hours})"
    )]
    RetentionTooShort {
        /// Configured retention.
        retention_hours: u64,
        /// Configured lag.
        lag_hours: u64,
        /// Required margin between the two.
        safety_margin_hours: u64,
    },
}

/// Pairs the read boundary lag with the buffer retention horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferWindow {
    /// Reads older than `now - lag_hours` are served by the historical store.
    pub lag_hours: u64,
    /// Buffer rows older than `now - retention_hours` are evicted.
    pub retention_hours: u64,
}

impl BufferWindow {
    /// Creates a window, checking `retention_hours >= lag_hours + safety_margin_hours`.
    pub const fn new(
        lag_hours: u64,
        retention_hours: u64,
        safety_margin_hours: u64,
    ) -> Result<Self, WindowError> {
        let window = Self { lag_hours, retention_hours };
        match window.validate(safety_margin_hours) {
            Ok(()) => Ok(window),
            Err(err) => Err(err),
        }
    }

    /// Checks the window invariant.
    pub const fn validate(&self, safety_margin_hours: u64) -> Result<(), WindowError> {
        if self.retention_hours < self.lag_hours.saturating_add(safety_margin_hours) {
            return Err(WindowError::RetentionTooShort {
                retention_hours: self.retention_hours,
                lag_hours: self.lag_hours,
                safety_margin_hours,
            });
        }
        Ok(())
    }

    /// The read boundary at `now`.
    pub const fn boundary(&self, now: u64) -> u64 {
        now.saturating_sub(self.lag_hours.saturating_mul(SECS_PER_HOUR))
    }

    /// The eviction horizon at `now`.
    pub const fn eviction_horizon(&self, now: u64) -> u64 {
        now.saturating_sub(self.retention_hours.saturating_mul(SECS_PER_HOUR))
    }
}

/// A closed time range `[start, end]` in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("[{start}, {end}]")]
pub struct TimeRange {
    /// First second included.
    pub start: u64,
    /// Last second included.
    pub end: u64,
}

impl TimeRange {
    /// Creates a range. The caller is responsible for `start <= end`, see [`Self::is_valid`].
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Returns `true` if `start <= end`.
    pub const fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Returns `true` if `timestamp` lies inside the range.
    pub const fn contains(&self, timestamp: u64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Ordering of a unified range read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadOrder {
    /// Ascending height.
    #[default]
    #[display("height")]
    Height,
    /// Ascending timestamp, ties broken by height.
    #[display("timestamp")]
    Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_window_rejects_retention_inside_margin() {
        let err = BufferWindow::new(24, 26, 6).unwrap_err();
        assert_eq!(
            err,
            WindowError::RetentionTooShort { retention_hours: 26, lag_hours: 24, safety_margin_hours: 6 }
        );
        assert!(BufferWindow::new(24, 30, 6).is_ok());
    }

    #[test]
    fn test_boundary_and_horizon() {
        let window = BufferWindow::new(24, 48, 6).unwrap();
        assert_eq!(window.boundary(NOW), NOW - 24 * SECS_PER_HOUR);
        assert_eq!(window.eviction_horizon(NOW), NOW - 48 * SECS_PER_HOUR);
        assert_eq!(window.boundary(10), 0);
    }

    #[test]
    fn test_time_range_contains_both_ends() {
        let range = TimeRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
        assert!(!TimeRange::new(5, 4).is_valid());
    }
}
