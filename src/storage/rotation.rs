//! Wall-clock rotation schedule.
//!
//! With an interval `I` and an offset `O`, the timeline is cut into windows
//! `[k*I + O, (k+1)*I + O)`. A file opened in one window is rotated as soon as
//! the clock reaches a later window, which happens exactly at the seconds where
//! `t mod I == O`. Comparing windows rather than testing that equality on each
//! poll means a late poll cannot miss a boundary or handle it twice.

use crate::error_handling::types::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationPolicy {
    interval: i64,
    offset: i64,
}

impl RotationPolicy {
    /// `interval_secs == 0` disables rotation; otherwise `offset_secs` must be
    /// smaller than the interval.
    pub fn new(interval_secs: u64, offset_secs: u64) -> Result<Self, ConfigError> {
        if interval_secs == 0 {
            return Ok(Self::disabled());
        }
        if offset_secs >= interval_secs {
            return Err(ConfigError::NotInRange(format!(
                "rotation offset {} must be smaller than the rotation interval {}",
                offset_secs, interval_secs
            )));
        }
        let interval = i64::try_from(interval_secs).map_err(|_| {
            ConfigError::NotInRange(format!("rotation interval {} is too large", interval_secs))
        })?;
        Ok(Self {
            interval,
            offset: offset_secs as i64,
        })
    }

    pub fn disabled() -> Self {
        Self {
            interval: 0,
            offset: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval > 0
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval as u64
    }

    pub fn offset_secs(&self) -> u64 {
        self.offset as u64
    }

    /// Index of the window containing the unix second `t`.
    pub fn window(&self, t: i64) -> Option<i64> {
        if !self.is_enabled() {
            return None;
        }
        Some((t - self.offset).div_euclid(self.interval))
    }

    /// Whether a file opened at `opened_at` must be rotated at `now`.
    pub fn is_due(&self, opened_at: i64, now: i64) -> bool {
        match (self.window(opened_at), self.window(now)) {
            (Some(opened), Some(current)) => current > opened,
            _ => false,
        }
    }

    /// First boundary strictly after `t`.
    pub fn next_boundary(&self, t: i64) -> Option<i64> {
        self.window(t).map(|w| (w + 1) * self.interval + self.offset)
    }
}
