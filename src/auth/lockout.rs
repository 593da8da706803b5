/// Failed-login lockout decisions
///
/// Pure logic over a credential's `(failed_attempts, lock_until)` pair. The
/// caller owns persistence. In particular the attempt counter is incremented
/// atomically by the store and the new count is handed to `record_failure`.

use chrono::{DateTime, Duration, Utc};

use crate::configuration::LockoutSettings;

/// Lock state as seen at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    /// `lock_until` is set but already in the past. The counter should be
    /// cleared before the attempt is evaluated.
    LockExpired,
    Locked { until: DateTime<Utc>, minutes_remaining: i64 },
}

/// What a failed verification leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    StillUnlocked { attempts_remaining: u32 },
    NowLocked { until: DateTime<Utc>, minutes_remaining: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_failed_attempts: u32,
    lock_duration: Duration,
}

impl LockoutPolicy {
    pub fn new(max_failed_attempts: u32, lock_duration: Duration) -> Self {
        Self {
            max_failed_attempts: max_failed_attempts.max(1),
            lock_duration,
        }
    }

    pub fn from_settings(settings: &LockoutSettings) -> Self {
        Self::new(
            settings.max_failed_attempts,
            Duration::minutes(settings.lock_duration_minutes),
        )
    }

    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    pub fn status(&self, lock_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> LockStatus {
        match lock_until {
            None => LockStatus::Unlocked,
            Some(until) if until > now => LockStatus::Locked {
                until,
                minutes_remaining: minutes_until(until, now),
            },
            Some(_) => LockStatus::LockExpired,
        }
    }

    /// `failed_attempts` is the count after this failure was added.
    pub fn record_failure(&self, failed_attempts: u32, now: DateTime<Utc>) -> FailureOutcome {
        if failed_attempts >= self.max_failed_attempts {
            let until = now + self.lock_duration;
            FailureOutcome::NowLocked {
                until,
                minutes_remaining: minutes_until(until, now),
            }
        } else {
            FailureOutcome::StillUnlocked {
                attempts_remaining: self.max_failed_attempts - failed_attempts,
            }
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from_settings(&LockoutSettings::default())
    }
}

/// Whole minutes until `until`, rounded up
fn minutes_until(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (until - now).num_seconds().max(0);
    (seconds + 59) / 60
}
