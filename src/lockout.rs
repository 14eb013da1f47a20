//! Brute-force lockout policy over the counters embedded in a user record.
//!
//! Flow Overview:
//! 1) Each reported login failure bumps `failed_login_attempts`.
//! 2) Reaching `max_attempts` arms `locked_until = now + lock_duration`.
//! 3) Reading the state after `locked_until` has passed clears both fields.
//!
//! Both operations are pure; callers persist the returned state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCK_DURATION_MINUTES: i64 = 15;

/// Failed-attempt counter and lock deadline, stored on the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    #[must_use]
    pub fn cleared() -> Self {
        Self::default()
    }
}

/// Result of a lock check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockCheck {
    pub locked: bool,
    pub state: LockoutState,
    /// True when the check cleared an expired lock and the caller should persist it.
    pub unlocked: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct LockoutPolicy {
    max_attempts: u32,
    lock_duration: Duration,
}

impl LockoutPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lock_duration: Duration::minutes(DEFAULT_LOCK_DURATION_MINUTES),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_lock_duration_seconds(mut self, seconds: i64) -> Self {
        self.lock_duration = Duration::seconds(seconds.max(1));
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    /// Record one failed attempt.
    ///
    /// An expired lock restarts counting from 1. While a lock is still in
    /// force the counter keeps growing but the deadline is not pushed out.
    #[must_use]
    pub fn record_failure(&self, state: LockoutState, now: DateTime<Utc>) -> LockoutState {
        let mut state = match state.locked_until {
            Some(until) if until > now => {
                return LockoutState {
                    failed_login_attempts: state.failed_login_attempts.saturating_add(1),
                    locked_until: Some(until),
                };
            }
            Some(_) => LockoutState::cleared(),
            None => state,
        };

        state.failed_login_attempts = state.failed_login_attempts.saturating_add(1);
        if state.failed_login_attempts >= self.max_attempts {
            state.locked_until = Some(now + self.lock_duration);
        }
        state
    }

    /// Check whether the state is locked at `now`, clearing an expired lock.
    #[must_use]
    pub fn is_locked(&self, state: LockoutState, now: DateTime<Utc>) -> LockCheck {
        match state.locked_until {
            Some(until) if until > now => LockCheck {
                locked: true,
                state,
                unlocked: false,
            },
            Some(_) => LockCheck {
                locked: false,
                state: LockoutState::cleared(),
                unlocked: true,
            },
            None => LockCheck {
                locked: false,
                state,
                unlocked: false,
            },
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Minutes left on a lock, rounded up, for "try again in N minutes" messages.
#[must_use]
pub fn minutes_remaining(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (locked_until - now).num_seconds().max(0);
    (seconds + 59) / 60
}
