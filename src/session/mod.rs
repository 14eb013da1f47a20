//! Per-device session records and their lifecycle.
//!
//! A session has two independent expiry rules:
//! - `expires_at` is fixed at creation (`created_at + ttl`) and is a hard cutoff.
//! - an idle timeout measured from `last_activity` force-expires it earlier.
//!
//! `is_active = false` is terminal for a session instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

mod device;
mod manager;

pub use device::{classify_user_agent, device_fingerprint, FINGERPRINT_MAX_LEN};
pub use manager::{
    spawn_purge_worker, SessionManager, SessionValidation, DEFAULT_IDLE_TIMEOUT_HOURS,
    DEFAULT_SESSION_TTL_DAYS,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    #[default]
    Unknown,
}

impl DeviceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "mobile" => Self::Mobile,
            "tablet" => Self::Tablet,
            "desktop" => Self::Desktop,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub fingerprint: String,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject_id: String,
    pub device: DeviceInfo,
    pub location: Location,
    pub login_method: String,
    pub is_active: bool,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub logged_out_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether the session can no longer be used at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        now >= self.expires_at || now - self.last_activity >= idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(now: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            subject_id: "sub".into(),
            device: DeviceInfo {
                device_type: DeviceType::Desktop,
                fingerprint: "fp".into(),
                user_agent: None,
            },
            location: Location::default(),
            login_method: "password".into(),
            is_active: true,
            last_activity: now,
            created_at: now,
            expires_at: now + Duration::days(30),
            logged_out_at: None,
        }
    }

    #[test]
    fn stale_after_idle_timeout() {
        let now = Utc::now();
        let s = session(now);
        assert!(!s.is_stale(now + Duration::hours(23), Duration::hours(24)));
        assert!(s.is_stale(now + Duration::hours(24), Duration::hours(24)));
    }

    #[test]
    fn stale_after_hard_expiry_even_when_recently_active() {
        let now = Utc::now();
        let mut s = session(now);
        s.last_activity = now + Duration::days(30);
        assert!(s.is_stale(now + Duration::days(30), Duration::hours(24)));
    }

    #[test]
    fn device_type_parse_falls_back_to_unknown() {
        assert_eq!(DeviceType::parse("Mobile"), DeviceType::Mobile);
        assert_eq!(DeviceType::parse("watch"), DeviceType::Unknown);
    }
}
