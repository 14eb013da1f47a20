//! Request authentication.
//!
//! Flow Overview:
//! 1) Extract the bearer credential and verify it with the IdP.
//! 2) Enforce email verification unless the sign-in provider is a trusted
//!    OAuth provider.
//! 3) For users already reconciled: lockout, account status and the device
//!    session idle check.
//! 4) Attach [`AuthenticatedUser`] to the request extensions.

mod middleware;
mod rate_limit;
mod request;
mod state;
#[cfg(test)]
pub(crate) mod test_support;

pub use middleware::{
    authenticate, optional_auth, require_auth, verify_credential, AuthenticatedUser,
};
pub use rate_limit::{
    IpRateLimiter, RateLimitDecision, RateLimiter, DEFAULT_FAILED_LOGIN_IP_LIMIT,
    DEFAULT_FAILED_LOGIN_WINDOW,
};
pub use request::{client_ip, extract_bearer, RequestContext, DEVICE_ID_HEADER};
pub use state::AuthState;

use std::time::Duration;

use crate::idp::DEFAULT_VERIFY_TIMEOUT;
use crate::lockout::{LockoutPolicy, DEFAULT_LOCK_DURATION_MINUTES, DEFAULT_MAX_ATTEMPTS};
use crate::session::{DEFAULT_IDLE_TIMEOUT_HOURS, DEFAULT_SESSION_TTL_DAYS};

/// Sign-in providers whose email is considered verified by the provider itself.
pub const DEFAULT_TRUSTED_OAUTH_PROVIDERS: [&str; 6] = [
    "google.com",
    "facebook.com",
    "apple.com",
    "github.com",
    "twitter.com",
    "microsoft.com",
];

#[derive(Clone, Debug)]
pub struct AuthConfig {
    trusted_oauth_providers: Vec<String>,
    session_ttl_seconds: i64,
    session_idle_timeout_seconds: i64,
    lockout_max_attempts: u32,
    lockout_duration_seconds: i64,
    verify_timeout: Duration,
    failed_login_ip_limit: u32,
    failed_login_window: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trusted_oauth_providers: DEFAULT_TRUSTED_OAUTH_PROVIDERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_DAYS * 24 * 60 * 60,
            session_idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_HOURS * 60 * 60,
            lockout_max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration_seconds: DEFAULT_LOCK_DURATION_MINUTES * 60,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            failed_login_ip_limit: DEFAULT_FAILED_LOGIN_IP_LIMIT,
            failed_login_window: DEFAULT_FAILED_LOGIN_WINDOW,
        }
    }

    #[must_use]
    pub fn with_trusted_oauth_providers(mut self, providers: Vec<String>) -> Self {
        self.trusted_oauth_providers = providers
            .into_iter()
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_session_idle_timeout_seconds(mut self, seconds: i64) -> Self {
        self.session_idle_timeout_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_max_attempts(mut self, attempts: u32) -> Self {
        self.lockout_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_duration_seconds(mut self, seconds: i64) -> Self {
        self.lockout_duration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verify_timeout_seconds(mut self, seconds: u64) -> Self {
        self.verify_timeout = Duration::from_secs(seconds.max(1));
        self
    }

    /// Caps failed-login reports per client IP within `window_seconds`.
    #[must_use]
    pub fn with_failed_login_rate_limit(mut self, limit: u32, window_seconds: u64) -> Self {
        self.failed_login_ip_limit = limit;
        self.failed_login_window = Duration::from_secs(window_seconds.max(1));
        self
    }

    #[must_use]
    pub fn is_trusted_oauth(&self, provider: &str) -> bool {
        self.trusted_oauth_providers
            .iter()
            .any(|trusted| trusted.eq_ignore_ascii_case(provider))
    }

    #[must_use]
    pub fn trusted_oauth_providers(&self) -> &[String] {
        &self.trusted_oauth_providers
    }

    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_seconds)
    }

    #[must_use]
    pub fn session_idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_idle_timeout_seconds)
    }

    #[must_use]
    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::new()
            .with_max_attempts(self.lockout_max_attempts)
            .with_lock_duration_seconds(self.lockout_duration_seconds)
    }

    #[must_use]
    pub fn verify_timeout(&self) -> Duration {
        self.verify_timeout
    }

    #[must_use]
    pub fn failed_login_rate_limiter(&self) -> IpRateLimiter {
        IpRateLimiter::new(self.failed_login_ip_limit, self.failed_login_window)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}
