use std::sync::Arc;

use super::{AuthConfig, RateLimiter};
use crate::claims::ClaimSyncQueue;
use crate::identity::Reconciler;
use crate::idp::{IdentityProvider, TokenVerifier};
use crate::session::SessionManager;
use crate::store::{ProfileStore, SessionStore, UserStore};

/// Shared services for the auth middleware and handlers.
pub struct AuthState {
    config: AuthConfig,
    verifier: TokenVerifier,
    users: Arc<dyn UserStore>,
    profiles: Arc<dyn ProfileStore>,
    reconciler: Reconciler,
    sessions: Arc<SessionManager>,
    claims: ClaimSyncQueue,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        provider: Arc<dyn IdentityProvider>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
        claims: ClaimSyncQueue,
    ) -> Self {
        let verifier = TokenVerifier::new(provider).with_timeout(config.verify_timeout());
        let reconciler = Reconciler::new(
            users.clone(),
            profiles.clone(),
            claims.clone(),
            config.lockout_policy(),
        );
        let sessions = Arc::new(
            SessionManager::new(sessions, users.clone())
                .with_ttl(config.session_ttl())
                .with_idle_timeout(config.session_idle_timeout()),
        );
        let rate_limiter = Arc::new(config.failed_login_rate_limiter());
        Self {
            config,
            verifier,
            users,
            profiles,
            reconciler,
            sessions,
            claims,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    #[must_use]
    pub fn profiles(&self) -> &dyn ProfileStore {
        self.profiles.as_ref()
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Shared handle for background workers.
    #[must_use]
    pub fn session_manager(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimSyncQueue {
        &self.claims
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
