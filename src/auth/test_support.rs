//! Shared fixtures for auth and router tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

use super::{AuthConfig, AuthState};
use crate::claims::{ClaimSyncQueue, RoleClaimJob};
use crate::idp::{IdentityProvider, ValidatedClaims, VerificationError};
use crate::store::{MemoryProfileStore, MemorySessionStore, MemoryUserStore};

/// IdP that answers from a fixed token table.
#[derive(Default)]
pub struct StubIdp {
    tokens: Mutex<HashMap<String, Result<ValidatedClaims, VerificationError>>>,
    pub pushed: Mutex<Vec<(String, Value)>>,
}

impl StubIdp {
    pub fn accept(&self, token: &str, claims: ValidatedClaims) {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), Ok(claims));
    }

    pub fn reject(&self, token: &str, err: VerificationError) {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), Err(err));
    }
}

#[async_trait]
impl IdentityProvider for StubIdp {
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<ValidatedClaims, VerificationError> {
        assert!(check_revoked, "verification must check revocation");
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .unwrap_or(Err(VerificationError::Malformed))
    }

    async fn set_custom_claims(&self, subject_id: &str, claims: &Value) -> anyhow::Result<()> {
        self.pushed
            .lock()
            .unwrap()
            .push((subject_id.to_string(), claims.clone()));
        Ok(())
    }
}

pub struct Fixture {
    pub idp: Arc<StubIdp>,
    pub users: Arc<MemoryUserStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub profiles: Arc<MemoryProfileStore>,
    pub jobs: UnboundedReceiver<RoleClaimJob>,
    pub state: Arc<AuthState>,
}

pub fn fixture() -> Fixture {
    fixture_with(AuthConfig::new())
}

pub fn fixture_with(config: AuthConfig) -> Fixture {
    let idp = Arc::new(StubIdp::default());
    let users = Arc::new(MemoryUserStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let profiles = Arc::new(MemoryProfileStore::new());
    let (claims, jobs) = ClaimSyncQueue::channel();
    let state = Arc::new(AuthState::new(
        config,
        idp.clone(),
        users.clone(),
        sessions.clone(),
        profiles.clone(),
        claims,
    ));
    Fixture {
        idp,
        users,
        sessions,
        profiles,
        jobs,
        state,
    }
}

/// Verified password-provider claims for `subject`.
pub fn verified(subject: &str, email: &str) -> ValidatedClaims {
    ValidatedClaims::new(subject)
        .with_email(email, true)
        .with_provider("password")
}
