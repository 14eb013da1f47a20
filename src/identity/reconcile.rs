//! Map a verified claim set onto exactly one internal user.
//!
//! Flow Overview:
//! 1) One lookup by subject id or email (subject match preferred).
//! 2) Missing: insert with the trusted role hint or `buyer`, then create the
//!    role profile shell. A lost unique-insert race falls through to step 3.
//! 3) Found: re-anchor the subject id if it changed, refresh profile fields,
//!    bump login counters and clear lockout through a conditional store write
//!    that refuses while a lock is in force.
//! 4) Queue a role claim sync when the user is new or the IdP echoed a
//!    different role.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{normalize_email, AccountStatus, Role, User};
use crate::claims::ClaimSyncQueue;
use crate::idp::ValidatedClaims;
use crate::lockout::{LockCheck, LockoutPolicy, LockoutState};
use crate::store::{InsertOutcome, LoginApplied, LoginUpdate, ProfileStore, UserStore};

/// A role chosen by server-side code.
///
/// Request payloads never produce one; handlers drop any client-supplied role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleHint(Role);

impl RoleHint {
    #[must_use]
    pub fn trusted(role: Role) -> Self {
        Self(role)
    }

    #[must_use]
    pub fn role(self) -> Role {
        self.0
    }
}

/// Optional inputs that only apply when the IdP did not provide a value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileHints {
    pub name: Option<String>,
    pub role: Option<RoleHint>,
}

impl ReconcileHints {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_trusted_role(mut self, role: Role) -> Self {
        self.role = Some(RoleHint::trusted(role));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("account locked until {until}")]
    Locked { until: DateTime<Utc> },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

enum Created {
    Inserted(User),
    Raced,
}

pub struct Reconciler {
    users: Arc<dyn UserStore>,
    profiles: Arc<dyn ProfileStore>,
    claims: ClaimSyncQueue,
    policy: LockoutPolicy,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        profiles: Arc<dyn ProfileStore>,
        claims: ClaimSyncQueue,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            users,
            profiles,
            claims,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Find or create the user for `claims` and record a successful login.
    ///
    /// Returns the stored user (authoritative role) and whether it was created.
    ///
    /// # Errors
    /// `Locked` if the account lock is still in force at write time, `Store`
    /// on persistence failures.
    #[instrument(skip_all, fields(subject_id = %claims.subject_id))]
    pub async fn reconcile(
        &self,
        claims: &ValidatedClaims,
        hints: &ReconcileHints,
        client_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(User, bool), ReconcileError> {
        let email = claims.email.as_deref().map(normalize_email);
        let existing = self
            .users
            .find_by_subject_or_email(&claims.subject_id, email.as_deref())
            .await?;

        let (user, is_new) = match existing {
            Some(user) => (
                self.login_existing(user, claims, hints, client_ip, now)
                    .await?,
                false,
            ),
            None => match self.create(claims, hints, email.clone(), client_ip, now).await? {
                Created::Inserted(user) => (user, true),
                Created::Raced => {
                    debug!("concurrent insert won, reconciling against stored user");
                    let user = self
                        .users
                        .find_by_subject_or_email(&claims.subject_id, email.as_deref())
                        .await?
                        .ok_or_else(|| anyhow!("user missing after insert conflict"))?;
                    (
                        self.login_existing(user, claims, hints, client_ip, now)
                            .await?,
                        false,
                    )
                }
            },
        };

        if is_new || claims.role.as_deref() != Some(user.role.as_str()) {
            self.claims.enqueue(&user.subject_id, user.role);
        }
        Ok((user, is_new))
    }

    async fn create(
        &self,
        claims: &ValidatedClaims,
        hints: &ReconcileHints,
        email: Option<String>,
        client_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Created> {
        let role = hints.role.map(RoleHint::role).unwrap_or_default();
        let user = User {
            id: Uuid::new_v4(),
            subject_id: claims.subject_id.clone(),
            email,
            name: non_empty(claims.name.as_deref()).or(non_empty(hints.name.as_deref())),
            avatar_url: non_empty(claims.avatar_url.as_deref()),
            phone: None,
            role,
            account_status: AccountStatus::Active,
            lockout: LockoutState::cleared(),
            last_login: Some(now),
            last_login_ip: client_ip.map(str::to_string),
            login_count: 1,
            email_verified_at: claims.email_verified.then_some(now),
            phone_verified_at: None,
            active_sessions: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        if self.users.insert(&user).await? == InsertOutcome::Conflict {
            return Ok(Created::Raced);
        }
        info!(user_id = %user.id, role = %user.role, "created user");

        match self.profiles.ensure_profile(user.id, user.role).await {
            Ok(true) => debug!(user_id = %user.id, role = %user.role, "created profile"),
            Ok(false) => {}
            Err(err) => warn!(user_id = %user.id, "failed to create profile: {err:#}"),
        }
        Ok(Created::Inserted(user))
    }

    async fn login_existing(
        &self,
        user: User,
        claims: &ValidatedClaims,
        hints: &ReconcileHints,
        client_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User, ReconcileError> {
        if user.subject_id != claims.subject_id {
            info!(
                user_id = %user.id,
                previous = %user.subject_id,
                "re-anchoring user to new subject id"
            );
        }

        let incoming_name = non_empty(claims.name.as_deref()).or(non_empty(hints.name.as_deref()));
        let update = LoginUpdate {
            subject_id: claims.subject_id.clone(),
            name: incoming_name.filter(|name| user.name.as_ref() != Some(name)),
            avatar_url: non_empty(claims.avatar_url.as_deref())
                .filter(|url| user.avatar_url.as_ref() != Some(url)),
            email_verified_at: claims.email_verified.then_some(now),
            last_login_ip: client_ip.map(str::to_string),
            at: now,
        };

        match self.users.apply_login(user.id, &update).await? {
            LoginApplied::Applied(user) => Ok(user),
            LoginApplied::Locked(user) => Err(ReconcileError::Locked {
                until: user.lockout.locked_until.unwrap_or(now),
            }),
            LoginApplied::Missing => Err(anyhow!("user {} disappeared during login", user.id).into()),
        }
    }

    /// Lock check for an already-loaded user; persists an auto-unlock.
    ///
    /// # Errors
    /// Returns an error if clearing an expired lock fails.
    pub async fn check_lock(&self, user: &User, now: DateTime<Utc>) -> anyhow::Result<LockCheck> {
        let check = self.policy.is_locked(user.lockout, now);
        if check.unlocked && self.users.clear_expired_lock(user.id, now).await? {
            info!(user_id = %user.id, "lock expired, counters cleared");
        }
        Ok(check)
    }

    /// Count a failed login against the account owning `email`, if any.
    ///
    /// Returns the new state, or `None` when no such account exists.
    ///
    /// # Errors
    /// Returns an error on persistence failures.
    #[instrument(skip_all)]
    pub async fn record_failed_login(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<LockoutState>> {
        let Some(user) = self.users.find_by_email(&normalize_email(email)).await? else {
            return Ok(None);
        };
        let was_locked = self.policy.is_locked(user.lockout, now).locked;
        let state = self.policy.record_failure(user.lockout, now);
        self.users.save_lockout(user.id, state).await?;
        if !was_locked && self.policy.is_locked(state, now).locked {
            warn!(
                user_id = %user.id,
                attempts = state.failed_login_attempts,
                "account locked after repeated failures"
            );
        }
        Ok(Some(state))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
