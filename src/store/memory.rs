//! In-process stores backed by `tokio` locks.
//!
//! Each trait method holds the write lock for its whole read-modify-write, so
//! the conditional semantics match the SQL implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    InsertOutcome, LoginApplied, LoginUpdate, ProfileStore, SessionInsert, SessionStore,
    UserStore,
};
use crate::identity::{AccountStatus, Role, SessionRef, User};
use crate::lockout::LockoutState;
use crate::session::{Location, Session};

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

fn email_matches(user: &User, email: &str) -> bool {
    user.email.as_deref() == Some(email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_subject_or_email(
        &self,
        subject_id: &str,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        let users = self.users.read().await;
        let by_subject = users.values().find(|u| u.subject_id == subject_id);
        let found = by_subject.or_else(|| {
            email.and_then(|email| users.values().find(|u| email_matches(u, email)))
        });
        Ok(found.cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.subject_id == subject_id)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| email_matches(u, email))
            .cloned())
    }

    async fn insert(&self, user: &User) -> Result<InsertOutcome> {
        let mut users = self.users.write().await;
        let conflict = users.values().any(|existing| {
            existing.id == user.id
                || existing.subject_id == user.subject_id
                || user
                    .email
                    .as_deref()
                    .is_some_and(|email| email_matches(existing, email))
        });
        if conflict {
            return Ok(InsertOutcome::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn apply_login(&self, id: Uuid, update: &LoginUpdate) -> Result<LoginApplied> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(LoginApplied::Missing);
        };
        if user.lockout.locked_until.is_some_and(|until| until > update.at) {
            return Ok(LoginApplied::Locked(user.clone()));
        }

        user.subject_id.clone_from(&update.subject_id);
        if let Some(name) = &update.name {
            user.name = Some(name.clone());
        }
        if let Some(avatar_url) = &update.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
        if user.email_verified_at.is_none() {
            user.email_verified_at = update.email_verified_at;
        }
        if update.last_login_ip.is_some() {
            user.last_login_ip.clone_from(&update.last_login_ip);
        }
        user.last_login = Some(update.at);
        user.login_count = user.login_count.saturating_add(1);
        user.lockout = LockoutState::cleared();
        user.updated_at = update.at;
        Ok(LoginApplied::Applied(user.clone()))
    }

    async fn save_lockout(&self, id: Uuid, state: LockoutState) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.lockout = state;
        }
        Ok(())
    }

    async fn clear_expired_lock(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) if user.lockout.locked_until.is_some_and(|until| until <= now) => {
                user.lockout = LockoutState::cleared();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_role(&self, id: Uuid, role: Role, at: DateTime<Utc>) -> Result<Option<User>> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|user| {
            user.role = role;
            user.updated_at = at;
            user.clone()
        }))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|user| {
            user.account_status = status;
            user.updated_at = at;
            user.clone()
        }))
    }

    async fn add_session_ref(&self, id: Uuid, session: SessionRef) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            if !user
                .active_sessions
                .iter()
                .any(|existing| existing.session_id == session.session_id)
            {
                user.active_sessions.push(session);
            }
        }
        Ok(())
    }

    async fn remove_session_refs(&self, id: Uuid, session_ids: &[Uuid]) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.active_sessions
                .retain(|existing| !session_ids.contains(&existing.session_id));
        }
        Ok(())
    }

    async fn clear_session_refs(&self, id: Uuid) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.active_sessions.clear();
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of stored sessions for a user, active or not.
    pub async fn count_for_user(&self, user_id: Uuid) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .count()
    }
}

fn deactivate_in_place(session: &mut Session, at: DateTime<Utc>) {
    session.is_active = false;
    session.logged_out_at = Some(at);
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn find_active_for_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.is_active && s.user_id == user_id && s.device.fingerprint == fingerprint)
            .cloned())
    }

    async fn insert_active(&self, session: &Session) -> Result<SessionInsert> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.values_mut().find(|s| {
            s.is_active
                && s.user_id == session.user_id
                && s.device.fingerprint == session.device.fingerprint
        }) {
            existing.last_activity = session.last_activity;
            existing.location = session.location.clone();
            return Ok(SessionInsert::Existing(existing.clone()));
        }
        sessions.insert(session.id, session.clone());
        Ok(SessionInsert::Created(session.clone()))
    }

    async fn touch(
        &self,
        id: Uuid,
        location: &Location,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(&id).filter(|s| s.is_active).map(|s| {
            s.last_activity = at;
            s.location = location.clone();
            s.clone()
        }))
    }

    async fn deactivate(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(&id).filter(|s| s.is_active).map(|s| {
            deactivate_in_place(s, at);
            s.clone()
        }))
    }

    async fn deactivate_all(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for session in sessions
            .values_mut()
            .filter(|s| s.is_active && s.user_id == user_id)
        {
            deactivate_in_place(session, at);
            count += 1;
        }
        Ok(count)
    }

    async fn deactivate_idle(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let mut sessions = self.sessions.write().await;
        let mut ids = Vec::new();
        for session in sessions
            .values_mut()
            .filter(|s| s.is_active && s.user_id == user_id && s.last_activity <= cutoff)
        {
            deactivate_in_place(session, at);
            ids.push(session.id);
        }
        Ok(ids)
    }

    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let mut active: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_active && s.user_id == user_id)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(active)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, Uuid)>> {
        let mut sessions = self.sessions.write().await;
        let mut purged = Vec::new();
        sessions.retain(|_, s| {
            let keep = s.expires_at > now;
            if !keep {
                purged.push((s.user_id, s.id));
            }
            keep
        });
        Ok(purged)
    }
}

#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashSet<(Uuid, Role)>>,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_profile(&self, user_id: Uuid, role: Role) -> bool {
        self.profiles.read().await.contains(&(user_id, role))
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn ensure_profile(&self, user_id: Uuid, role: Role) -> Result<bool> {
        if role == Role::Admin {
            return Ok(false);
        }
        Ok(self.profiles.write().await.insert((user_id, role)))
    }
}
