use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{DeviceInfo, Location, Session};
use crate::identity::{SessionRef, User};
use crate::store::{SessionInsert, SessionStore, UserStore};

pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_HOURS: i64 = 24;

#[derive(Debug, PartialEq, Eq)]
pub enum SessionValidation {
    Valid(Session),
    /// No active session for this device; callers proceed.
    NotFound,
    /// The session went idle or past its hard expiry and was deactivated.
    Expired(Session),
}

pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    ttl: Duration,
    idle_timeout: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, users: Arc<dyn UserStore>) -> Self {
        Self {
            sessions,
            users,
            ttl: Duration::days(DEFAULT_SESSION_TTL_DAYS),
            idle_timeout: Duration::hours(DEFAULT_IDLE_TIMEOUT_HOURS),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Reuse the live session for this device or start a new one.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn open_or_refresh(
        &self,
        user: &User,
        device: DeviceInfo,
        location: Location,
        login_method: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if let Some(existing) = self
            .sessions
            .find_active_for_device(user.id, &device.fingerprint)
            .await?
        {
            if existing.is_stale(now, self.idle_timeout) {
                self.expire(&existing, now).await?;
            } else if let Some(session) = self.sessions.touch(existing.id, &location, now).await? {
                debug!(session_id = %session.id, "refreshed device session");
                return Ok(session);
            }
        }

        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            subject_id: user.subject_id.clone(),
            device,
            location,
            login_method: login_method.to_string(),
            is_active: true,
            last_activity: now,
            created_at: now,
            expires_at: now + self.ttl,
            logged_out_at: None,
        };

        match self.sessions.insert_active(&session).await? {
            SessionInsert::Created(session) => {
                let reference = SessionRef {
                    session_id: session.id,
                    device_fingerprint: session.device.fingerprint.clone(),
                    created_at: session.created_at,
                };
                if let Err(err) = self.users.add_session_ref(user.id, reference).await {
                    warn!(session_id = %session.id, "failed to track session on user: {err:#}");
                }
                info!(
                    session_id = %session.id,
                    device_type = %session.device.device_type,
                    "created session"
                );
                Ok(session)
            }
            SessionInsert::Existing(session) => {
                debug!(session_id = %session.id, "concurrent login reused device session");
                Ok(session)
            }
        }
    }

    /// Check the device session on an authenticated request and record activity.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn validate_and_touch(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<SessionValidation> {
        let Some(session) = self
            .sessions
            .find_active_for_device(user_id, fingerprint)
            .await?
        else {
            return Ok(SessionValidation::NotFound);
        };

        if session.is_stale(now, self.idle_timeout) {
            self.expire(&session, now).await?;
            return Ok(SessionValidation::Expired(session));
        }

        Ok(match self.sessions.touch(session.id, location, now).await? {
            Some(session) => SessionValidation::Valid(session),
            None => SessionValidation::NotFound,
        })
    }

    /// Deactivate one session. Returns it if this call ended it.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn revoke(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<Option<Session>> {
        let ended = self.sessions.deactivate(session_id, now).await?;
        if let Some(session) = &ended {
            self.forget(session.user_id, &[session.id]).await;
            info!(session_id = %session.id, "session revoked");
        }
        Ok(ended)
    }

    /// Like [`Self::revoke`], but only for a session owned by `user_id`.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn revoke_owned(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        match self.sessions.find(session_id).await? {
            Some(session) if session.user_id == user_id => self.revoke(session_id, now).await,
            _ => Ok(None),
        }
    }

    /// End the active session for a device, if any.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn revoke_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        match self
            .sessions
            .find_active_for_device(user_id, fingerprint)
            .await?
        {
            Some(session) => self.revoke(session.id, now).await,
            None => Ok(None),
        }
    }

    /// Deactivate every active session of a user and clear its session list.
    ///
    /// # Errors
    /// Returns an error if either store fails.
    #[instrument(skip(self, now))]
    pub async fn revoke_all(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let count = self.sessions.deactivate_all(user_id, now).await?;
        self.users.clear_session_refs(user_id).await?;
        info!(count, "revoked all sessions");
        Ok(count)
    }

    /// Deactivate the user's idle sessions. Safe to repeat.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn sweep_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.idle_timeout;
        let ids = self.sessions.deactivate_idle(user_id, cutoff, now).await?;
        if !ids.is_empty() {
            self.forget(user_id, &ids).await;
            info!(%user_id, count = ids.len(), "swept idle sessions");
        }
        Ok(ids.len())
    }

    /// Usable sessions at `now`, most recently used first. Idle or
    /// hard-expired rows that have not been swept yet are left out.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut sessions = self.sessions.list_active(user_id).await?;
        sessions.retain(|session| !session.is_stale(now, self.idle_timeout));
        Ok(sessions)
    }

    /// Physically delete sessions past their hard expiry and drop their
    /// references from the owning users.
    ///
    /// # Errors
    /// Returns an error if the session store fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = self.sessions.purge_expired(now).await?;
        let mut by_user: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (user_id, session_id) in &purged {
            by_user.entry(*user_id).or_default().push(*session_id);
        }
        for (user_id, session_ids) in by_user {
            self.forget(user_id, &session_ids).await;
        }
        Ok(purged.len() as u64)
    }

    async fn expire(&self, session: &Session, now: DateTime<Utc>) -> Result<()> {
        if self.sessions.deactivate(session.id, now).await?.is_some() {
            self.forget(session.user_id, &[session.id]).await;
            info!(session_id = %session.id, "session expired");
        }
        Ok(())
    }

    // The per-user list is a convenience index; the session row is authoritative.
    async fn forget(&self, user_id: Uuid, session_ids: &[Uuid]) {
        if let Err(err) = self.users.remove_session_refs(user_id, session_ids).await {
            warn!(%user_id, "failed to untrack sessions on user: {err:#}");
        }
    }
}

/// Spawn a background task that periodically deletes hard-expired sessions.
pub fn spawn_purge_worker(
    manager: Arc<SessionManager>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(std::time::Duration::from_secs(1));
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match manager.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(count) => info!(count, "purged expired sessions"),
                Err(err) => error!("session purge failed: {err:#}"),
            }
        }
    })
}
