//! Persistence boundary for users, sessions and role profiles.
//!
//! Two implementations share these traits: [`postgres`] for deployments and
//! [`memory`] for tests and local runs without a database.
//!
//! Writes that guard invariants are conditional in the store itself:
//! - `apply_login` refuses to clear a lock that is still in force at write time.
//! - `insert_active` turns a racing duplicate (same user + fingerprint) into an
//!   update of the existing active row.
//! - `deactivate*` only flip rows that are still active.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::{AccountStatus, Role, SessionRef, User};
use crate::lockout::LockoutState;
use crate::session::{Location, Session};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryProfileStore, MemorySessionStore, MemoryUserStore};
pub use postgres::{PgProfileStore, PgSessionStore, PgUserStore};

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Unique constraint on subject id or email lost a race.
    Conflict,
}

/// Field changes applied on a successful login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginUpdate {
    pub subject_id: String,
    /// `Some` replaces the stored value.
    pub name: Option<String>,
    /// `Some` replaces the stored value.
    pub avatar_url: Option<String>,
    /// Stamped only if the stored value is still empty.
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum LoginApplied {
    Applied(User),
    /// Lock still in force at write time; nothing was changed.
    Locked(User),
    Missing,
}

#[derive(Debug)]
pub enum SessionInsert {
    Created(Session),
    /// An active session for the same device already existed and was refreshed.
    Existing(Session),
}

impl SessionInsert {
    #[must_use]
    pub fn into_session(self) -> Session {
        match self {
            Self::Created(session) | Self::Existing(session) => session,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// One logical lookup by subject id OR email; a subject match wins.
    async fn find_by_subject_or_email(
        &self,
        subject_id: &str,
        email: Option<&str>,
    ) -> Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn insert(&self, user: &User) -> Result<InsertOutcome>;
    async fn apply_login(&self, id: Uuid, update: &LoginUpdate) -> Result<LoginApplied>;
    async fn save_lockout(&self, id: Uuid, state: LockoutState) -> Result<()>;
    /// Clear lock fields only if the lock has expired at `now`.
    async fn clear_expired_lock(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;
    async fn set_role(&self, id: Uuid, role: Role, at: DateTime<Utc>) -> Result<Option<User>>;
    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<User>>;
    async fn add_session_ref(&self, id: Uuid, session: SessionRef) -> Result<()>;
    async fn remove_session_refs(&self, id: Uuid, session_ids: &[Uuid]) -> Result<()>;
    async fn clear_session_refs(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<Session>>;
    async fn find_active_for_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Session>>;
    async fn insert_active(&self, session: &Session) -> Result<SessionInsert>;
    /// Refresh activity and location of an active session.
    async fn touch(
        &self,
        id: Uuid,
        location: &Location,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>>;
    /// Returns the session if this call flipped it from active to inactive.
    async fn deactivate(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Session>>;
    async fn deactivate_all(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64>;
    /// Deactivate active sessions idle since `cutoff` or earlier; returns their ids.
    async fn deactivate_idle(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;
    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>>;
    /// Physically remove sessions past their hard expiry.
    /// Returns `(user_id, session_id)` for every removed row.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, Uuid)>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Create the role-specific profile shell if missing. Returns true if created.
    async fn ensure_profile(&self, user_id: Uuid, role: Role) -> Result<bool>;
}
