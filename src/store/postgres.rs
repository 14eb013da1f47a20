//! PostgreSQL stores (`sql/schema.sql`).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::{
    InsertOutcome, LoginApplied, LoginUpdate, ProfileStore, SessionInsert, SessionStore,
    UserStore,
};
use crate::identity::{AccountStatus, Role, SessionRef, User};
use crate::lockout::LockoutState;
use crate::session::{DeviceInfo, DeviceType, Location, Session};

const USER_COLUMNS: &str = "id, subject_id, email, name, avatar_url, phone, role, account_status, \
    failed_login_attempts, locked_until, last_login, last_login_ip, login_count, \
    email_verified_at, phone_verified_at, active_sessions, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, subject_id, device_type, device_fingerprint, \
    user_agent, ip, country, region, city, login_method, is_active, last_activity, created_at, \
    expires_at, logged_out_at";

fn db_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("account_status")?;
    let attempts: i32 = row.try_get("failed_login_attempts")?;
    let login_count: i64 = row.try_get("login_count")?;
    let Json(active_sessions): Json<Vec<SessionRef>> = row.try_get("active_sessions")?;

    Ok(User {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        avatar_url: row.try_get("avatar_url")?,
        phone: row.try_get("phone")?,
        role: role.parse().map_err(|err: String| anyhow!(err))?,
        account_status: status.parse().map_err(|err: String| anyhow!(err))?,
        lockout: LockoutState {
            failed_login_attempts: u32::try_from(attempts).unwrap_or(0),
            locked_until: row.try_get("locked_until")?,
        },
        last_login: row.try_get("last_login")?,
        last_login_ip: row.try_get("last_login_ip")?,
        login_count: u64::try_from(login_count).unwrap_or(0),
        email_verified_at: row.try_get("email_verified_at")?,
        phone_verified_at: row.try_get("phone_verified_at")?,
        active_sessions,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    let device_type: String = row.try_get("device_type")?;
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        subject_id: row.try_get("subject_id")?,
        device: DeviceInfo {
            device_type: DeviceType::parse(&device_type),
            fingerprint: row.try_get("device_fingerprint")?,
            user_agent: row.try_get("user_agent")?,
        },
        location: Location {
            ip: row.try_get("ip")?,
            country: row.try_get("country")?,
            region: row.try_get("region")?,
            city: row.try_get("city")?,
        },
        login_method: row.try_get("login_method")?,
        is_active: row.try_get("is_active")?,
        last_activity: row.try_get("last_activity")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        logged_out_at: row.try_get("logged_out_at")?,
    })
}

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .with_context(|| format!("failed to lookup user by {column}"))?;
        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_subject_or_email(
        &self,
        subject_id: &str,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE subject_id = $1 OR ($2::text IS NOT NULL AND email = $2) \
             ORDER BY (subject_id = $1) DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(subject_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by subject or email")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<User>> {
        self.fetch_one_by("subject_id", subject_id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.fetch_one_by("email", email).await
    }

    async fn insert(&self, user: &User) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO users
                (id, subject_id, email, name, avatar_url, phone, role, account_status,
                 failed_login_attempts, locked_until, last_login, last_login_ip, login_count,
                 email_verified_at, phone_verified_at, active_sessions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT DO NOTHING
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(user.id)
            .bind(&user.subject_id)
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.avatar_url)
            .bind(&user.phone)
            .bind(user.role.as_str())
            .bind(user.account_status.as_str())
            .bind(i32::try_from(user.lockout.failed_login_attempts).unwrap_or(i32::MAX))
            .bind(user.lockout.locked_until)
            .bind(user.last_login)
            .bind(&user.last_login_ip)
            .bind(i64::try_from(user.login_count).unwrap_or(i64::MAX))
            .bind(user.email_verified_at)
            .bind(user.phone_verified_at)
            .bind(Json(&user.active_sessions))
            .bind(user.created_at)
            .bind(user.updated_at)
            .fetch_optional(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert user")?;

        Ok(if row.is_some() {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Conflict
        })
    }

    async fn apply_login(&self, id: Uuid, update: &LoginUpdate) -> Result<LoginApplied> {
        // The lock predicate is evaluated at write time so a concurrent
        // lock-triggering failure is never cleared by an older success.
        let query = format!(
            "UPDATE users SET
                subject_id = $2,
                name = COALESCE($3, name),
                avatar_url = COALESCE($4, avatar_url),
                email_verified_at = COALESCE(email_verified_at, $5),
                last_login_ip = COALESCE($6, last_login_ip),
                last_login = $7,
                login_count = login_count + 1,
                failed_login_attempts = 0,
                locked_until = NULL,
                updated_at = $7
             WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $7)
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&update.subject_id)
            .bind(&update.name)
            .bind(&update.avatar_url)
            .bind(update.email_verified_at)
            .bind(&update.last_login_ip)
            .bind(update.at)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to apply login")?;

        if let Some(row) = row {
            return Ok(LoginApplied::Applied(user_from_row(&row)?));
        }
        Ok(match self.find_by_id(id).await? {
            Some(user) => LoginApplied::Locked(user),
            None => LoginApplied::Missing,
        })
    }

    async fn save_lockout(&self, id: Uuid, state: LockoutState) -> Result<()> {
        let query = "UPDATE users SET failed_login_attempts = $2, locked_until = $3 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(i32::try_from(state.failed_login_attempts).unwrap_or(i32::MAX))
            .bind(state.locked_until)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to save lockout state")?;
        Ok(())
    }

    async fn clear_expired_lock(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE users SET failed_login_attempts = 0, locked_until = NULL
            WHERE id = $1 AND locked_until IS NOT NULL AND locked_until <= $2
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to clear expired lock")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_role(&self, id: Uuid, role: Role, at: DateTime<Utc>) -> Result<Option<User>> {
        let query =
            format!("UPDATE users SET role = $2, updated_at = $3 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = sqlx::query(&query)
            .bind(id)
            .bind(role.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update role")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let query = format!(
            "UPDATE users SET account_status = $2, updated_at = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(status.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update account status")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn add_session_ref(&self, id: Uuid, session: SessionRef) -> Result<()> {
        let query = r"
            UPDATE users SET active_sessions = active_sessions || $2
            WHERE id = $1
              AND NOT active_sessions @> jsonb_build_array(jsonb_build_object('session_id', $3::text))
        ";
        let session_id = session.session_id.to_string();
        sqlx::query(query)
            .bind(id)
            .bind(Json(vec![session]))
            .bind(session_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to add session reference")?;
        Ok(())
    }

    async fn remove_session_refs(&self, id: Uuid, session_ids: &[Uuid]) -> Result<()> {
        let query = r"
            UPDATE users SET active_sessions = COALESCE(
                (SELECT jsonb_agg(entry) FROM jsonb_array_elements(active_sessions) AS entry
                 WHERE NOT ((entry->>'session_id')::uuid = ANY($2))),
                '[]'::jsonb)
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .bind(session_ids)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to remove session references")?;
        Ok(())
    }

    async fn clear_session_refs(&self, id: Uuid) -> Result<()> {
        let query = "UPDATE users SET active_sessions = '[]'::jsonb WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to clear session references")?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find(&self, id: Uuid) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_active_for_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND device_fingerprint = $2 AND is_active"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup device session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn insert_active(&self, session: &Session) -> Result<SessionInsert> {
        // The partial unique index turns a racing duplicate into an update.
        let query = format!(
            "INSERT INTO sessions
                (id, user_id, subject_id, device_type, device_fingerprint, user_agent, ip,
                 country, region, city, login_method, is_active, last_activity, created_at,
                 expires_at, logged_out_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, $12, $13, $14, NULL)
             ON CONFLICT (user_id, device_fingerprint) WHERE is_active DO UPDATE SET
                last_activity = EXCLUDED.last_activity,
                ip = EXCLUDED.ip,
                country = EXCLUDED.country,
                region = EXCLUDED.region,
                city = EXCLUDED.city
             RETURNING {SESSION_COLUMNS}, (xmax = 0) AS inserted"
        );
        let row = sqlx::query(&query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.subject_id)
            .bind(session.device.device_type.as_str())
            .bind(&session.device.fingerprint)
            .bind(&session.device.user_agent)
            .bind(&session.location.ip)
            .bind(&session.location.country)
            .bind(&session.location.region)
            .bind(&session.location.city)
            .bind(&session.login_method)
            .bind(session.last_activity)
            .bind(session.created_at)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert session")?;

        let inserted: bool = row.try_get("inserted")?;
        let stored = session_from_row(&row)?;
        Ok(if inserted {
            SessionInsert::Created(stored)
        } else {
            SessionInsert::Existing(stored)
        })
    }

    async fn touch(
        &self,
        id: Uuid,
        location: &Location,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let query = format!(
            "UPDATE sessions SET last_activity = $2, ip = COALESCE($3, ip), \
             country = COALESCE($4, country), region = COALESCE($5, region), \
             city = COALESCE($6, city) \
             WHERE id = $1 AND is_active RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(at)
            .bind(&location.ip)
            .bind(&location.country)
            .bind(&location.region)
            .bind(&location.city)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to touch session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn deactivate(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Session>> {
        let query = format!(
            "UPDATE sessions SET is_active = FALSE, logged_out_at = $2 \
             WHERE id = $1 AND is_active RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to deactivate session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn deactivate_all(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let query = r"
            UPDATE sessions SET is_active = FALSE, logged_out_at = $2
            WHERE user_id = $1 AND is_active
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to deactivate user sessions")?;
        Ok(result.rows_affected())
    }

    async fn deactivate_idle(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let query = r"
            UPDATE sessions SET is_active = FALSE, logged_out_at = $3
            WHERE user_id = $1 AND is_active AND last_activity <= $2
            RETURNING id
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(cutoff)
            .bind(at)
            .fetch_all(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to sweep idle sessions")?;
        rows.iter()
            .map(|row| row.try_get("id").map_err(Into::into))
            .collect()
    }

    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND is_active ORDER BY last_activity DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list sessions")?;
        rows.iter().map(session_from_row).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, Uuid)>> {
        let query = "DELETE FROM sessions WHERE expires_at <= $1 RETURNING user_id, id";
        let rows = sqlx::query(query)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to purge expired sessions")?;
        rows.iter()
            .map(|row| -> Result<(Uuid, Uuid)> { Ok((row.try_get("user_id")?, row.try_get("id")?)) })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn ensure_profile(&self, user_id: Uuid, role: Role) -> Result<bool> {
        let query = match role {
            Role::Buyer => {
                "INSERT INTO buyer_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING"
            }
            Role::Seller => {
                "INSERT INTO seller_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING"
            }
            Role::Admin => return Ok(false),
        };
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .with_context(|| format!("failed to create {role} profile"))?;
        Ok(result.rows_affected() > 0)
    }
}
