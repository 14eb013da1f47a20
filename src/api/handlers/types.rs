use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::identity::{AccountStatus, Role, User};
use crate::session::Session;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Display name used when the IdP did not supply one.
    pub name: Option<String>,
    /// Accepted for compatibility and never applied.
    pub role: Option<String>,
}

/// Public view of a user. Never carries counters, lock timestamps or tokens.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub subject_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub role: Role,
    pub is_email_verified: bool,
    pub is_phone_verified: bool,
    pub account_status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            subject_id: user.subject_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
            phone: user.phone.clone(),
            role: user.role,
            is_email_verified: user.is_email_verified(),
            is_phone_verified: user.is_phone_verified(),
            account_status: user.account_status,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user: UserView,
    pub is_new_user: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FailedLoginRequest {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthenticatedUser>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionList {
    pub success: bool,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionCount {
    pub success: bool,
    pub count: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdate {
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub status: AccountStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserEnvelope {
    pub success: bool,
    pub user: UserView,
}
