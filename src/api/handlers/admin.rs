//! Role and account status management for administrators.
//!
//! The caller's role comes from the user of record attached by the
//! middleware, never from the request body or the IdP claim.

use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{RoleUpdate, StatusUpdate, UserEnvelope, UserView};
use crate::api::ApiError;
use crate::auth::{AuthState, AuthenticatedUser};
use crate::identity::{AccountStatus, Role};

fn require_admin(user: &AuthenticatedUser) -> Result<(), ApiError> {
    if user.user_id.is_some() && user.role == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = RoleUpdate,
    responses(
        (status = 200, description = "Role updated", body = UserEnvelope),
        (status = 403, description = "Caller is not an administrator", body = crate::api::ErrorBody),
        (status = 404, description = "User not found", body = crate::api::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn set_role(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(update): Json<RoleUpdate>,
) -> Result<Json<UserEnvelope>, ApiError> {
    require_admin(&caller)?;

    let user = state
        .users()
        .set_role(id, update.role, Utc::now())
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    info!(user_id = %user.id, role = %user.role, by = %caller.subject_id, "role changed");

    state.claims().enqueue(&user.subject_id, user.role);
    if let Err(err) = state.profiles().ensure_profile(user.id, user.role).await {
        warn!(user_id = %user.id, "failed to create profile: {err:#}");
    }

    Ok(Json(UserEnvelope {
        success: true,
        user: UserView::from(&user),
    }))
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/{id}/status",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Status updated", body = UserEnvelope),
        (status = 403, description = "Caller is not an administrator", body = crate::api::ErrorBody),
        (status = 404, description = "User not found", body = crate::api::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn set_status(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<UserEnvelope>, ApiError> {
    require_admin(&caller)?;

    let now = Utc::now();
    let user = state
        .users()
        .set_status(id, update.status, now)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    info!(
        user_id = %user.id,
        status = %user.account_status,
        by = %caller.subject_id,
        "account status changed"
    );

    if update.status != AccountStatus::Active {
        state.sessions().revoke_all(user.id, now).await?;
    }

    let user = state.users().find_by_id(id).await?.unwrap_or(user);
    Ok(Json(UserEnvelope {
        success: true,
        user: UserView::from(&user),
    }))
}
