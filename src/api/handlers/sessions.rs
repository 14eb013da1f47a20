use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::types::{SessionCount, SessionList};
use crate::api::ApiError;
use crate::auth::{AuthState, AuthenticatedUser};

#[utoipa::path(
    get,
    path = "/v1/sessions",
    responses(
        (status = 200, description = "Active sessions, most recently used first", body = SessionList),
        (status = 401, description = "Not authenticated", body = crate::api::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn list(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SessionList>, ApiError> {
    let sessions = match user.user_id {
        Some(user_id) => state.sessions().list_active(user_id, Utc::now()).await?,
        None => Vec::new(),
    };
    Ok(Json(SessionList {
        success: true,
        sessions,
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "No active session with this id for the caller", body = crate::api::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn revoke(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::NotFound("session"))?;
    state
        .sessions()
        .revoke_owned(user_id, id, Utc::now())
        .await?
        .ok_or(ApiError::NotFound("session"))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/sessions",
    responses(
        (status = 200, description = "All sessions revoked", body = SessionCount),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn revoke_all(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SessionCount>, ApiError> {
    let count = match user.user_id {
        Some(user_id) => state.sessions().revoke_all(user_id, Utc::now()).await?,
        None => 0,
    };
    Ok(Json(SessionCount {
        success: true,
        count,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/sweep",
    responses(
        (status = 200, description = "Idle sessions deactivated", body = SessionCount),
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn sweep(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SessionCount>, ApiError> {
    let count = match user.user_id {
        Some(user_id) => state.sessions().sweep_expired(user_id, Utc::now()).await?,
        None => 0,
    };
    Ok(Json(SessionCount {
        success: true,
        count: u64::try_from(count).unwrap_or(u64::MAX),
    }))
}
