//! Login, failed-login reporting, logout and identity lookup.
//!
//! Flow Overview (login):
//! 1) Verify the bearer credential and the email verification rule.
//! 2) Reconcile the claims into the user of record.
//! 3) Reject inactive accounts.
//! 4) Open or refresh the device session (best effort).

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::types::{FailedLoginRequest, LoginRequest, LoginResponse, MeResponse, UserView};
use crate::api::ApiError;
use crate::auth::{
    client_ip, verify_credential, AuthState, AuthenticatedUser, RateLimitDecision, RequestContext,
};
use crate::identity::ReconcileHints;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login recorded", body = LoginResponse),
        (status = 401, description = "Missing, expired, revoked or invalid credential", body = crate::api::ErrorBody),
        (status = 403, description = "Email not verified or account not active", body = crate::api::ErrorBody),
        (status = 423, description = "Account locked", body = crate::api::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(state): Extension<Arc<AuthState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<LoginResponse>, ApiError> {
    let claims = verify_credential(&state, &headers).await?;
    let context = RequestContext::from_headers(&headers, peer.map(|ConnectInfo(addr)| addr.ip()));
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    if request.role.is_some() {
        debug!(subject_id = %claims.subject_id, "ignoring client-supplied role");
    }

    let mut hints = ReconcileHints::default();
    if let Some(name) = request.name {
        hints = hints.with_name(name);
    }

    let now = Utc::now();
    let (user, is_new_user) = state
        .reconciler()
        .reconcile(&claims, &hints, context.ip.as_deref(), now)
        .await?;

    if !user.is_active() {
        return Err(ApiError::AccountInactive(user.account_status));
    }

    if let Err(err) = state
        .sessions()
        .open_or_refresh(
            &user,
            context.device(),
            context.location(),
            claims.provider(),
            now,
        )
        .await
    {
        warn!(user_id = %user.id, "failed to record session: {err:#}");
    }

    let message = if is_new_user {
        "Account created"
    } else {
        "Login successful"
    };
    Ok(Json(LoginResponse {
        success: true,
        message: message.to_string(),
        user: UserView::from(&user),
        is_new_user,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/failed",
    request_body = FailedLoginRequest,
    responses(
        (status = 204, description = "Report accepted, whether or not the email is known"),
        (status = 429, description = "Too many reports from this client", body = crate::api::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login_failed(
    Extension(state): Extension<Arc<AuthState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<FailedLoginRequest>,
) -> Result<StatusCode, ApiError> {
    // Reports are unauthenticated, so each client IP gets a bounded share of
    // any account's lockout budget.
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr.ip()));
    if state.rate_limiter().check_ip(ip.as_deref()) == RateLimitDecision::Limited {
        warn!(
            ip = ip.as_deref().unwrap_or("-"),
            "failed-login reports rate limited"
        );
        return Err(ApiError::RateLimited);
    }

    match state
        .reconciler()
        .record_failed_login(&request.email, Utc::now())
        .await
    {
        Ok(Some(lockout)) => debug!(
            attempts = lockout.failed_login_attempts,
            "recorded failed login"
        ),
        Ok(None) => debug!("failed login for unknown email"),
        Err(err) => error!("failed to record failed login: {err:#}"),
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Device session ended"),
        (status = 401, description = "Not authenticated", body = crate::api::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    Extension(state): Extension<Arc<AuthState>>,
    Extension(user): Extension<AuthenticatedUser>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let Some(user_id) = user.user_id else {
        return Ok(StatusCode::NO_CONTENT);
    };
    let context = RequestContext::from_headers(&headers, peer.map(|ConnectInfo(addr)| addr.ip()));
    state
        .sessions()
        .revoke_device(user_id, &context.fingerprint(), Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Attached identity, if any", body = MeResponse),
    ),
    tag = "auth"
)]
pub async fn me(user: Option<Extension<AuthenticatedUser>>) -> Json<MeResponse> {
    let user = user.map(|Extension(user)| user);
    Json(MeResponse {
        authenticated: user.is_some(),
        user,
    })
}
