use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{extract_bearer, AuthState, RequestContext};
use crate::api::ApiError;
use crate::identity::{normalize_email, Role, User};
use crate::idp::ValidatedClaims;
use crate::session::SessionValidation;

/// Identity attached to request extensions after authentication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub subject_id: String,
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub role: Role,
    /// `None` until the subject has completed a login.
    #[serde(skip)]
    pub user_id: Option<Uuid>,
}

impl AuthenticatedUser {
    fn from_claims(claims: &ValidatedClaims) -> Self {
        Self {
            subject_id: claims.subject_id.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
            avatar_url: claims.avatar_url.clone(),
            role: Role::default(),
            user_id: None,
        }
    }

    fn from_user(user: &User, claims: &ValidatedClaims) -> Self {
        Self {
            subject_id: user.subject_id.clone(),
            email: user.email.clone().or_else(|| claims.email.clone()),
            name: user.name.clone().or_else(|| claims.name.clone()),
            avatar_url: user.avatar_url.clone().or_else(|| claims.avatar_url.clone()),
            role: user.role,
            user_id: Some(user.id),
        }
    }
}

/// Verify the bearer credential and enforce email verification.
///
/// # Errors
/// `TokenMissing`, the mapped verification failure, or `EmailNotVerified`
/// when the provider is not a trusted OAuth provider.
pub async fn verify_credential(
    state: &AuthState,
    headers: &HeaderMap,
) -> Result<ValidatedClaims, ApiError> {
    let token = extract_bearer(headers).ok_or(ApiError::TokenMissing)?;
    let claims = state.verifier().verify(&token).await?;

    if !claims.email_verified && !state.config().is_trusted_oauth(claims.provider()) {
        debug!(
            subject_id = %claims.subject_id,
            provider = claims.provider(),
            "rejecting unverified email"
        );
        return Err(ApiError::EmailNotVerified);
    }

    Ok(claims)
}

/// Full authentication of a non-login request.
///
/// # Errors
/// Any credential, lockout, account status or session rejection.
#[instrument(skip_all)]
pub async fn authenticate(
    state: &AuthState,
    headers: &HeaderMap,
    peer: Option<IpAddr>,
) -> Result<AuthenticatedUser, ApiError> {
    let claims = verify_credential(state, headers).await?;
    let now = Utc::now();

    // Same lookup as reconciliation, so a new subject carrying a known email
    // is held to that account's lock and status.
    let email = claims.email.as_deref().map(normalize_email);
    let Some(user) = state
        .users()
        .find_by_subject_or_email(&claims.subject_id, email.as_deref())
        .await?
    else {
        debug!(subject_id = %claims.subject_id, "subject has no user record yet");
        return Ok(AuthenticatedUser::from_claims(&claims));
    };

    let lock = state.reconciler().check_lock(&user, now).await?;
    if lock.locked {
        if let Some(until) = lock.state.locked_until {
            return Err(ApiError::locked_until(until, now));
        }
    }

    if !user.is_active() {
        return Err(ApiError::AccountInactive(user.account_status));
    }

    let context = RequestContext::from_headers(headers, peer);
    match state
        .sessions()
        .validate_and_touch(user.id, &context.fingerprint(), &context.location(), now)
        .await?
    {
        SessionValidation::Expired(session) => {
            debug!(session_id = %session.id, "session idle timeout");
            return Err(ApiError::SessionExpired);
        }
        SessionValidation::Valid(_) | SessionValidation::NotFound => {}
    }

    Ok(AuthenticatedUser::from_user(&user, &claims))
}

fn peer_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Reject the request unless it authenticates.
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = peer_ip(&request);
    match authenticate(&state, request.headers(), peer).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Attach the identity when the request authenticates; otherwise proceed anonymously.
pub async fn optional_auth(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = peer_ip(&request);
    match authenticate(&state, request.headers(), peer).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
        }
        Err(err) => debug!(code = err.code(), "continuing without identity"),
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{fixture, verified};
    use crate::identity::{AccountStatus, ReconcileHints};
    use crate::idp::VerificationError;
    use crate::lockout::LockoutState;
    use crate::store::UserStore;
    use axum::http::{HeaderValue, StatusCode};
    use axum::{body::Body, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers.insert("user-agent", HeaderValue::from_static("test-agent/1.0"));
        headers
    }

    #[tokio::test]
    async fn missing_credential_is_token_missing() {
        let fx = fixture();
        let err = authenticate(&fx.state, &HeaderMap::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_MISSING");
    }

    #[tokio::test]
    async fn verification_kinds_surface() {
        let fx = fixture();
        fx.idp.reject("old", VerificationError::Expired);
        fx.idp.reject("gone", VerificationError::Revoked);

        let err = authenticate(&fx.state, &bearer("old"), None).await.unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXPIRED");
        let err = authenticate(&fx.state, &bearer("gone"), None).await.unwrap_err();
        assert_eq!(err.code(), "TOKEN_REVOKED");
        let err = authenticate(&fx.state, &bearer("nope"), None).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn unverified_email_rejected_unless_trusted_oauth() {
        let fx = fixture();
        fx.idp.accept(
            "pw",
            crate::idp::ValidatedClaims::new("a")
                .with_email("a@example.com", false)
                .with_provider("password"),
        );
        fx.idp.accept(
            "g",
            crate::idp::ValidatedClaims::new("b")
                .with_email("b@example.com", false)
                .with_provider("google.com"),
        );

        let err = authenticate(&fx.state, &bearer("pw"), None).await.unwrap_err();
        assert_eq!(err.code(), "EMAIL_NOT_VERIFIED");

        let user = authenticate(&fx.state, &bearer("g"), None).await.unwrap();
        assert_eq!(user.subject_id, "b");
        assert_eq!(user.role, Role::Buyer);
        assert_eq!(user.user_id, None);
    }

    #[tokio::test]
    async fn reconciled_user_carries_stored_role() {
        let fx = fixture();
        let claims = verified("s1", "s1@example.com").with_role("admin");
        fx.idp.accept("t", claims.clone());
        let (user, _) = fx
            .state
            .reconciler()
            .reconcile(&claims, &ReconcileHints::default(), None, Utc::now())
            .await
            .unwrap();

        let authed = authenticate(&fx.state, &bearer("t"), None).await.unwrap();
        assert_eq!(authed.user_id, Some(user.id));
        assert_eq!(authed.role, Role::Buyer);
    }

    #[tokio::test]
    async fn locked_and_inactive_accounts_rejected() {
        let fx = fixture();
        let claims = verified("s1", "s1@example.com");
        fx.idp.accept("t", claims.clone());
        let (user, _) = fx
            .state
            .reconciler()
            .reconcile(&claims, &ReconcileHints::default(), None, Utc::now())
            .await
            .unwrap();

        fx.users
            .save_lockout(
                user.id,
                LockoutState {
                    failed_login_attempts: 5,
                    locked_until: Some(Utc::now() + chrono::Duration::minutes(10)),
                },
            )
            .await
            .unwrap();
        let err = authenticate(&fx.state, &bearer("t"), None).await.unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_LOCKED");

        fx.users
            .save_lockout(user.id, LockoutState::cleared())
            .await
            .unwrap();
        fx.users
            .set_status(user.id, AccountStatus::Suspended, Utc::now())
            .await
            .unwrap();
        let err = authenticate(&fx.state, &bearer("t"), None).await.unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_SUSPENDED");
    }

    #[tokio::test]
    async fn expired_lock_is_cleared_on_read() {
        let fx = fixture();
        let claims = verified("s1", "s1@example.com");
        fx.idp.accept("t", claims.clone());
        let (user, _) = fx
            .state
            .reconciler()
            .reconcile(&claims, &ReconcileHints::default(), None, Utc::now())
            .await
            .unwrap();
        fx.users
            .save_lockout(
                user.id,
                LockoutState {
                    failed_login_attempts: 5,
                    locked_until: Some(Utc::now() - chrono::Duration::minutes(1)),
                },
            )
            .await
            .unwrap();

        assert!(authenticate(&fx.state, &bearer("t"), None).await.is_ok());
        let stored = fx.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.lockout, LockoutState::cleared());
    }

    #[tokio::test]
    async fn idle_session_is_session_expired() {
        let fx = fixture();
        let claims = verified("s1", "s1@example.com");
        fx.idp.accept("t", claims.clone());
        let long_ago = Utc::now() - chrono::Duration::hours(25);
        let (user, _) = fx
            .state
            .reconciler()
            .reconcile(&claims, &ReconcileHints::default(), None, long_ago)
            .await
            .unwrap();
        let context = RequestContext::from_headers(&bearer("t"), None);
        fx.state
            .sessions()
            .open_or_refresh(&user, context.device(), context.location(), "password", long_ago)
            .await
            .unwrap();

        let err = authenticate(&fx.state, &bearer("t"), None).await.unwrap_err();
        assert_eq!(err.code(), "SESSION_EXPIRED");
        // Flipped once; the next request has no session to expire.
        assert!(authenticate(&fx.state, &bearer("t"), None).await.is_ok());
    }

    #[tokio::test]
    async fn new_subject_with_known_email_is_held_to_account_status() {
        let fx = fixture();
        let original = verified("sub-A", "victim@example.com");
        let (user, _) = fx
            .state
            .reconciler()
            .reconcile(&original, &ReconcileHints::default(), None, Utc::now())
            .await
            .unwrap();
        fx.users
            .set_status(user.id, AccountStatus::Banned, Utc::now())
            .await
            .unwrap();

        fx.idp.accept("other", verified("sub-B", "Victim@Example.com"));
        let err = authenticate(&fx.state, &bearer("other"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_BANNED");

        fx.users
            .set_status(user.id, AccountStatus::Active, Utc::now())
            .await
            .unwrap();
        fx.users
            .save_lockout(
                user.id,
                LockoutState {
                    failed_login_attempts: 5,
                    locked_until: Some(Utc::now() + chrono::Duration::minutes(10)),
                },
            )
            .await
            .unwrap();
        let err = authenticate(&fx.state, &bearer("other"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_LOCKED");
    }

    async fn whoami(user: Option<Extension<AuthenticatedUser>>) -> String {
        user.map_or_else(|| "anonymous".to_string(), |Extension(u)| u.subject_id)
    }

    #[tokio::test]
    async fn layers_attach_identity_or_reject() {
        let fx = fixture();
        fx.idp.accept("t", verified("s1", "s1@example.com"));

        let required = Router::new()
            .route("/", get(whoami))
            .layer(middleware::from_fn_with_state(fx.state.clone(), require_auth));
        let optional = Router::new()
            .route("/", get(whoami))
            .layer(middleware::from_fn_with_state(fx.state.clone(), optional_auth));

        let response = required
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = required
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("authorization", "Bearer t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"s1");

        let response = optional
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("authorization", "Bearer bad")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"anonymous");
    }
}
