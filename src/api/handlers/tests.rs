//! Router tests against in-memory stores and a stub IdP.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::api::router;
use crate::auth::test_support::{fixture, fixture_with, verified, Fixture};
use crate::auth::AuthConfig;
use crate::claims::RoleClaimJob;
use crate::identity::Role;
use crate::idp::{ValidatedClaims, VerificationError};
use crate::store::UserStore;

const UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

fn app(fx: &Fixture) -> Router {
    router(fx.state.clone(), None)
}

fn request(method: &str, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", UA);
    match token {
        Some(token) => builder.header("authorization", format!("Bearer {token}")),
        None => builder,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn login(app: &Router, token: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = request("POST", "/v1/auth/login", Some(token));
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    send(app, request).await
}

#[tokio::test]
async fn login_is_idempotent_and_dedups_device_session() {
    let fx = fixture();
    fx.idp.accept("t", verified("sub-1", "Ada@Example.com"));
    let app = app(&fx);

    let (status, json) = login(&app, "t", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["isNewUser"], true);
    assert_eq!(json["user"]["role"], "buyer");
    assert_eq!(json["user"]["email"], "ada@example.com");
    assert_eq!(json["user"]["isEmailVerified"], true);
    assert_eq!(json["user"]["accountStatus"], "active");

    let (status, json) = login(&app, "t", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["isNewUser"], false);

    assert_eq!(fx.users.len().await, 1);
    let user = fx.users.find_by_subject("sub-1").await.unwrap().unwrap();
    assert_eq!(user.login_count, 2);
    assert_eq!(fx.sessions.count_for_user(user.id).await, 1);
    assert_eq!(user.active_sessions.len(), 1);
}

#[tokio::test]
async fn login_response_hides_security_fields() {
    let fx = fixture();
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let (_, json) = login(&app(&fx), "t", None).await;
    let user = json["user"].as_object().unwrap();
    for hidden in [
        "failedLoginAttempts",
        "lockedUntil",
        "lockout",
        "activeSessions",
        "token",
    ] {
        assert!(!user.contains_key(hidden), "leaked {hidden}");
    }
}

#[tokio::test]
async fn client_role_hint_is_ignored() {
    let mut fx = fixture();
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let (status, json) = login(&app(&fx), "t", Some(json!({ "role": "admin", "name": "Ada" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["role"], "buyer");
    assert_eq!(json["user"]["name"], "Ada");
    assert_eq!(
        fx.jobs.try_recv().unwrap(),
        RoleClaimJob {
            subject_id: "sub-1".into(),
            role: Role::Buyer,
        }
    );
}

#[tokio::test]
async fn credential_failures_map_to_codes() {
    let fx = fixture();
    fx.idp.reject("expired", VerificationError::Expired);
    fx.idp.reject("revoked", VerificationError::Revoked);
    let app = app(&fx);

    let (status, json) = send(
        &app,
        request("POST", "/v1/auth/login", None)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "TOKEN_MISSING");
    assert_eq!(json["success"], false);

    let (_, json) = login(&app, "expired", None).await;
    assert_eq!(json["code"], "TOKEN_EXPIRED");
    let (_, json) = login(&app, "revoked", None).await;
    assert_eq!(json["code"], "TOKEN_REVOKED");
    let (_, json) = login(&app, "garbage", None).await;
    assert_eq!(json["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn unverified_email_needs_trusted_oauth() {
    let fx = fixture();
    fx.idp.accept(
        "pw",
        ValidatedClaims::new("a")
            .with_email("a@example.com", false)
            .with_provider("password"),
    );
    fx.idp.accept(
        "gh",
        ValidatedClaims::new("b")
            .with_email("b@example.com", false)
            .with_provider("github.com"),
    );
    let app = app(&fx);

    let (status, json) = login(&app, "pw", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "EMAIL_NOT_VERIFIED");
    assert!(fx.users.is_empty().await);

    let (status, json) = login(&app, "gh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["isEmailVerified"], false);
}

#[tokio::test]
async fn repeated_failures_lock_login() {
    let fx = fixture();
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let app = app(&fx);
    login(&app, "t", None).await;

    let failed = || {
        request("POST", "/v1/auth/login/failed", None)
            .header("content-type", "application/json")
            .body(Body::from(json!({ "email": "A@example.com" }).to_string()))
            .unwrap()
    };
    for _ in 0..4 {
        let (status, _) = send(&app, failed()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
    let (status, _) = login(&app, "t", None).await;
    assert_eq!(status, StatusCode::OK, "four failures must not lock");

    for _ in 0..5 {
        send(&app, failed()).await;
    }
    let (status, json) = login(&app, "t", None).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(json["code"], "ACCOUNT_LOCKED");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("try again in 15 minutes"));
}

#[tokio::test]
async fn failed_login_for_unknown_email_is_silent() {
    let fx = fixture();
    let (status, json) = send(
        &app(&fx),
        request("POST", "/v1/auth/login/failed", None)
            .header("content-type", "application/json")
            .body(Body::from(json!({ "email": "nobody@example.com" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(json, Value::Null);
}

#[tokio::test]
async fn failed_login_reports_are_limited_per_client_ip() {
    let fx = fixture_with(AuthConfig::new().with_failed_login_rate_limit(3, 600));
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let app = app(&fx);
    login(&app, "t", None).await;

    let failed = |ip: &str| {
        request("POST", "/v1/auth/login/failed", None)
            .header("content-type", "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(json!({ "email": "a@example.com" }).to_string()))
            .unwrap()
    };
    for _ in 0..3 {
        let (status, _) = send(&app, failed("203.0.113.7")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
    for _ in 0..5 {
        let (status, json) = send(&app, failed("203.0.113.7")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["code"], "RATE_LIMITED");
    }

    let user = fx
        .users
        .find_by_subject("sub-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.lockout.failed_login_attempts, 3);
    let (status, _) = login(&app, "t", None).await;
    assert_eq!(status, StatusCode::OK, "limited reports must not lock");

    let (status, _) = send(&app, failed("198.51.100.9")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn sessions_list_and_revoke_all() {
    let fx = fixture();
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let app = app(&fx);

    for device in ["d1", "d2", "d3"] {
        let (status, _) = send(
            &app,
            request("POST", "/v1/auth/login", Some("t"))
                .header("x-device-id", device)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = send(
        &app,
        request("GET", "/v1/sessions", Some("t"))
            .header("x-device-id", "d1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sessions"].as_array().unwrap().len(), 3);

    let (status, json) = send(
        &app,
        request("DELETE", "/v1/sessions", Some("t"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 3);

    let user = fx.users.find_by_subject("sub-1").await.unwrap().unwrap();
    assert!(user.active_sessions.is_empty());
}

#[tokio::test]
async fn revoke_single_session_checks_owner() {
    let fx = fixture();
    fx.idp.accept("a", verified("sub-a", "a@example.com"));
    fx.idp.accept("b", verified("sub-b", "b@example.com"));
    let app = app(&fx);
    login(&app, "a", None).await;
    login(&app, "b", None).await;

    let (_, json) = send(
        &app,
        request("GET", "/v1/sessions", Some("a"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let session_id = json["sessions"][0]["id"].as_str().unwrap().to_string();

    let uri = format!("/v1/sessions/{session_id}");
    let (status, json) = send(
        &app,
        request("DELETE", &uri, Some("b")).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, _) = send(
        &app,
        request("DELETE", &uri, Some("a")).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn logout_ends_device_session() {
    let fx = fixture();
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let app = app(&fx);
    login(&app, "t", None).await;

    let (status, _) = send(
        &app,
        request("POST", "/v1/auth/logout", Some("t"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let user = fx.users.find_by_subject("sub-1").await.unwrap().unwrap();
    let active = fx.state.sessions().list_active(user.id, Utc::now()).await.unwrap();
    assert!(active.is_empty());
    assert_eq!(fx.sessions.count_for_user(user.id).await, 1);
}

#[tokio::test]
async fn admin_routes_require_admin_of_record() {
    let mut fx = fixture();
    fx.idp.accept(
        "root",
        verified("sub-admin", "admin@example.com").with_role("admin"),
    );
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let app = app(&fx);
    login(&app, "root", None).await;
    login(&app, "t", None).await;
    while fx.jobs.try_recv().is_ok() {}

    let target = fx.users.find_by_subject("sub-1").await.unwrap().unwrap();
    let role_uri = format!("/v1/admin/users/{}/role", target.id);
    let body = || Body::from(json!({ "role": "seller" }).to_string());

    // The admin claim echoed by the IdP is not the role of record.
    let (status, json) = send(
        &app,
        request("PUT", &role_uri, Some("root"))
            .header("content-type", "application/json")
            .body(body())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "FORBIDDEN");

    let admin = fx.users.find_by_subject("sub-admin").await.unwrap().unwrap();
    fx.users
        .set_role(admin.id, Role::Admin, Utc::now())
        .await
        .unwrap();

    let (status, json) = send(
        &app,
        request("PUT", &role_uri, Some("root"))
            .header("content-type", "application/json")
            .body(body())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["role"], "seller");
    assert_eq!(fx.jobs.try_recv().unwrap().role, Role::Seller);
    assert!(fx.profiles.has_profile(target.id, Role::Seller).await);
}

#[tokio::test]
async fn banning_revokes_sessions_and_blocks_requests() {
    let fx = fixture();
    fx.idp.accept("root", verified("sub-admin", "admin@example.com"));
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let app = app(&fx);
    login(&app, "root", None).await;
    login(&app, "t", None).await;
    let admin = fx.users.find_by_subject("sub-admin").await.unwrap().unwrap();
    fx.users
        .set_role(admin.id, Role::Admin, Utc::now())
        .await
        .unwrap();
    let target = fx.users.find_by_subject("sub-1").await.unwrap().unwrap();

    let (status, json) = send(
        &app,
        request("PUT", &format!("/v1/admin/users/{}/status", target.id), Some("root"))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "status": "banned" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["accountStatus"], "banned");
    let active = fx.state.sessions().list_active(target.id, Utc::now()).await.unwrap();
    assert!(active.is_empty());

    let (status, json) = send(
        &app,
        request("GET", "/v1/sessions", Some("t"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "ACCOUNT_BANNED");
    assert_eq!(json["accountStatus"], "banned");
}

#[tokio::test]
async fn admin_target_must_exist() {
    let fx = fixture();
    fx.idp.accept("root", verified("sub-admin", "admin@example.com"));
    let app = app(&fx);
    login(&app, "root", None).await;
    let admin = fx.users.find_by_subject("sub-admin").await.unwrap().unwrap();
    fx.users
        .set_role(admin.id, Role::Admin, Utc::now())
        .await
        .unwrap();

    let (status, json) = send(
        &app,
        request(
            "PUT",
            &format!("/v1/admin/users/{}/role", uuid::Uuid::new_v4()),
            Some("root"),
        )
        .header("content-type", "application/json")
        .body(Body::from(json!({ "role": "seller" }).to_string()))
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["message"], "user not found");
}

#[tokio::test]
async fn me_is_optional() {
    let fx = fixture();
    fx.idp.accept("t", verified("sub-1", "a@example.com"));
    let app = app(&fx);

    let (status, json) = send(
        &app,
        request("GET", "/v1/auth/me", None).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["authenticated"], false);

    let (_, json) = send(
        &app,
        request("GET", "/v1/auth/me", Some("t"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(json["authenticated"], true);
    assert_eq!(json["user"]["subjectId"], "sub-1");
    assert_eq!(json["user"]["role"], "buyer");
}

#[tokio::test]
async fn health_reports_memory_backend() {
    let fx = fixture();
    let response = app(&fx)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-app"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["database"], "memory");
    assert_eq!(json["name"], env!("CARGO_PKG_NAME"));
}
