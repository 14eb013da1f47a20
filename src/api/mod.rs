use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{delete, get, post, put},
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{optional_auth, require_auth, AuthConfig, AuthState, DEVICE_ID_HEADER};
use crate::claims::{spawn_claim_sync_worker, ClaimSyncConfig, ClaimSyncQueue};
use crate::idp::IdentityProvider;
use crate::session::spawn_purge_worker;
use crate::store::{
    MemoryProfileStore, MemorySessionStore, MemoryUserStore, PgProfileStore, PgSessionStore,
    PgUserStore, ProfileStore, SessionStore, UserStore,
};

mod error;
pub mod handlers;
mod openapi;

pub use error::{ApiError, ErrorBody};
pub use openapi::openapi;

use handlers::{admin, auth, health, sessions};

/// Listener and background worker settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// `None` runs on in-memory stores.
    pub dsn: Option<String>,
    /// Exact origin allowed by CORS; any origin when unset.
    pub cors_origin: Option<String>,
    pub purge_interval: Duration,
}

/// Build the application router.
///
/// Routes behind [`require_auth`] see an [`crate::auth::AuthenticatedUser`]
/// extension; `/v1/auth/me` uses [`optional_auth`].
pub fn router(state: Arc<AuthState>, pool: Option<PgPool>) -> Router {
    let protected = Router::new()
        .route("/v1/auth/logout", post(auth::logout))
        .route(
            "/v1/sessions",
            get(sessions::list).delete(sessions::revoke_all),
        )
        .route("/v1/sessions/sweep", post(sessions::sweep))
        .route("/v1/sessions/:id", delete(sessions::revoke))
        .route("/v1/admin/users/:id/role", put(admin::set_role))
        .route("/v1/admin/users/:id/status", put(admin::set_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let optional = Router::new()
        .route("/v1/auth/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/login/failed", post(auth::login_failed))
        .merge(protected)
        .merge(optional)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state))
                .layer(Extension(pool)),
        )
}

/// Start the server
/// # Errors
/// Return error if the database is unreachable or the listener fails
pub async fn new(
    config: ServerConfig,
    provider: Arc<dyn IdentityProvider>,
    auth_config: AuthConfig,
    claim_config: ClaimSyncConfig,
) -> Result<()> {
    let pool = match &config.dsn {
        Some(dsn) => Some(
            PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .acquire_timeout(Duration::from_secs(5))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?,
        ),
        None => None,
    };

    let (users, session_store, profiles): (
        Arc<dyn UserStore>,
        Arc<dyn SessionStore>,
        Arc<dyn ProfileStore>,
    ) = if let Some(pool) = &pool {
        (
            Arc::new(PgUserStore::new(pool.clone())),
            Arc::new(PgSessionStore::new(pool.clone())),
            Arc::new(PgProfileStore::new(pool.clone())),
        )
    } else {
        warn!("No DSN configured, using in-memory stores");
        (
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryProfileStore::new()),
        )
    };

    // Role claims are pushed to the IdP off the request path.
    let (claims, claim_jobs) = ClaimSyncQueue::channel();
    spawn_claim_sync_worker(provider.clone(), claim_jobs, claim_config);

    let state = Arc::new(AuthState::new(
        auth_config,
        provider,
        users,
        session_store,
        profiles,
        claims,
    ));

    spawn_purge_worker(state.session_manager(), config.purge_interval);

    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(DEVICE_ID_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE]);
    let cors = match &config.cors_origin {
        Some(origin) => cors.allow_origin(AllowOrigin::exact(cors_origin(origin)?)),
        None => cors.allow_origin(Any),
    };

    let app = router(state, pool).layer(cors);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Gracefully shutdown");
        }
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors_origin(origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(origin).with_context(|| format!("Invalid CORS origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("CORS origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build CORS origin header")
}
