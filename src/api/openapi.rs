use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::handlers::{admin, auth, health, sessions, types};
use crate::api::ErrorBody;
use crate::auth::AuthenticatedUser;
use crate::identity::{AccountStatus, Role};
use crate::session::{DeviceInfo, DeviceType, Location, Session};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::login_failed,
        auth::logout,
        auth::me,
        sessions::list,
        sessions::revoke,
        sessions::revoke_all,
        sessions::sweep,
        admin::set_role,
        admin::set_status,
    ),
    components(schemas(
        health::Health,
        ErrorBody,
        AuthenticatedUser,
        Role,
        AccountStatus,
        Session,
        DeviceInfo,
        DeviceType,
        Location,
        types::LoginRequest,
        types::LoginResponse,
        types::UserView,
        types::FailedLoginRequest,
        types::MeResponse,
        types::SessionList,
        types::SessionCount,
        types::RoleUpdate,
        types::StatusUpdate,
        types::UserEnvelope,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "IdP login, failed-login reporting and logout"),
        (name = "sessions", description = "Per-device session management"),
        (name = "admin", description = "Role and account status changes"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// The generated `OpenAPI` document.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
