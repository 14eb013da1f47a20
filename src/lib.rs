//! # Gatekeeper (external IdP login, identity reconciliation and sessions)
//!
//! `gatekeeper` authenticates end users against an external identity provider
//! and maps the verified identity onto an internally owned user record.
//!
//! ## Request Flow
//!
//! 1. The bearer credential is verified by the IdP with revocation checking
//!    ([`idp::TokenVerifier`]).
//! 2. Email verification is enforced unless the sign-in provider is a trusted
//!    OAuth provider.
//! 3. Lockout state embedded in the user record is checked
//!    ([`lockout::LockoutPolicy`]), expired locks are cleared on read.
//! 4. On login the claims are reconciled into a [`identity::User`]
//!    ([`identity::Reconciler`]) and a per-device session is opened
//!    ([`session::SessionManager`]).
//!
//! ## Role of Record
//!
//! The role stored on the user is authoritative. Client-supplied roles are
//! ignored; the stored role is pushed back to the IdP as a custom claim by a
//! background worker ([`claims::spawn_claim_sync_worker`]).

pub mod api;
pub mod auth;
pub mod claims;
pub mod cli;
pub mod identity;
pub mod idp;
pub mod lockout;
pub mod redact;
pub mod session;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
