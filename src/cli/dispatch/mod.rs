//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action to run, such as starting the API
//! server with its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, idp};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();
    let cors_origin = matches.get_one::<String>("cors-origin").cloned();

    let idp_opts = idp::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        cors_origin,
        idp_url: idp_opts.url,
        idp_api_key: idp_opts.api_key,
        idp_timeout_seconds: idp_opts.timeout_seconds,
        trusted_oauth_providers: auth_opts.trusted_oauth_providers,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        session_idle_timeout_seconds: auth_opts.session_idle_timeout_seconds,
        session_purge_interval_seconds: auth_opts.session_purge_interval_seconds,
        lockout_max_attempts: auth_opts.lockout_max_attempts,
        lockout_duration_seconds: auth_opts.lockout_duration_seconds,
        failed_login_ip_limit: auth_opts.failed_login_ip_limit,
        failed_login_window_seconds: auth_opts.failed_login_window_seconds,
        claim_sync_max_attempts: auth_opts.claim_sync.max_attempts,
        claim_sync_backoff_base_seconds: auth_opts.claim_sync.backoff_base_seconds,
        claim_sync_backoff_max_seconds: auth_opts.claim_sync.backoff_max_seconds,
    }))
}
