use crate::{
    api::{self, ServerConfig},
    auth::AuthConfig,
    claims::ClaimSyncConfig,
    cli::telemetry,
    idp::HttpIdentityProvider,
};
use anyhow::Result;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub cors_origin: Option<String>,
    pub idp_url: Url,
    pub idp_api_key: SecretString,
    pub idp_timeout_seconds: u64,
    pub trusted_oauth_providers: Vec<String>,
    pub session_ttl_seconds: i64,
    pub session_idle_timeout_seconds: i64,
    pub session_purge_interval_seconds: u64,
    pub lockout_max_attempts: u32,
    pub lockout_duration_seconds: i64,
    pub failed_login_ip_limit: u32,
    pub failed_login_window_seconds: u64,
    pub claim_sync_max_attempts: u32,
    pub claim_sync_backoff_base_seconds: u64,
    pub claim_sync_backoff_max_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the IdP client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let provider = HttpIdentityProvider::new(
        args.idp_url,
        args.idp_api_key,
        Duration::from_secs(args.idp_timeout_seconds),
    )?;

    let auth_config = AuthConfig::new()
        .with_trusted_oauth_providers(args.trusted_oauth_providers)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_session_idle_timeout_seconds(args.session_idle_timeout_seconds)
        .with_lockout_max_attempts(args.lockout_max_attempts)
        .with_lockout_duration_seconds(args.lockout_duration_seconds)
        .with_failed_login_rate_limit(
            args.failed_login_ip_limit,
            args.failed_login_window_seconds,
        )
        .with_verify_timeout_seconds(args.idp_timeout_seconds);

    let claim_config = ClaimSyncConfig::new()
        .with_max_attempts(args.claim_sync_max_attempts)
        .with_backoff_base(Duration::from_secs(args.claim_sync_backoff_base_seconds))
        .with_backoff_max(Duration::from_secs(args.claim_sync_backoff_max_seconds));

    let server_config = ServerConfig {
        port: args.port,
        dsn: args.dsn,
        cors_origin: args.cors_origin,
        purge_interval: Duration::from_secs(args.session_purge_interval_seconds),
    };

    let result = api::new(server_config, Arc::new(provider), auth_config, claim_config).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "in-memory".to_string(), redact_dsn),
        ),
        (
            "cors_origin",
            args.cors_origin.clone().unwrap_or_else(|| "*".to_string()),
        ),
        ("idp_url", args.idp_url.to_string()),
        ("idp_timeout", format!("{}s", args.idp_timeout_seconds)),
        (
            "trusted_oauth_providers",
            args.trusted_oauth_providers.join(","),
        ),
        ("session_ttl", format!("{}s", args.session_ttl_seconds)),
        (
            "session_idle_timeout",
            format!("{}s", args.session_idle_timeout_seconds),
        ),
        (
            "session_purge_interval",
            format!("{}s", args.session_purge_interval_seconds),
        ),
        (
            "lockout",
            format!(
                "{} attempts / {}s",
                args.lockout_max_attempts, args.lockout_duration_seconds
            ),
        ),
        (
            "failed_login_limit",
            format!(
                "{} reports / {}s per ip",
                args.failed_login_ip_limit, args.failed_login_window_seconds
            ),
        ),
        (
            "claim_sync",
            format!(
                "{} attempts, backoff {}s..{}s",
                args.claim_sync_max_attempts,
                args.claim_sync_backoff_base_seconds,
                args.claim_sync_backoff_max_seconds
            ),
        ),
    ];
    info!("{}", format_entries("Startup configuration", &entries));
}

fn format_entries(title: &str, entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} ({})\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    message
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
