use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

use crate::auth::DEFAULT_TRUSTED_OAUTH_PROVIDERS;

pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_lockout_args(command);
    with_claim_sync_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("trusted-oauth-providers")
                .long("trusted-oauth-providers")
                .help("Sign-in providers exempt from the email verification check (comma separated)")
                .env("GATEKEEPER_TRUSTED_OAUTH_PROVIDERS")
                .value_delimiter(',')
                .default_values(DEFAULT_TRUSTED_OAUTH_PROVIDERS),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Absolute session lifetime in seconds")
                .env("GATEKEEPER_SESSION_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("session-idle-timeout-seconds")
                .long("session-idle-timeout-seconds")
                .help("Inactivity after which a session is force-expired, in seconds")
                .env("GATEKEEPER_SESSION_IDLE_TIMEOUT_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("session-purge-interval-seconds")
                .long("session-purge-interval-seconds")
                .help("How often sessions past their hard expiry are deleted")
                .env("GATEKEEPER_SESSION_PURGE_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("lockout-max-attempts")
                .long("lockout-max-attempts")
                .help("Failed logins before the account is locked")
                .env("GATEKEEPER_LOCKOUT_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("lockout-duration-seconds")
                .long("lockout-duration-seconds")
                .help("Lock duration in seconds")
                .env("GATEKEEPER_LOCKOUT_DURATION_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("failed-login-ip-limit")
                .long("failed-login-ip-limit")
                .help("Failed-login reports accepted per client IP within the window")
                .env("GATEKEEPER_FAILED_LOGIN_IP_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("failed-login-window-seconds")
                .long("failed-login-window-seconds")
                .help("Rolling window for the failed-login report limit")
                .env("GATEKEEPER_FAILED_LOGIN_WINDOW_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_claim_sync_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("claim-sync-max-attempts")
                .long("claim-sync-max-attempts")
                .help("Attempts to push a role claim to the identity provider")
                .env("GATEKEEPER_CLAIM_SYNC_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("claim-sync-backoff-base-seconds")
                .long("claim-sync-backoff-base-seconds")
                .help("Base delay for claim sync retry backoff")
                .env("GATEKEEPER_CLAIM_SYNC_BACKOFF_BASE_SECONDS")
                .default_value("1")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("claim-sync-backoff-max-seconds")
                .long("claim-sync-backoff-max-seconds")
                .help("Max delay for claim sync retry backoff")
                .env("GATEKEEPER_CLAIM_SYNC_BACKOFF_MAX_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct ClaimSyncOptions {
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug)]
pub struct Options {
    pub trusted_oauth_providers: Vec<String>,
    pub session_ttl_seconds: i64,
    pub session_idle_timeout_seconds: i64,
    pub session_purge_interval_seconds: u64,
    pub lockout_max_attempts: u32,
    pub lockout_duration_seconds: i64,
    pub failed_login_ip_limit: u32,
    pub failed_login_window_seconds: u64,
    pub claim_sync: ClaimSyncOptions,
}

impl Options {
    /// # Errors
    /// Returns an error if argument values are inconsistent.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let int = |name: &str, default: i64| matches.get_one::<i64>(name).copied().unwrap_or(default);
        let uint = |name: &str, default: u64| matches.get_one::<u64>(name).copied().unwrap_or(default);
        let count = |name: &str, default: u32| matches.get_one::<u32>(name).copied().unwrap_or(default);

        let session_ttl_seconds = int("session-ttl-seconds", 2_592_000);
        let session_idle_timeout_seconds = int("session-idle-timeout-seconds", 86_400);
        if session_idle_timeout_seconds > session_ttl_seconds {
            anyhow::bail!("--session-idle-timeout-seconds must not exceed --session-ttl-seconds");
        }

        Ok(Self {
            trusted_oauth_providers: matches
                .get_many::<String>("trusted-oauth-providers")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            session_ttl_seconds,
            session_idle_timeout_seconds,
            session_purge_interval_seconds: uint("session-purge-interval-seconds", 3600),
            lockout_max_attempts: count("lockout-max-attempts", 5),
            lockout_duration_seconds: int("lockout-duration-seconds", 900),
            failed_login_ip_limit: count("failed-login-ip-limit", 10),
            failed_login_window_seconds: uint("failed-login-window-seconds", 600),
            claim_sync: ClaimSyncOptions {
                max_attempts: count("claim-sync-max-attempts", 5),
                backoff_base_seconds: uint("claim-sync-backoff-base-seconds", 1),
                backoff_max_seconds: uint("claim-sync-backoff-max-seconds", 60),
            },
        })
    }
}
