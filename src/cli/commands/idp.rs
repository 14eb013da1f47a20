use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("idp-url")
                .long("idp-url")
                .help("Identity provider API base URL")
                .env("GATEKEEPER_IDP_URL")
                .required(true),
        )
        .arg(
            Arg::new("idp-api-key")
                .long("idp-api-key")
                .help("Identity provider API key")
                .env("GATEKEEPER_IDP_API_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("idp-timeout-seconds")
                .long("idp-timeout-seconds")
                .help("Timeout for identity provider calls, including token verification")
                .env("GATEKEEPER_IDP_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: Url,
    pub api_key: SecretString,
    pub timeout_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing or the URL is invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>("idp-url")
            .context("missing required argument: --idp-url")?;
        let url = Url::parse(url).with_context(|| format!("invalid --idp-url: {url}"))?;
        let api_key = matches
            .get_one::<String>("idp-api-key")
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --idp-api-key")?;
        let timeout_seconds = matches
            .get_one::<u64>("idp-timeout-seconds")
            .copied()
            .unwrap_or(5);
        Ok(Self {
            url,
            api_key,
            timeout_seconds,
        })
    }
}
