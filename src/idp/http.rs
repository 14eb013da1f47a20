//! HTTP client for the identity provider's admin API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;

use super::{IdentityProvider, ValidatedClaims, VerificationError};
use crate::redact::Redacted;
use crate::APP_USER_AGENT;

const API_KEY_HEADER: &str = "x-api-key";

/// Error body returned by the IdP on rejected credentials.
#[derive(Debug, Deserialize)]
struct IdpErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<IdpErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct IdpErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl IdpErrorBody {
    fn code(&self) -> Option<&str> {
        self.code
            .as_deref()
            .or_else(|| self.error.as_ref().and_then(|e| e.code.as_deref()))
            .or_else(|| self.error.as_ref().and_then(|e| e.message.as_deref()))
    }
}

pub struct HttpIdentityProvider {
    base_url: Url,
    api_key: SecretString,
    http: Client,
}

impl HttpIdentityProvider {
    /// Build a provider client bound to `base_url`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build IdP HTTP client")?;
        Ok(Self {
            base_url,
            api_key,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid IdP endpoint path: {path}"))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all)]
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<ValidatedClaims, VerificationError> {
        let url = self.endpoint("v1/tokens:verify").map_err(|err| {
            error!("IdP verify endpoint misconfigured: {err}");
            VerificationError::Unknown
        })?;

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&json!({ "token": token, "checkRevoked": check_revoked }))
            .send()
            .await
            .map_err(|err| {
                error!("IdP verify request failed: {err}");
                VerificationError::Unknown
            })?;

        let status = response.status();
        if status.is_success() {
            let claims = response.json::<ValidatedClaims>().await.map_err(|err| {
                error!("IdP returned unreadable claims: {err}");
                VerificationError::Unknown
            })?;
            debug!(claims = %Redacted(&claims), "token verified");
            return Ok(claims);
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            error!("IdP verify returned {status}");
            return Err(VerificationError::Unknown);
        }

        let body = response.json::<IdpErrorBody>().await.ok();
        Err(body
            .as_ref()
            .and_then(IdpErrorBody::code)
            .map_or(VerificationError::Malformed, VerificationError::from_code))
    }

    #[instrument(skip(self, claims))]
    async fn set_custom_claims(&self, subject_id: &str, claims: &Value) -> Result<()> {
        let url = self.endpoint(&format!("v1/users/{subject_id}/claims"))?;
        let response = self
            .http
            .put(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&json!({ "customClaims": claims }))
            .send()
            .await
            .context("IdP claims request failed")?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("IdP claims update returned {}", response.status()))
        }
    }
}
