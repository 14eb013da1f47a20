//! External identity provider boundary.
//!
//! The IdP is consumed as two capabilities: verify a bearer credential (with
//! revocation checking) and store custom claims for a subject. Implementations
//! are constructed at startup and injected; nothing here is a global.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod http;
mod verifier;

pub use http::HttpIdentityProvider;
pub use verifier::{TokenVerifier, DEFAULT_VERIFY_TIMEOUT};

/// Verified attributes returned by the IdP for a credential.
///
/// Read-only input: only selected fields flow into the user record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedClaims {
    #[serde(rename = "sub", alias = "uid")]
    pub subject_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "picture")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub sign_in_provider: Option<String>,
    /// Role claim echoed back from a prior sync.
    #[serde(default)]
    pub role: Option<String>,
}

impl ValidatedClaims {
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: None,
            email_verified: false,
            name: None,
            avatar_url: None,
            sign_in_provider: None,
            role: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.sign_in_provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Sign-in provider, `"password"` when the IdP did not report one.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.sign_in_provider.as_deref().unwrap_or("password")
    }
}

/// Why a credential was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    #[error("malformed token")]
    Malformed,
    #[error("token could not be verified")]
    Unknown,
}

impl VerificationError {
    /// Map an IdP error code (e.g. `auth/id-token-revoked`) to a failure kind.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let code = code.to_ascii_lowercase();
        if code.contains("revoked") {
            Self::Revoked
        } else if code.contains("expired") {
            Self::Expired
        } else if ["argument", "malformed", "invalid", "decode"]
            .iter()
            .any(|needle| code.contains(needle))
        {
            Self::Malformed
        } else {
            Self::Unknown
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a credential. Revocation must be checked when `check_revoked` is set.
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<ValidatedClaims, VerificationError>;

    /// Replace the custom claims stored for a subject.
    async fn set_custom_claims(&self, subject_id: &str, claims: &Value) -> anyhow::Result<()>;
}
