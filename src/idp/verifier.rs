//! Token verification gateway: one call from bearer credential to claims.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use super::{IdentityProvider, ValidatedClaims, VerificationError};

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct TokenVerifier {
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn provider(&self) -> Arc<dyn IdentityProvider> {
        self.provider.clone()
    }

    /// Verify a bearer credential with revocation checking.
    ///
    /// A blank credential is `Malformed`; a call that exceeds the timeout is
    /// `Unknown` so callers may retry.
    ///
    /// # Errors
    /// Returns the typed verification failure.
    pub async fn verify(&self, credential: &SecretString) -> Result<ValidatedClaims, VerificationError> {
        let token = credential.expose_secret().trim();
        if token.is_empty() {
            return Err(VerificationError::Malformed);
        }

        match tokio::time::timeout(self.timeout, self.provider.verify_token(token, true)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis(), "IdP verification timed out");
                Err(VerificationError::Unknown)
            }
        }
    }
}
