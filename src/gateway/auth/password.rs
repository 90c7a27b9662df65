//! Password authentication against the host's account database.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::gateway::error::GatewayError;

use super::pam::{DEFAULT_SERVICE, PamVerifier};
use super::traits::{AuthRequest, AuthStrategy};

/// Blocking password check.
///
/// Called on the blocking thread pool; implementations may block freely.
pub trait PasswordVerifier: Send + Sync {
    /// # Returns
    ///
    /// * `Ok(true)` - The password is correct
    /// * `Ok(false)` - The password was rejected
    /// * `Err(error)` - The backend failed
    fn verify(&self, username: &str, password: &str) -> Result<bool, GatewayError>;
}

/// Verifier used when no password backend could be set up.
#[derive(Debug, Clone)]
pub struct UnavailableVerifier {
    reason: String,
}

impl UnavailableVerifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PasswordVerifier for UnavailableVerifier {
    fn verify(&self, _username: &str, _password: &str) -> Result<bool, GatewayError> {
        Err(GatewayError::Password(format!(
            "password authentication unavailable: {}",
            self.reason
        )))
    }
}

/// Password authentication strategy.
pub struct PasswordAuth {
    verifier: Arc<dyn PasswordVerifier>,
}

impl PasswordAuth {
    pub fn new(verifier: Arc<dyn PasswordVerifier>) -> Self {
        Self { verifier }
    }

    /// Password authentication through the host's PAM `login` service.
    ///
    /// Falls back to a verifier that always fails if `libpam` is missing.
    pub fn system() -> Self {
        let verifier: Arc<dyn PasswordVerifier> = match PamVerifier::load(DEFAULT_SERVICE) {
            Ok(pam) => Arc::new(pam),
            Err(e) => {
                warn!("Password authentication disabled: {}", e);
                Arc::new(UnavailableVerifier::new(e.to_string()))
            }
        };
        Self::new(verifier)
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(&self, request: &AuthRequest<'_>) -> Result<bool, GatewayError> {
        let Some(password) = request.credential.password.clone() else {
            return Ok(false);
        };
        let username = request.identity.username.clone();
        let verifier = Arc::clone(&self.verifier);

        tokio::task::spawn_blocking(move || verifier.verify(&username, &password))
            .await
            .map_err(|e| GatewayError::Password(format!("password check aborted: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
