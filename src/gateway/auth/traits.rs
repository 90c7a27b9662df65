//! Authentication strategy trait definition.
//!
//! Defines the interface shared by the password, public-key and whitelist
//! checks so the dispatcher can hold them side by side.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::gateway::error::GatewayError;
use crate::gateway::identity::ResolvedIdentity;

use super::credential::Credential;

/// Everything a strategy may look at to judge one call.
#[derive(Debug)]
pub struct AuthRequest<'a> {
    pub credential: &'a Credential,
    /// The account named by the credential, already resolved.
    pub identity: &'a ResolvedIdentity,
    /// Address of the calling peer.
    pub peer: SocketAddr,
}

/// Trait for authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) since one instance
/// serves every concurrent call.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Verify the credential of one call.
    ///
    /// # Arguments
    ///
    /// * `request` - Credential, resolved identity and peer address
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected
    /// * `Err(error)` - The check could not be carried out
    async fn authenticate(&self, request: &AuthRequest<'_>) -> Result<bool, GatewayError>;

    /// Get the name of this authentication strategy.
    ///
    /// Used for logging and debugging purposes.
    fn name(&self) -> &'static str;
}
