//! Per-call authentication decision.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::Status;
use tonic::metadata::MetadataMap;
use tracing::debug;

use crate::gateway::error::GatewayError;
use crate::gateway::identity::{PrivilegeContext, ResolvedIdentity};

use super::credential::{Credential, StrategyKind};
use super::traits::{AuthRequest, AuthStrategy};

/// The caller an authenticated request runs for.
///
/// Inserted into the request extensions by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub strategy: StrategyKind,
}

/// Chooses and runs exactly one strategy per call.
///
/// The choice depends only on which credential fields are present: a password
/// selects password authentication, a complete key proof selects public-key
/// authentication, and anything else falls back to the address whitelist.
/// A strategy that is not selected never runs, even if the selected one fails.
#[derive(Clone)]
pub struct AuthDispatcher {
    privileges: PrivilegeContext,
    password: Arc<dyn AuthStrategy>,
    public_key: Arc<dyn AuthStrategy>,
    whitelist: Arc<dyn AuthStrategy>,
}

impl AuthDispatcher {
    pub fn new(
        privileges: PrivilegeContext,
        password: Arc<dyn AuthStrategy>,
        public_key: Arc<dyn AuthStrategy>,
        whitelist: Arc<dyn AuthStrategy>,
    ) -> Self {
        Self {
            privileges,
            password,
            public_key,
            whitelist,
        }
    }

    fn strategy(&self, kind: StrategyKind) -> &dyn AuthStrategy {
        match kind {
            StrategyKind::Password => self.password.as_ref(),
            StrategyKind::PublicKey => self.public_key.as_ref(),
            StrategyKind::Whitelist => self.whitelist.as_ref(),
        }
    }

    /// Decide whether the call described by `metadata` and `peer` may proceed.
    ///
    /// Every rejection of the caller's proof yields the same
    /// `PermissionDenied` status; the reason is only logged.
    pub async fn authorize(
        &self,
        metadata: &MetadataMap,
        peer: Option<SocketAddr>,
    ) -> Result<AuthenticatedUser, Status> {
        self.check(metadata, peer).await.map_err(|err| {
            debug!("Authentication refused: {}", err);
            Status::from(err)
        })
    }

    async fn check(
        &self,
        metadata: &MetadataMap,
        peer: Option<SocketAddr>,
    ) -> Result<AuthenticatedUser, GatewayError> {
        let credential = Credential::from_metadata(metadata)?;
        let identity: ResolvedIdentity = self.privileges.resolve(&credential.user).await?;
        let peer = peer.ok_or(GatewayError::MissingPeer)?;

        let kind = credential.strategy_kind();
        let strategy = self.strategy(kind);
        debug!(
            "Authenticating {} from {} with {} strategy",
            credential.user,
            peer,
            strategy.name()
        );

        let request = AuthRequest {
            credential: &credential,
            identity: &identity,
            peer,
        };
        if !strategy.authenticate(&request).await? {
            return Err(GatewayError::Denied(strategy.name()));
        }

        debug!("Authenticated {} with {} strategy", credential.user, strategy.name());
        Ok(AuthenticatedUser {
            username: credential.user,
            strategy: kind,
        })
    }
}
