//! Error types for the gateway and their mapping onto gRPC status codes.
//!
//! Failures are split into two tiers:
//!
//! 1. **Transport failures**: a [`GatewayError`] converted into a
//!    [`tonic::Status`]; the call ends without a payload.
//! 2. **Application failures**: reported inside a normally shaped response
//!    (`success = false`, or `exit_code = 255`). These never become a
//!    `GatewayError`.
//!
//! # Uniform denial
//!
//! Every authentication failure that is not a server-side fault collapses
//! into the same `PermissionDenied("authentication failure")` status. Which
//! check failed is only visible in the debug log:
//!
//! | Variant | Code |
//! |---------|------|
//! | `MissingUser`, `UnknownUser` | `Unauthenticated` |
//! | `UserLookup`, `MissingPeer`, `SignatureEncoding`, `Io`, `Transport` | `Internal` |
//! | `Denied`, `Password`, `Signature`, `Fingerprint`, `KeyCache` | `PermissionDenied` |
//! | `InvalidTransfer` | `InvalidArgument` |
//! | `SourceUnavailable` | `NotFound` |
//! | `SizeMismatch` | `DataLoss` |
//! | `StreamReceive` | `Unknown` |

use std::path::PathBuf;

use thiserror::Error;
use tonic::Status;

use crate::gateway::keycache::KeyCacheError;

/// Message returned for every denied authentication attempt.
pub const DENIAL_MESSAGE: &str = "authentication failure";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The `user` metadata key is missing or empty.
    #[error("invalid auth info: missing 'user' in metadata")]
    MissingUser,

    /// The named user does not exist in the identity database.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// The identity database itself failed.
    #[error("user lookup failed: {0}")]
    UserLookup(String),

    /// No peer address is attached to the call.
    #[error("peer info is nil")]
    MissingPeer,

    /// `signed-data` is not valid base64.
    #[error("failed to decode SSH signature data: {0}")]
    SignatureEncoding(#[from] base64::DecodeError),

    /// Verification ran and returned a negative result.
    #[error("credentials rejected by {0} strategy")]
    Denied(&'static str),

    /// The password backend failed or is not available.
    #[error("password authentication error: {0}")]
    Password(String),

    /// The signature could not be parsed or did not verify.
    #[error("ssh signature rejected: {0}")]
    Signature(String),

    /// The presented fingerprint is in neither known encoding.
    #[error("unrecognized key fingerprint {0:?}")]
    Fingerprint(String),

    #[error(transparent)]
    KeyCache(#[from] KeyCacheError),

    /// The streaming protocol was violated by the caller.
    #[error("{0}")]
    InvalidTransfer(String),

    /// The download source cannot be opened.
    #[error("failed to open file {path:?}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upload ended with a byte count different from the declared size.
    #[error("file size mismatch: expected {expected} bytes, received {received} bytes")]
    SizeMismatch { expected: i64, received: i64 },

    #[error("failed to receive file chunk: {0}")]
    StreamReceive(String),

    /// Local I/O failure on the server.
    #[error("failed to {context} {path:?}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl GatewayError {
    /// Build an [`GatewayError::Io`] with a short description of the failed step.
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a rejection of the caller's credentials, as
    /// opposed to a server-side fault.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::Denied(_)
                | Self::Password(_)
                | Self::Signature(_)
                | Self::Fingerprint(_)
                | Self::KeyCache(_)
        )
    }
}

impl From<GatewayError> for Status {
    fn from(err: GatewayError) -> Self {
        if err.is_denial() {
            return Status::permission_denied(DENIAL_MESSAGE);
        }
        match err {
            GatewayError::MissingUser => Status::unauthenticated(err.to_string()),
            GatewayError::UnknownUser(_) => Status::unauthenticated("user not authenticated"),
            GatewayError::InvalidTransfer(_) => Status::invalid_argument(err.to_string()),
            GatewayError::SourceUnavailable { .. } => Status::not_found(err.to_string()),
            GatewayError::SizeMismatch { .. } => Status::data_loss(err.to_string()),
            GatewayError::StreamReceive(_) => Status::unknown(err.to_string()),
            _ => Status::internal(err.to_string()),
        }
    }
}
