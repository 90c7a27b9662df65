//! Credentials carried in call metadata.

use std::fmt;

use tonic::metadata::MetadataMap;

use crate::gateway::error::GatewayError;

/// Metadata key naming the target user.
pub const USER_KEY: &str = "user";
/// Metadata key carrying a plaintext password.
pub const PASSWORD_KEY: &str = "password";
/// Metadata key carrying the base64 SSH signature over the user name.
pub const SIGNED_DATA_KEY: &str = "signed-data";
/// Metadata key carrying the fingerprint of the signing key.
pub const FINGERPRINT_KEY: &str = "pub-key-fingerprint";
/// Metadata key carrying the signing key algorithm.
pub const ALGORITHM_KEY: &str = "pub-key-algorithm";

/// Strategy selected for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Password,
    PublicKey,
    Whitelist,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::PublicKey => "public-key",
            Self::Whitelist => "whitelist",
        }
    }
}

/// Signed-challenge proof of key possession.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyProof {
    pub fingerprint: String,
    pub algorithm: String,
    /// Base64 SSH signature, still encoded.
    pub signed_data: String,
}

impl fmt::Debug for KeyProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProof")
            .field("fingerprint", &self.fingerprint)
            .field("algorithm", &self.algorithm)
            .field("signed_data", &"<redacted>")
            .finish()
    }
}

/// Authentication material of one call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: Option<String>,
    pub key_proof: Option<KeyProof>,
}

impl Credential {
    /// Extract the credential from call metadata.
    ///
    /// Missing, empty or non-ASCII values count as absent. The key proof is
    /// only present when all three of its fields are.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MissingUser`] when there is no `user` value.
    pub fn from_metadata(metadata: &MetadataMap) -> Result<Self, GatewayError> {
        let user = value(metadata, USER_KEY).ok_or(GatewayError::MissingUser)?;
        let password = value(metadata, PASSWORD_KEY);

        let key_proof = match (
            value(metadata, FINGERPRINT_KEY),
            value(metadata, ALGORITHM_KEY),
            value(metadata, SIGNED_DATA_KEY),
        ) {
            (Some(fingerprint), Some(algorithm), Some(signed_data)) => Some(KeyProof {
                fingerprint,
                algorithm,
                signed_data,
            }),
            _ => None,
        };

        Ok(Self {
            user,
            password,
            key_proof,
        })
    }

    /// The one strategy that judges this credential.
    ///
    /// A password wins over a key proof; with neither the caller's address
    /// decides.
    pub fn strategy_kind(&self) -> StrategyKind {
        if self.password.is_some() {
            StrategyKind::Password
        } else if self.key_proof.is_some() {
            StrategyKind::PublicKey
        } else {
            StrategyKind::Whitelist
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_proof", &self.key_proof)
            .finish()
    }
}

fn value(metadata: &MetadataMap, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Build metadata from key/value pairs.
    pub(crate) fn metadata(pairs: &[(&'static str, &str)]) -> MetadataMap {
        let mut map = MetadataMap::new();
        for (key, value) in pairs {
            map.insert(*key, value.parse().unwrap());
        }
        map
    }
}
