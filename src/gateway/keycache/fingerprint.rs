//! Public-key fingerprints in their two historical encodings.
//!
//! OpenSSH has printed key fingerprints in two forms:
//!
//! - **SHA-256** (current): `SHA256:` followed by unpadded base64.
//! - **MD5** (legacy): sixteen colon-separated hex pairs, optionally
//!   prefixed with `MD5:`.
//!
//! A [`Fingerprint`] records which form it is in. The two forms are never
//! compared with each other, so a key indexed by its SHA-256 fingerprint is
//! not found through its MD5 fingerprint.

use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use ssh_key::{HashAlg, PublicKey};

/// Encoding of a [`Fingerprint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FingerprintKind {
    #[default]
    Sha256,
    LegacyMd5,
}

impl FingerprintKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::LegacyMd5 => "md5",
        }
    }
}

impl FromStr for FingerprintKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "md5" | "legacy-md5" => Ok(Self::LegacyMd5),
            other => Err(format!("unknown fingerprint kind {other:?}")),
        }
    }
}

/// A key fingerprint tagged with its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    kind: FingerprintKind,
    value: String,
}

impl Fingerprint {
    /// Compute the fingerprint of `key` in the requested encoding.
    pub fn of(key: &PublicKey, kind: FingerprintKind) -> Result<Self, ssh_key::Error> {
        let value = match kind {
            FingerprintKind::Sha256 => key.fingerprint(HashAlg::Sha256).to_string(),
            FingerprintKind::LegacyMd5 => colon_hex(&Md5::digest(key.to_bytes()?)),
        };
        Ok(Self { kind, value })
    }

    pub fn kind(&self) -> FingerprintKind {
        self.kind
    }

    /// Canonical textual form.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    /// Parse a fingerprint presented by a client.
    ///
    /// SHA-256 values are kept verbatim (base64 is case sensitive); MD5 values
    /// are lowercased and stripped of the optional `MD5:` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(encoded) = s.strip_prefix("SHA256:") {
            if encoded.is_empty() || encoded.contains('=') {
                return Err(format!("malformed SHA256 fingerprint {s:?}"));
            }
            return Ok(Self {
                kind: FingerprintKind::Sha256,
                value: s.to_string(),
            });
        }

        let hex = s.strip_prefix("MD5:").unwrap_or(s);
        let pairs: Vec<&str> = hex.split(':').collect();
        let well_formed = pairs.len() == 16
            && pairs
                .iter()
                .all(|pair| pair.len() == 2 && pair.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return Err(format!("unrecognized fingerprint {s:?}"));
        }
        Ok(Self {
            kind: FingerprintKind::LegacyMd5,
            value: hex.to_ascii_lowercase(),
        })
    }
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
