//! Parsed contents of one authorized-keys file.

use std::collections::HashMap;

use ssh_key::{AuthorizedKeys, PublicKey};

use super::fingerprint::{Fingerprint, FingerprintKind};

/// Fingerprint-indexed public keys of a single authorized-keys file.
///
/// A set is immutable once built. Reloading a file builds a new set and swaps
/// it in whole, so readers always see either the old or the new contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKeySet {
    kind: FingerprintKind,
    keys: HashMap<Fingerprint, PublicKey>,
}

impl AuthorizedKeySet {
    /// Parse every entry of an authorized-keys file.
    ///
    /// Blank lines and `#` comments are skipped and option prefixes are
    /// accepted. A single malformed entry fails the whole file.
    pub fn parse(content: &str, kind: FingerprintKind) -> Result<Self, ssh_key::Error> {
        let mut keys = HashMap::new();
        for entry in AuthorizedKeys::new(content) {
            let entry = entry?;
            let key = entry.public_key().clone();
            keys.insert(Fingerprint::of(&key, kind)?, key);
        }
        Ok(Self { kind, keys })
    }

    /// Find the key with the given fingerprint.
    ///
    /// A fingerprint in a different encoding than the one this set was
    /// indexed with never matches.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&PublicKey> {
        if fingerprint.kind() != self.kind {
            return None;
        }
        self.keys.get(fingerprint)
    }

    pub fn kind(&self) -> FingerprintKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
