//! Public-key signature authentication.
//!
//! The caller proves possession of a private key by signing its own user
//! name. The challenge is static, so a captured signature can be replayed for
//! that user; transport encryption is expected to keep it private.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::Sha1;
use ssh_key::public::KeyData;
use ssh_key::{PublicKey, Signature};
use tracing::debug;

use crate::gateway::error::GatewayError;
use crate::gateway::keycache::{Fingerprint, KeyCache};

use super::traits::{AuthRequest, AuthStrategy};

/// Public-key authentication strategy backed by the [`KeyCache`].
pub struct PublicKeyAuth {
    cache: Arc<KeyCache>,
}

impl PublicKeyAuth {
    pub fn new(cache: Arc<KeyCache>) -> Self {
        Self { cache }
    }
}

/// Algorithm name of RSA signatures with SHA-1.
const LEGACY_RSA: &[u8] = b"ssh-rsa";

/// Check an SSH wire-format signature over `message`.
///
/// Besides the algorithms `ssh-key` verifies, legacy `ssh-rsa` (SHA-1)
/// signatures are accepted, as older clients still produce them.
///
/// # Errors
///
/// Returns [`GatewayError::Signature`] if the blob is not a well-formed
/// signature or does not verify.
pub fn verify_signature(key: &PublicKey, message: &[u8], wire: &[u8]) -> Result<(), GatewayError> {
    let mut input = wire;
    if read_string(&mut input) == Some(LEGACY_RSA) {
        return verify_legacy_rsa(key, message, input);
    }

    let signature =
        Signature::try_from(wire).map_err(|e| GatewayError::Signature(e.to_string()))?;
    signature::Verifier::verify(key, message, &signature)
        .map_err(|e| GatewayError::Signature(e.to_string()))
}

/// Verify the remainder of an `ssh-rsa` signature, i.e. its blob.
fn verify_legacy_rsa(key: &PublicKey, message: &[u8], mut rest: &[u8]) -> Result<(), GatewayError> {
    let blob = read_string(&mut rest)
        .filter(|_| rest.is_empty())
        .ok_or_else(|| GatewayError::Signature("malformed ssh-rsa signature".into()))?;
    let KeyData::Rsa(public) = key.key_data() else {
        return Err(GatewayError::Signature(format!(
            "ssh-rsa signature for a {} key",
            key.algorithm()
        )));
    };

    let verifying = rsa::pkcs1v15::VerifyingKey::<Sha1>::try_from(public)
        .map_err(|e| GatewayError::Signature(e.to_string()))?;
    let signature = rsa::pkcs1v15::Signature::try_from(blob)
        .map_err(|e| GatewayError::Signature(e.to_string()))?;
    signature::Verifier::verify(&verifying, message, &signature)
        .map_err(|e| GatewayError::Signature(e.to_string()))
}

/// Read one length-prefixed SSH string off the front of `input`.
fn read_string<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    if input.len() < 4 {
        return None;
    }
    let (len, rest) = input.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    *input = rest;
    Some(value)
}

#[async_trait]
impl AuthStrategy for PublicKeyAuth {
    async fn authenticate(&self, request: &AuthRequest<'_>) -> Result<bool, GatewayError> {
        let Some(proof) = &request.credential.key_proof else {
            return Ok(false);
        };

        let wire = STANDARD.decode(proof.signed_data.as_bytes())?;
        let fingerprint: Fingerprint = proof
            .fingerprint
            .parse()
            .map_err(GatewayError::Fingerprint)?;
        debug!(
            "Verifying {} signature of {} with key {}",
            proof.algorithm, request.identity.username, fingerprint
        );

        let source = self.cache.source_for(request.identity);
        let key = self.cache.lookup(&source, &fingerprint).await?;
        verify_signature(&key, request.identity.username.as_bytes(), &wire)?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "public-key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::auth::credential::{Credential, KeyProof};
    use crate::gateway::identity::ResolvedIdentity;
    use crate::gateway::keycache::testing::TestKey;
    use crate::gateway::keycache::{FingerprintKind, KeyCacheConfig};
    use std::time::Duration;

    struct Fixture {
        _home: tempfile::TempDir,
        identity: ResolvedIdentity,
        cache: Arc<KeyCache>,
    }

    /// 2048-bit RSA key and its `ssh-rsa` (SHA-1) signature over "alice",
    /// as produced by OpenSSH-era clients.
    const RSA_AUTHORIZED: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQDMyb5oWfLzInPBKVdv55VD1twNQUotzWTnhZ0iIrj41jIeifzhJfe2BiqeN6B9VV29Lv4EkB/AlaRgoWKby1NbQdC8Cpk8fTSSYW8aL/2If7Upy65HbUDQWkzLvSN3unmk1ZIZTtoHquLy06/4YAJZoOgm17vZzCPz6BOht33JoxWauXEpvqQO7fR2Hdi16oRHsPS9+7XG9CHVVXxGQi08sif40q3di6KTCddX16Wv6YzQ6Yh4MiwVV+QTWb/Xcpx77raXL+Vx8JLUrUIJHo5iuAWliXQJfmwS7l/GSNCk4MW86ovedvE//3Fw7VNsw0zyUO8AVXsPK5aUvJxgnrAp alice@legacy";
    const RSA_FINGERPRINT: &str = "SHA256:zIUSc0OWshYaizPLsw0OaQIcyJilMf3kkEWruXAVE5I";
    const RSA_SIGNED_ALICE: &str = "AAAAB3NzaC1yc2EAAAEAtJyVe6mqdHRQmzsTm4FAwvcDZpGACGWHKwZHpYfdaCdU1uZs5Op0n/MyWCCNeWyvM8T5T6jA5plQdpACKa/O8wGuwuT1UK690MJtdq8nu7HFA5O9UeES3gOOLb9mmRZUx1aP940zPJZLorlPEDylLxWIVkKlEnMRdb3Evggx3lk/rZCTRmd3Luau0koyy0elwuZ3uK5qNqBVsu0mGCNFRRsZ6iWnuM7t4u3grntPQgXTT+s76o/PXhdDCnf5t3n1qkTtL54FOgDGATdBMnTn2/ZyjzGJjWPMZb79/nRXRTIj5NxznRZCQhvtytw2ToearDc7WydJjiXgtqejOF+6Ug==";

    async fn fixture(authorized: &[&TestKey]) -> Fixture {
        let lines: Vec<String> = authorized.iter().map(|k| k.authorized_line()).collect();
        fixture_with_lines(&lines).await
    }

    async fn fixture_with_lines(lines: &[String]) -> Fixture {
        let home = tempfile::tempdir().unwrap();
        let ssh = home.path().join(".ssh");
        std::fs::create_dir(&ssh).unwrap();
        std::fs::write(ssh.join("authorized_keys"), lines.join("\n")).unwrap();

        let identity = ResolvedIdentity {
            username: "alice".into(),
            uid: 1001,
            gid: 1001,
            home: home.path().to_path_buf(),
        };
        let cache = KeyCache::start(KeyCacheConfig {
            fixed_path: None,
            fingerprint_kind: FingerprintKind::Sha256,
            debounce: Duration::from_millis(50),
        })
        .await
        .unwrap();
        Fixture {
            _home: home,
            identity,
            cache,
        }
    }

    fn proof(fingerprint: &str, signed: &[u8]) -> Credential {
        Credential {
            user: "alice".into(),
            password: None,
            key_proof: Some(KeyProof {
                fingerprint: fingerprint.into(),
                algorithm: "ssh-ed25519".into(),
                signed_data: STANDARD.encode(signed),
            }),
        }
    }

    async fn run(fixture: &Fixture, credential: &Credential) -> Result<bool, GatewayError> {
        let request = AuthRequest {
            credential,
            identity: &fixture.identity,
            peer: "127.0.0.1:5000".parse().unwrap(),
        };
        PublicKeyAuth::new(Arc::clone(&fixture.cache))
            .authenticate(&request)
            .await
    }

    #[tokio::test]
    async fn test_valid_signature_over_username() {
        let key = TestKey::from_seed(40);
        let fixture = fixture(&[&key]).await;
        let credential = proof(
            key.fingerprint(FingerprintKind::Sha256).as_str(),
            &key.sign_wire(b"alice"),
        );
        assert!(run(&fixture, &credential).await.unwrap());
        fixture.cache.close().await;
    }

    #[tokio::test]
    async fn test_signature_over_other_message_is_rejected() {
        let key = TestKey::from_seed(41);
        let fixture = fixture(&[&key]).await;
        let credential = proof(
            key.fingerprint(FingerprintKind::Sha256).as_str(),
            &key.sign_wire(b"mallory"),
        );
        let err = run(&fixture, &credential).await.unwrap_err();
        assert!(matches!(err, GatewayError::Signature(_)));
        fixture.cache.close().await;
    }

    #[tokio::test]
    async fn test_signature_by_other_key_is_rejected() {
        let listed = TestKey::from_seed(42);
        let intruder = TestKey::from_seed(43);
        let fixture = fixture(&[&listed]).await;
        let credential = proof(
            listed.fingerprint(FingerprintKind::Sha256).as_str(),
            &intruder.sign_wire(b"alice"),
        );
        assert!(run(&fixture, &credential).await.unwrap_err().is_denial());
        fixture.cache.close().await;
    }

    #[tokio::test]
    async fn test_unlisted_fingerprint_is_denied() {
        let listed = TestKey::from_seed(44);
        let unlisted = TestKey::from_seed(45);
        let fixture = fixture(&[&listed]).await;
        let credential = proof(
            unlisted.fingerprint(FingerprintKind::Sha256).as_str(),
            &unlisted.sign_wire(b"alice"),
        );
        let err = run(&fixture, &credential).await.unwrap_err();
        assert!(matches!(err, GatewayError::KeyCache(_)));
        assert!(err.is_denial());
        fixture.cache.close().await;
    }

    #[tokio::test]
    async fn test_md5_fingerprint_misses_sha256_cache() {
        let key = TestKey::from_seed(46);
        let fixture = fixture(&[&key]).await;
        let credential = proof(
            key.fingerprint(FingerprintKind::LegacyMd5).as_str(),
            &key.sign_wire(b"alice"),
        );
        assert!(run(&fixture, &credential).await.unwrap_err().is_denial());
        fixture.cache.close().await;
    }

    #[tokio::test]
    async fn test_bad_base64_is_not_a_denial() {
        let key = TestKey::from_seed(47);
        let fixture = fixture(&[&key]).await;
        let mut credential = proof(key.fingerprint(FingerprintKind::Sha256).as_str(), b"");
        if let Some(proof) = credential.key_proof.as_mut() {
            proof.signed_data = "not base64!".into();
        }
        let err = run(&fixture, &credential).await.unwrap_err();
        assert!(matches!(err, GatewayError::SignatureEncoding(_)));
        assert!(!err.is_denial());
        fixture.cache.close().await;
    }

    #[tokio::test]
    async fn test_garbage_fingerprint_is_denied() {
        let key = TestKey::from_seed(48);
        let fixture = fixture(&[&key]).await;
        let credential = proof("nonsense", &key.sign_wire(b"alice"));
        let err = run(&fixture, &credential).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fingerprint(_)));
        fixture.cache.close().await;
    }

    #[test]
    fn test_truncated_signature_blob() {
        let key = TestKey::from_seed(49);
        let wire = key.sign_wire(b"alice");
        let err = verify_signature(key.public(), b"alice", &wire[..wire.len() / 2]).unwrap_err();
        assert!(matches!(err, GatewayError::Signature(_)));
    }

    #[tokio::test]
    async fn test_legacy_rsa_signature_over_username() {
        let fixture = fixture_with_lines(&[RSA_AUTHORIZED.to_string()]).await;
        let credential = Credential {
            user: "alice".into(),
            password: None,
            key_proof: Some(KeyProof {
                fingerprint: RSA_FINGERPRINT.into(),
                algorithm: "ssh-rsa".into(),
                signed_data: RSA_SIGNED_ALICE.into(),
            }),
        };
        assert!(run(&fixture, &credential).await.unwrap());
        fixture.cache.close().await;
    }

    #[test]
    fn test_legacy_rsa_signature_over_other_message_is_rejected() {
        let key = PublicKey::from_openssh(RSA_AUTHORIZED).unwrap();
        let wire = STANDARD.decode(RSA_SIGNED_ALICE).unwrap();
        verify_signature(&key, b"alice", &wire).unwrap();
        let err = verify_signature(&key, b"mallory", &wire).unwrap_err();
        assert!(matches!(err, GatewayError::Signature(_)));
    }

    #[test]
    fn test_legacy_rsa_signature_needs_rsa_key() {
        let key = TestKey::from_seed(50);
        let wire = STANDARD.decode(RSA_SIGNED_ALICE).unwrap();
        let err = verify_signature(key.public(), b"alice", &wire).unwrap_err();
        assert!(matches!(err, GatewayError::Signature(_)));
    }

    #[test]
    fn test_legacy_rsa_trailing_bytes_are_rejected() {
        let key = PublicKey::from_openssh(RSA_AUTHORIZED).unwrap();
        let mut wire = STANDARD.decode(RSA_SIGNED_ALICE).unwrap();
        wire.push(0);
        assert!(verify_signature(&key, b"alice", &wire).is_err());
    }
}
