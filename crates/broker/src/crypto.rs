//! Record signing and payload encryption.
//!
//! Every record is signed with the publishing instance's ed25519 key over its
//! key, its transmitted value and every header except the signature itself. Payloads are sealed with AES-256-GCM under a
//! per-topic key derived from the instance encryption key with HKDF-SHA256.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;
use snafu::ensure;

use crate::error::{CryptoSnafu, KeyMaterialSnafu, Result};

/// Environment variable that turns payload encryption off. Debug only.
pub const DISABLE_ENCRYPTION_ENV: &str = "IRONVAULT_DEBUG_DISABLE_ENCRYPTION";

/// Algorithm tag written to the `encryption` header.
pub const ENCRYPTION_ALGORITHM: &str = "aes-256-gcm";

const NONCE_LEN: usize = 12;

/// Whether payload encryption is disabled through [`DISABLE_ENCRYPTION_ENV`].
#[must_use]
pub fn encryption_disabled() -> bool {
    std::env::var(DISABLE_ENCRYPTION_ENV).is_ok_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

/// A header name and value covered by a record signature.
pub type SignedHeader<'a> = (&'a str, &'a [u8]);

fn signed_bytes(key: &str, value: &[u8], headers: &[SignedHeader<'_>]) -> Vec<u8> {
    let headers_len: usize = headers.iter().map(|(name, header)| 8 + name.len() + header.len()).sum();
    let mut bytes = Vec::with_capacity(8 + key.len() + value.len() + headers_len);
    push_field(&mut bytes, key.as_bytes());
    push_field(&mut bytes, value);
    for (name, header) in headers {
        push_field(&mut bytes, name.as_bytes());
        push_field(&mut bytes, header);
    }
    bytes
}

fn push_field(bytes: &mut Vec<u8>, field: &[u8]) {
    let len = u32::try_from(field.len()).unwrap_or(u32::MAX);
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(field);
}

/// Signs outgoing records.
#[derive(Clone)]
pub struct RecordSigner {
    key: SigningKey,
}

impl RecordSigner {
    /// Creates a signer from a 32-byte ed25519 seed.
    #[must_use]
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(seed) }
    }

    /// Creates a signer with a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_bytes(&rand::random::<[u8; 32]>())
    }

    /// The 32-byte public key peers verify against.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Signs `key` together with `value` and `headers`.
    #[must_use]
    pub fn sign(&self, key: &str, value: &[u8], headers: &[SignedHeader<'_>]) -> Vec<u8> {
        self.key.sign(&signed_bytes(key, value, headers)).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for RecordSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSigner").field("public_key", &self.public_key()).finish()
    }
}

/// The set of public keys a topic trusts.
#[derive(Debug, Clone, Default)]
pub struct VerifierSet {
    keys: Vec<VerifyingKey>,
}

impl VerifierSet {
    /// Builds a set from raw 32-byte public keys.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::KeyMaterial`](crate::BrokerError::KeyMaterial) if a key is
    /// not a valid curve point.
    pub fn new(keys: impl IntoIterator<Item = [u8; 32]>) -> Result<Self> {
        let keys = keys
            .into_iter()
            .map(|bytes| {
                VerifyingKey::from_bytes(&bytes).map_err(|e| {
                    KeyMaterialSnafu { message: format!("invalid ed25519 public key: {e}") }.build()
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { keys })
    }

    /// Number of trusted keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is trusted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether any trusted key produced `signature` over `key`, `value` and `headers`.
    #[must_use]
    pub fn verify(&self, key: &str, value: &[u8], headers: &[SignedHeader<'_>], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        let message = signed_bytes(key, value, headers);
        self.keys.iter().any(|trusted| trusted.verify(&message, &signature).is_ok())
    }
}

/// Seals and opens payloads with per-topic keys.
#[derive(Clone)]
pub struct PayloadCipher {
    master: [u8; 32],
}

impl PayloadCipher {
    /// Creates a cipher from the 32-byte instance encryption key.
    #[must_use]
    pub fn new(master: [u8; 32]) -> Self {
        Self { master }
    }

    fn topic_cipher(&self, topic: &str) -> Result<Aes256Gcm> {
        let mut key = [0_u8; 32];
        Hkdf::<Sha256>::new(None, &self.master).expand(topic.as_bytes(), &mut key).map_err(|e| {
            CryptoSnafu { topic, message: format!("key derivation failed: {e}") }.build()
        })?;
        Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoSnafu { topic, message: format!("invalid derived key: {e}") }.build())
    }

    /// Encrypts `plaintext` for `topic`. Output is `nonce || ciphertext`.
    pub fn seal(&self, topic: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.topic_cipher(topic)?;
        let nonce = rand::random::<[u8; NONCE_LEN]>();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoSnafu { topic, message: "encryption failed" }.build())?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a payload produced by [`seal`](Self::seal) for the same topic.
    pub fn open(&self, topic: &str, sealed: &[u8]) -> Result<Vec<u8>> {
        ensure!(
            sealed.len() > NONCE_LEN,
            CryptoSnafu { topic, message: format!("sealed payload too short: {} bytes", sealed.len()) }
        );
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.topic_cipher(topic)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoSnafu { topic, message: "authentication failed" }.build())
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadCipher(..)")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_verifies_with_matching_key() {
        let signer = RecordSigner::generate();
        let verifiers = VerifierSet::new([signer.public_key()]).expect("valid key");
        let signature = signer.sign("user/u1", b"payload", &[]);
        assert!(verifiers.verify("user/u1", b"payload", &[], &signature));
    }

    #[test]
    fn test_signature_covers_key_and_value() {
        let signer = RecordSigner::generate();
        let verifiers = VerifierSet::new([signer.public_key()]).expect("valid key");
        let signature = signer.sign("user/u1", b"payload", &[]);
        assert!(!verifiers.verify("user/u2", b"payload", &[], &signature));
        assert!(!verifiers.verify("user/u1", b"payloae", &[], &signature));
    }

    #[test]
    fn test_signature_covers_headers() {
        let signer = RecordSigner::generate();
        let verifiers = VerifierSet::new([signer.public_key()]).expect("valid key");
        let signature = signer.sign("user/u1", b"payload", &[("encryption", &b"aes-256-gcm"[..])]);
        assert!(verifiers.verify("user/u1", b"payload", &[("encryption", &b"aes-256-gcm"[..])], &signature));
        assert!(!verifiers.verify("user/u1", b"payload", &[], &signature));
        assert!(!verifiers.verify(
            "user/u1",
            b"payload",
            &[("deleted", &b"true"[..]), ("encryption", &b"aes-256-gcm"[..])],
            &signature
        ));
    }

    #[test]
    fn test_key_value_boundary_is_unambiguous() {
        let signer = RecordSigner::generate();
        let verifiers = VerifierSet::new([signer.public_key()]).expect("valid key");
        let signature = signer.sign("ab", b"c", &[]);
        assert!(!verifiers.verify("a", b"bc", &[], &signature));
    }

    #[test]
    fn test_any_trusted_key_is_accepted() {
        let root = RecordSigner::generate();
        let peer = RecordSigner::generate();
        let stranger = RecordSigner::generate();
        let verifiers = VerifierSet::new([root.public_key(), peer.public_key()]).expect("valid keys");

        assert!(verifiers.verify("k/1", b"v", &[], &peer.sign("k/1", b"v", &[])));
        assert!(!verifiers.verify("k/1", b"v", &[], &stranger.sign("k/1", b"v", &[])));
        assert!(!verifiers.verify("k/1", b"v", &[], b"short"));
    }

    #[test]
    fn test_empty_verifier_set_rejects_everything() {
        let signer = RecordSigner::generate();
        let verifiers = VerifierSet::default();
        assert!(verifiers.is_empty());
        assert!(!verifiers.verify("k/1", b"v", &[], &signer.sign("k/1", b"v", &[])));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = PayloadCipher::new([7; 32]);
        let sealed = cipher.seal("root", b"secret").expect("seal");
        assert_ne!(&sealed[NONCE_LEN..], b"secret");
        assert_eq!(cipher.open("root", &sealed).expect("open"), b"secret");
    }

    #[test]
    fn test_topic_keys_are_distinct() {
        let cipher = PayloadCipher::new([7; 32]);
        let sealed = cipher.seal("root", b"secret").expect("seal");
        assert!(cipher.open("self", &sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let cipher = PayloadCipher::new([7; 32]);
        let mut sealed = cipher.seal("root", b"secret").expect("seal");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(cipher.open("root", &sealed).is_err());
        assert!(cipher.open("root", &sealed[..4]).is_err());
    }

    #[test]
    fn test_signer_is_deterministic_for_seed() {
        let a = RecordSigner::from_bytes(&[3; 32]);
        let b = RecordSigner::from_bytes(&[3; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign("k/1", b"v", &[]), b.sign("k/1", b"v", &[]));
    }
}
