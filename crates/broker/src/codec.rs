//! Envelope ⇄ log record conversion.

use ironvault_types::{Envelope, config::BrokerConfig, is_delete_record, parse_key};
use snafu::{ResultExt, ensure};

use crate::{
    crypto::{ENCRYPTION_ALGORITHM, PayloadCipher, RecordSigner, SignedHeader, VerifierSet, encryption_disabled},
    error::{CryptoSnafu, EnvelopeSnafu, KeyMaterialSnafu, Result, SignatureSnafu},
    log::LogRecord,
};

/// Header carrying the ed25519 signature.
pub const SIGNATURE_HEADER: &str = "signature";
/// Header carrying the payload encryption algorithm.
pub const ENCRYPTION_HEADER: &str = "encryption";
/// Header confirming a deletion. Only an empty value deletes.
pub const DELETED_HEADER: &str = "deleted";

/// Headers covered by the record signature: all but the signature itself, in name order.
fn signed_headers(record: &LogRecord) -> Vec<SignedHeader<'_>> {
    record
        .headers
        .iter()
        .filter(|(name, _)| name.as_str() != SIGNATURE_HEADER)
        .map(|(name, value)| (name.as_str(), value.as_slice()))
        .collect()
}

/// Turns envelopes into signed, optionally encrypted records.
#[derive(Debug, Clone)]
pub struct MessageEncoder {
    signer: RecordSigner,
    cipher: Option<PayloadCipher>,
}

impl MessageEncoder {
    /// Creates an encoder. Without a cipher payloads travel in the clear.
    #[must_use]
    pub fn new(signer: RecordSigner, cipher: Option<PayloadCipher>) -> Self {
        Self { signer, cipher }
    }

    /// Builds an encoder from instance key material.
    ///
    /// Encryption is on unless the debug environment toggle disables it.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let seed = config
            .signing_key_bytes()
            .map_err(|e| KeyMaterialSnafu { message: e.to_string() }.build())?;
        let cipher = if encryption_disabled() {
            tracing::warn!("payload encryption disabled by debug toggle");
            None
        } else {
            let key = config
                .encryption_key_bytes()
                .map_err(|e| KeyMaterialSnafu { message: e.to_string() }.build())?;
            Some(PayloadCipher::new(key))
        };
        Ok(Self::new(RecordSigner::from_bytes(&seed), cipher))
    }

    /// Returns this encoder with encryption turned off.
    #[must_use]
    pub fn unencrypted(mut self) -> Self {
        self.cipher = None;
        self
    }

    /// Public key of the signer.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signer.public_key()
    }

    /// Whether payloads are encrypted.
    #[must_use]
    pub fn encrypts(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encodes `envelope` for publication on `topic`.
    pub fn encode(&self, topic: &str, envelope: &Envelope) -> Result<LogRecord> {
        let key = envelope.key();
        let deleted = envelope.is_delete();

        let (value, encrypted) = match &self.cipher {
            _ if deleted => (Vec::new(), false),
            Some(cipher) => (cipher.seal(topic, &envelope.data)?, true),
            None => (envelope.data.clone(), false),
        };

        let mut record = LogRecord::new(key, value);
        if encrypted {
            record = record.with_header(ENCRYPTION_HEADER, ENCRYPTION_ALGORITHM);
        }
        if deleted {
            record = record.with_header(DELETED_HEADER, "true");
        }
        let signature = self.signer.sign(&record.key, &record.value, &signed_headers(&record));
        Ok(record.with_header(SIGNATURE_HEADER, signature))
    }
}

/// Verifies, decrypts and parses incoming records.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    verifiers: VerifierSet,
    cipher: Option<PayloadCipher>,
}

impl MessageDecoder {
    /// Creates a decoder trusting `verifiers`. The cipher opens encrypted payloads.
    #[must_use]
    pub fn new(verifiers: VerifierSet, cipher: Option<PayloadCipher>) -> Self {
        Self { verifiers, cipher }
    }

    /// Checks the signature of `record` without decoding it.
    pub fn verify(&self, topic: &str, record: &LogRecord) -> Result<()> {
        let signature = record.header(SIGNATURE_HEADER).ok_or_else(|| {
            SignatureSnafu { topic, key: &record.key, message: "missing signature header" }.build()
        })?;
        ensure!(
            self.verifiers.verify(&record.key, &record.value, &signed_headers(record), signature),
            SignatureSnafu {
                topic,
                key: &record.key,
                message: "signature does not match any trusted key",
            }
        );
        Ok(())
    }

    /// Decodes a record read from `topic`.
    ///
    /// The signature is checked before anything else. A record with an empty
    /// value yields a tombstone whether or not it carries the `deleted`
    /// header; the header on a non-empty value is rejected.
    pub fn decode(&self, topic: &str, record: &LogRecord) -> Result<Envelope> {
        self.verify(topic, record)?;
        let (object_type, id) = parse_key(&record.key).context(EnvelopeSnafu { topic })?;

        let deleted_flag = record.header(DELETED_HEADER).is_some_and(|v| v == b"true");
        if is_delete_record(&record.key, &record.value, deleted_flag).context(EnvelopeSnafu { topic })? {
            return Ok(Envelope::tombstone(object_type, id));
        }

        let data = match record.header(ENCRYPTION_HEADER) {
            None => record.value.clone(),
            Some(algorithm) => {
                ensure!(
                    algorithm == ENCRYPTION_ALGORITHM.as_bytes(),
                    CryptoSnafu {
                        topic,
                        message: format!(
                            "unsupported encryption {:?}",
                            String::from_utf8_lossy(algorithm)
                        ),
                    }
                );
                let cipher = self.cipher.as_ref().ok_or_else(|| {
                    CryptoSnafu { topic, message: "encrypted payload but no decryption key" }.build()
                })?;
                cipher.open(topic, &record.value)?
            },
        };
        Ok(Envelope::upsert(object_type, id, data))
    }
}
