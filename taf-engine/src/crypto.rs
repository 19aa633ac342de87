//! Envelope signing and verification at the engine boundary.
//!
//! The engine calls [`Crypto::sign`] on every outbound envelope and
//! [`Crypto::verify`] on every inbound one; it never inspects the tag.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

use crate::config::CryptoConfig;
use crate::message::Envelope;
use crate::EngineError;

pub trait Crypto: Send + Sync + fmt::Debug {
    /// Fills the envelope's signature.
    ///
    /// # Errors
    /// Returns [`EngineError::Json`] if the payload cannot be canonicalized.
    fn sign(&self, envelope: &mut Envelope) -> Result<(), EngineError>;

    /// Whether the envelope's signature is valid.
    ///
    /// # Errors
    /// Returns [`EngineError::Json`] if the payload cannot be canonicalized.
    fn verify(&self, envelope: &Envelope) -> Result<bool, EngineError>;

    /// Certificate presented to evidence sources when subscribing.
    fn attestation_certificate(&self) -> &str {
        ""
    }
}

/// Used when crypto is disabled: signs nothing, accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCrypto;

impl Crypto for NoopCrypto {
    fn sign(&self, _envelope: &mut Envelope) -> Result<(), EngineError> {
        Ok(())
    }

    fn verify(&self, _envelope: &Envelope) -> Result<bool, EngineError> {
        Ok(true)
    }
}

/// SHA-256 integrity tag over the key reference and the canonical payload.
///
/// `serde_json` objects keep their keys sorted, so re-serializing a parsed
/// payload yields the same bytes that were tagged.
#[derive(Debug, Clone)]
pub struct DigestCrypto {
    key_ref: String,
}

impl DigestCrypto {
    #[must_use]
    pub fn new(key_ref: impl Into<String>) -> Self {
        Self { key_ref: key_ref.into() }
    }

    fn tag(&self, envelope: &Envelope) -> Result<String, EngineError> {
        let mut hasher = Sha256::new();
        hasher.update(self.key_ref.as_bytes());
        hasher.update(envelope.message_type.to_string().as_bytes());
        hasher.update(serde_json::to_vec(&envelope.message)?);
        Ok(STANDARD.encode(hasher.finalize()))
    }
}

impl Crypto for DigestCrypto {
    fn sign(&self, envelope: &mut Envelope) -> Result<(), EngineError> {
        envelope.signature = Some(self.tag(envelope)?);
        Ok(())
    }

    fn verify(&self, envelope: &Envelope) -> Result<bool, EngineError> {
        let Some(signature) = envelope.signature.as_deref() else {
            return Ok(false);
        };
        Ok(self.tag(envelope)? == signature)
    }

    fn attestation_certificate(&self) -> &str {
        &self.key_ref
    }
}

/// Picks the implementation the configuration asks for.
#[must_use]
pub fn from_config(config: &CryptoConfig) -> Box<dyn Crypto> {
    if config.enabled {
        Box::new(DigestCrypto::new(config.key_ref.clone()))
    } else {
        Box::new(NoopCrypto)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::MessageType;

    fn envelope() -> Envelope {
        Envelope {
            message_type: MessageType::TchNotify,
            sender: "tch".to_owned(),
            response_topic: None,
            request_id: None,
            signature: None,
            message: json!({ "b": 2, "a": 1 }),
        }
    }

    #[test]
    fn signed_envelope_verifies() {
        let crypto = DigestCrypto::new("key-1");
        let mut signed = envelope();
        if let Err(e) = crypto.sign(&mut signed) {
            panic!("sign failed: {e}");
        }
        assert!(signed.signature.is_some());
        assert!(matches!(crypto.verify(&signed), Ok(true)));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let crypto = DigestCrypto::new("key-1");
        let mut signed = envelope();
        if let Err(e) = crypto.sign(&mut signed) {
            panic!("sign failed: {e}");
        }
        signed.message = json!({ "a": 1, "b": 3 });
        assert!(matches!(crypto.verify(&signed), Ok(false)));
    }

    #[test]
    fn other_key_fails_verification() {
        let mut signed = envelope();
        if let Err(e) = DigestCrypto::new("key-1").sign(&mut signed) {
            panic!("sign failed: {e}");
        }
        assert!(matches!(DigestCrypto::new("key-2").verify(&signed), Ok(false)));
    }

    #[test]
    fn unsigned_envelope_is_rejected_only_when_enabled() {
        assert!(matches!(DigestCrypto::new("k").verify(&envelope()), Ok(false)));
        assert!(matches!(NoopCrypto.verify(&envelope()), Ok(true)));
    }

    #[test]
    fn config_selects_implementation() {
        let enabled = CryptoConfig { enabled: true, key_ref: "k".to_owned(), ignore_verification_results: false };
        assert_eq!(from_config(&enabled).attestation_certificate(), "k");
        assert_eq!(from_config(&CryptoConfig::default()).attestation_certificate(), "");
    }
}
