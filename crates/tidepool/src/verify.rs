//! Persisted-payload integrity verification.
//!
//! The terminal `persisted` event carries the backend's durable record of a
//! streamed message plus an HMAC-SHA256 signature over the canonical
//! serialization of `(payload, nonce)`. Verifying it before finalizing
//! guards against a compromised or buggy transport injecting a forged
//! terminal state and silently rewriting message content post-hoc.
//!
//! Key provisioning is owned by the session/auth collaborator; this module
//! only applies the verification primitive.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use tidepool_protocol::Message;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during persisted-payload verification.
///
/// All variants reject finalization; the locally assembled message keeps
/// its last good state and stays visible.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The persisted nonce does not match the one announced earlier in the
    /// stream's `metadata` event.
    #[error("persisted nonce {got:?} does not match announced nonce {expected:?}")]
    NonceMismatch { expected: String, got: String },

    /// The signature could not be decoded or the MAC could not be computed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The computed MAC did not match the provided signature.
    #[error("persisted payload signature mismatch")]
    SignatureMismatch,
}

/// How strictly an announced nonce is held against the persisted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoncePolicy {
    /// An announced nonce must match the persisted nonce exactly. When no
    /// nonce was announced, the persisted nonce is accepted as-is.
    #[default]
    Strict,
    /// An announcement mismatch is logged and otherwise ignored.
    BestEffort,
}

/// Verifier configuration.
#[derive(Debug, Clone, Default)]
pub struct VerifierConfig {
    pub nonce_policy: NoncePolicy,
}

/// Verifies persisted payloads with a session-scoped MAC key.
#[derive(Clone)]
pub struct PersistenceVerifier {
    key: Vec<u8>,
    config: VerifierConfig,
}

impl PersistenceVerifier {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self::with_config(key, VerifierConfig::default())
    }

    pub fn with_config(key: impl Into<Vec<u8>>, config: VerifierConfig) -> Self {
        Self {
            key: key.into(),
            config,
        }
    }

    /// Verify a persisted payload against its nonce and signature.
    ///
    /// `announced` is the nonce observed in an earlier `metadata` event for
    /// this message, if any; the configured [`NoncePolicy`] decides how a
    /// mismatch is handled.
    pub fn verify(
        &self,
        payload: &Message,
        nonce: &str,
        signature_hex: &str,
        announced: Option<&str>,
    ) -> Result<(), VerifyError> {
        if let Some(expected) = announced {
            if expected != nonce {
                match self.config.nonce_policy {
                    NoncePolicy::Strict => {
                        return Err(VerifyError::NonceMismatch {
                            expected: expected.to_string(),
                            got: nonce.to_string(),
                        });
                    }
                    NoncePolicy::BestEffort => {
                        tracing::warn!(
                            "Persisted nonce {:?} differs from announced {:?}, accepting (best-effort policy)",
                            nonce,
                            expected
                        );
                    }
                }
            }
        }

        let provided = hex::decode(signature_hex)
            .map_err(|e| VerifyError::InvalidSignature(format!("not valid hex: {e}")))?;

        let computed = self.mac(payload, nonce)?;

        // Constant-time comparison
        if computed.as_slice().ct_eq(&provided).unwrap_u8() != 1 {
            return Err(VerifyError::SignatureMismatch);
        }

        Ok(())
    }

    /// The signing half of the MAC contract, normally exercised by the
    /// backend. Exposed for test doubles and fixtures; returns the hex
    /// signature for `(payload, nonce)`.
    pub fn sign(&self, payload: &Message, nonce: &str) -> Result<String, VerifyError> {
        Ok(hex::encode(self.mac(payload, nonce)?))
    }

    fn mac(&self, payload: &Message, nonce: &str) -> Result<Vec<u8>, VerifyError> {
        let body = signing_input(payload, nonce)?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| VerifyError::InvalidSignature(format!("MAC init failed: {e}")))?;
        mac.update(&body);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Canonical byte form of `(payload, nonce)` that the MAC covers.
///
/// `serde_json`'s object map is sorted-key (BTreeMap-backed), so routing
/// the payload through `Value` yields one deterministic serialization on
/// both sides of the contract.
fn signing_input(payload: &Message, nonce: &str) -> Result<Vec<u8>, VerifyError> {
    serde_json::to_vec(&serde_json::json!({
        "nonce": nonce,
        "payload": payload,
    }))
    .map_err(|e| VerifyError::InvalidSignature(format!("payload not canonicalizable: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Message {
        let mut m = Message::provisional("msg-1", "conv-1", 5, 1738764000000);
        m.content = "The persisted answer.".to_string();
        m.is_final = true;
        m
    }

    #[test]
    fn test_sign_then_verify() {
        let verifier = PersistenceVerifier::new(b"session-key".as_slice());
        let msg = payload();
        let sig = verifier.sign(&msg, "n-1").unwrap();
        assert!(verifier.verify(&msg, "n-1", &sig, None).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let verifier = PersistenceVerifier::new(b"session-key".as_slice());
        let msg = payload();
        let sig = verifier.sign(&msg, "n-1").unwrap();

        let mut tampered = msg;
        tampered.content = "A different answer.".to_string();
        let err = verifier.verify(&tampered, "n-1", &sig, None).unwrap_err();
        assert!(matches!(err, VerifyError::SignatureMismatch));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let signer = PersistenceVerifier::new(b"backend-key".as_slice());
        let verifier = PersistenceVerifier::new(b"other-key".as_slice());
        let msg = payload();
        let sig = signer.sign(&msg, "n-1").unwrap();
        assert!(matches!(
            verifier.verify(&msg, "n-1", &sig, None).unwrap_err(),
            VerifyError::SignatureMismatch
        ));
    }

    #[test]
    fn test_signature_covers_the_nonce() {
        let verifier = PersistenceVerifier::new(b"session-key".as_slice());
        let msg = payload();
        let sig = verifier.sign(&msg, "n-1").unwrap();
        // Same payload, different nonce: MAC input changes.
        assert!(matches!(
            verifier.verify(&msg, "n-2", &sig, None).unwrap_err(),
            VerifyError::SignatureMismatch
        ));
    }

    #[test]
    fn test_announced_nonce_mismatch_strict() {
        let verifier = PersistenceVerifier::new(b"session-key".as_slice());
        let msg = payload();
        let sig = verifier.sign(&msg, "n-2").unwrap();
        let err = verifier.verify(&msg, "n-2", &sig, Some("n-1")).unwrap_err();
        match err {
            VerifyError::NonceMismatch { expected, got } => {
                assert_eq!(expected, "n-1");
                assert_eq!(got, "n-2");
            }
            other => panic!("expected nonce mismatch, got {other}"),
        }
    }

    #[test]
    fn test_announced_nonce_mismatch_best_effort() {
        let verifier = PersistenceVerifier::with_config(
            b"session-key".as_slice(),
            VerifierConfig {
                nonce_policy: NoncePolicy::BestEffort,
            },
        );
        let msg = payload();
        let sig = verifier.sign(&msg, "n-2").unwrap();
        assert!(verifier.verify(&msg, "n-2", &sig, Some("n-1")).is_ok());
    }

    #[test]
    fn test_matching_announced_nonce_is_accepted() {
        let verifier = PersistenceVerifier::new(b"session-key".as_slice());
        let msg = payload();
        let sig = verifier.sign(&msg, "n-1").unwrap();
        assert!(verifier.verify(&msg, "n-1", &sig, Some("n-1")).is_ok());
    }

    #[test]
    fn test_non_hex_signature_is_invalid() {
        let verifier = PersistenceVerifier::new(b"session-key".as_slice());
        let err = verifier
            .verify(&payload(), "n-1", "zz-not-hex", None)
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignature(_)));
    }
}
