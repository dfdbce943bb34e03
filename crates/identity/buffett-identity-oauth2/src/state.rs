//! Stateless, HMAC-signed OAuth2 `state` tokens.
//!
//! A token is `b64url(header).b64url(payload).b64url(hmac_sha256)`, where the
//! signature covers the first two encoded segments. Nothing is stored on the
//! server: the signature and the embedded issue timestamp are the whole
//! validity check, and the PKCE verifier rides inside the payload so it
//! survives the redirect round trip.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, crypto};
use rand::{RngCore, thread_rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default maximum age of a state token, in seconds.
pub const DEFAULT_STATE_TTL_SECONDS: u64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state token must have exactly three segments")]
    Malformed,

    #[error("state signature does not match")]
    BadSignature,

    #[error("state payload could not be decoded")]
    InvalidPayload,

    #[error("state expired ({age}s old, max {max_age}s)")]
    Expired { age: i64, max_age: u64 },

    #[error("failed to sign state: {0}")]
    Signing(String),
}

// Field order is the sorted key order; the encoded JSON must stay stable.
#[derive(Debug, Serialize)]
struct StateHeader {
    alg: &'static str,
    typ: &'static str,
}

const HEADER: StateHeader = StateHeader {
    alg: "HS256",
    typ: "STATE",
};

/// Payload carried inside the signed state.
///
/// Fields are declared alphabetically so the compact JSON encoding matches a
/// sorted-key serializer byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Application tag, e.g. `buffett-analyzer`.
    pub app: String,
    /// Random per-request value.
    pub nonce: String,
    /// PKCE code verifier, when the flow uses PKCE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce: Option<String>,
    /// Issue time, seconds since the Unix epoch.
    pub ts: i64,
}

impl StatePayload {
    /// Build a payload issued at `now` with a fresh 12-byte nonce.
    pub fn new(app: impl Into<String>, pkce: Option<String>, now: i64) -> Self {
        let mut nonce = [0u8; 12];
        thread_rng().fill_bytes(&mut nonce);

        Self {
            app: app.into(),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
            pkce,
            ts: now,
        }
    }
}

/// Signs and verifies state tokens with a shared secret.
#[derive(Clone)]
pub struct StateSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSigner").finish_non_exhaustive()
    }
}

impl StateSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Produce `header.payload.signature`, each segment base64url without padding.
    pub fn sign(&self, payload: &StatePayload) -> Result<String, StateError> {
        let header = serde_json::to_vec(&HEADER).map_err(|e| StateError::Signing(e.to_string()))?;
        let body = serde_json::to_vec(payload).map_err(|e| StateError::Signing(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(body)
        );
        let signature = crypto::sign(
            signing_input.as_bytes(),
            &self.encoding_key,
            Algorithm::HS256,
        )
        .map_err(|e| StateError::Signing(e.to_string()))?;

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify against the current wall clock.
    pub fn verify(&self, token: &str, max_age_seconds: u64) -> Result<StatePayload, StateError> {
        self.verify_at(token, max_age_seconds, chrono::Utc::now().timestamp())
    }

    /// Verify as if the current time were `now` (seconds since the epoch).
    ///
    /// The signature is checked in constant time before the payload is
    /// decoded. A token is rejected once `now - ts` exceeds `max_age_seconds`.
    pub fn verify_at(
        &self,
        token: &str,
        max_age_seconds: u64,
        now: i64,
    ) -> Result<StatePayload, StateError> {
        let mut segments = token.split('.');
        let (header, body, signature) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(header), Some(body), Some(signature), None) => (header, body, signature),
            _ => return Err(StateError::Malformed),
        };

        let signing_input = format!("{header}.{body}");
        let valid = crypto::verify(
            signature,
            signing_input.as_bytes(),
            &self.decoding_key,
            Algorithm::HS256,
        )
        .map_err(|_| StateError::BadSignature)?;
        if !valid {
            return Err(StateError::BadSignature);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| StateError::InvalidPayload)?;
        let payload: StatePayload =
            serde_json::from_slice(&raw).map_err(|_| StateError::InvalidPayload)?;

        let age = now.saturating_sub(payload.ts);
        if age > i64::try_from(max_age_seconds).unwrap_or(i64::MAX) {
            return Err(StateError::Expired {
                age,
                max_age: max_age_seconds,
            });
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000;

    fn sample_payload() -> StatePayload {
        StatePayload {
            app: "buffett-analyzer".to_string(),
            nonce: "abc".to_string(),
            pkce: Some("xyz".to_string()),
            ts: T0,
        }
    }

    #[test]
    fn test_sign_then_verify_returns_payload() {
        let signer = StateSigner::new("s3cret");
        let token = signer.sign(&sample_payload()).unwrap();

        let payload = signer.verify_at(&token, 600, T0 + 100).unwrap();
        assert_eq!(payload, sample_payload());
    }

    #[test]
    fn test_token_matches_known_encoding() {
        let signer = StateSigner::new("s3cret");
        let token = signer.sign(&sample_payload()).unwrap();

        assert_eq!(
            token,
            "eyJhbGciOiJIUzI1NiIsInR5cCI6IlNUQVRFIn0.\
             eyJhcHAiOiJidWZmZXR0LWFuYWx5emVyIiwibm9uY2UiOiJhYmMiLCJwa2NlIjoieHl6IiwidHMiOjE3MDAwMDAwMDB9.\
             JTH8-YhMAegDeymGunOyNoyz-WznwQ2R5ys4vT80zXU"
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let signer = StateSigner::new("s3cret");
        let token = signer.sign(&sample_payload()).unwrap();

        let result = signer.verify_at(&token, 600, T0 + 700);
        assert_eq!(
            result,
            Err(StateError::Expired {
                age: 700,
                max_age: 600
            })
        );
    }

    #[test]
    fn test_ttl_boundary() {
        let signer = StateSigner::new("s3cret");
        let token = signer.sign(&sample_payload()).unwrap();

        assert!(signer.verify_at(&token, 600, T0 + 599).is_ok());
        assert!(signer.verify_at(&token, 600, T0 + 600).is_ok());
        assert!(signer.verify_at(&token, 600, T0 + 601).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = StateSigner::new("s3cret").sign(&sample_payload()).unwrap();

        for other in ["s3cre", "S3CRET", "s3cret ", "another-secret"] {
            let result = StateSigner::new(other).verify_at(&token, 600, T0);
            assert_eq!(result, Err(StateError::BadSignature), "secret {other:?}");
        }
    }

    #[test]
    fn test_wrong_segment_count_is_malformed() {
        let signer = StateSigner::new("s3cret");
        let token = signer.sign(&sample_payload()).unwrap();
        let two: String = token.rsplitn(2, '.').nth(1).unwrap().to_string();
        let four = format!("{token}.extra");

        for bad in ["", "abc", two.as_str(), four.as_str(), "a.b.c.d.e"] {
            assert_eq!(signer.verify_at(bad, 600, T0), Err(StateError::Malformed));
        }
    }

    #[test]
    fn test_non_base64_segments_rejected() {
        let signer = StateSigner::new("s3cret");
        let token = signer.sign(&sample_payload()).unwrap();
        let segments: Vec<&str> = token.split('.').collect();

        let bad_signature = format!("{}.{}.!!not*base64!!", segments[0], segments[1]);
        assert!(signer.verify_at(&bad_signature, 600, T0).is_err());

        let bad_body = format!("{}.%%%.{}", segments[0], segments[2]);
        assert!(signer.verify_at(&bad_body, 600, T0).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = StateSigner::new("s3cret");
        let token = signer.sign(&sample_payload()).unwrap();
        let segments: Vec<&str> = token.split('.').collect();

        let mut forged = sample_payload();
        forged.pkce = Some("attacker".to_string());
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{}.{}.{}", segments[0], forged_body, segments[2]);

        assert_eq!(
            signer.verify_at(&forged_token, 600, T0),
            Err(StateError::BadSignature)
        );
    }

    #[test]
    fn test_signed_payload_missing_timestamp_is_invalid() {
        let signer = StateSigner::new("s3cret");
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"STATE"}"#);
        let body = URL_SAFE_NO_PAD.encode(br#"{"app":"buffett-analyzer","nonce":"abc"}"#);
        let input = format!("{header}.{body}");
        let signature = crypto::sign(
            input.as_bytes(),
            &EncodingKey::from_secret(b"s3cret"),
            Algorithm::HS256,
        )
        .unwrap();

        let result = signer.verify_at(&format!("{input}.{signature}"), 600, T0);
        assert_eq!(result, Err(StateError::InvalidPayload));
    }

    #[test]
    fn test_payload_without_pkce_round_trips() {
        let signer = StateSigner::new("client-id-only");
        let payload = StatePayload::new("buffett-analyzer", None, T0);
        let token = signer.sign(&payload).unwrap();

        let verified = signer.verify_at(&token, 600, T0 + 1).unwrap();
        assert_eq!(verified.pkce, None);
        assert_eq!(verified.nonce, payload.nonce);
    }

    #[test]
    fn test_nonces_are_unique() {
        let a = StatePayload::new("buffett-analyzer", None, T0);
        let b = StatePayload::new("buffett-analyzer", None, T0);
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(a.nonce.len(), 16);
    }
}
