//! Proof of possession, a compact JWS signed by the device key.
//!
//! The proof binds the continuation token issued by `/authenticate` to the
//! access token endpoint (`aud`) and is only valid for a short lifetime.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::keys::DeviceKey;
use crate::core::{DEFAULT_PROOF_LIFETIME, GatewayError, Result};

/// JOSE header of a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofHeader {
    /// Signature algorithm (`ES256`, `ES384`).
    pub alg: String,
    /// Always `JWT`.
    pub typ: String,
    /// Base64url SHA-256 thumbprint of the signer's SubjectPublicKeyInfo.
    pub kid: String,
}

/// Claims carried by a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofClaims {
    /// Audience, the access token URL discovered via AM info.
    pub aud: String,
    /// Continuation token issued at authentication.
    #[serde(rename = "tokenId")]
    pub token_id: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Unique proof identifier.
    pub jti: String,
}

impl ProofClaims {
    /// Claims valid from now for [`DEFAULT_PROOF_LIFETIME`].
    pub fn new(audience: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self::with_lifetime(audience, token_id, DEFAULT_PROOF_LIFETIME)
    }

    /// Claims valid from now for `lifetime`.
    pub fn with_lifetime(
        audience: impl Into<String>,
        token_id: impl Into<String>,
        lifetime: Duration,
    ) -> Self {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let jti: [u8; 16] = rand::random();
        Self {
            aud: audience.into(),
            token_id: token_id.into(),
            iat,
            exp: iat.saturating_add(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)),
            jti: hex::encode(jti),
        }
    }
}

/// A signed proof in compact serialization (`header.claims.signature`).
#[derive(Clone, PartialEq, Eq)]
pub struct ProofOfPossession {
    compact: String,
    claims: ProofClaims,
}

impl ProofOfPossession {
    /// Sign `claims` with `key`.
    pub fn sign(key: &dyn DeviceKey, claims: ProofClaims) -> Result<Self> {
        let header = ProofHeader {
            alg: key.algorithm().jws_alg().to_string(),
            typ: "JWT".to_string(),
            kid: key_thumbprint(&key.public_key_der()?),
        };

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| GatewayError::Protocol(format!("encode proof header: {e}")))?;
        let claims_json = serde_json::to_vec(&claims)
            .map_err(|e| GatewayError::Protocol(format!("encode proof claims: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = key.sign(signing_input.as_bytes())?;
        let compact = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature));

        Ok(Self { compact, claims })
    }

    /// The compact serialization.
    pub fn as_str(&self) -> &str {
        &self.compact
    }

    /// The signed claims.
    pub fn claims(&self) -> &ProofClaims {
        &self.claims
    }

    /// Consume into the compact serialization.
    pub fn into_string(self) -> String {
        self.compact
    }
}

impl fmt::Debug for ProofOfPossession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofOfPossession")
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

/// Base64url SHA-256 thumbprint of a DER SubjectPublicKeyInfo.
pub fn key_thumbprint(spki_der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(spki_der))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_p256;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::{Signature, VerifyingKey};

    fn split(compact: &str) -> (String, Vec<u8>, Vec<u8>, Vec<u8>) {
        let parts: Vec<&str> = compact.split('.').collect();
        assert_eq!(parts.len(), 3);
        (
            format!("{}.{}", parts[0], parts[1]),
            URL_SAFE_NO_PAD.decode(parts[0]).unwrap(),
            URL_SAFE_NO_PAD.decode(parts[1]).unwrap(),
            URL_SAFE_NO_PAD.decode(parts[2]).unwrap(),
        )
    }

    #[test]
    fn test_proof_verifies_with_public_key() {
        let key = generate_p256();
        let proof =
            ProofOfPossession::sign(&key, ProofClaims::new("/things", "token-123")).unwrap();

        let (signing_input, _, _, signature) = split(proof.as_str());
        let signature = Signature::from_slice(&signature).unwrap();
        let verifying_key = VerifyingKey::from(&key);
        assert!(
            verifying_key
                .verify(signing_input.as_bytes(), &signature)
                .is_ok()
        );
    }

    #[test]
    fn test_proof_header_and_claims() {
        let key = generate_p256();
        let proof =
            ProofOfPossession::sign(&key, ProofClaims::new("/things", "token-123")).unwrap();

        let (_, header, claims, _) = split(proof.as_str());
        let header: ProofHeader = serde_json::from_slice(&header).unwrap();
        assert_eq!(header.alg, "ES256");
        assert_eq!(header.typ, "JWT");
        assert_eq!(
            header.kid,
            key_thumbprint(&DeviceKey::public_key_der(&key).unwrap())
        );

        let raw: serde_json::Value = serde_json::from_slice(&claims).unwrap();
        assert_eq!(raw["aud"], "/things");
        assert_eq!(raw["tokenId"], "token-123");
        assert_eq!(
            raw["exp"].as_i64().unwrap() - raw["iat"].as_i64().unwrap(),
            DEFAULT_PROOF_LIFETIME.as_secs() as i64
        );
    }

    #[test]
    fn test_p384_proof_alg() {
        let key = p384::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let proof = ProofOfPossession::sign(&key, ProofClaims::new("/things", "")).unwrap();
        let (_, header, _, signature) = split(proof.as_str());
        let header: ProofHeader = serde_json::from_slice(&header).unwrap();
        assert_eq!(header.alg, "ES384");
        assert_eq!(signature.len(), 96);
    }

    #[test]
    fn test_unbounded_lifetime_saturates() {
        let claims = ProofClaims::with_lifetime("/things", "t", Duration::MAX);
        assert_eq!(claims.exp, i64::MAX);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_unique_jti() {
        let a = ProofClaims::new("/things", "t");
        let b = ProofClaims::new("/things", "t");
        assert_ne!(a.jti, b.jti);
    }
}
