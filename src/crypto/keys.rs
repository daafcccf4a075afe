//! Device signing keys.
//!
//! A [`DeviceKey`] is the device's long-term identity. It signs proofs of
//! possession and, exported as PKCS#8, backs the self-issued certificate the
//! DTLS session authenticates with.

use std::fmt;

use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use zeroize::Zeroizing;

use crate::core::{GatewayError, Result};

/// Signature algorithm of a device key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// ECDSA over NIST P-256 with SHA-256.
    EcdsaP256,
    /// ECDSA over NIST P-384 with SHA-384.
    EcdsaP384,
    /// Ed25519.
    Ed25519,
    /// RSA (any size).
    Rsa,
}

impl KeyAlgorithm {
    /// JWS `alg` header value.
    pub fn jws_alg(self) -> &'static str {
        match self {
            KeyAlgorithm::EcdsaP256 => "ES256",
            KeyAlgorithm::EcdsaP384 => "ES384",
            KeyAlgorithm::Ed25519 => "EdDSA",
            KeyAlgorithm::Rsa => "RS256",
        }
    }

    /// Check if the algorithm can back a DTLS credential.
    ///
    /// The only offered cipher suite is ECDHE-ECDSA.
    pub fn is_dtls_capable(self) -> bool {
        matches!(self, KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384)
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyAlgorithm::EcdsaP256 => "ECDSA P-256",
            KeyAlgorithm::EcdsaP384 => "ECDSA P-384",
            KeyAlgorithm::Ed25519 => "Ed25519",
            KeyAlgorithm::Rsa => "RSA",
        };
        f.write_str(name)
    }
}

/// A device signing key.
///
/// Implemented for `p256::ecdsa::SigningKey` and `p384::ecdsa::SigningKey`.
/// Keys held in secure elements implement the trait without overriding
/// [`DeviceKey::to_pkcs8_der`]; they can still sign proofs but cannot back
/// a DTLS credential.
pub trait DeviceKey: Send + Sync {
    /// Signature algorithm.
    fn algorithm(&self) -> KeyAlgorithm;

    /// Public key as DER-encoded SubjectPublicKeyInfo.
    fn public_key_der(&self) -> Result<Vec<u8>>;

    /// Sign `message`, returning a JWS-format signature (`r || s` for ECDSA).
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// Export the private key as PKCS#8 DER.
    fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        Err(GatewayError::Credential(format!(
            "{} key cannot be exported",
            self.algorithm()
        )))
    }
}

impl DeviceKey for p256::ecdsa::SigningKey {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::EcdsaP256
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        self.verifying_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| GatewayError::Credential(format!("encode public key: {e}")))
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        use p256::ecdsa::signature::Signer;
        let signature: p256::ecdsa::Signature = self
            .try_sign(message)
            .map_err(|e| GatewayError::Credential(format!("sign: {e}")))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        EncodePrivateKey::to_pkcs8_der(self)
            .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
            .map_err(|e| GatewayError::Credential(format!("export private key: {e}")))
    }
}

impl DeviceKey for p384::ecdsa::SigningKey {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::EcdsaP384
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        self.verifying_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| GatewayError::Credential(format!("encode public key: {e}")))
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        use p384::ecdsa::signature::Signer;
        let signature: p384::ecdsa::Signature = self
            .try_sign(message)
            .map_err(|e| GatewayError::Credential(format!("sign: {e}")))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        EncodePrivateKey::to_pkcs8_der(self)
            .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
            .map_err(|e| GatewayError::Credential(format!("export private key: {e}")))
    }
}

/// Generate a fresh P-256 device key.
pub fn generate_p256() -> p256::ecdsa::SigningKey {
    p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng)
}

/// Load a device key from a PKCS#8 PEM document.
///
/// P-256 and P-384 keys are recognised.
pub fn device_key_from_pem(pem: &str) -> Result<Box<dyn DeviceKey>> {
    if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
        return Ok(Box::new(key));
    }
    if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_pem(pem) {
        return Ok(Box::new(key));
    }
    Err(GatewayError::Identity(
        "not a PKCS#8 P-256 or P-384 private key".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::LineEnding;

    struct SealedKey;

    impl DeviceKey for SealedKey {
        fn algorithm(&self) -> KeyAlgorithm {
            KeyAlgorithm::EcdsaP256
        }

        fn public_key_der(&self) -> Result<Vec<u8>> {
            Ok(vec![0x30])
        }

        fn sign(&self, _message: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![0; 64])
        }
    }

    #[test]
    fn test_key_generation() {
        let k1 = generate_p256();
        let k2 = generate_p256();

        // Keys should be different
        assert_ne!(
            DeviceKey::public_key_der(&k1).unwrap(),
            DeviceKey::public_key_der(&k2).unwrap()
        );
        assert_eq!(DeviceKey::algorithm(&k1), KeyAlgorithm::EcdsaP256);
    }

    #[test]
    fn test_signature_widths() {
        let p256_key = generate_p256();
        assert_eq!(DeviceKey::sign(&p256_key, b"msg").unwrap().len(), 64);

        let p384_key = p384::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        assert_eq!(DeviceKey::sign(&p384_key, b"msg").unwrap().len(), 96);
        assert_eq!(DeviceKey::algorithm(&p384_key), KeyAlgorithm::EcdsaP384);
    }

    #[test]
    fn test_pkcs8_export() {
        let key = generate_p256();
        let der = DeviceKey::to_pkcs8_der(&key).unwrap();
        let parsed = p256::ecdsa::SigningKey::from_pkcs8_der(&der).unwrap();
        assert_eq!(parsed.verifying_key(), key.verifying_key());
    }

    #[test]
    fn test_sealed_key_cannot_export() {
        let err = SealedKey.to_pkcs8_der().unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::Credential);
    }

    #[test]
    fn test_load_from_pem() {
        let key = p384::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let pem = EncodePrivateKey::to_pkcs8_pem(&key, LineEnding::LF).unwrap();
        let loaded = device_key_from_pem(&pem).unwrap();
        assert_eq!(loaded.algorithm(), KeyAlgorithm::EcdsaP384);

        let err = device_key_from_pem("not a key").err().unwrap();
        assert_eq!(err.kind(), crate::core::ErrorKind::Identity);
    }

    #[test]
    fn test_jws_algorithms() {
        assert_eq!(KeyAlgorithm::EcdsaP256.jws_alg(), "ES256");
        assert_eq!(KeyAlgorithm::EcdsaP384.jws_alg(), "ES384");
        assert!(KeyAlgorithm::EcdsaP384.is_dtls_capable());
        assert!(!KeyAlgorithm::Ed25519.is_dtls_capable());
        assert!(!KeyAlgorithm::Rsa.is_dtls_capable());
    }
}
