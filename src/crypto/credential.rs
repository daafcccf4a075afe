//! Self-issued X.509 credentials.
//!
//! Each DTLS session authenticates with a certificate freshly derived from
//! the device key. Credentials are never cached: a new serial number and
//! validity window are drawn for every session.

use std::fmt;
use std::str::FromStr;

use rand::{CryptoRng, RngCore};
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use zeroize::Zeroizing;

use super::keys::{DeviceKey, KeyAlgorithm};
use crate::core::{CREDENTIAL_BACKDATE, CREDENTIAL_VALIDITY, GatewayError, Result};

/// Common name written into self-issued certificates.
const SUBJECT_COMMON_NAME: &str = "thing";

/// SHA-256 fingerprint of a DER certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a DER-encoded certificate.
    pub fn of(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Fingerprint {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Colon-separated uppercase hex, e.g. `AF:12:F6:...`.
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = GatewayError;

    /// Parse hex, with or without colon separators.
    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| GatewayError::Config(format!("invalid fingerprint {s:?}: {e}")))?;
        let digest: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            GatewayError::Config(format!(
                "fingerprint must be 32 bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(digest))
    }
}

/// A self-issued certificate plus the private key it certifies.
pub struct Credential {
    certificate_der: Vec<u8>,
    private_key_der: Zeroizing<Vec<u8>>,
    serial: u64,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    algorithm: KeyAlgorithm,
}

impl Credential {
    /// Certificate, DER encoded.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Private key, PKCS#8 DER.
    pub fn private_key_der(&self) -> &[u8] {
        &self.private_key_der
    }

    /// Certificate serial number.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Key algorithm.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// SHA-256 fingerprint of the certificate.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.certificate_der)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("algorithm", &self.algorithm)
            .field("serial", &self.serial)
            .field("fingerprint", &self.fingerprint())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Derive a fresh self-issued credential from `key`.
pub fn derive_credential(key: &dyn DeviceKey) -> Result<Credential> {
    derive_credential_with_rng(key, &mut rand::rngs::OsRng)
}

/// Derive a credential, drawing the serial number from `rng`.
pub fn derive_credential_with_rng<R: RngCore + CryptoRng>(
    key: &dyn DeviceKey,
    rng: &mut R,
) -> Result<Credential> {
    let algorithm = key.algorithm();
    if !algorithm.is_dtls_capable() {
        return Err(GatewayError::Credential(format!(
            "{algorithm} keys cannot authenticate an ECDHE-ECDSA session"
        )));
    }
    let signature_alg = match algorithm {
        KeyAlgorithm::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
        _ => &PKCS_ECDSA_P256_SHA256,
    };

    let private_key_der = key.to_pkcs8_der()?;
    let key_pair = KeyPair::from_der(&private_key_der)
        .map_err(|e| GatewayError::Credential(format!("load device key: {e}")))?;

    let serial = u64::from(rng.next_u32());
    let now = OffsetDateTime::now_utc();
    let not_before = now - CREDENTIAL_BACKDATE;
    let not_after = now + CREDENTIAL_VALIDITY;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, SUBJECT_COMMON_NAME.to_string());

    let mut params = CertificateParams::new(Vec::new());
    params.alg = signature_alg;
    params.key_pair = Some(key_pair);
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::NoCa;
    params.serial_number = Some(serial);
    params.not_before = not_before;
    params.not_after = not_after;

    let certificate = Certificate::from_params(params)
        .map_err(|e| GatewayError::Credential(format!("build certificate: {e}")))?;
    let certificate_der = certificate
        .serialize_der()
        .map_err(|e| GatewayError::Credential(format!("sign certificate: {e}")))?;

    Ok(Credential {
        certificate_der,
        private_key_der,
        serial,
        not_before,
        not_after,
        algorithm,
    })
}
