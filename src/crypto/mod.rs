//! Identity material.
//!
//! - [`DeviceKey`]: the device's signing key
//! - [`Credential`]: a self-issued certificate derived per session
//! - [`ProofOfPossession`]: the signed object exchanged for an access token

mod credential;
mod keys;
mod proof;

pub use credential::{Credential, Fingerprint, derive_credential, derive_credential_with_rng};
pub use keys::{DeviceKey, KeyAlgorithm, device_key_from_pem, generate_p256};
pub use proof::{ProofClaims, ProofHeader, ProofOfPossession, key_thumbprint};
