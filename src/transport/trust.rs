//! Peer certificate policy.
//!
//! Gateways and things both authenticate with self-issued certificates, so
//! there is no chain to a CA. A peer is accepted when it presents exactly one
//! certificate that is correctly self-signed, carries an EC P-256/P-384 key
//! and is inside its validity window. Pinning narrows this to one certificate.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::ssl::{SslContextBuilder, SslVerifyMode};
use openssl::x509::X509Ref;
use tracing::warn;

use crate::crypto::Fingerprint;

/// How a peer's certificate is judged.
///
/// No variant skips verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerTrust {
    /// Accept any valid self-issued EC certificate.
    #[default]
    SelfIssued,
    /// Accept only the self-issued certificate with this fingerprint.
    Pinned(Fingerprint),
}

impl PeerTrust {
    /// Check `cert`, presented at chain `depth`.
    ///
    /// Returns the rejection reason on failure.
    pub fn verify(&self, cert: &X509Ref, depth: u32) -> Result<(), String> {
        if depth != 0 {
            return Err(format!(
                "certificate chains are not accepted (certificate at depth {depth})"
            ));
        }

        let public_key = cert
            .public_key()
            .map_err(|e| format!("unreadable public key: {e}"))?;
        let curve = public_key
            .ec_key()
            .ok()
            .and_then(|ec| ec.group().curve_name())
            .ok_or_else(|| format!("{:?} key is not an EC key", public_key.id()))?;
        if curve != Nid::X9_62_PRIME256V1 && curve != Nid::SECP384R1 {
            return Err(format!("unsupported curve {}", curve.short_name().unwrap_or("?")));
        }

        match cert.verify(&public_key) {
            Ok(true) => {}
            Ok(false) => return Err("certificate is not self-signed".to_string()),
            Err(e) => return Err(format!("signature check failed: {e}")),
        }

        let now = Asn1Time::days_from_now(0).map_err(|e| format!("clock: {e}"))?;
        let not_yet_valid = cert
            .not_before()
            .compare(&now)
            .map_err(|e| format!("notBefore: {e}"))?
            == Ordering::Greater;
        let expired = cert
            .not_after()
            .compare(&now)
            .map_err(|e| format!("notAfter: {e}"))?
            == Ordering::Less;
        if not_yet_valid || expired {
            return Err(format!(
                "certificate outside validity window {} .. {}",
                cert.not_before(),
                cert.not_after()
            ));
        }

        if let PeerTrust::Pinned(expected) = self {
            let der = cert.to_der().map_err(|e| format!("encode certificate: {e}"))?;
            let actual = Fingerprint::of(&der);
            if actual != *expected {
                return Err(format!(
                    "fingerprint {actual} does not match pinned {expected}"
                ));
            }
        }

        Ok(())
    }

    /// Install the policy on an OpenSSL context.
    ///
    /// The first rejection reason is written to the returned slot so the
    /// handshake error can report it.
    pub fn install(&self, ctx: &mut SslContextBuilder, mode: SslVerifyMode) -> RejectionSlot {
        let slot = RejectionSlot::default();
        let trust = *self;
        let sink = slot.clone();
        ctx.set_verify_callback(mode, move |_preverified, store| {
            // OpenSSL's own verdict is ignored: it rejects every self-signed
            // certificate.
            let depth = store.error_depth();
            let verdict = match store.current_cert() {
                Some(cert) => trust.verify(cert, depth),
                None => Err("peer presented no certificate".to_string()),
            };
            match verdict {
                Ok(()) => true,
                Err(reason) => {
                    warn!(%reason, "peer certificate rejected");
                    sink.record(reason);
                    false
                }
            }
        });
        slot
    }
}

/// Shared slot holding why the peer certificate was rejected.
#[derive(Debug, Clone, Default)]
pub struct RejectionSlot(Arc<Mutex<Option<String>>>);

impl RejectionSlot {
    fn record(&self, reason: String) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(reason);
        }
    }

    /// Take the recorded reason, if any.
    pub fn take(&self) -> Option<String> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_credential, generate_p256};
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509, X509NameBuilder};

    fn self_issued() -> X509 {
        let credential = derive_credential(&generate_p256()).unwrap();
        X509::from_der(credential.certificate_der()).unwrap()
    }

    fn rsa_self_signed(days_valid: u32) -> X509 {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "gateway").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days_valid).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn test_self_issued_accepted() {
        assert_eq!(PeerTrust::SelfIssued.verify(&self_issued(), 0), Ok(()));
    }

    #[test]
    fn test_chain_rejected() {
        let err = PeerTrust::SelfIssued.verify(&self_issued(), 1).unwrap_err();
        assert!(err.contains("depth 1"));
    }

    #[test]
    fn test_rsa_rejected() {
        let err = PeerTrust::SelfIssued
            .verify(&rsa_self_signed(1), 0)
            .unwrap_err();
        assert!(err.contains("not an EC key"));
    }

    #[test]
    fn test_pinned_fingerprint() {
        let cert = self_issued();
        let pinned = Fingerprint::of(&cert.to_der().unwrap());
        assert_eq!(PeerTrust::Pinned(pinned).verify(&cert, 0), Ok(()));

        let other = self_issued();
        let err = PeerTrust::Pinned(pinned).verify(&other, 0).unwrap_err();
        assert!(err.contains("does not match"));
    }

    #[test]
    fn test_rejection_slot_keeps_first_reason() {
        let slot = RejectionSlot::default();
        slot.record("first".into());
        slot.record("second".into());
        assert_eq!(slot.take().as_deref(), Some("first"));
        assert_eq!(slot.take(), None);
    }
}
