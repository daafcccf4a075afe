//! Protocol constants for the thing gateway bootstrap.
//!
//! Endpoint paths and content formats are fixed by the gateway; timing values
//! follow RFC 7252 (CoAP) and RFC 6347 (DTLS 1.2) defaults.

use std::time::Duration;

// =============================================================================
// GATEWAY ENDPOINTS
// =============================================================================

/// Authentication endpoint (POST, expects 2.03 Valid).
pub const AUTHENTICATE_PATH: &str = "/authenticate";

/// Access-management discovery endpoint (GET, expects 2.05 Content).
pub const AM_INFO_PATH: &str = "/aminfo";

/// Access token endpoint (POST, expects 2.04 Changed).
pub const ACCESS_TOKEN_PATH: &str = "/accesstoken";

// =============================================================================
// CONTENT FORMATS (RFC 7252 section 12.3)
// =============================================================================

/// `text/plain; charset=utf-8`.
pub const TEXT_PLAIN: u16 = 0;

/// `application/json`.
pub const APPLICATION_JSON: u16 = 50;

/// `application/jose` (compact JWS). Registered in the experimental range.
pub const APPLICATION_JOSE: u16 = 65100;

// =============================================================================
// DTLS (RFC 6347)
// =============================================================================

/// The only cipher suite offered by the client.
pub const CLIENT_CIPHER_LIST: &str = "ECDHE-ECDSA-AES128-GCM-SHA256";

/// Targeted datagram MTU for DTLS records.
pub const DATAGRAM_MTU: usize = 1150;

/// Receive buffer size for a single datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Interval at which a pending handshake is polled so lost flights get resent.
pub const HANDSHAKE_RETRANSMIT_TICK: Duration = Duration::from_millis(250);

/// Default upper bound for a complete DTLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of handshakes allowed to run at the same time.
pub const DEFAULT_CONCURRENT_HANDSHAKES: usize = 4;

// =============================================================================
// COAP TRANSMISSION PARAMETERS (RFC 7252 section 4.8)
// =============================================================================

/// Initial acknowledgement timeout for a Confirmable message.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound of the random factor applied to `ACK_TIMEOUT`.
pub const ACK_RANDOM_FACTOR: f64 = 1.5;

/// Retransmissions of a Confirmable message before giving up on an ACK.
pub const MAX_RETRANSMIT: u32 = 4;

/// Default upper bound for one request/response exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Token length used for outgoing requests.
pub const TOKEN_LENGTH: usize = 4;

/// Maximum token length allowed on the wire.
pub const MAX_TOKEN_LENGTH: usize = 8;

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Backdating applied to `notBefore` of self-issued certificates (clock skew).
pub const CREDENTIAL_BACKDATE: Duration = Duration::from_secs(5 * 60);

/// Validity of a self-issued certificate. Covers one session.
pub const CREDENTIAL_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default lifetime of a proof-of-possession token.
pub const DEFAULT_PROOF_LIFETIME: Duration = Duration::from_secs(5 * 60);
