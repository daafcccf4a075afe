//! # things-gateway
//!
//! Secure bootstrap of an IoT thing against its gateway.
//!
//! A thing holding only a signing key:
//!
//! - **Connects**: DTLS 1.2 over UDP, authenticating with a certificate it
//!   self-issues for every session
//! - **Authenticates**: CoAP `POST /authenticate`, receiving a continuation
//!   token
//! - **Discovers**: CoAP `GET /aminfo`, learning the access token URL
//! - **Obtains a token**: CoAP `POST /accesstoken` with a signed proof of
//!   possession of its key
//!
//! Concurrent handshakes are bounded process-wide by a
//! [`HandshakeGate`](transport::HandshakeGate).
//!
//! ## Feature Flags
//!
//! - `server` (default): in-crate gateway peer (DTLS listener + CoAP router)
//! - `cli` (default): the `thing-bootstrap` binary
//!
//! ## Modules
//!
//! - [`core`]: constants, errors, the record channel trait
//! - [`crypto`]: device keys, self-issued credentials, proofs of possession
//! - [`transport`]: DTLS sessions, peer trust, the handshake gate
//! - [`coap`]: CoAP codec and exchange engine
//! - [`client`]: the bootstrap session state machine
//! - [`server`]: gateway peer (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use things_gateway::prelude::*;
//!
//! # async fn run() -> things_gateway::core::Result<()> {
//! let key: Arc<dyn DeviceKey> = Arc::new(generate_p256());
//! let result = bootstrap("gateway.local:5684", key).await?;
//! println!("token fields: {:?}", result.token.as_map().keys());
//! # Ok(())
//! # }
//! ```
//!
//! Step by step:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use things_gateway::prelude::*;
//!
//! # async fn run() -> things_gateway::core::Result<()> {
//! let mut client = GatewayClientBuilder::new()
//!     .address("gateway.local:5684")
//!     .key(generate_p256())
//!     .handshake_timeout(Duration::from_secs(5))
//!     .build();
//!
//! client.initialise().await?;
//! let reply = client.authenticate(AuthenticateRequest::default()).await?;
//! let info = client.am_info().await?;
//! let token = client.access_token().await?;
//! assert_eq!(client.state(), SessionState::TokenAcquired);
//! # let _ = (reply, info, token);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod coap;
pub mod core;
pub mod crypto;
pub mod transport;

pub mod client;

// Gateway peer (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{ErrorKind, GatewayError, RecordChannel, Result};

    pub use crate::client::{
        AccessToken, AmInfo, AuthenticateReply, AuthenticateRequest, BootstrapResult,
        ClientConfig, GatewayClient, GatewayClientBuilder, SessionState, bootstrap,
        bootstrap_with,
    };

    pub use crate::crypto::{
        DeviceKey, Fingerprint, KeyAlgorithm, device_key_from_pem, generate_p256,
    };

    pub use crate::transport::{HandshakeGate, PeerTrust};
}

// Re-export commonly used items at crate root
pub use client::{GatewayClient, GatewayClientBuilder, SessionState, bootstrap, bootstrap_with};
pub use core::{GatewayError, Result};
