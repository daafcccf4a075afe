//! Client configuration and builder.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::client::GatewayClient;
use crate::coap::ExchangeConfig;
use crate::core::{
    CLIENT_CIPHER_LIST, DATAGRAM_MTU, DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_PROOF_LIFETIME,
};
use crate::crypto::{DeviceKey, Fingerprint};
use crate::transport::{ChannelConfig, HandshakeGate, PeerTrust};

/// Default gateway address (CoAP over DTLS port).
pub const DEFAULT_GATEWAY_ADDRESS: &str = "127.0.0.1:5684";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway address, `host:port`.
    pub address: String,

    /// Bound on handshake admission plus the DTLS handshake itself.
    pub handshake_timeout: Duration,

    /// Bound on each request/response exchange.
    pub exchange_timeout: Duration,

    /// Optional bound on a complete [`GatewayClient::run`].
    pub deadline: Option<Duration>,

    /// Policy applied to the gateway certificate.
    pub trust: PeerTrust,

    /// OpenSSL cipher list offered to the gateway.
    pub cipher_list: String,

    /// Record MTU.
    pub mtu: usize,

    /// Gate bounding concurrent handshakes.
    pub gate: HandshakeGate,

    /// Lifetime of the proof of possession sent for the access token.
    pub proof_lifetime: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_GATEWAY_ADDRESS.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            deadline: None,
            trust: PeerTrust::default(),
            cipher_list: CLIENT_CIPHER_LIST.to_string(),
            mtu: DATAGRAM_MTU,
            gate: HandshakeGate::global().clone(),
            proof_lifetime: DEFAULT_PROOF_LIFETIME,
        }
    }
}

impl ClientConfig {
    /// Default configuration for the gateway at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Parameters for the DTLS session.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            handshake_timeout: self.handshake_timeout,
            trust: self.trust,
            cipher_list: self.cipher_list.clone(),
            mtu: self.mtu,
            gate: self.gate.clone(),
        }
    }

    /// Parameters for CoAP exchanges.
    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            exchange_timeout: self.exchange_timeout,
            ..ExchangeConfig::default()
        }
    }
}

/// Builder for creating a [`GatewayClient`].
pub struct GatewayClientBuilder {
    config: ClientConfig,
    key: Option<Arc<dyn DeviceKey>>,
}

impl GatewayClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            key: None,
        }
    }

    /// Set the gateway address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    /// Set the device signing key.
    pub fn key(mut self, key: impl DeviceKey + 'static) -> Self {
        self.key = Some(Arc::new(key));
        self
    }

    /// Set a shared device signing key.
    pub fn shared_key(mut self, key: Arc<dyn DeviceKey>) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the per-exchange timeout.
    pub fn exchange_timeout(mut self, timeout: Duration) -> Self {
        self.config.exchange_timeout = timeout;
        self
    }

    /// Bound a complete run.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = Some(deadline);
        self
    }

    /// Accept only the gateway certificate with this fingerprint.
    pub fn pin(mut self, fingerprint: Fingerprint) -> Self {
        self.config.trust = PeerTrust::Pinned(fingerprint);
        self
    }

    /// Set the OpenSSL cipher list.
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.config.cipher_list = ciphers.into();
        self
    }

    /// Set the record MTU.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Use a dedicated handshake gate instead of the process-wide one.
    pub fn gate(mut self, gate: HandshakeGate) -> Self {
        self.config.gate = gate;
        self
    }

    /// Set the proof of possession lifetime.
    pub fn proof_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.proof_lifetime = lifetime;
        self
    }

    /// Build the client configuration.
    pub fn build_config(self) -> ClientConfig {
        self.config
    }

    /// Build the client.
    pub fn build(self) -> GatewayClient {
        GatewayClient::new(self.config, self.key)
    }
}

impl Default for GatewayClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GatewayClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClientBuilder")
            .field("config", &self.config)
            .field("key", &self.key.as_ref().map(|k| k.algorithm()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_p256;

    #[test]
    fn test_builder_sets_fields() {
        let fingerprint = Fingerprint::from([7u8; 32]);
        let config = GatewayClientBuilder::new()
            .address("gateway.local:5684")
            .handshake_timeout(Duration::from_secs(3))
            .exchange_timeout(Duration::from_secs(4))
            .deadline(Duration::from_secs(20))
            .pin(fingerprint)
            .build_config();

        assert_eq!(config.address, "gateway.local:5684");
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.exchange_timeout, Duration::from_secs(4));
        assert_eq!(config.deadline, Some(Duration::from_secs(20)));
        assert_eq!(config.trust, PeerTrust::Pinned(fingerprint));
    }

    #[test]
    fn test_derived_configs() {
        let config = ClientConfig {
            exchange_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(1),
            ..ClientConfig::new("127.0.0.1:1")
        };

        let channel = config.channel_config();
        assert_eq!(channel.handshake_timeout, Duration::from_secs(1));
        assert_eq!(channel.cipher_list, CLIENT_CIPHER_LIST);
        assert_eq!(channel.trust, PeerTrust::SelfIssued);

        let exchange = config.exchange_config();
        assert_eq!(exchange.exchange_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_builder_debug_shows_key_algorithm() {
        let builder = GatewayClientBuilder::new().key(generate_p256());
        let text = format!("{builder:?}");
        assert!(text.contains("EcdsaP256"));
    }
}
