//! Gateway peer: a DTLS listener answering CoAP requests through a [`Router`].
//!
//! One task owns the UDP socket and every [`PeerSession`]. Datagrams are
//! dispatched by source address; a periodic tick resends lost handshake
//! flights and sweeps idle or closed sessions.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslOptions, SslVerifyMode};
use openssl::x509::X509;
use thiserror::Error;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::router::Router;
use super::session::{PeerSession, SessionPhase};
use crate::core::{CLIENT_CIPHER_LIST, DATAGRAM_MTU, GatewayError, HANDSHAKE_RETRANSMIT_TICK};
use crate::crypto::{DeviceKey, Fingerprint, derive_credential, generate_p256};
use crate::transport::{DatagramSocket, PeerTrust};

/// Errors that can occur in the gateway peer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// The DTLS context could not be set up.
    #[error("DTLS setup failed: {0}")]
    Tls(String),

    /// The gateway identity could not be derived.
    #[error("identity: {0}")]
    Identity(#[from] GatewayError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server is shut down.
    #[error("server shut down")]
    Shutdown,
}

/// Certificate and key the gateway authenticates with.
#[derive(Clone)]
pub struct ServerIdentity {
    certificate_der: Vec<u8>,
    private_key_der: Zeroizing<Vec<u8>>,
}

impl ServerIdentity {
    /// Self-issue a certificate for `key`.
    pub fn from_key(key: &dyn DeviceKey) -> Result<Self, ServerError> {
        let credential = derive_credential(key)?;
        Ok(Self::from_der(
            credential.certificate_der().to_vec(),
            credential.private_key_der().to_vec(),
        ))
    }

    /// Self-issue a certificate for a fresh P-256 key.
    pub fn generate() -> Result<Self, ServerError> {
        Self::from_key(&generate_p256())
    }

    /// Use an existing certificate and PKCS#8 private key.
    ///
    /// Any key type OpenSSL accepts; the pairing is checked at bind.
    pub fn from_der(certificate_der: Vec<u8>, private_key_der: Vec<u8>) -> Self {
        Self {
            certificate_der,
            private_key_der: Zeroizing::new(private_key_der),
        }
    }

    /// SHA-256 fingerprint of the certificate.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.certificate_der)
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Gateway peer configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Gateway identity. A fresh one is generated at bind when absent.
    pub identity: Option<ServerIdentity>,

    /// OpenSSL cipher list.
    pub cipher_list: String,

    /// Policy applied to client certificates.
    pub client_trust: PeerTrust,

    /// Record MTU.
    pub mtu: usize,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Idle sessions are dropped after this long.
    pub session_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            identity: None,
            cipher_list: CLIENT_CIPHER_LIST.to_string(),
            client_trust: PeerTrust::SelfIssued,
            mtu: DATAGRAM_MTU,
            max_sessions: 1024,
            session_timeout: Duration::from_secs(60),
        }
    }
}

/// Builder for creating a [`GatewayServer`].
#[derive(Debug)]
pub struct GatewayServerBuilder {
    config: ServerConfig,
    router: Router,
}

impl GatewayServerBuilder {
    /// Create a new server builder serving [`Router::thing_gateway`].
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            router: Router::thing_gateway(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the gateway identity.
    pub fn identity(mut self, identity: ServerIdentity) -> Self {
        self.config.identity = Some(identity);
        self
    }

    /// Set the OpenSSL cipher list.
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.config.cipher_list = ciphers.into();
        self
    }

    /// Set the client certificate policy.
    pub fn client_trust(mut self, trust: PeerTrust) -> Self {
        self.config.client_trust = trust;
        self
    }

    /// Set the maximum number of concurrent sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Set the session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Serve `router` instead of the standard gateway routes.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }

    /// Bind and start serving.
    pub async fn bind(self) -> Result<GatewayServer, ServerError> {
        GatewayServer::bind(self.config, self.router).await
    }
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type Sessions = Arc<RwLock<HashMap<SocketAddr, PeerSession>>>;

/// A running gateway peer.
pub struct GatewayServer {
    config: ServerConfig,
    identity: ServerIdentity,
    local_addr: SocketAddr,
    sessions: Sessions,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl GatewayServer {
    /// Bind to `config.bind_addr` and start serving `router`.
    pub async fn bind(config: ServerConfig, router: Router) -> Result<Self, ServerError> {
        let identity = match &config.identity {
            Some(identity) => identity.clone(),
            None => ServerIdentity::generate()?,
        };
        let context = server_context(&identity, &config)?;

        let socket = DatagramSocket::bind(config.bind_addr)
            .await
            .map_err(|e| ServerError::BindFailed(e.to_string()))?;
        let local_addr = socket.local_addr()?;

        let sessions: Sessions = Arc::default();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(serve(
            socket,
            context,
            router,
            sessions.clone(),
            config.clone(),
            shutdown_rx,
        ));

        info!(address = %local_addr, gateway = %identity.fingerprint(), "gateway listening");

        Ok(Self {
            config,
            identity,
            local_addr,
            sessions,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fingerprint of the gateway certificate.
    pub fn fingerprint(&self) -> Fingerprint {
        self.identity.fingerprint()
    }

    /// Get the number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Close every session and stop serving.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| ServerError::Shutdown)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayServer")
            .field("local_addr", &self.local_addr)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn tls(context: &'static str) -> impl Fn(ErrorStack) -> ServerError {
    move |e| ServerError::Tls(format!("{context}: {e}"))
}

fn server_context(
    identity: &ServerIdentity,
    config: &ServerConfig,
) -> Result<SslContext, ServerError> {
    let mut ctx = SslContextBuilder::new(SslMethod::dtls()).map_err(tls("create context"))?;
    ctx.set_cipher_list(&config.cipher_list)
        .map_err(tls("cipher list"))?;
    ctx.set_options(SslOptions::NO_DTLSV1);

    let certificate = X509::from_der(&identity.certificate_der).map_err(tls("load certificate"))?;
    let private_key =
        PKey::private_key_from_der(&identity.private_key_der).map_err(tls("load private key"))?;
    ctx.set_certificate(&certificate)
        .map_err(tls("set certificate"))?;
    ctx.set_private_key(&private_key)
        .map_err(tls("set private key"))?;
    ctx.check_private_key()
        .map_err(tls("certificate does not match key"))?;

    // rejections are logged by the policy itself
    let _ = config.client_trust.install(
        &mut ctx,
        SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
    );
    Ok(ctx.build())
}

async fn serve(
    mut socket: DatagramSocket,
    context: SslContext,
    router: Router,
    sessions: Sessions,
    config: ServerConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut tick = interval(HANDSHAKE_RETRANSMIT_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            received = socket.recv_from() => {
                let (datagram, peer) = match received {
                    Ok((data, peer)) => (data.to_vec(), peer),
                    Err(e) => {
                        debug!(error = %e, "receive failed");
                        continue;
                    }
                };

                let mut sessions = sessions.write().await;
                let live = sessions.len();
                let session = match sessions.entry(peer) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        if live >= config.max_sessions {
                            debug!(peer = %peer, "session limit reached, dropping datagram");
                            continue;
                        }
                        match PeerSession::new(peer, &context, config.mtu) {
                            Ok(session) => entry.insert(session),
                            Err(e) => {
                                warn!(peer = %peer, error = %e, "session not created");
                                continue;
                            }
                        }
                    }
                };
                session.receive(&datagram, &router);
                flush(&socket, session).await;
                if session.phase() == SessionPhase::Closed {
                    sessions.remove(&peer);
                }
            }
            _ = tick.tick() => {
                let mut sessions = sessions.write().await;
                for session in sessions.values_mut() {
                    session.poll(&router);
                    flush(&socket, session).await;
                }
                sessions.retain(|peer, session| {
                    let keep = session.phase() != SessionPhase::Closed
                        && !session.is_idle(config.session_timeout);
                    if !keep {
                        debug!(peer = %peer, "session dropped");
                    }
                    keep
                });
            }
        }
    }

    let mut sessions = sessions.write().await;
    for session in sessions.values_mut() {
        session.close();
        flush(&socket, session).await;
    }
    sessions.clear();
    debug!("gateway stopped");
}

async fn flush(socket: &DatagramSocket, session: &mut PeerSession) {
    while let Some(datagram) = session.pop_outgoing() {
        if let Err(e) = socket.send_to(&datagram, session.peer()).await {
            debug!(peer = %session.peer(), error = %e, "send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let config = GatewayServerBuilder::new()
            .bind_addr(SocketAddr::from(([127, 0, 0, 1], 5684)))
            .max_sessions(8)
            .session_timeout(Duration::from_secs(5))
            .cipher_list("ECDHE-ECDSA-AES256-GCM-SHA384")
            .build();

        assert_eq!(config.bind_addr.port(), 5684);
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.session_timeout, Duration::from_secs(5));
        assert_eq!(config.cipher_list, "ECDHE-ECDSA-AES256-GCM-SHA384");
    }

    #[test]
    fn test_identity_fingerprint_is_stable() {
        let identity = ServerIdentity::generate().unwrap();
        assert_eq!(identity.fingerprint(), identity.clone().fingerprint());
        assert!(!format!("{identity:?}").contains("private_key"));
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let server = GatewayServer::bind(ServerConfig::default(), Router::thing_gateway())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.session_count().await, 0);
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_cipher_list() {
        let config = ServerConfig {
            cipher_list: "NOT-A-CIPHER".to_string(),
            ..ServerConfig::default()
        };
        let err = GatewayServer::bind(config, Router::new()).await.unwrap_err();
        assert!(matches!(err, ServerError::Tls(_)));
    }
}
