//! DTLS 1.2 client sessions.
//!
//! OpenSSL runs sans-IO over a [`DatagramBuffer`]: records it writes are
//! queued and flushed to a connected UDP socket, datagrams read from the
//! socket are queued for it to consume. A periodic tick re-enters the
//! handshake so OpenSSL can retransmit a lost flight.
//!
//! Every session gets its own `SslContext` built around a credential
//! derived for that session alone.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use openssl::pkey::PKey;
use openssl::ssl::{
    ErrorCode, Ssl, SslContext, SslContextBuilder, SslMethod, SslOptions, SslStream,
    SslVerifyMode,
};
use openssl::x509::X509;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout_at};
use tracing::{debug, info, warn};

use super::datagram::DatagramBuffer;
use super::gate::HandshakeGate;
use super::socket::DatagramSocket;
use super::trust::{PeerTrust, RejectionSlot};
use crate::core::{
    CLIENT_CIPHER_LIST, DATAGRAM_MTU, DEFAULT_HANDSHAKE_TIMEOUT, GatewayError,
    HANDSHAKE_RETRANSMIT_TICK, MAX_DATAGRAM_SIZE, RecordChannel, Result,
};
use crate::crypto::{Credential, DeviceKey, Fingerprint, derive_credential};

/// Session parameters for [`SecureChannel::open`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upper bound for admission plus the complete handshake, measured from
    /// the moment the gate is entered.
    pub handshake_timeout: Duration,
    /// Policy applied to the gateway's certificate.
    pub trust: PeerTrust,
    /// OpenSSL cipher list offered to the gateway.
    pub cipher_list: String,
    /// Record MTU.
    pub mtu: usize,
    /// Gate bounding concurrent handshakes.
    pub gate: HandshakeGate,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            trust: PeerTrust::default(),
            cipher_list: CLIENT_CIPHER_LIST.to_string(),
            mtu: DATAGRAM_MTU,
            gate: HandshakeGate::global().clone(),
        }
    }
}

/// An established DTLS session with the gateway.
pub struct SecureChannel {
    peer: SocketAddr,
    socket: DatagramSocket,
    stream: SslStream<DatagramBuffer>,
    peer_fingerprint: Fingerprint,
    closed: bool,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("peer", &self.peer)
            .field("peer_fingerprint", &self.peer_fingerprint)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Open a session with the gateway at `address` (`host:port`).
    ///
    /// Fails with `Identity` when `key` is absent, before any socket
    /// exists.
    pub async fn open(
        address: &str,
        key: Option<&dyn DeviceKey>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let key = key.ok_or_else(|| {
            GatewayError::Identity("no signing key configured for the thing".into())
        })?;

        let credential = derive_credential(key)?;
        debug!(
            algorithm = %credential.algorithm(),
            serial = credential.serial(),
            fingerprint = %credential.fingerprint(),
            "derived session credential"
        );

        let (context, rejection) = client_context(&credential, config)?;
        let mut ssl = Ssl::new(&context).map_err(config_error("create session"))?;
        ssl.set_mtu(config.mtu as u32)
            .map_err(config_error("set MTU"))?;
        ssl.set_connect_state();
        let mut stream =
            SslStream::new(ssl, DatagramBuffer::default()).map_err(config_error("create stream"))?;

        let deadline = Instant::now() + config.handshake_timeout;
        let _permit = config.gate.enter(config.handshake_timeout).await?;

        let mut socket = DatagramSocket::connect(address)
            .await
            .map_err(|e| GatewayError::network(format!("connect to {address}"), e))?;
        let peer = socket
            .peer_addr()
            .map_err(|e| GatewayError::network("peer address", e))?;

        debug!(address = %peer, "starting DTLS handshake");
        timeout_at(
            deadline,
            drive_handshake(&mut stream, &mut socket, &rejection),
        )
        .await
        .map_err(|_| GatewayError::Timeout {
            operation: "DTLS handshake",
            after: config.handshake_timeout,
        })??;

        let peer_cert = stream.ssl().peer_certificate().ok_or_else(|| {
            GatewayError::Config("gateway completed the handshake without a certificate".into())
        })?;
        let peer_der = peer_cert
            .to_der()
            .map_err(config_error("encode gateway certificate"))?;
        let peer_fingerprint = Fingerprint::of(&peer_der);

        info!(
            address = %peer,
            cipher = stream.ssl().current_cipher().map(|c| c.name()).unwrap_or("?"),
            gateway = %peer_fingerprint,
            "secure channel established"
        );

        Ok(Self {
            peer,
            socket,
            stream,
            peer_fingerprint,
            closed: false,
        })
    }

    /// Gateway address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Fingerprint of the certificate the gateway authenticated with.
    pub fn peer_fingerprint(&self) -> Fingerprint {
        self.peer_fingerprint
    }

    /// Check if the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one application record.
    pub async fn send(&mut self, record: &[u8]) -> Result<()> {
        self.ensure_open("send")?;
        self.stream
            .ssl_write(record)
            .map_err(|e| GatewayError::network("DTLS write", io::Error::other(e.to_string())))?;
        self.flush().await
    }

    /// Receive one decrypted application record.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        self.ensure_open("recv")?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.stream.ssl_read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if e.code() == ErrorCode::WANT_READ => {}
                Err(e) if e.code() == ErrorCode::ZERO_RETURN => {
                    self.closed = true;
                    return Err(GatewayError::network(
                        "DTLS read",
                        io::Error::new(io::ErrorKind::ConnectionAborted, "gateway closed the session"),
                    ));
                }
                Err(e) => {
                    return Err(GatewayError::network(
                        "DTLS read",
                        io::Error::other(e.to_string()),
                    ));
                }
            }

            if self.stream.get_ref().has_outgoing() {
                self.flush().await?;
            }

            let datagram = self
                .socket
                .recv()
                .await
                .map_err(|e| GatewayError::network("receive from gateway", e))?;
            self.stream.get_mut().push_incoming(datagram);
        }
    }

    /// Send close_notify and release the session. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown() {
            if e.code() != ErrorCode::WANT_READ {
                debug!(error = %e, "close_notify not sent");
            }
        }
        if let Err(e) = self.flush().await {
            debug!(error = %e, "close_notify not delivered");
        }
        debug!(address = %self.peer, "secure channel closed");
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.closed {
            return Err(GatewayError::network(
                operation.to_string(),
                io::Error::new(io::ErrorKind::NotConnected, "secure channel is closed"),
            ));
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        while let Some(datagram) = self.stream.get_mut().pop_outgoing() {
            self.socket
                .send(&datagram)
                .await
                .map_err(|e| GatewayError::network("send to gateway", e))?;
        }
        Ok(())
    }
}

impl RecordChannel for SecureChannel {
    async fn send(&mut self, record: &[u8]) -> Result<()> {
        SecureChannel::send(self, record).await
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        SecureChannel::recv(self).await
    }

    async fn close(&mut self) {
        SecureChannel::close(self).await
    }
}

fn config_error<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> GatewayError {
    move |e| GatewayError::Config(format!("{context}: {e}"))
}

/// Build the per-session client context.
fn client_context(
    credential: &Credential,
    config: &ChannelConfig,
) -> Result<(SslContext, RejectionSlot)> {
    let mut ctx =
        SslContextBuilder::new(SslMethod::dtls()).map_err(config_error("create context"))?;
    ctx.set_cipher_list(&config.cipher_list)
        .map_err(config_error("cipher list"))?;
    ctx.set_options(SslOptions::NO_DTLSV1);

    let certificate =
        X509::from_der(credential.certificate_der()).map_err(config_error("load certificate"))?;
    let private_key = PKey::private_key_from_der(credential.private_key_der())
        .map_err(config_error("load private key"))?;
    ctx.set_certificate(&certificate)
        .map_err(config_error("set certificate"))?;
    ctx.set_private_key(&private_key)
        .map_err(config_error("set private key"))?;
    ctx.check_private_key()
        .map_err(config_error("certificate does not match key"))?;

    let rejection = config.trust.install(&mut ctx, SslVerifyMode::PEER);
    Ok((ctx.build(), rejection))
}

/// Run the client handshake to completion.
async fn drive_handshake(
    stream: &mut SslStream<DatagramBuffer>,
    socket: &mut DatagramSocket,
    rejection: &RejectionSlot,
) -> Result<()> {
    let mut tick = interval(HANDSHAKE_RETRANSMIT_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let progress = match stream.connect() {
            Ok(()) => Ok(true),
            Err(e) if e.code() == ErrorCode::WANT_READ => Ok(false),
            Err(e) => Err(e.to_string()),
        };
        // flights and alerts alike go out before the outcome is acted on
        while let Some(datagram) = stream.get_mut().pop_outgoing() {
            socket
                .send(&datagram)
                .await
                .map_err(|e| GatewayError::network("send handshake", e))?;
        }

        match progress {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(error) => {
                let message = match rejection.take() {
                    Some(reason) => format!("gateway certificate rejected: {reason}"),
                    None => error,
                };
                warn!(error = %message, "DTLS handshake failed");
                return Err(GatewayError::Handshake(message));
            }
        }

        tokio::select! {
            received = socket.recv() => {
                let datagram = received
                    .map_err(|e| GatewayError::network("receive handshake", e))?;
                stream.get_mut().push_incoming(datagram);
            }
            _ = tick.tick() => {}
        }
    }
}
