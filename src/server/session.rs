//! Per-peer DTLS session on the gateway side.
//!
//! A session is created on the first datagram from a new address, runs the
//! server handshake, then answers each CoAP request with a piggybacked
//! response. Confirmable requests are deduplicated by message ID.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use openssl::ssl::{ErrorCode, Ssl, SslContext, SslStream};
use tracing::{debug, info, warn};

use super::router::Router;
use super::server::ServerError;
use crate::coap::{Message, MessageType, Request, Response, ResponseCode};
use crate::core::MAX_DATAGRAM_SIZE;
use crate::crypto::Fingerprint;
use crate::transport::DatagramBuffer;

/// Replies remembered for duplicate detection.
const REPLY_CACHE_SIZE: usize = 16;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Handshake in progress.
    Handshaking,
    /// Handshake complete, serving requests.
    Established,
    /// Closed or failed; the session is dropped on the next sweep.
    Closed,
}

/// Gateway side of one thing's DTLS session.
pub struct PeerSession {
    peer: SocketAddr,
    stream: SslStream<DatagramBuffer>,
    phase: SessionPhase,
    last_activity: Instant,
    client_fingerprint: Option<Fingerprint>,
    next_message_id: u16,
    replies: VecDeque<(u16, Vec<u8>)>,
}

impl PeerSession {
    /// Create a session in accept state.
    pub fn new(peer: SocketAddr, context: &SslContext, mtu: usize) -> Result<Self, ServerError> {
        let tls = |e: openssl::error::ErrorStack| ServerError::Tls(e.to_string());

        let mut ssl = Ssl::new(context).map_err(tls)?;
        ssl.set_mtu(mtu as u32).map_err(tls)?;
        ssl.set_accept_state();
        let stream = SslStream::new(ssl, DatagramBuffer::default()).map_err(tls)?;

        Ok(Self {
            peer,
            stream,
            phase: SessionPhase::Handshaking,
            last_activity: Instant::now(),
            client_fingerprint: None,
            next_message_id: rand::random(),
            replies: VecDeque::with_capacity(REPLY_CACHE_SIZE),
        })
    }

    /// Peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Fingerprint of the thing's certificate, once established.
    pub fn client_fingerprint(&self) -> Option<Fingerprint> {
        self.client_fingerprint
    }

    /// Check if the session saw no traffic for `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() >= timeout
    }

    /// Feed one datagram from the peer.
    pub fn receive(&mut self, datagram: &[u8], router: &Router) {
        self.last_activity = Instant::now();
        self.stream.get_mut().push_incoming(datagram);
        self.drive(router);
    }

    /// Re-enter a pending handshake so lost flights are resent.
    pub fn poll(&mut self, router: &Router) {
        if self.phase == SessionPhase::Handshaking {
            self.drive(router);
        }
    }

    /// Take the next datagram to send to the peer.
    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.stream.get_mut().pop_outgoing()
    }

    /// Send close_notify.
    pub fn close(&mut self) {
        if self.phase == SessionPhase::Established {
            let _ = self.stream.shutdown();
        }
        self.phase = SessionPhase::Closed;
    }

    fn drive(&mut self, router: &Router) {
        if self.phase == SessionPhase::Handshaking {
            match self.stream.accept() {
                Ok(()) => self.established(),
                Err(e) if e.code() == ErrorCode::WANT_READ => return,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "handshake failed");
                    self.phase = SessionPhase::Closed;
                    return;
                }
            }
        }
        if self.phase == SessionPhase::Established {
            self.serve(router);
        }
    }

    fn established(&mut self) {
        self.phase = SessionPhase::Established;
        self.client_fingerprint = self
            .stream
            .ssl()
            .peer_certificate()
            .and_then(|cert| cert.to_der().ok())
            .map(|der| Fingerprint::of(&der));
        info!(
            peer = %self.peer,
            thing = ?self.client_fingerprint.map(|f| f.to_string()),
            "thing connected"
        );
    }

    fn serve(&mut self, router: &Router) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.stream.ssl_read(&mut buf) {
                Ok(n) => {
                    let Some(reply) = self.handle_record(&buf[..n], router) else {
                        continue;
                    };
                    if let Err(e) = self.stream.ssl_write(&reply) {
                        warn!(peer = %self.peer, error = %e, "reply not written");
                        self.phase = SessionPhase::Closed;
                        return;
                    }
                }
                Err(e) if e.code() == ErrorCode::WANT_READ => return,
                Err(e) if e.code() == ErrorCode::ZERO_RETURN => {
                    debug!(peer = %self.peer, "thing closed the session");
                    let _ = self.stream.shutdown();
                    self.phase = SessionPhase::Closed;
                    return;
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "read failed");
                    self.phase = SessionPhase::Closed;
                    return;
                }
            }
        }
    }

    /// Answer one CoAP message. Returns the encoded reply, if any.
    fn handle_record(&mut self, record: &[u8], router: &Router) -> Option<Vec<u8>> {
        let message = match Message::decode(record) {
            Ok(message) => message,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "dropping malformed message");
                return None;
            }
        };

        let confirmable = message.message_type == MessageType::Confirmable;
        if confirmable {
            if let Some((_, reply)) = self.replies.iter().find(|(id, _)| *id == message.message_id) {
                debug!(peer = %self.peer, message_id = message.message_id, "duplicate request");
                return Some(reply.clone());
            }
        }

        let reply = match Request::from_message(&message) {
            Some(request) => {
                let response = router.handle(&request);
                debug!(
                    peer = %self.peer,
                    method = %request.method,
                    path = %request.path,
                    code = %response.code,
                    "handled request"
                );
                self.response_message(&message, &response)
            }
            // CoAP ping
            None if confirmable && message.is_empty() => Message::reset(message.message_id),
            None => return None,
        };

        let wire = match reply.encode() {
            Ok(wire) => wire,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "reply not encodable");
                let fallback = Response::new(ResponseCode::InternalServerError);
                self.response_message(&message, &fallback).encode().ok()?
            }
        };
        if confirmable {
            if self.replies.len() == REPLY_CACHE_SIZE {
                self.replies.pop_front();
            }
            self.replies.push_back((message.message_id, wire.clone()));
        }
        Some(wire)
    }

    fn response_message(&mut self, request: &Message, response: &Response) -> Message {
        match request.message_type {
            MessageType::Confirmable => {
                response.to_message(MessageType::Acknowledgement, request.message_id, &request.token)
            }
            _ => {
                let id = self.next_message_id;
                self.next_message_id = self.next_message_id.wrapping_add(1);
                response.to_message(MessageType::NonConfirmable, id, &request.token)
            }
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer", &self.peer)
            .field("phase", &self.phase)
            .field("client_fingerprint", &self.client_fingerprint)
            .finish_non_exhaustive()
    }
}
