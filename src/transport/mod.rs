//! Secure transport to the gateway.
//!
//! - [`SecureChannel`]: DTLS 1.2 session over a connected UDP socket
//! - [`PeerTrust`]: policy for the gateway's self-issued certificate
//! - [`HandshakeGate`]: bound on concurrent handshakes
//! - [`DatagramSocket`] / [`DatagramBuffer`]: the UDP and in-memory halves
//!   the DTLS stream runs over

mod datagram;
mod dtls;
mod gate;
mod socket;
mod trust;

pub use datagram::DatagramBuffer;
pub use dtls::{ChannelConfig, SecureChannel};
pub use gate::{HandshakeGate, HandshakePermit};
pub use socket::DatagramSocket;
pub use trust::{PeerTrust, RejectionSlot};
