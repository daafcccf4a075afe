//! In-crate gateway peer.
//!
//! A DTLS listener with a CoAP [`Router`], used by the integration tests and
//! for local development against a thing.

mod router;
#[allow(clippy::module_inception)]
mod server;
mod session;

pub use router::{Router, json_response};
pub use server::*;
pub use session::{PeerSession, SessionPhase};
