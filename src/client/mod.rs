//! Thing-side bootstrap client.
//!
//! [`GatewayClient`] drives one session step by step; [`bootstrap`] and
//! [`bootstrap_with`] run the whole sequence.

mod bootstrap;
#[allow(clippy::module_inception)]
mod client;
mod config;
mod payload;

pub use bootstrap::*;
pub use client::*;
pub use config::*;
pub use payload::{AccessToken, AmInfo, AuthenticateReply, AuthenticateRequest};
