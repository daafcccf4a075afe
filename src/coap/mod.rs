//! CoAP (RFC 7252) message layer.
//!
//! - [`Message`]: wire codec
//! - [`Request`] / [`Response`]: values exchanged with the gateway
//! - [`Exchange`]: one outstanding Confirmable request at a time over a
//!   secure channel

mod code;
mod exchange;
mod message;
mod request;

pub use code::{MessageCode, MessageType, Method, ResponseClass, ResponseCode};
pub use exchange::{Exchange, ExchangeConfig};
pub use message::{CoapOption, Message, option};
pub use request::{Request, Response};
