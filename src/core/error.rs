//! Error types for the gateway bootstrap.
//!
//! Every layer reports a [`GatewayError`]. The variant is the error *kind*
//! and is never changed while an error travels up the stack; layers only add
//! context to the message.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::client::SessionState;
use crate::coap::ResponseCode;

/// Errors reported by the bootstrap client.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No usable signing key was supplied.
    #[error("identity error: {0}")]
    Identity(String),

    /// The signing key cannot back a DTLS credential.
    #[error("credential error: {0}")]
    Credential(String),

    /// Address resolution or socket failure.
    #[error("network error: {context}: {source}")]
    Network {
        /// What was being attempted.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// DTLS security negotiation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The session could not be configured consistently.
    #[error("configuration error: {0}")]
    Config(String),

    /// No response within the deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Elapsed budget.
        after: Duration,
    },

    /// Malformed message or undecodable payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The gateway rejected authentication.
    #[error("authentication rejected by gateway: {status}")]
    Authentication {
        /// Response code returned by the gateway.
        status: ResponseCode,
    },

    /// The gateway rejected the AM info request.
    #[error("AM info request rejected by gateway: {status}")]
    Discovery {
        /// Response code returned by the gateway.
        status: ResponseCode,
    },

    /// The gateway rejected the access token exchange.
    #[error("access token exchange rejected by gateway: {status}")]
    TokenExchange {
        /// Response code returned by the gateway.
        status: ResponseCode,
    },

    /// A step was attempted before its predecessor succeeded.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        /// Step that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// A step was abandoned before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Discriminant of [`GatewayError`], for matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`GatewayError::Identity`].
    Identity,
    /// See [`GatewayError::Credential`].
    Credential,
    /// See [`GatewayError::Network`].
    Network,
    /// See [`GatewayError::Handshake`].
    Handshake,
    /// See [`GatewayError::Config`].
    Config,
    /// See [`GatewayError::Timeout`].
    Timeout,
    /// See [`GatewayError::Protocol`].
    Protocol,
    /// See [`GatewayError::Authentication`].
    Authentication,
    /// See [`GatewayError::Discovery`].
    Discovery,
    /// See [`GatewayError::TokenExchange`].
    TokenExchange,
    /// See [`GatewayError::InvalidState`].
    InvalidState,
    /// See [`GatewayError::Cancelled`].
    Cancelled,
}

impl GatewayError {
    /// Build a network error from an I/O error.
    pub fn network(context: impl Into<String>, source: io::Error) -> Self {
        GatewayError::Network {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Identity(_) => ErrorKind::Identity,
            GatewayError::Credential(_) => ErrorKind::Credential,
            GatewayError::Network { .. } => ErrorKind::Network,
            GatewayError::Handshake(_) => ErrorKind::Handshake,
            GatewayError::Config(_) => ErrorKind::Config,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::Protocol(_) => ErrorKind::Protocol,
            GatewayError::Authentication { .. } => ErrorKind::Authentication,
            GatewayError::Discovery { .. } => ErrorKind::Discovery,
            GatewayError::TokenExchange { .. } => ErrorKind::TokenExchange,
            GatewayError::InvalidState { .. } => ErrorKind::InvalidState,
            GatewayError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The rejecting response code, for gateway rejections.
    pub fn status(&self) -> Option<ResponseCode> {
        match self {
            GatewayError::Authentication { status }
            | GatewayError::Discovery { status }
            | GatewayError::TokenExchange { status } => Some(*status),
            _ => None,
        }
    }

    /// Check if retrying the whole sequence later may succeed.
    ///
    /// Only transient transport conditions qualify; rejected credentials and
    /// malformed responses will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network { .. } | GatewayError::Timeout { .. }
        )
    }

    /// Check if the error was raised by the gateway rejecting a request.
    pub fn is_rejection(&self) -> bool {
        self.status().is_some()
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
