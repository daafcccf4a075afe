//! Request and response values exchanged with the gateway.

use super::code::{Method, MessageCode, MessageType, ResponseCode};
use super::message::Message;
use crate::core::{GatewayError, Result};

/// An outgoing request, independent of message IDs and tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Absolute resource path, e.g. `/authenticate`.
    pub path: String,
    /// Content-Format of the payload.
    pub content_format: Option<u16>,
    /// Preferred response Content-Format.
    pub accept: Option<u16>,
    /// Request body.
    pub payload: Vec<u8>,
}

impl Request {
    /// Create a request with no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            content_format: None,
            accept: None,
            payload: Vec::new(),
        }
    }

    /// A GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// A POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Set the Content-Format.
    pub fn content_format(mut self, format: u16) -> Self {
        self.content_format = Some(format);
        self
    }

    /// Set the Accept option.
    pub fn accept(mut self, format: u16) -> Self {
        self.accept = Some(format);
        self
    }

    /// Set the body.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Build the Confirmable message carrying this request.
    pub fn to_message(&self, message_id: u16, token: &[u8]) -> Message {
        let mut message = Message::new(
            MessageType::Confirmable,
            MessageCode::Request(self.method),
            message_id,
        );
        message.token = token.to_vec();
        message.set_uri_path(&self.path);
        if let Some(format) = self.content_format {
            message.set_content_format(format);
        }
        if let Some(format) = self.accept {
            message.set_accept(format);
        }
        message.payload = self.payload.clone();
        message
    }

    /// Extract a request from a received message.
    ///
    /// Returns `None` if the message is not a request.
    pub fn from_message(message: &Message) -> Option<Self> {
        let MessageCode::Request(method) = message.code else {
            return None;
        };
        Some(Self {
            method,
            path: message.uri_path(),
            content_format: message.content_format(),
            accept: message.accept(),
            payload: message.payload.clone(),
        })
    }
}

/// A response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response code.
    pub code: ResponseCode,
    /// Content-Format of the payload.
    pub content_format: Option<u16>,
    /// Response body.
    pub payload: Vec<u8>,
}

impl Response {
    /// Create a response with no body.
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            content_format: None,
            payload: Vec::new(),
        }
    }

    /// Set the Content-Format.
    pub fn content_format(mut self, format: u16) -> Self {
        self.content_format = Some(format);
        self
    }

    /// Set the body.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Build the message carrying this response.
    pub fn to_message(&self, message_type: MessageType, message_id: u16, token: &[u8]) -> Message {
        let mut message = Message::new(message_type, MessageCode::Response(self.code), message_id);
        message.token = token.to_vec();
        if let Some(format) = self.content_format {
            message.set_content_format(format);
        }
        message.payload = self.payload.clone();
        message
    }

    /// Extract a response from a received message.
    pub fn from_message(message: &Message) -> Result<Self> {
        let MessageCode::Response(code) = message.code else {
            return Err(GatewayError::Protocol(format!(
                "expected a response, got code {:?}",
                message.code
            )));
        };
        Ok(Self {
            code,
            content_format: message.content_format(),
            payload: message.payload.clone(),
        })
    }
}
