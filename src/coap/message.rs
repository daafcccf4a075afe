//! CoAP message codec (RFC 7252 section 3).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use super::code::{MessageCode, MessageType};
use crate::core::{GatewayError, MAX_TOKEN_LENGTH, Result};

/// Protocol version carried in every header.
pub const COAP_VERSION: u8 = 1;

/// Fixed header size.
pub const HEADER_SIZE: usize = 4;

/// Byte separating options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Option numbers used by the gateway protocol.
pub mod option {
    /// Uri-Path, one option per path segment.
    pub const URI_PATH: u16 = 11;
    /// Content-Format of the payload.
    pub const CONTENT_FORMAT: u16 = 12;
    /// Preferred response Content-Format.
    pub const ACCEPT: u16 = 17;
}

/// A single option, number plus raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    /// Option number.
    pub number: u16,
    /// Raw option value.
    pub value: Vec<u8>,
}

impl CoapOption {
    /// Create an option.
    pub fn new(number: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }

    /// Create an option carrying a uint, minimally encoded.
    pub fn uint(number: u16, value: u32) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        Self::new(number, bytes[skip..].to_vec())
    }

    /// Interpret the value as a uint.
    pub fn as_uint(&self) -> Option<u32> {
        if self.value.len() > 4 {
            return None;
        }
        Some(self.value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }
}

/// A decoded CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub message_type: MessageType,
    /// Request method, response code or empty.
    pub code: MessageCode,
    /// Message ID, matches ACK/RST to the message they answer.
    pub message_id: u16,
    /// Token, matches a response to its request.
    pub token: Vec<u8>,
    /// Options, kept sorted by number.
    options: Vec<CoapOption>,
    /// Payload, empty if none.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message without options or payload.
    pub fn new(message_type: MessageType, code: MessageCode, message_id: u16) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// An empty ACK for `message_id`.
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(MessageType::Acknowledgement, MessageCode::Empty, message_id)
    }

    /// An empty Reset for `message_id`.
    pub fn reset(message_id: u16) -> Self {
        Self::new(MessageType::Reset, MessageCode::Empty, message_id)
    }

    /// Check for an empty message (code 0.00).
    pub fn is_empty(&self) -> bool {
        self.code == MessageCode::Empty
    }

    /// Add an option, keeping options ordered by number.
    ///
    /// Repeated options keep their insertion order.
    pub fn add_option(&mut self, option: CoapOption) {
        let at = self
            .options
            .iter()
            .position(|o| o.number > option.number)
            .unwrap_or(self.options.len());
        self.options.insert(at, option);
    }

    /// All options, ordered by number.
    pub fn options(&self) -> &[CoapOption] {
        &self.options
    }

    /// First option with the given number.
    pub fn option(&self, number: u16) -> Option<&CoapOption> {
        self.options.iter().find(|o| o.number == number)
    }

    /// Set the Uri-Path options from a `/`-separated path.
    pub fn set_uri_path(&mut self, path: &str) {
        self.options.retain(|o| o.number != option::URI_PATH);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(CoapOption::new(option::URI_PATH, segment.as_bytes()));
        }
    }

    /// The Uri-Path options joined into an absolute path.
    pub fn uri_path(&self) -> String {
        let segments: Vec<String> = self
            .options
            .iter()
            .filter(|o| o.number == option::URI_PATH)
            .map(|o| String::from_utf8_lossy(&o.value).into_owned())
            .collect();
        format!("/{}", segments.join("/"))
    }

    /// Set the Content-Format option.
    pub fn set_content_format(&mut self, format: u16) {
        self.options.retain(|o| o.number != option::CONTENT_FORMAT);
        self.add_option(CoapOption::uint(option::CONTENT_FORMAT, u32::from(format)));
    }

    /// The Content-Format option, if present and well-formed.
    pub fn content_format(&self) -> Option<u16> {
        self.option(option::CONTENT_FORMAT)
            .and_then(CoapOption::as_uint)
            .and_then(|v| u16::try_from(v).ok())
    }

    /// Set the Accept option.
    pub fn set_accept(&mut self, format: u16) {
        self.options.retain(|o| o.number != option::ACCEPT);
        self.add_option(CoapOption::uint(option::ACCEPT, u32::from(format)));
    }

    /// The Accept option, if present and well-formed.
    pub fn accept(&self) -> Option<u16> {
        self.option(option::ACCEPT)
            .and_then(CoapOption::as_uint)
            .and_then(|v| u16::try_from(v).ok())
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.token.len() > MAX_TOKEN_LENGTH {
            return Err(GatewayError::Protocol(format!(
                "token length {} exceeds {}",
                self.token.len(),
                MAX_TOKEN_LENGTH
            )));
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + self.token.len() + self.payload.len() + 32);
        buf.push(
            (COAP_VERSION << 6) | (self.message_type.as_bits() << 4) | self.token.len() as u8,
        );
        buf.push(self.code.as_byte());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
        buf.extend_from_slice(&self.token);

        let mut previous = 0u16;
        for opt in &self.options {
            let delta = opt.number - previous;
            previous = opt.number;
            let len = u16::try_from(opt.value.len()).map_err(|_| {
                GatewayError::Protocol(format!("option {} value too long", opt.number))
            })?;

            let (delta_nibble, delta_ext) = split_extended(delta);
            let (len_nibble, len_ext) = split_extended(len);
            buf.push((delta_nibble << 4) | len_nibble);
            buf.extend_from_slice(&delta_ext);
            buf.extend_from_slice(&len_ext);
            buf.extend_from_slice(&opt.value);
        }

        if !self.payload.is_empty() {
            buf.push(PAYLOAD_MARKER);
            buf.extend_from_slice(&self.payload);
        }

        Ok(buf)
    }

    /// Decode from wire format.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(malformed(format!("message too short: {} bytes", data.len())));
        }

        let version = data[0] >> 6;
        if version != COAP_VERSION {
            return Err(malformed(format!("unsupported version {version}")));
        }
        let message_type = MessageType::from_bits(data[0] >> 4);
        let token_len = usize::from(data[0] & 0x0F);
        if token_len > MAX_TOKEN_LENGTH {
            return Err(malformed(format!("token length {token_len} is reserved")));
        }
        let code = MessageCode::from_byte(data[1])
            .ok_or_else(|| malformed(format!("unsupported code 0x{:02x}", data[1])))?;
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let mut pos = HEADER_SIZE;
        let token = data
            .get(pos..pos + token_len)
            .ok_or_else(|| malformed("truncated token"))?
            .to_vec();
        pos += token_len;

        let mut message = Message {
            message_type,
            code,
            message_id,
            token,
            options: Vec::new(),
            payload: Vec::new(),
        };

        if message.is_empty() && (token_len != 0 || data.len() > pos) {
            return Err(malformed("empty message with token or body"));
        }

        let mut number = 0u16;
        while pos < data.len() {
            let byte = data[pos];
            pos += 1;

            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(malformed("payload marker without payload"));
                }
                message.payload = data[pos..].to_vec();
                break;
            }

            let delta = read_extended(byte >> 4, data, &mut pos)?;
            let len = usize::from(read_extended(byte & 0x0F, data, &mut pos)?);
            number = number
                .checked_add(delta)
                .ok_or_else(|| malformed("option number overflow"))?;
            let value = data
                .get(pos..pos + len)
                .ok_or_else(|| malformed("truncated option value"))?;
            pos += len;
            message.options.push(CoapOption::new(number, value));
        }

        Ok(message)
    }
}

fn malformed(reason: impl Into<String>) -> GatewayError {
    GatewayError::Protocol(format!("malformed CoAP message: {}", reason.into()))
}

/// Split an option delta or length into its nibble and extension bytes.
fn split_extended(value: u16) -> (u8, Vec<u8>) {
    match value {
        0..=12 => (value as u8, Vec::new()),
        13..=268 => (13, vec![(value - 13) as u8]),
        _ => (14, (value - 269).to_be_bytes().to_vec()),
    }
}

fn read_extended(nibble: u8, data: &[u8], pos: &mut usize) -> Result<u16> {
    match nibble {
        0..=12 => Ok(u16::from(nibble)),
        13 => {
            let b = *data.get(*pos).ok_or_else(|| malformed("truncated option"))?;
            *pos += 1;
            Ok(u16::from(b) + 13)
        }
        14 => {
            let bytes = data
                .get(*pos..*pos + 2)
                .ok_or_else(|| malformed("truncated option"))?;
            *pos += 2;
            u16::from_be_bytes([bytes[0], bytes[1]])
                .checked_add(269)
                .ok_or_else(|| malformed("option extension overflow"))
        }
        _ => Err(malformed("reserved option nibble 15")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::code::{Method, ResponseCode};
    use crate::core::{APPLICATION_JOSE, APPLICATION_JSON};

    #[test]
    fn test_encode_get_request() {
        let mut msg = Message::new(
            MessageType::Confirmable,
            MessageCode::Request(Method::Get),
            0x1234,
        );
        msg.token = vec![0xAA, 0xBB];
        msg.set_uri_path("/aminfo");

        let bytes = msg.encode().unwrap();
        assert_eq!(&bytes[..4], &[0x42, 0x01, 0x12, 0x34]);
        assert_eq!(&bytes[4..6], &[0xAA, 0xBB]);
        // Uri-Path delta 11, length 6
        assert_eq!(bytes[6], 0xB6);
        assert_eq!(&bytes[7..], b"aminfo");
    }

    #[test]
    fn test_decode_piggybacked_response() {
        let mut wire = vec![0x61, 0x45, 0x00, 0x07, 0x01];
        // Content-Format 50 (application/json)
        wire.extend_from_slice(&[0xC1, 50]);
        wire.push(PAYLOAD_MARKER);
        wire.extend_from_slice(b"{}");

        let msg = Message::decode(&wire).unwrap();
        assert_eq!(msg.message_type, MessageType::Acknowledgement);
        assert_eq!(msg.code, MessageCode::Response(ResponseCode::Content));
        assert_eq!(msg.message_id, 7);
        assert_eq!(msg.token, vec![0x01]);
        assert_eq!(msg.content_format(), Some(APPLICATION_JSON));
        assert_eq!(msg.payload, b"{}");
    }

    #[test]
    fn test_extended_option_values() {
        let mut msg = Message::new(
            MessageType::Confirmable,
            MessageCode::Request(Method::Post),
            1,
        );
        msg.set_content_format(APPLICATION_JOSE);
        msg.set_accept(APPLICATION_JSON);
        msg.add_option(CoapOption::new(300, vec![0u8; 20]));
        msg.payload = b"abc".to_vec();

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.content_format(), Some(APPLICATION_JOSE));
        assert_eq!(decoded.accept(), Some(APPLICATION_JSON));
        assert_eq!(decoded.option(300).map(|o| o.value.len()), Some(20));
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_uri_path_segments() {
        let mut msg = Message::new(
            MessageType::Confirmable,
            MessageCode::Request(Method::Get),
            1,
        );
        msg.set_uri_path("/things/v1/");
        assert_eq!(
            msg.options()
                .iter()
                .filter(|o| o.number == option::URI_PATH)
                .count(),
            2
        );
        assert_eq!(msg.uri_path(), "/things/v1");

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.uri_path(), "/things/v1");
    }

    #[test]
    fn test_uint_option_minimal_encoding() {
        assert!(CoapOption::uint(option::CONTENT_FORMAT, 0).value.is_empty());
        assert_eq!(CoapOption::uint(option::CONTENT_FORMAT, 50).value, vec![50]);
        assert_eq!(
            CoapOption::uint(option::CONTENT_FORMAT, 65100).value,
            vec![0xFE, 0x4C]
        );
        assert_eq!(CoapOption::new(12, vec![0xFE, 0x4C]).as_uint(), Some(65100));
    }

    #[test]
    fn test_empty_ack() {
        let bytes = Message::empty_ack(0xBEEF).encode().unwrap();
        assert_eq!(bytes, vec![0x60, 0x00, 0xBE, 0xEF]);
        let decoded = Message::decode(&bytes).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.message_type, MessageType::Acknowledgement);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // too short
        assert!(Message::decode(&[0x40, 0x01]).is_err());
        // wrong version
        assert!(Message::decode(&[0x80, 0x01, 0x00, 0x01]).is_err());
        // token length 9
        assert!(Message::decode(&[0x49, 0x01, 0x00, 0x01]).is_err());
        // token truncated
        assert!(Message::decode(&[0x44, 0x01, 0x00, 0x01, 0xAA]).is_err());
        // payload marker with nothing after it
        assert!(Message::decode(&[0x40, 0x01, 0x00, 0x01, 0xFF]).is_err());
        // option value runs past the end
        assert!(Message::decode(&[0x40, 0x01, 0x00, 0x01, 0xB5, b'a']).is_err());
        // empty message with a token
        assert!(Message::decode(&[0x61, 0x00, 0x00, 0x01, 0x01]).is_err());

        let err = Message::decode(&[0x40]).unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::Protocol);
    }

    #[test]
    fn test_encode_rejects_long_token() {
        let mut msg = Message::new(
            MessageType::Confirmable,
            MessageCode::Request(Method::Get),
            1,
        );
        msg.token = vec![0; 9];
        assert!(msg.encode().is_err());
    }
}
