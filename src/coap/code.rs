//! CoAP message types and codes (RFC 7252 section 12.1).
//!
//! Response codes form a closed enum so each endpoint matches exhaustively
//! on the status it expects instead of comparing raw integers.

use std::fmt;

/// Message type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Confirmable: requires an acknowledgement.
    Confirmable = 0,
    /// Non-confirmable.
    NonConfirmable = 1,
    /// Acknowledgement of a Confirmable message.
    Acknowledgement = 2,
    /// Reset: the receiver could not process the message.
    Reset = 3,
}

impl MessageType {
    /// Parse from the two type bits.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }

    /// The two type bits.
    pub fn as_bits(self) -> u8 {
        self as u8
    }
}

/// Request method codes (class 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// 0.01 GET
    Get,
    /// 0.02 POST
    Post,
    /// 0.03 PUT
    Put,
    /// 0.04 DELETE
    Delete,
}

impl Method {
    /// Raw code byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Method::Get => 0x01,
            Method::Post => 0x02,
            Method::Put => 0x03,
            Method::Delete => 0x04,
        }
    }

    fn from_detail(detail: u8) -> Option<Self> {
        match detail {
            1 => Some(Method::Get),
            2 => Some(Method::Post),
            3 => Some(Method::Put),
            4 => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Outcome class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    /// 2.xx
    Success,
    /// 4.xx
    ClientError,
    /// 5.xx
    ServerError,
    /// Anything outside the registered classes.
    Unexpected,
}

/// Response codes registered by RFC 7252.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// 2.01
    Created,
    /// 2.02
    Deleted,
    /// 2.03
    Valid,
    /// 2.04
    Changed,
    /// 2.05
    Content,
    /// 4.00
    BadRequest,
    /// 4.01
    Unauthorized,
    /// 4.02
    BadOption,
    /// 4.03
    Forbidden,
    /// 4.04
    NotFound,
    /// 4.05
    MethodNotAllowed,
    /// 4.06
    NotAcceptable,
    /// 4.12
    PreconditionFailed,
    /// 4.13
    RequestEntityTooLarge,
    /// 4.15
    UnsupportedContentFormat,
    /// 5.00
    InternalServerError,
    /// 5.01
    NotImplemented,
    /// 5.02
    BadGateway,
    /// 5.03
    ServiceUnavailable,
    /// 5.04
    GatewayTimeout,
    /// 5.05
    ProxyingNotSupported,
    /// Any other response-class code, kept raw.
    Unknown(u8),
}

impl ResponseCode {
    /// Parse a raw code byte (`class << 5 | detail`).
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x41 => Self::Created,
            0x42 => Self::Deleted,
            0x43 => Self::Valid,
            0x44 => Self::Changed,
            0x45 => Self::Content,
            0x80 => Self::BadRequest,
            0x81 => Self::Unauthorized,
            0x82 => Self::BadOption,
            0x83 => Self::Forbidden,
            0x84 => Self::NotFound,
            0x85 => Self::MethodNotAllowed,
            0x86 => Self::NotAcceptable,
            0x8C => Self::PreconditionFailed,
            0x8D => Self::RequestEntityTooLarge,
            0x8F => Self::UnsupportedContentFormat,
            0xA0 => Self::InternalServerError,
            0xA1 => Self::NotImplemented,
            0xA2 => Self::BadGateway,
            0xA3 => Self::ServiceUnavailable,
            0xA4 => Self::GatewayTimeout,
            0xA5 => Self::ProxyingNotSupported,
            other => Self::Unknown(other),
        }
    }

    /// Raw code byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Created => 0x41,
            Self::Deleted => 0x42,
            Self::Valid => 0x43,
            Self::Changed => 0x44,
            Self::Content => 0x45,
            Self::BadRequest => 0x80,
            Self::Unauthorized => 0x81,
            Self::BadOption => 0x82,
            Self::Forbidden => 0x83,
            Self::NotFound => 0x84,
            Self::MethodNotAllowed => 0x85,
            Self::NotAcceptable => 0x86,
            Self::PreconditionFailed => 0x8C,
            Self::RequestEntityTooLarge => 0x8D,
            Self::UnsupportedContentFormat => 0x8F,
            Self::InternalServerError => 0xA0,
            Self::NotImplemented => 0xA1,
            Self::BadGateway => 0xA2,
            Self::ServiceUnavailable => 0xA3,
            Self::GatewayTimeout => 0xA4,
            Self::ProxyingNotSupported => 0xA5,
            Self::Unknown(byte) => byte,
        }
    }

    /// Outcome class.
    pub fn class(self) -> ResponseClass {
        match self.as_byte() >> 5 {
            2 => ResponseClass::Success,
            4 => ResponseClass::ClientError,
            5 => ResponseClass::ServerError,
            _ => ResponseClass::Unexpected,
        }
    }

    /// Check if the code is in the 2.xx class.
    pub fn is_success(self) -> bool {
        self.class() == ResponseClass::Success
    }

    fn reason(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Deleted => "Deleted",
            Self::Valid => "Valid",
            Self::Changed => "Changed",
            Self::Content => "Content",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::BadOption => "Bad Option",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::PreconditionFailed => "Precondition Failed",
            Self::RequestEntityTooLarge => "Request Entity Too Large",
            Self::UnsupportedContentFormat => "Unsupported Content-Format",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::ProxyingNotSupported => "Proxying Not Supported",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let byte = self.as_byte();
        write!(f, "{}.{:02} {}", byte >> 5, byte & 0x1F, self.reason())
    }
}

/// The code field of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    /// 0.00, used by empty ACK/RST and pings.
    Empty,
    /// A request.
    Request(Method),
    /// A response.
    Response(ResponseCode),
}

impl MessageCode {
    /// Parse a raw code byte. Unknown request methods are rejected.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match (byte >> 5, byte & 0x1F) {
            (0, 0) => Some(MessageCode::Empty),
            (0, detail) => Method::from_detail(detail).map(MessageCode::Request),
            _ => Some(MessageCode::Response(ResponseCode::from_byte(byte))),
        }
    }

    /// Raw code byte.
    pub fn as_byte(self) -> u8 {
        match self {
            MessageCode::Empty => 0,
            MessageCode::Request(method) => method.as_byte(),
            MessageCode::Response(code) => code.as_byte(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_classes() {
        assert_eq!(ResponseCode::Valid.class(), ResponseClass::Success);
        assert_eq!(ResponseCode::Content.class(), ResponseClass::Success);
        assert_eq!(ResponseCode::Changed.class(), ResponseClass::Success);
        assert_eq!(ResponseCode::Unauthorized.class(), ResponseClass::ClientError);
        assert_eq!(ResponseCode::BadGateway.class(), ResponseClass::ServerError);
        assert_eq!(ResponseCode::Unknown(0xE1).class(), ResponseClass::Unexpected);
    }

    #[test]
    fn test_response_code_byte_mapping() {
        assert_eq!(ResponseCode::from_byte(0x43), ResponseCode::Valid);
        assert_eq!(ResponseCode::from_byte(0xA2), ResponseCode::BadGateway);
        assert_eq!(ResponseCode::from_byte(0x5F), ResponseCode::Unknown(0x5F));
        assert_eq!(ResponseCode::Unknown(0x5F).as_byte(), 0x5F);
        assert_eq!(ResponseCode::Changed.as_byte(), 0x44);
    }

    #[test]
    fn test_response_code_display() {
        assert_eq!(ResponseCode::Valid.to_string(), "2.03 Valid");
        assert_eq!(ResponseCode::BadGateway.to_string(), "5.02 Bad Gateway");
        assert_eq!(
            ResponseCode::UnsupportedContentFormat.to_string(),
            "4.15 Unsupported Content-Format"
        );
    }

    #[test]
    fn test_message_code_parsing() {
        assert_eq!(MessageCode::from_byte(0x00), Some(MessageCode::Empty));
        assert_eq!(
            MessageCode::from_byte(0x02),
            Some(MessageCode::Request(Method::Post))
        );
        assert_eq!(
            MessageCode::from_byte(0x45),
            Some(MessageCode::Response(ResponseCode::Content))
        );
        // 0.05 FETCH is not supported
        assert_eq!(MessageCode::from_byte(0x05), None);
    }

    #[test]
    fn test_message_type_bits() {
        assert_eq!(MessageType::from_bits(0), MessageType::Confirmable);
        assert_eq!(MessageType::from_bits(2), MessageType::Acknowledgement);
        assert_eq!(MessageType::Reset.as_bits(), 3);
    }
}
