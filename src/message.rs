//! WebSocket message types.

use bytes::Bytes;

/// Close status codes as defined in RFC 6455 section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// 1000: Normal closure.
    #[default]
    Normal,
    /// 1001: Endpoint going away.
    GoingAway,
    /// 1002: Protocol error.
    ProtocolError,
    /// 1003: Unsupported data type.
    UnsupportedData,
    /// 1005: No status code present. Local signalling only, never on the wire.
    NoStatus,
    /// 1006: Abnormal closure. Local signalling only, never on the wire.
    Abnormal,
    /// 1007: Invalid payload data (e.g. non-UTF-8 text).
    InvalidPayload,
    /// 1008: Policy violation.
    PolicyViolation,
    /// 1009: Message too big.
    MessageTooBig,
    /// 1010: Mandatory extension missing.
    MandatoryExtension,
    /// 1011: Internal server error.
    InternalError,
    /// 1012: Service restarting.
    ServiceRestart,
    /// 1013: Try again later.
    TryAgainLater,
    /// 1015: TLS handshake failure. Local signalling only, never on the wire.
    TlsHandshake,
    /// Any other code (3000-3999 registered, 4000-4999 private use).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1012 => CloseCode::ServiceRestart,
            1013 => CloseCode::TryAgainLater,
            1015 => CloseCode::TlsHandshake,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::ServiceRestart => 1012,
            CloseCode::TryAgainLater => 1013,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether a received close frame may legally carry this code.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Whether this code is reserved and must never appear on the wire
    /// (1004 and the local-only codes 1005, 1006, 1015).
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1004..=1006 | 1015)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        code.as_u16()
    }
}

/// The body of a close frame: status code plus optional UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code.
    pub code: CloseCode,
    /// Human-readable reason, possibly empty.
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A normal closure with no reason text.
    #[must_use]
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }
}

/// A complete WebSocket message, after reassembly and decompression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
    /// Ping with up to 125 bytes of application data.
    Ping(Bytes),
    /// Pong echoing a ping's application data.
    Pong(Bytes),
    /// Close, optionally carrying a code and reason.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(data: impl Into<String>) -> Self {
        Message::Text(data.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::Binary(data.into())
    }

    /// Create a ping message.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Message::Ping(data.into())
    }

    /// Create a pong message.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Message::Pong(data.into())
    }

    /// Create a close message.
    #[must_use]
    pub fn close(frame: Option<CloseFrame>) -> Self {
        Message::Close(frame)
    }

    /// Whether this is a text message.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Whether this is a binary message.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Whether this is a control message (ping, pong or close).
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::Close(_)
        )
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b.len(),
            Message::Close(Some(frame)) => 2 + frame.reason.len(),
            Message::Close(None) => 0,
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload as a byte slice (close frames yield only the reason text).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b,
            Message::Close(Some(frame)) => frame.reason.as_bytes(),
            Message::Close(None) => &[],
        }
    }

    /// Consume the message and return the payload.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Message::Text(s) => Bytes::from(s),
            Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b,
            Message::Close(Some(frame)) => Bytes::from(frame.reason),
            Message::Close(None) => Bytes::new(),
        }
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Binary(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip() {
        for code in [
            1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 1012, 1013, 3000, 4999,
        ] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
    }

    #[test]
    fn test_close_code_validity() {
        assert!(CloseCode::Normal.is_valid());
        assert!(CloseCode::ServiceRestart.is_valid());
        assert!(CloseCode::TryAgainLater.is_valid());
        assert!(CloseCode::Other(3500).is_valid());
        assert!(CloseCode::Other(4000).is_valid());
        assert!(!CloseCode::Other(999).is_valid());
        assert!(!CloseCode::Other(1004).is_valid());
        assert!(!CloseCode::NoStatus.is_valid());
        assert!(!CloseCode::Abnormal.is_valid());
        assert!(!CloseCode::TlsHandshake.is_valid());
        assert!(!CloseCode::Other(2999).is_valid());
        assert!(!CloseCode::Other(5000).is_valid());
    }

    #[test]
    fn test_reserved_codes_never_sent() {
        assert!(CloseCode::NoStatus.is_reserved());
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::TlsHandshake.is_reserved());
        assert!(CloseCode::Other(1004).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
        assert!(!CloseCode::ProtocolError.is_reserved());
    }

    #[test]
    fn test_message_constructors() {
        let text = Message::text("hello");
        assert!(text.is_text());
        assert_eq!(text.len(), 5);

        let binary = Message::binary(vec![1u8, 2, 3]);
        assert!(binary.is_binary());
        assert_eq!(binary.as_bytes(), &[1, 2, 3]);

        let ping = Message::ping(Bytes::from_static(b"hb"));
        assert!(ping.is_control());
        assert!(!ping.is_empty());
    }

    #[test]
    fn test_close_frame_length() {
        let msg = Message::close(Some(CloseFrame::new(CloseCode::Normal, "bye")));
        assert_eq!(msg.len(), 5);
        assert_eq!(msg.as_bytes(), b"bye");
        assert_eq!(Message::close(None).len(), 0);
    }

    #[test]
    fn test_message_into_bytes() {
        assert_eq!(Message::text("abc").into_bytes(), Bytes::from_static(b"abc"));
        assert_eq!(
            Message::binary(vec![9u8, 8]).into_bytes(),
            Bytes::from_static(&[9, 8])
        );
    }
}
