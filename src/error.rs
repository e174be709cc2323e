//! Error types for the WebSocket protocol engine.
//!
//! Protocol-level failures carry enough information to pick the close code
//! sent to the peer before teardown; local failures (queue capacity, I/O)
//! never map to a close frame of their own.

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum, before or after decompression.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Malformed or corrupt DEFLATE data in a compressed message.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Permessage-deflate parameters the two sides cannot agree on.
    #[error("Extension negotiation failed: {0}")]
    NegotiationFailed(String),

    /// A compressed frame arrived on a connection without negotiated compression,
    /// or with parameters that do not match the negotiated ones.
    #[error("Compression not negotiated")]
    CompressionNotNegotiated,

    /// Async queue is at capacity. Local and non-fatal: the submitter may
    /// retry; the connection stays open.
    #[error("Work queue full: {capacity} jobs pending")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
}

impl Error {
    /// The close code to send to the peer before tearing the connection down,
    /// or `None` for errors that are local (no close frame applies).
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::InvalidFrame(_)
            | Error::ProtocolViolation(_)
            | Error::ReservedOpcode(_)
            | Error::InvalidOpcode(_)
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::UnmaskedClientFrame
            | Error::MaskedServerFrame
            | Error::ReservedBitsSet
            | Error::InvalidCloseCode(_)
            | Error::CompressionNotNegotiated => Some(CloseCode::ProtocolError),
            Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. } => Some(CloseCode::MessageTooBig),
            Error::Compression(_) => Some(CloseCode::InternalError),
            Error::NegotiationFailed(_) => Some(CloseCode::MandatoryExtension),
            Error::ConnectionClosed(_)
            | Error::Io(_)
            | Error::IncompleteFrame { .. }
            | Error::QueueFull { .. } => None,
        }
    }

    /// Whether this error is fatal to the connection.
    ///
    /// Everything except queue capacity overflow tears the connection down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::QueueFull { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
