//! Frame parsing and serialization (RFC 6455 section 5.2).
//!
//! The header is 2 to 14 bytes: two fixed bytes, an optional extended length
//! (u16 for 126..=65535, u64 above that) and an optional 4-byte masking key.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::mask::apply_mask;
use crate::protocol::opcode::OpCode;

/// Maximum payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Parsed fixed-size portion of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1, set on the first frame of a compressed message.
    pub rsv1: bool,
    /// RSV2, must be zero.
    pub rsv2: bool,
    /// RSV3, must be zero.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Payload length in bytes.
    pub payload_len: usize,
    /// Total header length in bytes (2..=14).
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteFrame` when `buf` does not yet hold the whole
    /// header; opcode errors bubble up from [`OpCode::from_u8`].
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let first = buf[0];
        let second = buf[1];

        let fin = first & 0x80 != 0;
        let rsv1 = first & 0x40 != 0;
        let rsv2 = first & 0x20 != 0;
        let rsv3 = first & 0x10 != 0;
        let opcode = OpCode::from_u8(first & 0x0F)?;

        let masked = second & 0x80 != 0;
        let len_byte = second & 0x7F;

        let (payload_len, len_bytes) = match len_byte {
            0..=125 => (len_byte as usize, 0),
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 2)
            }
            127 => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                if len > usize::MAX as u64 {
                    return Err(Error::FrameTooLarge {
                        size: usize::MAX,
                        max: usize::MAX,
                    });
                }
                (len as usize, 8)
            }
            _ => unreachable!(),
        };

        let mask_offset = 2 + len_bytes;
        let header_len = mask_offset + if masked { 4 } else { 0 };
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let mask = if masked {
            Some([
                buf[mask_offset],
                buf[mask_offset + 1],
                buf[mask_offset + 2],
                buf[mask_offset + 3],
            ])
        } else {
            None
        };

        Ok(Self {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }

    /// Total frame length on the wire.
    #[inline]
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.header_len + self.payload_len
    }
}

/// Frame payload, either uniquely owned or shared reference-counted bytes.
///
/// The shared form lets a broadcast payload back many frames without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Uniquely owned bytes.
    Owned(Vec<u8>),
    /// Shared, cheaply cloneable bytes.
    Shared(Bytes),
}

impl Payload {
    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Owned(v) => v,
            Payload::Shared(b) => b,
        }
    }

    /// Payload length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Convert into shared bytes without copying when already shared.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Owned(v) => Bytes::from(v),
            Payload::Shared(b) => b,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Owned(v)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Shared(b)
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Set on the first frame of a compressed message.
    pub rsv1: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Payload data, already unmasked.
    pub payload: Payload,
}

impl Frame {
    /// Create a frame with an owned payload.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Payload>) -> Self {
        Self {
            fin,
            rsv1: false,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a frame flagged as compressed (RSV1 set).
    #[must_use]
    pub fn compressed(fin: bool, opcode: OpCode, payload: impl Into<Payload>) -> Self {
        Self {
            fin,
            rsv1: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// A pong answering the given ping payload.
    #[must_use]
    pub fn pong(payload: impl Into<Payload>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    /// A ping carrying the given payload.
    #[must_use]
    pub fn ping(payload: impl Into<Payload>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    /// A close frame with the given code and reason.
    ///
    /// The reason is cut to fit the control payload limit without
    /// splitting a UTF-8 scalar.
    #[must_use]
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut cut = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        let reason = &reason[..cut];

        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.as_u16().to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(true, OpCode::Close, payload)
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Parse one frame from `buf`, copying and unmasking the payload.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteFrame` when `buf` holds less than a whole frame.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len();
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        let frame = Self {
            fin: header.fin,
            rsv1: header.rsv1,
            opcode: header.opcode,
            payload: Payload::Owned(payload),
        };
        Ok((frame, total))
    }

    /// Parse one frame from shared bytes. Unmasked payloads are sliced out
    /// of `buf` without copying; masked payloads still need an owned copy.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::parse`].
    pub fn parse_shared(buf: &Bytes) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len();
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let payload = match header.mask {
            Some(mask) => {
                let mut owned = buf[header.header_len..total].to_vec();
                apply_mask(&mut owned, mask);
                Payload::Owned(owned)
            }
            None => Payload::Shared(buf.slice(header.header_len..total)),
        };

        let frame = Self {
            fin: header.fin,
            rsv1: header.rsv1,
            opcode: header.opcode,
            payload,
        };
        Ok((frame, total))
    }

    /// Validate RFC 6455 structural rules for this frame.
    ///
    /// # Errors
    ///
    /// Control frames must not be fragmented and carry at most 125 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
            if self.rsv1 {
                return Err(Error::ReservedBitsSet);
            }
        }
        Ok(())
    }

    /// Bytes this frame occupies on the wire.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let len_bytes = match len {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };
        2 + len_bytes + if masked { 4 } else { 0 } + len
    }

    /// Serialize this frame into `buf`, masking the payload when a key is
    /// given. Returns the number of bytes written.
    pub fn write(&self, buf: &mut BytesMut, mask: Option<[u8; 4]>) -> usize {
        let len = self.payload.len();
        buf.reserve(self.wire_size(mask.is_some()));

        let mut first = self.opcode.as_u8();
        if self.fin {
            first |= 0x80;
        }
        if self.rsv1 {
            first |= 0x40;
        }
        buf.put_u8(first);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        match len {
            0..=125 => buf.put_u8(mask_bit | len as u8),
            126..=65535 => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(len as u16);
            }
            _ => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(len as u64);
            }
        }

        match mask {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(self.payload.as_slice());
                apply_mask(&mut buf[start..], key);
            }
            None => buf.put_slice(self.payload.as_slice()),
        }

        self.wire_size(mask.is_some())
    }

    /// Interpret a close frame's payload as code plus UTF-8 reason.
    ///
    /// # Errors
    ///
    /// One-byte payloads, reserved codes and non-UTF-8 reasons are protocol
    /// errors.
    pub fn parse_close_payload(&self) -> Result<Option<CloseFrame>> {
        let payload = self.payload.as_slice();
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::ProtocolViolation(
                "close frame with 1-byte payload".into(),
            )),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_valid() {
                    return Err(Error::InvalidCloseCode(code.as_u16()));
                }
                let reason = std::str::from_utf8(&payload[2..])?.to_owned();
                Ok(Some(CloseFrame { code, reason }))
            }
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::new(true, OpCode::Text, text.into_bytes()),
            Message::Binary(data) => Frame::new(true, OpCode::Binary, data),
            Message::Ping(data) => Frame::new(true, OpCode::Ping, data),
            Message::Pong(data) => Frame::new(true, OpCode::Pong, data),
            Message::Close(Some(frame)) => Frame::close(frame.code, &frame.reason),
            Message::Close(None) => Frame::new(true, OpCode::Close, Vec::new()),
        }
    }
}
