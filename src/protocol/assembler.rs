//! Reassembly of fragmented messages (RFC 6455 section 5.4).

use bytes::{Bytes, BytesMut};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::{Frame, OpCode};

/// A data message with all fragments concatenated.
///
/// `compressed` carries the RSV1 bit of the first fragment; the payload is
/// still DEFLATE data when it is set.
#[derive(Debug)]
pub struct AssembledMessage {
    /// Text or Binary.
    pub opcode: OpCode,
    /// Concatenated payload.
    pub payload: Bytes,
    /// Whether the payload needs decompression.
    pub compressed: bool,
}

/// Accumulates data frames into complete messages.
///
/// Control frames are never fed here; the read loop handles them inline
/// between fragments.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    /// Opcode of the first fragment, None between messages.
    opcode: Option<OpCode>,
    compressed: bool,
    utf8_validator: Utf8Validator,
    validate_utf8: bool,
    config: Config,
}

impl MessageAssembler {
    /// Create an assembler for one connection.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            compressed: false,
            validate_utf8: config.validate_utf8,
            utf8_validator: Utf8Validator::new(),
            config,
        }
    }

    /// Whether a message is partially assembled.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.opcode.is_some()
    }

    /// Feed the next data frame. Returns the completed message once the
    /// final fragment arrives.
    ///
    /// # Errors
    ///
    /// Continuation without a started message, a new data opcode while one
    /// is in progress, limit overruns and invalid UTF-8 are all fatal.
    pub fn push(&mut self, frame: &Frame) -> Result<Option<AssembledMessage>> {
        debug_assert!(frame.opcode.is_data());

        match (frame.opcode, self.opcode) {
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "continuation frame without a started message".into(),
                ));
            }
            (OpCode::Continuation, Some(_)) => {
                if frame.rsv1 {
                    return Err(Error::ProtocolViolation(
                        "RSV1 set on a continuation frame".into(),
                    ));
                }
            }
            (_, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "new data frame while a message is in progress".into(),
                ));
            }
            (opcode, None) => {
                self.opcode = Some(opcode);
                self.compressed = frame.rsv1;
            }
        }

        self.fragment_count += 1;
        self.config
            .limits
            .check_fragment_count(self.fragment_count)
            .map_err(|(count, max)| Error::TooManyFragments { count, max })?;

        let total = self.buffer.len() + frame.payload.len();
        self.config
            .limits
            .check_message_size(total)
            .map_err(|(size, max)| Error::MessageTooLarge { size, max })?;

        // Compressed text can only be checked after inflation.
        if self.validate_utf8 && self.opcode == Some(OpCode::Text) && !self.compressed {
            self.utf8_validator.validate(frame.payload(), frame.fin)?;
        }

        self.buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(None);
        }

        let opcode = match self.opcode.take() {
            Some(op) => op,
            None => unreachable!(),
        };
        let payload = self.buffer.split().freeze();
        let compressed = self.compressed;
        self.fragment_count = 0;
        self.compressed = false;
        self.utf8_validator.reset();

        Ok(Some(AssembledMessage {
            opcode,
            payload,
            compressed,
        }))
    }

    /// Drop any partial message, e.g. on connection teardown.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
        self.compressed = false;
        self.utf8_validator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(Config::default())
    }

    fn assembler_with_limits(limits: crate::config::Limits) -> MessageAssembler {
        MessageAssembler::new(Config::default().with_limits(limits))
    }

    #[test]
    fn test_single_frame_message() {
        let mut asm = assembler();
        let frame = Frame::new(true, OpCode::Text, b"hello".to_vec());
        let msg = asm.push(&frame).unwrap().unwrap();
        assert_eq!(msg.opcode, OpCode::Text);
        assert_eq!(&msg.payload[..], b"hello");
        assert!(!msg.compressed);
        assert!(!asm.in_progress());
    }

    #[test]
    fn test_three_fragment_message() {
        let mut asm = assembler();
        assert!(asm
            .push(&Frame::new(false, OpCode::Binary, vec![1, 2]))
            .unwrap()
            .is_none());
        assert!(asm.in_progress());
        assert!(asm
            .push(&Frame::new(false, OpCode::Continuation, vec![3]))
            .unwrap()
            .is_none());
        let msg = asm
            .push(&Frame::new(true, OpCode::Continuation, vec![4, 5]))
            .unwrap()
            .unwrap();
        assert_eq!(msg.opcode, OpCode::Binary);
        assert_eq!(&msg.payload[..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_orphan_continuation_rejected() {
        let mut asm = assembler();
        let frame = Frame::new(true, OpCode::Continuation, vec![1]);
        assert!(matches!(
            asm.push(&frame),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_interleaved_data_frame_rejected() {
        let mut asm = assembler();
        asm.push(&Frame::new(false, OpCode::Text, b"a".to_vec()))
            .unwrap();
        assert!(matches!(
            asm.push(&Frame::new(true, OpCode::Binary, b"b".to_vec())),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_compressed_flag_comes_from_first_fragment() {
        let mut asm = assembler();
        asm.push(&Frame::compressed(false, OpCode::Binary, vec![1]))
            .unwrap();
        let msg = asm
            .push(&Frame::new(true, OpCode::Continuation, vec![2]))
            .unwrap()
            .unwrap();
        assert!(msg.compressed);
    }

    #[test]
    fn test_rsv1_on_continuation_rejected() {
        let mut asm = assembler();
        asm.push(&Frame::compressed(false, OpCode::Binary, vec![1]))
            .unwrap();
        assert!(matches!(
            asm.push(&Frame::compressed(true, OpCode::Continuation, vec![2])),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_fragment_count_limit() {
        let mut asm = assembler_with_limits(crate::config::Limits::new(1024, 1024, 2));
        asm.push(&Frame::new(false, OpCode::Binary, vec![1])).unwrap();
        asm.push(&Frame::new(false, OpCode::Continuation, vec![2]))
            .unwrap();
        assert!(matches!(
            asm.push(&Frame::new(true, OpCode::Continuation, vec![3])),
            Err(Error::TooManyFragments { count: 3, max: 2 })
        ));
    }

    #[test]
    fn test_message_size_limit() {
        let mut asm = assembler_with_limits(crate::config::Limits::new(1024, 8, 128));
        asm.push(&Frame::new(false, OpCode::Binary, vec![0u8; 6]))
            .unwrap();
        assert!(matches!(
            asm.push(&Frame::new(true, OpCode::Continuation, vec![0u8; 3])),
            Err(Error::MessageTooLarge { size: 9, max: 8 })
        ));
    }

    #[test]
    fn test_utf8_checked_across_fragments() {
        let mut asm = assembler();
        // Euro sign split across two fragments.
        asm.push(&Frame::new(false, OpCode::Text, vec![0xE2]))
            .unwrap();
        let msg = asm
            .push(&Frame::new(true, OpCode::Continuation, vec![0x82, 0xAC]))
            .unwrap()
            .unwrap();
        assert_eq!(std::str::from_utf8(&msg.payload).unwrap(), "€");
    }

    #[test]
    fn test_invalid_utf8_rejected_eagerly() {
        let mut asm = assembler();
        assert!(matches!(
            asm.push(&Frame::new(false, OpCode::Text, vec![0xFF])),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn test_utf8_skipped_for_compressed_text() {
        // DEFLATE output is not UTF-8; the check happens after inflation.
        let mut asm = assembler();
        let msg = asm
            .push(&Frame::compressed(true, OpCode::Text, vec![0xFF, 0xFE]))
            .unwrap()
            .unwrap();
        assert!(msg.compressed);
    }

    #[test]
    fn test_utf8_toggle_off() {
        let mut asm = MessageAssembler::new(Config::default().with_utf8_validation(false));
        assert!(asm
            .push(&Frame::new(true, OpCode::Text, vec![0xFF]))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_reset_clears_partial_message() {
        let mut asm = assembler();
        asm.push(&Frame::new(false, OpCode::Text, b"abc".to_vec()))
            .unwrap();
        asm.reset();
        assert!(!asm.in_progress());
        let msg = asm
            .push(&Frame::new(true, OpCode::Binary, vec![9]))
            .unwrap()
            .unwrap();
        assert_eq!(&msg.payload[..], &[9]);
    }
}
