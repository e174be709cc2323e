//! Outgoing message fragmentation (RFC 6455 section 5.4).

use crate::protocol::{Frame, OpCode};

/// Splits a payload into frames of at most `fragment_size` bytes.
///
/// The first frame carries the message opcode (and RSV1 when the payload is
/// compressed), later frames are continuations, and only the last has FIN
/// set. An empty payload still yields one empty final frame.
pub struct MessageFragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    rsv1: bool,
    fragment_size: usize,
    offset: usize,
    emitted_first: bool,
}

impl<'a> MessageFragmenter<'a> {
    /// Fragment an uncompressed payload.
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            rsv1: false,
            fragment_size: fragment_size.max(1),
            offset: 0,
            emitted_first: false,
        }
    }

    /// Fragment an already-compressed payload; RSV1 goes on the first frame.
    #[must_use]
    pub fn compressed(payload: &'a [u8], opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            rsv1: true,
            ..Self::new(payload, opcode, fragment_size)
        }
    }

    /// Bytes not yet emitted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.offset)
    }
}

impl Iterator for MessageFragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.offset >= self.payload.len() {
            if self.emitted_first {
                return None;
            }
            self.emitted_first = true;
            let mut frame = Frame::new(true, self.opcode, Vec::new());
            frame.rsv1 = self.rsv1;
            return Some(frame);
        }

        let take = self.remaining().min(self.fragment_size);
        let chunk = self.payload[self.offset..self.offset + take].to_vec();
        self.offset += take;
        let fin = self.offset >= self.payload.len();

        let (opcode, rsv1) = if self.emitted_first {
            (OpCode::Continuation, false)
        } else {
            self.emitted_first = true;
            (self.opcode, self.rsv1)
        };

        let mut frame = Frame::new(fin, opcode, chunk);
        frame.rsv1 = rsv1;
        Some(frame)
    }
}
