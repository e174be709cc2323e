//! Buffered frame reader and writer halves.
//!
//! Reading and writing are split so a read loop and concurrent writers can
//! own their half independently. The reader validates headers before the
//! payload finishes arriving; the writer generates masks for client-role
//! frames and can either flush frames directly or pre-encode them for a
//! write queue.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::log::trace;
use crate::protocol::frame::FrameHeader;
use crate::protocol::validation::FrameValidator;
use crate::protocol::Frame;

/// Serialize a frame to wire bytes without touching any stream.
///
/// The async write path encodes at submission time with a mask from its
/// own [`MaskGenerator`], so frames hit the wire in submission order even
/// though the writes themselves are queued.
#[must_use]
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>) -> Bytes {
    let mut out = BytesMut::with_capacity(frame.wire_size(mask.is_some()));
    frame.write(&mut out, mask);
    out.freeze()
}

/// Masking key sequence for client-role frames.
///
/// Keys come from a splitmix-style sequence: not cryptographic, which
/// RFC 6455 masking does not require, but cheap and well distributed.
#[derive(Debug)]
pub struct MaskGenerator {
    seed: u64,
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskGenerator {
    /// Create a generator seeded from the OS entropy source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seed: random_mask_seed(),
        }
    }

    /// The next masking key.
    pub fn next_mask(&mut self) -> [u8; 4] {
        self.seed = self.seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut x = self.seed;
        x ^= x >> 33;
        x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        x ^= x >> 33;
        x = x.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
        x ^= x >> 33;
        (x as u32).to_ne_bytes()
    }
}

/// Seed the mask sequence from the OS, with a clock fallback for targets
/// where the entropy source is unavailable.
fn random_mask_seed() -> u64 {
    let mut seed = [0u8; 8];
    if getrandom::getrandom(&mut seed).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        seed = nanos.to_ne_bytes();
    }
    u64::from_ne_bytes(seed)
}

/// Reads and validates frames from an async byte stream.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    validator: FrameValidator,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a readable stream half.
    pub fn new(io: R, validator: FrameValidator, buffer_capacity: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(buffer_capacity),
            validator,
        }
    }

    /// Read the next complete frame.
    ///
    /// The header is validated as soon as it is complete, before the
    /// payload arrives, so an oversized or malformed frame fails without
    /// buffering its body.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed(None)` on EOF; validation and I/O errors
    /// otherwise.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match FrameHeader::parse(&self.buf) {
                Ok(header) => {
                    self.validator.validate_header(&header)?;
                    let total = header.frame_len();
                    if self.buf.len() >= total {
                        let (frame, consumed) = Frame::parse(&self.buf)?;
                        self.buf.advance(consumed);
                        frame.validate()?;
                        trace!(
                            "read frame: {} fin={} len={}",
                            frame.opcode,
                            frame.fin,
                            frame.payload.len()
                        );
                        return Ok(frame);
                    }
                    self.buf.reserve(total - self.buf.len());
                }
                Err(Error::IncompleteFrame { needed }) => {
                    self.buf.reserve(needed);
                }
                Err(e) => return Err(e),
            }

            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Writes frames to an async byte stream, masking them when the local
/// role requires it.
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
    role: Role,
    mask: MaskGenerator,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writable stream half.
    pub fn new(io: W, role: Role, buffer_capacity: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(buffer_capacity),
            role,
            mask: MaskGenerator::new(),
        }
    }

    /// Next masking key, or None when this role sends unmasked frames.
    fn next_mask(&mut self) -> Option<[u8; 4]> {
        self.role.must_mask().then(|| self.mask.next_mask())
    }

    /// Buffer a frame without flushing; pair with [`FrameWriter::flush`].
    pub fn feed_frame(&mut self, frame: &Frame) {
        let mask = self.next_mask();
        frame.write(&mut self.buf, mask);
    }

    /// Write a frame and flush it to the stream.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        trace!(
            "write frame: {} fin={} len={}",
            frame.opcode,
            frame.fin,
            frame.payload.len()
        );
        self.feed_frame(frame);
        self.flush().await
    }

    /// Write pre-encoded wire bytes and flush.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn write_raw(&mut self, wire: &[u8]) -> Result<()> {
        self.flush().await?;
        self.io.write_all(wire).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Flush everything buffered by `feed_frame`.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.io.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.flush().await?;
        self.io.shutdown().await?;
        Ok(())
    }

    /// Access the wrapped stream half, mainly for tests.
    pub fn get_ref(&self) -> &W {
        &self.io
    }
}
