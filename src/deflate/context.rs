//! Raw-DEFLATE transform for message payloads.
//!
//! Each message is deflated with a sync flush and the trailing
//! `00 00 FF FF` marker removed; inflation re-appends the marker before
//! feeding the data back through zlib. With context takeover the LZ77
//! dictionary survives between messages, so compress/decompress calls on
//! one context must happen in wire order.

use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::connection::Role;
use crate::deflate::DeflateParams;
use crate::error::{Error, Result};

/// The sync flush marker stripped from compressed payloads.
pub const SYNC_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

const OUTPUT_CHUNK: usize = 8 * 1024;

/// Per-direction DEFLATE state for one connection.
pub struct CompressionContext {
    compress: Compress,
    decompress: Decompress,
    /// Reset the dictionary before each compressed message.
    compress_reset: bool,
    /// Reset the dictionary after each decompressed message.
    decompress_reset: bool,
}

impl std::fmt::Debug for CompressionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionContext")
            .field("compress_reset", &self.compress_reset)
            .field("decompress_reset", &self.decompress_reset)
            .finish()
    }
}

impl CompressionContext {
    /// Create the context for one endpoint of a negotiated connection.
    ///
    /// The role picks which window and takeover parameters apply to each
    /// direction: a server compresses with the server parameters and
    /// inflates with the client ones, a client the other way around.
    #[must_use]
    pub fn new(params: &DeflateParams, role: Role) -> Self {
        let (out_bits, out_reset, in_bits, in_reset) = match role {
            Role::Server => (
                params.server_max_window_bits,
                params.server_no_context_takeover,
                params.client_max_window_bits,
                params.client_no_context_takeover,
            ),
            Role::Client => (
                params.client_max_window_bits,
                params.client_no_context_takeover,
                params.server_max_window_bits,
                params.server_no_context_takeover,
            ),
        };

        Self {
            compress: Compress::new_with_window_bits(
                Compression::new(params.level),
                false,
                out_bits,
            ),
            decompress: Decompress::new_with_window_bits(false, in_bits),
            compress_reset: out_reset,
            decompress_reset: in_reset,
        }
    }

    /// Compress a whole message payload, returning DEFLATE data with the
    /// sync trailer stripped.
    ///
    /// # Errors
    ///
    /// `Error::Compression` if the backend reports a stream error.
    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if self.compress_reset {
            self.compress.reset();
        }

        let mut output = Vec::with_capacity((payload.len() / 2).max(64));
        self.deflate_all(payload, &mut output)?;
        self.flush_deflate(&mut output)?;
        strip_trailer(&mut output);
        Ok(output)
    }

    /// Inflate a message payload, re-appending the sync trailer first.
    ///
    /// `max_size` bounds the inflated size; crossing it aborts immediately
    /// rather than inflating the rest.
    ///
    /// # Errors
    ///
    /// `Error::Compression` on malformed input, `Error::MessageTooLarge`
    /// when the output crosses `max_size`.
    pub fn decompress(&mut self, payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity((payload.len() * 2).max(64));
        self.inflate_all(payload, &mut output, max_size)?;
        self.inflate_all(&SYNC_TRAILER, &mut output, max_size)?;

        if self.decompress_reset {
            self.decompress.reset(false);
        }
        Ok(output)
    }

    /// Start streaming compression of `payload`, consuming it in
    /// `segment_size` chunks. Pull segments with
    /// [`DeflateStream::next_segment`]; only the current segment's output
    /// is ever held in memory.
    pub fn stream_compress<'a>(
        &'a mut self,
        payload: &'a [u8],
        segment_size: usize,
    ) -> DeflateStream<'a> {
        if self.compress_reset {
            self.compress.reset();
        }
        DeflateStream {
            ctx: self,
            remaining: payload,
            segment_size: segment_size.max(1),
            index: 0,
            done: false,
        }
    }

    fn deflate_all(&mut self, mut input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        while !input.is_empty() {
            if output.len() == output.capacity() {
                output.reserve(OUTPUT_CHUNK);
            }
            let before = self.compress.total_in();
            self.compress
                .compress_vec(input, output, FlushCompress::None)
                .map_err(|e| Error::Compression(e.to_string()))?;
            let consumed = (self.compress.total_in() - before) as usize;
            input = &input[consumed..];
        }
        Ok(())
    }

    fn flush_deflate(&mut self, output: &mut Vec<u8>) -> Result<()> {
        loop {
            if output.len() == output.capacity() {
                output.reserve(OUTPUT_CHUNK);
            }
            let before = self.compress.total_out();
            self.compress
                .compress_vec(&[], output, FlushCompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;
            if self.compress.total_out() == before {
                return Ok(());
            }
        }
    }

    fn inflate_all(
        &mut self,
        mut input: &[u8],
        output: &mut Vec<u8>,
        max_size: usize,
    ) -> Result<()> {
        loop {
            if output.len() > max_size {
                return Err(Error::MessageTooLarge {
                    size: output.len(),
                    max: max_size,
                });
            }
            if output.len() == output.capacity() {
                output.reserve(OUTPUT_CHUNK);
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(input, output, FlushDecompress::None)
                .map_err(|e| Error::Compression(e.to_string()))?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            input = &input[consumed..];

            if status == Status::StreamEnd || (input.is_empty() && produced == 0) {
                if output.len() > max_size {
                    return Err(Error::MessageTooLarge {
                        size: output.len(),
                        max: max_size,
                    });
                }
                return Ok(());
            }
        }
    }
}

/// One piece of a streamed compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position in the stream, starting at 0.
    pub index: usize,
    /// Compressed bytes, possibly empty mid-stream.
    pub data: Bytes,
    /// Set on the last segment, whose data has the trailer stripped.
    pub eos: bool,
}

/// Pull-style streaming compressor over one payload.
pub struct DeflateStream<'a> {
    ctx: &'a mut CompressionContext,
    remaining: &'a [u8],
    segment_size: usize,
    index: usize,
    done: bool,
}

impl DeflateStream<'_> {
    /// Compress the next input chunk and return its segment, or `None`
    /// after the end-of-stream segment has been produced.
    ///
    /// # Errors
    ///
    /// `Error::Compression` if the backend reports a stream error.
    pub fn next_segment(&mut self) -> Result<Option<Segment>> {
        if self.done {
            return Ok(None);
        }

        let take = self.remaining.len().min(self.segment_size);
        let (chunk, rest) = self.remaining.split_at(take);
        self.remaining = rest;

        let mut output = Vec::with_capacity(take / 2 + 16);
        self.ctx.deflate_all(chunk, &mut output)?;

        let eos = self.remaining.is_empty();
        if eos {
            self.ctx.flush_deflate(&mut output)?;
            strip_trailer(&mut output);
            self.done = true;
        }

        let segment = Segment {
            index: self.index,
            data: Bytes::from(output),
            eos,
        };
        self.index += 1;
        Ok(Some(segment))
    }
}

fn strip_trailer(output: &mut Vec<u8>) {
    if output.ends_with(&SYNC_TRAILER) {
        output.truncate(output.len() - SYNC_TRAILER.len());
    }
}
