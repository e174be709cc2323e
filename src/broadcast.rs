//! One message, many connections.
//!
//! A [`Broadcaster`] holds a single data message and prepares at most two
//! wire renditions of it: a plain one, and a compressed one for peers that
//! reset the server dictionary per message. Each rendition is built the
//! first time a matching recipient shows up and shared by every later send,
//! so a thousand-connection fan-out encodes (and compresses) once.
//!
//! The prepared buffers come from a [`BufferPool`] and go back to it only
//! after the last queued send has finished AND the caller has dropped its
//! handle via [`Broadcaster::release`]. In-flight sends are tracked by an
//! atomic count biased by a large constant; `release` subtracts the bias,
//! and whoever brings the count to zero returns the buffers.
//!
//! A `Broadcaster` is a single-caller object: it is not `Clone`, and
//! `release` consumes it, so broadcasting after release is a move error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{BroadcastTarget, MessageFragmenter};
#[cfg(feature = "compression")]
use crate::deflate::{CompressionContext, DeflateParams};
use crate::error::{Error, Result};
use crate::log::warn;
use crate::message::Message;
use crate::pool::BufferPool;
use crate::protocol::OpCode;

/// Initial value of the in-flight count. Holding the bias keeps the
/// buffers alive however many sends complete before `release`.
const BIAS: usize = usize::MAX / 2;

#[derive(Default)]
struct Variants {
    plain: Option<Bytes>,
    compressed: Option<Bytes>,
}

/// State shared with the queued send jobs.
struct SharedFrames {
    pending: AtomicUsize,
    variants: Mutex<Variants>,
    pool: BufferPool,
}

impl SharedFrames {
    /// One queued send finished.
    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.reclaim();
        }
    }

    /// Hand the prepared buffers back to the pool. Runs exactly once, by
    /// whoever brought the count to zero.
    fn reclaim(&self) {
        let (plain, compressed) = match self.variants.lock() {
            Ok(mut variants) => (variants.plain.take(), variants.compressed.take()),
            Err(poisoned) => {
                let mut variants = poisoned.into_inner();
                (variants.plain.take(), variants.compressed.take())
            }
        };
        if let Some(bytes) = plain {
            self.pool.reclaim(bytes);
        }
        if let Some(bytes) = compressed {
            self.pool.reclaim(bytes);
        }
    }
}

/// Fans one data message out to any number of connections.
pub struct Broadcaster {
    shared: Arc<SharedFrames>,
    opcode: OpCode,
    payload: Bytes,
    fragment_size: usize,
    #[cfg(feature = "compression")]
    deflate: Option<DeflateParams>,
}

impl Broadcaster {
    /// Prepare a broadcast of `message`, drawing wire buffers from `pool`.
    ///
    /// # Errors
    ///
    /// `Error::ProtocolViolation` for control messages; only text and
    /// binary messages can be broadcast.
    pub fn new(message: Message, pool: BufferPool) -> Result<Self> {
        let opcode = match &message {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            _ => {
                return Err(Error::ProtocolViolation(
                    "only data messages can be broadcast".into(),
                ));
            }
        };
        Ok(Self {
            shared: Arc::new(SharedFrames {
                pending: AtomicUsize::new(BIAS),
                variants: Mutex::new(Variants::default()),
                pool,
            }),
            opcode,
            payload: message.into_bytes(),
            fragment_size: 16 * 1024,
            #[cfg(feature = "compression")]
            deflate: None,
        })
    }

    /// Enable the compressed rendition, built with `params`.
    ///
    /// Every recipient that reports [`BroadcastTarget::accepts_compressed`]
    /// must have negotiated these same parameters; the rendition is
    /// compressed once with a fresh dictionary, which only per-message-reset
    /// peers can inflate.
    #[cfg(feature = "compression")]
    #[must_use]
    pub fn with_deflate(mut self, params: DeflateParams) -> Self {
        self.deflate = Some(params);
        self
    }

    /// Override the outgoing fragment size (clamped to at least 1).
    #[must_use]
    pub fn with_fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size.max(1);
        self
    }

    /// Queue a send of the shared message on one connection.
    ///
    /// Builds and memoizes the matching rendition on first sight, then
    /// pushes a job onto the connection's write queue. Returns as soon as
    /// the job is accepted.
    ///
    /// # Errors
    ///
    /// `Error::QueueFull` when that connection's write queue is at
    /// capacity; the rejection is local to that recipient.
    pub fn broadcast<T>(&self, target: &BroadcastTarget<T>) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        #[cfg(feature = "compression")]
        let wire = if target.accepts_compressed() {
            self.compressed_wire()?
        } else {
            self.plain_wire()
        };
        #[cfg(not(feature = "compression"))]
        let wire = self.plain_wire();

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let shared = Arc::clone(&self.shared);
        let writer = Arc::clone(&target.writer);
        let flags = Arc::clone(&target.flags);
        let pushed = target.queue.push(async move {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write_raw(&wire).await {
                warn!("broadcast write failed: {e}");
                flags.mark_write_failed();
            }
            drop(writer);
            drop(wire);
            shared.finish();
        });
        if pushed.is_err() {
            // The bias is still held, so this cannot reach zero.
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
        }
        pushed
    }

    /// Drop the caller's hold on the prepared buffers.
    ///
    /// Once every queued send has also finished, the buffers go back to
    /// the pool. Consumes the broadcaster.
    pub fn release(self) {
        if self.shared.pending.fetch_sub(BIAS, Ordering::AcqRel) == BIAS {
            self.shared.reclaim();
        }
    }

    /// Queued sends not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire).wrapping_sub(BIAS)
    }

    fn plain_wire(&self) -> Bytes {
        let mut variants = match self.shared.variants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(wire) = &variants.plain {
            return wire.clone();
        }
        let wire = self.encode_rendition(&self.payload, false);
        variants.plain = Some(wire.clone());
        wire
    }

    #[cfg(feature = "compression")]
    fn compressed_wire(&self) -> Result<Bytes> {
        let Some(params) = self.deflate else {
            return Ok(self.plain_wire());
        };
        let mut variants = match self.shared.variants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(wire) = &variants.compressed {
            return Ok(wire.clone());
        }
        let mut ctx = CompressionContext::new(&params, crate::connection::Role::Server);
        let deflated = ctx.compress(&self.payload)?;
        let wire = self.encode_rendition(&deflated, true);
        variants.compressed = Some(wire.clone());
        Ok(wire)
    }

    /// Serialize one rendition into a pool buffer. Broadcast frames are
    /// unmasked (server to client).
    fn encode_rendition(&self, payload: &[u8], compressed: bool) -> Bytes {
        let mut buf = self.shared.pool.get(payload.len() + 64);
        let fragments = if compressed {
            MessageFragmenter::compressed(payload, self.opcode, self.fragment_size)
        } else {
            MessageFragmenter::new(payload, self.opcode, self.fragment_size)
        };
        for frame in fragments {
            frame.write(&mut buf, None);
        }
        buf.freeze()
    }
}
