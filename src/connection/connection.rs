//! Established-connection driver.
//!
//! The stream is split so the read loop owns the reader half while the
//! writer half sits behind a shared async lock. Synchronous sends hold that
//! lock for the whole message; asynchronous sends encode up front and hand
//! the finished wire bytes to a single-worker queue, so frames reach the
//! wire in submission order either way. Teardown is one-way and idempotent:
//! whatever races to close, the close frame goes out at most once and
//! `on_close` fires exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf, split};
use tokio::sync::Mutex as AsyncMutex;

use crate::codec::{FrameReader, FrameWriter, MaskGenerator, encode_frame};
use crate::config::{Config, DispatchMode};
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::{ConnectionState, Role};
#[cfg(feature = "compression")]
use crate::deflate::{CompressionContext, ContextPool, DeflateParams};
use crate::error::{Error, Result};
use crate::handler::EventHandler;
use crate::log::{debug, warn};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::validation::FrameValidator;
use crate::protocol::{Frame, MessageAssembler, OpCode, validate_utf8};
use crate::queue::{QueueSlot, WorkQueue};

/// Flags shared between the connection, its write jobs and anything
/// holding a broadcast handle.
#[derive(Debug, Default)]
pub(crate) struct ConnFlags {
    /// A close frame has been sent (or is no longer allowed).
    close_sent: AtomicBool,
    /// `on_close` has fired.
    close_done: AtomicBool,
    /// A queued write hit an I/O error; the connection is dead.
    write_failed: AtomicBool,
}

impl ConnFlags {
    pub(crate) fn mark_write_failed(&self) {
        self.write_failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn write_failed(&self) -> bool {
        self.write_failed.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "compression")]
enum DeflateDriver {
    /// Connection-scoped context; required once either direction keeps its
    /// dictionary between messages.
    Dedicated(Box<CompressionContext>),
    /// Borrow a fungible context per message from a process-wide pool.
    Pooled(ContextPool),
}

#[cfg(feature = "compression")]
struct DeflateState {
    params: DeflateParams,
    driver: DeflateDriver,
}

#[cfg(feature = "compression")]
impl DeflateState {
    fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        match &mut self.driver {
            DeflateDriver::Dedicated(ctx) => ctx.compress(payload),
            DeflateDriver::Pooled(pool) => pool.acquire().compress(payload),
        }
    }

    fn decompress(&mut self, payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
        match &mut self.driver {
            DeflateDriver::Dedicated(ctx) => ctx.decompress(payload, max_size),
            DeflateDriver::Pooled(pool) => pool.acquire().decompress(payload, max_size),
        }
    }
}

/// Type-erased write access for the broadcaster: the shared writer half,
/// the connection's write queue and whether pre-compressed broadcast
/// frames are safe for this peer.
pub struct BroadcastTarget<T> {
    pub(crate) writer: Arc<AsyncMutex<FrameWriter<WriteHalf<T>>>>,
    pub(crate) queue: WorkQueue,
    pub(crate) flags: Arc<ConnFlags>,
    pub(crate) accepts_compressed: bool,
}

impl<T> Clone for BroadcastTarget<T> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            queue: self.queue.clone(),
            flags: Arc::clone(&self.flags),
            accepts_compressed: self.accepts_compressed,
        }
    }
}

impl<T> BroadcastTarget<T> {
    /// Whether this peer can take frames compressed outside its
    /// connection context.
    #[must_use]
    pub fn accepts_compressed(&self) -> bool {
        self.accepts_compressed
    }

    /// The connection's write queue. Useful for awaiting queued sends.
    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }
}

/// An established WebSocket connection over any async byte stream.
pub struct Connection<T> {
    reader: FrameReader<ReadHalf<T>>,
    writer: Arc<AsyncMutex<FrameWriter<WriteHalf<T>>>>,
    write_queue: WorkQueue,
    flags: Arc<ConnFlags>,
    assembler: MessageAssembler,
    /// Mask sequence for the async encode path; the writer half keeps its
    /// own for direct writes.
    mask: MaskGenerator,
    state: ConnectionState,
    role: Role,
    config: Config,
    #[cfg(feature = "compression")]
    deflate: Option<DeflateState>,
}

impl<T: AsyncRead + AsyncWrite + Send + 'static> Connection<T> {
    /// Wrap an already-handshaken stream without compression.
    #[must_use]
    pub fn new(io: T, role: Role, config: Config) -> Self {
        Self::build(io, role, config, false)
    }

    /// Wrap a stream whose handshake negotiated permessage-deflate.
    ///
    /// The connection owns a dedicated compression context, which is the
    /// only correct choice when either direction keeps its dictionary.
    #[cfg(feature = "compression")]
    #[must_use]
    pub fn with_deflate(io: T, role: Role, config: Config, params: DeflateParams) -> Self {
        let ctx = CompressionContext::new(&params, role);
        let mut conn = Self::build(io, role, config, true);
        conn.deflate = Some(DeflateState {
            params,
            driver: DeflateDriver::Dedicated(Box::new(ctx)),
        });
        conn
    }

    /// Like [`Connection::with_deflate`] but borrowing per-message
    /// contexts from a shared pool. Only valid for connections that
    /// negotiated no-context-takeover in both directions; the pool
    /// enforces that at construction.
    #[cfg(feature = "compression")]
    #[must_use]
    pub fn with_deflate_pool(io: T, role: Role, config: Config, pool: ContextPool) -> Self {
        let params = pool.params();
        let mut conn = Self::build(io, role, config, true);
        conn.deflate = Some(DeflateState {
            params,
            driver: DeflateDriver::Pooled(pool),
        });
        conn
    }

    fn build(io: T, role: Role, config: Config, rsv1_allowed: bool) -> Self {
        let (read_half, write_half) = split(io);

        let validator = FrameValidator::new(role, config.limits)
            .with_accept_unmasked(config.accept_unmasked_frames)
            .with_rsv1_allowed(rsv1_allowed);

        Self {
            reader: FrameReader::new(read_half, validator, config.read_buffer_size),
            writer: Arc::new(AsyncMutex::new(FrameWriter::new(
                write_half,
                role,
                config.write_buffer_size,
            ))),
            write_queue: WorkQueue::new(1, config.write_queue_capacity),
            flags: Arc::new(ConnFlags::default()),
            assembler: MessageAssembler::new(config.clone()),
            mask: MaskGenerator::new(),
            state: ConnectionState::Open,
            role,
            config,
            #[cfg(feature = "compression")]
            deflate: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.flags.write_failed() {
            return ConnectionState::Closed;
        }
        self.state
    }

    /// Fail fast once a queued write has already lost the transport.
    fn check_write_health(&mut self) -> Result<()> {
        if self.flags.write_failed() {
            self.state = ConnectionState::Closed;
            return Err(Error::ConnectionClosed(None));
        }
        Ok(())
    }

    /// This endpoint's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether permessage-deflate was negotiated.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        #[cfg(feature = "compression")]
        {
            self.deflate.is_some()
        }
        #[cfg(not(feature = "compression"))]
        {
            false
        }
    }

    /// Write access for [`crate::broadcast::Broadcaster`]. Broadcast
    /// frames are prepared unmasked, so only server-role connections
    /// qualify.
    ///
    /// # Errors
    ///
    /// `Error::ProtocolViolation` for client-role connections.
    pub fn broadcast_target(&self) -> Result<BroadcastTarget<T>> {
        if self.role != Role::Server {
            return Err(Error::ProtocolViolation(
                "broadcast frames are unmasked and require the server role".into(),
            ));
        }
        #[cfg(feature = "compression")]
        let accepts_compressed = self
            .deflate
            .as_ref()
            .is_some_and(|d| d.params.server_no_context_takeover);
        #[cfg(not(feature = "compression"))]
        let accepts_compressed = false;

        Ok(BroadcastTarget {
            writer: Arc::clone(&self.writer),
            queue: self.write_queue.clone(),
            flags: Arc::clone(&self.flags),
            accepts_compressed,
        })
    }

    /// Compress when negotiated and worth it; returns the payload to send
    /// and whether RSV1 goes on the first frame.
    fn prepare_payload(&mut self, payload: Bytes) -> Result<(Bytes, bool)> {
        #[cfg(feature = "compression")]
        if payload.len() >= self.config.compress_min_size {
            if let Some(deflate) = &mut self.deflate {
                let compressed = deflate.compress(&payload)?;
                return Ok((Bytes::from(compressed), true));
            }
        }
        Ok((payload, false))
    }

    fn data_frames(
        payload: &[u8],
        opcode: OpCode,
        compressed: bool,
        fragment_size: usize,
    ) -> MessageFragmenter<'_> {
        if compressed {
            MessageFragmenter::compressed(payload, opcode, fragment_size)
        } else {
            MessageFragmenter::new(payload, opcode, fragment_size)
        }
    }

    /// Send a message, returning once it is flushed to the stream.
    ///
    /// Waits for queued asynchronous writes first so the wire order always
    /// matches the submission order across both send paths.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` after close, otherwise compression or
    /// I/O failures.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.check_write_health()?;
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed(None));
        }

        match message {
            Message::Close(frame) => {
                let frame = frame.unwrap_or_else(CloseFrame::normal);
                return self.close(frame.code, &frame.reason).await;
            }
            Message::Ping(payload) => {
                return self.write_control(Frame::ping(payload)).await;
            }
            Message::Pong(payload) => {
                return self.write_control(Frame::pong(payload)).await;
            }
            _ => {}
        }

        let opcode = if message.is_text() {
            OpCode::Text
        } else {
            OpCode::Binary
        };
        let payload = message.into_bytes();

        #[cfg(feature = "compression")]
        if self.wants_streaming(payload.len()) {
            return self.send_streamed(opcode, payload).await;
        }

        let (payload, compressed) = self.prepare_payload(payload)?;

        self.write_queue.wait_idle().await;
        let mut writer = self.writer.lock().await;
        for frame in Self::data_frames(&payload, opcode, compressed, self.config.fragment_size) {
            writer.feed_frame(&frame);
        }
        writer.flush().await
    }

    /// Whether a payload is big enough that compressing it whole would
    /// buffer more than one fragment of output.
    #[cfg(feature = "compression")]
    fn wants_streaming(&self, payload_len: usize) -> bool {
        self.deflate.is_some()
            && payload_len >= self.config.compress_min_size
            && payload_len > self.config.fragment_size
    }

    /// Compress and write one fragment at a time, so a multi-megabyte
    /// message never holds its whole compressed form in memory.
    #[cfg(feature = "compression")]
    async fn send_streamed(&mut self, opcode: OpCode, payload: Bytes) -> Result<()> {
        self.write_queue.wait_idle().await;
        let writer = Arc::clone(&self.writer);
        let mut writer = writer.lock().await;

        let fragment_size = self.config.fragment_size;
        let Some(deflate) = self.deflate.as_mut() else {
            return Err(Error::CompressionNotNegotiated);
        };
        let mut pooled;
        let ctx = match &mut deflate.driver {
            DeflateDriver::Dedicated(ctx) => ctx.as_mut(),
            DeflateDriver::Pooled(pool) => {
                pooled = pool.acquire();
                &mut *pooled
            }
        };

        let mut stream = ctx.stream_compress(&payload, fragment_size);
        let mut first = true;
        while let Some(segment) = stream.next_segment()? {
            let frame = if first {
                Frame::compressed(segment.eos, opcode, segment.data)
            } else {
                Frame::new(segment.eos, OpCode::Continuation, segment.data)
            };
            first = false;
            writer.write_frame(&frame).await?;
        }
        Ok(())
    }

    /// Encode a message now and queue the actual write, returning as soon
    /// as the job is accepted.
    ///
    /// # Errors
    ///
    /// `Error::QueueFull` when the write queue is at capacity; the message
    /// was not encoded and the connection is unaffected.
    pub async fn send_async(&mut self, message: Message) -> Result<()> {
        self.check_write_health()?;
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed(None));
        }
        // The queue slot is claimed before compressing, so a rejected
        // submission cannot have advanced the shared dictionary even when
        // a broadcaster fills the queue concurrently.
        let slot = self.write_queue.reserve()?;

        let opcode = match message {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Close(close) => {
                // Closing is stateful; it always goes through the
                // handshake path. The unused slot releases itself.
                drop(slot);
                let frame = close.unwrap_or_else(CloseFrame::normal);
                return self.close(frame.code, &frame.reason).await;
            }
            control @ (Message::Ping(_) | Message::Pong(_)) => {
                let frame = Frame::from(control);
                frame.validate()?;
                let wire = encode_frame(&frame, self.next_mask());
                self.enqueue_wire(slot, vec![wire]);
                return Ok(());
            }
        };

        let payload = message.into_bytes();

        #[cfg(feature = "compression")]
        if self.wants_streaming(payload.len()) {
            let wires = self.encode_streamed(opcode, &payload)?;
            self.enqueue_wire(slot, wires);
            return Ok(());
        }

        // Frames are encoded here, without touching the writer lock: a
        // queued job may be holding it mid-write and submission must not
        // block behind the wire.
        let (payload, compressed) = self.prepare_payload(payload)?;
        let fragment_size = self.config.fragment_size;
        let frames: Vec<Frame> =
            Self::data_frames(&payload, opcode, compressed, fragment_size).collect();
        let wires: Vec<Bytes> = frames
            .iter()
            .map(|frame| encode_frame(frame, self.next_mask()))
            .collect();
        self.enqueue_wire(slot, wires);
        Ok(())
    }

    /// Segment-compress a payload into ready-to-queue wire frames.
    #[cfg(feature = "compression")]
    fn encode_streamed(&mut self, opcode: OpCode, payload: &[u8]) -> Result<Vec<Bytes>> {
        let fragment_size = self.config.fragment_size;
        let must_mask = self.role.must_mask();
        let Some(deflate) = self.deflate.as_mut() else {
            return Err(Error::CompressionNotNegotiated);
        };
        let mut pooled;
        let ctx = match &mut deflate.driver {
            DeflateDriver::Dedicated(ctx) => ctx.as_mut(),
            DeflateDriver::Pooled(pool) => {
                pooled = pool.acquire();
                &mut *pooled
            }
        };

        let mut stream = ctx.stream_compress(payload, fragment_size);
        let mut wires = Vec::new();
        let mut first = true;
        while let Some(segment) = stream.next_segment()? {
            let frame = if first {
                Frame::compressed(segment.eos, opcode, segment.data)
            } else {
                Frame::new(segment.eos, OpCode::Continuation, segment.data)
            };
            first = false;
            let mask = must_mask.then(|| self.mask.next_mask());
            wires.push(encode_frame(&frame, mask));
        }
        Ok(wires)
    }

    fn next_mask(&mut self) -> Option<[u8; 4]> {
        self.role.must_mask().then(|| self.mask.next_mask())
    }

    fn enqueue_wire(&self, slot: QueueSlot, wires: Vec<Bytes>) {
        let writer = Arc::clone(&self.writer);
        let flags = Arc::clone(&self.flags);
        slot.submit(async move {
            let mut writer = writer.lock().await;
            for wire in &wires {
                if let Err(e) = writer.write_raw(wire).await {
                    warn!("queued write failed: {e}");
                    flags.mark_write_failed();
                    break;
                }
            }
        });
    }

    async fn write_control(&mut self, frame: Frame) -> Result<()> {
        frame.validate()?;
        let mut writer = self.writer.lock().await;
        writer.write_frame(&frame).await
    }

    /// Receive the next message.
    ///
    /// Control traffic is handled inline: pings are answered before being
    /// surfaced, a peer close is echoed and surfaced once, after which
    /// this returns `Ok(None)` forever.
    ///
    /// # Errors
    ///
    /// Protocol violations, limit overruns, compression failures and I/O
    /// errors. All of them leave the connection unusable.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            if !self.state.can_receive() {
                return Ok(None);
            }
            self.check_write_health()?;

            let frame = match self.reader.read_frame().await {
                Ok(frame) => frame,
                Err(Error::ConnectionClosed(code)) => {
                    self.state = ConnectionState::Closed;
                    return if self.flags.close_sent.load(Ordering::SeqCst) {
                        Ok(None)
                    } else {
                        Err(Error::ConnectionClosed(code))
                    };
                }
                Err(e) => return Err(e),
            };

            match frame.opcode {
                OpCode::Ping => {
                    let payload = frame.payload.into_bytes();
                    let pong = Frame::pong(payload.clone());
                    let mut writer = self.writer.lock().await;
                    writer.write_frame(&pong).await?;
                    drop(writer);
                    return Ok(Some(Message::Ping(payload)));
                }
                OpCode::Pong => {
                    return Ok(Some(Message::Pong(frame.payload.into_bytes())));
                }
                OpCode::Close => {
                    let close_frame = frame.parse_close_payload()?;
                    self.echo_close(close_frame.as_ref()).await?;
                    self.state = ConnectionState::Closed;
                    return Ok(Some(Message::Close(close_frame)));
                }
                _ => {
                    if let Some(assembled) = self.assembler.push(&frame)? {
                        return Ok(Some(self.finish_message(assembled)?));
                    }
                }
            }
        }
    }

    /// Answer the peer's close frame, once.
    async fn echo_close(&mut self, close_frame: Option<&CloseFrame>) -> Result<()> {
        if self.flags.close_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let reply = match close_frame {
            Some(cf) => Frame::close(cf.code, ""),
            None => Frame::new(true, OpCode::Close, Vec::new()),
        };
        let mut writer = self.writer.lock().await;
        writer.write_frame(&reply).await
    }

    fn finish_message(
        &mut self,
        assembled: crate::protocol::AssembledMessage,
    ) -> Result<Message> {
        let payload = if assembled.compressed {
            #[cfg(feature = "compression")]
            {
                let deflate = self
                    .deflate
                    .as_mut()
                    .ok_or(Error::CompressionNotNegotiated)?;
                let max = self.config.limits.max_message_size;
                Bytes::from(deflate.decompress(&assembled.payload, max)?)
            }
            #[cfg(not(feature = "compression"))]
            {
                return Err(Error::CompressionNotNegotiated);
            }
        } else {
            assembled.payload
        };

        match assembled.opcode {
            OpCode::Text => {
                if self.config.validate_utf8 && assembled.compressed {
                    validate_utf8(&payload)?;
                }
                let text = if self.config.validate_utf8 {
                    // Validated above or incrementally during reassembly.
                    String::from_utf8(payload.to_vec()).map_err(|_| Error::InvalidUtf8)?
                } else {
                    String::from_utf8_lossy(&payload).into_owned()
                };
                Ok(Message::Text(text))
            }
            _ => Ok(Message::Binary(payload)),
        }
    }

    /// Initiate (or complete) the close handshake.
    ///
    /// Idempotent: the close frame is written at most once, later calls
    /// are no-ops, and reserved codes are rejected before any state
    /// changes.
    ///
    /// # Errors
    ///
    /// `Error::InvalidCloseCode` for wire-illegal codes, plus I/O errors.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if code.is_reserved() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        if self.flags.write_failed() {
            // The transport is already gone; there is no frame to send.
            self.state = ConnectionState::Closed;
            return Ok(());
        }
        if !self.state.is_active() {
            return Ok(());
        }

        if !self.flags.close_sent.swap(true, Ordering::SeqCst) {
            self.write_queue.wait_idle().await;
            let mut writer = self.writer.lock().await;
            writer.write_frame(&Frame::close(code, reason)).await?;
        }
        self.state = self.state.into_closing();
        debug!("close initiated with code {}", code.as_u16());
        Ok(())
    }

    /// Drive the connection to completion, dispatching traffic to
    /// `handler`.
    ///
    /// `on_close` fires exactly once, whether the peer closed cleanly, the
    /// transport died, or a protocol error forced a teardown. With
    /// parallel dispatch configured, in-flight `on_message` calls finish
    /// before this returns; when the dispatch queue is full a message is
    /// delivered inline instead of being dropped.
    ///
    /// # Errors
    ///
    /// The error that ended the connection, after teardown completes.
    /// Clean closes return `Ok`.
    pub async fn run(&mut self, handler: Arc<dyn EventHandler>) -> Result<()> {
        handler.on_open();

        let dispatch = match self.config.dispatch {
            DispatchMode::Inline => None,
            DispatchMode::Parallel { ceiling } => {
                Some(WorkQueue::new(ceiling, self.config.write_queue_capacity))
            }
        };

        let result = loop {
            match self.recv().await {
                Ok(Some(Message::Ping(payload))) => handler.on_ping(&payload),
                Ok(Some(Message::Pong(payload))) => handler.on_pong(&payload),
                Ok(Some(Message::Close(close_frame))) => {
                    let (code, reason) = match close_frame {
                        Some(cf) => (cf.code, cf.reason),
                        None => (CloseCode::NoStatus, String::new()),
                    };
                    self.fire_close(&handler, code, &reason);
                    break Ok(());
                }
                Ok(Some(message)) => match &dispatch {
                    Some(queue) => {
                        let job_handler = Arc::clone(&handler);
                        let job_message = message.clone();
                        if queue
                            .push(async move { job_handler.on_message(job_message) })
                            .is_err()
                        {
                            handler.on_message(message);
                        }
                    }
                    None => handler.on_message(message),
                },
                Ok(None) => {
                    self.fire_close(&handler, CloseCode::Normal, "");
                    break Ok(());
                }
                Err(e) => {
                    handler.on_error(&e);
                    if let Some(code) = e.close_code() {
                        let _ = self.close(code, "").await;
                    }
                    self.state = ConnectionState::Closed;
                    self.fire_close(&handler, CloseCode::Abnormal, "");
                    break Err(e);
                }
            }
        };

        if let Some(queue) = dispatch {
            queue.wait_idle().await;
        }
        self.write_queue.wait_idle().await;
        result
    }

    /// Invoke `on_close` exactly once.
    fn fire_close(&self, handler: &Arc<dyn EventHandler>, code: CloseCode, reason: &str) {
        if !self.flags.close_done.swap(true, Ordering::SeqCst) {
            handler.on_close(code, reason);
        }
    }

    /// Flush queued writes and shut the write side down.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.write_queue.wait_idle().await;
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        self.state = ConnectionState::Closed;
        Ok(())
    }
}
