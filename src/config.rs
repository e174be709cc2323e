//! Engine configuration.
//!
//! Every knob is an explicit value threaded through construction; nothing is
//! read from the environment or from globals.

/// Size limits enforced on incoming traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame payload in bytes.
    pub max_frame_size: usize,
    /// Maximum size of a complete message in bytes, measured after
    /// decompression for compressed messages.
    pub max_message_size: usize,
    /// Maximum number of fragments per message.
    pub max_fragment_count: usize,
}

impl Limits {
    /// Create limits with explicit values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
        }
    }

    /// Conservative limits for memory-constrained deployments.
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 16,
        }
    }

    /// Effectively unlimited; trust the peer.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            max_frame_size: usize::MAX,
            max_message_size: usize::MAX,
            max_fragment_count: usize::MAX,
        }
    }

    /// Check a frame payload size against the limit.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), (usize, usize)> {
        if size > self.max_frame_size {
            Err((size, self.max_frame_size))
        } else {
            Ok(())
        }
    }

    /// Check an accumulated message size against the limit.
    pub const fn check_message_size(&self, size: usize) -> Result<(), (usize, usize)> {
        if size > self.max_message_size {
            Err((size, self.max_message_size))
        } else {
            Ok(())
        }
    }

    /// Check a fragment count against the limit.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), (usize, usize)> {
        if count > self.max_fragment_count {
            Err((count, self.max_fragment_count))
        } else {
            Ok(())
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
        }
    }
}

/// How received messages are handed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Invoke the handler inline on the read loop. Preserves strict message
    /// order; a slow handler stalls the connection.
    #[default]
    Inline,
    /// Hand messages to a bounded work queue running at most `ceiling`
    /// handler invocations concurrently.
    Parallel {
        /// Maximum concurrent handler invocations.
        ceiling: usize,
    },
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size limits on incoming frames and messages.
    pub limits: Limits,
    /// Maximum fragment payload size for outgoing messages.
    pub fragment_size: usize,
    /// Accept unmasked frames from clients (non-conformant peers).
    pub accept_unmasked_frames: bool,
    /// Validate UTF-8 in incoming text messages.
    ///
    /// With validation off, invalid sequences in text payloads are
    /// replaced with U+FFFD on delivery instead of failing the
    /// connection; the delivered text is then not byte-identical to the
    /// wire payload.
    pub validate_utf8: bool,
    /// Initial read buffer capacity in bytes.
    pub read_buffer_size: usize,
    /// Initial write buffer capacity in bytes.
    pub write_buffer_size: usize,
    /// Outgoing payloads at or above this size are compressed when
    /// compression is negotiated; smaller ones are sent as-is.
    pub compress_min_size: usize,
    /// How inbound messages reach the application handler.
    pub dispatch: DispatchMode,
    /// Capacity of the async write queue. Submissions beyond this fail
    /// with a local, non-fatal error.
    pub write_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            accept_unmasked_frames: false,
            validate_utf8: true,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            compress_min_size: 64,
            dispatch: DispatchMode::Inline,
            write_queue_capacity: 256,
        }
    }
}

impl Config {
    /// Default configuration for a server endpoint.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Default configuration for a client endpoint.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// Set the size limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the outgoing fragment size.
    #[must_use]
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    /// Tolerate unmasked frames from clients.
    #[must_use]
    pub fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Enable or disable UTF-8 validation of text messages.
    ///
    /// Disabled, invalid sequences are substituted with U+FFFD on
    /// delivery rather than rejected.
    #[must_use]
    pub fn with_utf8_validation(mut self, validate: bool) -> Self {
        self.validate_utf8 = validate;
        self
    }

    /// Set the compression size threshold.
    #[must_use]
    pub fn with_compress_min_size(mut self, size: usize) -> Self {
        self.compress_min_size = size;
        self
    }

    /// Set the inbound dispatch mode.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the async write queue capacity.
    #[must_use]
    pub fn with_write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity.max(1);
        self
    }

    /// Set the initial read buffer capacity.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the initial write buffer capacity.
    #[must_use]
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}
