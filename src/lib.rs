//! # wsengine - WebSocket protocol engine
//!
//! `wsengine` is an RFC 6455 protocol engine for already-handshaken
//! streams: frame codec, permessage-deflate (RFC 7692), a connection state
//! machine with sync and async send paths, a bounded async work queue, a
//! tiered buffer pool and a multi-connection broadcaster.
//!
//! The HTTP upgrade itself is out of scope; hand the engine any stream
//! that has completed it.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use wsengine::{Config, Connection, Message, Role};
//!
//! let mut conn = Connection::new(stream, Role::Client, Config::client());
//! conn.send(Message::text("hello")).await?;
//! while let Some(msg) = conn.recv().await? {
//!     println!("got {msg:?}");
//! }
//! ```

mod log;

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod pool;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod broadcast;
#[cfg(feature = "async-tokio")]
pub mod codec;
#[cfg(feature = "compression")]
pub mod deflate;
#[cfg(feature = "async-tokio")]
pub mod queue;

pub use config::{Config, DispatchMode, Limits};
#[cfg(feature = "async-tokio")]
pub use connection::{BroadcastTarget, Connection};
pub use connection::{ConnectionState, MessageFragmenter, Role};
pub use error::{Error, Result};
pub use handler::EventHandler;
pub use message::{CloseCode, CloseFrame, Message};
pub use pool::{BufferPool, PooledBuf};
pub use protocol::{Frame, OpCode};

#[cfg(feature = "async-tokio")]
pub use broadcast::Broadcaster;
#[cfg(feature = "async-tokio")]
pub use codec::{FrameReader, FrameWriter};
#[cfg(feature = "compression")]
pub use deflate::{ContextPool, DeflateConfig, DeflateParams, negotiate};
#[cfg(feature = "async-tokio")]
pub use queue::{QueueSlot, WorkQueue};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<Config>();
        assert_send::<Limits>();
        assert_send::<Message>();
        assert_send::<CloseCode>();
        assert_send::<CloseFrame>();
        assert_send::<ConnectionState>();
        assert_send::<Role>();
        assert_send::<BufferPool>();
        assert_send::<PooledBuf>();
        #[cfg(feature = "async-tokio")]
        assert_send::<WorkQueue>();
        #[cfg(feature = "async-tokio")]
        assert_send::<Broadcaster>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<Config>();
        assert_sync::<Limits>();
        assert_sync::<Message>();
        assert_sync::<CloseCode>();
        assert_sync::<CloseFrame>();
        assert_sync::<ConnectionState>();
        assert_sync::<Role>();
        assert_sync::<BufferPool>();
        #[cfg(feature = "async-tokio")]
        assert_sync::<WorkQueue>();
    }
}
