//! Connection lifecycle and driver.
//!
//! A connection moves one way through three states: **Open** after the
//! handshake, **Closing** once a close frame has been sent, **Closed** when
//! the handshake completes or the transport dies. The async driver lives in
//! the `connection` submodule; [`Role`], [`ConnectionState`] and the
//! outgoing [`MessageFragmenter`] are usable without a runtime.

mod fragmenter;
mod role;
mod state;

pub use fragmenter::MessageFragmenter;
pub use role::Role;
pub use state::ConnectionState;

#[cfg(feature = "async-tokio")]
#[allow(clippy::module_inception)]
mod connection;

#[cfg(feature = "async-tokio")]
pub use connection::{BroadcastTarget, Connection};
