//! Application callback surface.

use crate::error::Error;
use crate::message::{CloseCode, Message};

/// Callbacks the connection driver invokes as traffic arrives.
///
/// Every method has a no-op default, so handlers implement only what they
/// care about. `on_close` runs exactly once per connection no matter how
/// the connection ends; `on_message` may run concurrently when parallel
/// dispatch is configured, the rest always run on the read loop.
pub trait EventHandler: Send + Sync {
    /// The connection driver has started.
    fn on_open(&self) {}

    /// A complete data message arrived, reassembled and decompressed.
    fn on_message(&self, message: Message) {
        let _ = message;
    }

    /// A ping arrived. The pong has already been sent automatically.
    fn on_ping(&self, payload: &[u8]) {
        let _ = payload;
    }

    /// A pong arrived.
    fn on_pong(&self, payload: &[u8]) {
        let _ = payload;
    }

    /// The connection is done. `code` is what went over the wire, or a
    /// local code (1006) when the transport died without a close frame.
    fn on_close(&self, code: CloseCode, reason: &str) {
        let _ = (code, reason);
    }

    /// A fatal error is tearing the connection down. Runs before
    /// `on_close`.
    fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

/// Ignores everything; useful when only the send side matters.
impl EventHandler for () {}
