//! Connection lifecycle.
//!
//! The state only moves forward: `Open` to `Closing` to `Closed`. There is
//! no way back, which is what makes teardown idempotent.

/// Lifecycle state of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Data flows in both directions.
    #[default]
    Open,
    /// A close frame has been sent or received; draining until the
    /// handshake completes.
    Closing,
    /// Fully torn down.
    Closed,
}

impl ConnectionState {
    /// Whether the connection still exists at all.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Data frames may only be sent while fully open.
    #[inline]
    #[must_use]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Frames are still read while closing, to finish the close handshake.
    #[inline]
    #[must_use]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    /// The state after initiating or observing a close. Never moves
    /// backwards.
    #[inline]
    #[must_use]
    pub const fn into_closing(self) -> Self {
        match self {
            ConnectionState::Open => ConnectionState::Closing,
            other => other,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_permissions() {
        let state = ConnectionState::Open;
        assert!(state.is_active());
        assert!(state.can_send());
        assert!(state.can_receive());
    }

    #[test]
    fn test_closing_receives_but_does_not_send() {
        let state = ConnectionState::Closing;
        assert!(state.is_active());
        assert!(!state.can_send());
        assert!(state.can_receive());
    }

    #[test]
    fn test_closed_is_inert() {
        let state = ConnectionState::Closed;
        assert!(!state.is_active());
        assert!(!state.can_send());
        assert!(!state.can_receive());
    }

    #[test]
    fn test_transitions_never_reverse() {
        assert_eq!(ConnectionState::Open.into_closing(), ConnectionState::Closing);
        assert_eq!(
            ConnectionState::Closing.into_closing(),
            ConnectionState::Closing
        );
        assert_eq!(
            ConnectionState::Closed.into_closing(),
            ConnectionState::Closed
        );
    }
}
