//! permessage-deflate extension (RFC 7692).
//!
//! Covers parameter negotiation plus the raw-DEFLATE transform applied to
//! message payloads. Frames of a compressed message travel with RSV1 set on
//! the first frame and the 4-byte sync flush trailer stripped.

mod context;
mod pool;

pub use context::{CompressionContext, DeflateStream, Segment, SYNC_TRAILER};
pub use pool::{ContextPool, PooledContext};

use crate::error::{Error, Result};

/// Smallest window accepted by the zlib backend. Offers of 8 are clamped
/// up to this.
pub const MIN_WINDOW_BITS: u8 = 9;

/// Largest (and default) LZ77 window exponent.
pub const MAX_WINDOW_BITS: u8 = 15;

/// Local permessage-deflate preferences, used to build an offer (client) or
/// to answer one (server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateConfig {
    /// DEFLATE compression level, 1 (fastest) to 9 (best). Default 6.
    pub level: u32,
    /// Ask the server to reset its dictionary after every message.
    pub server_no_context_takeover: bool,
    /// Reset our client-side dictionary after every message.
    pub client_no_context_takeover: bool,
    /// Largest window exponent we accept for server-compressed data.
    pub server_max_window_bits: u8,
    /// Largest window exponent we use for client-compressed data.
    pub client_max_window_bits: u8,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            level: 6,
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: MAX_WINDOW_BITS,
        }
    }
}

/// A client's `permessage-deflate` offer as sent in
/// `Sec-WebSocket-Extensions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeflateOffer {
    /// `server_no_context_takeover` requested.
    pub server_no_context_takeover: bool,
    /// `client_no_context_takeover` requested.
    pub client_no_context_takeover: bool,
    /// `server_max_window_bits=N`.
    pub server_max_window_bits: Option<u8>,
    /// `client_max_window_bits`, with or without a value. `Some(None)`
    /// means the client lets the server pick.
    pub client_max_window_bits: Option<Option<u8>>,
}

impl DeflateOffer {
    /// Parse the parameter list following `permessage-deflate` in an
    /// extension header entry, e.g.
    /// `server_no_context_takeover; client_max_window_bits=10`.
    ///
    /// # Errors
    ///
    /// Unknown parameters, duplicate parameters and out-of-range window
    /// bits fail negotiation.
    pub fn parse(params: &str) -> Result<Self> {
        let mut offer = Self::default();
        let mut seen = [false; 4];

        for param in params.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (name, value) = match param.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
                None => (param, None),
            };

            let slot = match name {
                "server_no_context_takeover" => 0,
                "client_no_context_takeover" => 1,
                "server_max_window_bits" => 2,
                "client_max_window_bits" => 3,
                other => {
                    return Err(Error::NegotiationFailed(format!(
                        "unknown parameter: {other}"
                    )));
                }
            };
            if seen[slot] {
                return Err(Error::NegotiationFailed(format!(
                    "duplicate parameter: {name}"
                )));
            }
            seen[slot] = true;

            match (slot, value) {
                (0, None) => offer.server_no_context_takeover = true,
                (1, None) => offer.client_no_context_takeover = true,
                (2, Some(v)) => offer.server_max_window_bits = Some(parse_window_bits(v)?),
                (3, None) => offer.client_max_window_bits = Some(None),
                (3, Some(v)) => {
                    offer.client_max_window_bits = Some(Some(parse_window_bits(v)?));
                }
                _ => {
                    return Err(Error::NegotiationFailed(format!(
                        "malformed parameter: {param}"
                    )));
                }
            }
        }
        Ok(offer)
    }

    /// Render this offer as the value of a `Sec-WebSocket-Extensions`
    /// header entry.
    #[must_use]
    pub fn to_header(&self) -> String {
        let mut header = String::from("permessage-deflate");
        if self.server_no_context_takeover {
            header.push_str("; server_no_context_takeover");
        }
        if self.client_no_context_takeover {
            header.push_str("; client_no_context_takeover");
        }
        if let Some(bits) = self.server_max_window_bits {
            header.push_str(&format!("; server_max_window_bits={bits}"));
        }
        match self.client_max_window_bits {
            Some(None) => header.push_str("; client_max_window_bits"),
            Some(Some(bits)) => {
                header.push_str(&format!("; client_max_window_bits={bits}"));
            }
            None => {}
        }
        header
    }
}

/// Build the offer a client should send for the given preferences.
#[must_use]
pub fn client_offer(config: &DeflateConfig) -> DeflateOffer {
    DeflateOffer {
        server_no_context_takeover: config.server_no_context_takeover,
        client_no_context_takeover: config.client_no_context_takeover,
        server_max_window_bits: (config.server_max_window_bits < MAX_WINDOW_BITS)
            .then_some(config.server_max_window_bits),
        // Always advertised so the server may lower it.
        client_max_window_bits: Some(
            (config.client_max_window_bits < MAX_WINDOW_BITS)
                .then_some(config.client_max_window_bits),
        ),
    }
}

fn parse_window_bits(value: &str) -> Result<u8> {
    let bits: u8 = value
        .parse()
        .map_err(|_| Error::NegotiationFailed(format!("bad window bits: {value}")))?;
    if !(8..=15).contains(&bits) {
        return Err(Error::NegotiationFailed(format!(
            "window bits out of range: {bits}"
        )));
    }
    // The zlib backend cannot produce 256-byte windows.
    Ok(bits.max(MIN_WINDOW_BITS))
}

/// The parameter set both sides agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateParams {
    /// DEFLATE compression level for locally compressed data.
    pub level: u32,
    /// Server resets its dictionary after each message.
    pub server_no_context_takeover: bool,
    /// Client resets its dictionary after each message.
    pub client_no_context_takeover: bool,
    /// Window exponent for server-compressed data.
    pub server_max_window_bits: u8,
    /// Window exponent for client-compressed data.
    pub client_max_window_bits: u8,
}

impl DeflateParams {
    /// Render the server's acceptance as the value of a
    /// `Sec-WebSocket-Extensions` header entry.
    #[must_use]
    pub fn response_header(&self) -> String {
        let mut header = String::from("permessage-deflate");
        if self.server_no_context_takeover {
            header.push_str("; server_no_context_takeover");
        }
        if self.client_no_context_takeover {
            header.push_str("; client_no_context_takeover");
        }
        if self.server_max_window_bits < MAX_WINDOW_BITS {
            header.push_str(&format!(
                "; server_max_window_bits={}",
                self.server_max_window_bits
            ));
        }
        if self.client_max_window_bits < MAX_WINDOW_BITS {
            header.push_str(&format!(
                "; client_max_window_bits={}",
                self.client_max_window_bits
            ));
        }
        header
    }
}

/// Resolve a client offer against server preferences.
///
/// Same inputs always give the same answer. Window sizes resolve to the
/// smaller of what the client asked for and what the server allows; the
/// no-context-takeover flags turn on when either side wants them.
///
/// # Errors
///
/// `Error::NegotiationFailed` when the server needs a smaller client
/// window than the client made negotiable.
pub fn negotiate(config: &DeflateConfig, offer: &DeflateOffer) -> Result<DeflateParams> {
    let server_max_window_bits = offer
        .server_max_window_bits
        .unwrap_or(MAX_WINDOW_BITS)
        .min(config.server_max_window_bits);

    let client_max_window_bits = match offer.client_max_window_bits {
        Some(Some(bits)) => bits.min(config.client_max_window_bits),
        Some(None) => config.client_max_window_bits,
        None => {
            if config.client_max_window_bits < MAX_WINDOW_BITS {
                return Err(Error::NegotiationFailed(
                    "client did not offer client_max_window_bits".into(),
                ));
            }
            MAX_WINDOW_BITS
        }
    };

    Ok(DeflateParams {
        level: config.level,
        server_no_context_takeover: config.server_no_context_takeover
            || offer.server_no_context_takeover,
        client_no_context_takeover: config.client_no_context_takeover
            || offer.client_no_context_takeover,
        server_max_window_bits,
        client_max_window_bits,
    })
}
