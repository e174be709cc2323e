//! Incremental UTF-8 validation for text messages.
//!
//! Fragment boundaries can split a multi-byte scalar, so the validator
//! carries up to three pending bytes between calls and stitches them onto
//! the next fragment before checking.

use crate::error::{Error, Result};

/// Expected total length of the UTF-8 sequence starting with `lead`.
fn sequence_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

/// Streaming UTF-8 validator.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    /// Pending bytes of a scalar cut by a fragment boundary.
    incomplete: [u8; 4],
    incomplete_len: usize,
}

impl Utf8Validator {
    /// Create a validator with no pending state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next fragment of a text message.
    ///
    /// With `is_final` false, a scalar cut at the end of `data` is held back
    /// and rechecked on the next call. With `is_final` true the message ends
    /// here and any trailing partial scalar is an error.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUtf8` on any malformed sequence.
    pub fn validate(&mut self, data: &[u8], is_final: bool) -> Result<()> {
        let data = if self.incomplete_len > 0 {
            self.resume_pending(data, is_final)?
        } else {
            data
        };

        match std::str::from_utf8(data) {
            Ok(_) => Ok(()),
            Err(e) => {
                // error_len() is None only for a sequence truncated by the
                // end of the input, which is fine mid-message.
                if !is_final && e.error_len().is_none() {
                    let tail = &data[e.valid_up_to()..];
                    self.incomplete[..tail.len()].copy_from_slice(tail);
                    self.incomplete_len = tail.len();
                    Ok(())
                } else {
                    Err(Error::InvalidUtf8)
                }
            }
        }
    }

    /// Finish the scalar held over from the previous fragment and return
    /// the rest of `data` for normal validation.
    fn resume_pending<'a>(&mut self, data: &'a [u8], is_final: bool) -> Result<&'a [u8]> {
        let expected = sequence_len(self.incomplete[0]);
        let missing = expected - self.incomplete_len;
        let take = missing.min(data.len());

        self.incomplete[self.incomplete_len..self.incomplete_len + take]
            .copy_from_slice(&data[..take]);
        self.incomplete_len += take;

        if self.incomplete_len < expected {
            // Still cut short. Legal only if the message continues.
            if is_final {
                return Err(Error::InvalidUtf8);
            }
            return Ok(&[]);
        }

        let len = self.incomplete_len;
        self.incomplete_len = 0;
        std::str::from_utf8(&self.incomplete[..len])?;
        Ok(&data[take..])
    }

    /// Discard any pending partial scalar.
    pub fn reset(&mut self) {
        self.incomplete_len = 0;
    }

    /// Whether a partial scalar is being carried to the next fragment.
    #[must_use]
    pub fn has_incomplete(&self) -> bool {
        self.incomplete_len > 0
    }
}

/// One-shot validation for unfragmented text.
///
/// # Errors
///
/// `Error::InvalidUtf8` if `data` is not valid UTF-8.
pub fn validate_utf8(data: &[u8]) -> Result<()> {
    std::str::from_utf8(data).map(|_| ()).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_fragments() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"Hello, World!", true).is_ok());
        assert!(validator.validate("こんにちは".as_bytes(), true).is_ok());
        assert!(validator.validate("mixed 世界 🌍".as_bytes(), true).is_ok());
    }

    #[test]
    fn test_malformed_sequences() {
        let mut validator = Utf8Validator::new();
        // Stray continuation byte.
        assert!(validator.validate(&[0x80], true).is_err());
        validator.reset();
        // Overlong encoding of NUL.
        assert!(validator.validate(&[0xC0, 0x80], true).is_err());
        validator.reset();
        // 0xFF can never appear.
        assert!(validator.validate(&[0xFF], true).is_err());
        validator.reset();
        // Bad byte in the middle of otherwise valid data.
        assert!(validator.validate(&[0x48, 0x65, 0x80, 0x6C], false).is_err());
    }

    #[test]
    fn test_scalar_split_across_fragments() {
        // Euro sign: E2 82 AC.
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xE2], false).is_ok());
        assert!(validator.has_incomplete());
        assert!(validator.validate(&[0x82, 0xAC], true).is_ok());
        assert!(!validator.has_incomplete());
    }

    #[test]
    fn test_four_byte_scalar_split_three_ways() {
        // 🎉 = F0 9F 8E 89.
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xF0], false).is_ok());
        assert!(validator.validate(&[0x9F], false).is_ok());
        assert!(validator.validate(&[0x8E, 0x89], true).is_ok());
    }

    #[test]
    fn test_split_with_trailing_data() {
        // Finish the pending scalar, then keep validating the rest.
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xE2, 0x82], false).is_ok());
        assert!(validator.validate(&[0xAC, b'o', b'k'], true).is_ok());
    }

    #[test]
    fn test_truncated_final_fragment_fails() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xE2], true).is_err());

        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xE2], false).is_ok());
        assert!(validator.validate(&[], true).is_err());
    }

    #[test]
    fn test_empty_fragments_preserve_state() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[], false).is_ok());
        assert!(validator.validate(&[0xE2], false).is_ok());
        assert!(validator.validate(&[], false).is_ok());
        assert!(validator.has_incomplete());
        assert!(validator.validate(&[0x82, 0xAC], true).is_ok());
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xE2], false).is_ok());
        validator.reset();
        assert!(!validator.has_incomplete());
        assert!(validator.validate(b"fresh", true).is_ok());
    }

    #[test]
    fn test_invalid_resumed_sequence() {
        // Lead byte promises 3 bytes; the continuation is invalid.
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xE2], false).is_ok());
        assert!(validator.validate(&[0x41, 0x41], true).is_err());
    }

    #[test]
    fn test_one_shot_helper() {
        assert!(validate_utf8(b"plain ascii").is_ok());
        assert!(validate_utf8("émoji 🎉".as_bytes()).is_ok());
        assert!(validate_utf8(&[0x80]).is_err());
    }
}
