//! Incoming-frame validation.
//!
//! Checks run in a fixed order: masking by role, reserved bits against the
//! negotiated extension, then the frame size limit. The first failure wins,
//! which keeps the close code sent to the peer deterministic.

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;

/// Validates incoming frame headers for one connection.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
    /// RSV1 is legal on data frames once permessage-deflate is negotiated.
    rsv1_allowed: bool,
}

impl FrameValidator {
    /// Create a validator for the given role and limits.
    #[must_use]
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
            rsv1_allowed: false,
        }
    }

    /// Tolerate unmasked client frames. Non-conformant; off by default.
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Allow RSV1 on data frames (compression negotiated).
    #[must_use]
    pub fn with_rsv1_allowed(mut self, allowed: bool) -> Self {
        self.rsv1_allowed = allowed;
        self
    }

    /// Validate a parsed header before the payload is touched.
    ///
    /// # Errors
    ///
    /// Masking violations, reserved-bit violations, then `FrameTooLarge`,
    /// in that order.
    pub fn validate_header(&self, header: &FrameHeader) -> Result<()> {
        self.validate_masking(header.mask.is_some())?;
        self.validate_rsv_bits(header.rsv1, header.rsv2, header.rsv3)?;
        self.validate_frame_size(header.payload_len)?;
        Ok(())
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match self.role {
            Role::Server => {
                if !masked && !self.accept_unmasked_frames {
                    return Err(Error::UnmaskedClientFrame);
                }
            }
            Role::Client => {
                if masked {
                    return Err(Error::MaskedServerFrame);
                }
            }
        }
        Ok(())
    }

    fn validate_rsv_bits(&self, rsv1: bool, rsv2: bool, rsv3: bool) -> Result<()> {
        if rsv2 || rsv3 {
            return Err(Error::ReservedBitsSet);
        }
        if rsv1 && !self.rsv1_allowed {
            return Err(Error::ReservedBitsSet);
        }
        Ok(())
    }

    fn validate_frame_size(&self, payload_len: usize) -> Result<()> {
        self.limits
            .check_frame_size(payload_len)
            .map_err(|(size, max)| Error::FrameTooLarge { size, max })
    }
}
