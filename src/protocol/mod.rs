//! Wire protocol core (RFC 6455).

pub mod assembler;
pub mod frame;
pub mod mask;
pub mod opcode;
pub mod utf8;
pub mod validation;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use frame::{Frame, FrameHeader, Payload, MAX_CONTROL_PAYLOAD};
pub use mask::apply_mask;
pub use opcode::OpCode;
pub use utf8::{Utf8Validator, validate_utf8};
pub use validation::FrameValidator;
