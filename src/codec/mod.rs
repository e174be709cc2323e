//! Frame-level I/O over async streams.

#[cfg(feature = "async-tokio")]
mod framed;

#[cfg(feature = "async-tokio")]
pub use framed::{FrameReader, FrameWriter, MaskGenerator, encode_frame};
