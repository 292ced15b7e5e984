//! Wire-protocol error types.
//!
//! The codec is the one place in the core where we reach for a typed error
//! instead of `anyhow`: callers (tests in particular) match on the kind of
//! framing failure, so a `thiserror` enum earns its keep here even though
//! the rest of the crate is anyhow-first.

use thiserror::Error;

/// Failure modes for [`crate::protocol::Frame::encode`] and
/// [`crate::protocol::FrameDecoder::feed`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// A body-bearing event was encoded with a payload outside `1..=255` bytes.
    #[error("payload length {0} is out of range 1..=255")]
    InvalidPayload(usize),

    /// The decoder saw a tag byte it doesn't recognize.
    #[error("unknown event tag: {0}")]
    UnknownEvent(u8),

    /// A body-bearing event's declared length didn't match the bytes present.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}
