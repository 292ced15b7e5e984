//! Wire protocol codec for the lock coordinator's TCP connections.
//!
//! One- or two-plus-byte framed messages:
//!
//! ```text
//! [u8 event][u8 len][len bytes of payload]   -- Auth, Lock
//! [u8 event]                                 -- everything else
//! ```
//!
//! `encode` always reserves a second byte for bodyless events (written as
//! `0`); `decode_stream` tolerates either a one-byte or a two-byte wire
//! form for those events, since it's ambiguous whether the trailing zero
//! is meaningful or incidental.

use crate::error::FrameError;

/// Maximum payload length for a body-bearing frame.
const MAX_PAYLOAD: usize = 255;

/// Single-byte event tags, stable values starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
    Nil = 0,
    TypeError = 1,
    Auth = 2,
    Lock = 3,
    UnLock = 4,
    DecodeFail = 5,
    AuthOK = 6,
    AuthFail = 7,
    OperateTimeout = 8,
    LockOK = 9,
    LockFail = 10,
    AlreadyLocked = 11,
    UnLockOK = 12,
    NoSuchLock = 13,
}

impl Event {
    fn from_tag(tag: u8) -> Result<Self, FrameError> {
        Ok(match tag {
            0 => Event::Nil,
            1 => Event::TypeError,
            2 => Event::Auth,
            3 => Event::Lock,
            4 => Event::UnLock,
            5 => Event::DecodeFail,
            6 => Event::AuthOK,
            7 => Event::AuthFail,
            8 => Event::OperateTimeout,
            9 => Event::LockOK,
            10 => Event::LockFail,
            11 => Event::AlreadyLocked,
            12 => Event::UnLockOK,
            13 => Event::NoSuchLock,
            other => return Err(FrameError::UnknownEvent(other)),
        })
    }

    /// Whether this event carries a length-prefixed body on the wire.
    fn has_body(self) -> bool {
        matches!(self, Event::Auth | Event::Lock)
    }
}

/// A decoded frame: an event tag plus its body, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Event,
    pub body: Vec<u8>,
}

impl Frame {
    /// Construct a bodyless frame.
    pub fn bare(event: Event) -> Self {
        Self { event, body: Vec::new() }
    }

    /// Construct a body-bearing frame, validating the payload length.
    pub fn with_body(event: Event, body: Vec<u8>) -> Result<Self, FrameError> {
        if body.is_empty() || body.len() > MAX_PAYLOAD {
            return Err(FrameError::InvalidPayload(body.len()));
        }
        Ok(Self { event, body })
    }

    /// Encode this frame into its wire representation.
    ///
    /// Body-bearing events produce `[event][len][body]`. Bodyless events
    /// produce a two-byte buffer `[event][0]`, matching the reference
    /// implementation's habit of always reserving a length byte.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.event.has_body() {
            if self.body.is_empty() || self.body.len() > MAX_PAYLOAD {
                return Err(FrameError::InvalidPayload(self.body.len()));
            }
            let mut buf = Vec::with_capacity(2 + self.body.len());
            buf.push(self.event as u8);
            buf.push(self.body.len() as u8);
            buf.extend_from_slice(&self.body);
            Ok(buf)
        } else {
            Ok(vec![self.event as u8, 0])
        }
    }
}

/// Incremental frame decoder for a byte stream.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
/// Handles partial reads the way a TCP stream delivers them.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// A malformed frame is a hard stop: once decode fails there's no
    /// reliable resync point in this format, so the caller should treat
    /// the connection as done.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.is_empty() {
                break;
            }
            let tag = self.buf[0];
            let event = Event::from_tag(tag)?;

            if !event.has_body() {
                // Bodyless: one byte on the wire, but tolerate an optional
                // trailing length byte of 0 (the reserved-but-unused slot).
                if self.buf.len() >= 2 && self.buf[1] == 0 {
                    frames.push(Frame::bare(event));
                    self.buf.drain(..2);
                } else {
                    frames.push(Frame::bare(event));
                    self.buf.drain(..1);
                }
                continue;
            }

            // Body-bearing: need the length byte.
            if self.buf.len() < 2 {
                break; // wait for more data
            }
            let len = self.buf[1] as usize;
            if len == 0 {
                return Err(FrameError::MalformedFrame("zero-length body"));
            }
            let total = 2 + len;
            if self.buf.len() < total {
                break; // incomplete frame, wait for more data
            }
            let body = self.buf[2..total].to_vec();
            frames.push(Frame { event, body });
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// True if the decoder is holding onto partial, unconsumed bytes.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
