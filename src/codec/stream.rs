//! Stream-mode MessagePack parser.
//!
//! Accepts byte chunks as they arrive from a transport and emits one
//! complete top-level value per message. Tag and payload boundaries may
//! fall anywhere between chunks; bytes left over after a completed value
//! belong to the next message and are retained.
//!
//! The parser is a state machine:
//!
//! - `Idle`: no bytes pending
//! - `Reading`: a partial message is buffered
//! - `Failed`: terminal until [`reset`](StreamParser::reset)
//!
//! (A completed value is handed to the caller from `try_parse` directly,
//! so the "done" state is never observable from outside.)
//!
//! # Example
//!
//! ```
//! use wirepack::codec::{encode, ParseStatus, StreamParser};
//! use wirepack::Value;
//!
//! let bytes = encode(&Value::Array(vec![Value::Int(1), Value::Int(2)])).unwrap();
//! let mut parser = StreamParser::new();
//!
//! parser.feed(&bytes[..1]);
//! assert!(matches!(parser.try_parse(), ParseStatus::WouldBlock));
//!
//! parser.feed(&bytes[1..]);
//! assert!(matches!(parser.try_parse(), ParseStatus::Ready(_)));
//! ```

use bytes::{Buf, BytesMut};

use super::decode::decode_prefix;
use super::ext::ExtRegistry;
use super::MSG_MAX;
use crate::error::Error;
use crate::value::Value;

/// Chunk size offered to the fill callback in [`StreamParser::fill_from`].
const FILL_CHUNK: usize = 8 * 1024;

/// Result of one parse attempt.
#[derive(Debug)]
pub enum ParseStatus {
    /// One complete value was parsed and consumed from the buffer.
    Ready(Value),
    /// More bytes are needed.
    WouldBlock,
    /// The stream is corrupt; terminal until reset.
    Failed(Error),
}

/// Externally observable parser state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Reading,
    Failed(Error),
}

/// Incremental parser over an internal accumulation buffer.
pub struct StreamParser {
    buf: BytesMut,
    /// Buffer length at the last incomplete attempt. Re-entrant calls with
    /// no new bytes short-circuit to `WouldBlock` instead of re-scanning.
    scanned: usize,
    failure: Option<Error>,
    exts: ExtRegistry,
    msg_max: usize,
}

impl StreamParser {
    /// Create a parser with the default message size cap and no extension
    /// decoders beyond the builtin Timestamp.
    pub fn new() -> Self {
        Self::with_registry(ExtRegistry::new())
    }

    /// Create a parser with a registry of extension decoders.
    pub fn with_registry(exts: ExtRegistry) -> Self {
        Self {
            buf: BytesMut::with_capacity(FILL_CHUNK),
            scanned: 0,
            failure: None,
            exts,
            msg_max: MSG_MAX,
        }
    }

    /// Override the single-message size cap (default [`MSG_MAX`]).
    pub fn with_msg_max(mut self, msg_max: usize) -> Self {
        self.msg_max = msg_max;
        self
    }

    /// Append bytes to the parse buffer.
    ///
    /// Feeding a failed parser is a no-op; the corrupt prefix cannot be
    /// resynchronized and the bytes would only extend it.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.failure.is_none() {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Pull bytes from a fill callback until it runs dry.
    ///
    /// The callback receives a scratch buffer and returns how many bytes it
    /// wrote; returning 0 stops the loop. Returns the total pulled.
    pub fn fill_from<F>(&mut self, mut fill: F) -> usize
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        let mut total = 0;
        let mut scratch = [0u8; FILL_CHUNK];
        loop {
            let n = fill(&mut scratch);
            if n == 0 {
                return total;
            }
            self.feed(&scratch[..n]);
            total += n;
        }
    }

    /// Attempt to parse one complete value from the buffered bytes.
    ///
    /// Re-entrant: repeated calls with no new bytes return
    /// [`ParseStatus::WouldBlock`] without side effects. After
    /// [`ParseStatus::Ready`] the consumed bytes are dropped and any
    /// surplus is kept for the next message.
    pub fn try_parse(&mut self) -> ParseStatus {
        if let Some(err) = &self.failure {
            return ParseStatus::Failed(err.clone());
        }
        if self.buf.is_empty() || self.buf.len() == self.scanned {
            return ParseStatus::WouldBlock;
        }

        match decode_prefix(&self.buf, &self.exts) {
            Ok((value, consumed)) => {
                self.buf.advance(consumed);
                self.scanned = 0;
                ParseStatus::Ready(value)
            }
            Err(Error::Eof { .. }) => {
                if self.buf.len() >= self.msg_max {
                    return self.fail(Error::TooBig);
                }
                self.scanned = self.buf.len();
                ParseStatus::WouldBlock
            }
            Err(err) => self.fail(err),
        }
    }

    /// Clear buffered bytes and any failure state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.failure = None;
    }

    /// Current state, for diagnostics.
    pub fn state(&self) -> StreamState {
        match &self.failure {
            Some(err) => StreamState::Failed(err.clone()),
            None if self.buf.is_empty() => StreamState::Idle,
            None => StreamState::Reading,
        }
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Decoders used for ext tags, for registration after construction.
    pub fn registry_mut(&mut self) -> &mut ExtRegistry {
        &mut self.exts
    }

    fn fail(&mut self, err: Error) -> ParseStatus {
        self.failure = Some(err.clone());
        ParseStatus::Failed(err)
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}
