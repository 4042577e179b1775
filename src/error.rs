//! Error types for wirepack.

use thiserror::Error;

/// Main error type for all codec and RPC operations.
///
/// The codec variants carry the offset of the first unread byte where that
/// helps locating the fault in the input. Errors are `Clone` so they can
/// travel inside [`RpcEvent`](crate::event::RpcEvent)s; for that reason I/O
/// causes are captured as strings rather than as `std::io::Error` values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Transport read/write fault.
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed MessagePack tag.
    #[error("invalid MessagePack tag {tag:#04x} at offset {offset}")]
    Invalid { tag: u8, offset: usize },

    /// Extension type with no registered decoder.
    #[error("unsupported extension type {0}")]
    Unsupported(i8),

    /// Value didn't match the expected shape (RPC framing checks).
    #[error("unexpected message shape: {0}")]
    Type(&'static str),

    /// Length, depth or message-size limit exceeded.
    #[error("size or depth limit exceeded")]
    TooBig,

    /// Allocation accounting failure.
    #[error("allocation limit exceeded")]
    Memory,

    /// Internal invariant violation.
    #[error("codec misuse")]
    Bug,

    /// Structurally valid MessagePack carrying data we cannot accept.
    #[error("invalid contained data: {0}")]
    Data(&'static str),

    /// Input ended in the middle of a message.
    #[error("input ended mid-message at offset {offset}")]
    Eof { offset: usize },

    /// Sync call deadline expired.
    #[error("sync call timed out")]
    Timeout,

    /// Sync call attempted while another is in flight.
    #[error("another sync call is in flight")]
    Busy,

    /// Outbound queue at capacity.
    #[error("outbound queue full")]
    QueueFull,

    /// Handler registration into an occupied slot.
    #[error("handler already registered for method: {0}")]
    AlreadyExists(String),

    /// Handler removal from an empty slot.
    #[error("no handler registered for method: {0}")]
    NotFound(String),

    /// Caller-side argument validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Connect retries exhausted.
    #[error("cannot connect to {0}")]
    CantConnect(String),

    /// Operation on a session whose transport is down.
    #[error("session disconnected")]
    Disconnected,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
