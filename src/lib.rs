//! # wirepack
//!
//! MessagePack serialization and a bidirectional MessagePack-RPC peer.
//!
//! Two tightly coupled subsystems:
//!
//! - **Codec** ([`codec`]): whole-buffer [`encode`]/[`decode`] between a
//!   dynamic [`Value`] tree and MessagePack bytes, plus a
//!   [`StreamParser`](codec::StreamParser) that accepts byte chunks and
//!   emits one complete value per message.
//! - **RPC engine** ([`rpc`]): frames requests, responses and
//!   notifications over a stream transport, correlates synchronous calls
//!   by msgid, and drains an outbound queue, all from a single background
//!   pump thread behind a thread-safe caller API.
//!
//! The host environment stays pluggable: transports implement
//! [`transport::StreamTransport`], and everything the session needs to
//! tell the host (status changes, unmatched messages, deferred handler
//! calls) flows through an injected [`event::EventSink`].
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wirepack::event::ChannelSink;
//! use wirepack::{RpcSession, Value};
//!
//! let (sink, events) = ChannelSink::new();
//! let session = RpcSession::builder(sink)
//!     .on_notification("log", |params| println!("peer: {:?}", params))
//!     .connect("127.0.0.1", 9100)?;
//!
//! let (error, result) =
//!     session.sync_call("add", Duration::from_millis(100), vec![Value::Int(1), Value::Int(2)])?;
//! # Ok::<(), wirepack::Error>(())
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod rpc;
pub mod transport;
pub mod value;

pub use codec::{decode, encode};
pub use error::{Error, Result};
pub use event::{ChannelSink, EventSink, RpcEvent};
pub use rpc::{RpcMessage, RpcSession, SessionBuilder, SessionConfig};
pub use value::Value;
