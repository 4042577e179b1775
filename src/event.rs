//! Host-facing events and deferred handler dispatch.
//!
//! The session never runs user code on its pump thread. Status changes,
//! unmatched messages and protocol errors are pushed into an [`EventSink`]
//! the host injects, and registered request/notification handlers arrive
//! there wrapped as [`DeferredCall`]s for the host to run on its own
//! scheduler.
//!
//! [`ChannelSink`] is the provided implementation for a main-thread host:
//! an unbounded MPSC the host drains whenever convenient.
//!
//! # Example
//!
//! ```
//! use wirepack::event::{ChannelSink, SinkItem};
//!
//! let (sink, drain) = ChannelSink::new();
//! // Hand `sink` to the session; later, on the host thread:
//! for item in drain.drain() {
//!     match item {
//!         SinkItem::Event(event) => println!("{:?}", event),
//!         SinkItem::Call(call) => call.run(),
//!     }
//! }
//! ```

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::Error;
use crate::value::Value;

/// Handler for an inbound request: `(msgid, params)`.
///
/// The handler is expected to eventually answer via
/// [`RpcSession::respond`](crate::rpc::RpcSession::respond) or
/// [`respond_error`](crate::rpc::RpcSession::respond_error).
pub type RequestHandler = Arc<dyn Fn(u32, Vec<Value>) + Send + Sync>;

/// Handler for an inbound notification: `(params)`.
pub type NotificationHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Status and traffic events surfaced to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    /// Transport established.
    Connected { host: String, port: u16 },
    /// Transport gone; in-flight sync calls will time out.
    Disconnected { host: String, port: u16 },
    /// Non-fatal fault (codec error, dropped message, protocol violation).
    Error { error: Error, context: &'static str },
    /// Every successfully parsed top-level message, before classification.
    MessageReceived(Value),
    /// Request with no registered handler.
    RequestReceived {
        msgid: u32,
        method: String,
        params: Vec<Value>,
    },
    /// Response that did not match the armed sync call.
    ResponseReceived {
        msgid: u32,
        error: Value,
        result: Value,
    },
    /// Notification with no registered handler.
    NotificationReceived { method: String, params: Vec<Value> },
}

/// A handler invocation deferred off the pump thread.
pub enum DeferredCall {
    Request {
        handler: RequestHandler,
        msgid: u32,
        params: Vec<Value>,
    },
    Notification {
        handler: NotificationHandler,
        params: Vec<Value>,
    },
}

impl DeferredCall {
    /// Invoke the wrapped handler. Call this from the host scheduler.
    pub fn run(self) {
        match self {
            DeferredCall::Request {
                handler,
                msgid,
                params,
            } => handler(msgid, params),
            DeferredCall::Notification { handler, params } => handler(params),
        }
    }
}

impl std::fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferredCall::Request { msgid, params, .. } => f
                .debug_struct("DeferredCall::Request")
                .field("msgid", msgid)
                .field("params", params)
                .finish_non_exhaustive(),
            DeferredCall::Notification { params, .. } => f
                .debug_struct("DeferredCall::Notification")
                .field("params", params)
                .finish_non_exhaustive(),
        }
    }
}

/// Target for events and deferred calls, provided by the host.
///
/// Implementations must not block: the pump thread calls both methods.
pub trait EventSink: Send + Sync {
    fn event(&self, event: RpcEvent);
    fn defer(&self, call: DeferredCall);
}

/// One item delivered through a [`ChannelSink`].
#[derive(Debug)]
pub enum SinkItem {
    Event(RpcEvent),
    Call(DeferredCall),
}

/// Channel-backed [`EventSink`] for main-thread hosts.
///
/// Sends never block; the host drains at its own pace through the paired
/// [`EventDrain`].
pub struct ChannelSink {
    tx: Sender<SinkItem>,
}

impl ChannelSink {
    /// Create a sink and the drain the host reads from.
    pub fn new() -> (Arc<ChannelSink>, EventDrain) {
        let (tx, rx) = unbounded();
        (Arc::new(ChannelSink { tx }), EventDrain { rx })
    }
}

impl EventSink for ChannelSink {
    fn event(&self, event: RpcEvent) {
        // The drain may be gone during shutdown; dropping is fine then.
        let _ = self.tx.send(SinkItem::Event(event));
    }

    fn defer(&self, call: DeferredCall) {
        let _ = self.tx.send(SinkItem::Call(call));
    }
}

/// Receiving half of a [`ChannelSink`].
pub struct EventDrain {
    rx: Receiver<SinkItem>,
}

impl EventDrain {
    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> impl Iterator<Item = SinkItem> + '_ {
        self.rx.try_iter()
    }

    /// Block up to `timeout` for the next item.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<SinkItem> {
        self.rx.recv_timeout(timeout).ok()
    }
}
