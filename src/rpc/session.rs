//! RPC session lifecycle, caller API and the transport pump.
//!
//! An [`RpcSession`] owns exactly one background thread (the pump) that
//! drives all I/O: it drains the outbound queue through the outbound byte
//! ring, reads transport bytes into the inbound ring, feeds the stream
//! parser and dispatches every completed message. Everything else runs on
//! caller threads and never touches the transport:
//! [`sync_call`](RpcSession::sync_call), [`async_call`](RpcSession::async_call),
//! [`notify`](RpcSession::notify) and handler registration.
//!
//! # Example
//!
//! ```ignore
//! use wirepack::{RpcSession, Value};
//! use wirepack::event::ChannelSink;
//! use std::time::Duration;
//!
//! let (sink, events) = ChannelSink::new();
//! let session = RpcSession::builder(sink).connect("127.0.0.1", 9100)?;
//!
//! let (error, result) =
//!     session.sync_call("add", Duration::from_millis(100), vec![Value::Int(1), Value::Int(2)])?;
//! assert!(error.is_nil());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};

use crate::codec::{ExtRegistry, ParseStatus, StreamParser};
use crate::error::{Error, Result};
use crate::event::{EventSink, RpcEvent};
use crate::rpc::dispatch::{dispatch_message, HandlerTable};
use crate::rpc::message::RpcMessage;
use crate::rpc::ring::ByteRing;
use crate::transport::{StreamTransport, TcpTransport};
use crate::value::Value;

/// Pump loop cadence.
pub const TICK: Duration = Duration::from_micros(6900);

/// Capacity of the inbound and outbound byte rings.
pub const MSG_BUF_MAX: usize = 8 * 1024 * 1024;

/// Capacity of the outbound message queue.
pub const QUEUE_MAX: usize = 2048;

/// Tunables for a session. The defaults match the protocol constants.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pump loop cadence.
    pub tick: Duration,
    /// Byte ring capacity (inbound and outbound each).
    pub ring_capacity: usize,
    /// Outbound message queue capacity.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick: TICK,
            ring_capacity: MSG_BUF_MAX,
            queue_capacity: QUEUE_MAX,
        }
    }
}

/// Rendezvous for the at-most-one outstanding synchronous call.
///
/// The caller arms the slot with the msgid it waits for, the pump completes
/// it from the dispatcher, and the condvar hands the result over. The
/// `responded` flag is atomic so completion is observable without the lock.
pub(crate) struct SyncSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
    responded: AtomicBool,
}

struct SlotState {
    started: bool,
    target_msgid: u32,
    error: Value,
    result: Value,
}

impl SyncSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                started: false,
                target_msgid: 0,
                error: Value::Nil,
                result: Value::Nil,
            }),
            cond: Condvar::new(),
            responded: AtomicBool::new(false),
        }
    }

    /// Claim the slot for `msgid`. Fails fast when a call is in flight.
    pub(crate) fn arm(&self, msgid: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return Err(Error::Busy);
        }
        state.started = true;
        state.target_msgid = msgid;
        state.error = Value::Nil;
        state.result = Value::Nil;
        self.responded.store(false, Ordering::Release);
        Ok(())
    }

    /// Release the slot without consuming a response (enqueue failure).
    pub(crate) fn disarm(&self) {
        let mut state = self.state.lock();
        state.started = false;
        self.responded.store(false, Ordering::Release);
    }

    /// Offer a response. Returns the payload back when the slot is not
    /// armed for this msgid, so the caller can emit it as an event.
    pub(crate) fn complete(
        &self,
        msgid: u32,
        error: Value,
        result: Value,
    ) -> Option<(Value, Value)> {
        let mut state = self.state.lock();
        if !state.started || state.target_msgid != msgid || self.responded.load(Ordering::Acquire) {
            return Some((error, result));
        }
        state.error = error;
        state.result = result;
        self.responded.store(true, Ordering::Release);
        self.cond.notify_all();
        None
    }

    /// Block until the armed call is answered or the deadline passes.
    /// Disarms the slot either way.
    pub(crate) fn wait(&self, deadline: Instant) -> Result<(Value, Value)> {
        let mut state = self.state.lock();
        while !self.responded.load(Ordering::Acquire) {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let outcome = if self.responded.load(Ordering::Acquire) {
            Ok((
                std::mem::take(&mut state.error),
                std::mem::take(&mut state.result),
            ))
        } else {
            Err(Error::Timeout)
        };
        state.started = false;
        self.responded.store(false, Ordering::Release);
        outcome
    }

    #[cfg(test)]
    pub(crate) fn is_started(&self) -> bool {
        self.state.lock().started
    }
}

/// Shared state between the session handle and its pump thread.
struct Shared {
    running: AtomicBool,
    connected: AtomicBool,
    next_msgid: AtomicU32,
    slot: SyncSlot,
    handlers: Mutex<HandlerTable>,
    sink: Arc<dyn EventSink>,
    host: String,
    port: u16,
}

/// Fluent configuration for an [`RpcSession`].
///
/// Handlers and extension decoders can be registered up front so no
/// message races the registration once the pump starts.
pub struct SessionBuilder {
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    exts: ExtRegistry,
    handlers: HandlerTable,
}

impl SessionBuilder {
    /// Start building a session around the host's event sink.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            config: SessionConfig::default(),
            exts: ExtRegistry::new(),
            handlers: HandlerTable::new(),
        }
    }

    /// Replace the default tunables.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an extension decoder with the session's stream parser.
    pub fn ext_decoder<F>(mut self, type_id: i8, decoder: F) -> Self
    where
        F: Fn(i8, &[u8]) -> Result<Value> + Send + Sync + 'static,
    {
        self.exts.register(type_id, decoder);
        self
    }

    /// Register a request handler.
    pub fn on_request<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(u32, Vec<Value>) + Send + Sync + 'static,
    {
        // Builder registration always overwrites.
        let _ = self
            .handlers
            .register_request(method, Arc::new(handler), true);
        self
    }

    /// Register a notification handler.
    pub fn on_notification<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        let _ = self
            .handlers
            .register_notification(method, Arc::new(handler), true);
        self
    }

    /// Connect to a TCP peer (with the retry schedule) and start the pump.
    pub fn connect(self, host: &str, port: u16) -> Result<RpcSession> {
        let transport = TcpTransport::connect(host, port)?;
        self.start(Box::new(transport))
    }

    /// Adopt an already-connected transport and start the pump.
    pub fn takeover(self, transport: Box<dyn StreamTransport>) -> Result<RpcSession> {
        self.start(transport)
    }

    fn start(self, transport: Box<dyn StreamTransport>) -> Result<RpcSession> {
        let (host, port) = transport.peer();
        let (out_tx, out_rx) = bounded(self.config.queue_capacity);

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            next_msgid: AtomicU32::new(0),
            slot: SyncSlot::new(),
            handlers: Mutex::new(self.handlers),
            sink: self.sink,
            host: host.clone(),
            port,
        });

        shared.sink.event(RpcEvent::Connected { host, port });

        let parser = StreamParser::with_registry(self.exts);
        let pump_shared = shared.clone();
        let config = self.config;
        let pump = thread::Builder::new()
            .name("wirepack-pump".to_string())
            .spawn(move || pump_loop(pump_shared, transport, out_rx, parser, config))?;

        Ok(RpcSession {
            shared,
            out_tx,
            pump: Some(pump),
        })
    }
}

/// A connected MessagePack-RPC session.
///
/// All methods may be called from any thread. Dropping the session closes
/// it: the pump is stopped and joined, and the transport disconnected.
pub struct RpcSession {
    shared: Arc<Shared>,
    out_tx: Sender<RpcMessage>,
    pump: Option<JoinHandle<()>>,
}

impl RpcSession {
    /// Start building a session around the host's event sink.
    pub fn builder(sink: Arc<dyn EventSink>) -> SessionBuilder {
        SessionBuilder::new(sink)
    }

    /// Whether the transport was connected at the last pump tick.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Peer host as given to `connect` (or derived from the transport).
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    /// Peer port.
    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Send a request without waiting for its response.
    ///
    /// Returns the assigned msgid; the response arrives later as a
    /// [`RpcEvent::ResponseReceived`]. Never blocks on I/O.
    pub fn async_call(&self, method: &str, params: Vec<Value>) -> Result<u32> {
        validate_method(method)?;
        let msgid = self.shared.next_msgid.fetch_add(1, Ordering::Relaxed);
        self.enqueue(RpcMessage::request(msgid, method, params))?;
        Ok(msgid)
    }

    /// Send a request and block until its response or the timeout.
    ///
    /// At most one sync call may be in flight per session; concurrent
    /// attempts fail fast with [`Error::Busy`]. On success returns the
    /// response's `(error, result)` pair.
    pub fn sync_call(
        &self,
        method: &str,
        timeout: Duration,
        params: Vec<Value>,
    ) -> Result<(Value, Value)> {
        validate_method(method)?;
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }

        let msgid = self.shared.next_msgid.fetch_add(1, Ordering::Relaxed);
        // Arm before enqueueing: the response may beat the return path.
        self.shared.slot.arm(msgid)?;
        if let Err(err) = self.enqueue(RpcMessage::request(msgid, method, params)) {
            self.shared.slot.disarm();
            return Err(err);
        }

        self.shared.slot.wait(Instant::now() + timeout)
    }

    /// Answer a peer request with a result.
    pub fn respond(&self, msgid: u32, result: Value) -> Result<()> {
        self.enqueue(RpcMessage::response(msgid, result, Value::Nil))
    }

    /// Answer a peer request with an error.
    pub fn respond_error(&self, msgid: u32, error: Value) -> Result<()> {
        self.enqueue(RpcMessage::response(msgid, Value::Nil, error))
    }

    /// Send a notification (no response expected).
    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        validate_method(method)?;
        self.enqueue(RpcMessage::notification(method, params))
    }

    /// Register a request handler.
    ///
    /// With `overwrite` false, registering into an occupied slot fails
    /// with [`Error::AlreadyExists`].
    pub fn register_request<F>(&self, method: &str, handler: F, overwrite: bool) -> Result<()>
    where
        F: Fn(u32, Vec<Value>) + Send + Sync + 'static,
    {
        validate_method(method)?;
        self.shared
            .handlers
            .lock()
            .register_request(method, Arc::new(handler), overwrite)
    }

    /// Register a notification handler.
    pub fn register_notification<F>(&self, method: &str, handler: F, overwrite: bool) -> Result<()>
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        validate_method(method)?;
        self.shared
            .handlers
            .lock()
            .register_notification(method, Arc::new(handler), overwrite)
    }

    /// Remove a request handler.
    pub fn unregister_request(&self, method: &str) -> Result<()> {
        self.shared.handlers.lock().unregister_request(method)
    }

    /// Remove a notification handler.
    pub fn unregister_notification(&self, method: &str) -> Result<()> {
        self.shared.handlers.lock().unregister_notification(method)
    }

    /// Stop the pump, join it and disconnect the transport.
    ///
    /// Messages still in the outbound queue are dropped; a message already
    /// copied into the outbound ring may have been partially written.
    /// Idempotent.
    pub fn close(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }

    /// A cheap, cloneable handle for producing outbound messages.
    ///
    /// Handlers deferred through the event sink capture one of these to
    /// answer requests; the handle holds no strong reference to the
    /// session, so it never keeps a closed session alive.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::downgrade(&self.shared),
            out_tx: self.out_tx.clone(),
        }
    }

    fn enqueue(&self, message: RpcMessage) -> Result<()> {
        enqueue_message(&self.shared, &self.out_tx, message)
    }
}

/// Producer-side handle onto a session's outbound queue.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Weak<Shared>,
    out_tx: Sender<RpcMessage>,
}

impl SessionHandle {
    /// Send a request without waiting; returns the assigned msgid.
    pub fn async_call(&self, method: &str, params: Vec<Value>) -> Result<u32> {
        validate_method(method)?;
        let shared = self.upgrade()?;
        let msgid = shared.next_msgid.fetch_add(1, Ordering::Relaxed);
        enqueue_message(&shared, &self.out_tx, RpcMessage::request(msgid, method, params))?;
        Ok(msgid)
    }

    /// Answer a peer request with a result.
    pub fn respond(&self, msgid: u32, result: Value) -> Result<()> {
        let shared = self.upgrade()?;
        enqueue_message(
            &shared,
            &self.out_tx,
            RpcMessage::response(msgid, result, Value::Nil),
        )
    }

    /// Answer a peer request with an error.
    pub fn respond_error(&self, msgid: u32, error: Value) -> Result<()> {
        let shared = self.upgrade()?;
        enqueue_message(
            &shared,
            &self.out_tx,
            RpcMessage::response(msgid, Value::Nil, error),
        )
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        validate_method(method)?;
        let shared = self.upgrade()?;
        enqueue_message(&shared, &self.out_tx, RpcMessage::notification(method, params))
    }

    fn upgrade(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(Error::Disconnected)
    }
}

fn enqueue_message(shared: &Shared, out_tx: &Sender<RpcMessage>, message: RpcMessage) -> Result<()> {
    if !shared.connected.load(Ordering::Acquire) {
        return Err(Error::Disconnected);
    }
    out_tx.try_send(message).map_err(|err| match err {
        TrySendError::Full(_) => Error::QueueFull,
        TrySendError::Disconnected(_) => Error::Disconnected,
    })
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn validate_method(method: &str) -> Result<()> {
    if method.is_empty() {
        return Err(Error::InvalidParameter("method must not be empty"));
    }
    Ok(())
}

/// The background loop: write-out, read-in, parse, dispatch, sleep.
fn pump_loop(
    shared: Arc<Shared>,
    mut transport: Box<dyn StreamTransport>,
    out_rx: Receiver<RpcMessage>,
    mut parser: StreamParser,
    config: SessionConfig,
) {
    let mut in_ring = ByteRing::with_capacity(config.ring_capacity);
    let mut out_ring = ByteRing::with_capacity(config.ring_capacity);
    let mut alive = true;

    tracing::debug!(host = %shared.host, port = shared.port, "pump started");

    while alive && shared.running.load(Ordering::Acquire) {
        let tick_started = Instant::now();

        write_out(&shared, transport.as_mut(), &out_rx, &mut out_ring, &mut alive);
        read_in(&shared, transport.as_mut(), &mut in_ring, &mut alive);
        parse_in(&shared, &mut in_ring, &mut parser, &mut alive);

        if !transport.is_connected() {
            alive = false;
        }
        shared.connected.store(alive, Ordering::Release);

        if alive {
            let elapsed = tick_started.elapsed();
            if elapsed < config.tick {
                thread::sleep(config.tick - elapsed);
            }
        }
    }

    transport.disconnect();
    shared.connected.store(false, Ordering::Release);
    shared.running.store(false, Ordering::Release);
    shared.sink.event(RpcEvent::Disconnected {
        host: shared.host.clone(),
        port: shared.port,
    });
    tracing::debug!(host = %shared.host, port = shared.port, "pump stopped");
}

/// Drain queued messages through the outbound ring into the transport.
fn write_out(
    shared: &Shared,
    transport: &mut dyn StreamTransport,
    out_rx: &Receiver<RpcMessage>,
    out_ring: &mut ByteRing,
    alive: &mut bool,
) {
    loop {
        if out_ring.is_empty() {
            let Ok(message) = out_rx.try_recv() else {
                break;
            };
            match message.encode() {
                Ok(bytes) => {
                    if bytes.len() > out_ring.capacity() {
                        tracing::error!(
                            size = bytes.len(),
                            "outbound message exceeds ring capacity, dropping"
                        );
                        shared.sink.event(RpcEvent::Error {
                            error: Error::TooBig,
                            context: "outbound message",
                        });
                        continue;
                    }
                    out_ring.push(&bytes);
                }
                Err(error) => {
                    shared.sink.event(RpcEvent::Error {
                        error,
                        context: "outbound encode",
                    });
                    continue;
                }
            }
        }

        let written = {
            let (chunk, _) = out_ring.readable();
            transport.write(chunk)
        };
        match written {
            Ok(0) => break, // transport not writable right now
            Ok(n) => out_ring.consume(n),
            Err(error) => {
                tracing::error!("transport write failed: {}", error);
                shared.sink.event(RpcEvent::Error {
                    error,
                    context: "transport write",
                });
                *alive = false;
                break;
            }
        }
    }
}

/// Pull available transport bytes into the inbound ring.
fn read_in(
    shared: &Shared,
    transport: &mut dyn StreamTransport,
    in_ring: &mut ByteRing,
    alive: &mut bool,
) {
    while in_ring.free() > 0 {
        let mut read_result: Result<()> = Ok(());
        let pulled = in_ring.fill_with(|chunk| match transport.read(chunk) {
            Ok(n) => n,
            Err(error) => {
                read_result = Err(error);
                0
            }
        });

        match read_result {
            Ok(()) if pulled == 0 => break, // nothing available right now
            Ok(()) => {}
            Err(Error::Disconnected) => {
                // Peer closed; finish parsing whatever already arrived.
                *alive = false;
                break;
            }
            Err(error) => {
                tracing::error!("transport read failed: {}", error);
                shared.sink.event(RpcEvent::Error {
                    error,
                    context: "transport read",
                });
                *alive = false;
                break;
            }
        }
    }
}

/// Feed the parser from the inbound ring and dispatch completed messages.
fn parse_in(shared: &Shared, in_ring: &mut ByteRing, parser: &mut StreamParser, alive: &mut bool) {
    while !in_ring.is_empty() {
        let fed = {
            let (chunk, _) = in_ring.readable();
            parser.feed(chunk);
            chunk.len()
        };
        in_ring.consume(fed);
    }

    loop {
        match parser.try_parse() {
            ParseStatus::Ready(value) => {
                dispatch_message(value, &shared.handlers, &shared.slot, shared.sink.as_ref());
            }
            ParseStatus::WouldBlock => break,
            ParseStatus::Failed(error) => {
                // No frame delimiters: a corrupt stream cannot be
                // resynchronized, so the connection goes down with it.
                tracing::error!("stream parse failed: {}; closing connection", error);
                shared.sink.event(RpcEvent::Error {
                    error,
                    context: "stream parse",
                });
                parser.reset();
                *alive = false;
                break;
            }
        }
    }
}
