//! Integration tests for wirepack.
//!
//! These exercise the full stack end-to-end: a real TCP loopback
//! connection, a scripted peer thread speaking msgpack-rpc through the
//! same codec, and the session's pump, dispatcher and caller API.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use wirepack::codec::{ParseStatus, StreamParser};
use wirepack::event::{ChannelSink, EventDrain, SinkItem};
use wirepack::rpc::{make_response, RpcMessage};
use wirepack::{Error, RpcEvent, RpcSession, Value};

/// Opt-in log output: run with `RUST_LOG=wirepack=debug` to watch the pump.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Bind a loopback listener and run `peer` on the first accepted stream.
fn serve_one<F>(peer: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_nodelay(true).unwrap();
        peer(stream);
    });
    (addr, handle)
}

/// Read one complete RPC message from a blocking stream.
fn read_message(stream: &mut TcpStream, parser: &mut StreamParser) -> RpcMessage {
    let mut buf = [0u8; 4096];
    loop {
        match parser.try_parse() {
            ParseStatus::Ready(value) => return RpcMessage::from_value(value).unwrap(),
            ParseStatus::WouldBlock => {}
            ParseStatus::Failed(err) => panic!("peer parse failed: {err}"),
        }
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "session closed before the peer got its message");
        parser.feed(&buf[..n]);
    }
}

/// Wait for a specific event, running deferred calls along the way.
fn wait_for_event<F>(events: &EventDrain, matches: F) -> RpcEvent
where
    F: Fn(&RpcEvent) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(100)) {
            Some(SinkItem::Event(event)) if matches(&event) => return event,
            Some(SinkItem::Call(call)) => call.run(),
            Some(SinkItem::Event(_)) | None => {}
        }
    }
    panic!("expected event never arrived");
}

/// Full request/response cycle: `sync_call("add", [1, 2])` answered by a
/// peer that decodes the request and returns the sum.
#[test]
fn test_sync_call_round_trip_over_tcp() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let mut parser = StreamParser::new();
        let message = read_message(&mut stream, &mut parser);
        let RpcMessage::Request { msgid, method, params } = message else {
            panic!("expected a request");
        };
        assert_eq!(method, "add");
        let sum: i64 = params.iter().map(|p| p.as_i64().unwrap()).sum();
        let bytes = make_response(msgid, Value::Int(sum), Value::Nil).unwrap();
        stream.write_all(&bytes).unwrap();
    });

    let (sink, _events) = ChannelSink::new();
    let mut session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    let (error, result) = session
        .sync_call(
            "add",
            Duration::from_secs(2),
            vec![Value::Int(1), Value::Int(2)],
        )
        .unwrap();
    assert_eq!(error, Value::Nil);
    assert_eq!(result, Value::Int(3));

    peer.join().unwrap();
    session.close();
}

/// The sync slot frees up after each call, so calls can go back to back.
#[test]
fn test_sequential_sync_calls_reuse_slot() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let mut parser = StreamParser::new();
        for _ in 0..3 {
            let message = read_message(&mut stream, &mut parser);
            let RpcMessage::Request { msgid, params, .. } = message else {
                panic!("expected a request");
            };
            let bytes = make_response(msgid, params[0].clone(), Value::Nil).unwrap();
            stream.write_all(&bytes).unwrap();
        }
    });

    let (sink, _events) = ChannelSink::new();
    let session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    for i in 0..3i64 {
        let (error, result) = session
            .sync_call("echo", Duration::from_secs(2), vec![Value::Int(i)])
            .unwrap();
        assert_eq!(error, Value::Nil);
        assert_eq!(result, Value::Int(i));
    }

    peer.join().unwrap();
}

/// Notifications are fire-and-forget and arrive in enqueue order.
#[test]
fn test_notifications_reach_peer_in_order() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let mut parser = StreamParser::new();
        for expected in ["first", "second", "third"] {
            let message = read_message(&mut stream, &mut parser);
            let RpcMessage::Notification { method, params } = message else {
                panic!("expected a notification");
            };
            assert_eq!(method, "log");
            assert_eq!(params, vec![Value::from(expected)]);
        }
    });

    let (sink, _events) = ChannelSink::new();
    let session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    for text in ["first", "second", "third"] {
        session.notify("log", vec![Value::from(text)]).unwrap();
    }

    peer.join().unwrap();
}

/// A peer-initiated request reaches the registered handler as a deferred
/// call; the handler answers through a [`SessionHandle`] and the peer gets
/// its response.
#[test]
fn test_peer_request_handled_and_answered() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let mut parser = StreamParser::new();
        // Wait until the client has its handler registered.
        let ready = read_message(&mut stream, &mut parser);
        assert_eq!(ready.method(), Some("ready"));

        let bytes = RpcMessage::request(31, "double", vec![Value::Int(21)])
            .encode()
            .unwrap();
        stream.write_all(&bytes).unwrap();

        let message = read_message(&mut stream, &mut parser);
        assert_eq!(
            message,
            RpcMessage::response(31, Value::Int(42), Value::Nil)
        );
    });

    let (sink, events) = ChannelSink::new();
    let session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    let responder = session.handle();
    session
        .register_request(
            "double",
            move |msgid, params| {
                let doubled = params[0].as_i64().unwrap() * 2;
                responder.respond(msgid, Value::Int(doubled)).unwrap();
            },
            false,
        )
        .unwrap();
    session.notify("ready", vec![]).unwrap();

    // Drive the host side: run deferred calls until the peer is satisfied.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !peer.is_finished() {
        assert!(Instant::now() < deadline, "peer never got its response");
        if let Some(SinkItem::Call(call)) = events.recv_timeout(Duration::from_millis(50)) {
            call.run();
        }
    }
    peer.join().unwrap();
}

/// An unhandled peer notification surfaces as an event.
#[test]
fn test_unhandled_notification_becomes_event() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let bytes = RpcMessage::notification("status", vec![Value::from("ok")])
            .encode()
            .unwrap();
        stream.write_all(&bytes).unwrap();
        // Hold the connection open until the test is done reading.
        thread::sleep(Duration::from_millis(200));
    });

    let (sink, events) = ChannelSink::new();
    let _session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    let event = wait_for_event(&events, |event| {
        matches!(event, RpcEvent::NotificationReceived { .. })
    });
    assert_eq!(
        event,
        RpcEvent::NotificationReceived {
            method: "status".to_string(),
            params: vec![Value::from("ok")],
        }
    );
    peer.join().unwrap();
}

/// A response nobody is waiting for surfaces as an event (async pattern).
#[test]
fn test_async_call_response_surfaces_as_event() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let mut parser = StreamParser::new();
        let message = read_message(&mut stream, &mut parser);
        let RpcMessage::Request { msgid, .. } = message else {
            panic!("expected a request");
        };
        let bytes = make_response(msgid, Value::from("pong"), Value::Nil).unwrap();
        stream.write_all(&bytes).unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let (sink, events) = ChannelSink::new();
    let session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    let msgid = session.async_call("ping", vec![]).unwrap();

    let event = wait_for_event(&events, |event| {
        matches!(event, RpcEvent::ResponseReceived { .. })
    });
    assert_eq!(
        event,
        RpcEvent::ResponseReceived {
            msgid,
            error: Value::Nil,
            result: Value::from("pong"),
        }
    );
    peer.join().unwrap();
}

/// Connect and close produce the paired status events.
#[test]
fn test_connect_and_close_events() {
    init_tracing();

    let (addr, peer) = serve_one(|stream| {
        // Keep the peer up until the client closes.
        let mut buf = [0u8; 64];
        let mut stream = stream;
        while let Ok(n) = stream.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    });

    let (sink, events) = ChannelSink::new();
    let mut session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();
    assert!(session.is_connected());

    let connected = wait_for_event(&events, |event| matches!(event, RpcEvent::Connected { .. }));
    assert_eq!(
        connected,
        RpcEvent::Connected {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
        }
    );

    session.close();
    assert!(!session.is_connected());
    wait_for_event(&events, |event| {
        matches!(event, RpcEvent::Disconnected { .. })
    });
    peer.join().unwrap();
}

/// When the peer drops the connection the session notices: a Disconnected
/// event fires and subsequent calls fail fast.
#[test]
fn test_peer_drop_disconnects_session() {
    init_tracing();

    let (addr, peer) = serve_one(|stream| {
        drop(stream);
    });

    let (sink, events) = ChannelSink::new();
    let session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();
    peer.join().unwrap();

    wait_for_event(&events, |event| {
        matches!(event, RpcEvent::Disconnected { .. })
    });
    assert!(!session.is_connected());
    assert_eq!(session.notify("x", vec![]), Err(Error::Disconnected));
    assert_eq!(
        session.sync_call("x", Duration::from_millis(10), vec![]),
        Err(Error::Disconnected)
    );
}

/// A malformed byte on the wire kills the connection (MessagePack has no
/// frame delimiters to resynchronize on) after surfacing the codec error.
#[test]
fn test_garbage_on_wire_closes_connection() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        stream.write_all(&[0xc1]).unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let (sink, events) = ChannelSink::new();
    let session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    let error_event = wait_for_event(&events, |event| matches!(event, RpcEvent::Error { .. }));
    assert!(matches!(
        error_event,
        RpcEvent::Error { error: Error::Invalid { tag: 0xc1, .. }, .. }
    ));
    wait_for_event(&events, |event| {
        matches!(event, RpcEvent::Disconnected { .. })
    });
    assert!(!session.is_connected());
    peer.join().unwrap();
}

/// Requests split across many tiny TCP writes still parse into whole
/// messages on the receiving side.
#[test]
fn test_fragmented_inbound_messages() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let bytes = RpcMessage::notification(
            "chunks",
            vec![Value::Array((0..50).map(Value::Int).collect())],
        )
        .encode()
        .unwrap();
        for piece in bytes.chunks(3) {
            stream.write_all(piece).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(200));
    });

    let (sink, events) = ChannelSink::new();
    let _session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    let event = wait_for_event(&events, |event| {
        matches!(event, RpcEvent::NotificationReceived { .. })
    });
    let RpcEvent::NotificationReceived { method, params } = event else {
        unreachable!();
    };
    assert_eq!(method, "chunks");
    assert_eq!(
        params[0],
        Value::Array((0..50).map(Value::Int).collect())
    );
    peer.join().unwrap();
}

/// Every parsed message also surfaces as `MessageReceived`, before
/// classification.
#[test]
fn test_message_received_fires_for_all_traffic() {
    init_tracing();

    let (addr, peer) = serve_one(|mut stream| {
        let bytes = RpcMessage::notification("n", vec![]).encode().unwrap();
        stream.write_all(&bytes).unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let (sink, events) = ChannelSink::new();
    let _session = RpcSession::builder(sink)
        .connect("127.0.0.1", addr.port())
        .unwrap();

    let event = wait_for_event(&events, |event| {
        matches!(event, RpcEvent::MessageReceived(_))
    });
    let RpcEvent::MessageReceived(value) = event else {
        unreachable!();
    };
    assert_eq!(
        RpcMessage::from_value(value).unwrap(),
        RpcMessage::notification("n", vec![])
    );
    peer.join().unwrap();
}

/// Connecting to a dead port exhausts the retry schedule and reports
/// `CantConnect`.
#[test]
fn test_connect_to_dead_port_fails() {
    init_tracing();

    use wirepack::transport::TcpTransport;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = TcpTransport::connect_with_retries("127.0.0.1", addr.port(), &[1]);
    assert!(matches!(result, Err(Error::CantConnect(_))));
}
