//! TCP transport.
//!
//! Wraps a non-blocking `std::net::TcpStream`. [`TcpTransport::connect`]
//! retries with a fixed backoff schedule before giving up with
//! `CantConnect`; [`TcpTransport::takeover`] adopts a stream that is
//! already connected (an accepted connection, or one dialed elsewhere).

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::StreamTransport;

/// Delays between connect attempts, in milliseconds.
pub const CONNECT_RETRY_MS: [u64; 6] = [1, 10, 100, 1000, 1000, 1000];

/// A non-blocking TCP stream transport.
pub struct TcpTransport {
    stream: TcpStream,
    connected: bool,
    host: String,
    port: u16,
}

impl TcpTransport {
    /// Connect to `host:port`, retrying per [`CONNECT_RETRY_MS`].
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with_retries(host, port, &CONNECT_RETRY_MS)
    }

    /// Connect with an explicit retry schedule (delays between attempts).
    pub fn connect_with_retries(host: &str, port: u16, retry_ms: &[u64]) -> Result<Self> {
        let mut delays = retry_ms.iter();
        loop {
            match TcpStream::connect((host, port)) {
                Ok(stream) => {
                    return Self::adopt(stream, host.to_string(), port);
                }
                Err(err) => {
                    let Some(delay) = delays.next() else {
                        tracing::warn!(host, port, "connect retries exhausted: {}", err);
                        return Err(Error::CantConnect(format!("{host}:{port}")));
                    };
                    tracing::debug!(host, port, delay_ms = *delay, "connect failed, retrying");
                    std::thread::sleep(Duration::from_millis(*delay));
                }
            }
        }
    }

    /// Adopt an already-connected stream.
    pub fn takeover(stream: TcpStream) -> Result<Self> {
        let (host, port) = match stream.peer_addr() {
            Ok(addr) => (addr.ip().to_string(), addr.port()),
            Err(_) => ("unknown".to_string(), 0),
        };
        Self::adopt(stream, host, port)
    }

    fn adopt(stream: TcpStream, host: String, port: u16) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        tracing::debug!(host = %host, port, "tcp transport ready");
        Ok(Self {
            stream,
            connected: true,
            host,
            port,
        })
    }
}

impl StreamTransport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.connected {
            return Err(Error::Disconnected);
        }
        match self.stream.read(buf) {
            // A successful zero-byte read on TCP is the peer's FIN.
            Ok(0) if !buf.is_empty() => {
                self.connected = false;
                Err(Error::Disconnected)
            }
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(0),
            Err(err) => {
                self.connected = false;
                Err(Error::from(err))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.connected {
            return Err(Error::Disconnected);
        }
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(0),
            Err(err) => {
                self.connected = false;
                Err(Error::from(err))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        if self.connected {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.connected = false;
        }
    }

    fn peer(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
