//! Blocking TCP transport to the instrument server
//!
//! Uses `std::net::TcpStream` with short read-timeout slices so that
//! `receive_exact` can poll for availability while honoring its overall
//! deadline.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::{ConsoleError, Result};
use crate::io::transport::{ConnectionState, StateSubscriber, Transport};

/// Bounded wait for connection establishment
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-timeout slice used by the polling receive loop
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Blocking transport over a single TCP connection
///
/// At most one `TcpTransport` drives the instrument at a time; the
/// acquisition driver serializes use of it through its own state machine.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    state: ConnectionState,
    addr: String,
    tx_complete: bool,
    rx_buf: Vec<u8>,
    subscribers: Vec<StateSubscriber>,
}

impl TcpTransport {
    /// Create an unconnected transport
    pub fn new() -> Self {
        TcpTransport {
            stream: None,
            state: ConnectionState::Unconnected,
            addr: String::new(),
            tx_complete: true,
            rx_buf: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Register a callback observing connection-state transitions
    pub fn on_state_change(&mut self, subscriber: StateSubscriber) {
        self.subscribers.push(subscriber);
    }

    /// Connect to the instrument server
    ///
    /// Resolves `addr` and attempts each resolved address with a bounded
    /// wait of 2 seconds. Connect never partially succeeds: on failure the
    /// transport is back in `Unconnected` and the returned error carries
    /// the last state the attempt reached.
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::ConnectFailed`] - No resolved address accepted the
    ///   connection within the bounded wait
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mrconsole_rust::io::TcpTransport;
    ///
    /// let mut transport = TcpTransport::new();
    /// transport.connect("192.168.1.101:1001")?;
    /// # Ok::<(), mrconsole_rust::error::ConsoleError>(())
    /// ```
    pub fn connect(&mut self, addr: &str) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        info!(addr, "connecting to instrument server");

        let resolved = match addr.to_socket_addrs() {
            Ok(iter) => iter.collect::<Vec<_>>(),
            Err(e) => {
                warn!(addr, error = %e, "address resolution failed");
                self.set_state(ConnectionState::Unconnected);
                return Err(ConsoleError::ConnectFailed {
                    addr: addr.to_owned(),
                    state: ConnectionState::Connecting,
                });
            }
        };

        for socket_addr in resolved {
            match TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(POLL_SLICE))?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    self.addr = addr.to_owned();
                    self.rx_buf.clear();
                    self.set_state(ConnectionState::Connected);
                    info!(addr, "connected");
                    return Ok(());
                }
                Err(e) => {
                    debug!(%socket_addr, error = %e, "connect attempt failed");
                }
            }
        }

        self.set_state(ConnectionState::Unconnected);
        Err(ConsoleError::ConnectFailed {
            addr: addr.to_owned(),
            state: ConnectionState::Connecting,
        })
    }

    /// Close the connection
    ///
    /// Safe to call when already unconnected.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.set_state(ConnectionState::Closing);
            info!(addr = %self.addr, "disconnecting");
            // Peer may already be gone
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(error = %e, "shutdown on close");
            }
        }
        self.rx_buf.clear();
        self.set_state(ConnectionState::Unconnected);
        Ok(())
    }

    /// Whether the last `send` ran to completion
    pub fn transmit_complete(&self) -> bool {
        self.tx_complete
    }

    /// Number of bytes buffered but not yet consumed by `receive_exact`
    pub fn buffered(&self) -> usize {
        self.rx_buf.len()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            trace!(?state, "connection state transition");
            self.state = state;
            for subscriber in &self.subscribers {
                subscriber(state);
            }
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(ConsoleError::NotConnected)?;
        self.tx_complete = false;
        trace!(len = bytes.len(), "sending");
        stream.write_all(bytes)?;
        stream.flush()?;
        self.tx_complete = true;
        Ok(())
    }

    fn receive_exact(&mut self, n: usize, deadline: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(ConsoleError::NotConnected)?;
        let start = Instant::now();
        let mut chunk = [0u8; 4096];

        while self.rx_buf.len() < n {
            if start.elapsed() >= deadline {
                warn!(
                    wanted = n,
                    received = self.rx_buf.len(),
                    "receive deadline elapsed"
                );
                // Partial bytes stay buffered so the connection remains usable
                return Err(ConsoleError::Timeout {
                    wanted: n,
                    received: self.rx_buf.len(),
                });
            }
            match stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(ConsoleError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed by instrument server",
                    )))
                }
                Ok(count) => {
                    trace!(count, buffered = self.rx_buf.len(), "received chunk");
                    self.rx_buf.extend_from_slice(&chunk[..count]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let out = self.rx_buf.drain(..n).collect();
        debug!(len = n, "receive complete");
        Ok(out)
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transport_is_unconnected() {
        let transport = TcpTransport::new();
        assert_eq!(transport.state(), ConnectionState::Unconnected);
        assert!(transport.transmit_complete());
        assert_eq!(transport.buffered(), 0);
    }

    #[test]
    fn test_send_without_connection() {
        let mut transport = TcpTransport::new();
        assert!(matches!(
            transport.send(&[1, 2, 3]),
            Err(ConsoleError::NotConnected)
        ));
    }

    #[test]
    fn test_receive_without_connection() {
        let mut transport = TcpTransport::new();
        assert!(matches!(
            transport.receive_exact(8, Duration::from_millis(10)),
            Err(ConsoleError::NotConnected)
        ));
    }

    #[test]
    fn test_connect_refused_reports_last_state() {
        let mut transport = TcpTransport::new();
        // Port 1 on loopback is assumed closed
        let result = transport.connect("127.0.0.1:1");
        match result {
            Err(ConsoleError::ConnectFailed { addr, state }) => {
                assert_eq!(addr, "127.0.0.1:1");
                assert_eq!(state, ConnectionState::Connecting);
            }
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
        assert_eq!(transport.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_disconnect_when_unconnected_is_noop() {
        let mut transport = TcpTransport::new();
        transport.disconnect().unwrap();
        assert_eq!(transport.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_state_subscriber_sees_transitions() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut transport = TcpTransport::new();
        transport.on_state_change(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Failed connect transitions Connecting then back to Unconnected
        let _ = transport.connect("127.0.0.1:1");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
