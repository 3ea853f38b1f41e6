//! Transport abstraction for the instrument link
//!
//! The console drives exactly one stream connection to the instrument
//! server. This module defines the connection state machine and the
//! blocking, deadline-bearing send/receive seam that the acquisition
//! driver is written against.

use std::time::Duration;

use crate::error::Result;

/// Lifecycle of the single instrument connection
///
/// Transitions run `Unconnected -> Connecting -> Connected -> Closing ->
/// Unconnected`. A failed connect falls back to `Unconnected` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Closing,
}

/// Callback invoked on every connection-state transition
///
/// Used by display layers to mirror link status. Subscribers run on the
/// thread performing the transition.
pub type StateSubscriber = Box<dyn Fn(ConnectionState) + Send>;

/// Blocking send/receive seam over the instrument link
///
/// Implementations own the connection exclusively. Both operations are
/// synchronous: `send` returns only once every byte is flushed, and
/// `receive_exact` is all-or-nothing against its deadline.
pub trait Transport {
    /// Write all bytes and flush, or fail
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Block until exactly `n` bytes are available, or the deadline elapses
    ///
    /// A timeout returns [`ConsoleError::Timeout`](crate::error::ConsoleError::Timeout)
    /// and keeps the bytes received so far buffered, so a later call can
    /// resume where this one stopped. A short buffer is never returned.
    fn receive_exact(&mut self, n: usize, deadline: Duration) -> Result<Vec<u8>>;

    /// Current state of the underlying connection
    fn state(&self) -> ConnectionState;
}
