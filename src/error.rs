//! Error types for spectrometer console operations
//!
//! This module defines all error types that can occur while driving the
//! instrument: connection management, command encoding, readout framing,
//! and acquisition sequencing.

use thiserror::Error;

use crate::analysis::kspace::KSpaceBuffer;
use crate::io::transport::ConnectionState;

/// Spectrometer console error types
///
/// All fallible operations in this library return `Result<T, ConsoleError>`
/// to provide explicit error handling.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// I/O error occurred during network communication
    ///
    /// This error wraps standard library I/O errors and occurs when:
    /// - TCP connection failed or was refused
    /// - Connection lost during transmission (broken pipe)
    /// - Socket was closed by the instrument server
    ///
    /// # Example
    /// ```no_run
    /// # use mrconsole_rust::error::ConsoleError;
    /// # use std::io;
    /// let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused");
    /// let err = ConsoleError::Io(io_err);
    /// ```
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to establish a connection to the instrument server
    ///
    /// This error occurs when:
    /// - The server address is unreachable or refuses the connection
    /// - The connection attempt did not complete within the bounded wait
    ///
    /// Carries the last observed connection state so callers can report
    /// how far the attempt progressed. Connect never partially succeeds.
    #[error("Failed to connect to {addr} (last state: {state:?})")]
    ConnectFailed {
        /// Target address of the attempted connection
        addr: String,
        /// Connection state observed when the attempt was abandoned
        state: ConnectionState,
    },

    /// Operation requires an established connection
    ///
    /// This error occurs when:
    /// - A command is sent before `connect` succeeded
    /// - A readout is requested after `disconnect`
    #[error("Not connected to the instrument server")]
    NotConnected,

    /// Receive deadline elapsed before the requested bytes arrived
    ///
    /// The bytes received so far are retained by the transport, and the
    /// connection remains usable for the next command. Callers decide
    /// whether to retry or disconnect.
    #[error("Receive timed out: wanted {wanted} bytes, got {received}")]
    Timeout {
        /// Number of bytes requested
        wanted: usize,
        /// Number of bytes that had arrived when the deadline elapsed
        received: usize,
    },

    /// Malformed or incomplete frame
    ///
    /// This error occurs when:
    /// - A readout byte stream length is not a multiple of the sample size
    /// - A command word carries an unknown trigger code
    /// - A structured packet is truncated
    #[error("Invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame {
        /// Expected size in bytes based on the wire format
        expected: usize,
        /// Actual size in bytes received or parsed
        actual: usize,
    },

    /// Command parameter outside its encodable range
    ///
    /// This error occurs when:
    /// - A frequency or attenuation value does not fit its bit field
    /// - A gradient offset magnitude exceeds 20 bits
    /// - A phase-encode count or repetition time overflows its field
    ///
    /// The command is rejected before any bytes are produced.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Projection or gradient axis outside the accepted set
    ///
    /// # Example
    /// ```no_run
    /// # use mrconsole_rust::error::ConsoleError;
    /// let err = ConsoleError::InvalidAxis(7);
    /// ```
    #[error("Invalid axis: {0}")]
    InvalidAxis(u8),

    /// An acquisition is already in flight on this connection
    ///
    /// Exactly one acquisition may run at a time. Starting a new one while
    /// the driver is triggered or awaiting data is a serialization
    /// violation, not a queueing request.
    #[error("An acquisition is already in progress")]
    AcquisitionInProgress,

    /// Image acquisition ended before all phase-encode lines arrived
    ///
    /// The partially filled k-space buffer is carried in the error so a
    /// caller may still reconstruct and display an incomplete image.
    #[error("Incomplete acquisition: received {rows_received} of {expected} phase-encode lines")]
    IncompleteAcquisition {
        /// Number of rows written before the acquisition was abandoned
        rows_received: usize,
        /// Number of rows the acquisition was configured for
        expected: usize,
        /// The partial k-space assembly buffer
        partial: Box<KSpaceBuffer>,
    },

    /// Structured control packet could not be encoded or decoded
    ///
    /// This error occurs when:
    /// - The 5-element record shape is violated
    /// - The command code is unknown
    /// - The payload map contains non-string keys
    #[error("Control packet error: {0}")]
    Packet(String),

    /// Configuration could not be parsed or serialized
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for console operations
pub type Result<T> = std::result::Result<T, ConsoleError>;
