//! Network I/O module for instrument communication
//!
//! Provides the transport seam and the blocking TCP implementation used to
//! drive the instrument server.

pub mod client;
pub mod transport;

pub use client::TcpTransport;
pub use transport::{ConnectionState, StateSubscriber, Transport};
