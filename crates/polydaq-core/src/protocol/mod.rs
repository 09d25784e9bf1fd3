//! Serial Protocol Communication
//!
//! Implements the PolyDAQ ASCII protocol: a short command goes out, one
//! newline-terminated integer comes back.

pub mod commands;
mod connection;
mod error;
pub mod serial;
mod stream;

pub use commands::{Bridge, Command, BALANCE_MARKER};
pub use connection::{ChannelManager, ChannelSession, ConnectionState, LinkCounters};
pub use error::{ConnectionError, TransactionError};
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};

/// Default baud rate (PolyDAQ 2; PolyDAQ 1 boards use 9600)
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Highest baud rate accepted before the port is opened
pub const MAX_BAUD_RATE: u32 = 4_000_000;

/// Timeout for the greeting handshake in milliseconds
pub const HANDSHAKE_TIMEOUT_MS: u64 = 500;

/// Maximum greeting length read during the handshake
pub const GREETING_MAX_BYTES: usize = 32;

/// Timeout for one channel reading in milliseconds
pub const SAMPLE_TIMEOUT_MS: u64 = 200;

/// Per-read timeout while waiting for a bridge balance to finish
pub const BALANCE_READ_TIMEOUT_MS: u64 = 200;

/// Largest oversampling count the firmware accepts
pub const MAX_OVERSAMPLING: u8 = 99;

/// Oversampling count used unless configured otherwise
pub const DEFAULT_OVERSAMPLING: u8 = 10;
