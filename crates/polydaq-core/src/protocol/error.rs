//! Protocol errors

use thiserror::Error;

/// Errors raised while opening the port or during the greeting handshake.
///
/// Any of these leaves the channel manager disconnected; a run cannot start
/// until the caller resolves it and opens the port again.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Cannot open port {port}: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("Serial port parameter out of range: {0}")]
    InvalidParameter(String),

    #[error("No response from PolyDAQ on {0}")]
    NoDeviceResponse(String),

    #[error("Serial port error during handshake: {0}")]
    SerialError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by a single request/response exchange.
///
/// These are recoverable: the scheduler records a sentinel reading and keeps
/// sampling.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Not connected to PolyDAQ")]
    NotConnected,

    #[error("Timed out after {0} ms waiting for a response line")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransactionError {
    /// True when the failure says nothing about the link itself, only that
    /// this one reading did not arrive in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransactionError::Timeout(_))
    }
}
