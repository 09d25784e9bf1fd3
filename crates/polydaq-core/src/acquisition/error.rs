//! Acquisition errors

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::protocol::{ConnectionError, TransactionError};

/// A response line that does not hold an A/D reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty response")]
    Empty,

    #[error("Response {0:?} is not an integer reading")]
    NotAnInteger(String),
}

/// Parse a response line as a raw A/D code. Surrounding whitespace and an
/// explicit sign are accepted.
pub fn parse_reading(line: &str) -> Result<i64, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| ParseError::NotAnInteger(trimmed.to_string()))
}

/// Errors returned by the acquisition scheduler
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Not connected to PolyDAQ")]
    NotConnected,

    #[error("Failed to start acquisition thread: {0}")]
    Spawn(std::io::Error),
}
