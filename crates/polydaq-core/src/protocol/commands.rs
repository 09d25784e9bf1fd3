//! Protocol commands
//!
//! Defines the setup and maintenance commands understood by PolyDAQ firmware.
//! Channel readings are requested with the measurand's own command token and
//! are not listed here.

use serde::{Deserialize, Serialize};

use super::{ConnectionError, MAX_OVERSAMPLING};

/// Substring the firmware prints once an auto-balance has finished
pub const BALANCE_MARKER: &str = "balance";

/// Strain gauge bridge on a PolyDAQ 2 board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bridge {
    /// First bridge ('L' command)
    First,
    /// Second bridge ('M' command)
    Second,
}

impl Bridge {
    /// Both bridges, in the order the firmware expects them to be balanced
    pub const ALL: [Bridge; 2] = [Bridge::First, Bridge::Second];

    /// Get the single-character balance command
    pub fn command_byte(&self) -> u8 {
        match self {
            Bridge::First => b'L',
            Bridge::Second => b'M',
        }
    }
}

/// Device commands for PolyDAQ communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Query firmware version / identify ('v' command)
    Identify,

    /// Set the number of A/D conversions averaged per reading ('O<n>' command)
    SetOversampling(u8),

    /// Reset the microcontroller ('R' command)
    Reset,

    /// Auto-balance one strain bridge ('L' / 'M' commands)
    BalanceBridge(Bridge),
}

impl Command {
    /// Build an oversampling command, rejecting counts the firmware cannot take
    pub fn oversampling(count: u8) -> Result<Self, ConnectionError> {
        if count > MAX_OVERSAMPLING {
            return Err(ConnectionError::InvalidParameter(format!(
                "oversampling count {} exceeds {}",
                count, MAX_OVERSAMPLING
            )));
        }
        Ok(Command::SetOversampling(count))
    }

    /// Convert command to the bytes written on the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::Identify => vec![b'v'],
            Command::SetOversampling(n) => format!("O{}\n", n).into_bytes(),
            Command::Reset => vec![b'R'],
            Command::BalanceBridge(bridge) => vec![bridge.command_byte()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Identify.to_bytes(), b"v".to_vec());
        assert_eq!(Command::Reset.to_bytes(), b"R".to_vec());
        assert_eq!(Command::SetOversampling(10).to_bytes(), b"O10\n".to_vec());
        assert_eq!(
            Command::BalanceBridge(Bridge::Second).to_bytes(),
            b"M".to_vec()
        );
    }

    #[test]
    fn test_oversampling_range() {
        assert_eq!(
            Command::oversampling(99).unwrap(),
            Command::SetOversampling(99)
        );
        assert!(matches!(
            Command::oversampling(100),
            Err(ConnectionError::InvalidParameter(_))
        ));
    }
}
