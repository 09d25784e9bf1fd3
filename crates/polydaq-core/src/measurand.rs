//! Measurands
//!
//! A measurand is the command token that makes the board send back one
//! reading from one physical channel. Its position in the configured list
//! fixes its column in the sample buffer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigurationError;

/// One physical channel to sample
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measurand {
    command: String,
    name: Option<String>,
}

impl Measurand {
    /// Create a measurand from its command token
    pub fn new(command: impl Into<String>) -> Result<Self, ConfigurationError> {
        let command = command.into();
        if command.is_empty() || !command.is_ascii() || command.chars().any(char::is_whitespace)
        {
            return Err(ConfigurationError::InvalidMeasurand(command));
        }
        Ok(Self {
            command,
            name: None,
        })
    }

    /// Attach a display name, used for column headers
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The command token sent to the board
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Display name, falling back to the command token
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.command)
    }

    /// Bytes written on the wire to request a reading
    pub fn as_bytes(&self) -> &[u8] {
        self.command.as_bytes()
    }
}

impl FromStr for Measurand {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Measurand::new(s)
    }
}

impl fmt::Display for Measurand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.command),
            None => f.write_str(&self.command),
        }
    }
}

/// Parse a list of command tokens, e.g. `"A,B,9"`
pub fn parse_list(list: &str) -> Result<Vec<Measurand>, ConfigurationError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Measurand::new)
        .collect()
}
