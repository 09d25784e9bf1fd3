//! Acquisition configuration
//!
//! One `AcquisitionConfig` describes a lab station: which calibrated board is
//! attached, how to talk to it, and where data files go. It is built by the
//! caller and passed in explicitly; nothing here reads configuration files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_OVERSAMPLING, MAX_OVERSAMPLING};

/// Number of calibrated stations with coefficient tables
pub const STATION_COUNT: u8 = 5;

/// Errors found while configuring a run. These are fatal: sampling cannot
/// start until they are fixed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("PolyDAQ software has not been configured for this station")]
    UnconfiguredStation,

    #[error("Station {0} has no calibration table (expected 1-{max})", max = STATION_COUNT)]
    InvalidStation(u8),

    #[error("No calibration for measurand '{measurand}'")]
    UncalibratedMeasurand { measurand: String },

    #[error("Invalid measurand command {0:?}: must be a single non-empty token")]
    InvalidMeasurand(String),

    #[error("No measurands selected")]
    NoMeasurands,

    #[error("Sample interval must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),

    #[error("Oversampling count {0} out of range (0-{max})", max = MAX_OVERSAMPLING)]
    InvalidOversampling(u8),

    #[error("Baud rate must be non-zero")]
    InvalidBaudRate,

    #[error("Data file extension must not be empty")]
    EmptyExtension,
}

/// Run configuration for one lab station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Calibrated station (board) number, 1-5. `None` until someone sets it
    /// up for the machine it runs on.
    pub station: Option<u8>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// A/D conversions averaged by the board per reading (0-99)
    pub oversampling: u8,
    /// Sample intervals offered to the user, in seconds
    pub sample_intervals: Vec<f64>,
    /// Interval used until the user picks one, in seconds
    pub default_interval: f64,
    /// Directory data files are saved in
    pub data_file_path: PathBuf,
    /// Data file extension, without the dot
    pub data_file_extension: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let data_file_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Desktop")
            .join("PolyDAQ_Data_Files");

        Self {
            station: None,
            baud_rate: DEFAULT_BAUD_RATE,
            oversampling: DEFAULT_OVERSAMPLING,
            sample_intervals: vec![
                0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0,
            ],
            default_interval: 0.1,
            data_file_path,
            data_file_extension: "csv".to_string(),
        }
    }
}

/// Check a sample interval given in seconds and convert it
pub fn interval_from_secs(secs: f64) -> Result<Duration, ConfigurationError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigurationError::InvalidInterval(secs));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Short label for a sample interval: milliseconds under a second, minutes
/// from one minute up.
pub fn interval_label(secs: f64) -> String {
    if secs < 1.0 {
        format!("{} ms", (secs * 1000.0).round())
    } else if secs < 60.0 {
        format!("{} s", secs)
    } else {
        format!("{} min", secs / 60.0)
    }
}

impl AcquisitionConfig {
    /// Configuration for a given station with everything else defaulted
    pub fn for_station(station: u8) -> Self {
        Self {
            station: Some(station),
            ..Self::default()
        }
    }

    /// Check every field. The station itself is checked when the calibration
    /// is built from it.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.baud_rate == 0 {
            return Err(ConfigurationError::InvalidBaudRate);
        }
        if self.oversampling > MAX_OVERSAMPLING {
            return Err(ConfigurationError::InvalidOversampling(self.oversampling));
        }
        for &secs in self.sample_intervals.iter().chain([&self.default_interval]) {
            interval_from_secs(secs)?;
        }
        if self.data_file_extension.trim().is_empty() {
            return Err(ConfigurationError::EmptyExtension);
        }
        Ok(())
    }

    /// Default interval as a `Duration`
    pub fn default_interval(&self) -> Result<Duration, ConfigurationError> {
        interval_from_secs(self.default_interval)
    }

    /// Default data file name, stamped with the local date and time
    pub fn default_file_name(&self) -> String {
        chrono::Local::now()
            .format("%a_%m.%d.%y_%I.%M%p")
            .to_string()
    }

    /// Full path for a data file, adding the configured extension when the
    /// name lacks it
    pub fn data_file(&self, name: &str) -> PathBuf {
        let suffix = format!(".{}", self.data_file_extension);
        if name.ends_with(&suffix) {
            self.data_file_path.join(name)
        } else {
            self.data_file_path.join(format!("{}{}", name, suffix))
        }
    }
}

impl fmt::Display for AcquisitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.station {
            Some(station) => writeln!(f, "Station:      {}", station)?,
            None => writeln!(f, "Station:      (not configured)")?,
        }
        writeln!(f, "Baud rate:    {}", self.baud_rate)?;
        writeln!(f, "Oversampling: {}", self.oversampling)?;
        writeln!(f, "File path:    {}", self.data_file_path.display())?;
        writeln!(f, "Extension:    {}", self.data_file_extension)?;
        let labels: Vec<String> = self
            .sample_intervals
            .iter()
            .map(|&s| interval_label(s))
            .collect();
        write!(f, "Data rates:   {}", labels.join(", "))
    }
}
