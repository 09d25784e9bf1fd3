//! Calibration
//!
//! Converts raw A/D codes into engineering units. Every PolyDAQ board is
//! calibrated individually, so the conversion depends on the station the
//! board belongs to as well as on the channel.
//!
//! - Thermocouples (`9`, `8`, `7`, `6`): °C, linear with a per-station offset
//! - Voltages (`A`, `B`): V, -8 to +8 V range, same for every station
//! - Millivoltages (`E`, `F`): mV, two quadratic segments split at code 150
//! - Accelerometer (`X`, `Y`, `Z`): g

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{ConfigurationError, STATION_COUNT};
use crate::measurand::Measurand;

/// Conversion from raw codes to engineering values.
///
/// Implementations must be pure: the same code and measurand always give the
/// same value. `None` means the measurand has no calibration; schedulers
/// check this up front with [`Calibration::check`] so it never happens while
/// sampling.
pub trait Calibration: Send + Sync {
    /// Convert one raw reading
    fn calibrate(&self, raw: i64, measurand: &Measurand) -> Option<f64>;

    /// Make sure every measurand in the list can be converted
    fn check(&self, measurands: &[Measurand]) -> Result<(), ConfigurationError> {
        match measurands
            .iter()
            .find(|m| self.calibrate(0, m).is_none())
        {
            Some(m) => Err(ConfigurationError::UncalibratedMeasurand {
                measurand: m.command().to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl<F> Calibration for F
where
    F: Fn(i64, &Measurand) -> Option<f64> + Send + Sync,
{
    fn calibrate(&self, raw: i64, measurand: &Measurand) -> Option<f64> {
        self(raw, measurand)
    }
}

/// A calibrated station number (1-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Station(u8);

impl Station {
    /// Validate a station number
    pub fn new(number: u8) -> Result<Self, ConfigurationError> {
        if (1..=STATION_COUNT).contains(&number) {
            Ok(Self(number))
        } else {
            Err(ConfigurationError::InvalidStation(number))
        }
    }

    /// Station from a configuration entry that may not be filled in yet
    pub fn from_config(number: Option<u8>) -> Result<Self, ConfigurationError> {
        number
            .ok_or(ConfigurationError::UnconfiguredStation)
            .and_then(Self::new)
    }

    /// Station number
    pub fn number(&self) -> u8 {
        self.0
    }

    fn index(&self) -> usize {
        usize::from(self.0 - 1)
    }
}

/// A/D volts per count: 3.3 V reference over 12 bits
const VOLTS_PER_COUNT: f64 = 3.3 / 4095.0;

/// Thermocouple amplifier output, volts per °C
const THERMOCOUPLE_GAIN: f64 = 0.005;

/// Thermocouple amplifier zero-point voltage, [channel][station]
const THERMOCOUPLE_OFFSETS: [[f64; 5]; 4] = [
    [1.24974, 1.2539, 1.25475, 1.25475, 1.25375],
    [1.2522, 1.24965, 1.249, 1.25397, 1.249],
    [1.25, 1.25015, 1.246, 1.250615, 1.24885],
    [1.24775, 1.2534, 1.25125, 1.252265, 1.252],
];

/// Millivolt codes at or below this use the low-range fit
const MILLIVOLT_SPLIT: i64 = 150;

/// Quadratic fit `a·x² + b·x + c`
type Quadratic = [f64; 3];

/// Millivoltage fits, [channel][station] for codes <= split
const MILLIVOLT_LOW: [[Quadratic; 5]; 2] = [
    [
        [-1.71396e-5, 0.01136, -0.1793],
        [-1.80897e-5, 0.011422, -0.1881],
        [-9.0919e-6, 0.010041, -0.20884],
        [-1.42525e-5, 0.010877, -0.1957],
        [-6.5858e-6, 0.009567, -0.25476],
    ],
    [
        [-1.03404e-5, 0.010282, -0.21979],
        [-1.95506e-5, 0.011726, -0.18104],
        [-1.2052e-5, 0.01053, -0.19212],
        [-1.75013e-5, 0.011398, -0.17914],
        [-2.37306e-5, 0.012318, -0.16209],
    ],
];

/// Millivoltage fits, [channel][station] for codes above split
const MILLIVOLT_HIGH: [[Quadratic; 5]; 2] = [
    [
        [-4.5337e-9, 0.008051, -0.04801],
        [2.0686e-9, 0.0080179, -0.030353],
        [1.6738e-9, 0.0080214, -0.09074],
        [1.791559e-9, 0.0080229, -0.05407],
        [1.9942e-9, 0.0080173, -0.15493],
    ],
    [
        [-3.72858e-9, 0.008067, -0.13588],
        [5.69066e-10, 0.008031, -0.02149],
        [1.57139e-9, 0.008028, -0.06840],
        [1.24726e-9, 0.008034, -0.03039],
        [1.39109e-9, 0.008028, 0.02078],
    ],
];

const VOLTAGE_SLOPE: f64 = 0.00513;
const VOLTAGE_OFFSET: f64 = -8.8537;
const ACCELERATION_SLOPE: f64 = 0.000061;

fn quadratic(fit: &Quadratic, x: f64) -> f64 {
    fit[0] * x * x + fit[1] * x + fit[2]
}

/// The PolyDAQ coefficient tables for one station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationCalibration {
    station: Station,
}

impl StationCalibration {
    pub fn new(station: Station) -> Self {
        Self { station }
    }

    /// Build from the configured station number
    pub fn from_config(number: Option<u8>) -> Result<Self, ConfigurationError> {
        Station::from_config(number).map(Self::new)
    }

    pub fn station(&self) -> Station {
        self.station
    }
}

impl Calibration for StationCalibration {
    fn calibrate(&self, raw: i64, measurand: &Measurand) -> Option<f64> {
        let s = self.station.index();
        let x = raw as f64;

        let value = match measurand.command() {
            "9" | "8" | "7" | "6" => {
                let channel = match measurand.command() {
                    "9" => 0,
                    "8" => 1,
                    "7" => 2,
                    _ => 3,
                };
                (x * VOLTS_PER_COUNT - THERMOCOUPLE_OFFSETS[channel][s]) / THERMOCOUPLE_GAIN
            }
            "A" | "B" => x * VOLTAGE_SLOPE + VOLTAGE_OFFSET,
            "E" | "F" => {
                let channel = usize::from(measurand.command() == "F");
                let fit = if raw <= MILLIVOLT_SPLIT {
                    &MILLIVOLT_LOW[channel][s]
                } else {
                    &MILLIVOLT_HIGH[channel][s]
                };
                quadratic(fit, x)
            }
            "X" | "Y" | "Z" => x * ACCELERATION_SLOPE,
            _ => return None,
        };

        Some(value)
    }
}

/// Every channel the station tables cover, with its display name
pub fn standard_channels() -> Vec<Measurand> {
    [
        ("A", "Voltage 1"),
        ("B", "Voltage 2"),
        ("9", "Thermocouple 1"),
        ("8", "Thermocouple 2"),
        ("7", "Thermocouple 3"),
        ("6", "Thermocouple 4"),
        ("E", "Millivoltage 1"),
        ("F", "Millivoltage 2"),
        ("X", "X Acceleration"),
        ("Y", "Y Acceleration"),
        ("Z", "Z Acceleration"),
    ]
    .into_iter()
    .filter_map(|(command, name)| Measurand::new(command).ok().map(|m| m.with_name(name)))
    .collect()
}

/// Slope and offset for one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearCoefficients {
    pub slope: f64,
    pub offset: f64,
}

/// Per-channel `slope·code + offset` table, for boards without a station
/// fit (PolyDAQ 1)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearCalibration {
    channels: HashMap<String, LinearCoefficients>,
}

impl LinearCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one channel's coefficients
    pub fn with(mut self, command: impl Into<String>, slope: f64, offset: f64) -> Self {
        self.channels
            .insert(command.into(), LinearCoefficients { slope, offset });
        self
    }

    pub fn coefficients(&self, command: &str) -> Option<LinearCoefficients> {
        self.channels.get(command).copied()
    }
}

impl Calibration for LinearCalibration {
    fn calibrate(&self, raw: i64, measurand: &Measurand) -> Option<f64> {
        self.channels
            .get(measurand.command())
            .map(|c| raw as f64 * c.slope + c.offset)
    }
}
