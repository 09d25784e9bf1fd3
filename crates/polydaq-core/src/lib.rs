//! # PolyDAQ Core Library
//!
//! Acquisition core for PolyDAQ laboratory data acquisition boards.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial link management with one-exchange-at-a-time transactions
//! - A fixed-rate acquisition scheduler writing into a lock-guarded buffer
//! - Per-station calibration of raw A/D codes
//! - CSV data logging and JSON snapshot export
//! - A simulated board for running without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use polydaq_core::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AcquisitionConfig::for_station(3);
//! let scheduler = Scheduler::from_config(&config)?;
//!
//! let greeting = scheduler.connect("/dev/ttyUSB0", config.baud_rate)?;
//! println!("Connected to {}", greeting);
//!
//! scheduler.set_measurands(measurand::parse_list("A,9")?)?;
//! scheduler.start()?;
//! std::thread::sleep(Duration::from_secs(1));
//! scheduler.stop();
//!
//! let data = scheduler.buffer().snapshot();
//! println!("{} rows", data.row_count());
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod datalog;
pub mod demo;
pub mod measurand;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::acquisition::{
        AcquisitionError, AcquisitionStats, BufferHandle, Row, RunState, SampleBuffer, Scheduler,
        SENTINEL,
    };
    pub use crate::calibration::{Calibration, LinearCalibration, Station, StationCalibration};
    pub use crate::config::{AcquisitionConfig, ConfigurationError};
    pub use crate::datalog::{DataLogger, LogFormat, LogHeader};
    pub use crate::demo::SimulatedBoard;
    pub use crate::measurand::{self, Measurand};
    pub use crate::protocol::{Bridge, ChannelManager, ConnectionError, TransactionError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
