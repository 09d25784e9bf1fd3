//! Fixed-rate acquisition
//!
//! The [`Scheduler`] owns a background thread that polls every configured
//! measurand once per tick and appends one row to the [`SampleBuffer`].
//! Display and logging code reads the buffer through a [`BufferHandle`] and
//! can wait for new rows with [`Scheduler::subscribe`].

mod buffer;
mod error;
mod scheduler;

pub use buffer::{BufferHandle, Row, SampleBuffer};
pub use error::{parse_reading, AcquisitionError, ParseError};
pub use scheduler::{AcquisitionStats, RunState, Scheduler};

/// Stored in place of a reading that could not be taken or parsed.
/// Outside any physical range the board can report.
pub const SENTINEL: f64 = -999e9;

/// Check whether a stored value marks a failed reading
pub fn is_sentinel(value: f64) -> bool {
    value == SENTINEL
}
