//! Log file formats
//!
//! CSV files follow the layout lab users already open in spreadsheets: a
//! short preamble, a column header row, then one line per row with the time
//! to the millisecond, every channel value, and a trailing notes column.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::DataLogError;
use crate::acquisition::{Row, SampleBuffer};
use crate::measurand::Measurand;

/// Supported data file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Comma-separated values
    Csv,
    /// Whole-buffer JSON document
    Json,
}

impl LogFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "csv" | "txt" => Some(LogFormat::Csv),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }

    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Csv => "csv",
            LogFormat::Json => "json",
        }
    }
}

/// Describes a run at the top of a data file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogHeader {
    pub started: DateTime<Local>,
    pub station: Option<u8>,
    /// Column names in measurand order
    pub columns: Vec<String>,
}

impl LogHeader {
    /// Header for a run starting now
    pub fn new(station: Option<u8>, measurands: &[Measurand]) -> Self {
        Self {
            started: Local::now(),
            station,
            columns: measurands.iter().map(|m| m.name().to_string()).collect(),
        }
    }

    pub(super) fn write_csv<W: Write>(&self, writer: &mut W) -> Result<(), DataLogError> {
        writeln!(
            writer,
            "PolyDAQ data collection began:,{}",
            self.started.format("%m/%d/%y at %I:%M%p")
        )?;
        match self.station {
            Some(station) => writeln!(writer, "Data Acquired at Station {}.", station)?,
            None => writeln!(writer, "Data Acquired at an unconfigured station.")?,
        }
        writeln!(writer)?;
        writeln!(writer, "Data...")?;
        write!(writer, "Time (s)")?;
        for column in &self.columns {
            write!(writer, ",{}", column)?;
        }
        writeln!(writer, ",Notes")?;
        Ok(())
    }
}

pub(super) fn write_csv_row<W: Write>(
    writer: &mut W,
    row: &Row,
    note: Option<&str>,
) -> Result<(), DataLogError> {
    write!(writer, "{:.3}", row.time)?;
    for value in &row.values {
        write!(writer, ",{}", value)?;
    }
    if let Some(note) = note {
        write!(writer, ",{}", note)?;
    }
    writeln!(writer)?;
    Ok(())
}

#[derive(Serialize)]
struct JsonSnapshot<'a> {
    header: &'a LogHeader,
    #[serde(flatten)]
    buffer: &'a SampleBuffer,
}

/// Write a whole buffer to `path`, choosing the format from the extension.
///
/// Take the snapshot with [`crate::acquisition::BufferHandle::snapshot`]
/// first so the buffer lock is not held during file I/O.
pub fn write_snapshot<P: AsRef<Path>>(
    path: P,
    header: &LogHeader,
    buffer: &SampleBuffer,
) -> Result<LogFormat, DataLogError> {
    let path = path.as_ref();
    let format = LogFormat::from_extension(path)
        .ok_or_else(|| DataLogError::UnsupportedFormat(path.to_path_buf()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);

    match format {
        LogFormat::Csv => {
            header.write_csv(&mut writer)?;
            for row in buffer.rows_from(0) {
                write_csv_row(&mut writer, &row, None)?;
            }
        }
        LogFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &JsonSnapshot { header, buffer })?;
        }
    }

    writer.flush()?;
    Ok(format)
}
