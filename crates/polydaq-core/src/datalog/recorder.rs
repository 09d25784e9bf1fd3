//! Data logger / recorder
//!
//! Appends rows to a CSV file while a run is in progress. Each call to
//! [`DataLogger::flush_new_rows`] copies the rows added since the last call
//! under the buffer lock, releases it, then writes them out.
//!
//! A logger belongs to one run. The first rows it writes bind it to the
//! buffer's run number; once a restart replaces that run, every further flush
//! fails with [`DataLogError::BufferReset`] and the file keeps only the rows of
//! the run it started with.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::format::{write_csv_row, LogHeader};
use super::DataLogError;
use crate::acquisition::BufferHandle;

/// Incremental CSV writer for one run
pub struct DataLogger<W: Write> {
    writer: W,
    /// Rows already written
    written: usize,
    /// Data columns named in the header
    columns: usize,
    /// Run the written rows came from
    run: Option<u64>,
    /// Note to attach to the next row written
    note: Option<String>,
}

impl DataLogger<BufWriter<File>> {
    /// Create (or truncate) a data file and write its header
    pub fn create<P: AsRef<Path>>(path: P, header: &LogHeader) -> Result<Self, DataLogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let logger = Self::new(BufWriter::new(File::create(path)?), header)?;
        info!("Logging data to {}", path.display());
        Ok(logger)
    }
}

impl<W: Write> DataLogger<W> {
    /// Write the header to `writer` and start logging at row 0
    pub fn new(mut writer: W, header: &LogHeader) -> Result<Self, DataLogError> {
        header.write_csv(&mut writer)?;
        Ok(Self {
            writer,
            written: 0,
            columns: header.columns.len(),
            run: None,
            note: None,
        })
    }

    /// Attach a note to the next row written. Replaces a note not yet written.
    pub fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into().replace([',', '\n', '\r'], " ");
        self.note = Some(note);
    }

    /// Number of rows written so far
    pub fn rows_written(&self) -> usize {
        self.written
    }

    /// Write every row appended to the buffer since the last call. Returns
    /// how many were written.
    ///
    /// Fails with [`DataLogError::BufferReset`] once the buffer holds a later
    /// run than the rows already written, and with
    /// [`DataLogError::ColumnMismatch`] when the run's width differs from the
    /// header. Nothing is written in either case.
    pub fn flush_new_rows(&mut self, buffer: &BufferHandle) -> Result<usize, DataLogError> {
        let (written, columns, bound) = (self.written, self.columns, self.run);
        let (run, rows) = buffer.read(|b| {
            let available = b.row_count();
            if bound.is_some_and(|run| run != b.run()) || available < written {
                return Err(DataLogError::BufferReset { written, available });
            }
            if available == written {
                return Ok((bound, Vec::new()));
            }
            if b.channel_count() != columns {
                return Err(DataLogError::ColumnMismatch {
                    expected: columns,
                    found: b.channel_count(),
                });
            }
            Ok((Some(b.run()), b.rows_from(written)))
        })?;
        self.run = run;

        for row in &rows {
            write_csv_row(&mut self.writer, row, self.note.as_deref())?;
            if let Some(note) = self.note.take() {
                debug!("Note {:?} logged at {:.3} s", note, row.time);
            }
        }
        self.writer.flush()?;

        self.written += rows.len();
        Ok(rows.len())
    }

    /// Flush and hand back the writer
    pub fn finish(mut self) -> Result<W, DataLogError> {
        self.writer.flush()?;
        debug!("Data log closed after {} rows", self.written);
        Ok(self.writer)
    }
}
