//! Sample buffer
//!
//! Co-indexed time and channel series. Only the scheduler writes; readers go
//! through [`BufferHandle`] and see whole rows only, because the scheduler
//! holds the same lock for the entire row.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::SENTINEL;

/// One tick's worth of data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Seconds since the run started
    pub time: f64,
    /// Calibrated values in measurand order
    pub values: Vec<f64>,
}

/// Time series plus one series per measurand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBuffer {
    time_series: Vec<f64>,
    channel_series: Vec<Vec<f64>>,
    #[serde(skip)]
    run: u64,
}

impl SampleBuffer {
    /// Empty buffer with `channels` channel series
    pub fn new(channels: usize) -> Self {
        Self {
            time_series: Vec::new(),
            channel_series: vec![Vec::new(); channels],
            run: 0,
        }
    }

    /// Number of complete rows
    pub fn row_count(&self) -> usize {
        self.time_series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_series.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_series.len()
    }

    /// Elapsed times in seconds, one per row
    pub fn time_series(&self) -> &[f64] {
        &self.time_series
    }

    /// All channel series, indexed like the measurand list
    pub fn channel_series(&self) -> &[Vec<f64>] {
        &self.channel_series
    }

    /// One channel's series
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channel_series.get(index).map(Vec::as_slice)
    }

    /// Elapsed time of the newest row
    pub fn last_time(&self) -> Option<f64> {
        self.time_series.last().copied()
    }

    /// Copy out one row
    pub fn row(&self, index: usize) -> Option<Row> {
        let time = *self.time_series.get(index)?;
        let values = self
            .channel_series
            .iter()
            .map(|series| series.get(index).copied().unwrap_or(SENTINEL))
            .collect();
        Some(Row { time, values })
    }

    /// Copy out every row from `start` on
    pub fn rows_from(&self, start: usize) -> Vec<Row> {
        (start..self.row_count())
            .filter_map(|i| self.row(i))
            .collect()
    }

    /// True when every channel series has as many entries as the time series
    pub fn is_aligned(&self) -> bool {
        self.channel_series
            .iter()
            .all(|series| series.len() == self.time_series.len())
    }

    pub(crate) fn run(&self) -> u64 {
        self.run
    }

    /// Clear both series and size the buffer for a new run
    pub(crate) fn reset(&mut self, channels: usize, run: u64) {
        self.time_series.clear();
        self.channel_series = vec![Vec::new(); channels];
        self.run = run;
    }

    /// Append a row's time; the returned writer takes the channel values in
    /// order and pads anything left unwritten with the sentinel when dropped.
    pub(crate) fn begin_row(&mut self, time: f64) -> RowWriter<'_> {
        self.time_series.push(time);
        RowWriter {
            buffer: self,
            next: 0,
        }
    }
}

/// Appends one row's channel values
pub(crate) struct RowWriter<'a> {
    buffer: &'a mut SampleBuffer,
    next: usize,
}

impl RowWriter<'_> {
    pub(crate) fn push(&mut self, value: f64) {
        if let Some(series) = self.buffer.channel_series.get_mut(self.next) {
            series.push(value);
            self.next += 1;
        }
    }
}

impl Drop for RowWriter<'_> {
    fn drop(&mut self) {
        while self.next < self.buffer.channel_series.len() {
            self.buffer.channel_series[self.next].push(SENTINEL);
            self.next += 1;
        }
    }
}

/// Shared, lock-guarded access to the sample buffer.
///
/// Readers get `&SampleBuffer` inside [`BufferHandle::read`] and should copy
/// what they need and return, so the next tick is not held up by drawing or
/// disk writes.
#[derive(Clone, Default)]
pub struct BufferHandle {
    inner: Arc<Mutex<SampleBuffer>>,
}

impl BufferHandle {
    pub fn new(channels: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SampleBuffer::new(channels))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SampleBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the buffer locked
    pub fn read<R>(&self, f: impl FnOnce(&SampleBuffer) -> R) -> R {
        f(&self.lock())
    }

    /// Copy of the whole buffer
    pub fn snapshot(&self) -> SampleBuffer {
        self.read(SampleBuffer::clone)
    }

    /// Number of complete rows
    pub fn row_count(&self) -> usize {
        self.read(SampleBuffer::row_count)
    }

    /// Rows appended since `start`, for readers that keep their own cursor
    pub fn rows_since(&self, start: usize) -> Vec<Row> {
        self.read(|buffer| buffer.rows_from(start))
    }

    pub(crate) fn write(&self) -> MutexGuard<'_, SampleBuffer> {
        self.lock()
    }
}
