//! Acquisition scheduler
//!
//! A background thread wakes every `interval / 20` (capped at
//! [`MAX_PAUSE`]) and checks whether the next deadline has passed. When it
//! has, the deadline moves forward by exactly one interval, so the nominal
//! tick times never drift even when an individual tick runs late. If sampling
//! is on, the tick takes the channel for the whole row, then the buffer
//! lock, reads every measurand in order and appends one complete row. No
//! other command reaches the board between two readings of one row.
//!
//! Lock order is control, then channel, then buffer. The tick itself never
//! holds the control lock while talking to the board, and a bridge balance
//! holds only the channel, so buffer readers never wait on the device.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::buffer::BufferHandle;
use super::error::{parse_reading, AcquisitionError};
use super::SENTINEL;
use crate::calibration::{Calibration, StationCalibration};
use crate::config::{AcquisitionConfig, ConfigurationError};
use crate::measurand::Measurand;
use crate::protocol::{
    Bridge, ChannelManager, ChannelSession, CommunicationChannel, ConnectionError,
    DEFAULT_OVERSAMPLING, SAMPLE_TIMEOUT_MS,
};

/// Longest the scheduler thread sleeps between deadline checks
pub const MAX_PAUSE: Duration = Duration::from_millis(50);

/// Scheduler state as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Nothing to sample: no channel or no measurands
    Idle,
    /// Connected with measurands chosen, not sampling
    Armed,
    /// Appending a row every tick
    Sampling,
}

/// Counters for the current run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionStats {
    /// Rows appended
    pub rows: u64,
    /// Readings stored as the sentinel
    pub failed_readings: u64,
    /// Ticks that finished after the following deadline
    pub overruns: u64,
}

struct Control {
    interval: Duration,
    next_deadline: Instant,
    run_start: Instant,
    sampling: bool,
    /// Bumped by every start so a tick racing a restart can tell its row is stale
    run: u64,
    oversampling: u8,
    /// Measurands for the next run
    measurands: Arc<[Measurand]>,
    /// Measurands of the current run, fixed at start
    active: Arc<[Measurand]>,
}

struct Shared {
    channel: Arc<ChannelManager>,
    calibration: Arc<dyn Calibration>,
    control: Mutex<Control>,
    buffer: BufferHandle,
    stats: Mutex<AcquisitionStats>,
    rows: watch::Sender<usize>,
    shutdown: AtomicBool,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, AcquisitionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A tick that is due and has a run to append to
struct Tick {
    now: Instant,
    deadline: Instant,
    run: u64,
    run_start: Instant,
    measurands: Arc<[Measurand]>,
}

/// Fixed-rate sampler for one PolyDAQ board
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a scheduler and start its thread. Sampling stays off until
    /// [`Scheduler::start`].
    pub fn new(
        channel: Arc<ChannelManager>,
        calibration: Arc<dyn Calibration>,
        interval: Duration,
    ) -> Result<Self, AcquisitionError> {
        if interval.is_zero() {
            return Err(ConfigurationError::InvalidInterval(0.0).into());
        }

        let now = Instant::now();
        let empty: Arc<[Measurand]> = Arc::from(Vec::new());
        let (rows, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            channel,
            calibration,
            control: Mutex::new(Control {
                interval,
                next_deadline: now + interval,
                run_start: now,
                sampling: false,
                run: 0,
                oversampling: DEFAULT_OVERSAMPLING,
                measurands: Arc::clone(&empty),
                active: empty,
            }),
            buffer: BufferHandle::new(0),
            stats: Mutex::new(AcquisitionStats::default()),
            rows,
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("polydaq-acquisition".to_string())
            .spawn(move || run(worker_shared))
            .map_err(AcquisitionError::Spawn)?;

        debug!("Acquisition thread started, interval {:?}", interval);
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Build a scheduler for a configured station with its own channel
    /// manager
    pub fn from_config(config: &AcquisitionConfig) -> Result<Self, AcquisitionError> {
        config.validate()?;
        let calibration = StationCalibration::from_config(config.station)?;
        let scheduler = Self::new(
            Arc::new(ChannelManager::new()),
            Arc::new(calibration),
            config.default_interval()?,
        )?;
        scheduler.shared.control().oversampling = config.oversampling;
        Ok(scheduler)
    }

    /// Open a serial port and greet the board. Sampling is stopped first.
    pub fn connect(&self, port_name: &str, baud_rate: u32) -> Result<String, ConnectionError> {
        self.stop();
        let oversampling = self.shared.control().oversampling;
        self.shared.channel.open(port_name, baud_rate, oversampling)
    }

    /// Greet a board over an already open channel. Sampling is stopped first.
    pub fn connect_channel(
        &self,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<String, ConnectionError> {
        self.stop();
        let oversampling = self.shared.control().oversampling;
        self.shared.channel.open_channel(channel, oversampling)
    }

    /// Stop sampling and close the channel
    pub fn disconnect(&self) {
        self.stop();
        self.shared.channel.close();
    }

    /// Choose the measurands for the next run, in column order. Every one
    /// must have a calibration. A run already in progress keeps its list.
    pub fn set_measurands(&self, measurands: Vec<Measurand>) -> Result<(), AcquisitionError> {
        self.shared.calibration.check(&measurands)?;
        debug!("Measurands set: {}", measurand_list(&measurands));
        self.shared.control().measurands = measurands.into();
        Ok(())
    }

    /// Change the sampling period. Applies from the next deadline on.
    pub fn set_interval(&self, interval: Duration) -> Result<(), ConfigurationError> {
        if interval.is_zero() {
            return Err(ConfigurationError::InvalidInterval(0.0));
        }
        self.shared.control().interval = interval;
        debug!("Sample interval set to {:?}", interval);
        Ok(())
    }

    /// Oversampling count sent to the board at the next connect
    pub fn set_oversampling(&self, count: u8) -> Result<(), ConfigurationError> {
        if count > crate::protocol::MAX_OVERSAMPLING {
            return Err(ConfigurationError::InvalidOversampling(count));
        }
        self.shared.control().oversampling = count;
        Ok(())
    }

    /// Begin a new run: time zero is now, the buffer is cleared and sized for
    /// the current measurand list, and the first row is taken on the next
    /// check.
    pub fn start(&self) -> Result<(), AcquisitionError> {
        if !self.shared.channel.is_connected() {
            return Err(AcquisitionError::NotConnected);
        }

        let mut control = self.shared.control();
        if control.measurands.is_empty() {
            return Err(ConfigurationError::NoMeasurands.into());
        }

        control.run = control.run.wrapping_add(1);
        control.active = Arc::clone(&control.measurands);
        self.shared
            .buffer
            .write()
            .reset(control.active.len(), control.run);

        let now = Instant::now();
        control.run_start = now;
        control.next_deadline = now;
        control.sampling = true;

        *self.shared.stats() = AcquisitionStats::default();
        self.shared.rows.send_replace(0);

        info!(
            "Sampling started: {} every {:?}",
            measurand_list(&control.active),
            control.interval
        );
        Ok(())
    }

    /// Stop appending rows. A tick already reading the board finishes its row.
    pub fn stop(&self) {
        let mut control = self.shared.control();
        if control.sampling {
            control.sampling = false;
            info!("Sampling stopped");
        }
    }

    pub fn state(&self) -> RunState {
        let control = self.shared.control();
        if control.sampling {
            RunState::Sampling
        } else if !control.measurands.is_empty() && self.shared.channel.is_connected() {
            RunState::Armed
        } else {
            RunState::Idle
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.shared.control().sampling
    }

    /// Current sampling period
    pub fn interval(&self) -> Duration {
        self.shared.control().interval
    }

    /// Measurands chosen for the next run
    pub fn measurands(&self) -> Vec<Measurand> {
        self.shared.control().measurands.to_vec()
    }

    /// Measurands of the run in progress (or the last run)
    pub fn active_measurands(&self) -> Vec<Measurand> {
        self.shared.control().active.to_vec()
    }

    pub fn stats(&self) -> AcquisitionStats {
        *self.shared.stats()
    }

    /// Reader handle on the sample buffer
    pub fn buffer(&self) -> BufferHandle {
        self.shared.buffer.clone()
    }

    /// Receiver that sees the row count after every appended row
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.shared.rows.subscribe()
    }

    /// The channel manager this scheduler samples through
    pub fn channel(&self) -> &Arc<ChannelManager> {
        &self.shared.channel
    }

    /// Auto-balance a strain bridge. Blocks until the board reports
    /// completion; ticks wait for the channel meanwhile.
    pub fn balance_bridge(&self, bridge: Bridge) -> Result<String, AcquisitionError> {
        Ok(self.shared.channel.balance_bridge(bridge)?)
    }

    /// Ask the board to reset itself
    pub fn reset_device(&self) -> Result<(), AcquisitionError> {
        Ok(self.shared.channel.reset_device()?)
    }

    /// Stop the thread and wait for it to exit. Called by `Drop`.
    pub fn shutdown(&mut self) {
        self.stop();
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Acquisition thread panicked");
            }
            debug!("Acquisition thread stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn measurand_list(measurands: &[Measurand]) -> String {
    measurands
        .iter()
        .map(Measurand::command)
        .collect::<Vec<_>>()
        .join(",")
}

fn run(shared: Arc<Shared>) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let (tick, pause) = next_tick(&shared);
        if let Some(tick) = tick {
            sample_row(&shared, &tick);
        }
        thread::sleep(pause);
    }
}

/// Advance the deadline if it has passed. Returns the tick to sample, if
/// sampling, and how long to sleep before checking again.
fn next_tick(shared: &Shared) -> (Option<Tick>, Duration) {
    let mut control = shared.control();
    let pause = (control.interval / 20).min(MAX_PAUSE);
    let now = Instant::now();
    if now < control.next_deadline {
        return (None, pause);
    }

    let interval = control.interval;
    control.next_deadline += interval;

    let tick = control.sampling.then(|| Tick {
        now,
        deadline: control.next_deadline,
        run: control.run,
        run_start: control.run_start,
        measurands: Arc::clone(&control.active),
    });
    (tick, pause)
}

fn sample_row(shared: &Shared, tick: &Tick) {
    let elapsed = tick.now.saturating_duration_since(tick.run_start).as_secs_f64();
    let mut failed = 0u64;

    let rows = {
        let mut session = shared.channel.session();
        if !session.is_connected() {
            return;
        }
        let mut buffer = shared.buffer.write();
        if buffer.run() != tick.run {
            debug!("Dropping tick from a previous run");
            return;
        }

        let mut row = buffer.begin_row(elapsed);
        for measurand in tick.measurands.iter() {
            let value = match read_measurand(&mut session, &*shared.calibration, measurand) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Reading {} failed: {}", measurand.command(), e);
                    failed += 1;
                    SENTINEL
                }
            };
            row.push(value);
        }
        drop(row);
        buffer.row_count()
    };

    let overran = Instant::now() > tick.deadline;
    {
        let mut stats = shared.stats();
        stats.rows += 1;
        stats.failed_readings += failed;
        if overran {
            stats.overruns += 1;
        }
    }
    if overran {
        debug!("Tick at {:.3} s overran the next deadline", elapsed);
    }

    shared.rows.send_replace(rows);
}

fn read_measurand(
    session: &mut ChannelSession<'_>,
    calibration: &dyn Calibration,
    measurand: &Measurand,
) -> Result<f64, AcquisitionError> {
    let line = session.transact(measurand.as_bytes(), Duration::from_millis(SAMPLE_TIMEOUT_MS))?;
    let raw = parse_reading(&line)?;
    calibration.calibrate(raw, measurand).ok_or_else(|| {
        ConfigurationError::UncalibratedMeasurand {
            measurand: measurand.command().to_string(),
        }
        .into()
    })
}
