use polydaq_core::acquisition::{
    is_sentinel, AcquisitionError, BufferHandle, RunState, Scheduler, SENTINEL,
};
use polydaq_core::calibration::{Calibration, Station, StationCalibration};
use polydaq_core::config::{AcquisitionConfig, ConfigurationError};
use polydaq_core::demo::{BoardHandle, Reading, SimulatedBoard};
use polydaq_core::measurand::{parse_list, Measurand};
use polydaq_core::protocol::{Bridge, ChannelManager};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn calibration() -> StationCalibration {
    StationCalibration::new(Station::new(1).unwrap())
}

fn connected_scheduler(interval: Duration) -> (Scheduler, BoardHandle) {
    let board = SimulatedBoard::with_seed(7);
    let handle = board.handle();
    let scheduler = Scheduler::new(
        Arc::new(ChannelManager::new()),
        Arc::new(calibration()),
        interval,
    )
    .unwrap();
    scheduler.connect_channel(Box::new(board)).unwrap();
    (scheduler, handle)
}

fn wait_for_rows(buffer: &BufferHandle, rows: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while buffer.row_count() < rows {
        assert!(Instant::now() < deadline, "timed out waiting for {} rows", rows);
        thread::sleep(Duration::from_millis(5));
    }
}

fn m(command: &str) -> Measurand {
    Measurand::new(command).unwrap()
}

#[test]
fn test_fixed_rate_rows() {
    let (scheduler, board) = connected_scheduler(Duration::from_millis(100));
    board.set_reading(b'A', Reading::Fixed(512));
    scheduler.set_measurands(vec![m("A")]).unwrap();

    scheduler.start().unwrap();
    thread::sleep(Duration::from_secs(1));
    scheduler.stop();
    // Let a tick already in flight land before looking
    thread::sleep(Duration::from_millis(50));

    let data = scheduler.buffer().snapshot();
    let rows = data.row_count();
    assert!((9..=11).contains(&rows), "got {} rows", rows);
    assert!(data.is_aligned());

    let expected = calibration().calibrate(512, &m("A")).unwrap();
    assert!(data.channel(0).unwrap().iter().all(|&v| v == expected));

    let times = data.time_series();
    assert!(times[0] < 0.05, "first row at {}", times[0]);
    assert!(times.windows(2).all(|w| w[1] >= w[0]));
    let mean_step = (times[rows - 1] - times[0]) / (rows - 1) as f64;
    assert!((0.08..0.12).contains(&mean_step), "mean step {}", mean_step);

    assert_eq!(scheduler.stats().rows, rows as u64);
    assert_eq!(scheduler.stats().failed_readings, 0);
}

#[test]
fn test_error_response_stores_sentinel() {
    let (scheduler, board) = connected_scheduler(Duration::from_millis(50));
    board.set_reading(b'A', Reading::Text("ERR".to_string()));
    scheduler.set_measurands(vec![m("A")]).unwrap();

    scheduler.start().unwrap();
    let buffer = scheduler.buffer();
    wait_for_rows(&buffer, 1);
    board.set_reading(b'A', Reading::Fixed(512));
    let seen = buffer.row_count();
    wait_for_rows(&buffer, seen + 3);
    scheduler.stop();

    let data = buffer.snapshot();
    let values = data.channel(0).unwrap();
    assert_eq!(values[0], SENTINEL);
    let expected = calibration().calibrate(512, &m("A")).unwrap();
    assert_eq!(*values.last().unwrap(), expected);
    assert!(data.is_aligned());
    assert!(scheduler.stats().failed_readings >= 1);
}

#[test]
fn test_timeout_stores_sentinel_and_keeps_alignment() {
    let (scheduler, board) = connected_scheduler(Duration::from_millis(500));
    board.set_reading(b'A', Reading::Fixed(2000));
    board.set_reading(b'B', Reading::Silent);
    board.set_reading(b'X', Reading::Fixed(100));
    scheduler.set_measurands(parse_list("A,B,X").unwrap()).unwrap();

    scheduler.start().unwrap();
    let buffer = scheduler.buffer();
    wait_for_rows(&buffer, 2);
    scheduler.stop();

    let data = buffer.snapshot();
    assert!(data.is_aligned());
    let cal = calibration();
    for row in data.rows_from(0) {
        assert_eq!(row.values[0], cal.calibrate(2000, &m("A")).unwrap());
        assert!(is_sentinel(row.values[1]));
        assert_eq!(row.values[2], cal.calibrate(100, &m("X")).unwrap());
    }
    assert!(scheduler.channel().counters().timeouts >= 2);
}

#[test]
fn test_restart_resets_buffer_and_time() {
    let (scheduler, _board) = connected_scheduler(Duration::from_millis(20));
    scheduler.set_measurands(parse_list("A,B").unwrap()).unwrap();

    scheduler.start().unwrap();
    let buffer = scheduler.buffer();
    wait_for_rows(&buffer, 10);
    scheduler.stop();
    thread::sleep(Duration::from_millis(50));
    let first_run = buffer.snapshot();

    scheduler.set_measurands(vec![m("9")]).unwrap();
    scheduler.start().unwrap();
    let restarted = buffer.snapshot();
    assert!(restarted.row_count() <= 1);
    assert_eq!(restarted.channel_count(), 1);

    wait_for_rows(&buffer, 3);
    scheduler.stop();
    let second_run = buffer.snapshot();
    assert!(second_run.time_series()[0] < first_run.last_time().unwrap());
    assert!(second_run.is_aligned());
    assert_eq!(scheduler.active_measurands(), vec![m("9")]);
}

#[test]
fn test_stop_freezes_buffer() {
    let (scheduler, _board) = connected_scheduler(Duration::from_millis(20));
    scheduler.set_measurands(vec![m("A")]).unwrap();
    scheduler.start().unwrap();
    let buffer = scheduler.buffer();
    wait_for_rows(&buffer, 3);
    scheduler.stop();
    thread::sleep(Duration::from_millis(50));

    let frozen = buffer.row_count();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(buffer.row_count(), frozen);
}

#[test]
fn test_concurrent_readers_see_whole_rows() {
    let (scheduler, _board) = connected_scheduler(Duration::from_millis(5));
    scheduler.set_measurands(parse_list("A,B,9,X").unwrap()).unwrap();
    scheduler.start().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let buffer = scheduler.buffer();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut snapshots = 0;
                while !done.load(Ordering::Relaxed) {
                    let aligned = buffer.read(|b| b.is_aligned());
                    assert!(aligned);
                    snapshots += 1;
                    thread::sleep(Duration::from_micros(100));
                }
                snapshots
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(500));
    done.store(true, Ordering::Relaxed);
    scheduler.stop();

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert!(scheduler.buffer().row_count() > 10);
}

#[test]
fn test_balance_never_splits_a_row() {
    let (scheduler, board) = connected_scheduler(Duration::from_millis(5));
    board.set_latency(Duration::from_millis(1));
    scheduler.set_measurands(parse_list("A,B,9,X").unwrap()).unwrap();
    scheduler.start().unwrap();
    let buffer = scheduler.buffer();

    for bridge in [Bridge::First, Bridge::Second].into_iter().cycle().take(10) {
        wait_for_rows(&buffer, buffer.row_count() + 1);
        scheduler.balance_bridge(bridge).unwrap();
    }
    scheduler.stop();
    thread::sleep(Duration::from_millis(50));

    // Everything after the handshake is whole rows, with balances between them
    let written = board.written();
    let greeted = written.iter().position(|&b| b == b'\n').unwrap() + 1;
    let mut rows = 0;
    for segment in written[greeted..].split(|&b| b == b'L' || b == b'M') {
        assert_eq!(segment.len() % 4, 0, "split row in {:?}", segment);
        assert!(segment.chunks(4).all(|row| row == b"AB9X"));
        rows += segment.len() / 4;
    }
    assert_eq!(rows, buffer.row_count());
    assert_eq!(board.count(b'L') + board.count(b'M'), 10);
}

#[test]
fn test_start_requires_connection_and_measurands() {
    let scheduler = Scheduler::new(
        Arc::new(ChannelManager::new()),
        Arc::new(calibration()),
        Duration::from_millis(100),
    )
    .unwrap();
    scheduler.set_measurands(vec![m("A")]).unwrap();
    assert!(matches!(
        scheduler.start(),
        Err(AcquisitionError::NotConnected)
    ));

    let (scheduler, _board) = connected_scheduler(Duration::from_millis(100));
    assert!(matches!(
        scheduler.start(),
        Err(AcquisitionError::Configuration(
            ConfigurationError::NoMeasurands
        ))
    ));
}

#[test]
fn test_uncalibrated_measurand_rejected() {
    let (scheduler, _board) = connected_scheduler(Duration::from_millis(100));
    let err = scheduler.set_measurands(parse_list("A,Q").unwrap()).unwrap_err();
    assert!(matches!(
        err,
        AcquisitionError::Configuration(ConfigurationError::UncalibratedMeasurand { .. })
    ));
    assert!(scheduler.measurands().is_empty());
}

#[test]
fn test_zero_interval_rejected() {
    let (scheduler, _board) = connected_scheduler(Duration::from_millis(100));
    assert_eq!(
        scheduler.set_interval(Duration::ZERO),
        Err(ConfigurationError::InvalidInterval(0.0))
    );
    scheduler.set_interval(Duration::from_millis(250)).unwrap();
    assert_eq!(scheduler.interval(), Duration::from_millis(250));
}

#[test]
fn test_state_transitions() {
    let (scheduler, _board) = connected_scheduler(Duration::from_millis(50));
    assert_eq!(scheduler.state(), RunState::Idle);

    scheduler.set_measurands(vec![m("A")]).unwrap();
    assert_eq!(scheduler.state(), RunState::Armed);

    scheduler.start().unwrap();
    assert_eq!(scheduler.state(), RunState::Sampling);

    scheduler.stop();
    assert_eq!(scheduler.state(), RunState::Armed);

    scheduler.disconnect();
    assert_eq!(scheduler.state(), RunState::Idle);
}

#[test]
fn test_from_config_needs_station() {
    let err = Scheduler::from_config(&AcquisitionConfig::default())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        AcquisitionError::Configuration(ConfigurationError::UnconfiguredStation)
    ));

    let scheduler = Scheduler::from_config(&AcquisitionConfig::for_station(2)).unwrap();
    assert_eq!(scheduler.interval(), Duration::from_millis(100));
    assert_eq!(scheduler.state(), RunState::Idle);
}

#[test]
fn test_maintenance_commands_pass_through() {
    let (scheduler, board) = connected_scheduler(Duration::from_millis(100));
    let line = scheduler.balance_bridge(Bridge::Second).unwrap();
    assert!(line.contains("balance"));
    assert_eq!(board.count(b'M'), 1);

    scheduler.reset_device().unwrap();
    assert_eq!(board.resets(), 1);
}

#[tokio::test]
async fn test_row_notifications() {
    let (scheduler, _board) = connected_scheduler(Duration::from_millis(20));
    scheduler.set_measurands(vec![m("A")]).unwrap();
    let mut rows = scheduler.subscribe();

    scheduler.start().unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            rows.changed().await.unwrap();
            let count = *rows.borrow_and_update();
            if count >= 3 {
                break count;
            }
        }
    })
    .await
    .expect("row notifications should arrive");
    scheduler.stop();

    assert!(seen >= 3);
    assert!(scheduler.buffer().row_count() >= seen);
}
