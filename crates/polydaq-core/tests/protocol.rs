use polydaq_core::demo::{BoardHandle, Reading, SimulatedBoard, DEMO_GREETING};
use polydaq_core::protocol::{
    Bridge, ChannelManager, ConnectionError, ConnectionState, TransactionError,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SAMPLE_TIMEOUT: Duration = Duration::from_millis(200);

fn connected() -> (ChannelManager, BoardHandle) {
    let board = SimulatedBoard::with_seed(42);
    let handle = board.handle();
    let manager = ChannelManager::new();
    manager
        .open_channel(Box::new(board), 10)
        .expect("simulated board should greet");
    (manager, handle)
}

#[test]
fn test_handshake_greets_and_sets_oversampling() {
    let board = SimulatedBoard::with_seed(1);
    let handle = board.handle();
    let manager = ChannelManager::new();

    let greeting = manager.open_channel(Box::new(board), 25).unwrap();

    assert_eq!(greeting, DEMO_GREETING);
    assert_eq!(manager.greeting().as_deref(), Some(DEMO_GREETING));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(handle.written(), b"vO25\n".to_vec());
    assert_eq!(handle.oversampling(), Some(25));
}

#[test]
fn test_silent_device_leaves_manager_disconnected() {
    let board = SimulatedBoard::with_seed(1);
    let handle = board.handle();
    handle.set_silent(true);
    let manager = ChannelManager::new();

    let err = manager.open_channel(Box::new(board), 10).unwrap_err();

    assert!(matches!(err, ConnectionError::NoDeviceResponse(_)));
    assert!(!manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Error);
    // The oversampling command is never sent to a board that did not answer
    assert_eq!(handle.written(), b"v".to_vec());
}

#[test]
fn test_oversampling_out_of_range() {
    let manager = ChannelManager::new();
    let err = manager
        .open_channel(Box::new(SimulatedBoard::with_seed(1)), 100)
        .unwrap_err();
    assert!(matches!(err, ConnectionError::InvalidParameter(_)));
    assert!(!manager.is_connected());
}

#[test]
fn test_open_missing_port_fails() {
    let manager = ChannelManager::new();
    let result = manager.open("/dev/polydaq-does-not-exist", 115200, 10);
    assert!(result.is_err());
    assert!(!manager.is_connected());
}

#[test]
fn test_transact_without_port() {
    let manager = ChannelManager::new();
    let err = manager.transact(b"A", SAMPLE_TIMEOUT).unwrap_err();
    assert!(matches!(err, TransactionError::NotConnected));
    assert!(matches!(
        manager.send_fire_and_forget(b"R"),
        Err(TransactionError::NotConnected)
    ));
}

#[test]
fn test_transact_reads_one_line() {
    let (manager, handle) = connected();
    handle.set_reading(b'A', Reading::Fixed(512));

    assert_eq!(manager.transact(b"A", SAMPLE_TIMEOUT).unwrap(), "512");
    assert_eq!(manager.transact(b"A", SAMPLE_TIMEOUT).unwrap(), "512");

    let counters = manager.counters();
    assert_eq!(counters.transactions, 2);
    assert_eq!(counters.tx_bytes, 2);
    assert_eq!(counters.rx_bytes, 10);
    assert_eq!(counters.timeouts, 0);
}

#[test]
fn test_transact_timeout() {
    let (manager, handle) = connected();
    handle.set_reading(b'9', Reading::Silent);

    let err = manager.transact(b"9", SAMPLE_TIMEOUT).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(manager.counters().timeouts, 1);

    // The link is still usable afterwards
    handle.set_reading(b'9', Reading::Fixed(7));
    assert_eq!(manager.transact(b"9", SAMPLE_TIMEOUT).unwrap(), "7");
}

#[test]
fn test_balance_skips_progress_lines() {
    let (manager, handle) = connected();

    let line = manager.balance_bridge(Bridge::First).unwrap();
    assert!(line.contains("balance"), "got {:?}", line);
    assert_eq!(line, "Bridge 1 balance complete");
    assert_eq!(handle.count(b'L'), 1);

    let line = manager.transact_until_contains(b"M", "balance").unwrap();
    assert_eq!(line, "Bridge 2 balance complete");
}

#[test]
fn test_reset_is_fire_and_forget() {
    let (manager, handle) = connected();
    manager.reset_device().unwrap();
    assert_eq!(handle.resets(), 1);
}

#[test]
fn test_close() {
    let (manager, _handle) = connected();
    manager.close();
    assert!(!manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.greeting(), None);
}

#[test]
fn test_session_keeps_other_callers_out() {
    let (manager, handle) = connected();
    handle.set_reading(b'A', Reading::Fixed(1));
    handle.set_reading(b'B', Reading::Fixed(2));
    let manager = Arc::new(manager);

    let mut session = manager.session();
    assert!(session.is_connected());
    assert_eq!(session.transact(b"A", SAMPLE_TIMEOUT).unwrap(), "1");

    let balancer = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.balance_bridge(Bridge::First).unwrap())
    };
    thread::sleep(Duration::from_millis(100));
    assert_eq!(session.transact(b"B", SAMPLE_TIMEOUT).unwrap(), "2");
    drop(session);

    assert_eq!(balancer.join().unwrap(), "Bridge 1 balance complete");
    assert_eq!(handle.written(), b"vO10\nABL".to_vec());
    assert_eq!(manager.counters().transactions, 3);
}

#[test]
fn test_concurrent_transactions_never_interleave() {
    let (manager, handle) = connected();
    let commands = [b'A', b'B', b'E', b'X'];
    for (i, &command) in commands.iter().enumerate() {
        handle.set_reading(command, Reading::Fixed(1000 + i as i64));
    }
    let manager = Arc::new(manager);

    let workers: Vec<_> = commands
        .iter()
        .enumerate()
        .map(|(i, &command)| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..50 {
                    let line = manager.transact(&[command], SAMPLE_TIMEOUT).unwrap();
                    assert_eq!(line, (1000 + i as i64).to_string());
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(manager.counters().transactions, 200);
}
