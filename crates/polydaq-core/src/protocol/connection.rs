//! Connection management
//!
//! Owns the link to the board and serializes every exchange on it. The board
//! is a half-duplex responder: a second command written before the first
//! answer is read would select the wrong channel, so every caller (sampling
//! thread, setup code, maintenance commands) goes through one lock.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    commands::{Bridge, BALANCE_MARKER},
    serial::{list_ports, open_port, PortInfo},
    Command, CommunicationChannel, ConnectionError, TransactionError, BALANCE_READ_TIMEOUT_MS,
    GREETING_MAX_BYTES, HANDSHAKE_TIMEOUT_MS,
};

/// Pause between polls of a port that had nothing to offer
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected and ready
    Connected,
    /// Last open attempt failed
    Error,
}

/// Cumulative traffic counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounters {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub transactions: u64,
    pub timeouts: u64,
}

struct Link {
    channel: Option<Box<dyn CommunicationChannel>>,
    state: ConnectionState,
    greeting: Option<String>,
    counters: LinkCounters,
}

impl LinkCounters {
    fn record(&mut self, tx: usize, rx: usize) {
        self.transactions = self.transactions.saturating_add(1);
        self.tx_bytes = self.tx_bytes.saturating_add(tx as u64);
        self.rx_bytes = self.rx_bytes.saturating_add(rx as u64);
    }
}

impl Link {
    fn transact(&mut self, command: &[u8], timeout: Duration) -> Result<String, TransactionError> {
        let Link {
            channel, counters, ..
        } = self;
        let channel = channel.as_mut().ok_or(TransactionError::NotConnected)?;

        let mut reader = LineReader::new();
        let result = channel
            .clear_input_buffer()
            .and_then(|_| channel.set_timeout(timeout))
            .and_then(|_| write_command(&mut **channel, command))
            .map_err(TransactionError::from)
            .and_then(|_| reader.next_line(&mut **channel, Some(timeout)));
        let restored = channel.set_timeout(Duration::ZERO);
        counters.record(command.len(), reader.received);

        match result {
            Ok(line) => {
                restored?;
                debug!(
                    "transact {:?} -> {:?}",
                    String::from_utf8_lossy(command),
                    line
                );
                Ok(line)
            }
            Err(e) => {
                if e.is_timeout() {
                    counters.timeouts = counters.timeouts.saturating_add(1);
                }
                debug!("transact {:?} failed: {}", String::from_utf8_lossy(command), e);
                Err(e)
            }
        }
    }

    fn transact_until_contains(
        &mut self,
        command: &[u8],
        marker: &str,
    ) -> Result<String, TransactionError> {
        let Link {
            channel, counters, ..
        } = self;
        let channel = channel.as_mut().ok_or(TransactionError::NotConnected)?;

        let mut reader = LineReader::new();
        let result = channel
            .clear_input_buffer()
            .and_then(|_| channel.set_timeout(Duration::from_millis(BALANCE_READ_TIMEOUT_MS)))
            .and_then(|_| write_command(&mut **channel, command))
            .map_err(TransactionError::from)
            .and_then(|_| loop {
                let line = reader.next_line(&mut **channel, None)?;
                if line.contains(marker) {
                    break Ok(line);
                }
                if !line.is_empty() {
                    debug!("waiting for {:?}: {}", marker, line);
                }
            });
        let restored = channel.set_timeout(Duration::ZERO);
        counters.record(command.len(), reader.received);

        let line = result?;
        restored?;
        Ok(line)
    }
}

/// Exclusive hold on the link for a run of exchanges.
///
/// No other caller reaches the board until the session is dropped. Calling
/// back into the [`ChannelManager`] while a session is alive deadlocks.
pub struct ChannelSession<'a> {
    link: MutexGuard<'a, Link>,
}

impl ChannelSession<'_> {
    /// Check whether a channel is open
    pub fn is_connected(&self) -> bool {
        self.link.channel.is_some()
    }

    /// Same as [`ChannelManager::transact`], inside the session
    pub fn transact(&mut self, command: &[u8], timeout: Duration) -> Result<String, TransactionError> {
        self.link.transact(command, timeout)
    }
}

/// Accumulates bytes from the channel and hands them out one line at a time.
///
/// Bytes read past a newline stay pending for the next call, which matters
/// when the board streams several progress lines in a row.
struct LineReader {
    pending: Vec<u8>,
    received: usize,
}

impl LineReader {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            received: 0,
        }
    }

    /// Read the next newline-terminated line, trimmed. With `timeout == None`
    /// this waits for as long as the device takes.
    fn next_line(
        &mut self,
        channel: &mut dyn CommunicationChannel,
        timeout: Option<Duration>,
    ) -> Result<String, TransactionError> {
        let start = Instant::now();
        let mut buffer = [0u8; 64];

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line).trim().to_string());
            }

            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return Err(TransactionError::Timeout(limit.as_millis() as u64));
                }
            }

            match channel.read(&mut buffer) {
                Ok(0) => std::thread::sleep(POLL_INTERVAL),
                Ok(n) => {
                    self.received += n;
                    self.pending.extend_from_slice(&buffer[..n]);
                }
                Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Read whatever arrives within `timeout`, stopping early at `max` bytes
fn read_up_to(
    channel: &mut dyn CommunicationChannel,
    max: usize,
    timeout: Duration,
) -> Result<Vec<u8>, ConnectionError> {
    let start = Instant::now();
    let mut response = Vec::with_capacity(max);
    let mut buffer = [0u8; GREETING_MAX_BYTES];

    while response.len() < max && start.elapsed() < timeout {
        let want = std::cmp::min(max - response.len(), buffer.len());
        match channel.read(&mut buffer[..want]) {
            Ok(0) => std::thread::sleep(POLL_INTERVAL),
            Ok(n) => response.extend_from_slice(&buffer[..n]),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(ConnectionError::SerialError(e.to_string())),
        }
    }

    Ok(response)
}

fn write_command(channel: &mut dyn CommunicationChannel, command: &[u8]) -> std::io::Result<()> {
    channel.write_all(command)?;
    channel.flush()
}

/// Greet the board and push the oversampling setting to it
fn handshake(
    channel: &mut dyn CommunicationChannel,
    oversampling: Command,
) -> Result<String, ConnectionError> {
    let timeout = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);

    channel.clear_input_buffer()?;
    channel.set_timeout(timeout)?;
    write_command(channel, &Command::Identify.to_bytes())?;
    let response = read_up_to(channel, GREETING_MAX_BYTES, timeout)?;
    channel.set_timeout(Duration::ZERO)?;

    if response.is_empty() {
        return Err(ConnectionError::NoDeviceResponse(channel.name()));
    }

    write_command(channel, &oversampling.to_bytes())?;

    Ok(String::from_utf8_lossy(&response).trim().to_string())
}

/// Single point of access to the PolyDAQ link
pub struct ChannelManager {
    link: Mutex<Link>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    /// Create a manager with no port open
    pub fn new() -> Self {
        Self {
            link: Mutex::new(Link {
                channel: None,
                state: ConnectionState::Disconnected,
                greeting: None,
                counters: LinkCounters::default(),
            }),
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    // A panic on another thread mid-exchange leaves the link usable: the
    // next transaction clears stale input before writing.
    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a serial port, greet the board and configure oversampling.
    ///
    /// Returns the board's greeting text. On failure the manager is left
    /// without a channel and sampling must not start.
    pub fn open(
        &self,
        port_name: &str,
        baud_rate: u32,
        oversampling: u8,
    ) -> Result<String, ConnectionError> {
        Command::oversampling(oversampling)?;
        let channel = open_port(port_name, baud_rate)?;
        self.open_channel(Box::new(channel), oversampling)
    }

    /// Run the greeting handshake on an already constructed channel
    pub fn open_channel(
        &self,
        mut channel: Box<dyn CommunicationChannel>,
        oversampling: u8,
    ) -> Result<String, ConnectionError> {
        let oversampling = Command::oversampling(oversampling)?;

        let mut link = self.lock();
        if link.channel.take().is_some() {
            info!("Replacing open PolyDAQ channel");
        }
        link.greeting = None;

        let name = channel.name();
        debug!("Greeting PolyDAQ on {}", name);

        match handshake(&mut *channel, oversampling) {
            Ok(greeting) => {
                info!("Connected to {} on {}", greeting, name);
                link.channel = Some(channel);
                link.state = ConnectionState::Connected;
                link.greeting = Some(greeting.clone());
                Ok(greeting)
            }
            Err(e) => {
                warn!("PolyDAQ handshake on {} failed: {}", name, e);
                link.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// Drop the channel
    pub fn close(&self) {
        let mut link = self.lock();
        if link.channel.take().is_some() {
            info!("PolyDAQ channel closed");
        }
        link.greeting = None;
        link.state = ConnectionState::Disconnected;
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Check whether a channel is open
    pub fn is_connected(&self) -> bool {
        self.lock().channel.is_some()
    }

    /// Greeting returned by the board at connect time
    pub fn greeting(&self) -> Option<String> {
        self.lock().greeting.clone()
    }

    /// Get cumulative traffic counters
    pub fn counters(&self) -> LinkCounters {
        self.lock().counters
    }

    /// Write a command and read one response line within `timeout`.
    ///
    /// Stale input is discarded first so an answer that arrived late for a
    /// previous command cannot be taken for this one. The read timeout is
    /// put back to zero afterwards whether or not the exchange succeeded.
    pub fn transact(&self, command: &[u8], timeout: Duration) -> Result<String, TransactionError> {
        self.lock().transact(command, timeout)
    }

    /// Take the link for several exchanges in a row, e.g. one reading per
    /// measurand, with nothing else written in between.
    pub fn session(&self) -> ChannelSession<'_> {
        ChannelSession { link: self.lock() }
    }

    /// Write a command that has no answer (e.g. reset)
    pub fn send_fire_and_forget(&self, command: &[u8]) -> Result<(), TransactionError> {
        let mut guard = self.lock();
        let Link {
            channel, counters, ..
        } = &mut *guard;
        let channel = channel.as_mut().ok_or(TransactionError::NotConnected)?;

        write_command(&mut **channel, command)?;
        counters.tx_bytes = counters.tx_bytes.saturating_add(command.len() as u64);
        debug!("sent {:?} (no response expected)", String::from_utf8_lossy(command));
        Ok(())
    }

    /// Write a command and keep reading lines until one contains `marker`.
    ///
    /// There is no overall timeout: the board decides how long the operation
    /// takes. The channel lock is held throughout, so callers must not hold
    /// any other lock while waiting here.
    pub fn transact_until_contains(
        &self,
        command: &[u8],
        marker: &str,
    ) -> Result<String, TransactionError> {
        self.lock().transact_until_contains(command, marker)
    }

    /// Auto-balance one strain bridge (PolyDAQ 2 only). Blocks until the
    /// board reports completion.
    pub fn balance_bridge(&self, bridge: Bridge) -> Result<String, TransactionError> {
        info!("Balancing bridge {:?}", bridge);
        let line = self.transact_until_contains(
            &Command::BalanceBridge(bridge).to_bytes(),
            BALANCE_MARKER,
        )?;
        info!("Bridge {:?}: {}", bridge, line);
        Ok(line)
    }

    /// Ask the board to reset itself
    pub fn reset_device(&self) -> Result<(), TransactionError> {
        info!("Resetting PolyDAQ");
        self.send_fire_and_forget(&Command::Reset.to_bytes())
    }
}
