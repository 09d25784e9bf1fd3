//! Demo Mode - simulated PolyDAQ board
//!
//! A [`CommunicationChannel`] that answers the PolyDAQ command set without
//! hardware: it greets on `v`, accepts `O<n>\n` and `R` silently, streams
//! progress lines for `L`/`M` and answers every other byte with an A/D code.
//! Useful for trying the software on a laptop and for tests, which can script
//! bad answers and silences through a [`BoardHandle`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::protocol::CommunicationChannel;

/// Greeting sent in answer to `v`
pub const DEMO_GREETING: &str = "PolyDAQ 2 (simulated)";

/// Mid-scale code of the 12-bit converter
const MID_SCALE: i64 = 2048;

/// What the board sends back for one measurand
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Always the same code
    Fixed(i64),
    /// A code drawn uniformly from `center ± spread`
    Noisy { center: i64, spread: i64 },
    /// A literal line, e.g. garbage to exercise parse failures
    Text(String),
    /// No answer at all
    Silent,
}

struct BoardState {
    output: VecDeque<u8>,
    written: Vec<u8>,
    /// Digits of an `O<n>` command still being received
    oversampling_digits: Option<String>,
    oversampling: Option<u8>,
    readings: HashMap<u8, Reading>,
    silent: bool,
    latency: Duration,
    resets: u32,
    rng: StdRng,
}

impl BoardState {
    fn reply(&mut self, line: &str) {
        self.output.extend(line.as_bytes());
        self.output.extend(b"\r\n");
    }

    fn receive(&mut self, byte: u8) {
        if let Some(digits) = self.oversampling_digits.as_mut() {
            if byte == b'\n' {
                self.oversampling = digits.parse().ok();
                self.oversampling_digits = None;
            } else {
                digits.push(char::from(byte));
            }
            return;
        }

        match byte {
            b'O' => self.oversampling_digits = Some(String::new()),
            b'\r' | b'\n' => {}
            _ if self.silent => {}
            b'v' => self.reply(DEMO_GREETING),
            b'R' => {
                self.resets += 1;
                self.output.clear();
            }
            b'L' | b'M' => {
                let bridge = if byte == b'L' { 1 } else { 2 };
                self.reply(&format!("Balancing bridge {}", bridge));
                for step in 1..=3 {
                    self.reply(&format!("  step {}: offset {}", step, 64 >> step));
                }
                self.reply(&format!("Bridge {} balance complete", bridge));
            }
            _ => {
                let reading = self
                    .readings
                    .get(&byte)
                    .cloned()
                    .unwrap_or(Reading::Noisy {
                        center: MID_SCALE,
                        spread: 4,
                    });
                match reading {
                    Reading::Fixed(code) => self.reply(&code.to_string()),
                    Reading::Noisy { center, spread } => {
                        let code = self.rng.gen_range(center - spread..=center + spread);
                        self.reply(&code.to_string());
                    }
                    Reading::Text(text) => self.reply(&text),
                    Reading::Silent => {}
                }
            }
        }
    }
}

/// Simulated board, handed to the channel manager as its channel
pub struct SimulatedBoard {
    state: Arc<Mutex<BoardState>>,
}

/// Test-side control over a [`SimulatedBoard`] after it has been handed off
#[derive(Clone)]
pub struct BoardHandle {
    state: Arc<Mutex<BoardState>>,
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBoard {
    /// Create a board with random noise on every channel
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a board whose noise is reproducible
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            state: Arc::new(Mutex::new(BoardState {
                output: VecDeque::new(),
                written: Vec::new(),
                oversampling_digits: None,
                oversampling: None,
                readings: HashMap::new(),
                silent: false,
                latency: Duration::ZERO,
                resets: 0,
                rng,
            })),
        }
    }

    /// Handle for scripting and inspecting the board
    pub fn handle(&self) -> BoardHandle {
        BoardHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl BoardHandle {
    /// Set the answer for a single-byte measurand command
    pub fn set_reading(&self, command: u8, reading: Reading) {
        lock(&self.state).readings.insert(command, reading);
    }

    /// Make the board ignore everything (as if unplugged)
    pub fn set_silent(&self, silent: bool) {
        lock(&self.state).silent = silent;
    }

    /// Delay applied to every write, standing in for conversion time
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Everything written to the board so far
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// How many times a given command byte was received
    pub fn count(&self, command: u8) -> usize {
        lock(&self.state)
            .written
            .iter()
            .filter(|&&b| b == command)
            .count()
    }

    /// Oversampling count last set with `O<n>`
    pub fn oversampling(&self) -> Option<u8> {
        lock(&self.state).oversampling
    }

    /// Number of resets received
    pub fn resets(&self) -> u32 {
        lock(&self.state).resets
    }
}

impl Read for SimulatedBoard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.output.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedBoard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let latency = {
            let mut state = lock(&self.state);
            state.written.extend_from_slice(buf);
            for &byte in buf {
                state.receive(byte);
            }
            state.latency
        };
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for SimulatedBoard {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        lock(&self.state).output.clear();
        Ok(())
    }

    fn name(&self) -> String {
        "simulated PolyDAQ".to_string()
    }
}
