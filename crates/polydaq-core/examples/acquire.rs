//! PolyDAQ Acquisition Tool
//!
//! Samples a PolyDAQ board (or the built-in simulated board) for a fixed
//! time and writes the rows to a CSV file as they arrive.
//!
//! Usage:
//!   cargo run --example acquire -- [OPTIONS]
//!
//! Options:
//!   --port PORT        Serial port (default: simulated board)
//!   --baud RATE        Baud rate (default: 115200)
//!   --station N        Calibrated station number (default: 1)
//!   --channels LIST    Comma-separated measurands (default: A,B,9)
//!   --interval SECS    Sample interval in seconds (default: 0.1)
//!   --duration SECS    How long to sample (default: 5)
//!   --output FILE      Data file (default: timestamped name in the data folder)
//!   --list             List serial ports and exit
//!
//! Set RUST_LOG=polydaq_core=debug to see every exchange.

use anyhow::{bail, Context, Result};
use polydaq_core::calibration::standard_channels;
use polydaq_core::config::interval_from_secs;
use polydaq_core::prelude::*;
use polydaq_core::protocol::list_ports;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = AcquisitionConfig::for_station(1);
    let mut port_name: Option<String> = None;
    let mut channels = "A,B,9".to_string();
    let mut duration = 5.0f64;
    let mut output: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--port" | "-p" => {
                port_name = value;
                i += 1;
            }
            "--baud" | "-b" => {
                config.baud_rate = value.context("--baud needs a value")?.parse()?;
                i += 1;
            }
            "--station" | "-s" => {
                config.station = Some(value.context("--station needs a value")?.parse()?);
                i += 1;
            }
            "--channels" | "-c" => {
                channels = value.context("--channels needs a value")?;
                i += 1;
            }
            "--interval" | "-i" => {
                config.default_interval = value.context("--interval needs a value")?.parse()?;
                i += 1;
            }
            "--duration" | "-d" => {
                duration = value.context("--duration needs a value")?.parse()?;
                i += 1;
            }
            "--output" | "-o" => {
                output = value.map(PathBuf::from);
                i += 1;
            }
            "--list" => {
                for port in list_ports() {
                    println!("{}\t{}", port.name, port.product.unwrap_or_default());
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    println!("{}\n", config);

    let scheduler = Scheduler::from_config(&config)?;
    let greeting = match &port_name {
        Some(port) => scheduler.connect(port, config.baud_rate)?,
        None => scheduler.connect_channel(Box::new(SimulatedBoard::new()))?,
    };
    println!("Connected: {}", greeting);

    // Pick up display names for the standard channels
    let catalog = standard_channels();
    let measurands: Vec<Measurand> = measurand::parse_list(&channels)?
        .into_iter()
        .map(|m| {
            catalog
                .iter()
                .find(|c| c.command() == m.command())
                .cloned()
                .unwrap_or(m)
        })
        .collect();
    scheduler.set_measurands(measurands.clone())?;

    let path = output.unwrap_or_else(|| config.data_file(&config.default_file_name()));
    let mut logger = DataLogger::create(&path, &LogHeader::new(config.station, &measurands))?;

    scheduler.start()?;
    let end = Instant::now() + interval_from_secs(duration)?;
    let buffer = scheduler.buffer();
    while Instant::now() < end {
        std::thread::sleep(Duration::from_millis(250));
        logger.flush_new_rows(&buffer)?;
        if let Some(row) = buffer.rows_since(buffer.row_count().saturating_sub(1)).pop() {
            let values: Vec<String> = row.values.iter().map(|v| format!("{:.4}", v)).collect();
            println!("{:8.3} s  {}", row.time, values.join("  "));
        }
    }
    scheduler.stop();
    logger.flush_new_rows(&buffer)?;
    logger.finish()?;

    let stats = scheduler.stats();
    println!(
        "\n{} rows, {} failed readings, {} overruns",
        stats.rows, stats.failed_readings, stats.overruns
    );
    println!("Data saved to {}", path.display());
    Ok(())
}

fn print_help() {
    println!("PolyDAQ Acquisition Tool");
    println!();
    println!("Usage: acquire [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port PORT        Serial port (default: simulated board)");
    println!("  --baud RATE        Baud rate (default: 115200)");
    println!("  --station N        Calibrated station number (default: 1)");
    println!("  --channels LIST    Comma-separated measurands (default: A,B,9)");
    println!("  --interval SECS    Sample interval in seconds (default: 0.1)");
    println!("  --duration SECS    How long to sample (default: 5)");
    println!("  --output FILE      Data file");
    println!("  --list             List serial ports and exit");
}
