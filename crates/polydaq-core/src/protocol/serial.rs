//! Serial port handling
//!
//! Port discovery and opening for PolyDAQ boards. PolyDAQ 1 boards talk through
//! an FTDI cable at 9600 baud, PolyDAQ 2 boards through a USB CDC port at
//! 115200 baud; both use 8N1 framing.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::stream::SerialChannel;
use super::{ConnectionError, MAX_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing USB-serial adapters first:
///  - ttyUSB* (FTDI cables, sorted numerically)
///  - ttyACM* (CDC boards, sorted numerically)
///  - everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyUSB"), (1u8, "ttyACM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // udev sometimes lags behind the device nodes
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Check port name and baud rate before handing them to the OS
pub fn validate_port_parameters(name: &str, baud_rate: u32) -> Result<(), ConnectionError> {
    if name.trim().is_empty() {
        return Err(ConnectionError::InvalidParameter(
            "port name is empty".to_string(),
        ));
    }
    if baud_rate == 0 || baud_rate > MAX_BAUD_RATE {
        return Err(ConnectionError::InvalidParameter(format!(
            "baud rate {} not in 1..={}",
            baud_rate, MAX_BAUD_RATE
        )));
    }
    Ok(())
}

/// Open a port as 8 data bits, no parity, 1 stop bit, with a zero read
/// timeout so reads return immediately between transactions
pub fn open_port(name: &str, baud_rate: u32) -> Result<SerialChannel, ConnectionError> {
    validate_port_parameters(name, baud_rate)?;

    let port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::ZERO)
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::InvalidInput => {
                ConnectionError::InvalidParameter(e.to_string())
            }
            _ => ConnectionError::PortUnavailable {
                port: name.to_string(),
                reason: e.to_string(),
            },
        })?;

    Ok(SerialChannel::new(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic without hardware
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut ports: Vec<PortInfo> = [
            "/dev/ttyACM0",
            "/dev/ttyUSB10",
            "/dev/someport",
            "/dev/ttyUSB1",
            "/dev/ttyUSB0",
        ]
        .into_iter()
        .map(|n| PortInfo::bare(n.to_string()))
        .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_parameter_validation() {
        assert!(validate_port_parameters("/dev/ttyUSB0", 115200).is_ok());
        assert!(matches!(
            validate_port_parameters("", 9600),
            Err(ConnectionError::InvalidParameter(_))
        ));
        assert!(matches!(
            validate_port_parameters("COM3", 0),
            Err(ConnectionError::InvalidParameter(_))
        ));
    }
}
