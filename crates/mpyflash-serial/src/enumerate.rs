//! Serial port enumeration

use serialport::{available_ports, SerialPortType};

/// List serial devices that could host a board
///
/// Only asks the OS; no port is opened. Returns an empty list when the host
/// reports nothing or the query fails.
pub fn list_candidate_ports() -> Vec<String> {
    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            log::debug!("Failed to list serial ports: {}", e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = ports
        .into_iter()
        .inspect(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) => log::debug!(
                "Found {} (USB {:04x}:{:04x} {})",
                p.port_name,
                usb.vid,
                usb.pid,
                usb.product.as_deref().unwrap_or("")
            ),
            other => log::debug!("Found {} ({:?})", p.port_name, other),
        })
        .map(|p| p.port_name)
        .collect();

    names.sort();
    names.dedup();
    names
}
