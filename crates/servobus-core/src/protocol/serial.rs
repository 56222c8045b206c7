//! Serial port handling
//!
//! Provides a [`ByteTransport`] backed by a real serial port, and port
//! discovery that recognises common servo bus adapters by USB ID.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{Read, Write};
use std::time::Duration;

use tracing::debug;

use super::{ByteTransport, ProtocolError, DEFAULT_BAUD_RATE};

/// USB-serial bridges found on half-duplex servo bus boards, by (vid, pid)
pub const KNOWN_ADAPTERS: &[(u16, u16, &str)] = &[
    (0x1A86, 0x55D3, "CH343"),
    (0x1A86, 0x7523, "CH340"),
    (0x10C4, 0xEA60, "CP210x"),
    (0x0403, 0x6001, "FT232R"),
    (0x0403, 0x6015, "FT231X"),
];

/// Name of the bus adapter chip matching a USB vendor/product pair
pub fn adapter_name(vid: u16, pid: u16) -> Option<&'static str> {
    KNOWN_ADAPTERS
        .iter()
        .find(|(v, p, _)| *v == vid && *p == pid)
        .map(|(_, _, name)| *name)
}

/// A serial port that may carry a servo bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name, e.g. "/dev/ttyUSB0" or "COM3"
    pub name: String,
    /// USB vendor and product ID
    pub usb_id: Option<(u16, u16)>,
    /// Product string reported by the device
    pub product: Option<String>,
    /// Recognised adapter chip
    pub adapter: Option<&'static str>,
}

impl PortInfo {
    /// Whether the port sits behind a known servo bus adapter
    pub fn is_servo_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    fn rank(&self) -> u8 {
        match (self.adapter, self.usb_id) {
            (Some(_), _) => 0,
            (None, Some(_)) => 1,
            (None, None) => 2,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                usb_id: Some((usb.vid, usb.pid)),
                adapter: adapter_name(usb.vid, usb.pid),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                usb_id: None,
                product: None,
                adapter: None,
            },
        }
    }
}

/// Order ports so recognised adapters come first, then other USB ports
pub fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| a.rank().cmp(&b.rank()).then_with(|| a.name.cmp(&b.name)));
}

/// List serial ports, recognised servo bus adapters first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    sort_ports(&mut ports);
    ports
}

/// First port behind a recognised servo bus adapter
pub fn find_adapter() -> Option<PortInfo> {
    list_ports().into_iter().find(PortInfo::is_servo_adapter)
}

/// Serial port transport for a servo bus adapter
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Name of the underlying port, if known
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }

    /// Access the underlying port
    pub fn port_mut(&mut self) -> &mut dyn SerialPort {
        self.port.as_mut()
    }
}

/// Open and configure a serial port for the servo bus
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<SerialTransport, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    // Reads only happen after bytes_to_read() reports data, so a short
    // driver timeout is enough
    let mut port = serialport::new(name, baud)
        .timeout(Duration::from_millis(10))
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    configure_port(port.as_mut())?;
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    debug!(port = name, baud, "opened servo bus port");
    Ok(SerialTransport::new(port))
}

/// Configure a serial port as 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

impl ByteTransport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        Write::write_all(&mut *self.port, data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        let available = self
            .port
            .bytes_to_read()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        if available == 0 {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => Err(ProtocolError::IoError(e)),
        }
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }
}
