#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod other;

#[cfg(target_os = "linux")]
use linux::{is_port_open, NativePort};
#[cfg(not(target_os = "linux"))]
use other::{is_port_open, NativePort};

use core::time::Duration;
use itertools::Itertools;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serialport::{self, ClearBuffer, DataBits, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use std::time::Instant;

use crate::error::{Result, SensorError};

/// Byte-level half-duplex link to the bus.
pub trait Transport: Send {
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read up to `max_len` bytes, waiting at most `timeout`. Returns whatever
    /// arrived; an `ErrorKind::TimedOut` error means nothing did.
    fn read_bytes(&mut self, max_len: usize, timeout: Duration) -> io::Result<Vec<u8>>;

    /// Drop stale input left over from an earlier exchange.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens transports by name and enumerates candidate ports.
pub trait Connector {
    fn open(&self, port_name: &str, settings: &SerialSettings) -> Result<Box<dyn Transport>>;
    fn available_ports(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baudrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            baudrate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

trait Rs485 {
    fn rs485_is_enabled(&self) -> anyhow::Result<bool>;
    /// Enabling also sets RTS on send; disabling clears every flag.
    fn rs485_enable(&self, enable: bool) -> anyhow::Result<()>;

    fn rs485_is_supported(&self) -> bool {
        match self.rs485_is_enabled() {
            Ok(enabled) => self.rs485_enable(enabled).is_ok(),
            Err(_) => false,
        }
    }
}

/// Read into `max_len` bytes until full, EOF or `timeout`, re-arming the
/// port timeout before every read. `TimedOut` means nothing arrived.
fn read_with_deadline<R, F>(
    reader: &mut R,
    mut set_timeout: F,
    max_len: usize,
    timeout: Duration,
) -> io::Result<Vec<u8>>
where
    R: Read,
    F: FnMut(&mut R, Duration) -> io::Result<()>,
{
    let deadline = Instant::now() + timeout;
    let mut buffer = vec![0u8; max_len];
    let mut received = 0;

    while received < max_len {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        set_timeout(reader, deadline - now)?;
        match reader.read(&mut buffer[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e),
        }
    }

    if received == 0 {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "no response"));
    }
    buffer.truncate(received);
    Ok(buffer)
}

/// Turn kernel RS-485 mode on if it is off. Returns the state to put back
/// when the port is released, `None` if nothing was changed.
fn enable_rs485<P: Rs485>(port: &P, port_name: &str, force: bool) -> Result<Option<bool>> {
    if !port.rs485_is_supported() || port.rs485_is_enabled().unwrap_or(false) {
        return Ok(None);
    }
    match port.rs485_enable(true) {
        Ok(()) => {
            debug!("{}: rs485 enabled", port_name);
            Ok(Some(false))
        }
        Err(e) if force => {
            warn!("{}: rs485 configuration failed: {}", port_name, e);
            Ok(None)
        }
        Err(_) => Err(SensorError::PortUnavailable {
            port_name: port_name.to_string(),
            reason: "rs485 configuration failed".to_string(),
        }),
    }
}

fn restore_rs485<P: Rs485>(port: &P, port_name: &str, previous: Option<bool>) {
    if let Some(enabled) = previous {
        if let Err(e) = port.rs485_enable(enabled) {
            warn!("{}: cannot restore rs485 mode: {}", port_name, e);
        }
    }
}

pub struct SerialTransport {
    port: NativePort,
    port_name: String,
    rs485_restore: Option<bool>,
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        restore_rs485(&self.port, &self.port_name, self.rs485_restore.take());
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read_bytes(&mut self, max_len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        read_with_deadline(
            &mut self.port,
            |port, remaining| Ok(port.set_timeout(remaining)?),
            max_len,
            timeout,
        )
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }
}

/// `serialport`-backed connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector {
    /// Skip busy port and RS-485 configuration checks.
    pub force: bool,
}

impl SerialConnector {
    pub fn new(force: bool) -> Self {
        SerialConnector { force }
    }
}

impl Connector for SerialConnector {
    fn open(&self, port_name: &str, settings: &SerialSettings) -> Result<Box<dyn Transport>> {
        if !self.force && is_port_open(port_name) {
            return Err(SensorError::PortBusy {
                port_name: port_name.to_string(),
            });
        }

        let port: NativePort = serialport::new(port_name, settings.baudrate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .timeout(Duration::from_millis(10))
            .open_native()
            .map_err(|e| SensorError::PortUnavailable {
                port_name: port_name.to_string(),
                reason: e.to_string(),
            })?;

        let rs485_restore = if port_name.contains("ttyS") {
            enable_rs485(&port, port_name, self.force)?
        } else {
            None
        };

        debug!("open_port OK: {} @ {} baud", port_name, settings.baudrate);
        Ok(Box::new(SerialTransport {
            port,
            port_name: port_name.to_string(),
            rs485_restore,
        }))
    }

    fn available_ports(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(io::Error::from)?;
        Ok(ports
            .into_iter()
            .filter(|info| match &info.port_type {
                SerialPortType::UsbPort(_) => true,
                SerialPortType::PciPort | SerialPortType::Unknown => {
                    looks_like_uart(&info.port_name)
                }
                SerialPortType::BluetoothPort => false,
            })
            .map(|info| info.port_name)
            .filter(|name| self.force || !is_port_open(name))
            .unique()
            .collect())
    }
}

fn looks_like_uart(port_name: &str) -> bool {
    lazy_static! {
        static ref RE: Regex =
            Regex::new(r"(ttyUSB|ttyACM|ttyAMA|ttyS|COM|cu\.usbserial|cu\.usbmodem)\d*")
                .unwrap();
    }
    RE.is_match(port_name)
}
