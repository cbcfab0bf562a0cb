use std::collections::BTreeMap;
use std::fmt::Display;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Result, SensorError};
use crate::port::{Connector, SerialSettings, Transport};
use crate::protocol::{
    is_exception_frame, is_truncated, parse_response, DeviceAddress, ProtocolError, ReadRequest,
    MIN_RESPONSE_LEN,
};
use crate::regs::{self, Measurement};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRIES: usize = 3;
/// Gap between attempts, long enough for the bus to turn around.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub serial: SerialSettings,
    pub address: DeviceAddress,
    /// Per-attempt response deadline.
    pub timeout: Duration,
    /// Additional attempts after the first one fails.
    pub retries: usize,
    pub backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            serial: SerialSettings::default(),
            address: DeviceAddress::default(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Run `operation` up to `retries + 1` times, sleeping `backoff` between
/// attempts. Non-retryable errors end the loop at once; otherwise the last
/// error is returned.
pub fn with_retries<T, F>(retries: usize, backoff: Duration, mut operation: F) -> Result<T>
where
    F: FnMut(usize) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries && e.is_retryable() => {
                warn!("attempt {}/{} failed: {}", attempt + 1, retries + 1, e);
                attempt += 1;
                if !backoff.is_zero() {
                    thread::sleep(backoff);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// One measurement of a read cycle; `value` is `None` when the read failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub measurement: Measurement,
    pub value: Option<f64>,
}

impl Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Some(value) => write!(
                f,
                "{}: {} {}",
                self.measurement,
                value,
                self.measurement.spec().unit
            ),
            None => write!(f, "{}: N/A", self.measurement),
        }
    }
}

/// Result of a multi-measurement read. Failed measurements have no value and
/// keep the error message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    values: BTreeMap<Measurement, f64>,
    failures: BTreeMap<Measurement, String>,
}

impl Readings {
    pub fn get(&self, measurement: Measurement) -> Option<f64> {
        self.values.get(&measurement).copied()
    }

    pub fn reading(&self, measurement: Measurement) -> Reading {
        Reading {
            measurement,
            value: self.get(measurement),
        }
    }

    pub fn contains(&self, measurement: Measurement) -> bool {
        self.values.contains_key(&measurement)
    }

    /// True if any requested measurement failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failure(&self, measurement: Measurement) -> Option<&str> {
        self.failures.get(&measurement).map(String::as_str)
    }

    pub fn failures(&self) -> impl Iterator<Item = (Measurement, &str)> + '_ {
        self.failures.iter().map(|(m, e)| (*m, e.as_str()))
    }

    pub fn values(&self) -> &BTreeMap<Measurement, f64> {
        &self.values
    }

    /// Every requested measurement, successful or not, in register map order.
    pub fn iter(&self) -> impl Iterator<Item = Reading> + '_ {
        Measurement::ALL
            .into_iter()
            .filter(move |m| self.values.contains_key(m) || self.failures.contains_key(m))
            .map(move |m| self.reading(m))
    }

    pub(crate) fn insert(&mut self, measurement: Measurement, value: f64) {
        self.failures.remove(&measurement);
        self.values.insert(measurement, value);
    }

    pub(crate) fn fail(&mut self, measurement: Measurement, error: &SensorError) {
        self.values.remove(&measurement);
        self.failures.insert(measurement, error.to_string());
    }
}

/// One open connection to a sensor.
pub struct Session {
    port_name: String,
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
}

impl Session {
    pub fn open(connector: &dyn Connector, port_name: &str, config: SessionConfig) -> Result<Self> {
        let transport = connector.open(port_name, &config.serial)?;
        Ok(Session::from_transport(port_name, transport, config))
    }

    pub fn from_transport(
        port_name: &str,
        transport: Box<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        Session {
            port_name: port_name.to_string(),
            config,
            transport: Some(transport),
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read `count` raw holding registers starting at `start`.
    pub fn read_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let Session {
            config, transport, ..
        } = self;
        let transport = transport.as_mut().ok_or(SensorError::SessionClosed)?;
        let request = ReadRequest::new(config.address, start, count)?;

        with_retries(config.retries, config.backoff, |_| {
            exchange(&mut **transport, &request, config.timeout)
        })
    }

    pub fn read_measurement(&mut self, measurement: Measurement) -> Result<f64> {
        let spec = measurement.spec();
        let registers = self.read_registers(spec.address, spec.count)?;
        let value = spec
            .decode(&registers)
            .ok_or(ProtocolError::ByteCountMismatch {
                declared: (2 * registers.len()) as u8,
                expected: 2 * spec.count as usize,
            })?;
        debug!("{} = {} {}", measurement, value, spec.unit);
        Ok(value)
    }

    pub fn read_measurement_by_name(&mut self, name: &str) -> Result<f64> {
        let spec = regs::lookup(name)?;
        self.read_measurement(spec.measurement)
    }

    /// Read each measurement with its own request. A failed measurement is
    /// recorded and does not stop the others.
    pub fn read_measurements(&mut self, measurements: &[Measurement]) -> Result<Readings> {
        if !self.is_open() {
            return Err(SensorError::SessionClosed);
        }

        let mut readings = Readings::default();
        for &measurement in measurements {
            match self.read_measurement(measurement) {
                Ok(value) => readings.insert(measurement, value),
                Err(e) => {
                    warn!("{} read failed: {}", measurement, e);
                    readings.fail(measurement, &e);
                }
            }
        }
        Ok(readings)
    }

    pub fn read_all(&mut self) -> Result<Readings> {
        self.read_measurements(&Measurement::ALL)
    }

    /// Read measurements sharing one contiguous register range with a single
    /// request. If that request fails every measurement in it is failed.
    pub fn read_block(&mut self, measurements: &[Measurement]) -> Result<Readings> {
        let mut readings = Readings::default();
        let specs: Vec<_> = measurements.iter().map(|m| m.spec()).collect();
        let start = match specs.iter().map(|s| s.address).min() {
            Some(start) => start,
            None => return Ok(readings),
        };
        let end = specs
            .iter()
            .map(|s| s.address as u32 + s.count as u32)
            .max()
            .unwrap_or(start as u32 + 1);
        let count = u16::try_from(end - start as u32).map_err(|_| {
            ProtocolError::InvalidRequest(format!("register span from {:#06x} too wide", start))
        })?;

        match self.read_registers(start, count) {
            Ok(registers) => {
                for spec in specs {
                    match spec.decode_block(start, &registers) {
                        Some(value) => readings.insert(spec.measurement, value),
                        None => readings.fail(
                            spec.measurement,
                            &ProtocolError::ByteCountMismatch {
                                declared: (2 * registers.len()) as u8,
                                expected: 2 * count as usize,
                            }
                            .into(),
                        ),
                    }
                }
            }
            Err(e @ SensorError::SessionClosed) => return Err(e),
            Err(e @ SensorError::Protocol(ProtocolError::InvalidRequest(_))) => return Err(e),
            Err(e) => {
                warn!("block read at {:#06x} failed: {}", start, e);
                for spec in specs {
                    readings.fail(spec.measurement, &e);
                }
            }
        }
        Ok(readings)
    }

    /// Release the transport. Later reads fail with `SessionClosed`.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("closed {}", self.port_name);
        }
    }
}

fn exchange(
    transport: &mut dyn Transport,
    request: &ReadRequest,
    timeout: Duration,
) -> Result<Vec<u16>> {
    let frame = request.encode();
    let expected_len = request.response_len();
    let deadline = Instant::now() + timeout;

    transport.clear_input()?;
    debug!("send {:02X?}", frame);
    transport.write_bytes(&frame)?;

    // Header first: an exception reply ends there.
    let mut response = match transport.read_bytes(MIN_RESPONSE_LEN, timeout) {
        Ok(response) => response,
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {
            return Err(SensorError::ReadTimeout {
                timeout,
                received: 0,
            })
        }
        Err(e) => return Err(e.into()),
    };
    if response.len() == MIN_RESPONSE_LEN && !is_exception_frame(&response) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match transport.read_bytes(expected_len - MIN_RESPONSE_LEN, remaining) {
            Ok(tail) => response.extend_from_slice(&tail),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
    debug!("recv {:02X?}", response);

    match parse_response(&response, request.address) {
        Ok(frame) if frame.registers.len() == request.count as usize => Ok(frame.registers),
        Ok(frame) => Err(ProtocolError::ByteCountMismatch {
            declared: frame.byte_count,
            expected: 2 * request.count as usize,
        }
        .into()),
        Err(_) if is_truncated(&response) => Err(SensorError::ReadTimeout {
            timeout,
            received: response.len(),
        }),
        Err(e) => Err(e.into()),
    }
}
