//! Scripted transports for exercising sessions without hardware.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, SensorError};
use crate::port::{Connector, SerialSettings, Transport};
use crate::protocol::{build_read_response, DeviceAddress, FUNCTION_READ_HOLDING_REGISTERS};

/// Maps the last request frame to the bytes the bus answers with.
pub type Responder = Box<dyn FnMut(&[u8]) -> io::Result<Vec<u8>> + Send>;

pub fn silent() -> Responder {
    Box::new(|_request: &[u8]| Err(io::Error::from(io::ErrorKind::TimedOut)))
}

#[derive(Default)]
struct Shared {
    writes: Mutex<Vec<Vec<u8>>>,
    reads: Mutex<Vec<usize>>,
    clears: AtomicUsize,
    live: AtomicUsize,
}

/// Runs the responder on every write and hands the answer out to
/// subsequent reads, as a UART receive buffer would.
pub struct FakeTransport {
    responder: Responder,
    pending: Vec<u8>,
    error: Option<io::Error>,
    shared: Arc<Shared>,
}

impl FakeTransport {
    pub fn new(responder: Responder) -> Self {
        Self::with_shared(responder, Arc::new(Shared::default()))
    }

    fn with_shared(responder: Responder, shared: Arc<Shared>) -> Self {
        shared.live.fetch_add(1, Ordering::SeqCst);
        FakeTransport {
            responder,
            pending: Vec::new(),
            error: None,
            shared,
        }
    }

    pub fn probe(&self) -> TransportProbe {
        TransportProbe {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for FakeTransport {
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.shared.writes.lock().unwrap().push(data.to_vec());
        match (self.responder)(data) {
            Ok(response) => self.pending = response,
            Err(e) => self.error = Some(e),
        }
        Ok(())
    }

    fn read_bytes(&mut self, max_len: usize, _timeout: Duration) -> io::Result<Vec<u8>> {
        self.shared.reads.lock().unwrap().push(max_len);
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if self.pending.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = max_len.min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.shared.clears.fetch_add(1, Ordering::SeqCst);
        self.pending.clear();
        self.error = None;
        Ok(())
    }
}

/// Observes a `FakeTransport` after it has been boxed away.
pub struct TransportProbe {
    shared: Arc<Shared>,
}

impl TransportProbe {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.writes.lock().unwrap().clone()
    }

    /// `max_len` of every read, in order.
    pub fn reads(&self) -> Vec<usize> {
        self.shared.reads.lock().unwrap().clone()
    }

    pub fn clears(&self) -> usize {
        self.shared.clears.load(Ordering::SeqCst)
    }

    /// Transports created and not yet dropped.
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }
}

/// A slave that answers "read holding registers" from a register table.
/// Unset registers read as zero; dead registers and foreign addresses time out.
#[derive(Clone)]
pub struct SimulatedSensor {
    address: u8,
    registers: HashMap<u16, u16>,
    dead: HashSet<u16>,
}

impl SimulatedSensor {
    pub fn new(address: u8) -> Self {
        SimulatedSensor {
            address,
            registers: HashMap::new(),
            dead: HashSet::new(),
        }
    }

    pub fn with_register(mut self, address: u16, value: u16) -> Self {
        self.registers.insert(address, value);
        self
    }

    pub fn with_dead_register(mut self, address: u16) -> Self {
        self.dead.insert(address);
        self
    }

    fn answer(&self, request: &[u8]) -> io::Result<Vec<u8>> {
        let timed_out = || io::Error::from(io::ErrorKind::TimedOut);
        if request.len() != 8
            || request[0] != self.address
            || request[1] != FUNCTION_READ_HOLDING_REGISTERS
        {
            return Err(timed_out());
        }

        let start = u16::from_be_bytes([request[2], request[3]]);
        let count = u16::from_be_bytes([request[4], request[5]]);
        let addresses: Vec<u16> = (0..count).map(|i| start.wrapping_add(i)).collect();
        if addresses.iter().any(|a| self.dead.contains(a)) {
            return Err(timed_out());
        }

        let values: Vec<u16> = addresses
            .iter()
            .map(|a| self.registers.get(a).copied().unwrap_or(0))
            .collect();
        let address = DeviceAddress::new(self.address)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        build_read_response(address, &values)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    pub fn responder(self) -> Responder {
        Box::new(move |request: &[u8]| self.answer(request))
    }
}

#[derive(Clone)]
enum FakePort {
    Broken,
    Empty,
    Attached(SimulatedSensor),
}

/// Named ports backed by simulated sensors; unknown names fail to open.
pub struct FakeConnector {
    ports: Vec<(String, FakePort)>,
    opened: Mutex<Vec<String>>,
    shared: Arc<Shared>,
}

impl FakeConnector {
    pub fn new() -> Self {
        FakeConnector {
            ports: Vec::new(),
            opened: Mutex::new(Vec::new()),
            shared: Arc::new(Shared::default()),
        }
    }

    /// A port that is listed but cannot be opened.
    pub fn with_broken_port(mut self, name: &str) -> Self {
        self.ports.push((name.to_string(), FakePort::Broken));
        self
    }

    /// A port that opens but has nothing attached.
    pub fn with_empty_port(mut self, name: &str) -> Self {
        self.ports.push((name.to_string(), FakePort::Empty));
        self
    }

    pub fn with_sensor(mut self, name: &str, sensor: SimulatedSensor) -> Self {
        self.ports.push((name.to_string(), FakePort::Attached(sensor)));
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn probe(&self) -> TransportProbe {
        TransportProbe {
            shared: self.shared.clone(),
        }
    }
}

impl Connector for FakeConnector {
    fn open(&self, port_name: &str, _settings: &SerialSettings) -> Result<Box<dyn Transport>> {
        let unavailable = || SensorError::PortUnavailable {
            port_name: port_name.to_string(),
            reason: "no such device".to_string(),
        };
        let port = self
            .ports
            .iter()
            .find(|(name, _)| name == port_name)
            .map(|(_, port)| port.clone())
            .ok_or_else(unavailable)?;

        let responder = match port {
            FakePort::Broken => return Err(unavailable()),
            FakePort::Empty => silent(),
            FakePort::Attached(sensor) => sensor.responder(),
        };
        self.opened.lock().unwrap().push(port_name.to_string());
        Ok(Box::new(FakeTransport::with_shared(
            responder,
            self.shared.clone(),
        )))
    }

    fn available_ports(&self) -> Result<Vec<String>> {
        Ok(self.ports.iter().map(|(name, _)| name.clone()).collect())
    }
}
