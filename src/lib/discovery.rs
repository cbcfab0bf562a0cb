use log::{debug, info};
use std::time::Duration;

use crate::error::{Result, SensorError};
use crate::port::Connector;
use crate::protocol::ProtocolError;
use crate::regs::Measurement;
use crate::session::{Session, SessionConfig};

pub const PROBE_MEASUREMENT: Measurement = Measurement::Ph;
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Return the first candidate for which `probe` succeeds, in the given order.
pub fn discover_port<P>(candidates: &[String], mut probe: P) -> Result<String>
where
    P: FnMut(&str) -> Result<()>,
{
    for candidate in candidates {
        match probe(candidate) {
            Ok(()) => {
                info!("sensor found on {}", candidate);
                return Ok(candidate.clone());
            }
            Err(e) => debug!("no sensor on {}: {}", candidate, e),
        }
    }
    Err(SensorError::NoSensorFound {
        tried: candidates.len(),
    })
}

fn probe_config(config: &SessionConfig) -> SessionConfig {
    SessionConfig {
        timeout: PROBE_TIMEOUT.min(config.timeout),
        retries: 0,
        backoff: Duration::ZERO,
        ..config.clone()
    }
}

/// One read of the probe measurement through a short-lived session. Any
/// frame that passes address and CRC checks counts, exceptions included.
pub fn probe_port(
    connector: &dyn Connector,
    port_name: &str,
    config: &SessionConfig,
) -> Result<()> {
    let mut session = Session::open(connector, port_name, probe_config(config))?;
    let result = session.read_measurement(PROBE_MEASUREMENT);
    session.close();

    match result {
        Ok(_) | Err(SensorError::Protocol(ProtocolError::ExceptionResponse { .. })) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Probe every port the connector enumerates and return the first with a sensor.
pub fn find_sensor(connector: &dyn Connector, config: &SessionConfig) -> Result<String> {
    let candidates = connector.available_ports()?;
    debug!("candidate ports: {:?}", candidates);
    discover_port(&candidates, |port_name| {
        probe_port(connector, port_name, config)
    })
}
