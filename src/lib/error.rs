use std::time::Duration;
use thiserror::Error;

use crate::protocol::ProtocolError;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no complete response within {timeout:?} ({received} bytes received)")]
    ReadTimeout { timeout: Duration, received: usize },
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("can't open {port_name:?}: {reason}")]
    PortUnavailable { port_name: String, reason: String },
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
    #[error("no sensor found ({tried} candidate ports tried)")]
    NoSensorFound { tried: usize },
    #[error("session closed")]
    SessionClosed,
    #[error("unknown measurement '{0}'")]
    UnknownMeasurement(String),
}

impl SensorError {
    /// Errors worth another attempt on the same open session.
    pub fn is_retryable(&self) -> bool {
        match self {
            SensorError::Protocol(ProtocolError::InvalidRequest(_)) => false,
            SensorError::Protocol(_) | SensorError::ReadTimeout { .. } => true,
            SensorError::Transport(_) => true,
            _ => false,
        }
    }
}

pub type Result<T, E = SensorError> = std::result::Result<T, E>;
