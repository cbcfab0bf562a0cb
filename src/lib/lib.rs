//! Driver for RS-485 soil sensors exposing nitrogen, phosphorus, potassium,
//! pH and electrical conductivity as Modbus-RTU holding registers.

pub mod checksum;
pub mod discovery;
pub mod error;
pub mod port;
pub mod protocol;
pub mod regs;
pub mod sensor;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::{Result, SensorError};
pub use protocol::{DeviceAddress, ProtocolError};
pub use regs::{Measurement, MeasurementGroup, RegisterSpec};
pub use sensor::SoilSensor;
pub use session::{Reading, Readings, Session, SessionConfig};
