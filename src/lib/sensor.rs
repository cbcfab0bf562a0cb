use log::info;

use crate::discovery::find_sensor;
use crate::error::Result;
use crate::port::{Connector, SerialConnector};
use crate::regs::{Measurement, MeasurementGroup};
use crate::session::{Readings, Session, SessionConfig};

/// NPK soil sensor on an RS-485 bus.
///
/// Reads block the calling thread for at most `(retries + 1) * (timeout + backoff)`.
/// Methods take `&mut self`, so one sensor never has two requests in flight;
/// share it between threads behind a `Mutex`.
pub struct SoilSensor {
    session: Session,
}

impl SoilSensor {
    /// Connect over a native serial port. `None` probes the available ports.
    pub fn connect(port_name: Option<&str>, config: SessionConfig) -> Result<Self> {
        Self::connect_with(&SerialConnector::default(), port_name, config)
    }

    pub fn connect_with(
        connector: &dyn Connector,
        port_name: Option<&str>,
        config: SessionConfig,
    ) -> Result<Self> {
        let port_name = match port_name {
            Some(name) => name.to_string(),
            None => find_sensor(connector, &config)?,
        };
        let session = Session::open(connector, &port_name, config)?;
        info!(
            "sensor connected on {} @ {} baud, address {}",
            session.port_name(),
            session.config().serial.baudrate,
            session.config().address
        );
        Ok(SoilSensor { session })
    }

    pub fn from_session(session: Session) -> Self {
        SoilSensor { session }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    pub fn port_name(&self) -> &str {
        self.session.port_name()
    }

    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn read(&mut self, measurement: Measurement) -> Result<f64> {
        self.session.read_measurement(measurement)
    }

    /// Nitrogen, mg/kg.
    pub fn read_nitrogen(&mut self) -> Result<f64> {
        self.read(Measurement::Nitrogen)
    }

    /// Phosphorus, mg/kg.
    pub fn read_phosphorus(&mut self) -> Result<f64> {
        self.read(Measurement::Phosphorus)
    }

    /// Potassium, mg/kg.
    pub fn read_potassium(&mut self) -> Result<f64> {
        self.read(Measurement::Potassium)
    }

    pub fn read_ph(&mut self) -> Result<f64> {
        self.read(Measurement::Ph)
    }

    /// Electrical conductivity, uS/cm.
    pub fn read_ec(&mut self) -> Result<f64> {
        self.read(Measurement::Ec)
    }

    pub fn read_all(&mut self) -> Result<Readings> {
        self.session.read_all()
    }

    /// Nitrogen, phosphorus and potassium in one three-register request.
    pub fn read_npk(&mut self) -> Result<Readings> {
        self.session.read_block(&MeasurementGroup::Npk.measurements())
    }

    pub fn read_ec_ph(&mut self) -> Result<Readings> {
        self.session.read_measurements(&MeasurementGroup::EcPh.measurements())
    }

    pub fn read_group(&mut self, group: MeasurementGroup) -> Result<Readings> {
        match group {
            MeasurementGroup::All => self.read_all(),
            MeasurementGroup::Npk => self.read_npk(),
            MeasurementGroup::EcPh => self.read_ec_ph(),
            MeasurementGroup::Single(m) => self.session.read_measurements(&[m]),
        }
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorError;
    use crate::testing::{FakeConnector, SimulatedSensor};
    use std::time::Duration;

    fn field_sensor() -> SimulatedSensor {
        SimulatedSensor::new(1)
            .with_register(0x001E, 12)
            .with_register(0x001F, 34)
            .with_register(0x0020, 56)
            .with_register(0x0006, 65)
            .with_register(0x0015, 1200)
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(5),
            retries: 1,
            backoff: Duration::ZERO,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn explicit_port_skips_discovery() {
        let connector = FakeConnector::new()
            .with_empty_port("/dev/ttyUSB0")
            .with_sensor("/dev/ttyUSB1", field_sensor());
        let sensor =
            SoilSensor::connect_with(&connector, Some("/dev/ttyUSB1"), fast_config()).unwrap();
        assert!(sensor.is_connected());
        assert_eq!(sensor.port_name(), "/dev/ttyUSB1");
        assert_eq!(connector.opened(), vec!["/dev/ttyUSB1".to_string()]);
    }

    #[test]
    fn auto_port_uses_discovery() {
        let connector = FakeConnector::new()
            .with_empty_port("/dev/ttyUSB0")
            .with_sensor("/dev/ttyUSB1", field_sensor());
        let probe = connector.probe();
        let mut sensor = SoilSensor::connect_with(&connector, None, fast_config()).unwrap();
        assert_eq!(sensor.port_name(), "/dev/ttyUSB1");
        // transient probe sessions are gone, the persistent one stays
        assert_eq!(probe.live(), 1);
        assert_eq!(sensor.read_ph().unwrap(), 6.5);
        sensor.close();
        assert_eq!(probe.live(), 0);
    }

    #[test]
    fn connect_fails_without_sensor() {
        let connector = FakeConnector::new().with_empty_port("/dev/ttyUSB0");
        assert!(matches!(
            SoilSensor::connect_with(&connector, None, fast_config()),
            Err(SensorError::NoSensorFound { tried: 1 })
        ));
        assert!(matches!(
            SoilSensor::connect_with(&connector, Some("/dev/ttyUSB7"), fast_config()),
            Err(SensorError::PortUnavailable { .. })
        ));
    }

    #[test]
    fn single_reads() {
        let connector = FakeConnector::new().with_sensor("COM3", field_sensor());
        let mut sensor = SoilSensor::connect_with(&connector, Some("COM3"), fast_config()).unwrap();
        assert_eq!(sensor.read_nitrogen().unwrap(), 12.0);
        assert_eq!(sensor.read_phosphorus().unwrap(), 34.0);
        assert_eq!(sensor.read_potassium().unwrap(), 56.0);
        assert_eq!(sensor.read_ph().unwrap(), 6.5);
        assert_eq!(sensor.read_ec().unwrap(), 1200.0);
    }

    #[test]
    fn groups_dispatch() {
        let connector = FakeConnector::new().with_sensor("COM3", field_sensor());
        let probe = connector.probe();
        let mut sensor = SoilSensor::connect_with(&connector, Some("COM3"), fast_config()).unwrap();

        let all = sensor.read_group(MeasurementGroup::All).unwrap();
        assert_eq!(all.values().len(), 5);
        assert_eq!(probe.writes().len(), 5);

        let npk = sensor.read_group(MeasurementGroup::Npk).unwrap();
        assert_eq!(npk.get(Measurement::Potassium), Some(56.0));
        assert_eq!(npk.get(Measurement::Ph), None);
        assert_eq!(probe.writes().len(), 6);

        let ec_ph = sensor.read_group(MeasurementGroup::EcPh).unwrap();
        assert_eq!(ec_ph.get(Measurement::Ec), Some(1200.0));
        assert_eq!(ec_ph.get(Measurement::Ph), Some(6.5));
        assert_eq!(ec_ph.values().len(), 2);

        let single = sensor
            .read_group(MeasurementGroup::Single(Measurement::Ph))
            .unwrap();
        assert_eq!(single.iter().count(), 1);
    }

    #[test]
    fn partial_failure_is_flagged() {
        let connector =
            FakeConnector::new().with_sensor("COM3", field_sensor().with_dead_register(0x0015));
        let mut sensor = SoilSensor::connect_with(&connector, Some("COM3"), fast_config()).unwrap();
        let readings = sensor.read_all().unwrap();
        assert!(readings.is_partial());
        assert_eq!(readings.get(Measurement::Ec), None);
        assert_eq!(readings.get(Measurement::Ph), Some(6.5));
        assert!(matches!(
            sensor.read_ec(),
            Err(SensorError::ReadTimeout { .. })
        ));
        assert!(sensor.is_connected());
    }

    #[test]
    fn closed_sensor_refuses_reads() {
        let connector = FakeConnector::new().with_sensor("COM3", field_sensor());
        let mut sensor = SoilSensor::connect_with(&connector, Some("COM3"), fast_config()).unwrap();
        sensor.close();
        assert!(!sensor.is_connected());
        assert!(matches!(sensor.read_ph(), Err(SensorError::SessionClosed)));
        assert!(matches!(sensor.read_npk(), Err(SensorError::SessionClosed)));
        assert!(matches!(
            sensor.read_group(MeasurementGroup::EcPh),
            Err(SensorError::SessionClosed)
        ));
    }
}
