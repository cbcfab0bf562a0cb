use std::{fmt::Display, str::FromStr};

use crate::error::{Result, SensorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Measurement {
    Nitrogen = 0,
    Phosphorus = 1,
    Potassium = 2,
    Ph = 3,
    Ec = 4,
}

impl Measurement {
    pub const ALL: [Measurement; 5] = [
        Measurement::Nitrogen,
        Measurement::Phosphorus,
        Measurement::Potassium,
        Measurement::Ph,
        Measurement::Ec,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Measurement::Nitrogen => "nitrogen",
            Measurement::Phosphorus => "phosphorus",
            Measurement::Potassium => "potassium",
            Measurement::Ph => "ph",
            Measurement::Ec => "ec",
        }
    }

    pub fn spec(self) -> &'static RegisterSpec {
        &REGISTER_MAP[self as usize]
    }
}

impl Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

impl FromStr for Measurement {
    type Err = SensorError;

    fn from_str(input: &str) -> Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "nitrogen" | "n" => Ok(Measurement::Nitrogen),
            "phosphorus" | "p" => Ok(Measurement::Phosphorus),
            "potassium" | "k" => Ok(Measurement::Potassium),
            "ph" => Ok(Measurement::Ph),
            "ec" => Ok(Measurement::Ec),
            _ => Err(SensorError::UnknownMeasurement(input.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    Identity,
    Divide(f64),
}

impl Scale {
    pub fn apply(self, raw: u32) -> f64 {
        match self {
            Scale::Identity => raw as f64,
            Scale::Divide(divisor) => raw as f64 / divisor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterSpec {
    pub measurement: Measurement,
    pub address: u16,
    pub count: u16,
    pub scale: Scale,
    pub unit: &'static str,
}

impl RegisterSpec {
    pub const fn new(
        measurement: Measurement,
        address: u16,
        count: u16,
        scale: Scale,
        unit: &'static str,
    ) -> Self {
        RegisterSpec {
            measurement,
            address,
            count,
            scale,
            unit,
        }
    }

    /// Two-register values are high word first.
    pub fn raw_value(&self, registers: &[u16]) -> Option<u32> {
        match (self.count, registers) {
            (1, [value, ..]) => Some(*value as u32),
            (2, [hi, lo, ..]) => Some(((*hi as u32) << 16) | *lo as u32),
            _ => None,
        }
    }

    pub fn decode(&self, registers: &[u16]) -> Option<f64> {
        self.raw_value(registers).map(|raw| self.scale.apply(raw))
    }

    /// Decode from a block of registers read starting at `start`.
    pub fn decode_block(&self, start: u16, registers: &[u16]) -> Option<f64> {
        let offset = self.address.checked_sub(start)? as usize;
        registers.get(offset..).and_then(|regs| self.decode(regs))
    }
}

impl Display for RegisterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#06x} {} {:<10} {}",
            self.address, self.count, self.measurement, self.unit
        )
    }
}

/// Holding register layout of the sensor firmware, indexed by `Measurement`.
pub static REGISTER_MAP: [RegisterSpec; 5] = [
    RegisterSpec::new(Measurement::Nitrogen, 0x001E, 1, Scale::Identity, "mg/kg"),
    RegisterSpec::new(Measurement::Phosphorus, 0x001F, 1, Scale::Identity, "mg/kg"),
    RegisterSpec::new(Measurement::Potassium, 0x0020, 1, Scale::Identity, "mg/kg"),
    RegisterSpec::new(Measurement::Ph, 0x0006, 1, Scale::Divide(10.0), "pH"),
    RegisterSpec::new(Measurement::Ec, 0x0015, 1, Scale::Identity, "uS/cm"),
];

pub fn lookup(name: &str) -> Result<&'static RegisterSpec> {
    name.parse::<Measurement>().map(Measurement::spec)
}

/// What one sample cycle reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementGroup {
    All,
    Npk,
    EcPh,
    Single(Measurement),
}

impl MeasurementGroup {
    pub fn measurements(self) -> Vec<Measurement> {
        match self {
            MeasurementGroup::All => Measurement::ALL.to_vec(),
            MeasurementGroup::Npk => vec![
                Measurement::Nitrogen,
                Measurement::Phosphorus,
                Measurement::Potassium,
            ],
            MeasurementGroup::EcPh => vec![Measurement::Ec, Measurement::Ph],
            MeasurementGroup::Single(m) => vec![m],
        }
    }
}

impl FromStr for MeasurementGroup {
    type Err = SensorError;

    fn from_str(input: &str) -> Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "all" => Ok(MeasurementGroup::All),
            "npk" => Ok(MeasurementGroup::Npk),
            "ec_ph" | "ec-ph" => Ok(MeasurementGroup::EcPh),
            other => other.parse().map(MeasurementGroup::Single),
        }
    }
}
