use anyhow::{bail, Result};
use clap::Parser;
use std::time::Duration;

use soil_sensor::{DeviceAddress, MeasurementGroup};

fn parse_with_radix<T>(input: &str) -> Result<T, T::FromStrRadixErr>
where
    T: num::Num,
    <T as num::Num>::FromStrRadixErr: std::error::Error + Send + Sync,
{
    if input.starts_with("0x") {
        T::from_str_radix(input.trim_start_matches("0x"), 16)
    } else if input.starts_with("0b") {
        T::from_str_radix(input.trim_start_matches("0b"), 2)
    } else {
        T::from_str_radix(input, 10)
    }
}

fn parse_address(input: &str) -> Result<DeviceAddress> {
    let raw: u8 = parse_with_radix(input)?;
    Ok(DeviceAddress::new(raw)?)
}

fn parse_seconds(input: &str) -> Result<Duration> {
    let secs: f64 = input.parse()?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("invalid interval '{}'", input);
    }
    Ok(Duration::from_secs_f64(secs))
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip busy port and RS-485 sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// UART device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// UART baud rate
    #[clap(long, short, default_value_t = 9600)]
    pub baudrate: u32,

    /// Modbus slave address
    #[clap(long, short, default_value = "1", parse(try_from_str = parse_address))]
    pub address: DeviceAddress,

    /// Read retry count
    #[clap(long, short, default_value_t = 3)]
    pub retries: usize,

    /// Response timeout in milliseconds
    #[clap(long, short, default_value_t = 1000)]
    pub timeout: u64,

    /// What to read: all, npk, ec_ph, or one of n, p, k, ph, ec
    #[clap(long, short, default_value = "all")]
    pub mode: MeasurementGroup,

    /// Seconds between samples
    #[clap(long, short, default_value = "5", parse(try_from_str = parse_seconds))]
    pub interval: Duration,

    /// Number of samples, 0 to run until interrupted
    #[clap(long, short, default_value_t = 1)]
    pub count: u32,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    /// List candidate ports and exit
    #[clap(long, short)]
    pub list_ports: bool,
}
