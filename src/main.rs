mod cli;

use std::io;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells::Bash};
use log::{error, warn};

use soil_sensor::port::{Connector, SerialConnector, SerialSettings};
use soil_sensor::{Readings, SessionConfig, SoilSensor};

use cli::Cli;

enum OutputFormat {
    Plain,
    Json,
}

fn format_readings(readings: &Readings, fmt: &OutputFormat) -> String {
    match fmt {
        OutputFormat::Plain => readings
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<String>>()
            .join("\n"),
        OutputFormat::Json => {
            let mut obj = json::JsonValue::new_object();
            for reading in readings.iter() {
                obj[reading.measurement.name()] = match reading.value {
                    Some(value) => value.into(),
                    None => json::JsonValue::Null,
                };
            }
            json::stringify(obj)
        }
    }
}

fn cmd_list_ports(connector: &dyn Connector, fmt: OutputFormat) -> Result<String> {
    let ports = connector.available_ports()?;
    Ok(match fmt {
        OutputFormat::Plain => ports.join("\n"),
        OutputFormat::Json => json::stringify(ports),
    })
}

fn cmd_sample(sensor: &mut SoilSensor, cli: &Cli, fmt: OutputFormat) -> Result<String> {
    let mut sample = 0;
    loop {
        let readings = sensor.read_group(cli.mode)?;
        for (measurement, reason) in readings.failures() {
            warn!("failed to read {}: {}", measurement, reason);
        }
        println!("{}", format_readings(&readings, &fmt));

        sample += 1;
        if cli.count != 0 && sample >= cli.count {
            break;
        }
        thread::sleep(cli.interval);
    }
    Ok(String::default())
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(
            Bash,
            &mut Cli::command(),
            "soil-sensor-tool",
            &mut io::stdout(),
        );

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    let connector = SerialConnector::new(cli.force);
    if cli.list_ports {
        return cmd_list_ports(&connector, fmt);
    }

    let config = SessionConfig {
        serial: SerialSettings {
            baudrate: cli.baudrate,
            ..SerialSettings::default()
        },
        address: cli.address,
        timeout: Duration::from_millis(cli.timeout),
        retries: cli.retries,
        ..SessionConfig::default()
    };
    let port_name = match cli.port.as_str() {
        "auto" => None,
        name => Some(name),
    };

    let mut sensor = SoilSensor::connect_with(&connector, port_name, config)
        .with_context(|| format!("cannot connect to sensor on port '{}'", cli.port))?;
    let res = cmd_sample(&mut sensor, &cli, fmt);
    sensor.close();
    res
}

fn main() {
    match do_main() {
        Ok(s) if s.is_empty() => {}
        Ok(s) => println!("{}", s),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
