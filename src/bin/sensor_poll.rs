//! RS485 sensor poller
//!
//! Polls holding registers of a Modbus RTU sensor at a fixed interval until
//! interrupted with Ctrl-C.
//!
//! Usage: sensor-poll [--config poller.yaml] [--port /dev/ttyUSB0] [--once]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use modbus_sensor_poll::logging::{self, LogLevel};
use modbus_sensor_poll::{open_serial, Polarity, PollerConfig, Poller, RtuLink};

#[derive(Parser, Debug)]
#[command(name = "sensor-poll", version, about = "Poll a Modbus RTU sensor over RS485")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "SENSOR_POLL_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// GPIO chip index (/dev/gpiochipN) of the direction line
    #[arg(long)]
    gpio_chip: Option<u32>,

    /// Line offset on that chip driving the transceiver DE/RE pins
    #[arg(long)]
    gpio: Option<u32>,

    /// Transmit is enabled by a low level on the direction line
    #[arg(long)]
    active_low: bool,

    /// Transceiver switches direction by itself; no GPIO is used
    #[arg(long, conflicts_with_all = ["gpio_chip", "gpio", "active_low"])]
    auto_direction: bool,

    /// Slave address
    #[arg(short, long)]
    slave: Option<u8>,

    /// First holding register (decimal or 0x-prefixed hex)
    #[arg(short, long, value_parser = parse_u16)]
    register: Option<u16>,

    /// Number of registers
    #[arg(short = 'n', long)]
    count: Option<u16>,

    /// Delay between cycles in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// End a response after an RTU inter-frame gap of silence instead of
    /// waiting for the complete reply
    #[arg(long)]
    frame_gap: bool,

    /// Log every frame in hex at info level
    #[arg(long)]
    packet_log: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

fn parse_u16(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid register '{}': {}", value, e))
}

impl Cli {
    /// Defaults, then the config file, then flags
    fn load_config(&self) -> anyhow::Result<PollerConfig> {
        let mut config = match &self.config {
            Some(path) => PollerConfig::from_file(path)?,
            None => PollerConfig::default(),
        };

        if let Some(port) = &self.port {
            config = config.with_port(port.clone());
        }
        if let Some(baud) = self.baud {
            config = config.with_baud_rate(baud);
        }
        if let Some(chip) = self.gpio_chip {
            config = config.with_gpio_chip(chip);
        }
        if let Some(gpio) = self.gpio {
            config = config.with_direction_gpio(gpio);
        }
        if self.active_low {
            config = config.with_polarity(Polarity::ActiveLow);
        }
        if self.auto_direction {
            config = config.with_auto_direction();
        }
        if let Some(slave) = self.slave {
            config = config.with_slave_id(slave);
        }
        if self.register.is_some() || self.count.is_some() {
            let start = self.register.unwrap_or(config.query.start_register);
            let count = self.count.unwrap_or(config.query.register_count);
            config = config.with_registers(start, count);
        }
        if let Some(interval) = self.interval_ms {
            config = config.with_poll_interval_ms(interval);
        }
        if self.once {
            config = config.with_max_cycles(1);
        }
        if self.frame_gap {
            config = config.with_rtu_frame_gap();
        }
        if self.packet_log {
            config = config.with_packet_logging(true);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;

    let config = cli.load_config().context("loading configuration")?;
    info!(
        "Opening {} at {} baud (direction: {:?}, {:?})",
        config.serial.port, config.serial.baud_rate, config.direction.kind, config.direction.polarity
    );

    let serial = open_serial(&config.serial)?;
    let direction = config.direction.open()?;
    let link = RtuLink::new(serial, direction, config.link_timing());
    let mut poller = Poller::new(link, &config);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match poller.run(shutdown).await {
        Ok(stats) => {
            info!("Completed {} cycles", stats.cycles);
            Ok(())
        }
        Err(e) => {
            error!("Poller stopped: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        assert_eq!(parse_u16("30"), Ok(30));
        assert_eq!(parse_u16("0x001E"), Ok(0x001E));
        assert_eq!(parse_u16("0X1e"), Ok(0x001E));
        assert!(parse_u16("0x10000").is_err());
        assert!(parse_u16("abc").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "sensor-poll",
            "--port",
            "/dev/ttyUSB0",
            "--register",
            "0x0100",
            "--count",
            "2",
            "--active-low",
            "--gpio-chip",
            "4",
            "--baud",
            "19200",
            "--frame-gap",
            "--once",
        ]);
        let config = cli.load_config().unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.query.start_register, 0x0100);
        assert_eq!(config.query.register_count, 2);
        assert_eq!(config.direction.polarity, Polarity::ActiveLow);
        assert_eq!(config.direction.chip, 4);
        assert_eq!(config.serial.baud_rate, 19_200);
        // 3.5 characters at 19200 baud
        assert_eq!(config.timing.frame_gap_us, Some(2002));
        assert_eq!(config.max_cycles, Some(1));
    }

    #[test]
    fn test_invalid_flags_rejected() {
        let cli = Cli::parse_from(["sensor-poll", "--count", "0"]);
        assert!(cli.load_config().is_err());

        assert!(Cli::try_parse_from(["sensor-poll", "--auto-direction", "--gpio", "4"]).is_err());
    }
}
