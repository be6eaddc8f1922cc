//! # Poller Configuration
//!
//! Everything the poller needs to know about the bus: serial parameters,
//! the direction line, the query, and the fixed delays of a cycle.
//!
//! Configuration comes from three layers, later ones winning:
//! built-in defaults, an optional YAML file, command line flags.
//!
//! ```yaml
//! serial:
//!   port: /dev/serial0
//!   baud_rate: 9600
//!   read_timeout_ms: 1000
//! direction:
//!   kind: sysfs
//!   chip: 0
//!   gpio: 16
//!   polarity: active_high
//! query:
//!   slave_id: 1
//!   start_register: 30
//!   register_count: 3
//!   register_names: [nitrogen, phosphorus, potassium]
//! timing:
//!   poll_interval_ms: 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_DIRECTION_GPIO, DEFAULT_GPIO_CHIP, DEFAULT_MAX_RESPONSE_BYTES,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS, DEFAULT_REGISTER_COUNT,
    DEFAULT_RESPONSE_DELAY_MS, DEFAULT_SERIAL_PORT, DEFAULT_SLAVE_ID, DEFAULT_START_REGISTER,
    DEFAULT_SYSFS_GPIO_PATH, DEFAULT_TX_SETTLE_MS, DEFAULT_WRITE_TIMEOUT_MS, MAX_RTU_FRAME_SIZE,
    READ_RESPONSE_OVERHEAD,
};
use crate::direction::{
    AutoDirection, DirectionControl, DirectionPin, Polarity, SysfsDirectionLine,
};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{validate_read_quantity, SlaveId};
use crate::transport::{frame_gap_for_baud, LinkTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial channel parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/serial0` or `/dev/ttyUSB0`
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// Bound on reading one response
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// How the transceiver direction is switched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionKind {
    /// GPIO line through Linux sysfs
    #[default]
    Sysfs,
    /// Transceiver switches on its own
    Auto,
}

/// Direction-control line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionConfig {
    pub kind: DirectionKind,
    /// GPIO chip index, as in `/dev/gpiochipN`
    pub chip: u32,
    /// Line offset within `chip`
    pub gpio: u32,
    pub sysfs_path: String,
    pub polarity: Polarity,
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            kind: DirectionKind::Sysfs,
            chip: DEFAULT_GPIO_CHIP,
            gpio: DEFAULT_DIRECTION_GPIO,
            sysfs_path: DEFAULT_SYSFS_GPIO_PATH.to_string(),
            polarity: Polarity::ActiveHigh,
        }
    }
}

impl DirectionConfig {
    /// Acquire the configured line, starting in receive mode.
    pub fn open(&self) -> ModbusResult<DirectionPin<Box<dyn DirectionControl>>> {
        let line: Box<dyn DirectionControl> = match self.kind {
            DirectionKind::Sysfs => Box::new(SysfsDirectionLine::open_chip_line(
                &self.sysfs_path,
                self.chip,
                self.gpio,
            )?),
            DirectionKind::Auto => Box::new(AutoDirection),
        };
        DirectionPin::new(line, self.polarity)
    }
}

/// The registers polled each cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub slave_id: SlaveId,
    pub start_register: u16,
    pub register_count: u16,
    /// Bytes read per cycle
    pub max_response_bytes: usize,
    /// Optional labels for the polled registers, in order
    pub register_names: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            slave_id: DEFAULT_SLAVE_ID,
            start_register: DEFAULT_START_REGISTER,
            register_count: DEFAULT_REGISTER_COUNT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            register_names: Vec::new(),
        }
    }
}

/// Fixed delays of a poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tx_settle_ms: u64,
    pub response_delay_ms: u64,
    pub write_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Idle time that ends a response early; unset or 0 reads until the
    /// reply is complete or the read timeout expires
    pub frame_gap_us: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tx_settle_ms: DEFAULT_TX_SETTLE_MS,
            response_delay_ms: DEFAULT_RESPONSE_DELAY_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            frame_gap_us: None,
        }
    }
}

/// Complete poller configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub serial: SerialConfig,
    pub direction: DirectionConfig,
    pub query: QueryConfig,
    pub timing: TimingConfig,
    /// Log every frame at info level
    pub packet_logging: bool,
    /// Stop after this many cycles; runs until interrupted when unset
    pub max_cycles: Option<u64>,
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document; missing fields keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> ModbusResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ModbusError::config(format!("Invalid YAML configuration: {}", e)))
    }

    /// Load a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> ModbusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.serial.port = port.into();
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.serial.baud_rate = baud_rate;
        self
    }

    pub fn with_slave_id(mut self, slave_id: SlaveId) -> Self {
        self.query.slave_id = slave_id;
        self
    }

    pub fn with_registers(mut self, start_register: u16, register_count: u16) -> Self {
        self.query.start_register = start_register;
        self.query.register_count = register_count;
        self
    }

    pub fn with_direction_gpio(mut self, gpio: u32) -> Self {
        self.direction.kind = DirectionKind::Sysfs;
        self.direction.gpio = gpio;
        self
    }

    pub fn with_gpio_chip(mut self, chip: u32) -> Self {
        self.direction.kind = DirectionKind::Sysfs;
        self.direction.chip = chip;
        self
    }

    /// End responses after an RTU inter-frame gap at the current baud rate.
    pub fn with_rtu_frame_gap(mut self) -> Self {
        let gap = frame_gap_for_baud(self.serial.baud_rate);
        self.timing.frame_gap_us = Some(gap.as_micros() as u64);
        self
    }

    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.direction.polarity = polarity;
        self
    }

    pub fn with_auto_direction(mut self) -> Self {
        self.direction.kind = DirectionKind::Auto;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.timing.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Reject values the bus cannot work with.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.serial.port.trim().is_empty() {
            return Err(ModbusError::config("Serial port cannot be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(ModbusError::config("Baud rate must be greater than zero"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ModbusError::config("Read timeout must be greater than zero"));
        }
        if self.timing.write_timeout_ms == 0 {
            return Err(ModbusError::config("Write timeout must be greater than zero"));
        }

        validate_read_quantity(self.query.register_count)
            .map_err(|e| ModbusError::config(e.to_string()))?;

        let max = self.query.max_response_bytes;
        if !(READ_RESPONSE_OVERHEAD..=MAX_RTU_FRAME_SIZE).contains(&max) {
            return Err(ModbusError::config(format!(
                "max_response_bytes must be within {}..={}, got {}",
                READ_RESPONSE_OVERHEAD, MAX_RTU_FRAME_SIZE, max
            )));
        }
        let expected = READ_RESPONSE_OVERHEAD + self.query.register_count as usize * 2;
        if max < expected {
            return Err(ModbusError::config(format!(
                "max_response_bytes {} cannot hold a {} register response ({} bytes)",
                max, self.query.register_count, expected
            )));
        }

        if self.query.register_names.len() > self.query.register_count as usize {
            return Err(ModbusError::config(format!(
                "{} register names given for {} registers",
                self.query.register_names.len(),
                self.query.register_count
            )));
        }

        if self.max_cycles == Some(0) {
            return Err(ModbusError::config("max_cycles must be at least 1"));
        }

        Ok(())
    }

    /// Link delays derived from this configuration
    pub fn link_timing(&self) -> LinkTiming {
        let frame_gap = self
            .timing
            .frame_gap_us
            .map_or(Duration::ZERO, Duration::from_micros);
        LinkTiming::default()
            .with_tx_settle(Duration::from_millis(self.timing.tx_settle_ms))
            .with_response_delay(Duration::from_millis(self.timing.response_delay_ms))
            .with_read_timeout(self.serial.read_timeout())
            .with_write_timeout(Duration::from_millis(self.timing.write_timeout_ms))
            .with_frame_gap(frame_gap)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_station_wiring() {
        let config = PollerConfig::default();
        assert_eq!(config.serial.port, "/dev/serial0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.read_timeout_ms, 1000);
        assert_eq!(config.direction.chip, 0);
        assert_eq!(config.direction.gpio, 16);
        assert_eq!(config.direction.polarity, Polarity::ActiveHigh);
        assert_eq!(config.query.slave_id, 1);
        assert_eq!(config.query.start_register, 0x001E);
        assert_eq!(config.query.register_count, 3);
        assert_eq!(config.query.max_response_bytes, 20);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_link_timing_from_config() {
        let timing = PollerConfig::default().link_timing();
        assert_eq!(timing.tx_settle, Duration::from_millis(10));
        assert_eq!(timing.response_delay, Duration::from_millis(200));
        assert_eq!(timing.read_timeout, Duration::from_secs(1));
        // Reads run to a complete reply by default
        assert!(timing.frame_gap.is_zero());

        let config = PollerConfig::default().with_rtu_frame_gap();
        assert_eq!(config.timing.frame_gap_us, Some(4007));
        assert_eq!(config.link_timing().frame_gap, frame_gap_for_baud(9600));

        let mut config = PollerConfig::default();
        config.timing.frame_gap_us = Some(0);
        assert!(config.link_timing().frame_gap.is_zero());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
serial:
  port: /dev/ttyUSB0
direction:
  polarity: active_low
query:
  register_names: [nitrogen, phosphorus, potassium]
"#;
        let config = PollerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.direction.polarity, Polarity::ActiveLow);
        assert_eq!(config.direction.kind, DirectionKind::Sysfs);
        assert_eq!(config.query.register_names.len(), 3);
        assert_eq!(config.query.start_register, 0x001E);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "direction:\n  kind: auto\nmax_cycles: 5").unwrap();

        let config = PollerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.direction.kind, DirectionKind::Auto);
        assert_eq!(config.max_cycles, Some(5));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = PollerConfig::from_yaml_str("serial: [not, a, map]").unwrap_err();
        assert!(matches!(err, ModbusError::Config { .. }));

        let err = PollerConfig::from_file("/nonexistent/poller.yaml").unwrap_err();
        assert!(matches!(err, ModbusError::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PollerConfig::new().with_port("").validate().is_err());
        assert!(PollerConfig::new().with_baud_rate(0).validate().is_err());
        assert!(PollerConfig::new().with_registers(0, 0).validate().is_err());
        assert!(PollerConfig::new().with_registers(0, 126).validate().is_err());

        // 8 registers need 21 bytes, more than the default read size
        assert!(PollerConfig::new().with_registers(0, 8).validate().is_err());

        let mut config = PollerConfig::new();
        config.query.register_names = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert!(config.validate().is_err());

        let mut config = PollerConfig::new();
        config.query.max_response_bytes = 4;
        assert!(config.validate().is_err());

        let mut config = PollerConfig::new();
        config.max_cycles = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_open_direction_line() {
        let auto = DirectionConfig {
            kind: DirectionKind::Auto,
            ..DirectionConfig::default()
        };
        let pin = auto.open().unwrap();
        assert_eq!(pin.line().describe(), "auto");

        // Line 16 of gpiochip0, whose sysfs base is 512
        let root = crate::direction::tests::fake_gpio_root();
        std::fs::create_dir(root.path().join("gpio528")).unwrap();
        let sysfs = DirectionConfig {
            sysfs_path: root.path().to_string_lossy().into_owned(),
            polarity: Polarity::ActiveLow,
            ..DirectionConfig::default()
        };
        let pin = sysfs.open().unwrap();
        assert_eq!(pin.line().describe(), "gpio528");
        // Active-low receive level
        assert_eq!(
            std::fs::read_to_string(root.path().join("gpio528/value")).unwrap(),
            "1"
        );

        let missing_chip = DirectionConfig {
            chip: 3,
            ..sysfs
        };
        assert!(matches!(missing_chip.open(), Err(ModbusError::Direction { .. })));
    }

    #[test]
    fn test_builder() {
        let config = PollerConfig::new()
            .with_port("/dev/ttyAMA0")
            .with_baud_rate(19_200)
            .with_slave_id(7)
            .with_registers(0x0100, 2)
            .with_gpio_chip(1)
            .with_direction_gpio(17)
            .with_polarity(Polarity::ActiveLow)
            .with_poll_interval_ms(500)
            .with_max_cycles(1)
            .with_packet_logging(true);

        assert_eq!(config.serial.port, "/dev/ttyAMA0");
        assert_eq!(config.query.slave_id, 7);
        assert_eq!(config.query.register_count, 2);
        assert_eq!(config.direction.chip, 1);
        assert_eq!(config.direction.gpio, 17);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert!(config.packet_logging);
        assert!(config.validate().is_ok());

        let auto = PollerConfig::new().with_auto_direction();
        assert_eq!(auto.direction.kind, DirectionKind::Auto);
    }
}
