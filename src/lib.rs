//! # Modbus Sensor Poll - RS485 Modbus RTU sensor polling
//!
//! Polls a sensor on a half-duplex RS485 bus with Modbus RTU
//! "read holding registers" requests. The transceiver direction is switched
//! by a GPIO line around each transmission.
//!
//! ## Exchange
//!
//! | Step | Action | Default |
//! |------|--------|---------|
//! | 1 | Build FC03 request + CRC16 | slave 1, register 0x001E, 3 registers |
//! | 2 | Direction line to transmit, settle | 10 ms |
//! | 3 | Write + flush, settle, back to receive | 10 ms |
//! | 4 | Wait, then read response | 200 ms, up to 20 bytes within 1 s |
//! | 5 | Verify CRC, decode registers, report | |
//! | 6 | Sleep until the next cycle | 2 s |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_sensor_poll::{open_serial, PollerConfig, Poller, RtuLink, ModbusResult};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = PollerConfig::default().with_port("/dev/ttyUSB0");
//!     config.validate()?;
//!
//!     let serial = open_serial(&config.serial)?;
//!     let direction = config.direction.open()?;
//!     let link = RtuLink::new(serial, direction, config.link_timing());
//!
//!     let mut poller = Poller::new(link, &config);
//!     let report = poller.poll_once().await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

/// Error types and result handling
pub mod error;

/// Protocol constants and timing defaults
pub mod constants;

/// CRC-16/MODBUS checksum
pub mod crc;

/// Request building and response decoding
pub mod frame;

/// Transceiver direction control
pub mod direction;

/// Serial link with direction-controlled transmit
pub mod transport;

/// Poll cycle driver
pub mod poller;

/// Poller configuration
pub mod config;

/// Console logging setup
pub mod logging;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use config::{DirectionKind, PollerConfig};
pub use crc::{append_crc, crc16, verify_crc};
pub use direction::{AutoDirection, DirectionControl, DirectionPin, Polarity, SysfsDirectionLine};
pub use error::{ModbusError, ModbusResult};
pub use frame::{build_query, decode_read_response, QueryFrame, RegisterResponse, SlaveId};
pub use poller::{CycleOutcome, PollReport, PollState, PollStats, Poller};
pub use transport::{LinkTiming, RtuLink, TransportStats};

#[cfg(feature = "rtu")]
pub use transport::open_serial;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
