//! Modbus RTU protocol constants and bus timing defaults
//!
//! Frame sizes and register limits follow the Modbus specification:
//! - Maximum RTU ADU: 256 bytes (slave address + 253 byte PDU + 2 byte CRC)
//! - A read-holding-registers response must fit within that ADU
//!
//! Timing defaults match the sensor station wiring (MAX485 transceiver,
//! DE/RE tied to one GPIO line, 9600 baud).

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum RTU frame size: slave address (1) + PDU (253) + CRC (2)
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

/// Length of a read-holding-registers request frame
///
/// Slave(1) + Function(1) + Address(2) + Quantity(2) + CRC(2) = 8 bytes
pub const READ_REQUEST_LEN: usize = 8;

/// Length of a read response frame without register data
///
/// Slave(1) + Function(1) + Byte count(1) + CRC(2) = 5 bytes
pub const READ_RESPONSE_OVERHEAD: usize = 5;

/// Length of an exception response frame
///
/// Slave(1) + Function|0x80(1) + Exception code(1) + CRC(2) = 5 bytes
pub const EXCEPTION_RESPONSE_LEN: usize = 5;

/// CRC field length in an RTU frame
pub const CRC_LEN: usize = 2;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03 (Read Holding Registers)
///
/// Response PDU: Function(1) + Byte count(1) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 125;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Bus Defaults
// ============================================================================

/// Default serial device
pub const DEFAULT_SERIAL_PORT: &str = "/dev/serial0";

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default GPIO chip (`/dev/gpiochip0`)
pub const DEFAULT_GPIO_CHIP: u32 = 0;

/// Default line offset on that chip driving the transceiver DE/RE pins
pub const DEFAULT_DIRECTION_GPIO: u32 = 16;

/// Default sysfs GPIO root
pub const DEFAULT_SYSFS_GPIO_PATH: &str = "/sys/class/gpio";

/// Default slave address of the sensor
pub const DEFAULT_SLAVE_ID: u8 = 1;

/// Default first register polled (0x001E)
pub const DEFAULT_START_REGISTER: u16 = 0x001E;

/// Default number of registers polled
pub const DEFAULT_REGISTER_COUNT: u16 = 3;

/// Default number of bytes read per cycle
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 20;

// ============================================================================
// Timing Defaults (milliseconds)
// ============================================================================

/// Transceiver settle time before and after transmitting
pub const DEFAULT_TX_SETTLE_MS: u64 = 10;

/// Delay between the end of transmission and the start of reading
pub const DEFAULT_RESPONSE_DELAY_MS: u64 = 200;

/// Bounded time allowed for reading a response
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Bounded time allowed for writing a request
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

/// Delay between poll cycles
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Lower bound on the RTU inter-frame gap (used above 19200 baud)
pub const MIN_FRAME_GAP_US: u64 = 1750;
