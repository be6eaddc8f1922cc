//! Modbus RTU frames for reading holding registers
//!
//! # Request (FC03)
//!
//! ```text
//! | slave | 0x03 | addr hi | addr lo | count hi | count lo | crc lo | crc hi |
//! ```
//!
//! # Response
//!
//! ```text
//! | slave | 0x03 | byte count | reg0 hi | reg0 lo | ... | crc lo | crc hi |
//! | slave | 0x83 | exception code | crc lo | crc hi |
//! ```

use std::fmt;

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_RESPONSE_LEN, FC_READ_HOLDING_REGISTERS, MAX_READ_REGISTERS,
    READ_REQUEST_LEN, READ_RESPONSE_OVERHEAD,
};
use crate::crc::{crc16, trailing_crc};
use crate::error::{ModbusError, ModbusResult};

/// Slave (unit) address on the RS485 bus
pub type SlaveId = u8;

/// Format raw bytes as space-separated hex for logs
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read-holding-registers request frame, CRC included.
///
/// Built once per poll cycle and never modified; a new frame means a new CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryFrame {
    bytes: [u8; READ_REQUEST_LEN],
}

impl QueryFrame {
    /// Raw bytes as sent on the wire
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn slave_id(&self) -> SlaveId {
        self.bytes[0]
    }

    pub fn function_code(&self) -> u8 {
        self.bytes[1]
    }

    pub fn start_register(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn register_count(&self) -> u16 {
        u16::from_be_bytes([self.bytes[4], self.bytes[5]])
    }

    /// CRC carried in the last two bytes
    pub fn crc(&self) -> u16 {
        u16::from_le_bytes([self.bytes[6], self.bytes[7]])
    }

    /// Length of a well-formed normal response to this request
    pub fn expected_response_len(&self) -> usize {
        READ_RESPONSE_OVERHEAD + self.register_count() as usize * 2
    }
}

impl AsRef<[u8]> for QueryFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for QueryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex(&self.bytes))
    }
}

/// Build a read-holding-registers (FC03) request.
///
/// Every `u8`/`u16` input is encodable, so this cannot fail. Whether the
/// device accepts the register range is its own business.
pub fn build_query(slave_id: SlaveId, start_register: u16, register_count: u16) -> QueryFrame {
    let [addr_hi, addr_lo] = start_register.to_be_bytes();
    let [count_hi, count_lo] = register_count.to_be_bytes();

    let mut bytes = [
        slave_id,
        FC_READ_HOLDING_REGISTERS,
        addr_hi,
        addr_lo,
        count_hi,
        count_lo,
        0,
        0,
    ];
    let [crc_lo, crc_hi] = crc16(&bytes[..6]).to_le_bytes();
    bytes[6] = crc_lo;
    bytes[7] = crc_hi;

    let frame = QueryFrame { bytes };
    debug!(
        "Query built: slave={} start=0x{:04X} count={} frame=[{}]",
        slave_id, start_register, register_count, frame
    );
    frame
}

/// Check a register count against the FC03 limit (1..=125).
pub fn validate_read_quantity(register_count: u16) -> ModbusResult<()> {
    if register_count == 0 || register_count > MAX_READ_REGISTERS {
        return Err(ModbusError::invalid_data(format!(
            "Invalid register count {} (allowed 1..={})",
            register_count, MAX_READ_REGISTERS
        )));
    }
    Ok(())
}

/// Decoded read-holding-registers response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub slave_id: SlaveId,
    pub function: u8,
    pub registers: Vec<u16>,
}

impl RegisterResponse {
    /// Register value at `index` (relative to the first requested register)
    pub fn get(&self, index: usize) -> Option<u16> {
        self.registers.get(index).copied()
    }
}

/// Decode and validate a read-holding-registers response.
///
/// Checks run in wire order: length, CRC, slave address, function code,
/// byte count. An exception reply (function | 0x80) becomes
/// [`ModbusError::Exception`]; anything else malformed is
/// [`ModbusError::Frame`].
pub fn decode_read_response(
    frame: &[u8],
    expected_slave: SlaveId,
    expected_count: u16,
) -> ModbusResult<RegisterResponse> {
    if frame.len() < EXCEPTION_RESPONSE_LEN {
        return Err(ModbusError::frame(format!(
            "Response too short: {} bytes (min {})",
            frame.len(),
            EXCEPTION_RESPONSE_LEN
        )));
    }

    let body = &frame[..frame.len() - 2];
    let calculated_crc = crc16(body);
    let received_crc = trailing_crc(frame).unwrap_or_default();
    if received_crc != calculated_crc {
        return Err(ModbusError::frame(format!(
            "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
            calculated_crc, received_crc
        )));
    }

    let slave_id = frame[0];
    if slave_id != expected_slave {
        return Err(ModbusError::frame(format!(
            "Response slave ID mismatch: expected {}, got {}",
            expected_slave, slave_id
        )));
    }

    let function = frame[1];
    if function == FC_READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        if frame.len() != EXCEPTION_RESPONSE_LEN {
            return Err(ModbusError::frame(format!(
                "Invalid exception response length: {} bytes",
                frame.len()
            )));
        }
        return Err(ModbusError::Exception {
            function: FC_READ_HOLDING_REGISTERS,
            code: frame[2],
        });
    }
    if function != FC_READ_HOLDING_REGISTERS {
        return Err(ModbusError::frame(format!(
            "Function code mismatch: expected 0x{:02X}, got 0x{:02X}",
            FC_READ_HOLDING_REGISTERS, function
        )));
    }

    let byte_count = frame[2] as usize;
    let expected_bytes = expected_count as usize * 2;
    if byte_count != expected_bytes {
        return Err(ModbusError::frame(format!(
            "Byte count mismatch: expected {}, got {}",
            expected_bytes, byte_count
        )));
    }
    if frame.len() != READ_RESPONSE_OVERHEAD + byte_count {
        return Err(ModbusError::frame(format!(
            "Response length {} does not match byte count {}",
            frame.len(),
            byte_count
        )));
    }

    let registers = frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();

    debug!(
        "Response decoded: slave={} registers={:?}",
        slave_id, registers
    );

    Ok(RegisterResponse {
        slave_id,
        function,
        registers,
    })
}
