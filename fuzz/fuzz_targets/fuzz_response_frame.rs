#![no_main]

use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;
use modbus_sensor_poll::{decode_read_response, verify_crc};

#[derive(Arbitrary, Debug)]
struct Input {
    slave_id: u8,
    register_count: u16,
    frame: Vec<u8>,
}

fuzz_target!(|input: Input| {
    if let Ok(response) = decode_read_response(&input.frame, input.slave_id, input.register_count) {
        assert!(verify_crc(&input.frame));
        assert_eq!(response.slave_id, input.slave_id);
        assert_eq!(response.registers.len(), input.register_count as usize);
    }
});
