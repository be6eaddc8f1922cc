#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_sensor_poll::{build_query, verify_crc};

fuzz_target!(|input: (u8, u16, u16)| {
    let (slave_id, start, count) = input;
    let frame = build_query(slave_id, start, count);
    assert!(verify_crc(frame.as_bytes()));
    assert_eq!(frame.slave_id(), slave_id);
    assert_eq!(frame.start_register(), start);
    assert_eq!(frame.register_count(), count);
});
