use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modbus_sensor_poll::{append_crc, build_query, crc16, decode_read_response};

fn bench_crc(c: &mut Criterion) {
    let query = [0x01u8, 0x03, 0x00, 0x1E, 0x00, 0x03];
    let max_frame: Vec<u8> = (0..254u16).map(|i| i as u8).collect();

    c.bench_function("crc16_query", |b| b.iter(|| crc16(black_box(&query))));
    c.bench_function("crc16_max_frame", |b| b.iter(|| crc16(black_box(&max_frame))));
}

fn bench_frames(c: &mut Criterion) {
    c.bench_function("build_query", |b| {
        b.iter(|| build_query(black_box(1), black_box(0x001E), black_box(3)))
    });

    let mut response = vec![0x01, 0x03, 0x06, 0x00, 0x20, 0x00, 0x12, 0x00, 0x58];
    append_crc(&mut response);
    c.bench_function("decode_read_response", |b| {
        b.iter(|| decode_read_response(black_box(&response), 1, 3))
    });
}

criterion_group!(benches, bench_crc, bench_frames);
criterion_main!(benches);
