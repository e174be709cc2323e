//! Performance benchmarks for the frame codec, masking, buffer pool and
//! compression engine.
//!
//! Run with: `cargo bench`

use bytes::BytesMut;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use wsengine::protocol::{Frame, apply_mask};
use wsengine::{BufferPool, OpCode};

fn encode_frame_to_vec(payload_size: usize, mask: Option<[u8; 4]>) -> Vec<u8> {
    let frame = Frame::new(true, OpCode::Binary, vec![0xAB; payload_size]);
    let mut buf = BytesMut::with_capacity(frame.wire_size(mask.is_some()));
    frame.write(&mut buf, mask);
    buf.to_vec()
}

fn bench_frame_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");
    let mask = [0x37, 0xFA, 0x21, 0x3D];

    for size in [10usize, 1024, 65_536] {
        let unmasked = encode_frame_to_vec(size, None);
        let masked = encode_frame_to_vec(size, Some(mask));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}b_unmasked"), |b| {
            b.iter(|| Frame::parse(black_box(&unmasked)))
        });
        group.bench_function(format!("{size}b_masked"), |b| {
            b.iter(|| Frame::parse(black_box(&masked)))
        });
    }
    group.finish();
}

fn bench_frame_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [10usize, 1024, 65_536] {
        let frame = Frame::new(true, OpCode::Binary, vec![0xAB; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}b_unmasked"), |b| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(frame.wire_size(false));
                frame.write(black_box(&mut buf), None);
                buf
            })
        });
        group.bench_function(format!("{size}b_masked"), |b| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(frame.wire_size(true));
                frame.write(black_box(&mut buf), Some([0x37, 0xFA, 0x21, 0x3D]));
                buf
            })
        });
    }
    group.finish();
}

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_mask");
    let mask = [0x12, 0x34, 0x56, 0x78];

    for size in [64usize, 1024, 65_536, 1_048_576] {
        let mut data = vec![0xCD; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}b"), |b| {
            b.iter(|| apply_mask(black_box(&mut data), mask))
        });
    }
    group.finish();
}

fn bench_buffer_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");

    let pool = BufferPool::new();
    for size in [100usize, 4000, 60_000] {
        group.bench_function(format!("get_put_{size}b"), |b| {
            b.iter(|| {
                let buf = pool.get(black_box(size));
                drop(buf);
            })
        });
    }
    group.bench_function("get_put_unpooled_1mb", |b| {
        b.iter(|| {
            let buf = pool.get(black_box(1_048_576));
            drop(buf);
        })
    });
    group.finish();
}

#[cfg(feature = "compression")]
fn bench_compression(c: &mut Criterion) {
    use wsengine::Role;
    use wsengine::deflate::{CompressionContext, DeflateConfig, DeflateOffer, negotiate};

    // Per-message reset, so every iteration sees the same dictionary.
    let config = DeflateConfig {
        server_no_context_takeover: true,
        client_no_context_takeover: true,
        ..DeflateConfig::default()
    };
    let params = negotiate(&config, &DeflateOffer::default()).unwrap();
    let mut group = c.benchmark_group("deflate");

    for size in [1024usize, 65_536] {
        let payload: Vec<u8> = (0..size).map(|i| (i / 13 % 256) as u8).collect();
        let mut compressor = CompressionContext::new(&params, Role::Server);
        let compressed = compressor.compress(&payload).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("compress_{size}b"), |b| {
            let mut ctx = CompressionContext::new(&params, Role::Server);
            b.iter(|| ctx.compress(black_box(&payload)))
        });
        group.bench_function(format!("decompress_{size}b"), |b| {
            let mut ctx = CompressionContext::new(&params, Role::Client);
            b.iter(|| ctx.decompress(black_box(&compressed), usize::MAX))
        });
    }
    group.finish();
}

#[cfg(feature = "compression")]
criterion_group!(
    benches,
    bench_frame_parsing,
    bench_frame_encoding,
    bench_masking,
    bench_buffer_pool,
    bench_compression
);
#[cfg(not(feature = "compression"))]
criterion_group!(
    benches,
    bench_frame_parsing,
    bench_frame_encoding,
    bench_masking,
    bench_buffer_pool
);
criterion_main!(benches);
