use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use wshost_codec::{
    Fin, Frame, Opcode,
    compression::{compress, decompress},
    payload::MAX_LENGTH,
};

fn criterion_benchmark(c: &mut Criterion) {
    let small = Frame::new(Fin::Final, Opcode::Text, vec![b'a'; 64], false, true);
    let large = Frame::new(Fin::Final, Opcode::Binary, vec![7u8; 64 * 1024], false, true);
    let small_bytes = small.to_bytes();
    let large_bytes = large.to_bytes();
    let text = "The quick brown fox jumps over the lazy dog. ".repeat(100);
    let compressed = compress(text.as_bytes()).unwrap();

    let mut frame = c.benchmark_group("frame");

    frame.throughput(Throughput::Elements(1));
    frame.bench_function("encode_small", |b| {
        let mut buf = BytesMut::with_capacity(4096);
        b.iter(|| {
            buf.clear();
            small.encode(&mut buf);
        })
    });

    frame.bench_function("encode_64k", |b| {
        let mut buf = BytesMut::with_capacity(128 * 1024);
        b.iter(|| {
            buf.clear();
            large.encode(&mut buf);
        })
    });

    frame.bench_function("decode_small", |b| {
        b.iter(|| Frame::decode(&small_bytes, MAX_LENGTH).unwrap())
    });

    frame.bench_function("decode_64k", |b| {
        b.iter(|| Frame::decode(&large_bytes, MAX_LENGTH).unwrap())
    });

    frame.finish();

    let mut deflate = c.benchmark_group("deflate");

    deflate.bench_function("compress", |b| b.iter(|| compress(text.as_bytes()).unwrap()));
    deflate.bench_function("decompress", |b| b.iter(|| decompress(&compressed, u64::MAX).unwrap()));

    deflate.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
