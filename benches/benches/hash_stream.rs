use criterion::{Criterion, criterion_group, criterion_main};
use cvdkit::hash::{Md5Digest, Sha256Digest};

pub fn criterion_benchmark(c: &mut Criterion) {
    let payload = vec![0x42u8; 8 * 1024 * 1024];

    let mut group = c.benchmark_group("hash_stream");
    group.bench_function("md5_8mb", |b| {
        b.iter(|| Md5Digest::of_stream(payload.as_slice()).unwrap())
    });
    group.bench_function("sha256_8mb", |b| {
        b.iter(|| Sha256Digest::of_stream(payload.as_slice()).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
