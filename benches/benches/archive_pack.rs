use criterion::{Criterion, criterion_group, criterion_main};
use cvdkit::archive;
use std::fs;

pub fn criterion_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..20 {
        fs::write(dir.path().join(format!("main.{i:03}.hdb")), vec![b'a'; 64 * 1024]).unwrap();
    }

    let mut group = c.benchmark_group("archive_pack");
    group.bench_function("20_files_64kb", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            archive::pack_dir(&mut out, dir.path()).unwrap();
            out
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
