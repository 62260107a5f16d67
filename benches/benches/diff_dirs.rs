use criterion::{Criterion, criterion_group, criterion_main};
use cvdkit::diff::{self, DiffOptions};
use std::fs;

fn make_db(dir: &std::path::Path, lines: usize, churn_every: usize) {
    let mut out = String::new();
    for i in 0..lines {
        if churn_every != 0 && i % churn_every == 0 {
            out.push_str(&format!("sig{i:06}x:1:A:Updated.{i}\n"));
        } else {
            out.push_str(&format!("sig{i:06}:1:A:Trojan.{i}\n"));
        }
    }
    fs::write(dir.join("daily.hdb"), out).unwrap();
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let old = tempfile::tempdir().unwrap();
    let new = tempfile::tempdir().unwrap();
    make_db(old.path(), 5_000, 0);
    make_db(new.path(), 5_000, 200);

    let mut group = c.benchmark_group("diff_dirs");
    group.bench_function("5k_lines_sparse_churn", |b| {
        b.iter(|| diff::diff_dirs(old.path(), new.path(), &DiffOptions::default()).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
