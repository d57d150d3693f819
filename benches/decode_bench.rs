use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use snapdiff::streaming::{encode_stream, Attribute, Command, CommandFrame};
use snapdiff::{normalize, read_send_stream, Change};

/// Incremental stream touching `file_count` files: every file is created
/// under a temporary name, renamed into place, then has metadata set.
fn make_stream(file_count: usize) -> Vec<u8> {
    let mut frames = Vec::with_capacity(file_count * 5);
    for i in 0..file_count {
        let tmp = format!("o{}-7-0", 257 + i);
        let path = format!("dir{}/file{}.txt", i % 64, i);
        frames.push(
            CommandFrame::new(Command::Mkfile)
                .string(Attribute::Path, &tmp)
                .u64(Attribute::Ino, 257 + i as u64),
        );
        frames.push(
            CommandFrame::new(Command::Rename)
                .string(Attribute::Path, &tmp)
                .string(Attribute::PathTo, &path),
        );
        frames.push(
            CommandFrame::new(Command::Write)
                .string(Attribute::Path, &path)
                .u64(Attribute::FileOffset, 0)
                .bytes(Attribute::Data, &[0xAA; 512]),
        );
        frames.push(
            CommandFrame::new(Command::Chown)
                .string(Attribute::Path, &path)
                .u64(Attribute::Uid, 0)
                .u64(Attribute::Gid, 0),
        );
        frames.push(
            CommandFrame::new(Command::Chmod)
                .string(Attribute::Path, &path)
                .u64(Attribute::Mode, 0o644),
        );
    }
    encode_stream(&frames).to_vec()
}

fn make_raw_changes(file_count: usize) -> Vec<Change> {
    let mut changes = Vec::with_capacity(file_count * 4);
    for i in 0..file_count {
        let tmp = format!("/o{}-7-0", 257 + i);
        let path = format!("/dir{}/file{}.txt", i % 64, i);
        changes.push(Change::add(&tmp));
        changes.push(Change::delete(&tmp));
        changes.push(Change::add(&path));
        changes.push(Change::modify(&path));
        changes.push(Change::modify(format!("/dir{}", i % 64)));
    }
    changes
}

fn bench_read_send_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("read_send_stream");

    for file_count in [100, 1000, 10000].iter() {
        let stream = make_stream(*file_count);

        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| {
                b.iter(|| rt.block_on(read_send_stream(black_box(&stream[..]))).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for file_count in [100, 1000, 10000, 100000].iter() {
        let changes = make_raw_changes(*file_count);

        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| {
                b.iter(|| normalize(black_box(changes.clone())).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_read_send_stream, bench_normalize);
criterion_main!(benches);
