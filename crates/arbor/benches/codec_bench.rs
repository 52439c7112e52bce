use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use arbor::RadixTree;

const N: usize = 1_000;
const VAL_SIZE: usize = 100;

fn populated_tree() -> RadixTree {
    let mut tree = RadixTree::new();
    for i in 0..N {
        let key = format!("key/{:06}", i).into_bytes();
        tree.put(&key, &vec![b'x'; VAL_SIZE]).unwrap();
    }
    tree
}

fn codec_serialize(c: &mut Criterion) {
    c.bench_function("codec_serialize_1k", |b| {
        b.iter_batched(
            populated_tree,
            |mut tree| {
                let mut buf = Vec::new();
                tree.serialize(&mut buf).unwrap();
                criterion::black_box(buf);
            },
            BatchSize::SmallInput,
        );
    });
}

fn codec_deserialize(c: &mut Criterion) {
    let mut buf = Vec::new();
    populated_tree().serialize(&mut buf).unwrap();

    c.bench_function("codec_deserialize_1k", |b| {
        b.iter(|| {
            let tree = RadixTree::deserialize(&mut buf.as_slice()).unwrap();
            criterion::black_box(tree);
        });
    });
}

fn codec_file_roundtrip(c: &mut Criterion) {
    c.bench_function("codec_file_roundtrip_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                (dir, populated_tree())
            },
            |(dir, mut tree)| {
                let path = dir.path().join("bench.rdx");

                let mut file = std::fs::File::create(&path).unwrap();
                tree.serialize(&mut file).unwrap();
                drop(file);

                let mut file = std::fs::File::open(&path).unwrap();
                criterion::black_box(RadixTree::deserialize(&mut file).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, codec_serialize, codec_deserialize, codec_file_roundtrip);

criterion_main!(benches);
