use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gics::{pack, unpack, FieldRecord, ItemId, PackOptions, Snapshot, UnpackOptions};

fn linear_trend_snapshots(n: i64) -> Vec<Snapshot> {
    (0..n)
        .map(|i| {
            Snapshot::new(1_700_000_000_000 + i * 1000).with_item(
                ItemId::Numeric(1),
                FieldRecord { price: 1000.0 + 10.0 * i as f64, quantity: 1.0 },
            )
        })
        .collect()
}

fn bench_codecs(c: &mut Criterion) {
    let deltas: Vec<i64> = (0..1000i64).map(|i| i % 7 - 3).collect();
    c.bench_function("encode_varint_seq_1000", |b| {
        b.iter(|| gics::bitio::encode_varint_seq(black_box(&deltas)))
    });
    c.bench_function("encode_bitpack_1000", |b| {
        b.iter(|| gics::bitio::encode_bitpack(black_box(&deltas)))
    });

    let payload = vec![0u8; 64 * 1024];
    c.bench_function("zstd_compress_64kb", |b| {
        b.iter(|| gics::outer::compress(gics::format::OUTER_CODEC_ZSTD, black_box(&payload)))
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let snaps = linear_trend_snapshots(10_000);
    c.bench_function("pack_linear_trend_10k", |b| {
        b.iter(|| pack(black_box(snaps.clone()), PackOptions::new()).unwrap())
    });

    let bytes = pack(snaps, PackOptions::new()).unwrap();
    c.bench_function("unpack_linear_trend_10k", |b| {
        b.iter(|| unpack(black_box(bytes.clone()), UnpackOptions::new()).unwrap())
    });
}

criterion_group!(benches, bench_codecs, bench_pipeline);
criterion_main!(benches);
