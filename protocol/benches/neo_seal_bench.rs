// Neo Seal and quadrit primitive benchmarks for the Helix protocol.
//
// Covers key derivation, sealing, seal verification, and the quadrit codec
// and hash at a few payload sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use helix_protocol::crypto::hash::{hash_bytes, quadrit_hash};
use helix_protocol::crypto::mq::derive_keypair;
use helix_protocol::crypto::quadrit::{decode, encode};
use helix_protocol::crypto::seal::{sign, verify};

fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("neo_seal/derive_keypair");
    group.sample_size(10);
    group.bench_function("uov_gf16", |b| {
        b.iter(|| derive_keypair(b"bench-key-derivation"));
    });
    group.finish();
}

fn bench_sign(c: &mut Criterion) {
    let keypair = derive_keypair(b"bench-sign");
    let message = hash_bytes(b"block 42 on tip 41");

    c.bench_function("neo_seal/sign", |b| {
        b.iter(|| sign(&keypair, &message).unwrap());
    });
}

fn bench_verify(c: &mut Criterion) {
    let keypair = derive_keypair(b"bench-verify");
    let message = hash_bytes(b"block 42 on tip 41");
    let seal = sign(&keypair, &message).unwrap();
    let public = keypair.public_system();

    c.bench_function("neo_seal/verify", |b| {
        b.iter(|| verify(public, &message, &seal));
    });
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("quadrit/codec");

    for size in [64usize, 1024, 16 * 1024] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let seq = encode(&data);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &data, |b, data| {
            b.iter(|| encode(data));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &seq, |b, seq| {
            b.iter(|| decode(seq).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("hash", size), &seq, |b, seq| {
            b.iter(|| quadrit_hash(seq));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_key_derivation,
    bench_sign,
    bench_verify,
    bench_codec,
);
criterion_main!(benches);
