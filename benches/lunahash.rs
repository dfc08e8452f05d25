use criterion::*;
use lunacoin::chain::ChainConfig;
use lunacoin::consensus::LUNAHASH_SLOTS;
use lunacoin::primitives::*;
use mimalloc::MiMalloc;
use rand::prelude::*;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub fn lunahash_benchmark(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0x4c55_4e41);
    let genesis = Block::genesis(&ChainConfig::mainnet());
    let header_bytes = genesis.header.pow_bytes();

    let mut group = c.benchmark_group("lunahash");
    group.throughput(Throughput::Elements(1));

    let mut hasher = LunaHasher::new();
    group.bench_function("hash header reusing scratchpad", |b| {
        b.iter(|| hasher.hash(black_box(&header_bytes), black_box(rng.gen())))
    });

    group.bench_function("hash header with fresh scratchpad", |b| {
        b.iter(|| luna_hash(black_box(&header_bytes), black_box(rng.gen())))
    });

    for slots in [LUNAHASH_SLOTS / 4, LUNAHASH_SLOTS, LUNAHASH_SLOTS * 4] {
        let mut hasher = LunaHasher::with_slots(slots);
        group.bench_with_input(BenchmarkId::new("slots", slots), &slots, |b, _| {
            b.iter(|| hasher.hash(black_box(&header_bytes), black_box(rng.gen())))
        });
    }

    group.finish();
}

pub fn block_validation_benchmark(c: &mut Criterion) {
    let genesis = Block::genesis(&ChainConfig::regtest());
    let mut group = c.benchmark_group("validation");

    group.bench_function("validate pow", |b| {
        b.iter(|| black_box(&genesis.header).validate_pow())
    });

    group.bench_function("tx root", |b| b.iter(|| compute_tx_root(black_box(&genesis.txs))));

    group.finish();
}

criterion_group!(benches, lunahash_benchmark, block_validation_benchmark);
criterion_main!(benches);
