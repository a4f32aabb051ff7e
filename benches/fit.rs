use bacon_rs::{AgeDepthModel, ChronRecord, McmcSettings, PriorSampler};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

fn make_model(iterations: usize, k: usize) -> AgeDepthModel<PriorSampler> {
    let settings = McmcSettings {
        k,
        ..Default::default()
    };
    let sampler = PriorSampler {
        iterations,
        seed: 42,
    };
    AgeDepthModel::new(ChronRecord::default(), sampler, settings).with_burnin(0)
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("fit prior 2000 x 20", |b| {
        b.iter_batched(
            || make_model(2000, 20),
            |mut model| {
                model.fit().unwrap();
                black_box(model)
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("fit prior 2000 x 100", |b| {
        b.iter_batched(
            || make_model(2000, 100),
            |mut model| {
                model.fit().unwrap();
                black_box(model)
            },
            BatchSize::SmallInput,
        )
    });

    let mut model = make_model(2000, 20);
    model.fit().unwrap();
    c.bench_function("age median 2000 x 20", |b| {
        b.iter(|| black_box(model.age_median().unwrap()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
