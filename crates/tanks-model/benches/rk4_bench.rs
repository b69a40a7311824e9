use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use tanks_model::system::{IntegrationMethod, TankSystem};
use tanks_types::config::PlantConfig;

fn bench_system_step(c: &mut Criterion) {
    let config = Arc::new(PlantConfig::default());
    let u = config.equilibrium_controls().to_vec();

    c.bench_function("rk4_single_microstep", |b| {
        b.iter_batched(
            || TankSystem::new(config.clone()),
            |mut sys| {
                let x = sys.advance(&u, 0.5, IntegrationMethod::Rk4).unwrap();
                black_box(x[2]);
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("rk4_control_period", |b| {
        b.iter_batched(
            || TankSystem::new(config.clone()),
            |mut sys| {
                let x = sys.advance(&u, config.timing.control_period, IntegrationMethod::Rk4).unwrap();
                black_box(x[3]);
            },
            BatchSize::SmallInput,
        )
    });

    let mut group = c.benchmark_group("rk4_horizon");
    group.sample_size(10);
    group.bench_function("3000s", |b| {
        b.iter_batched(
            || TankSystem::new(config.clone()),
            |mut sys| {
                let x = sys
                    .advance(&u, config.timing.simulation_horizon, IntegrationMethod::Rk4)
                    .unwrap();
                black_box(x[7]);
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_system_step);
criterion_main!(benches);
