use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use ixa_contagion::{
    Context, ContextInfectionExt, ContextParametersExt, ContextSimulationExt, Parameters,
};

static POPULATION: usize = 2000;
static SEED: u64 = 123;

fn seeded_context(infected_fraction: f64) -> Context {
    let mut parameters = Parameters::default();
    parameters.seed = SEED;
    parameters.population.pop_size = POPULATION;
    parameters.virus.infection_range = 0.02;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let infected = (POPULATION as f64 * infected_fraction) as usize;
    parameters.initial_infections = (0..infected).collect();

    let mut context = Context::new();
    context
        .set_parameters(parameters)
        .expect("benchmark parameters are valid");
    context
        .init_simulation()
        .expect("failed to initialize simulation");
    context
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("infection scan");
    // Below half the population infectious: scan outward from the infectious agents.
    group.bench_function("from infectious", |bencher| {
        bencher.iter_batched(
            || seeded_context(0.1),
            |mut context| context.infect().expect("infection step failed"),
            BatchSize::LargeInput,
        );
    });
    // At or above half: scan from the healthy agents and count infectious neighbours.
    group.bench_function("from healthy", |bencher| {
        bencher.iter_batched(
            || seeded_context(0.6),
            |mut context| context.infect().expect("infection step failed"),
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(infection_benches, criterion_benchmark);
criterion_main!(infection_benches);
