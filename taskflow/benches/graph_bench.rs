//! Benchmarks for graph validation and layering.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use taskflow::capability::CapabilityHandle;
use taskflow::graph::{GraphBuilder, TaskSpec};

/// A layered graph: `width` tasks per layer, each depending on two tasks of
/// the previous layer.
fn layered_specs(layers: usize, width: usize) -> Vec<TaskSpec> {
    let mut specs = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for slot in 0..width {
            let mut spec = TaskSpec::new(
                format!("t{layer}_{slot}"),
                CapabilityHandle::new("noop", format!("res{}", slot % 4)),
            );
            if layer > 0 {
                spec = spec
                    .depends_on(format!("t{}_{}", layer - 1, slot))
                    .depends_on(format!("t{}_{}", layer - 1, (slot + 1) % width));
            }
            specs.push(spec);
        }
    }
    specs
}

fn graph_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    for (layers, width) in [(10, 10), (50, 20), (100, 50)] {
        let specs = layered_specs(layers, width);
        group.bench_with_input(
            BenchmarkId::from_parameter(layers * width),
            &specs,
            |b, specs| {
                b.iter(|| {
                    let graph = GraphBuilder::new("bench")
                        .tasks(specs.iter().cloned())
                        .build();
                    black_box(graph)
                });
            },
        );
    }
    group.finish();

    let Ok(graph) = GraphBuilder::new("bench").tasks(layered_specs(100, 50)).build() else {
        return;
    };
    c.bench_function("descendants_of_root", |b| {
        b.iter(|| black_box(graph.descendants("t0_0")));
    });
}

criterion_group!(benches, graph_benchmark);
criterion_main!(benches);
