//! Benchmarks for dependency resolution and pipeline invocation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use etlflow::blocks::IterExtractor;
use etlflow::core::DependencyMetadata;
use etlflow::pipeline::{DependencyNode, DependencyResolver, Pipeline};
use etlflow::testing::RecordingLoader;

#[derive(Clone)]
struct Node {
    name: String,
    metadata: DependencyMetadata,
}

impl DependencyNode for Node {
    fn label(&self) -> String {
        self.name.clone()
    }

    fn dependency_metadata(&self) -> &DependencyMetadata {
        &self.metadata
    }
}

/// Layers of `width` entity types, each reading two types of the layer above.
fn layered(layers: usize, width: usize) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for i in 0..width {
            let mut metadata = DependencyMetadata::new().with_target(format!("E{layer}_{i}"));
            if layer > 0 {
                metadata = metadata
                    .with_source(format!("E{}_{}", layer - 1, i))
                    .with_source(format!("E{}_{}", layer - 1, (i + 1) % width));
            }
            nodes.push(Node {
                name: format!("p{layer}_{i}"),
                metadata,
            });
        }
    }
    nodes.reverse();
    nodes
}

fn resolver_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for (layers, width) in [(5, 10), (20, 25), (50, 40)] {
        let nodes = layered(layers, width);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{width}")),
            &nodes,
            |b, nodes| b.iter(|| DependencyResolver::resolve(black_box(nodes.clone()))),
        );
    }
    group.finish();
}

fn invoke_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("invoke_extract_load_10k", |b| {
        b.iter(|| {
            let pipeline = Pipeline::builder("numbers")
                .extract("read", IterExtractor::new(|| 0..10_000_u64))
                .load("write", RecordingLoader::<u64>::new())
                .build()
                .unwrap();
            runtime.block_on(pipeline.invoke(1))
        });
    });
}

criterion_group!(benches, resolver_benchmark, invoke_benchmark);
criterion_main!(benches);
