use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stride::config::EngineSettings;
use stride::domain::{Payload, WorkflowStep};
use stride::orchestration::resolver::DependencyGraph;
use stride::orchestration::Engine;

/// `width` independent chains of `depth` steps joined by one final step
fn layered_steps(width: usize, depth: usize) -> Vec<WorkflowStep> {
    let mut steps = Vec::with_capacity(width * depth + 1);
    for lane in 0..width {
        for level in 0..depth {
            let mut step = WorkflowStep::new(format!("s{}_{}", lane, level), "agent", "analyze");
            if level > 0 {
                step = step.depends_on([format!("s{}_{}", lane, level - 1)]);
            }
            steps.push(step);
        }
    }
    let tails: Vec<String> = (0..width).map(|lane| format!("s{}_{}", lane, depth - 1)).collect();
    steps.push(WorkflowStep::new("join", "agent", "analyze").depends_on(tails));
    steps
}

fn benchmark_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");
    for size in [10usize, 100, 1000] {
        let steps = layered_steps(size / 10, 10);
        group.bench_with_input(BenchmarkId::from_parameter(size), &steps, |b, steps| {
            b.iter(|| {
                let graph = DependencyGraph::from_nodes(black_box(steps));
                graph.topological_order().unwrap()
            });
        });
    }
    group.finish();
}

fn benchmark_level_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("level_grouping");
    for size in [10usize, 100, 1000] {
        let steps = layered_steps(size / 10, 10);
        group.bench_with_input(BenchmarkId::from_parameter(size), &steps, |b, steps| {
            b.iter(|| {
                let graph = DependencyGraph::from_nodes(black_box(steps));
                graph.level_grouping().unwrap()
            });
        });
    }
    group.finish();
}

fn benchmark_cycle_detection(c: &mut Criterion) {
    let mut steps = layered_steps(10, 10);
    // Close a loop from the first step back to the join
    steps[0] = steps[0].clone().depends_on(["join"]);
    c.bench_function("find_cycle_100", |b| {
        b.iter(|| {
            let graph = DependencyGraph::from_nodes(black_box(&steps));
            graph.find_cycle()
        });
    });
}

fn benchmark_builtin_workflow(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = rt
        .block_on(Engine::with_builtin_catalog(EngineSettings::default()))
        .unwrap();

    c.bench_function("team_training_orchestration", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .orchestrator
                    .execute_workflow("team_training_orchestration", Payload::new(), None)
                    .await
                    .unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    benchmark_topological_order,
    benchmark_level_grouping,
    benchmark_cycle_detection,
    benchmark_builtin_workflow
);
criterion_main!(benches);
