//! Backward traversal throughput on a small two-layer classifier.

use core_cfg::{Cfg, CfgBuilder, NodeId};
use core_domain::Poly;
use core_engine::BackwardTraversal;
use core_expr::{LinExpr, Variable};
use criterion::{Criterion, criterion_group, criterion_main};
use std::collections::BTreeSet;
use std::hint::black_box;

fn var(name: &str) -> Variable {
    Variable::new(name)
}

/// Two hidden neurons per input, all activations left disjunctive.
fn two_layer() -> (Cfg, BTreeSet<NodeId>) {
    let mut builder = CfgBuilder::new();
    builder.assign(vec![
        (var("h1"), LinExpr::var(var("x1")).with_term(var("x2"), 0.5).with_constant(-0.4)),
        (var("h2"), LinExpr::var(var("x2")).with_term(var("x1"), -0.5).with_constant(0.1)),
    ]);
    builder.relu(var("h1"));
    builder.relu(var("h2"));
    builder.assign(vec![
        (var("o1"), LinExpr::var(var("h1")).with_term(var("h2"), -1.0)),
        (var("o2"), LinExpr::var(var("h2")).with_term(var("h1"), -1.0)),
    ]);
    (builder.build(), BTreeSet::new())
}

fn traversal(criterion: &mut Criterion) {
    let (cfg, none) = two_layer();
    let mut seed = Poly::top();
    let mut outcome = LinExpr::var(var("o1"));
    outcome.add_scaled(&LinExpr::var(var("o2")), -1.0);
    seed.add_cons(outcome, true);

    criterion.bench_function("backward_traversal_two_layer", |bencher| {
        bencher.iter(|| {
            let states: Vec<Poly> = BackwardTraversal::new(
                &cfg,
                &none,
                &none,
                false,
                cfg.out_node(),
                black_box(seed.clone()),
            )
            .collect();
            black_box(states)
        })
    });
}

criterion_group!(benches, traversal);
criterion_main!(benches);
