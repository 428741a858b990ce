//! Dispatch-tree lookup benchmarks: monomorphic, layered-range, and
//! wide-disjoint method shapes.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use core_dispatch::{Definition, Method};
use core_value::types::{self, ExtInt};
use core_value::{atom, scalar, Value};

fn handler(arg_type: Value) -> Value {
    let mut builder = core_code::CodeBuilder::new("bench handler");
    builder.args(vec![arg_type]);
    builder.returns(types::integers());
    builder.push_literal(scalar::integer(1));
    builder.emit(core_code::L1Operation::Return);
    core_code::function_value(builder.finish(), Vec::new())
}

fn range(lo: i64, hi: i64) -> Value {
    types::integer_range(ExtInt::Fin(lo), true, ExtInt::Fin(hi), true)
}

fn layered_method(layers: usize) -> std::sync::Arc<Method> {
    let method = Method::new(atom::fresh_atom("bench_")).unwrap();
    for layer in 0..layers {
        let width = 1i64 << (layers - layer);
        let ty = range(-width, width);
        method
            .add_definition(Definition::concrete(
                types::tuple_type_fixed(vec![ty.clone()]),
                handler(ty),
            ))
            .unwrap();
    }
    method
}

fn wide_method(cases: usize) -> std::sync::Arc<Method> {
    let method = Method::new(atom::fresh_atom("bench_")).unwrap();
    for case in 0..cases {
        let base = case as i64 * 100;
        let ty = range(base, base + 99);
        method
            .add_definition(Definition::concrete(
                types::tuple_type_fixed(vec![ty.clone()]),
                handler(ty),
            ))
            .unwrap();
    }
    method
}

fn bench_lookup(criterion: &mut Criterion) {
    let layered = layered_method(8);
    let args = [scalar::integer(1)];
    // Warm the tree so the steady state is measured.
    layered.lookup_by_values(&args).unwrap();
    criterion.bench_function("layered ranges, most specific wins", |bencher| {
        bencher.iter(|| layered.lookup_by_values(black_box(&args)).unwrap())
    });

    let wide = wide_method(64);
    let probe = [scalar::integer(3_250)];
    wide.lookup_by_values(&probe).unwrap();
    criterion.bench_function("wide disjoint ranges", |bencher| {
        bencher.iter(|| wide.lookup_by_values(black_box(&probe)).unwrap())
    });

    let by_type = [types::single_int(3_250)];
    criterion.bench_function("wide disjoint ranges, by types", |bencher| {
        bencher.iter(|| wide.lookup_by_types(black_box(&by_type)).unwrap())
    });
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
