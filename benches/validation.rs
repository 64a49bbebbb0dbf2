use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fs;
use watlite::wat::{self, builder, sexpr, validate, Opcode};

fn load_fixture(name: &str) -> String {
    let path = format!("tests/fixtures/{}.wat", name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e))
}

/// A function summing `terms` squared locals, written fully folded.
fn long_folded_body(terms: usize) -> String {
    let mut body = "(local.get $x)".to_string();
    for _ in 0..terms {
        body = format!("(f64.add {} (f64.mul (local.get $x) (local.get $x)))", body);
    }
    format!("(func $long (param $x f64) (result f64)\n  {})", body)
}

/// The same kind of function, nested instead of chained.
fn deep_folded_body(depth: usize) -> String {
    format!(
        "(func $deep (param $x f64) (result f64)\n  {}(local.get $x){})",
        "(f64.neg ".repeat(depth),
        ")".repeat(depth)
    )
}

fn count_calls(module: &wat::Module) -> usize {
    module
        .functions
        .iter()
        .flat_map(|f| &f.body)
        .filter(|i| i.opcode == Opcode::Call)
        .count()
}

fn benchmark_validation(c: &mut Criterion) {
    let test_cases = vec![
        ("fixture_complex", load_fixture("complex")),
        ("long_body", long_folded_body(2_000)),
        ("deep_body", deep_folded_body(10_000)),
    ];

    // First, analyze what we're testing
    println!("\nModule analysis:");
    for (name, source) in &test_cases {
        let module = wat::parse(source).unwrap();
        let instructions: usize = module.functions.iter().map(|f| f.body.len()).sum();
        println!(
            "{}: {} functions, {} instructions, {} calls",
            name,
            module.functions.len(),
            instructions,
            count_calls(&module)
        );
    }

    let mut group = c.benchmark_group("read");
    for (name, source) in &test_cases {
        group.bench_function(format!("{}_{}kb", name, source.len() / 1024), |b| {
            b.iter(|| black_box(sexpr::read_all(source).expect("Failed to read")));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("validate");
    for (name, source) in &test_cases {
        let module = builder::build(&sexpr::read_all(source).unwrap()).unwrap();
        group.bench_function(*name, |b| {
            b.iter(|| validate::validate(black_box(&module)).expect("Failed to validate"));
        });
    }
    group.finish();

    // Full pipeline
    let mut group = c.benchmark_group("full_parse_validate");
    for (name, source) in &test_cases {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(wat::parse(source).expect("Failed to parse module")));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_validation);
criterion_main!(benches);
