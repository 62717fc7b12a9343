//! VM performance benchmarks for calls, strings, method dispatch and GC.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::io;

use loxide::config::RuntimeConfig;
use loxide::vm::VM;

/// Compile and run `source` in a fresh VM, discarding program output
fn run_lox(source: &str, config: RuntimeConfig) {
    let mut vm = VM::with_config_and_output(config, Box::new(io::sink()));
    vm.interpret(black_box(source))
        .unwrap_or_else(|e| panic!("benchmark should succeed: {}", e));
}

/// Fibonacci benchmark - tests recursive function calls
fn fibonacci_source(n: u32) -> String {
    format!(
        r#"
fun fib(n) {{
  if (n < 2) return n;
  return fib(n - 1) + fib(n - 2);
}}
print fib({});
"#,
        n
    )
}

/// String building - tests concatenation and interning
fn string_concat_source(n: u32) -> String {
    format!(
        r#"
var s = "";
for (var i = 0; i < {}; i = i + 1) {{
  s = s + "ab";
}}
print s == s;
"#,
        n
    )
}

/// Method calls - tests OP_INVOKE and field access
fn method_call_source(n: u32) -> String {
    format!(
        r#"
class Counter {{
  init() {{ this.count = 0; }}
  bump() {{ this.count = this.count + 1; return this; }}
}}
var c = Counter();
for (var i = 0; i < {}; i = i + 1) {{
  c.bump();
}}
print c.count;
"#,
        n
    )
}

/// Closures - tests upvalue capture and closing
fn closure_source(n: u32) -> String {
    format!(
        r#"
fun adder(x) {{
  fun add(y) {{ return x + y; }}
  return add;
}}
var total = 0;
for (var i = 0; i < {}; i = i + 1) {{
  total = adder(i)(total);
}}
print total;
"#,
        n
    )
}

fn bench_fibonacci(c: &mut Criterion) {
    let mut group = c.benchmark_group("fibonacci");
    for n in [15, 20] {
        let source = fibonacci_source(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| run_lox(source, RuntimeConfig::default()))
        });
    }
    group.finish();
}

fn bench_strings(c: &mut Criterion) {
    let source = string_concat_source(500);
    c.bench_function("string_concat", |b| {
        b.iter(|| run_lox(&source, RuntimeConfig::default()))
    });
}

fn bench_methods(c: &mut Criterion) {
    let source = method_call_source(10_000);
    c.bench_function("method_calls", |b| {
        b.iter(|| run_lox(&source, RuntimeConfig::default()))
    });
}

fn bench_closures(c: &mut Criterion) {
    let mut group = c.benchmark_group("closures");
    let source = closure_source(2_000);
    group.bench_function("default_gc", |b| {
        b.iter(|| run_lox(&source, RuntimeConfig::default()))
    });
    group.bench_function("stress_gc", |b| {
        b.iter(|| {
            run_lox(
                &source,
                RuntimeConfig {
                    stress_gc: true,
                    ..RuntimeConfig::default()
                },
            )
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_fibonacci,
    bench_strings,
    bench_methods,
    bench_closures
);
criterion_main!(benches);
