use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Map};
use smr_python::compile_function;
use smr_runner::InvocationExecutor;

const QUEENS: &str = r#"
def queens(n):
    def place(row, cols, diag, anti):
        if row == n:
            return 1
        count = 0
        for col in range(n):
            if col in cols or row + col in diag or row - col in anti:
                continue
            cols.append(col)
            diag.append(row + col)
            anti.append(row - col)
            count += place(row + 1, cols, diag, anti)
            cols.pop()
            diag.pop()
            anti.pop()
        return count
    return place(0, [], [], [])
"#;

fn bench_invocation(c: &mut Criterion) {
    let descriptor = compile_function(QUEENS, "queens.py", "queens").expect("compile");
    let record = descriptor.to_record(true);
    let executor = InvocationExecutor::default();
    let args = [json!(8)];
    let kwargs = Map::new();

    c.bench_function("invoke queens(8)", |b| {
        b.iter(|| executor.invoke(black_box(&descriptor), &args, &kwargs))
    });
    c.bench_function("run_record queens(6)", |b| {
        b.iter(|| executor.run_record(black_box(&record), &[json!(6)], &kwargs, None))
    });
}

criterion_group!(benches, bench_invocation);
criterion_main!(benches);
