use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use amf3::Value;

fn write_to_vec_new(value: &Value) {
    let mut buf = Vec::new();
    value.write_to(&mut buf).unwrap();
}

fn write_to_vec_with_capacity(value: &Value, hint: usize) {
    let mut buf = Vec::with_capacity(hint);
    value.write_to(&mut buf).unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocations");

    let boolean = Value::Bool(false);
    let string = Value::String("Hello!".to_string());
    let number = Value::Double(10.0);
    let date = Value::date(0.0);
    let array = Value::dense_array(vec![
        Value::Integer(20),
        Value::String("Hello!".to_string()),
        Value::Bool(true),
        Value::date(0.0),
    ]);

    let names = ["boolean", "string", "number", "date", "array"];
    for (x, i) in [boolean, string, number, date, array].iter().enumerate() {
        group.bench_with_input(BenchmarkId::new(names[x], "vec_new"), i, |b, i| {
            b.iter(|| write_to_vec_new(i))
        });
        group.bench_with_input(
            BenchmarkId::new(names[x], "vec_with_capacity"),
            i,
            |b, i| b.iter(|| write_to_vec_with_capacity(i, 64)),
        );
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
