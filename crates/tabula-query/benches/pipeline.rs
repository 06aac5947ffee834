use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tabula_columnar::{ColumnSchema, ColumnType, TableBuilder};
use tabula_query::{rolling, Frame, JoinOn, JoinOptions, JoinValues, Value, View};

fn bench_rows() -> usize {
    std::env::var("TABULA_PIPELINE_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (10_000..=5_000_000).contains(&v))
        .unwrap_or(200_000)
}

fn build_fact(rows: usize, keys: usize) -> View {
    let mut builder = TableBuilder::new(vec![
        ColumnSchema::new("key", ColumnType::Number),
        ColumnSchema::new("bucket", ColumnType::String),
        ColumnSchema::new("amount", ColumnType::Number),
    ]);
    for i in 0..rows {
        builder.append_row(&[
            Value::Number((i % keys) as f64),
            Value::from(format!("b{}", i % 10)),
            Value::Number((i % 100) as f64),
        ]);
    }
    View::new(builder.finalize().unwrap())
}

fn build_dim(keys: usize) -> View {
    let mut builder = TableBuilder::new(vec![
        ColumnSchema::new("key", ColumnType::Number),
        ColumnSchema::new("weight", ColumnType::Number),
    ]);
    for key in 0..keys {
        builder.append_row(&[Value::Number(key as f64), Value::Number((key % 7) as f64)]);
    }
    View::new(builder.finalize().unwrap())
}

fn bench_pipeline(c: &mut Criterion) {
    let rows = bench_rows();
    let keys = 1_000usize;
    let fact = build_fact(rows, keys);
    let dim = build_dim(keys);

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(rows as u64));

    group.bench_with_input(BenchmarkId::new("filter_dictionary_eq", rows), &rows, |b, _| {
        b.iter(|| {
            let out = fact.filter("d.bucket == 'b3' && d.amount > 10").unwrap();
            black_box(out.num_rows());
        })
    });

    group.bench_with_input(BenchmarkId::new("groupby_rollup", rows), &rows, |b, _| {
        b.iter(|| {
            let out = fact
                .groupby(&["bucket"])
                .unwrap()
                .rollup([("n", "count()"), ("total", "sum(d.amount)"), ("sd", "stdev(d.amount)")])
                .unwrap();
            black_box(out.num_rows());
        })
    });

    group.bench_with_input(BenchmarkId::new("rolling_mean", rows), &rows, |b, _| {
        let ordered = fact.orderby(["d.key"]).unwrap();
        b.iter(|| {
            let out = ordered
                .derive([("avg", rolling("mean(d.amount)", Frame::new(Some(-50), Some(0)), false))])
                .unwrap();
            black_box(out.num_rows());
        })
    });

    group.bench_with_input(BenchmarkId::new("hash_join", rows), &rows, |b, _| {
        b.iter(|| {
            let out = fact
                .join(&dim, JoinOn::columns(&["key"]), JoinValues::Auto, JoinOptions::inner())
                .unwrap();
            black_box(out.num_rows());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
