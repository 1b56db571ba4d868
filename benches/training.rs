use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polars::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use regression_workbench::automl::{run_automl, AutoMlParams};
use regression_workbench::config::WorkbenchConfig;
use regression_workbench::trainer::{train_model, TrainParams};

fn create_regression_data(n_rows: usize, n_features: usize) -> DataFrame {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let features: Vec<Vec<f64>> = (0..n_features)
        .map(|_| (0..n_rows).map(|_| rng.gen::<f64>() * 10.0).collect())
        .collect();

    // Target is the sum of features plus noise
    let target: Vec<f64> = (0..n_rows)
        .map(|i| features.iter().map(|f| f[i]).sum::<f64>() + rng.gen::<f64>() * 0.1)
        .collect();

    let mut columns: Vec<Column> = features
        .into_iter()
        .enumerate()
        .map(|(i, values)| Column::new(format!("feature_{}", i).into(), values))
        .collect();
    columns.push(Column::new("target".into(), target));

    DataFrame::new(columns).unwrap()
}

fn bench_direct_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("direct_training");
    group.sample_size(10);
    let config = WorkbenchConfig::default();

    for model in ["LinearRegression", "RandomForest", "GradientBoosting"] {
        for n_rows in [1000, 5000] {
            let df = create_regression_data(n_rows, 10);
            let params = TrainParams {
                model_type: model.to_string(),
                target_columns: vec!["target".to_string()],
                ..Default::default()
            };
            group.bench_with_input(BenchmarkId::new(model, n_rows), &df, |b, df| {
                b.iter(|| train_model(black_box(df), &params, &config).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_automl(c: &mut Criterion) {
    let mut group = c.benchmark_group("automl");
    group.sample_size(10);
    let config = WorkbenchConfig::default();
    let df = create_regression_data(2000, 8);

    for method in ["grid", "random"] {
        let params = AutoMlParams {
            target_columns: vec!["target".to_string()],
            search_method: method.to_string(),
            models: Some(vec!["LinearRegression".into(), "RandomForest".into(), "XGBoost".into()]),
            ..Default::default()
        };
        group.bench_function(BenchmarkId::new("fast", method), |b| {
            b.iter(|| run_automl(black_box(&df), None, &params, &config).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_direct_training, bench_automl);
criterion_main!(benches);
