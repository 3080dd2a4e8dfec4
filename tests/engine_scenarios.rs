//! End-to-end scenarios over the full engine

use std::sync::Arc;

use ndarray::Array2;
use parking_lot::RwLock;

use relprop::containers::{DataFrame, Encoding, FloatColumn, IntColumn};
use relprop::data_model::{Placeholder, Relationship};
use relprop::error::Result;
use relprop::fastprop::{Aggregation, DataUsed, Hyperparameters};
use relprop::pipeline::{EngineState, Pipeline, Predictor, PredictorFactory};
use relprop::preprocessing::{CategoryTrimmer, Params, Preprocessor, Seasonal};
use relprop::transpilation::HumanReadableSql;

/// A minimal predictor: predicts the target mean and reports uniform
/// feature importances. Stands in for the external predictor impls.
struct MeanPredictor {
    mean: f64,
    num_features: usize,
}

impl MeanPredictor {
    fn new() -> Self {
        Self {
            mean: 0.0,
            num_features: 0,
        }
    }
}

impl Predictor for MeanPredictor {
    fn marker(&self) -> &'static str {
        "MeanPredictor"
    }

    fn fit(&mut self, features: &Array2<f64>, target: &[f64]) -> Result<()> {
        self.num_features = features.ncols();
        let finite: Vec<f64> = target.iter().copied().filter(|v| !v.is_nan()).collect();
        self.mean = if finite.is_empty() {
            0.0
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        Ok(vec![self.mean; features.nrows()])
    }

    fn feature_importances(&self) -> Vec<f64> {
        if self.num_features == 0 {
            return Vec::new();
        }
        vec![1.0 / self.num_features as f64; self.num_features]
    }
}

fn mean_predictor_factory() -> PredictorFactory {
    Arc::new(|| Box::new(MeanPredictor::new()))
}

fn single_join_frames(peripheral_rows: &[(i64, f64, f64)]) -> (DataFrame, Vec<DataFrame>) {
    let mut population = DataFrame::new("p");
    population.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
    population
        .add_time_stamp(FloatColumn::new("ts", vec![100.0, 200.0]))
        .unwrap();
    population
        .add_target(FloatColumn::new("y", vec![0.0, 0.0]))
        .unwrap();

    let mut q = DataFrame::new("q");
    q.add_join_key(IntColumn::new(
        "id",
        peripheral_rows.iter().map(|r| r.0).collect(),
    ))
    .unwrap();
    q.add_time_stamp(FloatColumn::new(
        "ts",
        peripheral_rows.iter().map(|r| r.1).collect(),
    ))
    .unwrap();
    q.add_numerical(FloatColumn::new(
        "x",
        peripheral_rows.iter().map(|r| r.2).collect(),
    ))
    .unwrap();

    (population, vec![q])
}

fn single_join_pipeline(name: &str) -> Pipeline {
    let data_model = Placeholder::new("p").join(
        Placeholder::new("q"),
        "id",
        "",
        "ts",
        "",
        "",
        Relationship::ManyToMany,
        0.0,
        0.0,
        false,
    );
    Pipeline::new(name, data_model, vec!["q".to_string()])
}

#[test]
fn scenario_single_join_numerical_sum() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    let (population, peripheral) =
        single_join_frames(&[(1, 90.0, 1.0), (1, 80.0, 2.0), (2, 180.0, 4.0), (2, 250.0, 8.0)]);

    let fitted = single_join_pipeline("sum_pipeline")
        .fit(&state, &population, &peripheral, None)
        .unwrap();

    let report = fitted
        .transform(&state, &population, &peripheral, false, None)
        .unwrap();

    let features = fitted.feature_learner.fast_prop().features();
    let sum_ix = features
        .iter()
        .position(|f| {
            f.aggregation == Aggregation::Sum
                && f.data_used == DataUsed::Numerical
                && f.conditions.is_empty()
        })
        .expect("a plain SUM feature must be selected");

    // The row at ts = 250 lies after the population row's ts = 200.
    assert_eq!(report.features[[0, sum_ix]], 3.0);
    assert_eq!(report.features[[1, sum_ix]], 4.0);
}

#[test]
fn scenario_count_on_no_match() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    let (population, peripheral) = single_join_frames(&[(1, 90.0, 1.0), (1, 80.0, 2.0)]);

    let fitted = single_join_pipeline("count_pipeline")
        .fit(&state, &population, &peripheral, None)
        .unwrap();

    let report = fitted
        .transform(&state, &population, &peripheral, false, None)
        .unwrap();

    let features = fitted.feature_learner.fast_prop().features();
    let count_ix = features
        .iter()
        .position(|f| f.aggregation == Aggregation::Count)
        .expect("a COUNT feature must be selected");

    assert_eq!(report.features[[0, count_ix]], 2.0);
    assert_eq!(report.features[[1, count_ix]], 0.0);
}

#[test]
fn scenario_category_trimmer() {
    let categories = Arc::new(RwLock::new(Encoding::new()));
    let ids = {
        let mut enc = categories.write();
        vec![enc.insert("a"), enc.insert("a"), enc.insert("b"), enc.insert("c")]
    };

    let mut frame = DataFrame::new("t");
    frame.add_categorical(IntColumn::new("c", ids)).unwrap();

    let mut trimmer = CategoryTrimmer::new(1, 1);
    let result = trimmer
        .fit_transform(&Params {
            population: &frame,
            peripheral: &[],
            categories: &categories,
        })
        .unwrap();

    let enc = categories.read();
    let col = result.population.categorical(0);
    let values: Vec<&str> = col.iter().map(|&id| enc.string(id)).collect();
    assert_eq!(values, vec!["a", "a", "(trimmed)", "(trimmed)"]);
}

#[test]
fn scenario_seasonal_month_extraction() {
    let categories = Arc::new(RwLock::new(Encoding::new()));

    // 2020-01-15 and 2020-02-20, both midnight UTC.
    let mut frame = DataFrame::new("t");
    frame
        .add_time_stamp(FloatColumn::new("ts", vec![1579046400.0, 1582156800.0]))
        .unwrap();

    let mut seasonal = Seasonal::new();
    let result = seasonal
        .fit_transform(&Params {
            population: &frame,
            peripheral: &[],
            categories: &categories,
        })
        .unwrap();

    let month_col = result
        .population
        .to_schema()
        .categoricals
        .iter()
        .position(|name| name.contains("month"))
        .map(|ix| result.population.categorical(ix).clone())
        .expect("month column must be derived");

    let enc = categories.read();
    let values: Vec<&str> = month_col.iter().map(|&id| enc.string(id)).collect();
    assert_eq!(values, vec!["01", "02"]);
    drop(enc);

    // Identical months on every row produce a warning instead of a column.
    let mut constant = DataFrame::new("t");
    constant
        .add_time_stamp(FloatColumn::new("ts", vec![1579046400.0, 1579132800.0]))
        .unwrap();
    let mut seasonal = Seasonal::new();
    let result = seasonal
        .fit_transform(&Params {
            population: &constant,
            peripheral: &[],
            categories: &categories,
        })
        .unwrap();
    assert!(!result
        .population
        .to_schema()
        .categoricals
        .iter()
        .any(|name| name.contains("month")));
    assert!(result.warnings.iter().any(|w| w.message.contains("month")));
}

fn three_level_frames() -> (DataFrame, Vec<DataFrame>) {
    let mut a = DataFrame::new("a");
    a.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
    a.add_time_stamp(FloatColumn::new("ts", vec![100.0, 200.0])).unwrap();
    a.add_target(FloatColumn::new("y", vec![1.0, 2.0])).unwrap();

    let mut b = DataFrame::new("b");
    b.add_join_key(IntColumn::new("id", vec![1, 1, 2])).unwrap();
    b.add_join_key(IntColumn::new("b_id", vec![10, 11, 12])).unwrap();
    b.add_time_stamp(FloatColumn::new("ts", vec![90.0, 80.0, 180.0])).unwrap();
    b.add_numerical(FloatColumn::new("x", vec![1.0, 2.0, 3.0])).unwrap();

    let mut c = DataFrame::new("c");
    c.add_join_key(IntColumn::new("b_id", vec![10, 10, 11, 12])).unwrap();
    c.add_time_stamp(FloatColumn::new("ts", vec![85.0, 70.0, 75.0, 170.0])).unwrap();
    c.add_numerical(FloatColumn::new("z", vec![5.0, 6.0, 7.0, 8.0])).unwrap();

    (a, vec![b, c])
}

fn three_level_pipeline() -> Pipeline {
    let c = Placeholder::new("c");
    let b = Placeholder::new("b").join(
        c,
        "b_id",
        "",
        "ts",
        "",
        "",
        Relationship::ManyToMany,
        0.0,
        0.0,
        false,
    );
    let a = Placeholder::new("a").join(
        b,
        "id",
        "",
        "ts",
        "",
        "",
        Relationship::ManyToMany,
        0.0,
        0.0,
        false,
    );
    Pipeline::new("three_level", a, vec!["b".to_string(), "c".to_string()])
}

#[test]
fn scenario_subfeature_recursion() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    let (population, peripheral) = three_level_frames();

    let fitted = three_level_pipeline()
        .fit(&state, &population, &peripheral, Some(mean_predictor_factory()))
        .unwrap();

    // The learner recursed: some selected feature consumes subfeatures.
    let features = fitted.feature_learner.fast_prop().features();
    assert!(
        features.iter().any(|f| f.data_used == DataUsed::Subfeatures),
        "expected subfeature-consuming features"
    );

    // The full script stages every table and mentions the staging tables
    // of both nested tables in the feature statements.
    let sql = fitted.to_sql(&state, &HumanReadableSql, None).join("\n");
    assert!(sql.contains("A__STAGING_TABLE_1"));
    assert!(sql.contains("B__STAGING_TABLE"));
    assert!(sql.contains("C__STAGING_TABLE"));
    assert!(sql.contains("CREATE TABLE \"FEATURE_1\""));

    // Importances are conserved: the columns receive exactly the mass the
    // features carried, which is normalized to one.
    let importances = fitted.column_importances();
    assert!((importances.total() - 1.0).abs() < 1e-9);
}

#[test]
fn scenario_fingerprint_cache_hit() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    let (population, peripheral) =
        single_join_frames(&[(1, 90.0, 1.0), (1, 80.0, 2.0), (2, 180.0, 4.0)]);

    let fitted = single_join_pipeline("cache_pipeline")
        .fit(&state, &population, &peripheral, None)
        .unwrap();

    let first = fitted
        .transform(&state, &population, &peripheral, false, None)
        .unwrap();
    let second = fitted
        .transform(&state, &population, &peripheral, false, None)
        .unwrap();

    assert!(!first.retrieved_from_cache);
    assert!(second.retrieved_from_cache);
    assert_eq!(first.features, second.features);
}

#[test]
fn determinism_of_fit_and_transform() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    let (population, peripheral) =
        single_join_frames(&[(1, 90.0, 1.0), (1, 80.0, 2.0), (2, 180.0, 4.0), (2, 250.0, 8.0)]);

    let run = |name: &str| {
        let fitted = single_join_pipeline(name)
            .fit(&state, &population, &peripheral, None)
            .unwrap();
        let report = fitted
            .transform(&state, &population, &peripheral, false, None)
            .unwrap();
        (
            fitted.feature_learner.fast_prop().features().to_vec(),
            report.features,
        )
    };

    let (features_a, matrix_a) = run("det_a");
    let (features_b, matrix_b) = run("det_b");
    assert_eq!(features_a, features_b);
    assert_eq!(matrix_a, matrix_b);
}

#[test]
fn feature_bound_is_honored() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    let (_, peripheral) =
        single_join_frames(&[(1, 90.0, 1.0), (1, 80.0, 2.0), (2, 180.0, 4.0)]);

    // A non-constant target so the R² selection has signal to rank on.
    let population = {
        let mut df = DataFrame::new("p");
        df.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
        df.add_time_stamp(FloatColumn::new("ts", vec![100.0, 200.0])).unwrap();
        df.add_target(FloatColumn::new("y", vec![1.0, 4.0])).unwrap();
        df
    };

    let mut hyperparameters = Hyperparameters::default();
    hyperparameters.num_features = 3;
    hyperparameters.n_most_frequent = 2;

    let data_model = Placeholder::new("p").join(
        Placeholder::new("q"),
        "id",
        "",
        "ts",
        "",
        "",
        Relationship::ManyToMany,
        0.0,
        0.0,
        false,
    );
    let fitted = Pipeline::new("bounded", data_model, vec!["q".to_string()])
        .with_hyperparameters(hyperparameters)
        .fit(&state, &population, &peripheral, None)
        .unwrap();

    assert!(fitted.num_features() <= 3);
    assert!(fitted.num_features() > 0);
}

#[test]
fn aggregation_null_safety() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    // Row 2 of the population has no matches at all.
    let (population, peripheral) = single_join_frames(&[(1, 90.0, 1.0), (1, 80.0, 2.0)]);

    let fitted = single_join_pipeline("null_safety")
        .fit(&state, &population, &peripheral, None)
        .unwrap();
    let report = fitted
        .transform(&state, &population, &peripheral, false, None)
        .unwrap();

    for value in report.features.iter() {
        assert!(value.is_finite(), "feature matrix must not contain NaN/Inf");
    }
}

#[test]
fn scoring_updates_history() {
    let state = EngineState::init("/tmp/relprop_test", "/tmp");
    let (population, peripheral) =
        single_join_frames(&[(1, 90.0, 1.0), (1, 80.0, 2.0), (2, 180.0, 4.0)]);

    let fitted = single_join_pipeline("scored")
        .fit(&state, &population, &peripheral, Some(mean_predictor_factory()))
        .unwrap();

    fitted
        .transform(&state, &population, &peripheral, true, Some("p"))
        .unwrap();

    let scores = fitted.scores();
    assert_eq!(scores.len(), 1);
    let latest = scores.latest().unwrap();
    assert_eq!(latest.set_used, "p");
    assert_eq!(latest.regression.len(), 1);
    assert!(latest.regression[0].mae.is_finite());
}
