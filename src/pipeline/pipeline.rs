//! Fitting and transforming pipelines

use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::containers::DataFrame;
use crate::data_model::Placeholder;
use crate::dependency::{warnings_fingerprint, Fingerprint, Warning};
use crate::error::{RelpropError, Result};
use crate::fastprop::{FastPropContainer, Hyperparameters, LossFunction};
use crate::metrics::{ClassificationSummary, RegressionSummary, ScoreSet};
use crate::pipeline::engine::EngineState;
use crate::pipeline::fitted::{Fingerprints, FittedPipeline, TransformReport};
use crate::pipeline::predictor::PredictorFactory;
use crate::pipeline::staging::stage;
use crate::preprocessing::{Params, PreprocessorImpl};

/// An unfitted pipeline: the data model, the preprocessor templates and
/// the feature-learner hyperparameters.
///
/// `fit` produces a [`FittedPipeline`] and registers it in the engine
/// state under the pipeline's name, replacing any previous fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    name: String,
    data_model: Placeholder,
    peripheral_names: Vec<String>,
    preprocessors: Vec<PreprocessorImpl>,
    hyperparameters: Hyperparameters,
}

impl Pipeline {
    pub fn new(name: &str, data_model: Placeholder, peripheral_names: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            data_model,
            peripheral_names,
            preprocessors: Vec::new(),
            hyperparameters: Hyperparameters::default(),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: PreprocessorImpl) -> Self {
        self.preprocessors.push(preprocessor);
        self
    }

    pub fn with_hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates the data model against the declared peripheral tables
    /// without fitting anything.
    pub fn check(&self, population: &DataFrame, peripheral: &[DataFrame]) -> Result<()> {
        self.hyperparameters.check()?;
        self.data_model.check(&self.peripheral_names)?;
        // A dry staging run surfaces missing columns as structured errors.
        stage(&self.data_model, population, peripheral, &self.peripheral_names)?;
        Ok(())
    }

    /// Runs the full fit: stage, preprocess, learn features, select, train
    /// predictors. The result replaces any pipeline of the same name.
    pub fn fit(
        &self,
        state: &EngineState,
        population: &DataFrame,
        peripheral: &[DataFrame],
        predictor_factory: Option<PredictorFactory>,
    ) -> Result<Arc<FittedPipeline>> {
        self.hyperparameters.check()?;
        self.data_model.check(&self.peripheral_names)?;

        let mut fingerprints = Fingerprints::default();

        // Stage.
        let staging_fp = state
            .df_tracker
            .make_build_history(&[], population, peripheral);
        fingerprints.staging = Some(staging_fp.clone());

        let (mut staged_population, mut staged_peripheral) = stage(
            &self.data_model,
            population,
            peripheral,
            &self.peripheral_names,
        )?;

        // Preprocess.
        let mut fitted_preprocessors = self.preprocessors.clone();
        let mut warnings: Vec<Warning> = Vec::new();
        let mut dependencies = vec![staging_fp];

        for preprocessor in fitted_preprocessors.iter_mut() {
            let transformed = preprocessor.fit_transform(&Params {
                population: &staged_population,
                peripheral: &staged_peripheral,
                categories: &state.categories,
            })?;
            staged_population = transformed.population;
            staged_peripheral = transformed.peripheral;
            warnings.extend(transformed.warnings);

            let fp = preprocessor.fingerprint(dependencies.clone());
            dependencies.push(fp.clone());
            fingerprints.preprocessors.push(fp);
        }

        // Frames are frozen from here on; feature generation only reads.
        staged_population.freeze();
        for df in staged_peripheral.iter_mut() {
            df.freeze();
        }

        // Peripheral tables created by preprocessors (text-field splits)
        // extend the table universe the feature learner may join against.
        let mut learner_peripheral_names = self.peripheral_names.clone();
        for df in &staged_peripheral {
            if !learner_peripheral_names.iter().any(|n| n == df.name()) {
                learner_peripheral_names.push(df.name().to_string());
            }
        }

        // Register the preprocessed population so a repeated fit on
        // unchanged inputs can be recognized downstream.
        let preprocessed_name = format!("{}__preprocessed", self.name);
        let mut registered = staged_population.clone_as(&preprocessed_name);
        registered.freeze();
        state.set_data_frame(registered.clone());
        let preprocessed_history = state
            .df_tracker
            .make_build_history(&dependencies, population, peripheral);
        state.df_tracker.add(&registered, &preprocessed_history);

        // Learn features.
        let learner_placeholder = self.data_model.without_flattened();
        let mut feature_learner = FastPropContainer::new(
            Arc::new(self.hyperparameters.clone()),
            Arc::new(learner_peripheral_names),
            Arc::new(learner_placeholder),
        )?;
        feature_learner.fit(&staged_population, &staged_peripheral)?;

        let learner_fp = Fingerprint::FeatureLearner {
            marker: "FastProp".to_string(),
            params: serde_json::to_value(&self.hyperparameters)?,
            dependencies: dependencies.clone(),
        };
        dependencies.push(learner_fp.clone());
        fingerprints.feature_learner = Some(learner_fp);

        if !self.hyperparameters.silent {
            info!(
                "Pipeline '{}': selected {} features.",
                self.name,
                feature_learner.num_features()
            );
        }

        // Train predictors.
        let features = feature_learner.transform(&staged_population, &staged_peripheral)?;
        let mut predictors = Vec::new();
        if let Some(factory) = predictor_factory {
            for target_num in 0..staged_population.num_targets() {
                let target = staged_population.target(target_num).as_slice().to_vec();
                let mut predictor = factory();
                predictor.fit(&features, &target)?;

                fingerprints.predictors.push(Fingerprint::Predictor {
                    marker: predictor.marker().to_string(),
                    params: predictor.params_json(),
                    target_num,
                    dependencies: dependencies.clone(),
                });
                predictors.push(predictor);
            }
        }

        // Track warnings so a cache-hit refit can replay them.
        state.warning_tracker.add(
            &warnings_fingerprint(dependencies),
            Arc::new(warnings.clone()),
        );

        let targets = staged_population.to_schema().targets;
        let fitted = Arc::new(FittedPipeline::new(
            self.name.clone(),
            self.data_model.clone(),
            self.peripheral_names.clone(),
            staged_population.to_schema(),
            staged_peripheral.iter().map(|df| df.to_schema()).collect(),
            fitted_preprocessors,
            feature_learner,
            fingerprints,
            warnings,
            targets,
            predictors,
        ));

        state
            .pipelines
            .write()
            .insert(self.name.clone(), fitted.clone());

        Ok(fitted)
    }
}

impl FittedPipeline {
    /// Repeats stage, preprocess and FastProp transform on new frames.
    /// With `predict`, the per-target predictors run on the feature matrix;
    /// with `score_set`, metrics are computed against the population's
    /// targets and appended to the score history.
    pub fn transform(
        &self,
        state: &EngineState,
        population: &DataFrame,
        peripheral: &[DataFrame],
        predict: bool,
        score_set: Option<&str>,
    ) -> Result<TransformReport> {
        let (mut staged_population, mut staged_peripheral) = stage(
            &self.data_model,
            population,
            peripheral,
            &self.peripheral_names,
        )?;

        for preprocessor in &self.preprocessors {
            let transformed = preprocessor.transform(&Params {
                population: &staged_population,
                peripheral: &staged_peripheral,
                categories: &state.categories,
            })?;
            staged_population = transformed.population;
            staged_peripheral = transformed.peripheral;
        }

        // The feature matrix is cached under the learner fingerprint plus
        // the exact input frames; any mutation of an input frame changes
        // its last_change and misses.
        let learner_fp = self
            .fingerprints
            .feature_learner
            .clone()
            .ok_or_else(|| RelpropError::NotFitted(self.name.clone()))?;
        let mut dependencies = vec![learner_fp];
        dependencies.push(Fingerprint::DataFrame {
            name: population.name().to_string(),
            last_change: population.last_change(),
        });
        for df in peripheral {
            dependencies.push(Fingerprint::DataFrame {
                name: df.name().to_string(),
                last_change: df.last_change(),
            });
        }
        let cache_fp = Fingerprint::Staging { dependencies };

        let cached = state.feature_cache.retrieve(&cache_fp);
        let retrieved_from_cache = cached.is_some();

        let features: Array2<f64> = match cached {
            Some(matrix) => (*matrix).clone(),
            None => {
                let matrix = self
                    .feature_learner
                    .transform(&staged_population, &staged_peripheral)?;
                state.feature_cache.add(&cache_fp, Arc::new(matrix.clone()));
                matrix
            }
        };

        let mut predictions = Vec::new();
        if predict || score_set.is_some() {
            for predictor in &self.predictors {
                predictions.push(predictor.predict(&features)?);
            }
        }

        if let Some(set_used) = score_set {
            self.score(&staged_population, &predictions, set_used)?;
        }

        Ok(TransformReport {
            features,
            predictions,
            retrieved_from_cache,
        })
    }

    /// The complete SQL script: staging DDL, preprocessor effects, then one
    /// `CREATE TABLE` per feature. `size_threshold` stubs out oversized
    /// feature statements.
    pub fn to_sql(
        &self,
        state: &EngineState,
        dialect: &dyn crate::transpilation::SqlDialect,
        size_threshold: Option<usize>,
    ) -> Vec<String> {
        let categories = state.categories.read();

        let mut sql = dialect.make_staging_tables(&self.population_schema, &self.peripheral_schemas);

        for preprocessor in &self.preprocessors {
            sql.extend(preprocessor.to_sql(&categories, dialect));
        }

        sql.extend(self.feature_learner.to_sql(&categories, dialect, size_threshold));
        sql
    }

    fn score(
        &self,
        population: &DataFrame,
        predictions: &[Vec<f64>],
        set_used: &str,
    ) -> Result<()> {
        if predictions.len() != population.num_targets() {
            return Err(RelpropError::Consistency(format!(
                "Pipeline '{}' has {} predictors, but the population table has {} targets.",
                self.name,
                predictions.len(),
                population.num_targets()
            )));
        }

        let is_classification = self
            .feature_learner
            .fast_prop()
            .hyperparameters()
            .loss_function
            == LossFunction::CrossEntropyLoss;

        let mut regression = Vec::new();
        let mut classification = Vec::new();

        for (target_num, predicted) in predictions.iter().enumerate() {
            let truth = population.target(target_num).as_slice();
            regression.push(RegressionSummary::calculate(predicted, truth));
            if is_classification {
                classification.push(ClassificationSummary::calculate(predicted, truth));
            }
        }

        self.push_scores(ScoreSet {
            set_used: set_used.to_string(),
            regression,
            classification,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{FloatColumn, IntColumn};
    use crate::data_model::Relationship;

    fn frames() -> (DataFrame, Vec<DataFrame>) {
        let mut population = DataFrame::new("population");
        population.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
        population
            .add_time_stamp(FloatColumn::new("ts", vec![100.0, 200.0]))
            .unwrap();
        population
            .add_target(FloatColumn::new("y", vec![3.0, 4.0]))
            .unwrap();

        let mut orders = DataFrame::new("orders");
        orders.add_join_key(IntColumn::new("id", vec![1, 1, 2, 2])).unwrap();
        orders
            .add_time_stamp(FloatColumn::new("ts", vec![90.0, 80.0, 180.0, 250.0]))
            .unwrap();
        orders
            .add_numerical(FloatColumn::new("x", vec![1.0, 2.0, 4.0, 8.0]))
            .unwrap();

        (population, vec![orders])
    }

    fn pipeline() -> Pipeline {
        let data_model = Placeholder::new("population").join(
            Placeholder::new("orders"),
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
        Pipeline::new("p1", data_model, vec!["orders".to_string()])
    }

    #[test]
    fn test_fit_registers_pipeline() {
        let state = EngineState::init("/tmp/project", "/tmp");
        let (population, peripheral) = frames();
        let fitted = pipeline()
            .fit(&state, &population, &peripheral, None)
            .unwrap();
        assert!(fitted.num_features() > 0);
        assert!(state.pipelines.read().contains_key("p1"));
    }

    #[test]
    fn test_refit_replaces() {
        let state = EngineState::init("/tmp/project", "/tmp");
        let (population, peripheral) = frames();
        let p = pipeline();
        let first = p.fit(&state, &population, &peripheral, None).unwrap();
        let second = p.fit(&state, &population, &peripheral, None).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_transform_uses_cache_on_second_call() {
        let state = EngineState::init("/tmp/project", "/tmp");
        let (population, peripheral) = frames();
        let fitted = pipeline()
            .fit(&state, &population, &peripheral, None)
            .unwrap();

        let first = fitted
            .transform(&state, &population, &peripheral, false, None)
            .unwrap();
        assert!(!first.retrieved_from_cache);

        let second = fitted
            .transform(&state, &population, &peripheral, false, None)
            .unwrap();
        assert!(second.retrieved_from_cache);
        assert_eq!(first.features, second.features);
    }

    #[test]
    fn test_mutated_input_misses_cache() {
        let state = EngineState::init("/tmp/project", "/tmp");
        let (mut population, peripheral) = frames();
        let fitted = pipeline()
            .fit(&state, &population, &peripheral, None)
            .unwrap();

        fitted
            .transform(&state, &population, &peripheral, false, None)
            .unwrap();

        population
            .add_numerical(FloatColumn::new("extra", vec![0.0, 0.0]))
            .unwrap();

        let report = fitted
            .transform(&state, &population, &peripheral, false, None)
            .unwrap();
        assert!(!report.retrieved_from_cache);
    }
}
