//! The immutable result of fitting a pipeline

use std::path::Path;

use ndarray::Array2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::containers::Schema;
use crate::data_model::Placeholder;
use crate::dependency::{Fingerprint, Warning};
use crate::error::{RelpropError, Result};
use crate::fastprop::{FastPropContainer, ImportanceMaker};
use crate::metrics::{ScoreSet, Scores};
use crate::pipeline::predictor::Predictor;
use crate::preprocessing::PreprocessorImpl;

const SERIAL_VERSION: u32 = 1;

/// The fingerprints of every stage, in dependency order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fingerprints {
    pub staging: Option<Fingerprint>,
    pub preprocessors: Vec<Fingerprint>,
    pub feature_learner: Option<Fingerprint>,
    pub predictors: Vec<Fingerprint>,
}

/// What a `transform` call hands back.
pub struct TransformReport {
    pub features: Array2<f64>,
    /// One prediction vector per target when prediction was requested.
    pub predictions: Vec<Vec<f64>>,
    /// Whether the feature matrix came out of the cache rather than a
    /// fresh FastProp run.
    pub retrieved_from_cache: bool,
}

/// A pipeline after `fit`: frozen schemas, fitted preprocessors, the
/// feature-learner tree, the per-target predictors and the score history.
///
/// Apart from the appended score history, a fitted pipeline never changes;
/// refitting produces a new instance that replaces it in the pipeline map.
pub struct FittedPipeline {
    pub name: String,
    pub data_model: Placeholder,
    pub peripheral_names: Vec<String>,
    pub population_schema: Schema,
    pub peripheral_schemas: Vec<Schema>,
    pub preprocessors: Vec<PreprocessorImpl>,
    pub feature_learner: FastPropContainer,
    pub fingerprints: Fingerprints,
    pub warnings: Vec<Warning>,
    pub targets: Vec<String>,
    pub predictors: Vec<Box<dyn Predictor>>,
    scores: RwLock<Scores>,
}

/// The serializable parts; predictor impls persist through their own
/// channel and are re-attached after loading.
#[derive(Serialize, Deserialize)]
struct SavedPipeline {
    version: u32,
    name: String,
    data_model: Placeholder,
    peripheral_names: Vec<String>,
    population_schema: Schema,
    peripheral_schemas: Vec<Schema>,
    preprocessors: Vec<PreprocessorImpl>,
    feature_learner: FastPropContainer,
    fingerprints: Fingerprints,
    warnings: Vec<Warning>,
    targets: Vec<String>,
    scores: Scores,
}

impl FittedPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        data_model: Placeholder,
        peripheral_names: Vec<String>,
        population_schema: Schema,
        peripheral_schemas: Vec<Schema>,
        preprocessors: Vec<PreprocessorImpl>,
        feature_learner: FastPropContainer,
        fingerprints: Fingerprints,
        warnings: Vec<Warning>,
        targets: Vec<String>,
        predictors: Vec<Box<dyn Predictor>>,
    ) -> Self {
        Self {
            name,
            data_model,
            peripheral_names,
            population_schema,
            peripheral_schemas,
            preprocessors,
            feature_learner,
            fingerprints,
            warnings,
            targets,
            predictors,
            scores: RwLock::new(Scores::new()),
        }
    }

    pub fn num_features(&self) -> usize {
        self.feature_learner.num_features()
    }

    pub fn scores(&self) -> Scores {
        self.scores.read().clone()
    }

    pub fn push_scores(&self, set: ScoreSet) {
        self.scores.write().push(set);
    }

    /// Mean importance per feature, averaged over the per-target
    /// predictors and normalized to sum to one.
    pub fn feature_importances(&self) -> Vec<f64> {
        let ncols = self.num_features();
        let mut totals = vec![0.0; ncols];
        let mut contributors = 0usize;

        for predictor in &self.predictors {
            let importances = predictor.feature_importances();
            if importances.len() != ncols {
                continue;
            }
            for (total, importance) in totals.iter_mut().zip(importances) {
                *total += importance;
            }
            contributors += 1;
        }

        if contributors == 0 {
            return totals;
        }

        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            for total in totals.iter_mut() {
                *total /= sum;
            }
        }
        totals
    }

    /// Column importances derived from the feature importances by
    /// back-propagation through the subfeature tree.
    pub fn column_importances(&self) -> ImportanceMaker {
        self.feature_learner
            .column_importances(&self.feature_importances())
    }

    /// Persists everything except the predictor impls.
    pub fn save(&self, path: &Path) -> Result<()> {
        let saved = SavedPipeline {
            version: SERIAL_VERSION,
            name: self.name.clone(),
            data_model: self.data_model.clone(),
            peripheral_names: self.peripheral_names.clone(),
            population_schema: self.population_schema.clone(),
            peripheral_schemas: self.peripheral_schemas.clone(),
            preprocessors: self.preprocessors.clone(),
            feature_learner: self.feature_learner.clone(),
            fingerprints: self.fingerprints.clone(),
            warnings: self.warnings.clone(),
            targets: self.targets.clone(),
            scores: self.scores(),
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &saved)?;
        Ok(())
    }

    /// Loads a pipeline saved by [`FittedPipeline::save`]; rejects other
    /// versions. Predictors come back empty and must be re-attached.
    pub fn load(path: &Path) -> Result<FittedPipeline> {
        let file = std::fs::File::open(path)?;
        let saved: SavedPipeline = serde_json::from_reader(std::io::BufReader::new(file))?;
        if saved.version != SERIAL_VERSION {
            return Err(RelpropError::Serialization(format!(
                "Incompatible pipeline version: expected {}, got {}",
                SERIAL_VERSION, saved.version
            )));
        }
        Ok(FittedPipeline {
            name: saved.name,
            data_model: saved.data_model,
            peripheral_names: saved.peripheral_names,
            population_schema: saved.population_schema,
            peripheral_schemas: saved.peripheral_schemas,
            preprocessors: saved.preprocessors,
            feature_learner: saved.feature_learner,
            fingerprints: saved.fingerprints,
            warnings: saved.warnings,
            targets: saved.targets,
            predictors: Vec::new(),
            scores: RwLock::new(saved.scores),
        })
    }
}
