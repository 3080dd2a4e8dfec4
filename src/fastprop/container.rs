//! The pipeline-facing wrapper around a fitted FastProp tree

use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding};
use crate::data_model::Placeholder;
use crate::error::Result;
use crate::fastprop::fast_prop::{FastProp, FitParams, TransformParams};
use crate::fastprop::hyperparameters::Hyperparameters;
use crate::fastprop::importance::ImportanceMaker;
use crate::transpilation::SqlDialect;

/// Owns the root feature learner of a pipeline.
///
/// Nested joins are handled inside [`FastProp`] through subfeature
/// recursion; the container is the stable surface the pipeline holds on to,
/// and the unit that is serialized into a saved pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastPropContainer {
    fast_prop: FastProp,
}

impl FastPropContainer {
    pub fn new(
        hyperparameters: Arc<Hyperparameters>,
        peripheral: Arc<Vec<String>>,
        placeholder: Arc<Placeholder>,
    ) -> Result<Self> {
        Ok(Self {
            fast_prop: FastProp::new(hyperparameters, peripheral, placeholder)?,
        })
    }

    pub fn fit(&mut self, population: &DataFrame, peripheral: &[DataFrame]) -> Result<()> {
        self.fast_prop.fit(
            &FitParams {
                population,
                peripheral,
            },
            false,
        )
    }

    pub fn transform(
        &self,
        population: &DataFrame,
        peripheral: &[DataFrame],
    ) -> Result<Array2<f64>> {
        self.fast_prop.transform(&TransformParams {
            population,
            peripheral,
        })
    }

    pub fn num_features(&self) -> usize {
        self.fast_prop.num_features()
    }

    pub fn fast_prop(&self) -> &FastProp {
        &self.fast_prop
    }

    /// Column importances derived from per-feature importances by
    /// back-propagation through the subfeature tree.
    pub fn column_importances(&self, feature_importances: &[f64]) -> ImportanceMaker {
        self.fast_prop.column_importances(feature_importances)
    }

    /// The SQL for every feature, subfeature tables first. Statements whose
    /// text exceeds `size_threshold` are replaced by a stub table and a
    /// comment naming the threshold.
    pub fn to_sql(
        &self,
        categories: &Encoding,
        dialect: &dyn SqlDialect,
        size_threshold: Option<usize>,
    ) -> Vec<String> {
        let statements = self.fast_prop.to_sql(categories, dialect, "", true);

        let Some(threshold) = size_threshold else {
            return statements;
        };

        statements
            .into_iter()
            .enumerate()
            .map(|(i, sql)| {
                if sql.len() <= threshold {
                    return sql;
                }
                let table = format!("FEATURE_{}", i + 1);
                format!(
                    "-- Feature {} exceeds the size threshold of {} characters and was replaced by a stub.\n{}CREATE TABLE \"{}\" (\"feature_{}\" DOUBLE PRECISION, \"rownum\" INTEGER);\n",
                    i + 1,
                    threshold,
                    dialect.drop_table_if_exists(&table),
                    table,
                    i + 1
                )
            })
            .collect()
    }
}
