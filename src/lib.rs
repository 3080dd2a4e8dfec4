//! relprop - Relational feature engineering engine
//!
//! This crate implements automated propositionalization: given a population
//! table, a set of peripheral tables and a declared join graph, it stages and
//! transforms the tables, synthesises a ranked set of relational aggregate
//! features, and transpiles the chosen features to SQL.

pub mod commands;
pub mod containers;
pub mod data_model;
pub mod dependency;
pub mod error;
pub mod fastprop;
pub mod metrics;
pub mod pipeline;
pub mod preprocessing;
pub mod textmining;
pub mod transpilation;

pub use error::{RelpropError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::containers::{Column, DataFrame, Encoding, Schema};
    pub use crate::data_model::{Placeholder, Relationship, Role};
    pub use crate::dependency::{DataFrameTracker, Fingerprint};
    pub use crate::error::{RelpropError, Result};
    pub use crate::fastprop::{Aggregation, FastProp, FastPropContainer, Hyperparameters};
    pub use crate::metrics::{ClassificationSummary, RegressionSummary, Scores};
    pub use crate::pipeline::{FittedPipeline, Pipeline};
    pub use crate::preprocessing::{Preprocessor, PreprocessorImpl};
    pub use crate::transpilation::{HumanReadableSql, SqlDialect};
}
