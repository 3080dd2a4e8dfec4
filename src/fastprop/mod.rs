//! The FastProp feature generator
//!
//! FastProp enumerates abstract aggregate features over the join graph,
//! selects them by univariate R² against the targets, and turns them into a
//! dense feature matrix in parallel. Subfeatures recurse through nested
//! joins; every selected feature can be transpiled to SQL.

mod abstract_feature;
mod aggregation;
mod aggregations;
mod aggregator;
mod condition;
mod container;
mod fast_prop;
mod hyperparameters;
mod importance;
mod matchmaker;
mod memoization;
mod r_squared;
mod sql;
mod table_holder;

pub use abstract_feature::{AbstractFeature, DataUsed, NO_CATEGORICAL_VALUE};
pub use aggregation::Aggregation;
pub use condition::Condition;
pub use container::FastPropContainer;
pub use fast_prop::{FastProp, FitParams, TransformParams};
pub use hyperparameters::{Hyperparameters, LossFunction};
pub use importance::{ColumnDescription, ImportanceMaker, Marker};
pub use matchmaker::make_matches;
pub use memoization::Memoization;
pub use table_holder::{JoinedTable, TableHolder};
