//! Abstract features: the recipe for one column of the feature matrix

use serde::{Deserialize, Serialize};

use crate::fastprop::{Aggregation, Condition};

/// Sentinel for features that are not pinned to a category.
pub const NO_CATEGORICAL_VALUE: i64 = -1;

/// The kind of data an abstract feature (or condition) consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataUsed {
    Categorical,
    Discrete,
    Na,
    Numerical,
    SameUnitsCategorical,
    SameUnitsDiscrete,
    SameUnitsDiscreteTs,
    SameUnitsNumerical,
    SameUnitsNumericalTs,
    Subfeatures,
    Text,
}

/// The recipe for computing one feature: an aggregation over a projection of
/// the match set of one peripheral table, narrowed by zero or more
/// conditions.
///
/// `input_col` indexes into the role group selected by `data_used` on the
/// peripheral side; `output_col` is only meaningful for same-units features,
/// where it names the population column being compared against.
/// `categorical_value` pins the feature to one category id (or one
/// vocabulary word id for text features).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractFeature {
    pub aggregation: Aggregation,
    pub categorical_value: i64,
    pub conditions: Vec<Condition>,
    pub data_used: DataUsed,
    pub input_col: usize,
    pub output_col: usize,
    pub peripheral: usize,
}

impl AbstractFeature {
    pub fn new(
        aggregation: Aggregation,
        conditions: Vec<Condition>,
        data_used: DataUsed,
        input_col: usize,
        peripheral: usize,
    ) -> Self {
        Self {
            aggregation,
            categorical_value: NO_CATEGORICAL_VALUE,
            conditions,
            data_used,
            input_col,
            output_col: 0,
            peripheral,
        }
    }

    /// A same-units feature comparing `output_col` on the population side
    /// with `input_col` on the peripheral side.
    pub fn with_output_col(mut self, output_col: usize) -> Self {
        self.output_col = output_col;
        self
    }

    /// Pins the feature to one category (or vocabulary word).
    pub fn with_categorical_value(mut self, value: i64) -> Self {
        self.categorical_value = value;
        self
    }

    /// Whether two features share everything but the aggregation. Features
    /// that agree here aggregate the same filtered-and-projected range, so
    /// the per-row memoization scratch can be reused between them.
    pub fn same_inputs(&self, other: &AbstractFeature) -> bool {
        self.categorical_value == other.categorical_value
            && self.data_used == other.data_used
            && self.input_col == other.input_col
            && self.output_col == other.output_col
            && self.peripheral == other.peripheral
            && self.conditions == other.conditions
    }
}
