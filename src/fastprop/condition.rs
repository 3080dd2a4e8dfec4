//! Conditions narrowing a match set

use serde::{Deserialize, Serialize};

use crate::containers::Match;
use crate::fastprop::table_holder::JoinedTable;

/// A predicate applied to each match before aggregation. Conditions within
/// one feature are AND-combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type_", rename_all = "snake_case")]
pub enum Condition {
    /// The peripheral categorical column equals one fixed category.
    Categorical {
        category_used: i64,
        input_col: usize,
        peripheral: usize,
    },
    /// The time lag between the two sides falls into a band: the peripheral
    /// time stamp plus `bound_upper` lies after the population time stamp,
    /// and plus `bound_lower` does not.
    Lag {
        bound_lower: f64,
        bound_upper: f64,
        peripheral: usize,
    },
    /// Two categorical columns that share a unit agree.
    SameUnitsCategorical {
        input_col: usize,
        output_col: usize,
        peripheral: usize,
    },
}

impl Condition {
    pub fn peripheral(&self) -> usize {
        match self {
            Condition::Categorical { peripheral, .. }
            | Condition::Lag { peripheral, .. }
            | Condition::SameUnitsCategorical { peripheral, .. } => *peripheral,
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, Condition::Categorical { .. })
    }

    /// Compiles the condition into a match predicate over the joined table.
    /// The returned closure owns cheap column handles, so it can be moved
    /// into a worker partition.
    pub fn make_predicate(&self, join: &JoinedTable) -> Box<dyn Fn(&Match) -> bool + Send + Sync> {
        match self {
            Condition::Categorical {
                category_used,
                input_col,
                ..
            } => {
                let col = join.peripheral.categorical(*input_col).clone();
                let category_used = *category_used;
                Box::new(move |m| col.get(m.ix_peripheral) == category_used)
            }
            Condition::Lag {
                bound_lower,
                bound_upper,
                ..
            } => {
                let pop_ts = join
                    .population_ts
                    .clone()
                    .expect("lag conditions require time stamps on both sides");
                let per_ts = join
                    .peripheral_ts
                    .clone()
                    .expect("lag conditions require time stamps on both sides");
                let lower = *bound_lower;
                let upper = *bound_upper;
                Box::new(move |m| {
                    let t1 = pop_ts.get(m.ix_population);
                    let t2 = per_ts.get(m.ix_peripheral);
                    t2 + upper > t1 && t2 + lower <= t1
                })
            }
            Condition::SameUnitsCategorical {
                input_col,
                output_col,
                ..
            } => {
                let col1 = join.population.categorical(*output_col).clone();
                let col2 = join.peripheral.categorical(*input_col).clone();
                Box::new(move |m| col1.get(m.ix_population) == col2.get(m.ix_peripheral))
            }
        }
    }
}

/// AND-combines the compiled predicates of all conditions of a feature.
pub fn make_condition_fn(
    conditions: &[Condition],
    join: &JoinedTable,
) -> Box<dyn Fn(&Match) -> bool + Send + Sync> {
    if conditions.is_empty() {
        return Box::new(|_| true);
    }
    let predicates: Vec<_> = conditions.iter().map(|c| c.make_predicate(join)).collect();
    Box::new(move |m| predicates.iter().all(|p| p(m)))
}
