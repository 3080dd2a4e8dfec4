//! Resolved join pairs for one level of the data model

use std::sync::Arc;

use crate::containers::{DataFrame, FloatColumn, Index, IntColumn};
use crate::data_model::Placeholder;
use crate::error::{RelpropError, Result};

/// One resolved join: the population frame, the peripheral frame and the
/// columns the join actually uses. Column handles share storage with the
/// frames, so holding them is cheap.
#[derive(Debug, Clone)]
pub struct JoinedTable {
    pub population: DataFrame,
    pub peripheral: DataFrame,
    pub spec: crate::data_model::JoinSpec,
    pub population_key: IntColumn,
    pub peripheral_key: IntColumn,
    pub population_ts: Option<FloatColumn>,
    pub peripheral_ts: Option<FloatColumn>,
    pub upper_ts: Option<FloatColumn>,
    pub peripheral_index: Arc<Index>,
}

impl JoinedTable {
    /// Whether matches are narrowed by a time window.
    pub fn is_time_windowed(&self) -> bool {
        self.population_ts.is_some() && self.peripheral_ts.is_some()
    }
}

/// All resolved joins of one placeholder level, in child order.
#[derive(Debug, Clone)]
pub struct TableHolder {
    joins: Vec<JoinedTable>,
}

impl TableHolder {
    /// Resolves every child join of `placeholder`. Missing peripheral
    /// frames, join keys or time stamps surface as structured errors naming
    /// the offending table and column.
    pub fn new(
        placeholder: &Placeholder,
        population: &DataFrame,
        peripheral: &[DataFrame],
        peripheral_names: &[String],
    ) -> Result<Self> {
        let mut joins = Vec::with_capacity(placeholder.num_joined());

        for (ix, child) in placeholder.joined_tables().iter().enumerate() {
            let spec = placeholder.join_spec(ix);

            let peripheral_ix = peripheral_names
                .iter()
                .position(|name| name == child.name())
                .ok_or_else(|| {
                    RelpropError::UserInput(format!(
                        "Placeholder named '{}' not found among the peripheral tables.",
                        child.name()
                    ))
                })?;

            if peripheral_ix >= peripheral.len() {
                return Err(RelpropError::UserInput(
                    "The number of peripheral tables does not match the number of peripheral placeholders."
                        .to_string(),
                ));
            }

            let per = &peripheral[peripheral_ix];

            let population_key = population.join_key_by_name(&spec.join_key)?.clone();
            let peripheral_key = per.join_key_by_name(&spec.other_join_key)?.clone();

            let population_ts = match &spec.time_stamp {
                Some(name) => Some(population.time_stamp_by_name(name)?.clone()),
                None => None,
            };
            let peripheral_ts = match &spec.other_time_stamp {
                Some(name) => Some(per.time_stamp_by_name(name)?.clone()),
                None => None,
            };
            let upper_ts = match &spec.upper_time_stamp {
                Some(name) => Some(per.time_stamp_by_name(name)?.clone()),
                None => None,
            };

            let peripheral_index = match per.index_for(&spec.other_join_key) {
                Some(index) => index,
                None => {
                    let ts = peripheral_ts
                        .as_ref()
                        .map(|c| (c.name(), c.as_slice()));
                    Arc::new(Index::new(peripheral_key.as_slice(), ts))
                }
            };

            joins.push(JoinedTable {
                population: population.clone(),
                peripheral: per.clone(),
                spec,
                population_key,
                peripheral_key,
                population_ts,
                peripheral_ts,
                upper_ts,
                peripheral_index,
            });
        }

        Ok(Self { joins })
    }

    pub fn joins(&self) -> &[JoinedTable] {
        &self.joins
    }

    pub fn join(&self, ix: usize) -> &JoinedTable {
        &self.joins[ix]
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::FloatColumn;
    use crate::data_model::Relationship;

    fn population() -> DataFrame {
        let mut df = DataFrame::new("population");
        df.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
        df.add_time_stamp(FloatColumn::new("ts", vec![100.0, 200.0])).unwrap();
        df
    }

    fn orders() -> DataFrame {
        let mut df = DataFrame::new("orders");
        df.add_join_key(IntColumn::new("id", vec![1, 1, 2])).unwrap();
        df.add_time_stamp(FloatColumn::new("ts", vec![90.0, 80.0, 180.0])).unwrap();
        df.create_indices();
        df
    }

    #[test]
    fn test_resolves_join_columns() {
        let placeholder = Placeholder::new("population").join(
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
        let holder = TableHolder::new(
            &placeholder,
            &population(),
            &[orders()],
            &["orders".to_string()],
        )
        .unwrap();

        assert_eq!(holder.len(), 1);
        assert!(holder.join(0).is_time_windowed());
        assert_eq!(holder.join(0).peripheral_index.rows(1), &[1, 0]);
    }

    #[test]
    fn test_missing_join_key_is_structured() {
        let placeholder = Placeholder::new("population").join(
            Placeholder::new("orders"),
            "customer",
            "",
            "",
            "",
            "",
            Relationship::ManyToMany,
            0.0,
            0.0,
            false,
        );
        let err = TableHolder::new(
            &placeholder,
            &population(),
            &[orders()],
            &["orders".to_string()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("customer"));
        assert!(err.to_string().contains("population"));
    }
}
