//! Transpiles selected features to SQL

use crate::containers::Encoding;
use crate::fastprop::abstract_feature::{AbstractFeature, DataUsed, NO_CATEGORICAL_VALUE};
use crate::fastprop::aggregation::Aggregation;
use crate::fastprop::condition::Condition;
use crate::fastprop::fast_prop::FastProp;
use crate::transpilation::SqlDialect;

impl FastProp {
    /// One `CREATE TABLE` statement per fitted feature, subfeatures first.
    /// Subfeature tables are prefixed so that `FEATURE_2_3` is the third
    /// feature of the second join's nested learner.
    pub fn to_sql(
        &self,
        categories: &Encoding,
        dialect: &dyn SqlDialect,
        feature_prefix: &str,
        include_subfeatures: bool,
    ) -> Vec<String> {
        let mut sql = Vec::new();

        if include_subfeatures {
            for (ix, sub) in self.subfeatures().iter().enumerate() {
                if let Some(sub) = sub {
                    let prefix = format!("{}{}_", feature_prefix, ix + 1);
                    sql.extend(sub.to_sql(categories, dialect, &prefix, true));
                }
            }
        }

        for (i, feature) in self.features().iter().enumerate() {
            sql.push(self.feature_to_sql(
                categories,
                dialect,
                feature_prefix,
                i + 1,
                feature,
            ));
        }

        sql
    }

    fn staging_number(&self, table_name: &str) -> usize {
        self.peripheral_names()
            .iter()
            .position(|name| name == table_name)
            .map(|ix| ix + 2)
            .unwrap_or(1)
    }

    fn feature_to_sql(
        &self,
        categories: &Encoding,
        dialect: &dyn SqlDialect,
        feature_prefix: &str,
        feature_num: usize,
        feature: &AbstractFeature,
    ) -> String {
        let population = self
            .population_schema()
            .cloned()
            .unwrap_or_default();
        let peripheral = self.peripheral_schema(feature.peripheral);
        let spec = self.placeholder().join_spec(feature.peripheral);

        let feature_name = format!("feature_{}{}", feature_prefix, feature_num);
        let table_name = feature_name.to_uppercase();

        let t1_table = format!(
            "{}_{}",
            dialect.make_staging_table_name(&population.name),
            self.staging_number(&population.name)
        );
        let t2_table = format!(
            "{}_{}",
            dialect.make_staging_table_name(&peripheral.name),
            self.staging_number(&peripheral.name)
        );

        let projection = self.make_projection(categories, dialect, feature_prefix, feature);
        let select = make_select_aggregation(dialect, feature.aggregation, &projection, &spec);

        let mut sql = dialect.drop_table_if_exists(&table_name);
        sql.push_str(&format!("CREATE TABLE \"{}\" AS\n", table_name));
        sql.push_str(&format!(
            "SELECT {} AS \"{}\",\n       t1.rownum AS \"rownum\"\n",
            select, feature_name
        ));
        sql.push_str(&format!("FROM \"{}\" t1\n", t1_table));
        sql.push_str(&format!("LEFT JOIN \"{}\" t2\n", t2_table));
        sql.push_str(&format!(
            "ON {} = {}\n",
            dialect.make_colname("t1", &spec.join_key),
            dialect.make_colname("t2", &spec.other_join_key)
        ));

        if feature.data_used == DataUsed::Subfeatures {
            let number = format!("{}{}_{}", feature_prefix, feature.peripheral + 1, feature.input_col + 1);
            sql.push_str(&format!(
                "LEFT JOIN \"FEATURE_{}\" f_{}\nON f_{}.\"rownum\" = t2.rownum\n",
                number.to_uppercase(),
                number,
                number
            ));
        }

        let mut where_clauses = self.make_window_clauses(dialect, &spec);
        for condition in &feature.conditions {
            where_clauses.push(condition_to_sql(
                categories,
                dialect,
                &spec,
                &population,
                peripheral,
                condition,
            ));
        }

        for (i, clause) in where_clauses.iter().enumerate() {
            let keyword = if i == 0 { "WHERE" } else { "AND" };
            sql.push_str(&format!("{} {}\n", keyword, clause));
        }

        sql.push_str("GROUP BY t1.rownum;\n");
        sql
    }

    fn make_window_clauses(
        &self,
        dialect: &dyn SqlDialect,
        spec: &crate::data_model::JoinSpec,
    ) -> Vec<String> {
        let mut clauses = Vec::new();

        let (Some(ts), Some(other_ts)) = (&spec.time_stamp, &spec.other_time_stamp) else {
            return clauses;
        };

        let t1_ts = dialect.make_colname("t1", ts);
        let t2_ts = dialect.make_colname("t2", other_ts);

        if spec.horizon != 0.0 {
            clauses.push(format!("{} <= {} - {}", t2_ts, t1_ts, spec.horizon));
        } else {
            clauses.push(format!("{} <= {}", t2_ts, t1_ts));
        }

        if spec.memory > 0.0 {
            clauses.push(format!(
                "{} > {} - {}",
                t2_ts,
                t1_ts,
                spec.horizon + spec.memory
            ));
        }

        if let Some(upper) = &spec.upper_time_stamp {
            let t2_upper = dialect.make_colname("t2", upper);
            clauses.push(format!("( {} IS NULL OR {} > {} )", t2_upper, t2_upper, t1_ts));
        }

        clauses
    }

    fn make_projection(
        &self,
        categories: &Encoding,
        dialect: &dyn SqlDialect,
        feature_prefix: &str,
        feature: &AbstractFeature,
    ) -> String {
        let population = self.population_schema().cloned().unwrap_or_default();
        let peripheral = self.peripheral_schema(feature.peripheral);

        match feature.data_used {
            DataUsed::Categorical => {
                let col = dialect.make_colname("t2", &peripheral.categoricals[feature.input_col]);
                if feature.categorical_value == NO_CATEGORICAL_VALUE {
                    col
                } else {
                    format!(
                        "CASE WHEN {} = '{}' THEN 1 ELSE 0 END",
                        col,
                        categories.string(feature.categorical_value)
                    )
                }
            }
            DataUsed::Discrete => {
                dialect.make_colname("t2", &peripheral.discretes[feature.input_col])
            }
            DataUsed::Numerical => {
                dialect.make_colname("t2", &peripheral.numericals[feature.input_col])
            }
            DataUsed::Na => spec_ts_colname(dialect, self, feature),
            DataUsed::SameUnitsCategorical => format!(
                "CASE WHEN {} = {} THEN 1 ELSE 0 END",
                dialect.make_colname("t1", &population.categoricals[feature.output_col]),
                dialect.make_colname("t2", &peripheral.categoricals[feature.input_col])
            ),
            DataUsed::SameUnitsDiscrete | DataUsed::SameUnitsDiscreteTs => format!(
                "{} - {}",
                dialect.make_colname("t1", &population.discretes[feature.output_col]),
                dialect.make_colname("t2", &peripheral.discretes[feature.input_col])
            ),
            DataUsed::SameUnitsNumerical | DataUsed::SameUnitsNumericalTs => format!(
                "{} - {}",
                dialect.make_colname("t1", &population.numericals[feature.output_col]),
                dialect.make_colname("t2", &peripheral.numericals[feature.input_col])
            ),
            DataUsed::Subfeatures => {
                let number = format!(
                    "{}{}_{}",
                    feature_prefix,
                    feature.peripheral + 1,
                    feature.input_col + 1
                );
                format!("COALESCE( f_{}.\"feature_{}\", 0.0 )", number, number)
            }
            DataUsed::Text => {
                let col = dialect.make_colname("t2", &peripheral.text[feature.input_col]);
                let word = self
                    .vocabulary(feature.peripheral, feature.input_col)
                    .word(feature.categorical_value);
                format!(
                    "CASE WHEN INSTR( LOWER( {} ), '{}' ) > 0 THEN 1 ELSE 0 END",
                    col, word
                )
            }
        }
    }
}

/// The peripheral time-stamp reference used by COUNT-free aggregations.
fn spec_ts_colname(dialect: &dyn SqlDialect, fp: &FastProp, feature: &AbstractFeature) -> String {
    let spec = fp.placeholder().join_spec(feature.peripheral);
    match spec.other_time_stamp {
        Some(ts) => dialect.make_colname("t2", &ts),
        None => "*".to_string(),
    }
}

fn make_select_aggregation(
    dialect: &dyn SqlDialect,
    aggregation: Aggregation,
    projection: &str,
    spec: &crate::data_model::JoinSpec,
) -> String {
    let ts = spec
        .other_time_stamp
        .as_ref()
        .map(|name| dialect.make_colname("t2", name));

    match aggregation {
        Aggregation::Avg => format!("AVG( {} )", projection),
        Aggregation::Count => "COUNT( * )".to_string(),
        Aggregation::CountDistinct => format!("COUNT( DISTINCT {} )", projection),
        Aggregation::CountDistinctOverCount => format!(
            "CAST( COUNT( DISTINCT {} ) AS DOUBLE PRECISION ) / COUNT( {} )",
            projection, projection
        ),
        Aggregation::CountMinusCountDistinct => format!(
            "COUNT( {} ) - COUNT( DISTINCT {} )",
            projection, projection
        ),
        Aggregation::Max => format!("MAX( {} )", projection),
        Aggregation::Median => format!("MEDIAN( {} )", projection),
        Aggregation::Min => format!("MIN( {} )", projection),
        Aggregation::Stddev => format!("STDDEV( {} )", projection),
        Aggregation::Sum => format!("SUM( {} )", projection),
        Aggregation::Var => format!("VARIANCE( {} )", projection),
        Aggregation::AvgTimeBetween => {
            format!("AVG_TIME_BETWEEN( {} )", projection)
        }
        // The remaining aggregations render as named aggregate functions
        // the executing runtime registers; time-anchored ones take the
        // peripheral time stamp as their second argument.
        other => {
            let name = other.name().replace(' ', "_");
            match ts {
                Some(ts) if other.is_pair_based() => {
                    format!("{}( {}, {} )", name, projection, ts)
                }
                _ => format!("{}( {} )", name, projection),
            }
        }
    }
}

fn condition_to_sql(
    categories: &Encoding,
    dialect: &dyn SqlDialect,
    spec: &crate::data_model::JoinSpec,
    population: &crate::containers::Schema,
    peripheral: &crate::containers::Schema,
    condition: &Condition,
) -> String {
    match condition {
        Condition::Categorical {
            category_used,
            input_col,
            ..
        } => format!(
            "{} = '{}'",
            dialect.make_colname("t2", &peripheral.categoricals[*input_col]),
            categories.string(*category_used)
        ),
        Condition::Lag {
            bound_lower,
            bound_upper,
            ..
        } => {
            let t1 = spec
                .time_stamp
                .as_ref()
                .map(|name| dialect.make_colname("t1", name))
                .unwrap_or_default();
            let t2 = spec
                .other_time_stamp
                .as_ref()
                .map(|name| dialect.make_colname("t2", name))
                .unwrap_or_default();
            format!(
                "( {} + {} > {} AND {} + {} <= {} )",
                t2, bound_upper, t1, t2, bound_lower, t1
            )
        }
        Condition::SameUnitsCategorical {
            input_col,
            output_col,
            ..
        } => format!(
            "{} = {}",
            dialect.make_colname("t1", &population.categoricals[*output_col]),
            dialect.make_colname("t2", &peripheral.categoricals[*input_col])
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{DataFrame, FloatColumn, IntColumn};
    use crate::data_model::{Placeholder, Relationship};
    use crate::fastprop::{FitParams, Hyperparameters};
    use crate::transpilation::HumanReadableSql;
    use std::sync::Arc;

    fn fitted() -> FastProp {
        let mut population = DataFrame::new("population");
        population.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
        population
            .add_time_stamp(FloatColumn::new("ts", vec![100.0, 200.0]))
            .unwrap();
        population.add_target(FloatColumn::new("y", vec![0.0, 1.0])).unwrap();

        let mut orders = DataFrame::new("orders");
        orders.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
        orders
            .add_time_stamp(FloatColumn::new("ts", vec![90.0, 180.0]))
            .unwrap();
        orders
            .add_numerical(FloatColumn::new("price", vec![1.0, 2.0]))
            .unwrap();
        orders.create_indices();

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

        let mut fp = FastProp::new(
            Arc::new(Hyperparameters::default()),
            Arc::new(vec!["orders".to_string()]),
            Arc::new(placeholder),
        )
        .unwrap();
        fp.fit(
            &FitParams {
                population: &population,
                peripheral: &[orders],
            },
            false,
        )
        .unwrap();
        fp
    }

    #[test]
    fn test_one_statement_per_feature() {
        let fp = fitted();
        let categories = Encoding::new();
        let sql = fp.to_sql(&categories, &HumanReadableSql, "", true);
        assert_eq!(sql.len(), fp.num_features());
    }

    #[test]
    fn test_feature_sql_shape() {
        let fp = fitted();
        let categories = Encoding::new();
        let sql = fp.to_sql(&categories, &HumanReadableSql, "", true);

        let first = &sql[0];
        assert!(first.contains("DROP TABLE IF EXISTS \"FEATURE_1\""));
        assert!(first.contains("CREATE TABLE \"FEATURE_1\" AS"));
        assert!(first.contains("FROM \"POPULATION__STAGING_TABLE_1\" t1"));
        assert!(first.contains("LEFT JOIN \"ORDERS__STAGING_TABLE_2\" t2"));
        assert!(first.contains("ON t1.\"id\" = t2.\"id\""));
        assert!(first.contains("WHERE t2.\"ts\" <= t1.\"ts\""));
        assert!(first.contains("GROUP BY t1.rownum;"));
    }
}
