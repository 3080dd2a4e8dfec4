//! Applies an abstract feature's aggregation to one row's match set

use std::sync::Arc;

use ndarray::Array2;

use crate::containers::Match;
use crate::fastprop::abstract_feature::{AbstractFeature, DataUsed, NO_CATEGORICAL_VALUE};
use crate::fastprop::aggregation::Aggregation;
use crate::fastprop::aggregations;
use crate::fastprop::memoization::Memoization;
use crate::fastprop::table_holder::JoinedTable;
use crate::textmining::WordIndex;

fn is_finite(v: f64) -> bool {
    !v.is_nan() && !v.is_infinite()
}

/// Reduces the matches of one population row to the feature value.
///
/// The projection selected by `data_used` is pulled through the condition
/// predicate and the memoization scratch, then reduced by the aggregation.
pub fn apply_aggregation(
    join: &JoinedTable,
    subfeatures: Option<&Array2<f64>>,
    word_indices: &[Arc<WordIndex>],
    matches: &[Match],
    condition_fn: &(dyn Fn(&Match) -> bool + Send + Sync),
    feature: &AbstractFeature,
    memo: &mut Memoization,
) -> f64 {
    match feature.data_used {
        DataUsed::Categorical => {
            if feature.categorical_value == NO_CATEGORICAL_VALUE {
                return apply_categorical(join, matches, condition_fn, feature);
            }
            let col = join.peripheral.categorical(feature.input_col).clone();
            let pinned = feature.categorical_value;
            let extract = move |m: &Match| -> f64 {
                if col.get(m.ix_peripheral) == pinned {
                    1.0
                } else {
                    0.0
                }
            };
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }

        DataUsed::Discrete => {
            let col = join.peripheral.discrete(feature.input_col).clone();
            let extract = move |m: &Match| col.get(m.ix_peripheral);
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }

        DataUsed::Numerical => {
            let col = join.peripheral.numerical(feature.input_col).clone();
            let extract = move |m: &Match| col.get(m.ix_peripheral);
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }

        DataUsed::Na => apply_not_applicable(join, matches, condition_fn, feature, memo),

        DataUsed::SameUnitsCategorical => {
            let col1 = join.population.categorical(feature.output_col).clone();
            let col2 = join.peripheral.categorical(feature.input_col).clone();
            let extract = move |m: &Match| -> f64 {
                let out = col1.get(m.ix_population);
                if out >= 0 && out == col2.get(m.ix_peripheral) {
                    1.0
                } else {
                    0.0
                }
            };
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }

        DataUsed::SameUnitsDiscrete | DataUsed::SameUnitsDiscreteTs => {
            let col1 = join.population.discrete(feature.output_col).clone();
            let col2 = join.peripheral.discrete(feature.input_col).clone();
            let extract =
                move |m: &Match| col1.get(m.ix_population) - col2.get(m.ix_peripheral);
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }

        DataUsed::SameUnitsNumerical | DataUsed::SameUnitsNumericalTs => {
            let col1 = join.population.numerical(feature.output_col).clone();
            let col2 = join.peripheral.numerical(feature.input_col).clone();
            let extract =
                move |m: &Match| col1.get(m.ix_population) - col2.get(m.ix_peripheral);
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }

        DataUsed::Subfeatures => {
            let matrix = subfeatures.expect("subfeature matrix missing");
            let input_col = feature.input_col;
            let extract = move |m: &Match| matrix[[m.ix_peripheral, input_col]];
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }

        DataUsed::Text => {
            let index = word_indices[feature.input_col].clone();
            let word = feature.categorical_value;
            let extract = move |m: &Match| -> f64 {
                if index.contains(m.ix_peripheral, word) {
                    1.0
                } else {
                    0.0
                }
            };
            aggregate_numeric(join, matches, condition_fn, feature, &extract, memo)
        }
    }
}

/// COUNT DISTINCT and COUNT MINUS COUNT DISTINCT over raw category ids.
fn apply_categorical(
    join: &JoinedTable,
    matches: &[Match],
    condition_fn: &(dyn Fn(&Match) -> bool + Send + Sync),
    feature: &AbstractFeature,
) -> f64 {
    let col = join.peripheral.categorical(feature.input_col);

    let ids = matches
        .iter()
        .filter(|m| condition_fn(m))
        .map(|m| col.get(m.ix_peripheral))
        .filter(|&id| id >= 0);

    match feature.aggregation {
        Aggregation::CountDistinct => aggregations::count_distinct_categorical(ids),
        Aggregation::CountMinusCountDistinct => {
            let all: Vec<i64> = ids.collect();
            all.len() as f64 - aggregations::count_distinct_categorical(all.iter().copied())
        }
        _ => f64::NAN,
    }
}

/// COUNT needs no input column; AVG TIME BETWEEN consumes the raw peripheral
/// time stamps.
fn apply_not_applicable(
    join: &JoinedTable,
    matches: &[Match],
    condition_fn: &(dyn Fn(&Match) -> bool + Send + Sync),
    feature: &AbstractFeature,
    memo: &mut Memoization,
) -> f64 {
    match feature.aggregation {
        Aggregation::Count => {
            matches.iter().filter(|m| condition_fn(m)).count() as f64
        }
        Aggregation::AvgTimeBetween => {
            let Some(ts_col) = join.peripheral_ts.clone() else {
                return f64::NAN;
            };
            let extract = move |m: &Match| ts_col.get(m.ix_peripheral);
            let range = memo.numerical(feature, |buf| {
                buf.extend(
                    matches
                        .iter()
                        .filter(|m| condition_fn(m))
                        .map(|m| extract(m))
                        .filter(|&v| is_finite(v)),
                )
            });
            aggregations::avg_time_between(range)
        }
        _ => f64::NAN,
    }
}

fn aggregate_numeric(
    join: &JoinedTable,
    matches: &[Match],
    condition_fn: &(dyn Fn(&Match) -> bool + Send + Sync),
    feature: &AbstractFeature,
    extract: &dyn Fn(&Match) -> f64,
    memo: &mut Memoization,
) -> f64 {
    if feature.aggregation.is_pair_based() {
        return aggregate_pairs(join, matches, condition_fn, feature, extract, memo);
    }

    let range = memo.numerical(feature, |buf| {
        buf.extend(
            matches
                .iter()
                .filter(|m| condition_fn(m))
                .map(|m| extract(m))
                .filter(|&v| is_finite(v)),
        )
    });

    aggregate_numerical_range(range, feature.aggregation)
}

fn aggregate_numerical_range(values: &[f64], aggregation: Aggregation) -> f64 {
    match aggregation {
        Aggregation::Avg => aggregations::avg(values),
        Aggregation::AvgTimeBetween => aggregations::avg_time_between(values),
        Aggregation::Count => aggregations::count(values),
        Aggregation::CountDistinct => aggregations::count_distinct(values),
        Aggregation::CountDistinctOverCount => aggregations::count_distinct_over_count(values),
        Aggregation::CountMinusCountDistinct => {
            aggregations::count(values) - aggregations::count_distinct(values)
        }
        Aggregation::Kurtosis => aggregations::kurtosis(values),
        Aggregation::Max => aggregations::maximum(values),
        Aggregation::Median => aggregations::median(values),
        Aggregation::Min => aggregations::minimum(values),
        Aggregation::Mode => aggregations::mode(values),
        Aggregation::NumMax => aggregations::num_max(values),
        Aggregation::NumMin => aggregations::num_min(values),
        Aggregation::Q1 => aggregations::quantile(0.01, values),
        Aggregation::Q5 => aggregations::quantile(0.05, values),
        Aggregation::Q10 => aggregations::quantile(0.10, values),
        Aggregation::Q25 => aggregations::quantile(0.25, values),
        Aggregation::Q75 => aggregations::quantile(0.75, values),
        Aggregation::Q90 => aggregations::quantile(0.90, values),
        Aggregation::Q95 => aggregations::quantile(0.95, values),
        Aggregation::Q99 => aggregations::quantile(0.99, values),
        Aggregation::Skew => aggregations::skew(values),
        Aggregation::Stddev => aggregations::stddev(values),
        Aggregation::Sum => aggregations::sum(values),
        Aggregation::Var => aggregations::var(values),
        Aggregation::VariationCoefficient => aggregations::variation_coefficient(values),
        _ => f64::NAN,
    }
}

/// Pair-based aggregations: the scratch stores raw
/// `(peripheral ts, value)` pairs; the elapsed-time families subtract from
/// the population time stamp on the fly.
fn aggregate_pairs(
    join: &JoinedTable,
    matches: &[Match],
    condition_fn: &(dyn Fn(&Match) -> bool + Send + Sync),
    feature: &AbstractFeature,
    extract: &dyn Fn(&Match) -> f64,
    memo: &mut Memoization,
) -> f64 {
    let Some(ts_col) = join.peripheral_ts.clone() else {
        return f64::NAN;
    };

    let range = memo.pairs(feature, |buf| {
        buf.extend(
            matches
                .iter()
                .filter(|m| condition_fn(m))
                .map(|m| (ts_col.get(m.ix_peripheral), extract(m)))
                .filter(|&(_, v)| is_finite(v)),
        )
    });

    match feature.aggregation {
        Aggregation::First => return aggregations::first(range),
        Aggregation::Last => return aggregations::last(range),
        Aggregation::Trend => return aggregations::trend(range),
        _ => {}
    }

    let pop_ts = match (&join.population_ts, matches.first()) {
        (Some(col), Some(m)) => col.get(m.ix_population),
        _ => f64::NAN,
    };

    let elapsed: Vec<(f64, f64)> = range.iter().map(|&(t, v)| (pop_ts - t, v)).collect();

    if let Some(half_life) = feature.aggregation.half_life() {
        return match feature.aggregation {
            Aggregation::EwmaTrend1s
            | Aggregation::EwmaTrend1m
            | Aggregation::EwmaTrend1h
            | Aggregation::EwmaTrend1d
            | Aggregation::EwmaTrend7d
            | Aggregation::EwmaTrend30d
            | Aggregation::EwmaTrend90d
            | Aggregation::EwmaTrend365d => aggregations::ewma_trend(half_life, &elapsed),
            _ => aggregations::ewma(half_life, &elapsed),
        };
    }

    match feature.aggregation {
        Aggregation::TimeSinceFirstEvent => aggregations::time_since_first_event(&elapsed),
        Aggregation::TimeSinceLastEvent => aggregations::time_since_last_event(&elapsed),
        Aggregation::TimeSinceFirstMaximum => aggregations::time_since_first_maximum(&elapsed),
        Aggregation::TimeSinceFirstMinimum => aggregations::time_since_first_minimum(&elapsed),
        Aggregation::TimeSinceLastMaximum => aggregations::time_since_last_maximum(&elapsed),
        Aggregation::TimeSinceLastMinimum => aggregations::time_since_last_minimum(&elapsed),
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{DataFrame, FloatColumn, IntColumn};
    use crate::data_model::{Placeholder, Relationship};
    use crate::fastprop::matchmaker::make_matches;
    use crate::fastprop::table_holder::TableHolder;

    fn holder() -> TableHolder {
        let mut population = DataFrame::new("population");
        population.add_join_key(IntColumn::new("id", vec![1, 2])).unwrap();
        population
            .add_time_stamp(FloatColumn::new("ts", vec![100.0, 200.0]))
            .unwrap();

        let mut orders = DataFrame::new("orders");
        orders.add_join_key(IntColumn::new("id", vec![1, 1, 2, 2])).unwrap();
        orders
            .add_time_stamp(FloatColumn::new("ts", vec![90.0, 80.0, 180.0, 250.0]))
            .unwrap();
        orders
            .add_numerical(FloatColumn::new("x", vec![1.0, 2.0, 4.0, 8.0]))
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

        TableHolder::new(&placeholder, &population, &[orders], &["orders".to_string()]).unwrap()
    }

    fn value(feature: &AbstractFeature, rownum: usize) -> f64 {
        let holder = holder();
        let join = holder.join(0);
        let mut matches = Vec::new();
        make_matches(join, rownum, &mut matches);
        let mut memo = Memoization::new();
        let always = |_: &Match| true;
        apply_aggregation(join, None, &[], &matches, &always, feature, &mut memo)
    }

    #[test]
    fn test_sum_over_window() {
        let feature = AbstractFeature::new(Aggregation::Sum, vec![], DataUsed::Numerical, 0, 0);
        assert_eq!(value(&feature, 0), 3.0);
        assert_eq!(value(&feature, 1), 4.0);
    }

    #[test]
    fn test_count() {
        let feature = AbstractFeature::new(Aggregation::Count, vec![], DataUsed::Na, 0, 0);
        assert_eq!(value(&feature, 0), 2.0);
        assert_eq!(value(&feature, 1), 1.0);
    }

    #[test]
    fn test_first_last_follow_time_stamps() {
        let first = AbstractFeature::new(Aggregation::First, vec![], DataUsed::Numerical, 0, 0);
        let last = AbstractFeature::new(Aggregation::Last, vec![], DataUsed::Numerical, 0, 0);
        assert_eq!(value(&first, 0), 2.0);
        assert_eq!(value(&last, 0), 1.0);
    }

    #[test]
    fn test_time_since_last_event() {
        let feature = AbstractFeature::new(
            Aggregation::TimeSinceLastEvent,
            vec![],
            DataUsed::Numerical,
            0,
            0,
        );
        // Nearest event for row 0 is at ts = 90, so 10 seconds ago.
        assert_eq!(value(&feature, 0), 10.0);
    }

    #[test]
    fn test_empty_match_set_yields_nan_for_value_aggs() {
        let feature = AbstractFeature::new(Aggregation::Avg, vec![], DataUsed::Numerical, 0, 0);
        let holder = holder();
        let mut join = holder.join(0).clone();
        join.population_key = IntColumn::new("id", vec![42]);
        join.population_ts = Some(FloatColumn::new("ts", vec![100.0]));
        let mut memo = Memoization::new();
        let always = |_: &Match| true;
        let v = apply_aggregation(&join, None, &[], &[], &always, &feature, &mut memo);
        assert!(v.is_nan());
    }
}
