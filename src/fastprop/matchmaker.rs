//! Identifies matches between population rows and peripheral rows

use crate::containers::Match;
use crate::fastprop::table_holder::JoinedTable;

/// Appends all peripheral rows matching population row `rownum` to `out`.
///
/// A row matches when the join keys agree and, if both sides carry time
/// stamps, the peripheral time stamp falls into the window
/// `(t - memory - horizon, t - horizon]` around the population time stamp
/// `t`. The upper boundary is closed; when the peripheral table carries
/// targets and lagged targets are not allowed, it is open instead, so an
/// event at exactly `t - horizon` cannot leak the quantity being predicted.
/// A peripheral upper time stamp additionally requires `t < upper_ts`.
///
/// Matches are yielded in peripheral time-stamp order when the index is
/// sorted by the join's time stamp, otherwise in peripheral row order.
pub fn make_matches(join: &JoinedTable, rownum: usize, out: &mut Vec<Match>) {
    let key = join.population_key.get(rownum);
    if key < 0 {
        return;
    }

    let bucket = join.peripheral_index.rows(key);
    if bucket.is_empty() {
        return;
    }

    if !join.is_time_windowed() {
        out.extend(bucket.iter().map(|&ix_peripheral| Match {
            ix_population: rownum,
            ix_peripheral,
        }));
        return;
    }

    let pop_ts = join
        .population_ts
        .as_ref()
        .map(|c| c.get(rownum))
        .unwrap_or(f64::NAN);
    let per_ts = join
        .peripheral_ts
        .as_ref()
        .map(|c| c.as_slice())
        .unwrap_or(&[]);

    let upper_edge = pop_ts - join.spec.horizon;
    let lower_edge = if join.spec.memory > 0.0 {
        Some(upper_edge - join.spec.memory)
    } else {
        None
    };

    let upper_inclusive =
        join.spec.allow_lagged_targets || join.peripheral.num_targets() == 0;

    let in_window = |ts: f64| -> bool {
        let below_upper = if upper_inclusive {
            ts <= upper_edge
        } else {
            ts < upper_edge
        };
        let above_lower = lower_edge.map(|edge| ts > edge).unwrap_or(true);
        below_upper && above_lower
    };

    let passes_upper_ts = |ix: usize| -> bool {
        match &join.upper_ts {
            Some(col) => {
                let upper = col.get(ix);
                upper.is_nan() || upper > pop_ts
            }
            None => true,
        }
    };

    let sorted = join.peripheral_index.sorted_by()
        == join.spec.other_time_stamp.as_deref();

    if sorted {
        // Bucket rows are ordered by this time stamp: binary-search the
        // band edges instead of scanning.
        let begin = match lower_edge {
            Some(edge) => bucket.partition_point(|&ix| !(per_ts[ix] > edge)),
            None => 0,
        };
        let end = bucket.partition_point(|&ix| {
            let ts = per_ts[ix];
            if upper_inclusive {
                ts <= upper_edge
            } else {
                ts < upper_edge
            }
        });

        for &ix_peripheral in &bucket[begin..end.max(begin)] {
            if passes_upper_ts(ix_peripheral) {
                out.push(Match {
                    ix_population: rownum,
                    ix_peripheral,
                });
            }
        }
    } else {
        for &ix_peripheral in bucket {
            if in_window(per_ts[ix_peripheral]) && passes_upper_ts(ix_peripheral) {
                out.push(Match {
                    ix_population: rownum,
                    ix_peripheral,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{DataFrame, FloatColumn, IntColumn};
    use crate::data_model::{Placeholder, Relationship};
    use crate::fastprop::table_holder::TableHolder;

    fn holder(memory: f64, horizon: f64) -> TableHolder {
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
        orders.create_indices();

        let placeholder = Placeholder::new("population").join(
            Placeholder::new("orders"),
            "id",
            "",
            "ts",
            "",
            "",
            Relationship::ManyToMany,
            memory,
            horizon,
            false,
        );

        TableHolder::new(&placeholder, &population, &[orders], &["orders".to_string()]).unwrap()
    }

    fn match_rows(holder: &TableHolder, rownum: usize) -> Vec<usize> {
        let mut matches = Vec::new();
        make_matches(holder.join(0), rownum, &mut matches);
        matches.iter().map(|m| m.ix_peripheral).collect()
    }

    #[test]
    fn test_unbounded_memory_excludes_future_rows() {
        let holder = holder(0.0, 0.0);
        // Matches come back in time-stamp order.
        assert_eq!(match_rows(&holder, 0), vec![1, 0]);
        // The row at ts = 250 lies after the population row's ts = 200.
        assert_eq!(match_rows(&holder, 1), vec![2]);
    }

    #[test]
    fn test_memory_bounds_the_window() {
        let holder = holder(15.0, 0.0);
        // Window is (85, 100]: only ts = 90 survives.
        assert_eq!(match_rows(&holder, 0), vec![0]);
    }

    #[test]
    fn test_horizon_shifts_the_window() {
        let holder = holder(0.0, 15.0);
        // Window is (-inf, 85]: only ts = 80 survives.
        assert_eq!(match_rows(&holder, 0), vec![1]);
    }

    #[test]
    fn test_equal_time_stamp_boundary() {
        let mut population = DataFrame::new("population");
        population.add_join_key(IntColumn::new("id", vec![1])).unwrap();
        population.add_time_stamp(FloatColumn::new("ts", vec![90.0])).unwrap();

        let mut orders = DataFrame::new("orders");
        orders.add_join_key(IntColumn::new("id", vec![1])).unwrap();
        orders.add_time_stamp(FloatColumn::new("ts", vec![90.0])).unwrap();
        orders.add_target(FloatColumn::new("y", vec![1.0])).unwrap();
        orders.create_indices();

        let make = |allow_lagged: bool| {
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
                allow_lagged,
            );
            TableHolder::new(&placeholder, &population, std::slice::from_ref(&orders), &["orders".to_string()])
                .unwrap()
        };

        // Peripheral carries a target: the closed boundary requires
        // allow_lagged_targets.
        assert_eq!(match_rows(&make(false), 0), Vec::<usize>::new());
        assert_eq!(match_rows(&make(true), 0), vec![0]);
    }

    #[test]
    fn test_no_matches_for_unknown_key() {
        let holder = holder(0.0, 0.0);
        let mut matches = Vec::new();
        // Construct a population row with a key the peripheral lacks.
        let mut join = holder.join(0).clone();
        join.population_key = IntColumn::new("id", vec![7]);
        join.population_ts = Some(FloatColumn::new("ts", vec![100.0]));
        make_matches(&join, 0, &mut matches);
        assert!(matches.is_empty());
    }
}
