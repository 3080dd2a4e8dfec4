//! Target-conditional numeric encodings for categorical columns

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding, FloatColumn};
use crate::data_model::{macros, Subrole};
use crate::error::Result;
use crate::preprocessing::{skip_column, Params, Preprocessor, Transformed};
use crate::transpilation::SqlDialect;

/// For every categorical column of the population table and every target,
/// fits the mapping `category id -> mean(target | id)` and adds it as a
/// numerical column. Ids seen fewer than `min_freq` times fall back to the
/// global target mean, as do unseen ids at transform time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    min_freq: usize,
    /// `(column, target index, global mean, id -> mean)` per fitted pair.
    fitted: Vec<FittedMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedMapping {
    column: String,
    target_num: usize,
    global_mean: f64,
    means: HashMap<i64, f64>,
}

impl Mapping {
    pub fn new(min_freq: usize) -> Self {
        Self {
            min_freq,
            fitted: Vec::new(),
        }
    }

    fn fit_frame(&mut self, frame: &DataFrame) {
        for target_num in 0..frame.num_targets() {
            let target = frame.target(target_num);
            let finite: Vec<f64> = target.iter().copied().filter(|v| !v.is_nan()).collect();
            if finite.is_empty() {
                continue;
            }
            let global_mean = finite.iter().sum::<f64>() / finite.len() as f64;

            for ix in 0..frame.num_categoricals() {
                let col = frame.categorical(ix);
                if skip_column(col.subroles(), Subrole::ExcludeMapping) {
                    continue;
                }

                let mut sums: HashMap<i64, (f64, usize)> = HashMap::new();
                for (row, &id) in col.iter().enumerate() {
                    let y = target.get(row);
                    if id < 0 || y.is_nan() {
                        continue;
                    }
                    let entry = sums.entry(id).or_insert((0.0, 0));
                    entry.0 += y;
                    entry.1 += 1;
                }

                let means: HashMap<i64, f64> = sums
                    .into_iter()
                    .filter(|(_, (_, count))| *count >= self.min_freq.max(1))
                    .map(|(id, (sum, count))| (id, sum / count as f64))
                    .collect();

                if means.is_empty() {
                    continue;
                }

                self.fitted.push(FittedMapping {
                    column: col.name().to_string(),
                    target_num,
                    global_mean,
                    means,
                });
            }
        }
    }

    fn transform_frame(&self, frame: &DataFrame) -> Result<DataFrame> {
        let mut out = frame.clone_as(frame.name());

        for mapping in &self.fitted {
            let Ok(col) = frame.categorical_by_name(&mapping.column) else {
                continue;
            };

            let name = format!(
                "{}{}, target_{}{}",
                macros::MAPPING_BEGIN,
                mapping.column,
                mapping.target_num + 1,
                macros::SEASONAL_END
            );

            let values: Vec<f64> = col
                .iter()
                .map(|&id| *mapping.means.get(&id).unwrap_or(&mapping.global_mean))
                .collect();

            out.add_numerical(FloatColumn::new(&name, values))?;
        }

        Ok(out)
    }
}

impl Preprocessor for Mapping {
    fn marker(&self) -> &'static str {
        "Mapping"
    }

    fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed> {
        self.fitted.clear();
        self.fit_frame(params.population);
        self.transform(params)
    }

    fn transform(&self, params: &Params<'_>) -> Result<Transformed> {
        let population = self.transform_frame(params.population)?;
        Ok(Transformed {
            population,
            peripheral: params.peripheral.to_vec(),
            warnings: Vec::new(),
        })
    }

    fn to_sql(&self, categories: &Encoding, dialect: &dyn SqlDialect) -> Vec<String> {
        self.fitted
            .iter()
            .map(|mapping| {
                let mut ids: Vec<i64> = mapping.means.keys().copied().collect();
                ids.sort_unstable();

                let cases: Vec<String> = ids
                    .iter()
                    .map(|id| {
                        format!(
                            "    WHEN '{}' THEN {}",
                            categories.string(*id),
                            mapping.means[id]
                        )
                    })
                    .collect();

                format!(
                    "SELECT CASE {}{}{}\n{}\n    ELSE {}\nEND AS \"mapping( {}, target_{} )\";\n",
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(&mapping.column),
                    dialect.quotechar2(),
                    cases.join("\n"),
                    mapping.global_mean,
                    dialect.make_staging_table_colname(&mapping.column),
                    mapping.target_num + 1
                )
            })
            .collect()
    }

    fn params_json(&self) -> serde_json::Value {
        serde_json::json!({ "min_freq": self.min_freq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::IntColumn;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn run(min_freq: usize) -> Transformed {
        let categories = Arc::new(RwLock::new(Encoding::new()));
        let ids = {
            let mut enc = categories.write();
            let a = enc.insert("a");
            let b = enc.insert("b");
            vec![a, a, b, b]
        };

        let mut df = DataFrame::new("population");
        df.add_categorical(IntColumn::new("c", ids)).unwrap();
        df.add_target(FloatColumn::new("y", vec![1.0, 3.0, 10.0, 20.0]))
            .unwrap();

        let mut mapping = Mapping::new(min_freq);
        mapping
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap()
    }

    #[test]
    fn test_conditional_means() {
        let result = run(1);
        assert_eq!(result.population.num_numericals(), 1);
        let col = result.population.numerical(0);
        assert_eq!(col.as_slice(), &[2.0, 2.0, 15.0, 15.0]);
    }

    #[test]
    fn test_min_freq_falls_back_to_global_mean() {
        let result = run(3);
        // No category reaches three occurrences, so nothing is fitted.
        assert_eq!(result.population.num_numericals(), 0);
    }
}
