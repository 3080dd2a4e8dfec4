//! Collapses rare categories into the trimmed sentinel

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding, IntColumn};
use crate::data_model::Subrole;
use crate::error::Result;
use crate::fastprop::{ColumnDescription, Marker};
use crate::preprocessing::{skip_column, Params, Preprocessor, Transformed};
use crate::transpilation::SqlDialect;

/// Maximum rows per generated `INSERT INTO` statement.
const INSERT_BATCH: usize = 500;

/// Keeps, per categorical column, the `max_num_categories` most frequent
/// categories whose count reaches `min_freq`; every other value is
/// rewritten to the trimmed id (0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTrimmer {
    max_num_categories: usize,
    min_freq: usize,
    population_sets: Vec<(ColumnDescription, BTreeSet<i64>)>,
    peripheral_sets: Vec<Vec<(ColumnDescription, BTreeSet<i64>)>>,
}

impl CategoryTrimmer {
    pub fn new(max_num_categories: usize, min_freq: usize) -> Self {
        Self {
            max_num_categories,
            min_freq,
            population_sets: Vec::new(),
            peripheral_sets: Vec::new(),
        }
    }

    fn fit_frame(&self, frame: &DataFrame, marker: Marker) -> Vec<(ColumnDescription, BTreeSet<i64>)> {
        let mut sets = Vec::new();
        for ix in 0..frame.num_categoricals() {
            let col = frame.categorical(ix);
            if skip_column(col.subroles(), Subrole::ExcludeCategoryTrimmer) {
                continue;
            }
            sets.push((
                ColumnDescription::new(marker, frame.name(), col.name()),
                self.fit_column(col),
            ));
        }
        sets
    }

    fn fit_column(&self, col: &IntColumn) -> BTreeSet<i64> {
        let mut frequencies: HashMap<i64, usize> = HashMap::new();
        for &id in col.iter() {
            if id >= 0 {
                *frequencies.entry(id).or_insert(0) += 1;
            }
        }

        let mut pairs: Vec<(i64, usize)> = frequencies
            .into_iter()
            .filter(|(_, count)| *count >= self.min_freq)
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        pairs
            .into_iter()
            .take(self.max_num_categories)
            .map(|(id, _)| id)
            .collect()
    }

    fn transform_frame(
        frame: &DataFrame,
        sets: &[(ColumnDescription, BTreeSet<i64>)],
    ) -> Result<DataFrame> {
        let mut out = frame.clone_as(frame.name());
        for ix in 0..out.num_categoricals() {
            let name = out.categorical(ix).name().to_string();
            let Some((_, kept)) = sets.iter().find(|(desc, _)| desc.column == name) else {
                continue;
            };
            let rewritten: Vec<i64> = out
                .categorical(ix)
                .iter()
                .map(|&id| if id < 0 || kept.contains(&id) { id } else { 0 })
                .collect();
            let mut col = out.categorical(ix).clone();
            *col.data_mut() = rewritten;
            out.replace_categorical(ix, col)?;
        }
        Ok(out)
    }
}

impl Preprocessor for CategoryTrimmer {
    fn marker(&self) -> &'static str {
        "CategoryTrimmer"
    }

    fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed> {
        self.population_sets = self.fit_frame(params.population, Marker::Population);
        self.peripheral_sets = params
            .peripheral
            .iter()
            .map(|df| self.fit_frame(df, Marker::Peripheral))
            .collect();
        self.transform(params)
    }

    fn transform(&self, params: &Params<'_>) -> Result<Transformed> {
        let population = Self::transform_frame(params.population, &self.population_sets)?;
        let peripheral = params
            .peripheral
            .iter()
            .zip(self.peripheral_sets.iter())
            .map(|(df, sets)| Self::transform_frame(df, sets))
            .collect::<Result<Vec<_>>>()?;

        Ok(Transformed {
            population,
            peripheral,
            warnings: Vec::new(),
        })
    }

    fn to_sql(&self, categories: &Encoding, dialect: &dyn SqlDialect) -> Vec<String> {
        let all_sets = self
            .population_sets
            .iter()
            .chain(self.peripheral_sets.iter().flatten());

        let mut statements = Vec::new();

        for (desc, kept) in all_sets {
            let mapping_table = format!(
                "{}__MAPPING_{}",
                desc.table.to_uppercase(),
                dialect
                    .make_staging_table_colname(&desc.column)
                    .to_uppercase()
                    .replace(' ', "_")
            );

            let mut sql = dialect.trimming_header(&mapping_table);

            let rows: Vec<(String, String)> = kept
                .iter()
                .map(|&id| {
                    let s = categories.string(id).to_string();
                    (s.clone(), s)
                })
                .collect();

            for batch in rows.chunks(INSERT_BATCH) {
                sql.push_str(&dialect.trimming_insert_into(&mapping_table, batch));
            }

            sql.push_str(&format!(
                "-- replace: {}\n",
                dialect.trimming_join(&mapping_table, &desc.column)
            ));

            statements.push(sql);
        }

        statements
    }

    fn params_json(&self) -> serde_json::Value {
        serde_json::json!({
            "max_num_categories": self.max_num_categories,
            "min_freq": self.min_freq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn setup() -> (DataFrame, Arc<RwLock<Encoding>>) {
        let categories = Arc::new(RwLock::new(Encoding::new()));
        let ids: Vec<i64> = {
            let mut enc = categories.write();
            vec![
                enc.insert("a"),
                enc.insert("a"),
                enc.insert("b"),
                enc.insert("c"),
            ]
        };
        let mut df = DataFrame::new("population");
        df.add_categorical(IntColumn::new("c", ids)).unwrap();
        (df, categories)
    }

    #[test]
    fn test_keeps_most_frequent() {
        let (df, categories) = setup();
        let mut trimmer = CategoryTrimmer::new(1, 1);
        let result = trimmer
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();

        let enc = categories.read();
        let a = enc.int("a");
        let col = result.population.categorical(0);
        assert_eq!(col.as_slice(), &[a, a, 0, 0]);
    }

    #[test]
    fn test_min_freq_gate() {
        let (df, categories) = setup();
        let mut trimmer = CategoryTrimmer::new(10, 2);
        let result = trimmer
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();

        // Only 'a' appears twice.
        let enc = categories.read();
        let a = enc.int("a");
        assert_eq!(result.population.categorical(0).as_slice(), &[a, a, 0, 0]);
    }

    #[test]
    fn test_input_frame_untouched() {
        let (df, categories) = setup();
        let before = df.last_change();
        let mut trimmer = CategoryTrimmer::new(1, 1);
        trimmer
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();
        assert_eq!(df.last_change(), before);
        let enc = categories.read();
        assert_eq!(df.categorical(0).get(3), enc.int("c"));
    }

    #[test]
    fn test_sql_emits_mapping_table() {
        let (df, categories) = setup();
        let mut trimmer = CategoryTrimmer::new(1, 1);
        trimmer
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();
        let sql = trimmer.to_sql(&categories.read(), &crate::transpilation::HumanReadableSql);
        assert_eq!(sql.len(), 1);
        assert!(sql[0].contains("POPULATION__MAPPING_C"));
        assert!(sql[0].contains("INSERT INTO"));
        assert!(sql[0].contains("(trimmed)"));
    }
}
