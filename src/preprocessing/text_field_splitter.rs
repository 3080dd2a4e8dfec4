//! Explodes text fields into one-word-per-row peripheral tables

use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding, IntColumn, StringColumn};
use crate::data_model::{macros, Subrole};
use crate::error::Result;
use crate::preprocessing::{skip_column, Params, Preprocessor, Transformed};
use crate::textmining::tokenize;
use crate::transpilation::SqlDialect;

/// For every text column, adds a row-id join key to the owning frame and
/// appends a new peripheral table with one row per word, joined back by
/// that row id. The affected columns are recorded for SQL emission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextFieldSplitter {
    /// `(table, column)` pairs split at fit time.
    affected: Vec<(String, String)>,
}

impl TextFieldSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn rowid_name(table: &str) -> String {
        format!("{}{}", macros::ROWID, table)
    }

    fn split_table_name(table: &str, column: &str) -> String {
        format!("{}__{}", table, macros::make_readable(column))
    }

    fn fit_frame(&mut self, frame: &DataFrame) {
        for ix in 0..frame.num_text() {
            let col = frame.text(ix);
            if skip_column(col.subroles(), Subrole::ExcludeTextFieldSplitter) {
                continue;
            }
            self.affected
                .push((frame.name().to_string(), col.name().to_string()));
        }
    }

    /// Adds the row-id key to `frame` (once) and returns the exploded
    /// tables for its affected text columns.
    fn transform_frame(&self, frame: &DataFrame) -> Result<(DataFrame, Vec<DataFrame>)> {
        let affected: Vec<&(String, String)> = self
            .affected
            .iter()
            .filter(|(table, _)| table == frame.name())
            .collect();

        if affected.is_empty() {
            return Ok((frame.clone_as(frame.name()), Vec::new()));
        }

        let mut out = frame.clone_as(frame.name());
        let rowid_name = Self::rowid_name(frame.name());
        if !out.has_join_key(&rowid_name) {
            let rowids: Vec<i64> = (0..frame.nrows() as i64).collect();
            out.add_join_key(IntColumn::new(&rowid_name, rowids))?;
        }

        let mut exploded = Vec::new();
        for (_, colname) in affected {
            let col = frame.text_by_name(colname)?;

            let mut rowids = Vec::new();
            let mut words = Vec::new();
            for (row, cell) in col.iter().enumerate() {
                let Some(text) = cell else { continue };
                for word in tokenize(text) {
                    rowids.push(row as i64);
                    words.push(Some(word));
                }
            }

            let mut table = DataFrame::new(&Self::split_table_name(frame.name(), colname));
            table.add_join_key(IntColumn::new(&rowid_name, rowids))?;
            table.add_text(StringColumn::new(
                &format!("{}{}", macros::TEXT_FIELD, colname),
                words,
            ))?;
            table.create_indices();
            exploded.push(table);
        }

        Ok((out, exploded))
    }
}

impl Preprocessor for TextFieldSplitter {
    fn marker(&self) -> &'static str {
        "TextFieldSplitter"
    }

    fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed> {
        self.affected.clear();
        self.fit_frame(params.population);
        for df in params.peripheral {
            self.fit_frame(df);
        }
        self.transform(params)
    }

    fn transform(&self, params: &Params<'_>) -> Result<Transformed> {
        let (population, mut new_tables) = self.transform_frame(params.population)?;

        let mut peripheral = Vec::new();
        for df in params.peripheral {
            let (transformed, exploded) = self.transform_frame(df)?;
            peripheral.push(transformed);
            new_tables.extend(exploded);
        }
        peripheral.extend(new_tables);

        Ok(Transformed {
            population,
            peripheral,
            warnings: Vec::new(),
        })
    }

    fn to_sql(&self, _categories: &Encoding, dialect: &dyn SqlDialect) -> Vec<String> {
        self.affected
            .iter()
            .map(|(table, colname)| {
                let split_table = Self::split_table_name(table, colname).to_uppercase();
                let source_col = format!(
                    "{}{}{}",
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(colname),
                    dialect.quotechar2()
                );
                let mut sql = dialect.drop_table_if_exists(&split_table);
                sql.push_str(&format!(
                    "CREATE TABLE \"{}\" AS\nSELECT t1.rownum AS \"rowid\",\n       SPLIT_TEXT_FIELD( {} ) AS \"word\"\nFROM \"{}\" t1;\n",
                    split_table,
                    source_col,
                    table.to_uppercase()
                ));
                sql
            })
            .collect()
    }

    fn params_json(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    #[test]
    fn test_explodes_words() {
        let categories = Arc::new(RwLock::new(Encoding::new()));
        let mut df = DataFrame::new("reviews");
        df.add_text(StringColumn::new(
            "comment",
            vec![Some("good product".to_string()), None, Some("bad".to_string())],
        ))
        .unwrap();

        let mut splitter = TextFieldSplitter::new();
        let result = splitter
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();

        // The population gains a row-id join key.
        assert_eq!(result.population.num_join_keys(), 1);

        // One exploded peripheral table, one row per word.
        assert_eq!(result.peripheral.len(), 1);
        let exploded = &result.peripheral[0];
        assert_eq!(exploded.nrows(), 3);
        assert_eq!(exploded.join_key(0).as_slice(), &[0, 0, 2]);
        assert_eq!(
            exploded.text(0).get(0),
            Some("good".to_string())
        );
    }

    #[test]
    fn test_transform_reproduces_split_on_new_data() {
        let categories = Arc::new(RwLock::new(Encoding::new()));
        let mut df = DataFrame::new("reviews");
        df.add_text(StringColumn::new(
            "comment",
            vec![Some("one two".to_string())],
        ))
        .unwrap();

        let mut splitter = TextFieldSplitter::new();
        splitter
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();

        let mut fresh = DataFrame::new("reviews");
        fresh
            .add_text(StringColumn::new(
                "comment",
                vec![Some("three".to_string())],
            ))
            .unwrap();

        let result = splitter
            .transform(&Params {
                population: &fresh,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();
        assert_eq!(result.peripheral[0].nrows(), 1);
    }
}
