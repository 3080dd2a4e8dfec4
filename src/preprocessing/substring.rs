//! Fixed-position substring extraction

use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding, IntColumn};
use crate::data_model::{macros, Subrole};
use crate::error::Result;
use crate::preprocessing::{Params, Preprocessor, Transformed};
use crate::transpilation::SqlDialect;

/// Extracts `length` characters starting at `begin` from every text column
/// whose unit matches `unit`, adding the result as a categorical column.
/// Only columns marked `substring_only` (or carrying the matching unit)
/// participate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substring {
    begin: usize,
    length: usize,
    unit: String,
    fitted: Vec<(String, String)>,
}

impl Substring {
    pub fn new(begin: usize, length: usize, unit: &str) -> Self {
        Self {
            begin,
            length,
            unit: unit.to_string(),
            fitted: Vec::new(),
        }
    }

    fn eligible(&self, unit: &str, subroles: &std::collections::BTreeSet<Subrole>) -> bool {
        subroles.contains(&Subrole::SubstringOnly) || (!self.unit.is_empty() && unit == self.unit)
    }

    fn extract(&self, value: &str) -> Option<String> {
        let chars: Vec<char> = value.chars().collect();
        if self.begin >= chars.len() {
            return None;
        }
        let end = (self.begin + self.length).min(chars.len());
        Some(chars[self.begin..end].iter().collect())
    }

    fn fit_frame(&mut self, frame: &DataFrame) {
        for ix in 0..frame.num_text() {
            let col = frame.text(ix);
            if self.eligible(col.unit(), col.subroles()) {
                self.fitted
                    .push((frame.name().to_string(), col.name().to_string()));
            }
        }
    }

    fn transform_frame(&self, frame: &DataFrame, params: &Params<'_>) -> Result<DataFrame> {
        let mut out = frame.clone_as(frame.name());

        for (table, colname) in &self.fitted {
            if table != frame.name() {
                continue;
            }
            let Ok(col) = out.text_by_name(colname) else {
                continue;
            };
            let col = col.clone();

            let name = format!(
                "{}{}, {}, {}{}",
                macros::SUBSTRING_BEGIN,
                colname,
                self.begin,
                self.length,
                macros::SEASONAL_END
            );

            let ids: Vec<i64> = {
                let mut enc = params.categories.write();
                col.iter()
                    .map(|cell| {
                        match cell.as_deref().and_then(|s| self.extract(s)) {
                            Some(sub) => enc.insert(&sub),
                            None => crate::containers::NULL_INT,
                        }
                    })
                    .collect()
            };

            let mut sub_col = IntColumn::new(&name, ids);
            sub_col.set_unit(&self.unit);
            out.add_categorical(sub_col)?;
        }

        Ok(out)
    }
}

impl Preprocessor for Substring {
    fn marker(&self) -> &'static str {
        "Substring"
    }

    fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed> {
        self.fitted.clear();
        self.fit_frame(params.population);
        for df in params.peripheral {
            self.fit_frame(df);
        }
        self.transform(params)
    }

    fn transform(&self, params: &Params<'_>) -> Result<Transformed> {
        let population = self.transform_frame(params.population, params)?;
        let peripheral = params
            .peripheral
            .iter()
            .map(|df| self.transform_frame(df, params))
            .collect::<Result<Vec<_>>>()?;

        Ok(Transformed {
            population,
            peripheral,
            warnings: Vec::new(),
        })
    }

    fn to_sql(&self, _categories: &Encoding, dialect: &dyn SqlDialect) -> Vec<String> {
        self.fitted
            .iter()
            .map(|(table, colname)| {
                format!(
                    "ALTER TABLE \"{}\" ADD COLUMN \"substring( {}, {}, {} )\" AS ( SUBSTR( {}{}{}, {}, {} ) );\n",
                    table.to_uppercase(),
                    dialect.make_staging_table_colname(colname),
                    self.begin,
                    self.length,
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(colname),
                    dialect.quotechar2(),
                    self.begin + 1,
                    self.length
                )
            })
            .collect()
    }

    fn params_json(&self) -> serde_json::Value {
        serde_json::json!({
            "begin": self.begin,
            "length": self.length,
            "unit": self.unit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::StringColumn;
    use parking_lot::RwLock;
    use std::sync::Arc;

    #[test]
    fn test_extracts_prefix_by_unit() {
        let categories = Arc::new(RwLock::new(Encoding::new()));

        let col = StringColumn::new(
            "zip",
            vec![Some("10115 Berlin".to_string()), Some("80331".to_string()), None],
        )
        .with_unit("zip code");

        let mut df = DataFrame::new("population");
        df.add_text(col).unwrap();

        let mut preprocessor = Substring::new(0, 2, "zip code");
        let result = preprocessor
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();

        let enc = categories.read();
        let sub = result.population.categorical(0);
        assert_eq!(enc.string(sub.get(0)), "10");
        assert_eq!(enc.string(sub.get(1)), "80");
        assert!(sub.is_null(2));
    }

    #[test]
    fn test_out_of_range_is_null() {
        let categories = Arc::new(RwLock::new(Encoding::new()));
        let col = StringColumn::new("zip", vec![Some("x".to_string())]).with_unit("zip code");
        let mut df = DataFrame::new("population");
        df.add_text(col).unwrap();

        let mut preprocessor = Substring::new(3, 2, "zip code");
        let result = preprocessor
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();
        assert!(result.population.categorical(0).is_null(0));
    }
}
