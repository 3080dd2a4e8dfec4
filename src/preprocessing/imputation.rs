//! Mean imputation for numerical columns

use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding, FloatColumn};
use crate::data_model::{macros, Subrole};
use crate::error::{RelpropError, Result};
use crate::fastprop::{ColumnDescription, Marker};
use crate::preprocessing::{skip_column, Params, Preprocessor, Transformed};
use crate::transpilation::SqlDialect;

/// Replaces NaN cells of numerical columns with the fitted column mean.
/// With `add_dummies`, a 0/1 indicator column records which cells were
/// imputed. Columns that are entirely NaN or contain infinities are
/// rejected as user errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Imputation {
    add_dummies: bool,
    means: Vec<(ColumnDescription, f64)>,
}

impl Imputation {
    pub fn new(add_dummies: bool) -> Self {
        Self {
            add_dummies,
            means: Vec::new(),
        }
    }

    fn fit_frame(&mut self, frame: &DataFrame, marker: Marker) -> Result<()> {
        for ix in 0..frame.num_numericals() {
            let col = frame.numerical(ix);
            if skip_column(col.subroles(), Subrole::ExcludeImputation) {
                continue;
            }

            if col.iter().any(|v| v.is_infinite()) {
                return Err(RelpropError::UserInput(format!(
                    "Column '{}' in table '{}' contains infinite values and cannot be imputed.",
                    macros::make_readable(col.name()),
                    frame.name()
                )));
            }

            let finite: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
            let has_nan = finite.len() < col.len();
            if !has_nan {
                continue;
            }
            if finite.is_empty() {
                return Err(RelpropError::UserInput(format!(
                    "Column '{}' in table '{}' contains no non-null values, so there is nothing to impute from.",
                    macros::make_readable(col.name()),
                    frame.name()
                )));
            }

            let mean = finite.iter().sum::<f64>() / finite.len() as f64;
            self.means
                .push((ColumnDescription::new(marker, frame.name(), col.name()), mean));
        }
        Ok(())
    }

    fn transform_frame(&self, frame: &DataFrame, marker: Marker) -> Result<DataFrame> {
        let mut out = frame.clone_as(frame.name());

        for ix in 0..out.num_numericals() {
            let (name, readable) = {
                let col = out.numerical(ix);
                (col.name().to_string(), macros::make_readable(col.name()))
            };
            let Some((_, mean)) = self
                .means
                .iter()
                .find(|(desc, _)| desc.marker == marker && desc.table == frame.name() && desc.column == readable)
            else {
                continue;
            };

            let original = out.numerical(ix).as_slice().to_vec();
            let imputed: Vec<f64> = original
                .iter()
                .map(|v| if v.is_nan() { *mean } else { *v })
                .collect();

            let mut col = out.numerical(ix).clone();
            *col.data_mut() = imputed;
            out.replace_numerical(ix, col)?;

            if self.add_dummies {
                let dummy_name = format!(
                    "{}{}{}",
                    macros::IMPUTATION_DUMMY_BEGIN,
                    name,
                    macros::SEASONAL_END
                );
                let dummies: Vec<f64> = original
                    .iter()
                    .map(|v| if v.is_nan() { 1.0 } else { 0.0 })
                    .collect();
                out.add_numerical(FloatColumn::new(&dummy_name, dummies))?;
            }
        }

        Ok(out)
    }
}

impl Preprocessor for Imputation {
    fn marker(&self) -> &'static str {
        "Imputation"
    }

    fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed> {
        self.means.clear();
        self.fit_frame(params.population, Marker::Population)?;
        for df in params.peripheral {
            self.fit_frame(df, Marker::Peripheral)?;
        }
        self.transform(params)
    }

    fn transform(&self, params: &Params<'_>) -> Result<Transformed> {
        let population = self.transform_frame(params.population, Marker::Population)?;
        let peripheral = params
            .peripheral
            .iter()
            .map(|df| self.transform_frame(df, Marker::Peripheral))
            .collect::<Result<Vec<_>>>()?;

        Ok(Transformed {
            population,
            peripheral,
            warnings: Vec::new(),
        })
    }

    fn to_sql(&self, _categories: &Encoding, dialect: &dyn SqlDialect) -> Vec<String> {
        self.means
            .iter()
            .map(|(desc, mean)| {
                let col = format!(
                    "{}{}{}",
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(&desc.column),
                    dialect.quotechar2()
                );
                format!(
                    "UPDATE \"{}\" SET {} = {} WHERE {} IS NULL;\n",
                    desc.table.to_uppercase(),
                    col,
                    mean,
                    col
                )
            })
            .collect()
    }

    fn params_json(&self) -> serde_json::Value {
        serde_json::json!({ "add_dummies": self.add_dummies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::Encoding;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn params_frame(values: Vec<f64>) -> DataFrame {
        let mut df = DataFrame::new("population");
        df.add_numerical(FloatColumn::new("x", values)).unwrap();
        df
    }

    fn run(df: &DataFrame, add_dummies: bool) -> Result<Transformed> {
        let categories = Arc::new(RwLock::new(Encoding::new()));
        let mut imputation = Imputation::new(add_dummies);
        imputation.fit_transform(&Params {
            population: df,
            peripheral: &[],
            categories: &categories,
        })
    }

    #[test]
    fn test_replaces_nan_with_mean() {
        let df = params_frame(vec![1.0, f64::NAN, 3.0]);
        let result = run(&df, false).unwrap();
        assert_eq!(result.population.numerical(0).as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dummy_column() {
        let df = params_frame(vec![1.0, f64::NAN, 3.0]);
        let result = run(&df, true).unwrap();
        assert_eq!(result.population.num_numericals(), 2);
        assert_eq!(result.population.numerical(1).as_slice(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_all_nan_rejected() {
        let df = params_frame(vec![f64::NAN, f64::NAN]);
        let err = run(&df, false).unwrap_err();
        assert!(err.to_string().contains("nothing to impute"));
    }

    #[test]
    fn test_infinity_rejected() {
        let df = params_frame(vec![1.0, f64::INFINITY, f64::NAN]);
        let err = run(&df, false).unwrap_err();
        assert!(err.to_string().contains("infinite"));
    }

    #[test]
    fn test_untouched_without_nan() {
        let df = params_frame(vec![1.0, 2.0]);
        let result = run(&df, true).unwrap();
        assert_eq!(result.population.num_numericals(), 1);
    }
}
