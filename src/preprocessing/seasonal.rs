//! Seasonal component extraction from time stamps

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding, FloatColumn, IntColumn};
use crate::data_model::{macros, Subrole};
use crate::dependency::Warning;
use crate::error::Result;
use crate::preprocessing::{skip_column, Params, Preprocessor, Transformed};
use crate::transpilation::SqlDialect;

/// The seasonal components, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Component {
    Hour,
    Minute,
    Month,
    Weekday,
    Year,
}

impl Component {
    fn all() -> [Component; 5] {
        [
            Component::Hour,
            Component::Minute,
            Component::Month,
            Component::Weekday,
            Component::Year,
        ]
    }

    fn marker(&self) -> &'static str {
        match self {
            Component::Hour => macros::HOUR_BEGIN,
            Component::Minute => macros::MINUTE_BEGIN,
            Component::Month => macros::MONTH_BEGIN,
            Component::Weekday => macros::WEEKDAY_BEGIN,
            Component::Year => macros::YEAR_BEGIN,
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Component::Hour => "hour",
            Component::Minute => "minute",
            Component::Month => "month",
            Component::Weekday => "weekday",
            Component::Year => "year",
        }
    }

    /// Extracts the component from epoch seconds. Categorical components
    /// come back zero-padded so lexical order equals numeric order.
    fn extract(&self, epoch_seconds: f64) -> Option<String> {
        if epoch_seconds.is_nan() {
            return None;
        }
        let dt = DateTime::from_timestamp(epoch_seconds as i64, 0)?;
        Some(match self {
            Component::Hour => format!("{:02}", dt.hour()),
            Component::Minute => format!("{:02}", dt.minute()),
            Component::Month => format!("{:02}", dt.month()),
            Component::Weekday => format!("{}", dt.weekday().number_from_monday()),
            Component::Year => format!("{}", dt.year()),
        })
    }
}

/// Derives categorical hour/minute/month/weekday columns and a numerical
/// year column from every user-supplied time stamp. Components that come
/// out constant on the fit data are dropped with a warning instead of
/// producing a useless column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seasonal {
    /// Per `(table, time stamp)` the components that survived fitting.
    enabled: Vec<(String, String, Vec<Component>)>,
}

impl Seasonal {
    pub fn new() -> Self {
        Self::default()
    }

    fn fit_frame(&mut self, frame: &DataFrame, warnings: &mut Vec<Warning>) {
        for ix in 0..frame.num_time_stamps() {
            let col = frame.time_stamp(ix);
            if macros::is_generated(col.name()) {
                continue;
            }
            if skip_column(col.subroles(), Subrole::ExcludeSeasonal) {
                continue;
            }

            let mut components = Vec::new();
            for component in Component::all() {
                let mut values = col.iter().filter_map(|&v| component.extract(v));
                let first = values.next();
                let constant = match &first {
                    None => true,
                    Some(first) => values.all(|v| v == *first),
                };
                if constant {
                    let derived = format!(
                        "{}{}{}",
                        component.marker(),
                        col.name(),
                        macros::SEASONAL_END
                    );
                    warnings.push(Warning::constant_column(
                        frame.name(),
                        &macros::make_readable(&derived),
                    ));
                    continue;
                }
                components.push(component);
            }

            if !components.is_empty() {
                self.enabled
                    .push((frame.name().to_string(), col.name().to_string(), components));
            }
        }
    }

    fn transform_frame(&self, frame: &DataFrame, params: &Params<'_>) -> Result<DataFrame> {
        let mut out = frame.clone_as(frame.name());

        for (table, ts_name, components) in &self.enabled {
            if table != frame.name() {
                continue;
            }
            let col = frame.time_stamp_by_name(ts_name)?.clone();

            for component in components {
                let name = format!("{}{}{}", component.marker(), ts_name, macros::SEASONAL_END);

                if *component == Component::Year {
                    let years: Vec<f64> = col
                        .iter()
                        .map(|&v| {
                            component
                                .extract(v)
                                .and_then(|s| s.parse::<f64>().ok())
                                .unwrap_or(f64::NAN)
                        })
                        .collect();
                    let mut year_col = FloatColumn::new(&name, years);
                    year_col.set_unit(component.unit());
                    out.add_numerical(year_col)?;
                } else {
                    let ids: Vec<i64> = {
                        let mut enc = params.categories.write();
                        col.iter()
                            .map(|&v| match component.extract(v) {
                                Some(s) => enc.insert(&s),
                                None => crate::containers::NULL_INT,
                            })
                            .collect()
                    };
                    let mut cat_col = IntColumn::new(&name, ids);
                    cat_col.set_unit(component.unit());
                    out.add_categorical(cat_col)?;
                }
            }
        }

        Ok(out)
    }
}

impl Preprocessor for Seasonal {
    fn marker(&self) -> &'static str {
        "Seasonal"
    }

    fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed> {
        self.enabled.clear();
        let mut warnings = Vec::new();
        self.fit_frame(params.population, &mut warnings);
        for df in params.peripheral {
            self.fit_frame(df, &mut warnings);
        }

        let mut transformed = self.transform(params)?;
        transformed.warnings = warnings;
        Ok(transformed)
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
        self.enabled
            .iter()
            .flat_map(|(table, ts_name, components)| {
                let table = table.clone();
                let ts = format!(
                    "{}{}{}",
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(ts_name),
                    dialect.quotechar2()
                );
                components
                    .iter()
                    .map(move |component| {
                        let derived = format!(
                            "{}{}{}",
                            component.marker(),
                            ts_name,
                            macros::SEASONAL_END
                        );
                        format!(
                            "ALTER TABLE \"{}\" ADD COLUMN {}{}{} AS ( STRFTIME( '{}', {} ) );\n",
                            table.to_uppercase(),
                            dialect.quotechar1(),
                            dialect.make_staging_table_colname(&derived),
                            dialect.quotechar2(),
                            match component {
                                Component::Hour => "%H",
                                Component::Minute => "%M",
                                Component::Month => "%m",
                                Component::Weekday => "%u",
                                Component::Year => "%Y",
                            },
                            ts
                        )
                    })
                    .collect::<Vec<_>>()
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

    // 2020-01-15 00:00:00 UTC and 2020-02-20 00:00:00 UTC.
    const JAN_15: f64 = 1579046400.0;
    const FEB_20: f64 = 1582156800.0;

    fn run(values: Vec<f64>) -> (Transformed, Arc<RwLock<Encoding>>) {
        let categories = Arc::new(RwLock::new(Encoding::new()));
        let mut df = DataFrame::new("population");
        df.add_time_stamp(FloatColumn::new("ts", values)).unwrap();

        let mut seasonal = Seasonal::new();
        let result = seasonal
            .fit_transform(&Params {
                population: &df,
                peripheral: &[],
                categories: &categories,
            })
            .unwrap();
        (result, categories)
    }

    #[test]
    fn test_month_extraction_zero_padded() {
        let (result, categories) = run(vec![JAN_15, FEB_20]);
        let name = format!("{}ts{}", macros::MONTH_BEGIN, macros::SEASONAL_END);
        let col = result
            .population
            .categorical_by_name(&name)
            .expect("month column missing");
        let enc = categories.read();
        let values: Vec<&str> = col.iter().map(|&id| enc.string(id)).collect();
        assert_eq!(values, vec!["01", "02"]);
    }

    #[test]
    fn test_constant_component_warns_and_skips() {
        // Same month on both rows: the month column is dropped with a
        // warning, but the weekday still differs.
        let (result, _) = run(vec![JAN_15, JAN_15 + 86400.0]);
        let month = format!("{}ts{}", macros::MONTH_BEGIN, macros::SEASONAL_END);
        assert!(result.population.categorical_by_name(&month).is_err());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("month( ts )")));
    }

    #[test]
    fn test_year_is_numerical() {
        let (result, _) = run(vec![JAN_15, FEB_20 + 366.0 * 86400.0]);
        let name = format!("{}ts{}", macros::YEAR_BEGIN, macros::SEASONAL_END);
        let col = result.population.numerical_by_name(&name).unwrap();
        assert_eq!(col.as_slice(), &[2020.0, 2021.0]);
    }
}
