//! Extracts the domain part of email address columns

use serde::{Deserialize, Serialize};

use crate::containers::{DataFrame, Encoding, IntColumn};
use crate::data_model::{macros, Subrole};
use crate::error::Result;
use crate::preprocessing::{Params, Preprocessor, Transformed};
use crate::transpilation::SqlDialect;

/// Adds a categorical domain column for every text column marked
/// `email_only`. Inclusion is subrole-driven: unlike the other
/// preprocessors, this one only touches columns that opted in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailDomain {
    /// `(table, column)` pairs found eligible at fit time.
    fitted: Vec<(String, String)>,
}

impl EmailDomain {
    pub fn new() -> Self {
        Self::default()
    }

    fn domain_of(value: &str) -> Option<String> {
        let at = value.rfind('@')?;
        let domain = &value[at + 1..];
        if domain.is_empty() {
            return None;
        }
        Some(domain.to_lowercase())
    }

    fn fit_frame(&mut self, frame: &DataFrame) {
        for ix in 0..frame.num_text() {
            let col = frame.text(ix);
            if !col.has_subrole(Subrole::EmailOnly) {
                continue;
            }
            self.fitted
                .push((frame.name().to_string(), col.name().to_string()));
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
                "{}{}{}",
                macros::EMAIL_DOMAIN_BEGIN,
                colname,
                macros::SEASONAL_END
            );

            let ids: Vec<i64> = {
                let mut enc = params.categories.write();
                col.iter()
                    .map(|cell| match cell.as_deref().and_then(Self::domain_of) {
                        Some(domain) => enc.insert(&domain),
                        None => crate::containers::NULL_INT,
                    })
                    .collect()
            };

            let mut domain_col = IntColumn::new(&name, ids);
            domain_col.set_unit("email domain");
            out.add_categorical(domain_col)?;
        }

        Ok(out)
    }
}

impl Preprocessor for EmailDomain {
    fn marker(&self) -> &'static str {
        "EMailDomain"
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
                let derived = format!(
                    "{}{}{}",
                    macros::EMAIL_DOMAIN_BEGIN,
                    colname,
                    macros::SEASONAL_END
                );
                format!(
                    "ALTER TABLE \"{}\" ADD COLUMN {}{}{} AS ( LOWER( SUBSTR( {}{}{}, INSTR( {}{}{}, '@' ) + 1 ) ) );\n",
                    table.to_uppercase(),
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(&derived),
                    dialect.quotechar2(),
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(colname),
                    dialect.quotechar2(),
                    dialect.quotechar1(),
                    dialect.make_staging_table_colname(colname),
                    dialect.quotechar2()
                )
            })
            .collect()
    }

    fn params_json(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}
