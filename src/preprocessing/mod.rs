//! The preprocessor stack
//!
//! Preprocessors are ordered, composable transforms applied between staging
//! and feature learning. Each one fits on the staged frames, rewrites them
//! into new logical frames (the inputs are never mutated), round-trips
//! through serde, and can emit its effect as SQL.

mod category_trimmer;
mod email_domain;
mod imputation;
mod mapping;
mod seasonal;
mod substring;
mod text_field_splitter;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use category_trimmer::CategoryTrimmer;
pub use email_domain::EmailDomain;
pub use imputation::Imputation;
pub use mapping::Mapping;
pub use seasonal::Seasonal;
pub use substring::Substring;
pub use text_field_splitter::TextFieldSplitter;

use crate::containers::{DataFrame, Encoding};
use crate::data_model::Subrole;
use crate::dependency::{Fingerprint, Warning};
use crate::error::Result;
use crate::transpilation::SqlDialect;

/// Everything a preprocessor sees while fitting or transforming.
pub struct Params<'a> {
    pub population: &'a DataFrame,
    pub peripheral: &'a [DataFrame],
    pub categories: &'a Arc<RwLock<Encoding>>,
}

/// The frames a preprocessor hands back, plus any warnings raised while
/// fitting.
#[derive(Debug)]
pub struct Transformed {
    pub population: DataFrame,
    pub peripheral: Vec<DataFrame>,
    pub warnings: Vec<Warning>,
}

/// The capability set every preprocessor implements.
pub trait Preprocessor {
    /// The tag under which the preprocessor serializes and fingerprints.
    fn marker(&self) -> &'static str;

    /// Fits on the frames and transforms them in one pass.
    fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed>;

    /// Applies the fitted state to new frames.
    fn transform(&self, params: &Params<'_>) -> Result<Transformed>;

    /// SQL statements reproducing the preprocessor's effect.
    fn to_sql(&self, categories: &Encoding, dialect: &dyn SqlDialect) -> Vec<String>;

    /// The preprocessor's hyperparameters as canonical JSON.
    fn params_json(&self) -> serde_json::Value;

    /// The fingerprint over hyperparameters plus input dependencies.
    fn fingerprint(&self, dependencies: Vec<Fingerprint>) -> Fingerprint {
        Fingerprint::Preprocessor {
            marker: self.marker().to_string(),
            params: self.params_json(),
            dependencies,
        }
    }
}

/// The closed set of preprocessors, dispatched as a sum type so fitted
/// pipelines can serialize them without trait objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type_")]
pub enum PreprocessorImpl {
    CategoryTrimmer(CategoryTrimmer),
    EMailDomain(EmailDomain),
    Imputation(Imputation),
    Mapping(Mapping),
    Seasonal(Seasonal),
    Substring(Substring),
    TextFieldSplitter(TextFieldSplitter),
}

impl PreprocessorImpl {
    fn inner(&self) -> &dyn Preprocessor {
        match self {
            PreprocessorImpl::CategoryTrimmer(p) => p,
            PreprocessorImpl::EMailDomain(p) => p,
            PreprocessorImpl::Imputation(p) => p,
            PreprocessorImpl::Mapping(p) => p,
            PreprocessorImpl::Seasonal(p) => p,
            PreprocessorImpl::Substring(p) => p,
            PreprocessorImpl::TextFieldSplitter(p) => p,
        }
    }

    pub fn marker(&self) -> &'static str {
        self.inner().marker()
    }

    pub fn fit_transform(&mut self, params: &Params<'_>) -> Result<Transformed> {
        match self {
            PreprocessorImpl::CategoryTrimmer(p) => p.fit_transform(params),
            PreprocessorImpl::EMailDomain(p) => p.fit_transform(params),
            PreprocessorImpl::Imputation(p) => p.fit_transform(params),
            PreprocessorImpl::Mapping(p) => p.fit_transform(params),
            PreprocessorImpl::Seasonal(p) => p.fit_transform(params),
            PreprocessorImpl::Substring(p) => p.fit_transform(params),
            PreprocessorImpl::TextFieldSplitter(p) => p.fit_transform(params),
        }
    }

    pub fn transform(&self, params: &Params<'_>) -> Result<Transformed> {
        self.inner().transform(params)
    }

    pub fn to_sql(&self, categories: &Encoding, dialect: &dyn SqlDialect) -> Vec<String> {
        self.inner().to_sql(categories, dialect)
    }

    pub fn fingerprint(&self, dependencies: Vec<Fingerprint>) -> Fingerprint {
        self.inner().fingerprint(dependencies)
    }
}

/// Whether a column is off-limits for the component identified by
/// `component_exclude`.
pub(crate) fn skip_column(subroles: &std::collections::BTreeSet<Subrole>, component_exclude: Subrole) -> bool {
    subroles
        .iter()
        .any(|s| s.excludes_all_preprocessors() || *s == component_exclude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impl_roundtrips_through_serde() {
        let preprocessor = PreprocessorImpl::CategoryTrimmer(CategoryTrimmer::new(10, 2));
        let json = serde_json::to_string(&preprocessor).unwrap();
        assert!(json.contains("\"type_\":\"CategoryTrimmer\""));
        let back: PreprocessorImpl = serde_json::from_str(&json).unwrap();
        assert_eq!(back.marker(), "CategoryTrimmer");
    }

    #[test]
    fn test_fingerprint_embeds_dependencies() {
        let preprocessor = PreprocessorImpl::Imputation(Imputation::new(true));
        let dep = Fingerprint::DataFrame {
            name: "population".to_string(),
            last_change: 1,
        };
        let a = preprocessor.fingerprint(vec![dep]);
        let b = preprocessor.fingerprint(vec![]);
        assert_ne!(a.hash_hex(), b.hash_hex());
    }
}
