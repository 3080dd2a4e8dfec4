//! The contract consumed from external predictor implementations

use std::sync::Arc;

use ndarray::Array2;

use crate::error::Result;

/// A trainable predictor over the feature matrix.
///
/// Concrete algorithms (linear models, gradient boosting) live outside this
/// crate; the pipeline only relies on this surface. One instance is fitted
/// per target.
pub trait Predictor: Send + Sync {
    /// The tag under which the predictor fingerprints.
    fn marker(&self) -> &'static str;

    fn fit(&mut self, features: &Array2<f64>, target: &[f64]) -> Result<()>;

    fn predict(&self, features: &Array2<f64>) -> Result<Vec<f64>>;

    /// Non-negative importance per feature column; an empty vector means
    /// the predictor does not expose importances.
    fn feature_importances(&self) -> Vec<f64>;

    /// The hyperparameters as canonical JSON, for fingerprinting.
    fn params_json(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Creates one fresh predictor per target at fit time.
pub type PredictorFactory = Arc<dyn Fn() -> Box<dyn Predictor> + Send + Sync>;
