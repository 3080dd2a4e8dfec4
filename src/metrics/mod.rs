//! Scoring summaries for fitted pipelines

mod classification;
mod regression;
mod scores;

pub use classification::ClassificationSummary;
pub use regression::RegressionSummary;
pub use scores::{ScoreSet, Scores};
