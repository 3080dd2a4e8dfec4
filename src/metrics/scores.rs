//! Score history of a fitted pipeline

use serde::{Deserialize, Serialize};

use crate::metrics::{ClassificationSummary, RegressionSummary};

/// One scoring pass over one data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    /// The population frame the pipeline was scored on.
    pub set_used: String,
    /// One entry per target.
    pub regression: Vec<RegressionSummary>,
    /// One entry per target; empty unless the pipeline is a classifier.
    pub classification: Vec<ClassificationSummary>,
}

/// Accumulated scoring history. Every `score` command appends a new
/// [`ScoreSet`]; the latest one is what clients display by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    history: Vec<ScoreSet>,
}

impl Scores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, set: ScoreSet) {
        self.history.push(set);
    }

    pub fn latest(&self) -> Option<&ScoreSet> {
        self.history.last()
    }

    pub fn history(&self) -> &[ScoreSet] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_appends() {
        let mut scores = Scores::new();
        scores.push(ScoreSet {
            set_used: "train".to_string(),
            regression: vec![RegressionSummary::calculate(&[1.0], &[1.0])],
            classification: Vec::new(),
        });
        scores.push(ScoreSet {
            set_used: "test".to_string(),
            regression: vec![RegressionSummary::calculate(&[1.0], &[2.0])],
            classification: Vec::new(),
        });
        assert_eq!(scores.len(), 2);
        assert_eq!(scores.latest().unwrap().set_used, "test");
    }
}
