//! FastProp hyperparameters

use serde::{Deserialize, Serialize};

use crate::error::{RelpropError, Result};
use crate::fastprop::Aggregation;

/// The loss function. FastProp itself is unsupervised; the loss only decides
/// whether downstream scoring treats the problem as classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossFunction {
    CrossEntropyLoss,
    SquareLoss,
}

/// Hyperparameters of the FastProp feature learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// The aggregations that may be used.
    pub aggregation: Vec<Aggregation>,

    /// Size of the moving time windows for lag conditions.
    pub delta_t: f64,

    pub loss_function: LossFunction,

    /// The number of lag bands `[k * delta_t, (k+1) * delta_t)` generated.
    pub max_lag: usize,

    /// Minimum document frequency for a word to enter the vocabulary.
    pub min_df: usize,

    /// How many of the most frequent categories get pinned features and
    /// equality conditions.
    pub n_most_frequent: usize,

    /// The maximum number of features kept after selection.
    pub num_features: usize,

    /// Worker threads; anything below 1 lets the engine decide.
    pub num_threads: i64,

    /// Share of population rows sampled for fitting. 1 disables sampling.
    pub sampling_factor: f64,

    /// Suppresses progress logging.
    pub silent: bool,

    /// The maximum size of the vocabulary per text column.
    pub vocab_size: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            aggregation: vec![
                Aggregation::Avg,
                Aggregation::Count,
                Aggregation::Max,
                Aggregation::Min,
                Aggregation::Sum,
            ],
            delta_t: 0.0,
            loss_function: LossFunction::SquareLoss,
            max_lag: 0,
            min_df: 30,
            n_most_frequent: 0,
            num_features: 200,
            num_threads: 0,
            sampling_factor: 1.0,
            silent: true,
            vocab_size: 500,
        }
    }
}

impl Hyperparameters {
    /// Validates the pairing rules between parameters.
    pub fn check(&self) -> Result<()> {
        if self.delta_t <= 0.0 && self.max_lag > 0 {
            return Err(RelpropError::UserInput(
                "FastProp: If you pass a max_lag, you must also pass a delta_t that is greater than 0.".to_string(),
            ));
        }
        if self.delta_t > 0.0 && self.max_lag == 0 {
            return Err(RelpropError::UserInput(
                "FastProp: If you pass a delta_t, you must also pass a max_lag that is greater than 0.".to_string(),
            ));
        }
        if self.sampling_factor <= 0.0 || self.sampling_factor > 1.0 {
            return Err(RelpropError::UserInput(format!(
                "FastProp: sampling_factor must be in (0, 1], got {}.",
                self.sampling_factor
            )));
        }
        if self.num_features == 0 {
            return Err(RelpropError::UserInput(
                "FastProp: num_features must be positive.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_classification(&self) -> bool {
        self.loss_function == LossFunction::CrossEntropyLoss
    }

    pub fn has_count(&self) -> bool {
        self.aggregation.contains(&Aggregation::Count)
    }

    /// The effective worker count: `max(2, cores / 2)` unless pinned.
    pub fn effective_num_threads(&self) -> usize {
        if self.num_threads <= 0 {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(2)
        } else {
            self.num_threads as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass_check() {
        assert!(Hyperparameters::default().check().is_ok());
    }

    #[test]
    fn test_lag_pairing_rule() {
        let mut hyp = Hyperparameters::default();
        hyp.max_lag = 4;
        assert!(hyp.check().is_err());
        hyp.delta_t = 3600.0;
        assert!(hyp.check().is_ok());
        hyp.max_lag = 0;
        assert!(hyp.check().is_err());
    }

    #[test]
    fn test_effective_num_threads() {
        let mut hyp = Hyperparameters::default();
        assert!(hyp.effective_num_threads() >= 2);
        hyp.num_threads = 3;
        assert_eq!(hyp.effective_num_threads(), 3);
    }
}
