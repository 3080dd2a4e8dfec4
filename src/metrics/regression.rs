//! Regression metrics

use serde::{Deserialize, Serialize};

/// MAE, RMSE and R² of one target's predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSummary {
    pub mae: f64,
    pub rmse: f64,
    pub rsquared: f64,
}

impl RegressionSummary {
    /// Computes the summary over paired predictions and truths. NaN pairs
    /// are skipped; an empty input yields NaN metrics.
    pub fn calculate(predictions: &[f64], targets: &[f64]) -> Self {
        let pairs: Vec<(f64, f64)> = predictions
            .iter()
            .zip(targets.iter())
            .filter(|(p, y)| !p.is_nan() && !y.is_nan())
            .map(|(&p, &y)| (p, y))
            .collect();

        if pairs.is_empty() {
            return Self {
                mae: f64::NAN,
                rmse: f64::NAN,
                rsquared: f64::NAN,
            };
        }

        let n = pairs.len() as f64;

        let mae = pairs.iter().map(|(p, y)| (p - y).abs()).sum::<f64>() / n;
        let mse = pairs.iter().map(|(p, y)| (p - y) * (p - y)).sum::<f64>() / n;

        let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
        // SS_tot is computed once per target and reused for the residual
        // ratio.
        let ss_tot = pairs.iter().map(|(_, y)| (y - mean_y) * (y - mean_y)).sum::<f64>();
        let ss_res = pairs.iter().map(|(p, y)| (y - p) * (y - p)).sum::<f64>();

        let rsquared = if ss_tot == 0.0 {
            0.0
        } else {
            1.0 - ss_res / ss_tot
        };

        Self {
            mae,
            rmse: mse.sqrt(),
            rsquared,
        }
    }
}
