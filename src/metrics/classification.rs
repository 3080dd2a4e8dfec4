//! Classification metrics

use serde::{Deserialize, Serialize};

/// Clamp bound for the cross-entropy probabilities.
const EPS: f64 = 1e-15;

/// Accuracy, AUC, cross-entropy and the curve data of one binary target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub accuracy: f64,
    pub auc: f64,
    pub cross_entropy: f64,
    /// `(false positive rate, true positive rate)` points.
    pub roc_curve: Vec<(f64, f64)>,
    /// `(recall, precision)` points.
    pub precision_recall_curve: Vec<(f64, f64)>,
    /// Lift per decile of predicted probability, best decile first.
    pub lift_curve: Vec<(f64, f64)>,
}

impl ClassificationSummary {
    /// Computes the summary. Targets are 0/1; predictions are
    /// probabilities in `[0, 1]`.
    pub fn calculate(predictions: &[f64], targets: &[f64]) -> Self {
        let pairs: Vec<(f64, f64)> = predictions
            .iter()
            .zip(targets.iter())
            .filter(|(p, y)| !p.is_nan() && !y.is_nan())
            .map(|(&p, &y)| (p, y))
            .collect();

        Self {
            accuracy: accuracy(&pairs),
            auc: auc(&pairs),
            cross_entropy: cross_entropy(&pairs),
            roc_curve: roc_curve(&pairs),
            precision_recall_curve: precision_recall_curve(&pairs),
            lift_curve: lift_curve(&pairs),
        }
    }
}

/// Share of correct predictions at the 0.5 threshold.
fn accuracy(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    let correct = pairs
        .iter()
        .filter(|(p, y)| (*p >= 0.5) == (*y >= 0.5))
        .count();
    correct as f64 / pairs.len() as f64
}

/// Rank-based AUC via the Mann-Whitney statistic; ties contribute half.
fn auc(pairs: &[(f64, f64)]) -> f64 {
    let positives: Vec<f64> = pairs.iter().filter(|(_, y)| *y >= 0.5).map(|(p, _)| *p).collect();
    let negatives: Vec<f64> = pairs.iter().filter(|(_, y)| *y < 0.5).map(|(p, _)| *p).collect();

    if positives.is_empty() || negatives.is_empty() {
        return f64::NAN;
    }

    let mut wins = 0.0;
    for &p in &positives {
        for &n in &negatives {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    wins / (positives.len() as f64 * negatives.len() as f64)
}

/// Mean negative log-likelihood with probabilities clamped to
/// `[EPS, 1 - EPS]`.
fn cross_entropy(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    let total: f64 = pairs
        .iter()
        .map(|(p, y)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / pairs.len() as f64
}

/// Sorted by descending score, one point per distinct threshold.
fn roc_curve(pairs: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let num_pos = pairs.iter().filter(|(_, y)| *y >= 0.5).count() as f64;
    let num_neg = pairs.len() as f64 - num_pos;
    if num_pos == 0.0 || num_neg == 0.0 {
        return Vec::new();
    }

    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut points = vec![(0.0, 0.0)];
    let mut tp = 0.0;
    let mut fp = 0.0;
    for (_, y) in sorted {
        if y >= 0.5 {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        points.push((fp / num_neg, tp / num_pos));
    }
    points
}

/// `(recall, precision)` points sorted by descending score.
fn precision_recall_curve(pairs: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let num_pos = pairs.iter().filter(|(_, y)| *y >= 0.5).count() as f64;
    if num_pos == 0.0 {
        return Vec::new();
    }

    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut points = Vec::new();
    let mut tp = 0.0;
    let mut seen = 0.0;
    for (_, y) in sorted {
        seen += 1.0;
        if y >= 0.5 {
            tp += 1.0;
        }
        points.push((tp / num_pos, tp / seen));
    }
    points
}

/// Lift per decile: share of positives in the decile over the base rate.
fn lift_curve(pairs: &[(f64, f64)]) -> Vec<(f64, f64)> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let base_rate = pairs.iter().filter(|(_, y)| *y >= 0.5).count() as f64 / pairs.len() as f64;
    if base_rate == 0.0 {
        return Vec::new();
    }

    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut points = Vec::new();
    for decile in 0..10 {
        let begin = sorted.len() * decile / 10;
        let end = sorted.len() * (decile + 1) / 10;
        if begin == end {
            continue;
        }
        let slice = &sorted[begin..end];
        let rate = slice.iter().filter(|(_, y)| *y >= 0.5).count() as f64 / slice.len() as f64;
        points.push(((decile as f64 + 1.0) / 10.0, rate / base_rate));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy() {
        let summary =
            ClassificationSummary::calculate(&[0.9, 0.8, 0.2, 0.4], &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(summary.accuracy, 0.5);
    }

    #[test]
    fn test_auc_perfect_separation() {
        let summary =
            ClassificationSummary::calculate(&[0.9, 0.8, 0.2, 0.1], &[1.0, 1.0, 0.0, 0.0]);
        assert_eq!(summary.auc, 1.0);
    }

    #[test]
    fn test_auc_random_is_half() {
        let summary =
            ClassificationSummary::calculate(&[0.7, 0.7, 0.7, 0.7], &[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(summary.auc, 0.5);
    }

    #[test]
    fn test_cross_entropy_clamps() {
        let summary = ClassificationSummary::calculate(&[0.0, 1.0], &[1.0, 1.0]);
        assert!(summary.cross_entropy.is_finite());
    }

    #[test]
    fn test_roc_curve_endpoints() {
        let summary =
            ClassificationSummary::calculate(&[0.9, 0.8, 0.2, 0.1], &[1.0, 1.0, 0.0, 0.0]);
        assert_eq!(summary.roc_curve.first(), Some(&(0.0, 0.0)));
        assert_eq!(summary.roc_curve.last(), Some(&(1.0, 1.0)));
    }
}
