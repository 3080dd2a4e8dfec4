//! Univariate R² of candidate features against the targets

use ndarray::Array2;

use crate::containers::FloatColumn;

/// For every feature column, the squared correlation with each target,
/// averaged over targets. Both the feature matrix and the targets are
/// indexed by absolute population row number; only the rows in `rownums`
/// enter the sums. NaN cells and zero-variance features score 0.
pub fn calculate(
    targets: &[FloatColumn],
    features: &Array2<f64>,
    rownums: &[usize],
) -> Vec<f64> {
    let mean_targets: Vec<f64> = targets.iter().map(|t| mean_over(t, rownums)).collect();
    let var_targets: Vec<f64> = targets
        .iter()
        .zip(mean_targets.iter())
        .map(|(t, &mean)| var_over(t, rownums, mean))
        .collect();

    (0..features.ncols())
        .map(|j| {
            if targets.is_empty() {
                return 0.0;
            }
            let mut total = 0.0;
            for ((target, &mean_y), &var_y) in targets
                .iter()
                .zip(mean_targets.iter())
                .zip(var_targets.iter())
            {
                total += calc_for_target(target, mean_y, var_y, features, j, rownums);
            }
            total / targets.len() as f64
        })
        .collect()
}

fn mean_over(col: &FloatColumn, rownums: &[usize]) -> f64 {
    if rownums.is_empty() {
        return 0.0;
    }
    rownums.iter().map(|&i| col.get(i)).sum::<f64>() / rownums.len() as f64
}

fn var_over(col: &FloatColumn, rownums: &[usize], mean: f64) -> f64 {
    if rownums.is_empty() {
        return 0.0;
    }
    rownums
        .iter()
        .map(|&i| {
            let diff = col.get(i) - mean;
            diff * diff
        })
        .sum::<f64>()
        / rownums.len() as f64
}

fn calc_for_target(
    target: &FloatColumn,
    mean_y: f64,
    var_y: f64,
    features: &Array2<f64>,
    j: usize,
    rownums: &[usize],
) -> f64 {
    if var_y == 0.0 || rownums.is_empty() {
        return 0.0;
    }

    let n = rownums.len() as f64;

    let mean_x = rownums.iter().map(|&i| features[[i, j]]).sum::<f64>() / n;

    let mut var_x = 0.0;
    let mut cov = 0.0;

    for &i in rownums {
        let x = features[[i, j]];
        let y = target.get(i);
        var_x += (x - mean_x) * (x - mean_x);
        cov += (x - mean_x) * (y - mean_y);
    }
    var_x /= n;
    cov /= n;

    if var_x == 0.0 || !var_x.is_finite() || !cov.is_finite() {
        return 0.0;
    }

    let r = cov / (var_x.sqrt() * var_y.sqrt());
    let r_squared = r * r;
    if r_squared.is_finite() {
        r_squared
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_perfect_correlation() {
        let targets = vec![FloatColumn::new("y", vec![1.0, 2.0, 3.0, 4.0])];
        let features = arr2(&[[2.0], [4.0], [6.0], [8.0]]);
        let rownums = vec![0, 1, 2, 3];
        let r = calculate(&targets, &features, &rownums);
        assert!((r[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_feature_scores_zero() {
        let targets = vec![FloatColumn::new("y", vec![1.0, 2.0, 3.0])];
        let features = arr2(&[[5.0], [5.0], [5.0]]);
        let r = calculate(&targets, &features, &[0, 1, 2]);
        assert_eq!(r[0], 0.0);
    }

    #[test]
    fn test_constant_target_scores_zero() {
        let targets = vec![FloatColumn::new("y", vec![2.0, 2.0, 2.0])];
        let features = arr2(&[[1.0], [2.0], [3.0]]);
        let r = calculate(&targets, &features, &[0, 1, 2]);
        assert_eq!(r[0], 0.0);
    }

    #[test]
    fn test_sampling_ignores_unsampled_rows() {
        // Rows 0 and 2 never entered the transform and hold zeros; they must
        // not influence the score because they are not in rownums.
        let targets = vec![FloatColumn::new("y", vec![9.0, 1.0, 9.0, 2.0])];
        let features = arr2(&[[0.0], [1.0], [0.0], [2.0]]);
        let r = calculate(&targets, &features, &[1, 3]);
        assert!((r[0] - 1.0).abs() < 1e-12);
    }
}
