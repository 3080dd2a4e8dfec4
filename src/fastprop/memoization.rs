//! Per-thread scratch space for the row builder
//!
//! Consecutive features frequently differ only in their aggregation. The
//! scratch keeps the last filtered-and-projected range together with the
//! identity of the feature that produced it; a feature with the same inputs
//! reuses the buffer instead of re-walking the matches.

use crate::fastprop::AbstractFeature;

#[derive(Debug, Default)]
pub struct Memoization {
    numerical_key: Option<AbstractFeature>,
    numerical: Vec<f64>,
    pairs_key: Option<AbstractFeature>,
    pairs: Vec<(f64, f64)>,
}

impl Memoization {
    pub fn new() -> Self {
        Self::default()
    }

    /// The filtered numeric range for `feature`. `fill` runs only when the
    /// previous feature had different inputs.
    pub fn numerical(
        &mut self,
        feature: &AbstractFeature,
        fill: impl FnOnce(&mut Vec<f64>),
    ) -> &[f64] {
        let hit = self
            .numerical_key
            .as_ref()
            .map(|k| k.same_inputs(feature))
            .unwrap_or(false);
        if !hit {
            self.numerical.clear();
            fill(&mut self.numerical);
            self.numerical_key = Some(feature.clone());
        }
        &self.numerical
    }

    /// The filtered `(time, value)` range for `feature`.
    pub fn pairs(
        &mut self,
        feature: &AbstractFeature,
        fill: impl FnOnce(&mut Vec<(f64, f64)>),
    ) -> &[(f64, f64)] {
        let hit = self
            .pairs_key
            .as_ref()
            .map(|k| k.same_inputs(feature))
            .unwrap_or(false);
        if !hit {
            self.pairs.clear();
            fill(&mut self.pairs);
            self.pairs_key = Some(feature.clone());
        }
        &self.pairs
    }

    /// Forgets the cached keys; called between rows.
    pub fn reset(&mut self) {
        self.numerical_key = None;
        self.pairs_key = None;
    }
}
