//! Back-propagation of feature importances onto columns

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data_model::macros;

/// Whether a column belongs to the population or a peripheral table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Marker {
    #[serde(rename = "[POPULATION]")]
    Population,
    #[serde(rename = "[PERIPHERAL]")]
    Peripheral,
}

/// Identifies one column for importance reporting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub marker: Marker,
    pub table: String,
    pub column: String,
}

impl ColumnDescription {
    pub fn new(marker: Marker, table: &str, column: &str) -> Self {
        Self {
            marker,
            table: table.to_string(),
            column: macros::make_readable(column),
        }
    }
}

/// Accumulates importance mass per column.
///
/// Every feature's importance is distributed over the columns it touches;
/// the total mass is conserved, so the column importances sum to the sum of
/// the feature importances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportanceMaker {
    importances: BTreeMap<ColumnDescription, f64>,
}

impl ImportanceMaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, desc: ColumnDescription, importance: f64) {
        *self.importances.entry(desc).or_insert(0.0) += importance;
    }

    pub fn merge(&mut self, other: &ImportanceMaker) {
        for (desc, importance) in &other.importances {
            self.add(desc.clone(), *importance);
        }
    }

    /// Re-marks population columns as peripheral columns of `table`. Used
    /// when a subfeature tree's importances bubble up: the child's
    /// population table is one of the parent's peripheral tables.
    pub fn transfer_population(&mut self, table: &str) {
        let mut transferred = BTreeMap::new();
        for (desc, importance) in std::mem::take(&mut self.importances) {
            let desc = if desc.marker == Marker::Population {
                ColumnDescription {
                    marker: Marker::Peripheral,
                    table: table.to_string(),
                    column: desc.column,
                }
            } else {
                desc
            };
            *transferred.entry(desc).or_insert(0.0) += importance;
        }
        self.importances = transferred;
    }

    pub fn importances(&self) -> &BTreeMap<ColumnDescription, f64> {
        &self.importances
    }

    pub fn total(&self) -> f64 {
        self.importances.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mass_accumulates() {
        let mut maker = ImportanceMaker::new();
        let desc = ColumnDescription::new(Marker::Peripheral, "orders", "price");
        maker.add(desc.clone(), 0.25);
        maker.add(desc, 0.25);
        assert!((maker.total() - 0.5).abs() < 1e-12);
        assert_eq!(maker.importances().len(), 1);
    }

    #[test]
    fn test_transfer_population_conserves_mass() {
        let mut maker = ImportanceMaker::new();
        maker.add(
            ColumnDescription::new(Marker::Population, "orders", "price"),
            0.3,
        );
        maker.add(
            ColumnDescription::new(Marker::Peripheral, "items", "qty"),
            0.2,
        );
        maker.transfer_population("orders");
        assert!((maker.total() - 0.5).abs() < 1e-12);
        assert!(maker
            .importances()
            .keys()
            .all(|d| d.marker == Marker::Peripheral));
    }
}
