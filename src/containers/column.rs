//! Typed columns over shared backing storage

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data_model::Subrole;

/// Null sentinel for integer-encoded columns. Any id below zero is null.
pub const NULL_INT: i64 = -1;

/// A named, typed column.
///
/// The cell data lives behind shared ownership: cloning a column, or deriving
/// one via [`Column::with_unit`]/[`Column::with_subroles`], shares the same
/// storage. Writes go through [`Column::data_mut`], which copies the storage
/// iff it is shared (the copy-on-write boundary for preprocessors).
///
/// Null semantics are per type: floats use NaN, integer ids use a negative
/// sentinel, strings carry an explicit null via `Option`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column<T> {
    name: String,
    unit: String,
    subroles: BTreeSet<Subrole>,
    data: Arc<Vec<T>>,
}

pub type FloatColumn = Column<f64>;
pub type IntColumn = Column<i64>;
pub type StringColumn = Column<Option<String>>;

impl<T: Clone> Column<T> {
    pub fn new(name: &str, data: Vec<T>) -> Self {
        Self {
            name: name.to_string(),
            unit: String::new(),
            subroles: BTreeSet::new(),
            data: Arc::new(data),
        }
    }

    /// A column of `len` copies of `value`.
    pub fn constant(name: &str, value: T, len: usize) -> Self {
        Self::new(name, vec![value; len])
    }

    /// A column sharing this column's storage under a different unit.
    pub fn with_unit(&self, unit: &str) -> Self {
        let mut col = self.clone();
        col.unit = unit.to_string();
        col
    }

    /// A column sharing this column's storage with different subroles.
    pub fn with_subroles(&self, subroles: BTreeSet<Subrole>) -> Self {
        let mut col = self.clone();
        col.subroles = subroles;
        col
    }

    pub fn get(&self, i: usize) -> T {
        self.data[i].clone()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the cells. Copies the backing storage when it is
    /// shared with another column, so the sharer keeps its view.
    pub fn data_mut(&mut self) -> &mut Vec<T> {
        Arc::make_mut(&mut self.data)
    }

    pub fn set(&mut self, i: usize, value: T) {
        self.data_mut()[i] = value;
    }

    /// A new column containing the cells at `rows`, in order.
    pub fn subset(&self, rows: &[usize]) -> Self {
        let data = rows.iter().map(|&i| self.data[i].clone()).collect();
        Self {
            name: self.name.clone(),
            unit: self.unit.clone(),
            subroles: self.subroles.clone(),
            data: Arc::new(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: &str) {
        self.unit = unit.to_string();
    }

    pub fn subroles(&self) -> &BTreeSet<Subrole> {
        &self.subroles
    }

    pub fn has_subrole(&self, subrole: Subrole) -> bool {
        self.subroles.contains(&subrole)
    }

    pub fn add_subrole(&mut self, subrole: Subrole) {
        self.subroles.insert(subrole);
    }

    pub fn nbytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<T>()) as u64
    }

    /// Whether another column shares this column's storage.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl FloatColumn {
    pub fn is_null(&self, i: usize) -> bool {
        self.data[i].is_nan()
    }
}

impl IntColumn {
    pub fn is_null(&self, i: usize) -> bool {
        self.data[i] < 0
    }
}

impl StringColumn {
    pub fn is_null(&self, i: usize) -> bool {
        self.data[i].is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_storage() {
        let col = FloatColumn::new("price", vec![1.0, 2.0, 3.0]);
        let aliased = col.with_unit("EUR");
        assert!(col.shares_storage_with(&aliased));
        assert_eq!(aliased.unit(), "EUR");
        assert_eq!(col.unit(), "");
    }

    #[test]
    fn test_copy_on_write() {
        let col = FloatColumn::new("price", vec![1.0, 2.0]);
        let mut copy = col.clone();
        copy.set(0, 9.0);
        assert_eq!(col.get(0), 1.0);
        assert_eq!(copy.get(0), 9.0);
        assert!(!col.shares_storage_with(&copy));
    }

    #[test]
    fn test_null_semantics() {
        let floats = FloatColumn::new("x", vec![1.0, f64::NAN]);
        assert!(!floats.is_null(0));
        assert!(floats.is_null(1));

        let ints = IntColumn::new("c", vec![0, NULL_INT]);
        assert!(!ints.is_null(0));
        assert!(ints.is_null(1));

        let strings = StringColumn::new("s", vec![Some("a".to_string()), None]);
        assert!(strings.is_null(1));
    }

    #[test]
    fn test_subset() {
        let col = IntColumn::new("c", vec![10, 20, 30, 40]);
        let sub = col.subset(&[3, 1]);
        assert_eq!(sub.as_slice(), &[40, 20]);
    }
}
