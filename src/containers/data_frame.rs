//! Role-tagged column bundles with join-key indices

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::containers::{Column, Encoding, FloatColumn, Index, IntColumn, Schema, StringColumn};
use crate::data_model::{macros, Role};
use crate::error::{RelpropError, Result};

/// Save-format version; loading rejects anything else.
const SERIAL_VERSION: u32 = 1;

/// Process-wide change counter. `last_change` values drawn from it are
/// comparable across frames, which is what the dependency trackers need.
static CHANGE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_change() -> u64 {
    CHANGE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// One matched pair of rows between the population and a peripheral table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub ix_population: usize,
    pub ix_peripheral: usize,
}

/// An ordered bundle of role-tagged columns.
///
/// All columns have the same row count. Mutations bump `last_change` and fail
/// once the frame is frozen; `create_indices` builds one hash index per
/// join-key column, with bucket rows sorted by the first time stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFrame {
    name: String,
    categoricals: Vec<IntColumn>,
    discretes: Vec<FloatColumn>,
    join_keys: Vec<IntColumn>,
    numericals: Vec<FloatColumn>,
    targets: Vec<FloatColumn>,
    text: Vec<StringColumn>,
    time_stamps: Vec<FloatColumn>,
    unused_floats: Vec<FloatColumn>,
    unused_strings: Vec<StringColumn>,
    #[serde(skip)]
    indices: Vec<Option<Arc<Index>>>,
    frozen: bool,
    last_change: u64,
}

/// Envelope written by [`DataFrame::save`].
#[derive(Serialize, Deserialize)]
struct SavedFrame {
    version: u32,
    frame: DataFrame,
}

impl DataFrame {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            categoricals: Vec::new(),
            discretes: Vec::new(),
            join_keys: Vec::new(),
            numericals: Vec::new(),
            targets: Vec::new(),
            text: Vec::new(),
            time_stamps: Vec::new(),
            unused_floats: Vec::new(),
            unused_strings: Vec::new(),
            indices: Vec::new(),
            frozen: false,
            last_change: next_change(),
        }
    }

    // ------------------------------------------------------------------
    // Mutation guard and change tracking

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(RelpropError::FrameFrozen(self.name.clone()));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.last_change = next_change();
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn last_change(&self) -> u64 {
        self.last_change
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    // ------------------------------------------------------------------
    // Shape

    pub fn nrows(&self) -> usize {
        self.columns_lens().first().copied().unwrap_or(0)
    }

    fn columns_lens(&self) -> Vec<usize> {
        let mut lens = Vec::new();
        lens.extend(self.categoricals.iter().map(|c| c.len()));
        lens.extend(self.discretes.iter().map(|c| c.len()));
        lens.extend(self.join_keys.iter().map(|c| c.len()));
        lens.extend(self.numericals.iter().map(|c| c.len()));
        lens.extend(self.targets.iter().map(|c| c.len()));
        lens.extend(self.text.iter().map(|c| c.len()));
        lens.extend(self.time_stamps.iter().map(|c| c.len()));
        lens.extend(self.unused_floats.iter().map(|c| c.len()));
        lens.extend(self.unused_strings.iter().map(|c| c.len()));
        lens
    }

    pub fn ncols(&self) -> usize {
        self.columns_lens().len()
    }

    pub fn nbytes(&self) -> u64 {
        let mut total = 0u64;
        total += self.categoricals.iter().map(|c| c.nbytes()).sum::<u64>();
        total += self.discretes.iter().map(|c| c.nbytes()).sum::<u64>();
        total += self.join_keys.iter().map(|c| c.nbytes()).sum::<u64>();
        total += self.numericals.iter().map(|c| c.nbytes()).sum::<u64>();
        total += self.targets.iter().map(|c| c.nbytes()).sum::<u64>();
        total += self.time_stamps.iter().map(|c| c.nbytes()).sum::<u64>();
        total += self.unused_floats.iter().map(|c| c.nbytes()).sum::<u64>();
        for col in self.text.iter().chain(self.unused_strings.iter()) {
            total += col
                .iter()
                .map(|s| s.as_ref().map(|s| s.len()).unwrap_or(0) as u64)
                .sum::<u64>();
        }
        total
    }

    fn check_len(&self, len: usize) -> Result<()> {
        let nrows = self.nrows();
        if self.ncols() > 0 && len != nrows {
            return Err(RelpropError::ShapeMismatch {
                expected: format!("{} rows", nrows),
                actual: format!("{} rows", len),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Adding columns

    pub fn add_categorical(&mut self, col: IntColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.categoricals.push(col);
        self.touch();
        Ok(())
    }

    pub fn add_discrete(&mut self, col: FloatColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.discretes.push(col);
        self.touch();
        Ok(())
    }

    pub fn add_join_key(&mut self, col: IntColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.join_keys.push(col);
        self.indices.push(None);
        self.touch();
        Ok(())
    }

    pub fn add_numerical(&mut self, col: FloatColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.numericals.push(col);
        self.touch();
        Ok(())
    }

    pub fn add_target(&mut self, col: FloatColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.targets.push(col);
        self.touch();
        Ok(())
    }

    pub fn add_text(&mut self, col: StringColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.text.push(col);
        self.touch();
        Ok(())
    }

    pub fn add_time_stamp(&mut self, col: FloatColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.time_stamps.push(col);
        self.touch();
        Ok(())
    }

    pub fn add_unused_float(&mut self, col: FloatColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.unused_floats.push(col);
        self.touch();
        Ok(())
    }

    pub fn add_unused_string(&mut self, col: StringColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.unused_strings.push(col);
        self.touch();
        Ok(())
    }

    /// Swaps out a categorical column in place.
    pub fn replace_categorical(&mut self, ix: usize, col: IntColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.categoricals[ix] = col;
        self.touch();
        Ok(())
    }

    /// Swaps out a numerical column in place.
    pub fn replace_numerical(&mut self, ix: usize, col: FloatColumn) -> Result<()> {
        self.check_mutable()?;
        self.check_len(col.len())?;
        self.numericals[ix] = col;
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed getters

    pub fn num_categoricals(&self) -> usize {
        self.categoricals.len()
    }

    pub fn num_discretes(&self) -> usize {
        self.discretes.len()
    }

    pub fn num_join_keys(&self) -> usize {
        self.join_keys.len()
    }

    pub fn num_numericals(&self) -> usize {
        self.numericals.len()
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn num_text(&self) -> usize {
        self.text.len()
    }

    pub fn num_time_stamps(&self) -> usize {
        self.time_stamps.len()
    }

    pub fn categorical(&self, ix: usize) -> &IntColumn {
        &self.categoricals[ix]
    }

    pub fn discrete(&self, ix: usize) -> &FloatColumn {
        &self.discretes[ix]
    }

    pub fn join_key(&self, ix: usize) -> &IntColumn {
        &self.join_keys[ix]
    }

    pub fn numerical(&self, ix: usize) -> &FloatColumn {
        &self.numericals[ix]
    }

    pub fn target(&self, ix: usize) -> &FloatColumn {
        &self.targets[ix]
    }

    pub fn text(&self, ix: usize) -> &StringColumn {
        &self.text[ix]
    }

    pub fn time_stamp(&self, ix: usize) -> &FloatColumn {
        &self.time_stamps[ix]
    }

    pub fn targets(&self) -> &[FloatColumn] {
        &self.targets
    }

    pub fn time_stamps(&self) -> &[FloatColumn] {
        &self.time_stamps
    }

    fn not_found(&self, colname: &str, role: Role) -> RelpropError {
        RelpropError::ColumnNotFound {
            table: self.name.clone(),
            column: macros::make_readable(colname),
            role: role.as_str().to_string(),
        }
    }

    pub fn categorical_by_name(&self, name: &str) -> Result<&IntColumn> {
        self.categoricals
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| self.not_found(name, Role::Categorical))
    }

    pub fn join_key_by_name(&self, name: &str) -> Result<&IntColumn> {
        self.join_keys
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| self.not_found(name, Role::JoinKey))
    }

    pub fn numerical_by_name(&self, name: &str) -> Result<&FloatColumn> {
        self.numericals
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| self.not_found(name, Role::Numerical))
    }

    pub fn text_by_name(&self, name: &str) -> Result<&StringColumn> {
        self.text
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| self.not_found(name, Role::Text))
    }

    pub fn time_stamp_by_name(&self, name: &str) -> Result<&FloatColumn> {
        self.time_stamps
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| self.not_found(name, Role::TimeStamp))
    }

    pub fn has_join_key(&self, name: &str) -> bool {
        self.join_keys.iter().any(|c| c.name() == name)
    }

    pub fn has_time_stamp(&self, name: &str) -> bool {
        self.time_stamps.iter().any(|c| c.name() == name)
    }

    // ------------------------------------------------------------------
    // Whole-frame operations

    /// Appends all rows of `other`, which must have the same column layout.
    /// Indices are invalidated and must be rebuilt.
    pub fn append(&mut self, other: &DataFrame) -> Result<()> {
        self.check_mutable()?;

        let self_schema = self.to_schema();
        let mut other_schema = other.to_schema();
        other_schema.name = self_schema.name.clone();
        if self_schema != other_schema {
            return Err(RelpropError::ShapeMismatch {
                expected: format!("schema of '{}'", self.name),
                actual: format!("schema of '{}'", other.name),
            });
        }

        fn extend<T: Clone>(dst: &mut [Column<T>], src: &[Column<T>]) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                d.data_mut().extend(s.iter().cloned());
            }
        }

        extend(&mut self.categoricals, &other.categoricals);
        extend(&mut self.discretes, &other.discretes);
        extend(&mut self.join_keys, &other.join_keys);
        extend(&mut self.numericals, &other.numericals);
        extend(&mut self.targets, &other.targets);
        extend(&mut self.text, &other.text);
        extend(&mut self.time_stamps, &other.time_stamps);
        extend(&mut self.unused_floats, &other.unused_floats);
        extend(&mut self.unused_strings, &other.unused_strings);

        for ix in self.indices.iter_mut() {
            *ix = None;
        }
        self.touch();
        Ok(())
    }

    /// A new frame containing the rows at `rows`, in order.
    pub fn subset(&self, name: &str, rows: &[usize]) -> DataFrame {
        DataFrame {
            name: name.to_string(),
            categoricals: self.categoricals.iter().map(|c| c.subset(rows)).collect(),
            discretes: self.discretes.iter().map(|c| c.subset(rows)).collect(),
            join_keys: self.join_keys.iter().map(|c| c.subset(rows)).collect(),
            numericals: self.numericals.iter().map(|c| c.subset(rows)).collect(),
            targets: self.targets.iter().map(|c| c.subset(rows)).collect(),
            text: self.text.iter().map(|c| c.subset(rows)).collect(),
            time_stamps: self.time_stamps.iter().map(|c| c.subset(rows)).collect(),
            unused_floats: self.unused_floats.iter().map(|c| c.subset(rows)).collect(),
            unused_strings: self.unused_strings.iter().map(|c| c.subset(rows)).collect(),
            indices: self.join_keys.iter().map(|_| None).collect(),
            frozen: false,
            last_change: next_change(),
        }
    }

    /// A new frame with the rows where `mask` is true.
    pub fn where_mask(&self, name: &str, mask: &[bool]) -> Result<DataFrame> {
        if mask.len() != self.nrows() {
            return Err(RelpropError::ShapeMismatch {
                expected: format!("{} mask entries", self.nrows()),
                actual: format!("{}", mask.len()),
            });
        }
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(i, _)| i)
            .collect();
        Ok(self.subset(name, &rows))
    }

    /// A copy under a new name. Column storage is shared until first write.
    pub fn clone_as(&self, name: &str) -> DataFrame {
        let mut frame = self.clone();
        frame.name = name.to_string();
        frame.frozen = false;
        frame.last_change = next_change();
        frame
    }

    /// Sorts the whole frame by the given join key, nulls last.
    pub fn sort_by_key(&mut self, join_key_name: &str) -> Result<()> {
        self.check_mutable()?;
        let keys = self.join_key_by_name(join_key_name)?.as_slice().to_vec();

        let mut order: Vec<usize> = (0..self.nrows()).collect();
        order.sort_by_key(|&i| if keys[i] < 0 { i64::MAX } else { keys[i] });

        let sorted = self.subset(&self.name.clone(), &order);
        let name = self.name.clone();
        *self = sorted;
        self.name = name;
        self.touch();
        Ok(())
    }

    /// Builds one index per join-key column. Buckets are ordered by the
    /// first time-stamp column when one exists.
    pub fn create_indices(&mut self) {
        let ts = self
            .time_stamps
            .first()
            .map(|c| (c.name().to_string(), c.as_slice().to_vec()));

        self.indices = self
            .join_keys
            .iter()
            .map(|col| {
                Some(Arc::new(Index::new(
                    col.as_slice(),
                    ts.as_ref().map(|(name, data)| (name.as_str(), data.as_slice())),
                )))
            })
            .collect();
    }

    /// The index for the named join-key column, if built.
    pub fn index_for(&self, join_key_name: &str) -> Option<Arc<Index>> {
        self.join_keys
            .iter()
            .position(|c| c.name() == join_key_name)
            .and_then(|ix| self.indices.get(ix).cloned().flatten())
    }

    pub fn to_schema(&self) -> Schema {
        Schema {
            name: self.name.clone(),
            categoricals: self.categoricals.iter().map(|c| c.name().to_string()).collect(),
            discretes: self.discretes.iter().map(|c| c.name().to_string()).collect(),
            join_keys: self.join_keys.iter().map(|c| c.name().to_string()).collect(),
            numericals: self.numericals.iter().map(|c| c.name().to_string()).collect(),
            targets: self.targets.iter().map(|c| c.name().to_string()).collect(),
            text: self.text.iter().map(|c| c.name().to_string()).collect(),
            time_stamps: self.time_stamps.iter().map(|c| c.name().to_string()).collect(),
            unused_floats: self.unused_floats.iter().map(|c| c.name().to_string()).collect(),
            unused_strings: self.unused_strings.iter().map(|c| c.name().to_string()).collect(),
        }
    }

    // ------------------------------------------------------------------
    // Ingestion and persistence

    /// Builds a frame from a JSON object mapping column names to value
    /// arrays, with roles resolved through `schema`. Strings in categorical
    /// and join-key columns are encoded through the shared dictionaries.
    pub fn from_json(
        name: &str,
        json: &str,
        schema: &Schema,
        categories: &Arc<RwLock<Encoding>>,
        join_key_encoding: &Arc<RwLock<Encoding>>,
    ) -> Result<DataFrame> {
        let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(json)?;

        let mut frame = DataFrame::new(name);

        let get = |colname: &str| -> Result<&serde_json::Value> {
            parsed.get(colname).ok_or_else(|| RelpropError::ColumnNotFound {
                table: name.to_string(),
                column: macros::make_readable(colname),
                role: schema
                    .role_of(colname)
                    .map(|r| r.as_str().to_string())
                    .unwrap_or_default(),
            })
        };

        let floats = |value: &serde_json::Value| -> Result<Vec<f64>> {
            let arr = value
                .as_array()
                .ok_or_else(|| RelpropError::UserInput("Expected a JSON array.".to_string()))?;
            Ok(arr.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect())
        };

        let encoded = |value: &serde_json::Value, enc: &Arc<RwLock<Encoding>>| -> Result<Vec<i64>> {
            let arr = value
                .as_array()
                .ok_or_else(|| RelpropError::UserInput("Expected a JSON array.".to_string()))?;
            let mut enc = enc.write();
            Ok(arr
                .iter()
                .map(|v| match v.as_str() {
                    Some(s) => enc.insert(s),
                    None => crate::containers::NULL_INT,
                })
                .collect())
        };

        for colname in &schema.join_keys {
            frame.add_join_key(IntColumn::new(colname, encoded(get(colname)?, join_key_encoding)?))?;
        }
        for colname in &schema.categoricals {
            frame.add_categorical(IntColumn::new(colname, encoded(get(colname)?, categories)?))?;
        }
        for colname in &schema.discretes {
            frame.add_discrete(FloatColumn::new(colname, floats(get(colname)?)?))?;
        }
        for colname in &schema.numericals {
            frame.add_numerical(FloatColumn::new(colname, floats(get(colname)?)?))?;
        }
        for colname in &schema.targets {
            frame.add_target(FloatColumn::new(colname, floats(get(colname)?)?))?;
        }
        for colname in &schema.time_stamps {
            frame.add_time_stamp(FloatColumn::new(colname, floats(get(colname)?)?))?;
        }
        for colname in &schema.text {
            let arr = get(colname)?
                .as_array()
                .ok_or_else(|| RelpropError::UserInput("Expected a JSON array.".to_string()))?;
            let data = arr
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            frame.add_text(StringColumn::new(colname, data))?;
        }

        Ok(frame)
    }

    /// Writes the frame as a versioned JSON record.
    pub fn save(&self, path: &Path) -> Result<()> {
        let envelope = SavedFrame {
            version: SERIAL_VERSION,
            frame: self.clone(),
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &envelope)?;
        Ok(())
    }

    /// Reads a frame written by [`DataFrame::save`]. Rejects other versions.
    pub fn load(path: &Path) -> Result<DataFrame> {
        let file = std::fs::File::open(path)?;
        let envelope: SavedFrame = serde_json::from_reader(std::io::BufReader::new(file))?;
        if envelope.version != SERIAL_VERSION {
            return Err(RelpropError::Serialization(format!(
                "Incompatible data frame version: expected {}, got {}",
                SERIAL_VERSION, envelope.version
            )));
        }
        let mut frame = envelope.frame;
        frame.indices = frame.join_keys.iter().map(|_| None).collect();
        frame.create_indices();
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        let mut df = DataFrame::new("orders");
        df.add_join_key(IntColumn::new("customer_id", vec![1, 1, 2])).unwrap();
        df.add_numerical(FloatColumn::new("price", vec![10.0, 20.0, 30.0])).unwrap();
        df.add_time_stamp(FloatColumn::new("ts", vec![3.0, 1.0, 2.0])).unwrap();
        df
    }

    #[test]
    fn test_row_count_consistency() {
        let mut df = frame();
        let err = df
            .add_numerical(FloatColumn::new("bad", vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, RelpropError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_frozen_frame_rejects_mutation() {
        let mut df = frame();
        df.freeze();
        let err = df
            .add_numerical(FloatColumn::new("x", vec![0.0, 0.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, RelpropError::FrameFrozen(_)));
    }

    #[test]
    fn test_last_change_bumps_on_mutation() {
        let mut df = frame();
        let before = df.last_change();
        df.add_numerical(FloatColumn::new("x", vec![0.0, 0.0, 0.0])).unwrap();
        assert!(df.last_change() > before);
    }

    #[test]
    fn test_indices_sorted_by_time_stamp() {
        let mut df = frame();
        df.create_indices();
        let index = df.index_for("customer_id").unwrap();
        assert_eq!(index.rows(1), &[1, 0]);
    }

    #[test]
    fn test_append_then_reindex() {
        let mut df = frame();
        df.create_indices();
        let other = frame();
        df.append(&other).unwrap();
        assert_eq!(df.nrows(), 6);
        assert!(df.index_for("customer_id").is_none());
        df.create_indices();
        assert_eq!(df.index_for("customer_id").unwrap().rows(2).len(), 2);
    }

    #[test]
    fn test_missing_column_error_names_table() {
        let df = frame();
        let err = df.numerical_by_name("tax").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Column 'tax' with role 'numerical' not found in table 'orders'"
        );
    }

    #[test]
    fn test_save_load_roundtrip() {
        let df = frame();
        let dir = std::env::temp_dir().join("relprop_test_frame.json");
        df.save(&dir).unwrap();
        let loaded = DataFrame::load(&dir).unwrap();
        assert_eq!(loaded.to_schema(), df.to_schema());
        assert_eq!(loaded.numerical(0).as_slice(), df.numerical(0).as_slice());
        assert!(loaded.index_for("customer_id").is_some());
        std::fs::remove_file(dir).ok();
    }
}
