//! Hash index over a join-key column

use std::collections::HashMap;

/// Maps each join-key id to the rows carrying it.
///
/// When the frame has a time-stamp column, rows within a bucket are sorted by
/// that column at build time so the matchmaker can binary-search the window
/// edges and yield matches in time-stamp order. `sorted_by` records which
/// column governed the order; a lookup against a different time stamp falls
/// back to a linear scan.
#[derive(Debug, Clone)]
pub struct Index {
    rows_by_key: HashMap<i64, Vec<usize>>,
    sorted_by: Option<String>,
}

impl Index {
    /// Builds the index over `keys`. If `time_stamps` is given, each bucket
    /// is sorted by it; NaN time stamps sort last.
    pub fn new(keys: &[i64], time_stamps: Option<(&str, &[f64])>) -> Self {
        let mut rows_by_key: HashMap<i64, Vec<usize>> = HashMap::new();

        for (row, &key) in keys.iter().enumerate() {
            if key < 0 {
                continue;
            }
            rows_by_key.entry(key).or_default().push(row);
        }

        let sorted_by = time_stamps.map(|(name, ts)| {
            for rows in rows_by_key.values_mut() {
                rows.sort_by(|&a, &b| {
                    ts[a].partial_cmp(&ts[b])
                        .unwrap_or_else(|| ts[a].is_nan().cmp(&ts[b].is_nan()))
                });
            }
            name.to_string()
        });

        Self {
            rows_by_key,
            sorted_by,
        }
    }

    /// The rows carrying `key`, in index order.
    pub fn rows(&self, key: i64) -> &[usize] {
        self.rows_by_key
            .get(&key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, key: i64) -> bool {
        self.rows_by_key.contains_key(&key)
    }

    /// The time-stamp column that ordered the buckets, if any.
    pub fn sorted_by(&self) -> Option<&str> {
        self.sorted_by.as_deref()
    }

    pub fn num_keys(&self) -> usize {
        self.rows_by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_grouped_by_key() {
        let index = Index::new(&[1, 2, 1, 2, 1], None);
        assert_eq!(index.rows(1), &[0, 2, 4]);
        assert_eq!(index.rows(2), &[1, 3]);
        assert_eq!(index.rows(9), &[] as &[usize]);
    }

    #[test]
    fn test_null_keys_skipped() {
        let index = Index::new(&[1, -1, 1], None);
        assert_eq!(index.num_keys(), 1);
        assert_eq!(index.rows(1), &[0, 2]);
    }

    #[test]
    fn test_buckets_sorted_by_time_stamp() {
        let ts = [90.0, 80.0, 180.0, 250.0];
        let index = Index::new(&[1, 1, 2, 2], Some(("ts", &ts)));
        assert_eq!(index.rows(1), &[1, 0]);
        assert_eq!(index.rows(2), &[2, 3]);
        assert_eq!(index.sorted_by(), Some("ts"));
    }
}
