//! Per-row word-id lists

use serde::{Deserialize, Serialize};

use crate::containers::StringColumn;
use crate::textmining::{tokenize, Vocabulary};

/// For each row of a text column, the sorted, deduplicated vocabulary ids
/// present in that row. Lookup of a single word id is a binary search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordIndex {
    rows: Vec<Vec<i64>>,
}

impl WordIndex {
    pub fn new(col: &StringColumn, vocabulary: &Vocabulary) -> Self {
        let rows = col
            .iter()
            .map(|cell| {
                let Some(text) = cell else {
                    return Vec::new();
                };
                let mut ids: Vec<i64> = tokenize(text)
                    .iter()
                    .filter_map(|w| vocabulary.word_id(w))
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            })
            .collect();

        Self { rows }
    }

    /// Whether the row contains the word.
    pub fn contains(&self, row: usize, word_id: i64) -> bool {
        self.rows[row].binary_search(&word_id).is_ok()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let col = StringColumn::new(
            "comment",
            vec![Some("alpha beta".to_string()), Some("beta".to_string()), None],
        );
        let vocab = Vocabulary::fit(&col, 1, 100);
        let index = WordIndex::new(&col, &vocab);

        let alpha = vocab.word_id("alpha").unwrap();
        let beta = vocab.word_id("beta").unwrap();

        assert!(index.contains(0, alpha));
        assert!(index.contains(0, beta));
        assert!(!index.contains(1, alpha));
        assert!(!index.contains(2, beta));
    }
}
