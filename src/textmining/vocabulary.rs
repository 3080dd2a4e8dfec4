//! Vocabulary over a text column

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::containers::StringColumn;
use crate::textmining::tokenize;

/// The words admitted from a text column, sorted lexicographically.
///
/// A word enters the vocabulary when it appears in at least `min_df` rows
/// (document frequency, not term frequency); the `vocab_size` most frequent
/// survivors are kept. Word ids are indices into the sorted list, so they
/// are stable for a fitted vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    words: Arc<Vec<String>>,
}

impl Vocabulary {
    /// Fits the vocabulary on a text column.
    pub fn fit(col: &StringColumn, min_df: usize, vocab_size: usize) -> Self {
        let mut document_freq: HashMap<String, usize> = HashMap::new();

        for cell in col.iter() {
            let Some(text) = cell else { continue };
            let mut words = tokenize(text);
            words.sort();
            words.dedup();
            for word in words {
                *document_freq.entry(word).or_insert(0) += 1;
            }
        }

        let mut pairs: Vec<(String, usize)> = document_freq
            .into_iter()
            .filter(|(_, df)| *df >= min_df.max(1))
            .collect();

        // Most frequent first; ties by word so the cut is deterministic.
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(vocab_size);

        let mut words: Vec<String> = pairs.into_iter().map(|(w, _)| w).collect();
        words.sort();

        Self {
            words: Arc::new(words),
        }
    }

    /// The id of `word`, if it is part of the vocabulary.
    pub fn word_id(&self, word: &str) -> Option<i64> {
        self.words
            .binary_search_by(|w| w.as_str().cmp(word))
            .ok()
            .map(|ix| ix as i64)
    }

    pub fn word(&self, id: i64) -> &str {
        &self.words[id as usize]
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col() -> StringColumn {
        StringColumn::new(
            "comment",
            vec![
                Some("good product good price".to_string()),
                Some("good delivery".to_string()),
                Some("bad product".to_string()),
                None,
            ],
        )
    }

    #[test]
    fn test_min_df_filters_rare_words() {
        let vocab = Vocabulary::fit(&col(), 2, 100);
        assert!(vocab.word_id("good").is_some());
        assert!(vocab.word_id("product").is_some());
        assert!(vocab.word_id("bad").is_none());
        assert!(vocab.word_id("delivery").is_none());
    }

    #[test]
    fn test_document_frequency_counts_rows_once() {
        // "good" appears twice in row 0 but only two rows contain it.
        let vocab = Vocabulary::fit(&col(), 3, 100);
        assert!(vocab.is_empty());
    }

    #[test]
    fn test_vocab_size_cap() {
        let vocab = Vocabulary::fit(&col(), 1, 1);
        assert_eq!(vocab.len(), 1);
        assert_eq!(vocab.word(0), "good");
    }
}
