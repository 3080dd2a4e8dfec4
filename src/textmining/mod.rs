//! Vocabulary construction and per-row word indices for text columns

mod vocabulary;
mod word_index;

pub use vocabulary::Vocabulary;
pub use word_index::WordIndex;

/// Splits a text cell into lowercase word tokens. Anything that is not
/// alphanumeric separates words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, world!"), vec!["hello", "world"]);
        assert_eq!(tokenize("  "), Vec::<String>::new());
    }
}
