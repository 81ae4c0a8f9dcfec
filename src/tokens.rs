//! C2: token pipeline. Lowercase + Porter-stem + stopword filter of arbitrary text.
//!
//! Purely functional, no I/O. `tokenize` is reused verbatim for both page text (the indexing
//! side) and query text (C9) -- sharing one function is a correctness requirement, not a style
//! choice: the index and a query must stem identically or nothing will ever match.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use stop_words::{get, LANGUAGE};

static WORD_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").unwrap());
static PUNCTUATION_SPLIT: Lazy<Regex> = Lazy::new(|| {
    // ASCII punctuation, escaped for use inside a character class.
    Regex::new(r#"[!"#$%&'()*+,\-./:;<=>?@\[\\\]^_`{|}~]+"#).unwrap()
});
static STOPWORDS: Lazy<std::collections::HashSet<String>> =
    Lazy::new(|| get(LANGUAGE::English).into_iter().collect());

/// One stemmed token and the number of times it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub name: String,
    pub count: u32,
}

/// A sum-merging map from stemmed token name to `Token`.
#[derive(Debug, Clone, Default)]
pub struct TokenContainer {
    tokens: HashMap<String, Token>,
}

impl TokenContainer {
    pub fn new() -> Self {
        TokenContainer::default()
    }

    /// Adds one occurrence of `name`, merging into any existing entry by summing counts.
    pub fn add(&mut self, name: &str, count: u32) {
        self.tokens
            .entry(name.to_string())
            .and_modify(|t| t.count += count)
            .or_insert_with(|| Token { name: name.to_string(), count });
    }

    pub fn get_count(&self, name: &str) -> Option<u32> {
        self.tokens.get(name).map(|t| t.count)
    }

    /// Removes up to `count` occurrences of `name`, dropping the entry entirely once it reaches
    /// zero. Used to subtract out noise (e.g. script/style text) tokenized separately.
    pub fn subtract(&mut self, name: &str, count: u32) {
        if let Some(token) = self.tokens.get_mut(name) {
            token.count = token.count.saturating_sub(count);
            if token.count == 0 {
                self.tokens.remove(name);
            }
        }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    pub fn token_names(&self) -> Vec<String> {
        self.tokens.keys().cloned().collect()
    }

    pub fn total_tokens(&self) -> u32 {
        self.tokens.values().map(|t| t.count).sum()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn into_map(self) -> HashMap<String, u32> {
        self.tokens.into_iter().map(|(name, token)| (name, token.count)).collect()
    }
}

/// Tokenize arbitrary text into a `TokenContainer` of stemmed, lowercased, non-stopword tokens.
pub fn tokenize(text: &str) -> TokenContainer {
    let mut raw_tokens: Vec<&str> = WORD_SPLIT.split(text).filter(|t| !t.is_empty()).collect();

    let mut extra = Vec::new();
    for token in &raw_tokens {
        if token.chars().any(|c| c.is_ascii_punctuation()) {
            extra.extend(PUNCTUATION_SPLIT.split(token).filter(|t| !t.is_empty()));
        }
    }
    raw_tokens.extend(extra);

    let mut container = TokenContainer::new();
    for raw in raw_tokens {
        let lowered = raw.to_lowercase();
        let stemmed = porter_stemmer::stem(&lowered);
        if stemmed.is_empty() || STOPWORDS.contains(&stemmed) {
            continue;
        }
        container.add(&stemmed, 1);
    }
    container
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_lowercased_and_stemmed() {
        let t = tokenize("Running RUNNERS run");
        // "running", "runners", "run" all stem toward "run"-ish forms.
        assert!(t.tokens().all(|tok| tok.name == tok.name.to_lowercase()));
        assert!(!t.is_empty());
    }

    #[test]
    fn stopwords_are_dropped() {
        let t = tokenize("the quick fox");
        assert!(t.get_count("the").is_none());
    }

    #[test]
    fn empty_text_has_no_tokens() {
        let t = tokenize("   ");
        assert!(t.is_empty());
    }

    #[test]
    fn punctuation_words_split_into_subtokens() {
        let t = tokenize("rock-n-roll");
        // the whole hyphenated run plus its pieces should all be represented
        assert!(t.token_names().iter().any(|n| n.contains("rock") || n == "rock"));
    }

    #[test]
    fn repeated_words_merge_by_sum() {
        let t = tokenize("apple apple apple pie");
        let apple_stem = porter_stemmer::stem("apple");
        assert_eq!(t.get_count(&apple_stem), Some(3));
    }

    #[test]
    fn query_and_index_tokenization_agree() {
        let index_tokens = tokenize("The Rust Programming Language");
        let query_tokens = tokenize("rust programming");
        for name in query_tokens.token_names() {
            assert!(index_tokens.get_count(&name).is_some());
        }
    }
}
