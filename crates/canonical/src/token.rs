use serde::{Deserialize, Serialize};
use unicode_categories::UnicodeCategories;

/// A token with its UTF-8 byte offsets in the source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// The token text content.
    pub text: String,
    /// Byte offset (inclusive).
    pub start: usize,
    /// Byte offset (exclusive).
    pub end: usize,
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        self.text.as_str()
    }
}

/// Split canonical text on Unicode whitespace, keeping byte offsets.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(token_start) = start.take() {
                tokens.push(Token {
                    text: text[token_start..idx].to_string(),
                    start: token_start,
                    end: idx,
                });
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }

    if let Some(token_start) = start {
        tokens.push(Token {
            text: text[token_start..].to_string(),
            start: token_start,
            end: text.len(),
        });
    }

    tokens
}

/// Lexical terms of already-canonical text.
///
/// Punctuation at either end of a token is trimmed and tokens that were
/// pure punctuation disappear. Inner punctuation (`1v5`, `don't`) is kept.
pub fn terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter_map(|token| {
            let trimmed = token.text.trim_matches(|c: char| c.is_punctuation());
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_lowercase())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_keeps_offsets() {
        let tokens = tokenize("insane  1v5 ace");
        let spans: Vec<_> = tokens.iter().map(|t| (t.text.as_str(), t.start, t.end)).collect();
        assert_eq!(spans, vec![("insane", 0, 6), ("1v5", 8, 11), ("ace", 12, 15)]);
    }

    #[test]
    fn terms_trim_edge_punctuation() {
        assert_eq!(
            terms("title: insane 1v5 ace. game: valorant"),
            vec!["title", "insane", "1v5", "ace", "game", "valorant"]
        );
        assert_eq!(terms("don't -- stop"), vec!["don't", "stop"]);
    }

    #[test]
    fn empty_text_has_no_terms() {
        assert!(terms("").is_empty());
        assert!(terms("  ...  ").is_empty());
    }
}
