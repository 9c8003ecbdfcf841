use std::borrow::Cow;

use unicode_categories::UnicodeCategories;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::CanonicalizeConfig;
use crate::error::CanonicalError;
use crate::hash::hash_text;
use crate::token::terms;

/// A query after canonicalization, with the terms the lexical index sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalQuery {
    /// Trimmed, lowercased, whitespace-collapsed query text.
    pub text: String,
    /// Punctuation-free lexical terms of `text`.
    pub terms: Vec<String>,
    /// SHA-256 hex of `text`, stable across processes.
    pub hash: String,
}

/// Canonicalize arbitrary text: NFKC, lowercase, collapse runs of whitespace
/// into one space and trim both ends.
///
/// Returns [`CanonicalError::EmptyInput`] when nothing is left.
pub fn canonicalize(input: &str, cfg: &CanonicalizeConfig) -> Result<String, CanonicalError> {
    if cfg.version == 0 {
        return Err(CanonicalError::InvalidConfig(
            "config version must be >= 1".into(),
        ));
    }

    let normalized: Cow<str> = if cfg.normalize_unicode {
        Cow::Owned(input.nfkc().collect::<String>())
    } else {
        Cow::Borrowed(input)
    };

    let mut out = String::with_capacity(normalized.len());
    let mut pending_space = false;

    // Graphemes keep multi-codepoint emoji and combining marks together.
    for grapheme in normalized.graphemes(true) {
        let lowered: Cow<str> = if cfg.lowercase {
            Cow::Owned(grapheme.to_lowercase())
        } else {
            Cow::Borrowed(grapheme)
        };
        for ch in lowered.chars() {
            let is_delim = ch.is_whitespace() || (cfg.strip_punctuation && ch.is_punctuation());
            if is_delim {
                pending_space = !out.is_empty();
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }

    if out.is_empty() {
        return Err(CanonicalError::EmptyInput);
    }
    Ok(out)
}

/// Canonicalize a search query and derive its lexical terms and hash.
pub fn canonicalize_query(
    input: &str,
    cfg: &CanonicalizeConfig,
) -> Result<CanonicalQuery, CanonicalError> {
    let text = canonicalize(input, cfg)?;
    let terms = terms(&text);
    let hash = hash_text(&text);
    Ok(CanonicalQuery { text, terms, hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_lowercases_and_collapses() {
        let cfg = CanonicalizeConfig::default();
        let out = canonicalize("  Funny\tVALORANT \n\n clutch  ", &cfg).unwrap();
        assert_eq!(out, "funny valorant clutch");
    }

    #[test]
    fn keeps_punctuation_by_default() {
        let cfg = CanonicalizeConfig::default();
        assert_eq!(canonicalize("Insane 1v5 ace!", &cfg).unwrap(), "insane 1v5 ace!");
    }

    #[test]
    fn strips_punctuation_when_configured() {
        let cfg = CanonicalizeConfig::lexical();
        assert_eq!(
            canonicalize("Wait... what?! 1v5, ace.", &cfg).unwrap(),
            "wait what 1v5 ace"
        );
    }

    #[test]
    fn nfkc_merges_compatibility_forms() {
        let cfg = CanonicalizeConfig::default();
        let composed = canonicalize("Caf\u{00E9}", &cfg).unwrap();
        let decomposed = canonicalize("Cafe\u{0301}", &cfg).unwrap();
        assert_eq!(composed, decomposed);
        assert_eq!(canonicalize("\u{FF21}\u{FF23}\u{FF25}", &cfg).unwrap(), "ace");
    }

    #[test]
    fn whitespace_only_is_empty_input() {
        let cfg = CanonicalizeConfig::default();
        assert_eq!(canonicalize(" \t\n ", &cfg), Err(CanonicalError::EmptyInput));
        let lexical = CanonicalizeConfig::lexical();
        assert_eq!(canonicalize("?!...", &lexical), Err(CanonicalError::EmptyInput));
    }

    #[test]
    fn version_zero_rejected() {
        let cfg = CanonicalizeConfig {
            version: 0,
            ..Default::default()
        };
        assert!(matches!(
            canonicalize("text", &cfg),
            Err(CanonicalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn query_hash_ignores_surface_variation() {
        let cfg = CanonicalizeConfig::default();
        let a = canonicalize_query("Amazing  Clutch", &cfg).unwrap();
        let b = canonicalize_query(" amazing clutch ", &cfg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.terms, vec!["amazing", "clutch"]);
        assert_eq!(a.hash.len(), 64);
    }
}
