//! Configuration for canonicalization.
//!
//! The `version` participates in every cache key derived from canonical text,
//! so bump it whenever the output of [`canonicalize`](crate::canonicalize)
//! changes for some input.

use serde::{Deserialize, Serialize};

/// Knobs for the canonical text pipeline.
///
/// ```rust
/// use canonical::CanonicalizeConfig;
///
/// let config = CanonicalizeConfig::default();
/// assert_eq!(config.version, 1);
/// assert!(config.normalize_unicode);
/// assert!(config.lowercase);
/// assert!(!config.strip_punctuation);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalizeConfig {
    /// Version of the canonicalization behavior. Must be >= 1.
    pub version: u32,
    /// Apply Unicode NFKC normalization before any other transform.
    #[serde(default = "default_true")]
    pub normalize_unicode: bool,
    /// Treat Unicode punctuation as a delimiter and drop it.
    #[serde(default)]
    pub strip_punctuation: bool,
    /// Apply locale-free Unicode lowercasing.
    #[serde(default = "default_true")]
    pub lowercase: bool,
}

impl Default for CanonicalizeConfig {
    fn default() -> Self {
        Self {
            version: 1,
            normalize_unicode: true,
            strip_punctuation: false,
            lowercase: true,
        }
    }
}

impl CanonicalizeConfig {
    /// Config used for lexical terms: same as the default but punctuation is
    /// a delimiter, so `1v5,` and `1v5` produce the same term.
    pub fn lexical() -> Self {
        Self {
            strip_punctuation: true,
            ..Self::default()
        }
    }

    pub fn with_strip_punctuation(mut self, strip: bool) -> Self {
        self.strip_punctuation = strip;
        self
    }

    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }
}

fn default_true() -> bool {
    true
}
