//! SHA-256 helpers for cache keys and content identity.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of raw text.
///
/// ```rust
/// use canonical::hash_text;
///
/// let hash = hash_text("hello world");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, hash_text("hello world"));
/// assert_ne!(hash, hash_text("hello world!"));
/// ```
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key for an embedding of `canonical_text` produced by `model`.
///
/// ```text
/// "embedding:" kind ":" hex(SHA-256(model ":" canonical_text))
/// ```
///
/// The model tag is part of the digest, so switching models never serves a
/// vector from the previous one.
pub fn cache_key(kind: &str, model: &str, canonical_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_text.as_bytes());
    format!("embedding:{kind}:{}", hex::encode(hasher.finalize()))
}

/// Order-sensitive digest over several parts.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn content_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}
