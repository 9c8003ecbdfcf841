//! Canonical text layer for hybrid search.
//!
//! Everything that turns user or item text into a stable key lives here:
//! query canonicalization, field-order-stable item text, lexical terms and
//! the SHA-256 cache keys the embedding caches are addressed by.
//!
//! ## What we do
//!
//! - Unicode normalization (NFKC by default, configurable)
//! - Lowercasing and optional punctuation stripping
//! - Whitespace collapsing and trimming
//! - Field composition in a fixed order (`Title: .. . Game: .. . Tags: ..`)
//! - Tokenization into lexical terms
//!
//! ## Pure function guarantee
//!
//! No I/O, no clock calls, no locale dependence. The same text and config
//! give the same canonical text, hence the same cache key, on any machine.
//!
//! ```rust
//! use canonical::{canonicalize, cache_key, CanonicalizeConfig};
//!
//! let cfg = CanonicalizeConfig::default();
//! let a = canonicalize("  Funny VALORANT   clutch ", &cfg).unwrap();
//! let b = canonicalize("funny valorant clutch", &cfg).unwrap();
//! assert_eq!(a, b);
//! assert_eq!(cache_key("query", "m1", &a), cache_key("query", "m1", &b));
//! ```

mod config;
mod error;
mod fields;
mod hash;
mod normalize;
mod token;

pub use crate::config::CanonicalizeConfig;
pub use crate::error::CanonicalError;
pub use crate::fields::{compose_item_text, ItemFields};
pub use crate::hash::{cache_key, content_hash, hash_text};
pub use crate::normalize::{canonicalize, canonicalize_query, CanonicalQuery};
pub use crate::token::{terms, tokenize, Token};
