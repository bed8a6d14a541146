// ============================================================
// Layer 3 - Document Domain Type
// ============================================================
// A Document is an ordered sequence of word-level tokens. Each
// token carries a stable integer identity (`orth`, a hash of its
// text) that is used ONLY for batch fingerprinting, never for
// any semantic purpose.
//
// Documents also carry a process-unique `id`. The id is the key
// under which the producer caches encoder output for a document,
// so unrelated consumers reading the same document outside
// training can retrieve it later.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DOC_ID: AtomicU64 = AtomicU64::new(1);

/// Stable integer identity for a token's surface form.
pub fn orth_of(text: &str) -> u64 {
    let mut h = DefaultHasher::new();
    text.hash(&mut h);
    h.finish()
}

/// One word-level token. `text` is the surface form as it will be
/// handed to the subword tokenizer; `orth` is its fingerprint id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub orth: u64,
}

impl Token {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let orth = orth_of(&text);
        Self { text, orth }
    }
}

/// A tokenised document.
///
/// Tokens come from whitespace-splitting the (cleaned) source
/// text, which matches the pre-tokenisation the subword tokenizer
/// applies. Subtoken word-alignment indices therefore line up
/// with `tokens` positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Process-unique id, used as the annotation-cache key
    pub id: u64,

    /// Where the document came from (filename), for traceability
    pub source: String,

    /// Ordered word-level tokens
    pub tokens: Vec<Token>,
}

impl Document {
    /// Build a Document by whitespace-splitting `text`.
    pub fn new(source: impl Into<String>, text: &str) -> Self {
        Self {
            id: NEXT_DOC_ID.fetch_add(1, Ordering::Relaxed),
            source: source.into(),
            tokens: text.split_whitespace().map(Token::new).collect(),
        }
    }

    /// The text as the subword tokenizer will see it: tokens
    /// joined by single spaces.
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self.tokens.iter().map(|t| t.text.as_str()).collect();
        parts.join(" ")
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenisation_splits_on_whitespace() {
        let doc = Document::new("a.txt", "the  quick\tbrown fox");
        let texts: Vec<&str> = doc.tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["the", "quick", "brown", "fox"]);
    }

    #[test]
    fn test_orth_is_stable_per_surface_form() {
        let a = Token::new("hello");
        let b = Token::new("hello");
        let c = Token::new("world");
        assert_eq!(a.orth, b.orth);
        assert_ne!(a.orth, c.orth);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Document::new("a.txt", "one");
        let b = Document::new("b.txt", "one");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_empty_document() {
        let doc = Document::new("empty.txt", "   ");
        assert!(doc.is_empty());
        assert_eq!(doc.text(), "");
    }
}
