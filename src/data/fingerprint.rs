// ============================================================
// Layer 4 - Batch Fingerprint
// ============================================================
// A cheap, deterministic, order-sensitive identity for a batch
// of documents. The producer stamps every broadcast with the
// fingerprint of the batch it encoded; a listener recomputes the
// fingerprint of the batch it is handed and refuses to serve
// output that was computed for different input.
//
// The hash covers the document count, each document's token
// count and every token orth id, in order, so permuting the
// documents or editing any token changes the result. This is
// not a cryptographic identity: collisions are possible in
// principle, and a mismatch is always fatal rather than
// "resynced", precisely because a match cannot be fully trusted.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::domain::document::Document;

/// Deterministic, order-sensitive batch identity.
/// Pure, O(total tokens), no side effects.
pub fn batch_fingerprint(docs: &[Document]) -> u64 {
    let mut h = DefaultHasher::new();
    docs.len().hash(&mut h);
    for doc in docs {
        doc.tokens.len().hash(&mut h);
        for token in &doc.tokens {
            token.orth.hash(&mut h);
        }
    }
    h.finish()
}
