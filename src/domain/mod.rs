// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Pure Rust structs and traits that define the core concepts
// of the bridge: documents made of tokens, the subtoken-to-token
// alignment, and the protocol error taxonomy.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - NO ML-specific code
//   - Only plain Rust structs, enums, and traits
//
// Keeping this layer framework-free means the alignment and
// fingerprint logic can be unit tested without a tensor backend.

// A tokenised document with stable per-token identities
pub mod document;

// Bidirectional subtoken <-> token position mapping
pub mod alignment;

// The typed error taxonomy of the bridge protocol
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
