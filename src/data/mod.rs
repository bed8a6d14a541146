// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Everything between raw text files and the tensors the encoder
// consumes. The pipeline flows in this order:
//
//   .txt files
//       │
//       ▼
//   TextLoader        → reads files, builds Documents
//       │
//       ▼
//   Preprocessor      → cleans text (whitespace, control chars)
//       │
//       ▼
//   SubwordTokenizer  → subtoken ids + word alignment
//       │
//       ▼
//   SpanSplitter      → windows long subtoken sequences
//       │
//       ▼
//   batch_by_length   → groups spans under a work budget
//       │
//       ▼
//   pad_spans         → stacks one sub-batch into Int tensors
//
// Each module is responsible for exactly one step and is
// independently testable.

/// Loads .txt files from a directory
pub mod loader;

/// Cleans and normalises raw text
pub mod preprocessor;

/// Splits long subtoken sequences into sliding windows
pub mod spans;

/// Length-based batching plus sub-batch tensor padding
pub mod batcher;

/// Deterministic, order-sensitive batch identity
pub mod fingerprint;

/// Subword tokenizer wrapper producing ids + word alignment
pub mod tokenize;
