// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Cross-cutting persistence concerns:
//
//   tokenizer_store.rs — builds a WordPiece vocabulary from the
//                        corpus on first run and persists it as
//                        tokenizer JSON, so training and
//                        inference share one subword mapping
//
//   checkpoint.rs      — saves/restores encoder weights with
//                        Burn's CompactRecorder, plus the train
//                        config JSON needed to rebuild the
//                        architecture for inference
//
//   metrics.rs         — appends per-step training metrics
//                        (encoder gradient norm, consumer loss)
//                        to a CSV file

/// Tokenizer vocabulary building and persistence
pub mod tokenizer_store;

/// Encoder checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
