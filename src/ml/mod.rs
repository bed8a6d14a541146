// ============================================================
// Layer 5 - ML / Bridge Core (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code; no other
// layer imports from burn except the data batcher's tensor
// stacking.
//
// What's in this layer:
//
//   batch.rs       — TransformerData / FullTransformerBatch, the
//                    per-document and per-batch encoder output
//                    containers, with split/unsplit operations
//
//   pooling.rs     — the alignment/pooling engine: subtoken rows
//                    summed into per-token vectors, with the
//                    exact adjoint for the backward pass
//
//   encoder.rs     — the Encoder collaborator trait plus a Burn
//                    transformer implementation (autodiff
//                    training, Adam updates)
//
//   producer.rs    — runs the encoder once per batch, splits the
//                    output per document, caches annotations
//
//   listener.rs    — the consumer-side adapter that substitutes
//                    broadcast data for its own computation
//
//   coordinator.rs — registration, the per-step state machine,
//                    gradient accumulation and backward dispatch
//
//   consumer.rs    — a small linear probe standing in for real
//                    downstream consumer models

/// Per-document and per-batch encoder output containers
pub mod batch;

/// Subtoken-to-token pooling with exact adjoints
pub mod pooling;

/// Encoder collaborator trait + Burn transformer implementation
pub mod encoder;

/// Shared encoder wrapper: one forward per batch, broadcast out
pub mod producer;

/// Consumer-side adapter fed by the producer
pub mod listener;

/// Gradient aggregation and backward dispatch
pub mod coordinator;

/// Demo downstream consumer (linear probe)
pub mod consumer;
