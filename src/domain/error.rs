// ============================================================
// Layer 3 - Bridge Error Taxonomy
// ============================================================
// Every failure mode of the producer/listener protocol is a
// variant here. All of them are unrecoverable for the current
// batch: no variant is retried at this layer, callers either
// surface the error or abort the step.
//
// The application layer wraps these in anyhow::Error; tests
// downcast to assert on the exact variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No usable hidden-layer tensor, an alignment index out of
    /// bounds, or a token/subtoken count mismatch. Fatal for the
    /// current batch.
    #[error("alignment error: {0}")]
    Alignment(String),

    /// A listener's recomputed fingerprint disagrees with the one
    /// the producer broadcast. Indicates the pipeline invoked a
    /// consumer out of step; never silently resynced.
    #[error(
        "batch fingerprint mismatch: producer sent {expected:#018x}, listener saw {got:#018x}"
    )]
    BatchMismatch { expected: u64, got: u64 },

    /// A listener was invoked in training mode with no pending
    /// broadcast. The listener was never armed by its producer,
    /// or its slot was already consumed this step.
    #[error("listener invoked with no pending broadcast; is it registered with a producer?")]
    UnboundListener,

    /// Inference asked for a document whose encoder output was
    /// never cached by a previous predict call.
    #[error("no cached encoder output for document {doc_id}")]
    MissingAnnotation { doc_id: u64 },

    /// update() was called without any listener marked to trigger
    /// the encoder backward pass.
    #[error("no listener is marked to dispatch the encoder backward pass")]
    NoDispatcher,

    /// A second step was started (or a callback ran) while a
    /// previous step's gradients were still in flight. At most
    /// one batch may be in flight per coordinator.
    #[error("training step out of order (phase: {phase})")]
    StepInFlight { phase: &'static str },

    /// The subword tokenizer collaborator failed.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}
