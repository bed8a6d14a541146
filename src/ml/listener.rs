// ============================================================
// Layer 5 - Transformer Listener
// ============================================================
// A listener is a consumer's receiving end of the broadcast: the
// coordinator arms it with the producer's output for the current
// batch, and the consumer drains it exactly once during its own
// forward pass. The slot is an explicit little state machine so
// the failure modes (never armed, drained twice, armed with a
// different batch than the one being consumed) surface as typed
// errors instead of silently stale tensors.

use burn::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

use crate::data::fingerprint::batch_fingerprint;
use crate::domain::document::Document;
use crate::domain::error::BridgeError;
use crate::ml::batch::TransformerData;
use crate::ml::producer::AnnotationStore;

/// Gradient hand-off back to the coordinator: per-document
/// gradient bundles shaped like the outputs that were consumed.
pub type BackpropFn<B> = Rc<dyn Fn(Vec<TransformerData<B>>) -> Result<(), BridgeError>>;

pub fn noop_backprop<B: Backend>() -> BackpropFn<B> {
    Rc::new(|_| Ok(()))
}

enum ListenerSlot<B: Backend> {
    /// No broadcast received yet
    Empty,
    /// Holding one batch's outputs, not yet consumed
    Armed {
        fingerprint: u64,
        outputs:     Vec<TransformerData<B>>,
        backprop:    Option<BackpropFn<B>>,
    },
    /// Outputs drained; kept for error reporting
    Consumed { fingerprint: u64 },
}

pub struct TransformerListener<B: Backend> {
    slot:        ListenerSlot<B>,
    width:       usize,
    annotations: Rc<RefCell<AnnotationStore<B>>>,
    device:      B::Device,
}

impl<B: Backend> TransformerListener<B> {
    pub fn new(
        width: usize,
        annotations: Rc<RefCell<AnnotationStore<B>>>,
        device: B::Device,
    ) -> Self {
        Self { slot: ListenerSlot::Empty, width, annotations, device }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Arm the slot with one batch's outputs. A fresh broadcast
    /// always overwrites whatever was there.
    pub fn receive(
        &mut self,
        fingerprint: u64,
        outputs: Vec<TransformerData<B>>,
        backprop: Option<BackpropFn<B>>,
    ) {
        self.slot = ListenerSlot::Armed { fingerprint, outputs, backprop };
    }

    /// Drain the armed outputs for a training forward pass. The
    /// documents must be the same batch the slot was armed with.
    pub fn forward_train(
        &mut self,
        docs: &[Document],
    ) -> Result<(Vec<TransformerData<B>>, BackpropFn<B>), BridgeError> {
        match std::mem::replace(&mut self.slot, ListenerSlot::Empty) {
            ListenerSlot::Empty => Err(BridgeError::UnboundListener),
            ListenerSlot::Consumed { fingerprint } => {
                self.slot = ListenerSlot::Consumed { fingerprint };
                Err(BridgeError::UnboundListener)
            }
            ListenerSlot::Armed { fingerprint, outputs, backprop } => {
                let got = batch_fingerprint(docs);
                if got != fingerprint {
                    self.slot = ListenerSlot::Armed { fingerprint, outputs, backprop };
                    return Err(BridgeError::BatchMismatch { expected: fingerprint, got });
                }
                self.slot = ListenerSlot::Consumed { fingerprint };
                Ok((outputs, backprop.unwrap_or_else(noop_backprop)))
            }
        }
    }

    /// Inference-time lookup: serve each document's most recent
    /// annotation from the shared store. The returned callback is
    /// a no-op, mirroring the training signature so consumers can
    /// treat both forwards uniformly.
    pub fn forward_infer(
        &self,
        docs: &[Document],
    ) -> Result<(Vec<TransformerData<B>>, BackpropFn<B>), BridgeError> {
        if docs.is_empty() {
            let placeholder = vec![TransformerData::empty(self.width, &self.device)];
            return Ok((placeholder, noop_backprop()));
        }
        let store = self.annotations.borrow();
        let data = docs
            .iter()
            .map(|doc| {
                if doc.is_empty() {
                    return Ok(TransformerData::empty(self.width, &self.device));
                }
                store
                    .get(&doc.id)
                    .cloned()
                    .ok_or(BridgeError::MissingAnnotation { doc_id: doc.id })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((data, noop_backprop()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type TB = burn::backend::NdArray;

    fn listener() -> TransformerListener<TB> {
        TransformerListener::new(
            4,
            Rc::new(RefCell::new(AnnotationStore::new())),
            Default::default(),
        )
    }

    fn armed_with(docs: &[Document], l: &mut TransformerListener<TB>) {
        let device = Default::default();
        let outputs = docs
            .iter()
            .map(|_| TransformerData::empty(4, &device))
            .collect();
        l.receive(batch_fingerprint(docs), outputs, None);
    }

    #[test]
    fn test_unarmed_listener_rejects_training_forward() {
        let mut l = listener();
        let docs = vec![Document::new("a.txt", "chess")];
        assert!(matches!(
            l.forward_train(&docs),
            Err(BridgeError::UnboundListener)
        ));
    }

    #[test]
    fn test_double_drain_is_an_error() {
        let mut l = listener();
        let docs = vec![Document::new("a.txt", "chess")];
        armed_with(&docs, &mut l);
        l.forward_train(&docs).unwrap();
        assert!(matches!(
            l.forward_train(&docs),
            Err(BridgeError::UnboundListener)
        ));
    }

    #[test]
    fn test_fingerprint_mismatch_is_detected() {
        let mut l = listener();
        let armed = vec![Document::new("a.txt", "chess")];
        let other = vec![Document::new("b.txt", "go")];
        armed_with(&armed, &mut l);
        match l.forward_train(&other) {
            Err(BridgeError::BatchMismatch { expected, got }) => {
                assert_eq!(expected, batch_fingerprint(&armed));
                assert_eq!(got, batch_fingerprint(&other));
            }
            Err(other) => panic!("expected BatchMismatch, got {other:?}"),
            Ok(_) => panic!("mismatched batch drained the slot"),
        }
        // The slot stays armed; the right batch still drains.
        assert!(l.forward_train(&armed).is_ok());
    }

    #[test]
    fn test_rebroadcast_overwrites_consumed_slot() {
        let mut l = listener();
        let docs = vec![Document::new("a.txt", "chess")];
        armed_with(&docs, &mut l);
        l.forward_train(&docs).unwrap();
        armed_with(&docs, &mut l);
        assert!(l.forward_train(&docs).is_ok());
    }

    #[test]
    fn test_infer_reads_the_annotation_store() {
        let l = listener();
        let docs = vec![Document::new("a.txt", "chess")];
        let device = Default::default();
        l.annotations
            .borrow_mut()
            .insert(docs[0].id, TransformerData::empty(4, &device));
        let (out, _) = l.forward_infer(&docs).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_infer_missing_annotation_names_the_document() {
        let l = listener();
        let docs = vec![Document::new("a.txt", "chess")];
        match l.forward_infer(&docs) {
            Err(BridgeError::MissingAnnotation { doc_id }) => assert_eq!(doc_id, docs[0].id),
            Err(other) => panic!("expected MissingAnnotation, got {other:?}"),
            Ok(_) => panic!("lookup served a missing annotation"),
        }
    }

    #[test]
    fn test_infer_serves_empty_documents_without_lookup() {
        let l = listener();
        let docs = vec![Document::new("a.txt", "")];
        let (out, _) = l.forward_infer(&docs).unwrap();
        assert_eq!(out[0].width, 4);
    }

    #[test]
    fn test_infer_with_no_documents_returns_one_placeholder() {
        let l = listener();
        let (out, backprop) = l.forward_infer(&[]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].align.is_empty());
        // The no-op callback accepts a gradient without effect.
        backprop(Vec::new()).unwrap();
    }
}
