// ============================================================
// Layer 5 - Downstream Consumer
// ============================================================
// LinearProbe is the reference consumer: a single linear layer
// over pooled token vectors, trained with plain SGD against an
// L2 pull-to-zero objective. It exists to exercise the full
// bridge contract (drain the listener, pool, compute a loss,
// push the gradient back through the pooler and the bridge
// callback) without dragging in a real downstream task.

use burn::prelude::*;
use burn::tensor::Distribution;
use std::cell::RefCell;
use std::rc::Rc;

use crate::domain::document::Document;
use crate::domain::error::BridgeError;
use crate::ml::listener::TransformerListener;
use crate::ml::pooling::AlignmentPooler;

pub struct LinearProbe<B: Backend> {
    listener: Rc<RefCell<TransformerListener<B>>>,
    pooler:   AlignmentPooler<B>,
    /// [width, classes] projection
    weight:   Tensor<B, 2>,
    lr:       f64,
}

impl<B: Backend> LinearProbe<B> {
    pub fn new(
        listener: Rc<RefCell<TransformerListener<B>>>,
        pooler: AlignmentPooler<B>,
        classes: usize,
        lr: f64,
        device: &B::Device,
    ) -> Self {
        let width = listener.borrow().width();
        let weight = Tensor::random([width, classes], Distribution::Normal(0.0, 0.02), device);
        Self { listener, pooler, weight, lr }
    }

    /// One training update over a batch. Drains the listener,
    /// steps the probe weights, and hands the encoder-space
    /// gradient back through the bridge callback. Returns the
    /// probe loss.
    pub fn update(&mut self, docs: &[Document]) -> Result<f64, BridgeError> {
        let (outputs, backprop) = self.listener.borrow_mut().forward_train(docs)?;
        let (pooled, traces) = self.pooler.forward_batch(&outputs)?;

        // Loss = 0.5 * Σ ‖XW‖²; its gradient wrt the logits is
        // the logits themselves.
        let mut loss = 0.0;
        let mut d_weight = self.weight.zeros_like();
        let mut d_pooled = Vec::with_capacity(pooled.len());
        for x in pooled {
            let logits = x.clone().matmul(self.weight.clone());
            loss += 0.5
                * (logits.clone() * logits.clone())
                    .sum()
                    .into_scalar()
                    .elem::<f64>();
            let d_logits = logits;
            d_weight = d_weight + x.clone().transpose().matmul(d_logits.clone());
            d_pooled.push(d_logits.matmul(self.weight.clone().transpose()));
        }
        self.weight = self.weight.clone() - d_weight.mul_scalar(self.lr);

        let d_docs = self.pooler.backward_batch(d_pooled, traces)?;
        backprop(d_docs)?;
        Ok(loss)
    }

    /// Pooled logits per document, served from the annotation
    /// store.
    pub fn predict(&self, docs: &[Document]) -> Result<Vec<Tensor<B, 2>>, BridgeError> {
        let (outputs, _backprop) = self.listener.borrow().forward_infer(docs)?;
        let (pooled, _) = self.pooler.forward_batch(&outputs)?;
        Ok(pooled
            .into_iter()
            .map(|x| x.matmul(self.weight.clone()))
            .collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::spans::SpanSplitter;
    use crate::data::tokenize::testing::word_piece_fixture;
    use crate::ml::coordinator::EncoderCoordinator;
    use crate::ml::encoder::testing::{RecordingEncoder, TB};
    use crate::ml::pooling::IdentityPooling;
    use crate::ml::producer::TransformerProducer;

    fn rig() -> (EncoderCoordinator<TB, RecordingEncoder>, LinearProbe<TB>) {
        let producer = TransformerProducer::new(
            RecordingEncoder::new(4, 2),
            word_piece_fixture(),
            SpanSplitter::new(128, 128),
            1024,
            Default::default(),
        );
        let mut coord = EncoderCoordinator::new(producer);
        let (handle, listener) = coord.register_listener();
        coord.mark_dispatcher(handle);
        let pooler = AlignmentPooler::new(Box::new(IdentityPooling), 1.0, Default::default());
        let probe = LinearProbe::new(listener, pooler, 3, 0.01, &Default::default());
        (coord, probe)
    }

    #[test]
    fn test_update_returns_a_finite_loss() {
        let (mut coord, mut probe) = rig();
        let docs = vec![Document::new("a.txt", "playing chess")];
        coord.update(&docs).unwrap();
        let loss = probe.update(&docs).unwrap();
        assert!(loss.is_finite() && loss >= 0.0);
    }

    #[test]
    fn test_update_steps_the_probe_weights() {
        let (mut coord, mut probe) = rig();
        let docs = vec![Document::new("a.txt", "playing chess")];
        let before: Vec<f32> = probe.weight.clone().into_data().value;
        coord.update(&docs).unwrap();
        probe.update(&docs).unwrap();
        let after: Vec<f32> = probe.weight.clone().into_data().value;
        assert_ne!(before, after);
    }

    #[test]
    fn test_predict_after_annotation() {
        let (mut coord, probe) = rig();
        let docs = vec![
            Document::new("a.txt", "playing chess"),
            Document::new("b.txt", "go"),
        ];
        coord.predict(&docs).unwrap();
        let logits = probe.predict(&docs).unwrap();
        assert_eq!(logits.len(), 2);
        // One row per word-level token
        assert_eq!(logits[0].dims(), [2, 3]);
        assert_eq!(logits[1].dims(), [1, 3]);
    }

    #[test]
    fn test_repeated_steps_interleave_cleanly() {
        let (mut coord, mut probe) = rig();
        let docs = vec![Document::new("a.txt", "playing chess")];
        for _ in 0..3 {
            coord.update(&docs).unwrap();
            probe.update(&docs).unwrap();
        }
    }
}
