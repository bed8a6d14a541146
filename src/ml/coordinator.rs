// ============================================================
// Layer 5 - Encoder Coordinator
// ============================================================
// The coordinator owns the one-encoder / many-consumers
// contract of a training step:
//
//   1. Broadcasting          — run the encoder once, arm every
//                              registered listener with the batch
//   2. AccumulatingGradients — consumers drain their listeners,
//                              compute their losses and hand
//                              gradients back through the armed
//                              backprop callbacks
//   3. DispatchedBackward    — the last consumer (the marked
//                              dispatcher) triggers the single
//                              encoder backward pass over the
//                              merged gradients
//
// The phase lives in a shared Cell so the callbacks handed out
// during a step can verify they are invoked inside that step and
// in the right order.

use burn::prelude::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::data::fingerprint::batch_fingerprint;
use crate::domain::document::Document;
use crate::domain::error::BridgeError;
use crate::ml::batch::{FullTransformerBatch, TransformerData};
use crate::ml::encoder::Encoder;
use crate::ml::listener::{BackpropFn, TransformerListener};
use crate::ml::producer::TransformerProducer;

// ─── Step phase ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    Broadcasting,
    AccumulatingGradients,
    DispatchedBackward,
}

impl StepPhase {
    pub fn name(self) -> &'static str {
        match self {
            StepPhase::Idle => "idle",
            StepPhase::Broadcasting => "broadcasting",
            StepPhase::AccumulatingGradients => "accumulating-gradients",
            StepPhase::DispatchedBackward => "dispatched-backward",
        }
    }
}

/// Opaque reference to a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle {
    index: usize,
}

// ─── Gradient accumulator ─────────────────────────────────────────────────────
/// Element-wise running sum of per-document gradient bundles,
/// one contribution per consumer.
struct GradAccumulator<B: Backend> {
    total:         Option<Vec<TransformerData<B>>>,
    loss:          f64,
    contributions: usize,
}

impl<B: Backend> GradAccumulator<B> {
    fn new() -> Self {
        Self { total: None, loss: 0.0, contributions: 0 }
    }

    fn add(&mut self, d_docs: Vec<TransformerData<B>>) -> Result<(), BridgeError> {
        for doc in &d_docs {
            for tensor in &doc.tensors {
                self.loss += tensor.sum_sq();
            }
        }
        self.contributions += 1;

        self.total = Some(match self.total.take() {
            None => d_docs,
            Some(total) => {
                if total.len() != d_docs.len() {
                    return Err(BridgeError::Alignment(format!(
                        "gradient bundle covers {} documents, accumulator has {}",
                        d_docs.len(),
                        total.len()
                    )));
                }
                total
                    .into_iter()
                    .zip(d_docs)
                    .map(|(acc, doc)| {
                        let TransformerData { tensors, spans, align, width } = acc;
                        let tensors = tensors
                            .into_iter()
                            .zip(&doc.tensors)
                            .map(|(a, b)| a.add(b))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(TransformerData { tensors, spans, align, width })
                    })
                    .collect::<Result<Vec<_>, BridgeError>>()?
            }
        });
        Ok(())
    }

    fn take(&mut self) -> (Option<Vec<TransformerData<B>>>, f64) {
        let total = self.total.take();
        let loss = std::mem::take(&mut self.loss);
        self.contributions = 0;
        (total, loss)
    }
}

// ─── EncoderCoordinator ───────────────────────────────────────────────────────
pub struct EncoderCoordinator<B: Backend, E: Encoder<B>> {
    producer:   Rc<RefCell<TransformerProducer<B, E>>>,
    listeners:  Vec<Rc<RefCell<TransformerListener<B>>>>,
    dispatcher: Option<usize>,
    phase:      Rc<Cell<StepPhase>>,
    last_loss:  Rc<Cell<f64>>,
    device:     B::Device,
}

// The dispatch callback captures the producer Rc inside an Rc<dyn Fn>,
// which is implicitly 'static, so E must be too.
impl<B: Backend, E: Encoder<B> + 'static> EncoderCoordinator<B, E> {
    pub fn new(producer: TransformerProducer<B, E>) -> Self {
        let device = producer.device().clone();
        Self {
            producer: Rc::new(RefCell::new(producer)),
            listeners: Vec::new(),
            dispatcher: None,
            phase: Rc::new(Cell::new(StepPhase::Idle)),
            last_loss: Rc::new(Cell::new(0.0)),
            device,
        }
    }

    pub fn producer(&self) -> Rc<RefCell<TransformerProducer<B, E>>> {
        Rc::clone(&self.producer)
    }

    /// Gradient-norm metric of the last completed step.
    pub fn last_loss(&self) -> f64 {
        self.last_loss.get()
    }

    /// Register a new consumer's listener. The listener shares
    /// the producer's annotation store for inference lookups.
    pub fn register_listener(
        &mut self,
    ) -> (ListenerHandle, Rc<RefCell<TransformerListener<B>>>) {
        let producer = self.producer.borrow();
        let listener = Rc::new(RefCell::new(TransformerListener::new(
            producer.width(),
            producer.annotations(),
            self.device.clone(),
        )));
        drop(producer);
        self.listeners.push(Rc::clone(&listener));
        let handle = ListenerHandle { index: self.listeners.len() - 1 };
        (handle, listener)
    }

    /// Mark which listener's consumer runs last in the step and
    /// therefore triggers the encoder backward pass.
    pub fn mark_dispatcher(&mut self, handle: ListenerHandle) {
        self.dispatcher = Some(handle.index);
    }

    /// Inference pass: run the encoder, publish annotations, arm
    /// every listener without gradient callbacks. Re-arming a
    /// listener mid-step would replace its gradient callback with
    /// nothing and orphan the in-flight accumulation, so inference
    /// waits for the step to close like `update` does.
    pub fn predict(&mut self, docs: &[Document]) -> Result<(), BridgeError> {
        if self.phase.get() != StepPhase::Idle {
            return Err(BridgeError::StepInFlight { phase: self.phase.get().name() });
        }
        let batch = self.producer.borrow_mut().run(docs, false)?;
        self.producer.borrow().set_annotations(docs, &batch);
        let fingerprint = batch_fingerprint(docs);
        for listener in &self.listeners {
            listener
                .borrow_mut()
                .receive(fingerprint, batch.doc_data.clone(), None);
        }
        Ok(())
    }

    /// Training broadcast: run the encoder once and arm every
    /// listener with the outputs plus a gradient callback. The
    /// dispatcher's callback additionally fires the encoder
    /// backward pass once all contributions are in.
    pub fn update(&mut self, docs: &[Document]) -> Result<(), BridgeError> {
        if self.phase.get() != StepPhase::Idle {
            return Err(BridgeError::StepInFlight { phase: self.phase.get().name() });
        }
        let dispatcher = self.dispatcher.ok_or(BridgeError::NoDispatcher)?;

        self.phase.set(StepPhase::Broadcasting);
        let batch = match self.producer.borrow_mut().run(docs, true) {
            Ok(batch) => Rc::new(batch),
            Err(e) => {
                self.phase.set(StepPhase::Idle);
                return Err(e);
            }
        };
        let fingerprint = batch_fingerprint(docs);
        let accumulator = Rc::new(RefCell::new(GradAccumulator::new()));
        tracing::debug!(
            "Broadcasting batch {:016x} ({} docs, {} encoder calls) to {} listeners",
            fingerprint,
            docs.len(),
            batch.subbatches.len(),
            self.listeners.len()
        );

        for (i, listener) in self.listeners.iter().enumerate() {
            let backprop = if i == dispatcher {
                self.dispatch_callback(Rc::clone(&batch), Rc::clone(&accumulator))
            } else {
                self.accumulate_callback(Rc::clone(&accumulator))
            };
            listener
                .borrow_mut()
                .receive(fingerprint, batch.doc_data.clone(), Some(backprop));
        }

        self.phase.set(StepPhase::AccumulatingGradients);
        Ok(())
    }

    /// Callback for non-dispatching consumers: fold the gradient
    /// into the running sum.
    fn accumulate_callback(
        &self,
        accumulator: Rc<RefCell<GradAccumulator<B>>>,
    ) -> BackpropFn<B> {
        let phase = Rc::clone(&self.phase);
        Rc::new(move |d_docs| {
            if phase.get() != StepPhase::AccumulatingGradients {
                return Err(BridgeError::StepInFlight { phase: phase.get().name() });
            }
            accumulator.borrow_mut().add(d_docs)
        })
    }

    /// Callback for the dispatcher: fold in the final gradient,
    /// then route the merged sum back through the encoder calls
    /// and take the optimiser step.
    fn dispatch_callback(
        &self,
        batch: Rc<FullTransformerBatch<B>>,
        accumulator: Rc<RefCell<GradAccumulator<B>>>,
    ) -> BackpropFn<B> {
        let phase = Rc::clone(&self.phase);
        let last_loss = Rc::clone(&self.last_loss);
        let producer = Rc::clone(&self.producer);
        let device = self.device.clone();
        Rc::new(move |d_docs| {
            if phase.get() != StepPhase::AccumulatingGradients {
                return Err(BridgeError::StepInFlight { phase: phase.get().name() });
            }
            let mut acc = accumulator.borrow_mut();
            acc.add(d_docs)?;
            phase.set(StepPhase::DispatchedBackward);

            let contributions = acc.contributions;
            let (total, loss) = acc.take();
            drop(acc);
            tracing::debug!(
                "Dispatching encoder backward: {} gradient contributions, metric {:.6}",
                contributions,
                loss
            );
            let result = (|| {
                let d_calls = match total {
                    Some(total) => {
                        let layers = batch.unsplit_by_doc(&total)?;
                        batch.regroup_for_encoder(layers, &device)?
                    }
                    None => Vec::new(),
                };
                producer.borrow_mut().encoder_backward(d_calls)
            })();

            last_loss.set(loss);
            phase.set(StepPhase::Idle);
            result
        })
    }
}
