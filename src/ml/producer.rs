// ============================================================
// Layer 5 - Transformer Producer
// ============================================================
// One producer run turns a batch of documents into a
// FullTransformerBatch: tokenize, window long documents into
// spans, pack spans into length-balanced sub-batches, run each
// sub-batch through the shared encoder, then slice the outputs
// back apart per document.
//
// Spans are numbered globally across the batch (doc by doc,
// skipping empty documents) and the sub-batch composition is
// recorded, so gradients arriving later can be routed back to
// the exact encoder calls that produced them.

use burn::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

use crate::data::batcher::{batch_by_length, pad_spans};
use crate::data::tokenize::{DocEncoding, SubwordTokenizer};
use crate::data::spans::SpanSplitter;
use crate::domain::document::Document;
use crate::domain::error::BridgeError;
use crate::ml::batch::{FullTransformerBatch, LayerTensor, TransformerData};
use crate::ml::encoder::Encoder;

/// Last produced output per document id, shared between the
/// producer (writer) and listeners (readers) for inference.
pub type AnnotationStore<B> = HashMap<u64, TransformerData<B>>;

pub struct TransformerProducer<B: Backend, E: Encoder<B>> {
    encoder:     E,
    tokenizer:   SubwordTokenizer,
    splitter:    SpanSplitter,
    /// Work budget per encoder call, in padded subtoken cells
    max_work:    usize,
    annotations: Rc<RefCell<AnnotationStore<B>>>,
    device:      B::Device,
}

impl<B: Backend, E: Encoder<B>> TransformerProducer<B, E> {
    pub fn new(
        encoder: E,
        tokenizer: SubwordTokenizer,
        splitter: SpanSplitter,
        max_work: usize,
        device: B::Device,
    ) -> Self {
        Self {
            encoder,
            tokenizer,
            splitter,
            max_work,
            annotations: Rc::new(RefCell::new(AnnotationStore::new())),
            device,
        }
    }

    pub fn width(&self) -> usize {
        self.encoder.width()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn annotations(&self) -> Rc<RefCell<AnnotationStore<B>>> {
        Rc::clone(&self.annotations)
    }

    /// Run the encoder over a document batch.
    pub fn run(
        &mut self,
        docs: &[Document],
        train: bool,
    ) -> Result<FullTransformerBatch<B>, BridgeError> {
        if docs.is_empty() {
            return Ok(FullTransformerBatch::empty());
        }

        let encodings = self.tokenizer.encode_docs(docs)?;

        // Global span table, doc by doc. Empty documents hold
        // their place with zero spans.
        let mut doc_spans: Vec<Vec<Range<usize>>> = Vec::with_capacity(docs.len());
        let mut lengths: Vec<usize> = Vec::new();
        for enc in &encodings {
            let spans = self.splitter.split(enc.len());
            for span in &spans {
                lengths.push(span.len());
            }
            doc_spans.push(spans);
        }
        let spans_per_doc: Vec<usize> = doc_spans.iter().map(|s| s.len()).collect();

        let width = self.encoder.width();
        if lengths.is_empty() {
            // Nothing to encode; every document is empty.
            let doc_data = docs
                .iter()
                .map(|_| TransformerData::empty(width, &self.device))
                .collect();
            return Ok(FullTransformerBatch {
                doc_data,
                subbatches: Vec::new(),
                spans_per_doc,
                span_len: 0,
            });
        }

        let span_len = lengths.iter().copied().max().unwrap_or(0);
        let subbatches = batch_by_length(&lengths, self.max_work);

        // Flat view of the global span table for row extraction.
        let flat_spans: Vec<(usize, Range<usize>)> = doc_spans
            .iter()
            .enumerate()
            .flat_map(|(d, spans)| spans.iter().map(move |s| (d, s.clone())))
            .collect();

        // One encoder call per sub-batch, all padded to the
        // batch-global span length.
        let mut call_outputs: Vec<Vec<Tensor<B, 3>>> = Vec::with_capacity(subbatches.len());
        let mut locate: HashMap<usize, (usize, usize)> = HashMap::new();
        for (call, members) in subbatches.iter().enumerate() {
            let rows: Vec<Vec<u32>> = members
                .iter()
                .map(|&s| {
                    let (d, range) = &flat_spans[s];
                    encodings[*d].ids[range.clone()].to_vec()
                })
                .collect();
            let input = pad_spans(&rows, span_len, self.tokenizer.pad_id(), &self.device);
            let outputs = self.encoder.encode(input, train)?;
            for (row, &s) in members.iter().enumerate() {
                locate.insert(s, (call, row));
            }
            call_outputs.push(outputs);
        }

        let n_layers = call_outputs[0].len();

        // Slice the call outputs back apart, one TransformerData
        // per document.
        let mut doc_data = Vec::with_capacity(docs.len());
        let mut global = 0usize;
        for (doc, (enc, spans)) in docs.iter().zip(encodings.iter().zip(doc_spans)) {
            if spans.is_empty() {
                doc_data.push(TransformerData::empty(width, &self.device));
                continue;
            }
            let n_spans = spans.len();
            let mut tensors = Vec::with_capacity(n_layers);
            for l in 0..n_layers {
                let parts: Vec<Tensor<B, 3>> = (0..n_spans)
                    .map(|i| {
                        let (call, row) = locate[&(global + i)];
                        call_outputs[call][l]
                            .clone()
                            .slice([row..row + 1, 0..span_len, 0..width])
                    })
                    .collect();
                tensors.push(LayerTensor::Hidden(Tensor::cat(parts, 0)));
            }
            let align = build_alignment(enc, &spans, span_len, doc.tokens.len());
            global += n_spans;
            doc_data.push(TransformerData { tensors, spans, align, width });
        }

        Ok(FullTransformerBatch { doc_data, subbatches, spans_per_doc, span_len })
    }

    /// Publish a batch's outputs to the annotation store, keyed
    /// by document id.
    pub fn set_annotations(&self, docs: &[Document], batch: &FullTransformerBatch<B>) {
        let mut store = self.annotations.borrow_mut();
        for (doc, data) in docs.iter().zip(&batch.doc_data) {
            store.insert(doc.id, data.clone());
        }
    }

    /// Backward pass over the encoder calls of the last training
    /// run, one gradient set per call.
    pub fn encoder_backward(
        &mut self,
        d_calls: Vec<Vec<Tensor<B, 3>>>,
    ) -> Result<(), BridgeError> {
        self.encoder.backprop(d_calls)
    }
}

/// Map each span's subtoken positions to word-level tokens, in
/// flattened-row space (span index * padded span length + offset).
/// Padding rows and special subtokens carry no word id and stay
/// unmapped.
fn build_alignment(
    enc: &DocEncoding,
    spans: &[Range<usize>],
    span_len: usize,
    n_tokens: usize,
) -> crate::domain::alignment::AlignmentMap {
    let mut align =
        crate::domain::alignment::AlignmentMap::new(spans.len() * span_len, n_tokens);
    for (s, span) in spans.iter().enumerate() {
        for (offset, pos) in span.clone().enumerate() {
            if let Some(word) = enc.word_ids[pos] {
                align.push(s * span_len + offset, word);
            }
        }
    }
    align
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tokenize::testing::word_piece_fixture;
    use crate::ml::encoder::testing::{RecordingEncoder, TB};

    fn producer(window: usize, max_work: usize) -> TransformerProducer<TB, RecordingEncoder> {
        TransformerProducer::new(
            RecordingEncoder::new(4, 2),
            word_piece_fixture(),
            SpanSplitter::new(window, window),
            max_work,
            Default::default(),
        )
    }

    #[test]
    fn test_run_splits_outputs_per_document() {
        let mut p = producer(128, 1024);
        let docs = vec![
            Document::new("a.txt", "playing chess"),
            Document::new("b.txt", "go"),
        ];
        let batch = p.run(&docs, false).unwrap();

        assert_eq!(batch.doc_data.len(), 2);
        assert_eq!(batch.spans_per_doc, vec![1, 1]);
        // "playing chess" → play ##ing chess = 3 subtokens, the
        // batch-global span length
        assert_eq!(batch.span_len, 3);
        let first = batch.doc_data[0].last_hidden().unwrap();
        assert_eq!(first.dims(), [1, 3, 4]);
        assert_eq!(batch.doc_data[0].align.tokens(), vec![0, 0, 1]);
        // "go" pads out to the same span length; only row 0 maps
        assert_eq!(batch.doc_data[1].align.pairs(), &[(0, 0)]);
    }

    #[test]
    fn test_long_document_is_windowed() {
        let mut p = producer(2, 1024);
        let docs = vec![Document::new("a.txt", "a b c")];
        let batch = p.run(&docs, false).unwrap();

        assert_eq!(batch.spans_per_doc, vec![2]);
        assert_eq!(batch.doc_data[0].spans, vec![0..2, 2..3]);
        let hidden = batch.doc_data[0].last_hidden().unwrap();
        assert_eq!(hidden.dims(), [2, 2, 4]);
        // Rows 0,1 from span 0, row 2 (span 1 offset 0) → token c
        assert_eq!(batch.doc_data[0].align.pairs(), &[(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_empty_document_holds_its_place() {
        let mut p = producer(128, 1024);
        let docs = vec![
            Document::new("a.txt", "chess"),
            Document::new("b.txt", ""),
            Document::new("c.txt", "go"),
        ];
        let batch = p.run(&docs, false).unwrap();

        assert_eq!(batch.doc_data.len(), 3);
        assert_eq!(batch.spans_per_doc, vec![1, 0, 1]);
        let mid = batch.doc_data[1].last_hidden().unwrap();
        assert_eq!(mid.dims()[0], 0);
    }

    #[test]
    fn test_all_empty_batch_skips_the_encoder() {
        let mut p = producer(128, 1024);
        let docs = vec![Document::new("a.txt", ""), Document::new("b.txt", "")];
        let batch = p.run(&docs, true).unwrap();
        assert_eq!(batch.subbatches.len(), 0);
        assert_eq!(batch.doc_data.len(), 2);
        // No pending calls, so an empty backward succeeds.
        p.encoder_backward(Vec::new()).unwrap();
    }

    #[test]
    fn test_work_budget_forces_multiple_calls() {
        // Spans of lengths 2, 1, 1 against a budget of 2: the two
        // short spans share a call, the long one gets its own.
        let mut p = producer(2, 2);
        let docs = vec![Document::new("a.txt", "a b c"), Document::new("b.txt", "chess")];
        let batch = p.run(&docs, false).unwrap();

        assert_eq!(batch.subbatches.len(), 2);
        let mut covered: Vec<usize> = batch.subbatches.iter().flatten().copied().collect();
        covered.sort_unstable();
        assert_eq!(covered, vec![0, 1, 2]);
    }

    #[test]
    fn test_set_annotations_keys_by_doc_id() {
        let mut p = producer(128, 1024);
        let docs = vec![Document::new("a.txt", "chess")];
        let batch = p.run(&docs, false).unwrap();
        p.set_annotations(&docs, &batch);
        assert!(p.annotations().borrow().contains_key(&docs[0].id));
    }
}
