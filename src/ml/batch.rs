// ============================================================
// Layer 5 - Encoder Output Containers
// ============================================================
// TransformerData is the per-document view of one encoder run:
// the ordered list of layer output tensors, the span ranges the
// document was windowed into, and the subtoken/token alignment.
// Gradient bundles reuse the same struct, with tensors of
// identical shapes.
//
// FullTransformerBatch owns one TransformerData per input
// document (split_by_doc happens at construction, inside the
// producer) plus the bookkeeping needed to route gradients back
// to the encoder calls that produced the batch.

use burn::prelude::*;
use std::ops::Range;

use crate::domain::alignment::AlignmentMap;
use crate::domain::error::BridgeError;

// ─── LayerTensor ──────────────────────────────────────────────────────────────
/// One entry of an encoder's layered output. Hidden layers are
/// 3-rank [n_spans, span_len, width]; summary outputs (a pooler
/// head, for instance) are 2-rank [n_spans, width].
#[derive(Debug, Clone)]
pub enum LayerTensor<B: Backend> {
    Pooled(Tensor<B, 2>),
    Hidden(Tensor<B, 3>),
}

impl<B: Backend> LayerTensor<B> {
    pub fn zeros_like(&self) -> Self {
        match self {
            LayerTensor::Pooled(t) => LayerTensor::Pooled(t.zeros_like()),
            LayerTensor::Hidden(t) => LayerTensor::Hidden(t.zeros_like()),
        }
    }

    /// Element-wise sum; both sides must have the same rank and
    /// shape, anything else is an accumulation bug.
    pub fn add(self, other: &Self) -> Result<Self, BridgeError> {
        match (self, other) {
            (LayerTensor::Pooled(a), LayerTensor::Pooled(b)) if a.dims() == b.dims() => {
                Ok(LayerTensor::Pooled(a + b.clone()))
            }
            (LayerTensor::Hidden(a), LayerTensor::Hidden(b)) if a.dims() == b.dims() => {
                Ok(LayerTensor::Hidden(a + b.clone()))
            }
            _ => Err(BridgeError::Alignment(
                "gradient tensor rank/shape mismatch during accumulation".into(),
            )),
        }
    }

    /// Sum of squared entries, as the loss metric contribution.
    pub fn sum_sq(&self) -> f64 {
        match self {
            LayerTensor::Pooled(t) => (t.clone() * t.clone()).sum().into_scalar().elem(),
            LayerTensor::Hidden(t) => (t.clone() * t.clone()).sum().into_scalar().elem(),
        }
    }
}

/// Index of the last hidden (3-rank) tensor, scanning from the
/// end of the layer list.
pub fn find_last_hidden<B: Backend>(tensors: &[LayerTensor<B>]) -> Result<usize, BridgeError> {
    tensors
        .iter()
        .rposition(|t| matches!(t, LayerTensor::Hidden(_)))
        .ok_or_else(|| {
            BridgeError::Alignment(format!(
                "no 3-rank hidden tensor among {} encoder output layers",
                tensors.len()
            ))
        })
}

// ─── TransformerData ──────────────────────────────────────────────────────────
/// Encoder output (or a gradient of it) for one document.
#[derive(Debug, Clone)]
pub struct TransformerData<B: Backend> {
    /// Layered output, layer index → tensor
    pub tensors: Vec<LayerTensor<B>>,

    /// Subtoken ranges of the document each span covers
    pub spans: Vec<Range<usize>>,

    /// Flattened-subtoken-row <-> token position map
    pub align: AlignmentMap,

    /// Feature dimensionality of the last hidden layer
    pub width: usize,
}

impl<B: Backend> TransformerData<B> {
    /// The well-formed placeholder for a document with no
    /// subtokens: one zero-row hidden layer, empty alignment.
    pub fn empty(width: usize, device: &B::Device) -> Self {
        Self {
            tensors: vec![LayerTensor::Hidden(Tensor::zeros([0, 0, width], device))],
            spans: Vec::new(),
            align: AlignmentMap::default(),
            width,
        }
    }

    pub fn last_hidden(&self) -> Result<&Tensor<B, 3>, BridgeError> {
        let idx = find_last_hidden(&self.tensors)?;
        match &self.tensors[idx] {
            LayerTensor::Hidden(t) => Ok(t),
            LayerTensor::Pooled(_) => unreachable!("find_last_hidden returned a 2-rank layer"),
        }
    }
}

// ─── FullTransformerBatch ─────────────────────────────────────────────────────
/// One encoder run over a batch of documents.
#[derive(Debug, Clone)]
pub struct FullTransformerBatch<B: Backend> {
    /// Per-document data, in input document order
    pub doc_data: Vec<TransformerData<B>>,

    /// Global span indices covered by each encoder call, in call
    /// order. Spans are numbered doc-by-doc, skipping documents
    /// with no subtokens.
    pub subbatches: Vec<Vec<usize>>,

    /// Span count per document (0 for empty documents)
    pub spans_per_doc: Vec<usize>,

    /// Common padded span length of the whole batch
    pub span_len: usize,
}

impl<B: Backend> FullTransformerBatch<B> {
    pub fn empty() -> Self {
        Self {
            doc_data: Vec::new(),
            subbatches: Vec::new(),
            spans_per_doc: Vec::new(),
            span_len: 0,
        }
    }

    /// Merge per-document gradient bundles back into batch-level
    /// per-layer tensors [total_spans, span_len, width].
    ///
    /// This is the exact inverse of the per-document split done
    /// at construction: hidden gradients are concatenated along
    /// the span axis in document order; documents without spans
    /// contribute nothing.
    pub fn unsplit_by_doc(
        &self,
        d_doc_data: &[TransformerData<B>],
    ) -> Result<Vec<Tensor<B, 3>>, BridgeError> {
        if d_doc_data.len() != self.doc_data.len() {
            return Err(BridgeError::Alignment(format!(
                "gradient bundle covers {} documents, batch has {}",
                d_doc_data.len(),
                self.doc_data.len()
            )));
        }

        let contributing: Vec<&TransformerData<B>> = d_doc_data
            .iter()
            .zip(&self.spans_per_doc)
            .filter(|(_, &n)| n > 0)
            .map(|(d, _)| d)
            .collect();

        let Some(first) = contributing.first() else {
            return Ok(Vec::new());
        };

        let n_layers = first.tensors.len();
        let mut layers = Vec::with_capacity(n_layers);
        for l in 0..n_layers {
            let mut parts = Vec::with_capacity(contributing.len());
            for data in &contributing {
                match data.tensors.get(l) {
                    Some(LayerTensor::Hidden(t)) => parts.push(t.clone()),
                    _ => {
                        return Err(BridgeError::Alignment(format!(
                            "document gradient missing hidden layer {l}"
                        )))
                    }
                }
            }
            layers.push(Tensor::cat(parts, 0));
        }
        Ok(layers)
    }

    /// Rearrange batch-level per-layer gradients into one set per
    /// encoder call, in the order the calls were made. Rows of
    /// `batch_layers` are in global span order; `subbatches`
    /// holds each call's (sorted) global span indices.
    pub fn regroup_for_encoder(
        &self,
        batch_layers: Vec<Tensor<B, 3>>,
        device: &B::Device,
    ) -> Result<Vec<Vec<Tensor<B, 3>>>, BridgeError> {
        let total_spans: usize = self.spans_per_doc.iter().sum();
        for layer in &batch_layers {
            if layer.dims()[0] != total_spans {
                return Err(BridgeError::Alignment(format!(
                    "batch gradient has {} span rows, expected {}",
                    layer.dims()[0],
                    total_spans
                )));
            }
        }

        let mut per_call = Vec::with_capacity(self.subbatches.len());
        for call in &self.subbatches {
            let idx: Vec<i32> = call.iter().map(|&s| s as i32).collect();
            let idx = Tensor::<B, 1, Int>::from_ints(idx.as_slice(), device);
            let layers: Vec<Tensor<B, 3>> = batch_layers
                .iter()
                .map(|layer| layer.clone().select(0, idx.clone()))
                .collect();
            per_call.push(layers);
        }
        Ok(per_call)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type TB = burn::backend::NdArray;

    fn hidden(values: f32, spans: usize, len: usize, width: usize) -> LayerTensor<TB> {
        let device = Default::default();
        LayerTensor::Hidden(Tensor::<TB, 3>::zeros([spans, len, width], &device) + values)
    }

    #[test]
    fn test_find_last_hidden_skips_trailing_pooled() {
        let device = Default::default();
        let tensors: Vec<LayerTensor<TB>> = vec![
            hidden(0.0, 1, 2, 4),
            hidden(1.0, 1, 2, 4),
            LayerTensor::Pooled(Tensor::zeros([1, 4], &device)),
        ];
        assert_eq!(find_last_hidden(&tensors).unwrap(), 1);
    }

    #[test]
    fn test_find_last_hidden_fails_without_hidden() {
        let device = Default::default();
        let tensors: Vec<LayerTensor<TB>> =
            vec![LayerTensor::Pooled(Tensor::zeros([1, 4], &device))];
        let err = find_last_hidden(&tensors).unwrap_err();
        assert!(matches!(err, BridgeError::Alignment(_)));
    }

    #[test]
    fn test_layer_add_rejects_shape_mismatch() {
        let a = hidden(1.0, 1, 2, 4);
        let b = hidden(1.0, 2, 2, 4);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn test_sum_sq() {
        let t = hidden(2.0, 1, 3, 2); // 6 entries of 2.0
        assert!((t.sum_sq() - 24.0).abs() < 1e-6);
    }

    #[test]
    fn test_unsplit_concatenates_in_doc_order() {
        let device: <TB as Backend>::Device = Default::default();
        let mk = |v: f32, spans: usize| TransformerData::<TB> {
            tensors: vec![hidden(v, spans, 2, 3)],
            spans: (0..spans).map(|i| i * 2..i * 2 + 2).collect(),
            align: crate::domain::alignment::AlignmentMap::new(spans * 2, 1),
            width: 3,
        };
        let batch = FullTransformerBatch {
            doc_data: vec![mk(0.0, 1), TransformerData::empty(3, &device), mk(0.0, 2)],
            subbatches: vec![vec![0, 1, 2]],
            spans_per_doc: vec![1, 0, 2],
            span_len: 2,
        };

        let grads = vec![mk(1.0, 1), TransformerData::empty(3, &device), mk(2.0, 2)];
        let layers = batch.unsplit_by_doc(&grads).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].dims(), [3, 2, 3]);
        let values: Vec<f32> = layers[0].clone().into_data().value;
        // First span row from doc 0 (1.0), two from doc 2 (2.0)
        assert!(values[..6].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(values[6..].iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_regroup_selects_call_rows() {
        let device: <TB as Backend>::Device = Default::default();
        let mk = |v: f32, spans: usize| TransformerData::<TB> {
            tensors: vec![hidden(v, spans, 2, 3)],
            spans: (0..spans).map(|i| i * 2..i * 2 + 2).collect(),
            align: crate::domain::alignment::AlignmentMap::new(spans * 2, 1),
            width: 3,
        };
        let batch = FullTransformerBatch {
            doc_data: vec![mk(0.0, 2), mk(0.0, 1)],
            subbatches: vec![vec![1], vec![0, 2]],
            spans_per_doc: vec![2, 1],
            span_len: 2,
        };

        // Batch-level layer with row r filled with r as a value
        let rows: Vec<Tensor<TB, 3>> = (0..3)
            .map(|r| Tensor::<TB, 3>::zeros([1, 2, 3], &device) + r as f32)
            .collect();
        let layer = Tensor::cat(rows, 0);

        let per_call = batch.regroup_for_encoder(vec![layer], &device).unwrap();
        assert_eq!(per_call.len(), 2);
        assert_eq!(per_call[0][0].dims(), [1, 2, 3]);
        assert_eq!(per_call[1][0].dims(), [2, 2, 3]);
        let call0: Vec<f32> = per_call[0][0].clone().into_data().value;
        assert!(call0.iter().all(|&v| (v - 1.0).abs() < 1e-6));
        let call1: Vec<f32> = per_call[1][0].clone().into_data().value;
        assert!(call1[..6].iter().all(|&v| v.abs() < 1e-6));
        assert!(call1[6..].iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }
}
