// ============================================================
// Layer 5 - Alignment Pooling
// ============================================================
// Consumers want one vector per word-level token; the encoder
// produces one vector per subtoken row. The AlignmentPooler
// bridges the two: forward gathers the last hidden layer's rows
// and scatter-adds them into token slots, and every forward
// returns the matching backward closure so the token-level
// gradient can be pushed back to exactly the rows it came from.
//
// Sum pooling's adjoint is a copy: each aligned row receives the
// full gradient of its token. The gather/scatter index vectors
// are shared between the two directions, which keeps the pair
// exact by construction.

use burn::prelude::*;

use crate::domain::error::BridgeError;
use crate::ml::batch::{find_last_hidden, LayerTensor, TransformerData};

/// Backward closure paired with one pooling forward. Takes the
/// gradient in the closure's output space, returns the gradient
/// in its input space.
pub type PoolBackprop<B> = Box<dyn FnOnce(Tensor<B, 2>) -> Tensor<B, 2>>;

// ─── Secondary pooling ────────────────────────────────────────────────────────
/// Optional transform applied after alignment pooling, on the
/// [n_tokens, width] token matrix.
pub trait TokenPooling<B: Backend> {
    fn forward(&self, x: Tensor<B, 2>) -> (Tensor<B, 2>, PoolBackprop<B>);
}

/// Pass-through secondary pooling.
pub struct IdentityPooling;

impl<B: Backend> TokenPooling<B> for IdentityPooling {
    fn forward(&self, x: Tensor<B, 2>) -> (Tensor<B, 2>, PoolBackprop<B>) {
        (x, Box::new(|d| d))
    }
}

// ─── DocTrace ─────────────────────────────────────────────────────────────────
/// What one document's forward pass remembers so the backward
/// pass can reconstruct the encoder-space gradient.
pub struct DocTrace<B: Backend> {
    /// Layer tensors of the source data, for zeros_like shapes
    source: TransformerData<B>,
    /// Which layer the gradient lands in
    hidden_index: usize,
    /// (gather rows, scatter tokens) index tensors; None when
    /// the document has no aligned subtokens
    indices: Option<(Tensor<B, 1, Int>, Tensor<B, 1, Int>)>,
    /// Rows of the flattened hidden layer (spans * span_len)
    n_rows: usize,
    pool_bp: PoolBackprop<B>,
}

// ─── AlignmentPooler ──────────────────────────────────────────────────────────
pub struct AlignmentPooler<B: Backend> {
    pooling:     Box<dyn TokenPooling<B>>,
    grad_factor: f64,
    device:      B::Device,
}

impl<B: Backend> AlignmentPooler<B> {
    pub fn new(pooling: Box<dyn TokenPooling<B>>, grad_factor: f64, device: B::Device) -> Self {
        Self { pooling, grad_factor, device }
    }

    /// Pool every document of a batch into [n_tokens, width]
    /// token matrices, keeping the traces needed to invert the
    /// operation.
    pub fn forward_batch(
        &self,
        batch: &[TransformerData<B>],
    ) -> Result<(Vec<Tensor<B, 2>>, Vec<DocTrace<B>>), BridgeError> {
        let mut outputs = Vec::with_capacity(batch.len());
        let mut traces = Vec::with_capacity(batch.len());
        for data in batch {
            let (out, trace) = self.forward_doc(data)?;
            outputs.push(out);
            traces.push(trace);
        }
        Ok((outputs, traces))
    }

    /// Map token-level gradients back to encoder space. Every
    /// layer except the pooled hidden layer gets a zero gradient
    /// of matching shape.
    pub fn backward_batch(
        &self,
        d_outputs: Vec<Tensor<B, 2>>,
        traces: Vec<DocTrace<B>>,
    ) -> Result<Vec<TransformerData<B>>, BridgeError> {
        if d_outputs.len() != traces.len() {
            return Err(BridgeError::Alignment(format!(
                "{} gradients for {} pooling traces",
                d_outputs.len(),
                traces.len()
            )));
        }
        d_outputs
            .into_iter()
            .zip(traces)
            .map(|(d, trace)| self.backward_doc(d, trace))
            .collect()
    }

    fn forward_doc(
        &self,
        data: &TransformerData<B>,
    ) -> Result<(Tensor<B, 2>, DocTrace<B>), BridgeError> {
        let hidden_index = find_last_hidden(&data.tensors)?;
        let hidden = data.last_hidden()?.clone();
        let [n_spans, span_len, width] = hidden.dims();
        let n_rows = n_spans * span_len;
        let n_tokens = data.align.n_tokens();

        let flat: Tensor<B, 2> = hidden.reshape([n_rows, width]);
        let mut pooled = Tensor::zeros([n_tokens, data.width], &self.device);

        let indices = if data.align.is_empty() {
            None
        } else {
            let rows =
                Tensor::<B, 1, Int>::from_ints(data.align.rows().as_slice(), &self.device);
            let toks =
                Tensor::<B, 1, Int>::from_ints(data.align.tokens().as_slice(), &self.device);
            // Scatter-add: overlapping alignments accumulate
            pooled = pooled.select_assign(0, toks.clone(), flat.select(0, rows.clone()));
            Some((rows, toks))
        };

        let (out, pool_bp) = self.pooling.forward(pooled);
        let trace = DocTrace {
            source: data.clone(),
            hidden_index,
            indices,
            n_rows,
            pool_bp,
        };
        Ok((out, trace))
    }

    fn backward_doc(
        &self,
        d_output: Tensor<B, 2>,
        trace: DocTrace<B>,
    ) -> Result<TransformerData<B>, BridgeError> {
        let d_pooled = (trace.pool_bp)(d_output);
        let width = trace.source.width;

        let mut d_flat = Tensor::zeros([trace.n_rows, width], &self.device);
        if let Some((rows, toks)) = trace.indices {
            d_flat = d_flat.select_assign(0, rows, d_pooled.select(0, toks));
        }
        if self.grad_factor != 1.0 {
            d_flat = d_flat.mul_scalar(self.grad_factor);
        }

        let mut tensors = Vec::with_capacity(trace.source.tensors.len());
        for (i, layer) in trace.source.tensors.iter().enumerate() {
            if i == trace.hidden_index {
                let shape = match layer {
                    LayerTensor::Hidden(t) => t.dims(),
                    LayerTensor::Pooled(_) => {
                        unreachable!("hidden_index points at a 2-rank layer")
                    }
                };
                tensors.push(LayerTensor::Hidden(d_flat.clone().reshape(shape)));
            } else {
                tensors.push(layer.zeros_like());
            }
        }

        Ok(TransformerData {
            tensors,
            spans: trace.source.spans,
            align: trace.source.align,
            width,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alignment::AlignmentMap;

    type TB = burn::backend::NdArray;

    /// One span of three subtoken rows [1,1], [1,1], [2,2];
    /// rows 0 and 1 align to token 0, row 2 to token 1.
    fn sample() -> TransformerData<TB> {
        let device = Default::default();
        let hidden = Tensor::<TB, 1>::from_floats(
            [1.0, 1.0, 1.0, 1.0, 2.0, 2.0].as_slice(),
            &device,
        )
        .reshape([1, 3, 2]);
        let mut align = AlignmentMap::new(3, 2);
        align.push(0, 0);
        align.push(1, 0);
        align.push(2, 1);
        TransformerData {
            tensors: vec![LayerTensor::Hidden(hidden)],
            spans: vec![0..3],
            align,
            width: 2,
        }
    }

    fn pooler(grad_factor: f64) -> AlignmentPooler<TB> {
        AlignmentPooler::new(Box::new(IdentityPooling), grad_factor, Default::default())
    }

    #[test]
    fn test_sum_pooling_merges_aligned_rows() {
        let (out, _) = pooler(1.0).forward_batch(&[sample()]).unwrap();
        assert_eq!(out[0].dims(), [2, 2]);
        let values: Vec<f32> = out[0].clone().into_data().value;
        // token 0 = row 0 + row 1 = [2,2]; token 1 = row 2 = [2,2]
        assert_eq!(values, vec![2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_backward_copies_token_gradient_to_rows() {
        let p = pooler(1.0);
        let (_, traces) = p.forward_batch(&[sample()]).unwrap();
        let device = Default::default();
        let d_out = Tensor::<TB, 1>::from_floats([1.0, 1.0, 1.0, 1.0].as_slice(), &device)
            .reshape([2, 2]);
        let grads = p.backward_batch(vec![d_out], traces).unwrap();
        let d_hidden: Vec<f32> = match &grads[0].tensors[0] {
            LayerTensor::Hidden(t) => t.clone().into_data().value,
            _ => panic!("expected hidden gradient"),
        };
        // Every aligned row receives its token's full gradient
        assert_eq!(d_hidden, vec![1.0; 6]);
    }

    #[test]
    fn test_grad_factor_scales_encoder_gradient() {
        let p = pooler(0.5);
        let (_, traces) = p.forward_batch(&[sample()]).unwrap();
        let device = Default::default();
        let d_out = Tensor::<TB, 2>::ones([2, 2], &device);
        let grads = p.backward_batch(vec![d_out], traces).unwrap();
        let d_hidden: Vec<f32> = match &grads[0].tensors[0] {
            LayerTensor::Hidden(t) => t.clone().into_data().value,
            _ => panic!("expected hidden gradient"),
        };
        assert!(d_hidden.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_non_hidden_layers_get_zero_gradients() {
        let device: <TB as Backend>::Device = Default::default();
        let mut data = sample();
        data.tensors
            .insert(0, LayerTensor::Pooled(Tensor::ones([1, 2], &device)));

        let p = pooler(1.0);
        let (_, traces) = p.forward_batch(&[data]).unwrap();
        let d_out = Tensor::<TB, 2>::ones([2, 2], &device);
        let grads = p.backward_batch(vec![d_out], traces).unwrap();

        assert_eq!(grads[0].tensors.len(), 2);
        match &grads[0].tensors[0] {
            LayerTensor::Pooled(t) => {
                let v: Vec<f32> = t.clone().into_data().value;
                assert!(v.iter().all(|&x| x == 0.0));
            }
            _ => panic!("expected pooled zero gradient"),
        }
    }

    #[test]
    fn test_empty_document_round_trip() {
        let device: <TB as Backend>::Device = Default::default();
        let data = TransformerData::<TB>::empty(4, &device);
        let p = pooler(1.0);
        let (out, traces) = p.forward_batch(&[data]).unwrap();
        assert_eq!(out[0].dims(), [0, 4]);
        let grads = p.backward_batch(out, traces).unwrap();
        match &grads[0].tensors[0] {
            LayerTensor::Hidden(t) => assert_eq!(t.dims(), [0, 0, 4]),
            _ => panic!("expected hidden gradient"),
        }
    }
}
