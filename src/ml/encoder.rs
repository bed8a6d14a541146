// ============================================================
// Layer 5 - Shared Encoder
// ============================================================
// The Encoder trait is the seam between the bridge machinery
// and the model that does the heavy lifting. It is deliberately
// narrow: encode a padded span batch into layered outputs, and
// later take one gradient set per encode call and apply a single
// optimiser step over all of them.
//
// BurnEncoder is the real implementation: a small BERT-style
// transformer trained with Adam. It runs the autodiff forward
// internally and hands callers plain inner-backend tensors, so
// nothing outside this file touches the autodiff graph.

use burn::{
    module::AutodiffModule,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::EncoderInput;
use crate::domain::error::BridgeError;

// ─── Encoder trait ────────────────────────────────────────────────────────────
pub trait Encoder<B: Backend> {
    /// Feature dimensionality of the hidden layers.
    fn width(&self) -> usize;

    /// Run one padded span batch through the model. Returns the
    /// layered output, one [batch, span_len, width] tensor per
    /// layer. With `train` set, the call is remembered so a
    /// later `backprop` can push gradients through it.
    fn encode(
        &mut self,
        input: EncoderInput<B>,
        train: bool,
    ) -> Result<Vec<Tensor<B, 3>>, BridgeError>;

    /// Backward pass and optimiser step over all remembered
    /// calls. `d_calls` carries one gradient set per call, in
    /// call order, each shaped like that call's output.
    fn backprop(&mut self, d_calls: Vec<Vec<Tensor<B, 3>>>) -> Result<(), BridgeError>;
}

// ─── Model ────────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct EncoderModelConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub dropout:     f64,
}

impl EncoderModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderModel<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let layers: Vec<EncoderLayer<B>> = (0..self.num_layers)
            .map(|_| self.build_layer(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        EncoderModel {
            token_embedding, position_embedding, layers,
            final_norm, dropout,
            d_model: self.d_model,
        }
    }

    fn build_layer<B: Backend>(&self, device: &B::Device) -> EncoderLayer<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderLayer { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn_input = MhaInput::self_attn(x.clone()).mask_pad(pad_mask);
        let attn_output = self.self_attn.forward(attn_input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct EncoderModel<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderLayer<B>>,
    pub final_norm:         LayerNorm<B>,
    pub dropout:            Dropout,
    pub d_model:            usize,
}

impl<B: Backend> EncoderModel<B> {
    /// input_ids: [batch, seq_len] → one [batch, seq_len, d_model]
    /// tensor per layer: the embedding output first, then each
    /// attention layer, with the final norm folded into the last.
    pub fn forward(
        &self,
        input_ids: Tensor<B, 2, Int>,
        pad_mask: Tensor<B, 2, Bool>,
    ) -> Vec<Tensor<B, 3>> {
        let [batch_size, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);

        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let mut x = self.dropout.forward(tok_emb + pos_emb);
        let mut outputs = vec![x.clone()];
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
            outputs.push(x.clone());
        }
        if let Some(last) = outputs.last_mut() {
            *last = self.final_norm.forward(last.clone());
        }
        outputs
    }
}

// ─── BurnEncoder ──────────────────────────────────────────────────────────────
/// Adam with the defaults the encoder trains with. `AdamConfig::init`
/// returns an opaque `impl Optimizer`, so `BurnEncoder` is generic
/// over the optimiser type and takes the initialised optimiser as a
/// constructor argument instead of naming its type in a field.
pub fn adam<A: AutodiffBackend>() -> impl Optimizer<EncoderModel<A>, A> {
    AdamConfig::new().with_epsilon(1e-8).init()
}

pub struct BurnEncoder<A: AutodiffBackend, O> {
    model:   EncoderModel<A>,
    optim:   O,
    /// Layered autodiff outputs of the calls made since the last
    /// backprop, in call order
    pending: Vec<Vec<Tensor<A, 3>>>,
    lr:      f64,
    width:   usize,
    device:  A::Device,
}

impl<A: AutodiffBackend, O: Optimizer<EncoderModel<A>, A>> BurnEncoder<A, O> {
    pub fn new(config: &EncoderModelConfig, optim: O, lr: f64, device: A::Device) -> Self {
        Self::with_model(config.init(&device), optim, lr, device)
    }

    /// Wrap an already-built model, e.g. one restored from a
    /// checkpoint.
    pub fn with_model(model: EncoderModel<A>, optim: O, lr: f64, device: A::Device) -> Self {
        let width = model.d_model;
        Self { model, optim, pending: Vec::new(), lr, width, device }
    }

    pub fn model(&self) -> &EncoderModel<A> {
        &self.model
    }

    fn lift_input(&self, input: EncoderInput<A::InnerBackend>) -> EncoderInput<A> {
        let input_ids = Tensor::<A, 2, Int>::from_data(
            input.input_ids.into_data().convert(),
            &self.device,
        );
        let pad_mask =
            Tensor::<A, 2, Bool>::from_data(input.pad_mask.into_data(), &self.device);
        EncoderInput { input_ids, pad_mask }
    }
}

impl<A: AutodiffBackend, O: Optimizer<EncoderModel<A>, A>> Encoder<A::InnerBackend>
    for BurnEncoder<A, O>
{
    fn width(&self) -> usize {
        self.width
    }

    fn encode(
        &mut self,
        input: EncoderInput<A::InnerBackend>,
        train: bool,
    ) -> Result<Vec<Tensor<A::InnerBackend, 3>>, BridgeError> {
        if !train {
            let model = self.model.valid();
            return Ok(model.forward(input.input_ids, input.pad_mask));
        }

        let input = self.lift_input(input);
        let outputs = self.model.forward(input.input_ids, input.pad_mask);
        let detached = outputs.iter().map(|t| t.clone().inner()).collect();
        self.pending.push(outputs);
        Ok(detached)
    }

    fn backprop(
        &mut self,
        d_calls: Vec<Vec<Tensor<A::InnerBackend, 3>>>,
    ) -> Result<(), BridgeError> {
        if d_calls.len() != self.pending.len() {
            return Err(BridgeError::Alignment(format!(
                "{} gradient sets for {} pending encoder calls",
                d_calls.len(),
                self.pending.len()
            )));
        }
        let pending = std::mem::take(&mut self.pending);

        // One pseudo-loss joins every call's graph: d(sum(y ⊙ g))/dy = g,
        // so each output receives exactly the gradient handed in.
        let mut loss: Option<Tensor<A, 1>> = None;
        for (outputs, d_outputs) in pending.into_iter().zip(d_calls) {
            if outputs.len() != d_outputs.len() {
                return Err(BridgeError::Alignment(format!(
                    "{} gradient layers for {} output layers",
                    d_outputs.len(),
                    outputs.len()
                )));
            }
            for (out, d_out) in outputs.into_iter().zip(d_outputs) {
                let term = (out * Tensor::from_inner(d_out)).sum();
                loss = Some(match loss {
                    Some(acc) => acc + term,
                    None => term,
                });
            }
        }

        if let Some(loss) = loss {
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optim.step(self.lr, self.model.clone(), grads);
        }
        Ok(())
    }
}

// ─── Test Double ──────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub type TB = burn::backend::NdArray;

    /// Deterministic stand-in for a trained model: every hidden
    /// value is 1.0, and backprop payloads are recorded instead
    /// of applied.
    pub struct RecordingEncoder {
        pub width:    usize,
        pub n_layers: usize,
        pub received: Rc<RefCell<Vec<Vec<Vec<Tensor<TB, 3>>>>>>,
        pending:      usize,
        device:       <TB as Backend>::Device,
    }

    impl RecordingEncoder {
        pub fn new(width: usize, n_layers: usize) -> Self {
            Self {
                width,
                n_layers,
                received: Rc::new(RefCell::new(Vec::new())),
                pending: 0,
                device: Default::default(),
            }
        }
    }

    impl Encoder<TB> for RecordingEncoder {
        fn width(&self) -> usize {
            self.width
        }

        fn encode(
            &mut self,
            input: EncoderInput<TB>,
            train: bool,
        ) -> Result<Vec<Tensor<TB, 3>>, BridgeError> {
            let [batch, seq_len] = input.input_ids.dims();
            if train {
                self.pending += 1;
            }
            Ok((0..self.n_layers)
                .map(|_| Tensor::ones([batch, seq_len, self.width], &self.device))
                .collect())
        }

        fn backprop(&mut self, d_calls: Vec<Vec<Tensor<TB, 3>>>) -> Result<(), BridgeError> {
            if d_calls.len() != self.pending {
                return Err(BridgeError::Alignment(format!(
                    "{} gradient sets for {} pending encoder calls",
                    d_calls.len(),
                    self.pending
                )));
            }
            self.pending = 0;
            self.received.borrow_mut().push(d_calls);
            Ok(())
        }
    }
}
