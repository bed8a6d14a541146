// ============================================================
// Layer 2 - Encode Use Case
// ============================================================
// Inference workflow: rebuild the trained encoder from its
// checkpoint, run one predict pass over a document directory,
// and summarise the pooled token vectors per document. The CLI
// layer does the printing.

use anyhow::Result;
use burn::prelude::*;

use crate::application::train_use_case::TrainBackend;
use crate::data::loader::TextLoader;
use crate::data::spans::SpanSplitter;
use crate::domain::traits::DocumentSource;
use crate::infra::{checkpoint::CheckpointManager, tokenizer_store::TokenizerStore};
use crate::ml::{
    coordinator::EncoderCoordinator,
    encoder::{adam, BurnEncoder},
    pooling::{AlignmentPooler, IdentityPooling},
    producer::TransformerProducer,
};

/// Per-document summary of one encoding pass.
#[derive(Debug)]
pub struct DocSummary {
    pub source:    String,
    pub tokens:    usize,
    pub spans:     usize,
    pub width:     usize,
    /// Mean L2 norm of the pooled per-token vectors
    pub mean_norm: f64,
}

pub struct EncodeUseCase {
    checkpoint_dir: String,
    docs_dir:       String,
}

impl EncodeUseCase {
    pub fn new(checkpoint_dir: String, docs_dir: String) -> Self {
        Self { checkpoint_dir, docs_dir }
    }

    pub fn execute(&self) -> Result<Vec<DocSummary>> {
        let device = burn::backend::ndarray::NdArrayDevice::default();

        // Rebuild the trained pipeline pieces from disk.
        let ckpt = CheckpointManager::new(&self.checkpoint_dir);
        let cfg  = ckpt.load_config()?;
        let tokenizer = TokenizerStore::new(&self.checkpoint_dir).load()?;
        let model = ckpt.load_encoder(cfg.encoder_config().init::<TrainBackend>(&device), &device)?;
        let encoder = BurnEncoder::with_model(model, adam::<TrainBackend>(), cfg.lr, device);

        let producer = TransformerProducer::new(
            encoder,
            tokenizer,
            SpanSplitter::new(cfg.span_window, cfg.span_stride),
            cfg.max_work,
            device,
        );
        let mut coordinator = EncoderCoordinator::new(producer);
        let (_, listener) = coordinator.register_listener();
        let pooler = AlignmentPooler::new(Box::new(IdentityPooling), cfg.grad_factor, device);

        let docs = TextLoader::new(&self.docs_dir).load_all()?;
        anyhow::ensure!(!docs.is_empty(), "no documents found in '{}'", self.docs_dir);
        tracing::info!("Encoding {} documents", docs.len());

        coordinator.predict(&docs)?;
        let (data, _backprop) = listener.borrow().forward_infer(&docs)?;
        let (pooled, _) = pooler.forward_batch(&data)?;

        let mut summaries = Vec::with_capacity(docs.len());
        for ((doc, data), tokens) in docs.iter().zip(&data).zip(pooled) {
            let [n_tokens, width] = tokens.dims();
            let mean_norm = if n_tokens == 0 {
                0.0
            } else {
                let sq: f64 = (tokens.clone() * tokens)
                    .sum_dim(1)
                    .sqrt()
                    .sum()
                    .into_scalar()
                    .elem();
                sq / n_tokens as f64
            };
            summaries.push(DocSummary {
                source:    doc.source.clone(),
                tokens:    doc.len(),
                spans:     data.spans.len(),
                width,
                mean_norm,
            });
        }
        Ok(summaries)
    }
}
