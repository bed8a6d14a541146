// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates a full training run:
//
//   Step 1: Load .txt documents         (Layer 4 - data)
//   Step 2: Build / load tokenizer      (Layer 6 - infra)
//   Step 3: Build encoder + coordinator (Layer 5 - ml)
//   Step 4: Register the consumers      (Layer 5 - ml)
//   Step 5: Save config                 (Layer 6 - infra)
//   Step 6: Step loop: broadcast, let every consumer update,
//           log metrics, checkpoint     (Layers 5 + 6)
//
// Every step samples a fresh document batch, the encoder runs
// exactly once for it, and the marked dispatcher (the probe that
// updates last) fires the single backward pass.

use anyhow::Result;
use burn::backend::{ndarray::NdArray, Autodiff};
use serde::{Deserialize, Serialize};

use crate::data::spans::SpanSplitter;
use crate::domain::document::Document;
use crate::domain::traits::DocumentSource;
use crate::data::loader::TextLoader;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{MetricsLogger, StepMetrics},
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    consumer::LinearProbe,
    coordinator::EncoderCoordinator,
    encoder::{adam, BurnEncoder, EncoderModelConfig},
    pooling::{AlignmentPooler, IdentityPooling},
    producer::TransformerProducer,
};

/// CPU autodiff backend used for training runs.
pub type TrainBackend = Autodiff<NdArray>;

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run. Serialisable so it can
// be saved to disk and reloaded for inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub docs_dir:       String,
    pub checkpoint_dir: String,
    /// Number of training steps (one encoder forward each)
    pub steps:          usize,
    /// Documents sampled per step
    pub docs_per_step:  usize,
    /// Span window/stride, in subtokens
    pub span_window:    usize,
    pub span_stride:    usize,
    /// Padded-subtoken work budget per encoder call
    pub max_work:       usize,
    /// Scale applied to gradients flowing back to the encoder
    pub grad_factor:    f64,
    pub lr:             f64,
    pub d_model:        usize,
    pub num_heads:      usize,
    pub num_layers:     usize,
    pub d_ff:           usize,
    pub dropout:        f64,
    pub vocab_size:     usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            docs_dir:       "data/texts".to_string(),
            checkpoint_dir: "checkpoints".to_string(),
            steps:          200,
            docs_per_step:  8,
            span_window:    96,
            span_stride:    96,
            max_work:       3072,
            grad_factor:    1.0,
            lr:             2e-4,
            d_model:        128,
            num_heads:      4,
            num_layers:     4,
            d_ff:           512,
            dropout:        0.1,
            vocab_size:     8192,
        }
    }
}

impl TrainConfig {
    pub fn encoder_config(&self) -> EncoderModelConfig {
        EncoderModelConfig::new(
            self.vocab_size,
            self.span_window,
            self.d_model,
            self.num_heads,
            self.num_layers,
            self.d_ff,
            self.dropout,
        )
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        let device = burn::backend::ndarray::NdArrayDevice::default();

        // ── Step 1: Load the corpus ───────────────────────────────────────────
        tracing::info!("Loading .txt files from '{}'", cfg.docs_dir);
        let loader = TextLoader::new(&cfg.docs_dir);
        let docs   = loader.load_all()?;
        tracing::info!("Loaded {} documents", docs.len());
        anyhow::ensure!(!docs.is_empty(), "no documents found in '{}'", cfg.docs_dir);

        // ── Step 2: Build / load tokenizer ────────────────────────────────────
        let tok_store = TokenizerStore::new(&cfg.checkpoint_dir);
        let tokenizer = tok_store.load_or_build(&docs, cfg.vocab_size)?;

        // ── Step 3: Encoder, producer, coordinator ────────────────────────────
        let encoder =
            BurnEncoder::new(&cfg.encoder_config(), adam::<TrainBackend>(), cfg.lr, device);
        let producer = TransformerProducer::new(
            encoder,
            tokenizer,
            SpanSplitter::new(cfg.span_window, cfg.span_stride),
            cfg.max_work,
            device,
        );
        let mut coordinator = EncoderCoordinator::new(producer);

        // ── Step 4: Register two probe consumers ──────────────────────────────
        // Two consumers exercise gradient accumulation; the one
        // updated last is marked as the backward dispatcher.
        let (_, listener_a) = coordinator.register_listener();
        let (handle_b, listener_b) = coordinator.register_listener();
        coordinator.mark_dispatcher(handle_b);

        let mut probe_a = LinearProbe::new(
            listener_a,
            AlignmentPooler::new(Box::new(IdentityPooling), cfg.grad_factor, device),
            4,
            cfg.lr,
            &device,
        );
        let mut probe_b = LinearProbe::new(
            listener_b,
            AlignmentPooler::new(Box::new(IdentityPooling), cfg.grad_factor, device),
            4,
            cfg.lr,
            &device,
        );

        // ── Step 5: Save config for inference ─────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir);
        ckpt_manager.save_config(cfg)?;
        let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;

        // ── Step 6: Step loop ─────────────────────────────────────────────────
        use rand::seq::SliceRandom;
        let mut rng = rand::thread_rng();

        for step in 1..=cfg.steps {
            let batch: Vec<Document> = docs
                .choose_multiple(&mut rng, cfg.docs_per_step.min(docs.len()))
                .cloned()
                .collect();

            coordinator.update(&batch)?;
            let loss_a = probe_a.update(&batch)?;
            let loss_b = probe_b.update(&batch)?;
            let encoder_loss = coordinator.last_loss();

            metrics.log(&StepMetrics::new(step, encoder_loss, loss_a + loss_b))?;
            if step % 10 == 0 || step == cfg.steps {
                tracing::info!(
                    "Step {:>4}/{} | encoder grad {:.4} | probe losses {:.4} / {:.4}",
                    step,
                    cfg.steps,
                    encoder_loss,
                    loss_a,
                    loss_b
                );
            }
            if step % 50 == 0 || step == cfg.steps {
                let producer = coordinator.producer();
                let producer = producer.borrow();
                ckpt_manager.save_encoder(producer.encoder().model(), step)?;
            }
        }

        tracing::info!("Training complete, metrics at '{}'", metrics.csv_path().display());
        Ok(())
    }
}
