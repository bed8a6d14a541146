// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `encode`, and all
// their configurable flags. clap's derive macros generate the
// help text, error messages, and type conversion.

use clap::{Args, Subcommand};
use crate::application::train_use_case::TrainConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the shared encoder on .txt documents
    Train(TrainArgs),

    /// Encode documents with a trained checkpoint
    Encode(EncodeArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory containing .txt files to train on
    #[arg(long, default_value = "data/texts")]
    pub docs_dir: String,

    /// Directory to save model checkpoints and tokenizer
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Number of training steps (one encoder forward pass each)
    #[arg(long, default_value_t = 200)]
    pub steps: usize,

    /// Documents sampled per training step
    #[arg(long, default_value_t = 8)]
    pub docs_per_step: usize,

    /// Span window in subtokens; longer documents are windowed
    #[arg(long, default_value_t = 96)]
    pub span_window: usize,

    /// Subtokens to advance between spans (= window for tiling,
    /// smaller for overlap)
    #[arg(long, default_value_t = 96)]
    pub span_stride: usize,

    /// Padded-subtoken budget per encoder call; spans are packed
    /// into calls that stay under it
    #[arg(long, default_value_t = 3072)]
    pub max_work: usize,

    /// Scale applied to consumer gradients entering the encoder
    #[arg(long, default_value_t = 1.0)]
    pub grad_factor: f64,

    /// Learning rate for both the encoder and the probes
    #[arg(long, default_value_t = 2e-4)]
    pub lr: f64,

    /// Hidden dimension of the transformer (d_model)
    #[arg(long, default_value_t = 128)]
    pub d_model: usize,

    /// Number of attention heads; d_model must divide evenly
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    /// Number of stacked encoder layers
    #[arg(long, default_value_t = 4)]
    pub num_layers: usize,

    /// Inner dimension of the feed-forward network
    #[arg(long, default_value_t = 512)]
    pub d_ff: usize,

    /// Dropout probability during training
    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Maximum vocabulary size for the built tokenizer
    #[arg(long, default_value_t = 8192)]
    pub vocab_size: usize,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig;
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            docs_dir:       a.docs_dir,
            checkpoint_dir: a.checkpoint_dir,
            steps:          a.steps,
            docs_per_step:  a.docs_per_step,
            span_window:    a.span_window,
            span_stride:    a.span_stride,
            max_work:       a.max_work,
            grad_factor:    a.grad_factor,
            lr:             a.lr,
            d_model:        a.d_model,
            num_heads:      a.num_heads,
            num_layers:     a.num_layers,
            d_ff:           a.d_ff,
            dropout:        a.dropout,
            vocab_size:     a.vocab_size,
        }
    }
}

/// All arguments for the `encode` command
#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Directory with .txt files to encode
    #[arg(long, default_value = "data/texts")]
    pub docs_dir: String,

    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,
}
