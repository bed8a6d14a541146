// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`  — trains the shared encoder on .txt documents
//   2. `encode` — loads a checkpoint and encodes documents,
//                 printing a per-document summary

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EncodeArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "trf-bridge",
    version = "0.1.0",
    about = "Train one shared transformer encoder feeding multiple consumers."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use
    /// case. This layer only routes, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => Self::run_train(args),
            Commands::Encode(args) => Self::run_encode(args),
        }
    }

    fn run_train(args: TrainArgs) -> Result<()> {
        use crate::application::train_use_case::TrainUseCase;

        tracing::info!("Starting training on documents in: {}", args.docs_dir);

        // Convert CLI args → application config
        let use_case = TrainUseCase::new(args.into());
        use_case.execute()?;

        println!("Training complete. Checkpoint saved.");
        Ok(())
    }

    fn run_encode(args: EncodeArgs) -> Result<()> {
        use crate::application::encode_use_case::EncodeUseCase;

        let use_case = EncodeUseCase::new(args.checkpoint_dir, args.docs_dir);
        let summaries = use_case.execute()?;

        println!("{:<24} {:>7} {:>6} {:>6} {:>10}", "document", "tokens", "spans", "width", "mean_norm");
        for s in &summaries {
            println!(
                "{:<24} {:>7} {:>6} {:>6} {:>10.4}",
                s.source, s.tokens, s.spans, s.width, s.mean_norm
            );
        }
        Ok(())
    }
}
