// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores encoder weights using Burn's
// CompactRecorder (MessagePack + gzip, type-safe on load).
//
// File naming convention:
//   checkpoints/
//     encoder_step_100.mpk.gz ← weights after step 100
//     encoder_step_200.mpk.gz
//     latest_step.json        ← number of the latest saved step
//     train_config.json       ← hyperparameters, needed to
//                               rebuild the model for inference

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::encoder::EncoderModel;

pub struct CheckpointManager {
    /// Path to the directory where checkpoints are stored
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<String>) -> Self {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir).ok();
        Self { dir }
    }

    /// Save encoder weights after a given training step and
    /// advance the latest-step pointer.
    pub fn save_encoder<B: AutodiffBackend>(
        &self,
        model: &EncoderModel<B>,
        step:  usize,
    ) -> Result<()> {
        let path = self.dir.join(format!("encoder_step_{step}"));
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| {
                format!("Failed to save checkpoint to '{}'", path.display())
            })?;

        let latest_path = self.dir.join("latest_step.json");
        fs::write(&latest_path, serde_json::to_string(&step)?)
            .with_context(|| "Failed to write latest_step.json")?;

        tracing::debug!("Saved checkpoint: step {}", step);
        Ok(())
    }

    /// Restore encoder weights from the latest saved checkpoint.
    /// The model passed in must match the saved architecture.
    pub fn load_encoder<B: Backend>(
        &self,
        model:  EncoderModel<B>,
        device: &B::Device,
    ) -> Result<EncoderModel<B>> {
        let step = self.latest_step()?;
        let path = self.dir.join(format!("encoder_step_{step}"));

        tracing::info!("Loading checkpoint from step {}", step);

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the encoder first?",
                    path.display())
            })?;

        Ok(model.load_record(record))
    }

    /// Persist the training configuration so inference can
    /// rebuild the exact model architecture.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| {
                format!("Cannot write config to '{}'", path.display())
            })?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join("train_config.json");
        let json = fs::read_to_string(&path)
            .with_context(|| {
                format!(
                    "Cannot read config from '{}'. \
                     Make sure you have run 'train' before 'encode'.",
                    path.display()
                )
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    fn latest_step(&self) -> Result<usize> {
        let path = self.dir.join("latest_step.json");
        let s = fs::read_to_string(&path)
            .with_context(|| {
                "Cannot find 'latest_step.json'. \
                 Have you run 'train' first?"
            })?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::encoder::EncoderModelConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;

    #[test]
    fn test_save_and_reload_encoder_weights() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().to_str().unwrap());
        let device = Default::default();

        let config = EncoderModelConfig::new(32, 8, 4, 2, 1, 8, 0.0);
        let model = config.init::<Autodiff<NdArray>>(&device);
        mgr.save_encoder(&model, 7).unwrap();

        let fresh = config.init::<NdArray>(&device);
        let restored = mgr.load_encoder(fresh, &device).unwrap();

        let device: <NdArray as Backend>::Device = Default::default();
        let ids = Tensor::<NdArray, 1, Int>::from_ints([1, 2, 3, 4].as_slice(), &device)
            .reshape([1, 4]);
        let mask = ids.clone().equal_elem(0);
        let out_saved = model.valid().forward(ids.clone(), mask.clone());
        let out_restored = restored.forward(ids, mask);
        // CompactRecorder stores records at half precision, so the
        // round trip is close but not bit-faithful.
        let diff = (out_saved[1].clone() - out_restored[1].clone())
            .abs()
            .sum()
            .into_scalar()
            .elem::<f64>();
        assert!(diff < 1e-2, "restored model drifted too far: {diff}");
    }

    #[test]
    fn test_load_without_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().to_str().unwrap());
        let device = Default::default();
        let model = EncoderModelConfig::new(32, 8, 4, 2, 1, 8, 0.0).init::<NdArray>(&device);
        assert!(mgr.load_encoder(model, &device).is_err());
    }
}
