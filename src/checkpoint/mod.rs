//! Checkpoint persistence.
//!
//! A checkpoint is a pair of files sharing a stem: `<name>.mpk` holds the
//! model weights (burn's named-message-pack record) and `<name>.meta.json`
//! holds everything needed to rebuild the model and interpret its outputs
//! without the original config file. The meta file is written atomically so
//! a crash mid-save never leaves a weights file with torn metadata.

use crate::model::{TagClassifier, TagClassifierConfig};
use crate::models::{AtlasError, Config, Result, Source, TagType};
use burn::module::Module;
use burn::record::{DefaultFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sidecar metadata stored next to the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Epoch the weights were taken from (1-based).
    pub epoch: usize,
    /// Best validation accuracy seen up to and including `epoch`.
    pub best_val_accuracy: f64,
    /// Class order the head was trained with.
    pub tag_types: Vec<TagType>,
    /// Source order of the one-hot encoding.
    pub source_types: Vec<Source>,
    pub image_size: usize,
    pub cnn_channels: Vec<usize>,
    pub metadata_hidden: usize,
    pub fusion_hidden: usize,
    pub saved_at: DateTime<Utc>,
}

impl CheckpointMeta {
    pub fn from_config(config: &Config, epoch: usize, best_val_accuracy: f64) -> Self {
        Self {
            epoch,
            best_val_accuracy,
            tag_types: config.tag_types.clone(),
            source_types: config.source_types.clone(),
            image_size: config.model.image_size,
            cnn_channels: config.model.cnn_channels.to_vec(),
            metadata_hidden: config.model.metadata_hidden,
            fusion_hidden: config.model.fusion_hidden,
            saved_at: Utc::now(),
        }
    }

    /// Model config matching the architecture recorded here.
    pub fn classifier_config(&self) -> TagClassifierConfig {
        TagClassifierConfig::new(
            self.tag_types.len(),
            self.source_types.len(),
            self.cnn_channels.clone(),
        )
        .with_metadata_hidden(self.metadata_hidden)
        .with_fusion_hidden(self.fusion_hidden)
    }

    /// Rejects checkpoints trained with a different class or source layout
    /// than the active config expects.
    pub fn validate_against(&self, config: &Config) -> Result<()> {
        if self.tag_types != config.tag_types {
            return Err(AtlasError::CheckpointMismatch(format!(
                "checkpoint tag types {:?} do not match configured {:?}",
                self.tag_types, config.tag_types
            )));
        }
        if self.source_types != config.source_types {
            return Err(AtlasError::CheckpointMismatch(format!(
                "checkpoint source types {:?} do not match configured {:?}",
                self.source_types, config.source_types
            )));
        }
        Ok(())
    }
}

/// Normalizes a user-supplied checkpoint path to its stem, with or without
/// the `.mpk` extension.
pub fn checkpoint_stem(path: &Path) -> PathBuf {
    if path.extension().map(|e| e == "mpk").unwrap_or(false) {
        path.with_extension("")
    } else {
        path.to_path_buf()
    }
}

fn weights_path(stem: &Path) -> PathBuf {
    stem.with_extension("mpk")
}

fn meta_path(stem: &Path) -> PathBuf {
    stem.with_extension("meta.json")
}

/// Saves weights and metadata under `stem`.
pub fn save<B: Backend>(
    model: &TagClassifier<B>,
    meta: &CheckpointMeta,
    stem: &Path,
) -> Result<()> {
    if let Some(parent) = stem.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AtlasError::io(format!("creating {}", parent.display()), e))?;
    }

    let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(stem.to_path_buf(), &recorder)
        .map_err(|e| AtlasError::Recorder(e.to_string()))?;

    // Write-then-rename so readers never observe a partial meta file.
    let meta_file = meta_path(stem);
    let tmp = meta_file.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(meta)?;
    fs::write(&tmp, json)
        .map_err(|e| AtlasError::io(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, &meta_file)
        .map_err(|e| AtlasError::io(format!("renaming {}", meta_file.display()), e))?;

    debug!(stem = %stem.display(), epoch = meta.epoch, "Saved checkpoint");
    Ok(())
}

/// Loads the model and metadata saved under `stem`.
pub fn load<B: Backend>(stem: &Path, device: &B::Device) -> Result<(TagClassifier<B>, CheckpointMeta)> {
    let stem = checkpoint_stem(stem);
    let weights = weights_path(&stem);
    if !weights.exists() {
        return Err(AtlasError::CheckpointNotFound(weights));
    }

    let meta_file = meta_path(&stem);
    let raw = fs::read_to_string(&meta_file)
        .map_err(|e| AtlasError::io(format!("reading {}", meta_file.display()), e))?;
    let meta: CheckpointMeta = serde_json::from_str(&raw)?;

    let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
    let model = meta
        .classifier_config()
        .init::<B>(device)
        .load_file(stem.to_path_buf(), &recorder, device)
        .map_err(|e| AtlasError::Recorder(e.to_string()))?;

    info!(
        stem = %stem.display(),
        epoch = meta.epoch,
        best_val_accuracy = meta.best_val_accuracy,
        "Loaded checkpoint"
    );
    Ok((model, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;
    use tempfile::TempDir;

    type B = NdArray<f32>;

    fn small_meta() -> CheckpointMeta {
        CheckpointMeta {
            epoch: 3,
            best_val_accuracy: 0.75,
            tag_types: TagType::ALL.to_vec(),
            source_types: Source::ALL.to_vec(),
            image_size: 16,
            cnn_channels: vec![4, 8],
            metadata_hidden: 64,
            fusion_hidden: 256,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("best");
        let device = Default::default();
        let meta = small_meta();

        let model = meta.classifier_config().init::<B>(&device);
        save(&model, &meta, &stem).unwrap();
        assert!(stem.with_extension("mpk").exists());
        assert!(stem.with_extension("meta.json").exists());

        let (loaded, loaded_meta) = load::<B>(&stem, &device).unwrap();
        assert_eq!(loaded_meta.epoch, 3);
        assert_eq!(loaded_meta.tag_types, TagType::ALL.to_vec());

        // Same weights should give the same logits.
        let images = Tensor::<B, 4>::ones([1, 3, 16, 16], &device);
        let coords = Tensor::<B, 2>::from_floats([[34.6, -82.5]], &device);
        let sources = Tensor::<B, 2>::from_floats([[1.0, 0.0, 0.0]], &device);
        let before = model
            .forward(images.clone(), coords.clone(), sources.clone())
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap();
        let after = loaded
            .forward(images, coords, sources)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let err = load::<B>(&dir.path().join("nope"), &device).unwrap_err();
        assert!(matches!(err, AtlasError::CheckpointNotFound(_)));
    }

    #[test]
    fn test_stem_accepts_mpk_extension() {
        assert_eq!(
            checkpoint_stem(Path::new("checkpoints/best.mpk")),
            PathBuf::from("checkpoints/best")
        );
        assert_eq!(
            checkpoint_stem(Path::new("checkpoints/best")),
            PathBuf::from("checkpoints/best")
        );
    }
}
