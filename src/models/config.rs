//! Configuration for accessatlas.
//!
//! Every tunable of the pipeline is parameterized here and loaded from a
//! YAML file. All fields carry sensible defaults so a minimal config is
//! valid; `validate()` performs the semantic checks a parse cannot.

use crate::models::{Source, TagType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Random seed used for splitting, shuffling and weight init
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Dataloader worker threads
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Dataset locations and split ratios
    #[serde(default)]
    pub data: DataConfig,

    /// Model architecture
    #[serde(default)]
    pub model: ModelConfig,

    /// Training hyperparameters
    #[serde(default)]
    pub training: TrainingConfig,

    /// Train-time image augmentation
    #[serde(default)]
    pub augmentation: AugmentationConfig,

    /// Evaluation artifacts
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Logging and artifact directories
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tag vocabulary, in class-index order
    #[serde(default = "default_tag_types")]
    pub tag_types: Vec<TagType>,

    /// Source vocabulary, in one-hot order
    #[serde(default = "default_source_types")]
    pub source_types: Vec<Source>,
}

fn default_seed() -> u64 {
    42
}

fn default_num_workers() -> usize {
    2
}

fn default_tag_types() -> Vec<TagType> {
    TagType::ALL.to_vec()
}

fn default_source_types() -> Vec<Source> {
    Source::ALL.to_vec()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            num_workers: default_num_workers(),
            data: DataConfig::default(),
            model: ModelConfig::default(),
            training: TrainingConfig::default(),
            augmentation: AugmentationConfig::default(),
            evaluation: EvaluationConfig::default(),
            logging: LoggingConfig::default(),
            tag_types: default_tag_types(),
            source_types: default_source_types(),
        }
    }
}

/// Dataset locations and split ratios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Path to the tags CSV
    #[serde(default = "default_tags_csv")]
    pub tags_csv: PathBuf,

    /// Directory containing the images referenced by the CSV
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// Fraction of rows in the train split
    #[serde(default = "default_train_split")]
    pub train_split: f64,

    /// Fraction of rows in the validation split
    #[serde(default = "default_val_split")]
    pub val_split: f64,

    /// Fraction of rows in the test split
    #[serde(default = "default_val_split")]
    pub test_split: f64,
}

fn default_tags_csv() -> PathBuf {
    PathBuf::from("data/tags.csv")
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("data/images")
}

fn default_train_split() -> f64 {
    0.7
}

fn default_val_split() -> f64 {
    0.15
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            tags_csv: default_tags_csv(),
            images_dir: default_images_dir(),
            train_split: default_train_split(),
            val_split: default_val_split(),
            test_split: default_val_split(),
        }
    }
}

/// Model architecture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Input image side length (images are resized to square)
    #[serde(default = "default_image_size")]
    pub image_size: usize,

    /// Output channels of the three conv blocks
    #[serde(default = "default_cnn_channels")]
    pub cnn_channels: [usize; 3],

    /// Dropout after each conv block
    #[serde(default = "default_cnn_dropout")]
    pub cnn_dropout: f64,

    /// Hidden width of the metadata encoder
    #[serde(default = "default_metadata_hidden")]
    pub metadata_hidden: usize,

    /// Hidden width of the fusion layer
    #[serde(default = "default_fusion_hidden")]
    pub fusion_hidden: usize,

    /// Number of output classes; must match `tag_types` length
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
}

fn default_image_size() -> usize {
    224
}

fn default_cnn_channels() -> [usize; 3] {
    [32, 64, 128]
}

fn default_cnn_dropout() -> f64 {
    0.3
}

fn default_metadata_hidden() -> usize {
    64
}

fn default_fusion_hidden() -> usize {
    256
}

fn default_num_classes() -> usize {
    5
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            cnn_channels: default_cnn_channels(),
            cnn_dropout: default_cnn_dropout(),
            metadata_hidden: default_metadata_hidden(),
            fusion_hidden: default_fusion_hidden(),
            num_classes: default_num_classes(),
        }
    }
}

/// Optimizer selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam with weight decay (default)
    #[default]
    Adam,
    /// SGD with momentum 0.9
    Sgd,
}

/// Learning-rate schedule selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Multiply by `step_lr_gamma` every `step_lr_step_size` epochs (default)
    #[default]
    Step,
    /// Cosine annealing over `num_epochs`
    Cosine,
    /// Constant learning rate
    None,
}

/// Training hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,

    #[serde(default)]
    pub optimizer: OptimizerKind,

    #[serde(default)]
    pub scheduler: SchedulerKind,

    /// Epochs between step-scheduler decays
    #[serde(default = "default_step_lr_step_size")]
    pub step_lr_step_size: usize,

    /// Step-scheduler decay factor
    #[serde(default = "default_step_lr_gamma")]
    pub step_lr_gamma: f64,

    /// Gradient-norm clip; 0 disables clipping
    #[serde(default = "default_grad_clip")]
    pub grad_clip: f64,

    /// Stop after this many epochs without val-accuracy improvement
    #[serde(default = "default_patience")]
    pub early_stopping_patience: usize,
}

fn default_batch_size() -> usize {
    32
}

fn default_num_epochs() -> usize {
    30
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_weight_decay() -> f64 {
    1e-4
}

fn default_step_lr_step_size() -> usize {
    10
}

fn default_step_lr_gamma() -> f64 {
    0.1
}

fn default_grad_clip() -> f64 {
    1.0
}

fn default_patience() -> usize {
    5
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_epochs: default_num_epochs(),
            learning_rate: default_learning_rate(),
            weight_decay: default_weight_decay(),
            optimizer: OptimizerKind::default(),
            scheduler: SchedulerKind::default(),
            step_lr_step_size: default_step_lr_step_size(),
            step_lr_gamma: default_step_lr_gamma(),
            grad_clip: default_grad_clip(),
            early_stopping_patience: default_patience(),
        }
    }
}

/// Train-time image augmentation.
///
/// Applied only to the train split, and only when `enabled` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum rotation in degrees (uniform in [-r, r])
    #[serde(default = "default_rotation")]
    pub random_rotation: f64,

    /// Probability of a horizontal flip
    #[serde(default = "default_flip")]
    pub random_horizontal_flip: f64,

    /// Brightness jitter magnitude (fraction of full scale)
    #[serde(default = "default_jitter")]
    pub color_jitter_brightness: f64,

    /// Contrast jitter magnitude (fraction)
    #[serde(default = "default_jitter")]
    pub color_jitter_contrast: f64,

    /// Area scale range for the random resized crop
    #[serde(default = "default_crop_scale")]
    pub random_crop_scale: (f64, f64),
}

fn default_true() -> bool {
    true
}

fn default_rotation() -> f64 {
    10.0
}

fn default_flip() -> f64 {
    0.5
}

fn default_jitter() -> f64 {
    0.2
}

fn default_crop_scale() -> (f64, f64) {
    (0.8, 1.0)
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            random_rotation: default_rotation(),
            random_horizontal_flip: default_flip(),
            color_jitter_brightness: default_jitter(),
            color_jitter_contrast: default_jitter(),
            random_crop_scale: default_crop_scale(),
        }
    }
}

/// Evaluation artifact switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Print and save the confusion matrix
    #[serde(default = "default_true")]
    pub confusion_matrix: bool,

    /// Save misclassified samples (JSON + image copies)
    #[serde(default = "default_true")]
    pub save_misclassified: bool,

    /// How many of the most confident errors to keep
    #[serde(default = "default_top_k")]
    pub top_k_errors: usize,
}

fn default_top_k() -> usize {
    20
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            confusion_matrix: true,
            save_misclassified: true,
            top_k_errors: default_top_k(),
        }
    }
}

/// Logging and artifact directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Where evaluation metrics and error analysis land
    #[serde(default = "default_error_dir")]
    pub error_dir: PathBuf,

    /// Batches between progress-bar message refreshes
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,

    /// Skip numbered per-epoch checkpoints, keeping only `best`/`last`
    #[serde(default = "default_true")]
    pub save_best_only: bool,

    /// Save a `last` checkpoint every epoch
    #[serde(default = "default_true")]
    pub save_last: bool,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_error_dir() -> PathBuf {
    PathBuf::from("errors")
}

fn default_log_interval() -> usize {
    10
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            log_dir: default_log_dir(),
            error_dir: default_error_dir(),
            log_interval: default_log_interval(),
            save_best_only: true,
            save_last: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Semantic checks a parse cannot perform.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let splits = self.data.train_split + self.data.val_split + self.data.test_split;
        if (splits - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "split ratios must sum to 1.0, got {splits}"
            )));
        }
        for (name, ratio) in [
            ("train_split", self.data.train_split),
            ("val_split", self.data.val_split),
            ("test_split", self.data.test_split),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in [0, 1], got {ratio}"
                )));
            }
        }

        if self.model.num_classes != self.tag_types.len() {
            return Err(ConfigError::Invalid(format!(
                "num_classes ({}) does not match tag_types length ({})",
                self.model.num_classes,
                self.tag_types.len()
            )));
        }

        // Three 2x2 max pools need at least 8px to leave a feature map.
        if self.model.image_size < 8 {
            return Err(ConfigError::Invalid(format!(
                "image_size must be at least 8, got {}",
                self.model.image_size
            )));
        }

        if self.model.cnn_channels.iter().any(|&c| c == 0) {
            return Err(ConfigError::Invalid(
                "cnn_channels entries must be non-zero".to_string(),
            ));
        }

        if self.training.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be non-zero".to_string(),
            ));
        }

        if self.training.learning_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }

        let (lo, hi) = self.augmentation.random_crop_scale;
        if !(0.0 < lo && lo <= hi && hi <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "random_crop_scale must satisfy 0 < lo <= hi <= 1, got ({lo}, {hi})"
            )));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
