//! Core types: configuration, errors, records and metrics.

mod config;
mod error;
mod metrics;
mod record;

pub use config::{
    AugmentationConfig, Config, ConfigError, DataConfig, EvaluationConfig, LoggingConfig,
    ModelConfig, OptimizerKind, SchedulerKind, TrainingConfig,
};
pub use error::{AtlasError, Result};
pub use metrics::{ClassMetrics, EvalMetrics};
pub use record::{Prediction, Source, TagRecord, TagType};
