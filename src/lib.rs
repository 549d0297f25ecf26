//! accessatlas: classifies street-level photos into accessibility tag types.
//!
//! Given an image plus its latitude, longitude and provenance, the model
//! predicts one of five tags: ramp, elevator, tactile_path, entrance or
//! obstacle. The crate covers the whole workflow: synthetic dataset
//! generation, stratified splitting, training with early stopping,
//! evaluation with error analysis, and single-image prediction.

pub mod checkpoint;
pub mod data;
pub mod model;
pub mod models;
pub mod pipeline;

pub use models::{AtlasError, Config, Prediction, Result, Source, TagRecord, TagType};

/// Inference backend. The default is CPU via ndarray; enable the
/// `backend-wgpu` feature for GPU.
#[cfg(feature = "backend-wgpu")]
pub type AtlasBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type AtlasBackend = burn::backend::NdArray<f32>;

/// Training backend: the inference backend wrapped in autodiff.
pub type AtlasAutodiffBackend = burn::backend::Autodiff<AtlasBackend>;
