//! Data loading: CSV-backed datasets, image preprocessing, batching, and
//! synthetic dataset generation.

pub mod augment;
pub mod batcher;
pub mod dataset;
pub mod synth;

pub use batcher::{TagBatch, TagBatcher};
pub use dataset::{load_split, load_splits, Split, TagDataset, TagItem};
pub use synth::{generate_dataset, GenerateSummary};
