//! Network architecture: CNN extractor, metadata encoder, and the fused
//! classifier head.

pub mod classifier;
pub mod cnn;
pub mod metadata;

pub use classifier::{TagClassifier, TagClassifierConfig};
pub use cnn::{CnnExtractor, CnnExtractorConfig};
pub use metadata::{MetadataEncoder, MetadataEncoderConfig};
