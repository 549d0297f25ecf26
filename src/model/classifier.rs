//! The full tag classifier: CNN features fused with metadata features.

use crate::data::TagBatch;
use crate::model::cnn::{CnnExtractor, CnnExtractorConfig};
use crate::model::metadata::{MetadataEncoder, MetadataEncoderConfig};
use crate::models::ModelConfig;
use burn::config::Config;
use burn::module::Module;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use burn::train::ClassificationOutput;

/// Mixes concatenated image and metadata features into one vector.
#[derive(Module, Debug)]
pub struct FusionLayer<B: Backend> {
    fc: Linear<B>,
    norm: LayerNorm<B>,
    activation: Relu,
    dropout: Dropout,
}

impl<B: Backend> FusionLayer<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc.forward(input);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        self.dropout.forward(x)
    }
}

/// Classifier over street-level images plus their location and source.
#[derive(Module, Debug)]
pub struct TagClassifier<B: Backend> {
    cnn: CnnExtractor<B>,
    metadata: MetadataEncoder<B>,
    fusion: FusionLayer<B>,
    head_dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> TagClassifier<B> {
    /// Returns raw logits `[batch, num_classes]`.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        coords: Tensor<B, 2>,
        sources: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let image_features = self.cnn.forward(images);
        let metadata_features = self.metadata.forward(coords, sources);
        let fused = self
            .fusion
            .forward(Tensor::cat(vec![image_features, metadata_features], 1));
        self.head.forward(self.head_dropout.forward(fused))
    }

    /// Forward pass plus cross-entropy loss against the batch targets.
    pub fn forward_classification(&self, batch: TagBatch<B>) -> ClassificationOutput<B> {
        let logits = self.forward(batch.images, batch.coords, batch.sources);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets.clone());
        ClassificationOutput::new(loss, logits, batch.targets)
    }

    /// Class probabilities `[batch, num_classes]` via softmax.
    pub fn predict_probabilities(
        &self,
        images: Tensor<B, 4>,
        coords: Tensor<B, 2>,
        sources: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let logits = self.forward(images, coords, sources);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Predicted class indices `[batch]`.
    pub fn predict_classes(&self, probabilities: Tensor<B, 2>) -> Tensor<B, 1, Int> {
        let [batch, _] = probabilities.dims();
        probabilities.argmax(1).reshape([batch])
    }
}

#[derive(Config, Debug)]
pub struct TagClassifierConfig {
    pub num_classes: usize,
    pub num_sources: usize,
    pub cnn_channels: Vec<usize>,
    #[config(default = 0.3)]
    pub cnn_dropout: f64,
    #[config(default = 64)]
    pub metadata_hidden: usize,
    #[config(default = 256)]
    pub fusion_hidden: usize,
    #[config(default = 0.5)]
    pub head_dropout: f64,
}

impl TagClassifierConfig {
    /// Builds a classifier config from the user-facing model settings.
    pub fn from_model_config(model: &ModelConfig, num_sources: usize) -> Self {
        Self::new(model.num_classes, num_sources, model.cnn_channels.to_vec())
            .with_cnn_dropout(model.cnn_dropout)
            .with_metadata_hidden(model.metadata_hidden)
            .with_fusion_hidden(model.fusion_hidden)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> TagClassifier<B> {
        let cnn_config =
            CnnExtractorConfig::new(self.cnn_channels.clone()).with_dropout(self.cnn_dropout);
        let fusion_input = cnn_config.output_dim() + self.metadata_hidden;

        TagClassifier {
            cnn: cnn_config.init(device),
            metadata: MetadataEncoderConfig::new(self.num_sources)
                .with_hidden(self.metadata_hidden)
                .with_dropout(self.cnn_dropout)
                .init(device),
            fusion: FusionLayer {
                fc: LinearConfig::new(fusion_input, self.fusion_hidden).init(device),
                norm: LayerNormConfig::new(self.fusion_hidden).init(device),
                activation: Relu::new(),
                dropout: DropoutConfig::new(self.cnn_dropout).init(),
            },
            head_dropout: DropoutConfig::new(self.head_dropout).init(),
            head: LinearConfig::new(self.fusion_hidden, self.num_classes).init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn small_config() -> TagClassifierConfig {
        TagClassifierConfig::new(5, 3, vec![4, 8])
    }

    #[test]
    fn test_logit_shape() {
        let device = Default::default();
        let model = small_config().init::<B>(&device);

        let images = Tensor::<B, 4>::zeros([2, 3, 16, 16], &device);
        let coords = Tensor::<B, 2>::from_floats([[34.6, -82.5], [34.7, -82.4]], &device);
        let sources = Tensor::<B, 2>::from_floats(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &device,
        );

        let logits = model.forward(images, coords, sources);
        assert_eq!(logits.dims(), [2, 5]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let model = small_config().init::<B>(&device);

        let images = Tensor::<B, 4>::zeros([1, 3, 16, 16], &device);
        let coords = Tensor::<B, 2>::from_floats([[10.0, 20.0]], &device);
        let sources = Tensor::<B, 2>::from_floats([[0.0, 0.0, 1.0]], &device);

        let probs = model.predict_probabilities(images, coords, sources);
        let values = probs.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        let total: f32 = values.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert!(values.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }
}
