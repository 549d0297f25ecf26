//! Convolutional image feature extractor.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// conv 3x3 -> batch norm -> relu -> max pool 2x2 -> dropout
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B>,
    activation: Relu,
    pool: MaxPool2d,
    dropout: Dropout,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            activation: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);
        self.dropout.forward(x)
    }
}

/// Stack of conv blocks followed by global average pooling. Each block
/// halves the spatial resolution; the pooled output is a flat
/// `[batch, last_channels]` feature vector regardless of input size.
#[derive(Module, Debug)]
pub struct CnnExtractor<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    avg_pool: AdaptiveAvgPool2d,
}

impl<B: Backend> CnnExtractor<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.avg_pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }
}

#[derive(Config, Debug)]
pub struct CnnExtractorConfig {
    /// Output channels per block, e.g. [32, 64, 128].
    pub channels: Vec<usize>,
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl CnnExtractorConfig {
    /// Width of the feature vector [`CnnExtractor::forward`] produces.
    pub fn output_dim(&self) -> usize {
        *self.channels.last().unwrap_or(&0)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CnnExtractor<B> {
        let mut blocks = Vec::with_capacity(self.channels.len());
        let mut in_channels = 3;
        for &out_channels in &self.channels {
            blocks.push(ConvBlock::new(in_channels, out_channels, self.dropout, device));
            in_channels = out_channels;
        }
        CnnExtractor {
            blocks,
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_feature_shape() {
        let device = Default::default();
        let config = CnnExtractorConfig::new(vec![8, 16]);
        let extractor = config.init::<B>(&device);

        let images = Tensor::<B, 4>::zeros([2, 3, 32, 32], &device);
        let features = extractor.forward(images);
        assert_eq!(features.dims(), [2, 16]);
        assert_eq!(config.output_dim(), 16);
    }
}
