//! Encoder for the non-image inputs (coordinates and source).

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Two-layer MLP over `[lat/90, lon/180, one-hot source]`.
///
/// Coordinate normalization lives here rather than in the batcher so
/// checkpointed models always see the same scaling at inference time.
#[derive(Module, Debug)]
pub struct MetadataEncoder<B: Backend> {
    fc1: Linear<B>,
    norm1: LayerNorm<B>,
    fc2: Linear<B>,
    norm2: LayerNorm<B>,
    activation: Relu,
    dropout: Dropout,
}

impl<B: Backend> MetadataEncoder<B> {
    /// `coords` is `[batch, 2]` raw (lat, lon); `sources` is
    /// `[batch, num_sources]` one-hot. Returns `[batch, hidden]`.
    pub fn forward(&self, coords: Tensor<B, 2>, sources: Tensor<B, 2>) -> Tensor<B, 2> {
        let lat = coords.clone().narrow(1, 0, 1).div_scalar(90.0);
        let lon = coords.narrow(1, 1, 1).div_scalar(180.0);
        let x = Tensor::cat(vec![lat, lon, sources], 1);

        let x = self.fc1.forward(x);
        let x = self.norm1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        let x = self.fc2.forward(x);
        let x = self.norm2.forward(x);
        let x = self.activation.forward(x);
        self.dropout.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct MetadataEncoderConfig {
    /// Number of distinct source values in the one-hot encoding.
    pub num_sources: usize,
    #[config(default = 64)]
    pub hidden: usize,
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl MetadataEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MetadataEncoder<B> {
        let input_dim = 2 + self.num_sources;
        MetadataEncoder {
            fc1: LinearConfig::new(input_dim, self.hidden).init(device),
            norm1: LayerNormConfig::new(self.hidden).init(device),
            fc2: LinearConfig::new(self.hidden, self.hidden).init(device),
            norm2: LayerNormConfig::new(self.hidden).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_encoder_shape() {
        let device = Default::default();
        let encoder = MetadataEncoderConfig::new(3).init::<B>(&device);

        let coords = Tensor::<B, 2>::from_floats([[34.67, -82.48], [0.0, 0.0]], &device);
        let sources = Tensor::<B, 2>::from_floats(
            [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            &device,
        );
        let out = encoder.forward(coords, sources);
        assert_eq!(out.dims(), [2, 64]);
    }
}
