//! Single-image prediction against a trained checkpoint.

use crate::checkpoint::{self, CheckpointMeta};
use crate::data::augment;
use crate::model::TagClassifier;
use crate::models::{AtlasError, Config, Prediction, Result, Source};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;
use tracing::info;

/// Holds a loaded model so repeated predictions skip the checkpoint read.
pub struct Predictor<B: Backend> {
    model: TagClassifier<B>,
    meta: CheckpointMeta,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Loads the checkpoint (default `<checkpoint_dir>/best`) and checks it
    /// against the active config.
    pub fn load(config: &Config, device: B::Device, checkpoint_path: Option<&Path>) -> Result<Self> {
        let default_stem = config.logging.checkpoint_dir.join("best");
        let stem = checkpoint_path.unwrap_or(&default_stem);
        let (model, meta) = checkpoint::load::<B>(stem, &device)?;
        meta.validate_against(config)?;
        Ok(Self {
            model,
            meta,
            device,
        })
    }

    /// Classifies one image with its location and provenance.
    pub fn predict(
        &self,
        image_path: &Path,
        lat: f64,
        lon: f64,
        source: Source,
        with_probabilities: bool,
    ) -> Result<Prediction> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(AtlasError::InvalidInput(format!(
                "latitude {lat} out of range [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(AtlasError::InvalidInput(format!(
                "longitude {lon} out of range [-180, 180]"
            )));
        }

        let size = self.meta.image_size;
        let pixels =
            augment::load_pixels::<rand::rngs::ThreadRng>(image_path, size, None)?;

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([1, 3, size, size]);
        let coords =
            Tensor::<B, 2>::from_floats([[lat as f32, lon as f32]], &self.device);

        let num_sources = self.meta.source_types.len();
        let mut one_hot = vec![0.0f32; num_sources];
        let source_idx = self
            .meta
            .source_types
            .iter()
            .position(|s| *s == source)
            .ok_or_else(|| AtlasError::UnknownSource(source.to_string()))?;
        one_hot[source_idx] = 1.0;
        let sources = Tensor::<B, 1>::from_floats(one_hot.as_slice(), &self.device)
            .reshape([1, num_sources]);

        let probabilities = self
            .model
            .predict_probabilities(images, coords, sources)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| AtlasError::Internal(format!("tensor extraction: {e:?}")))?;

        let (best_idx, best_prob) = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or_else(|| AtlasError::Internal("empty probability vector".to_string()))?;
        let predicted = *self
            .meta
            .tag_types
            .get(best_idx)
            .ok_or_else(|| AtlasError::Internal(format!("class index {best_idx} out of range")))?;

        let distribution = with_probabilities.then(|| {
            let mut all: Vec<_> = self
                .meta
                .tag_types
                .iter()
                .zip(&probabilities)
                .map(|(tag, p)| (*tag, *p as f64))
                .collect();
            all.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            all
        });

        info!(
            image = %image_path.display(),
            predicted = predicted.as_str(),
            confidence = format!("{:.2}%", best_prob * 100.0),
            "Prediction"
        );

        Ok(Prediction {
            predicted,
            confidence: *best_prob as f64,
            image_path: image_path.display().to_string(),
            lat,
            lon,
            source,
            probabilities: distribution,
        })
    }
}

/// Renders a prediction for terminal output, with probability bars when the
/// full distribution was requested.
pub fn render_prediction(prediction: &Prediction) -> String {
    let mut out = String::new();
    out.push_str(&format!("Image:      {}\n", prediction.image_path));
    out.push_str(&format!(
        "Location:   ({:.5}, {:.5})\n",
        prediction.lat, prediction.lon
    ));
    out.push_str(&format!("Source:     {}\n", prediction.source));
    out.push_str(&format!(
        "Predicted:  {} ({:.1}% confidence)\n",
        prediction.predicted,
        prediction.confidence * 100.0
    ));

    if let Some(probabilities) = &prediction.probabilities {
        out.push('\n');
        for (tag, p) in probabilities {
            let bar = "█".repeat((p * 50.0).round() as usize);
            out.push_str(&format!("  {:<13} {:>6.2}% {}\n", tag.as_str(), p * 100.0, bar));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointMeta;
    use crate::models::TagType;
    use burn::backend::NdArray;
    use chrono::Utc;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type B = NdArray<f32>;

    fn predictor(dir: &TempDir) -> Predictor<B> {
        let device = Default::default();
        let meta = CheckpointMeta {
            epoch: 1,
            best_val_accuracy: 0.5,
            tag_types: TagType::ALL.to_vec(),
            source_types: Source::ALL.to_vec(),
            image_size: 16,
            cnn_channels: vec![4, 8],
            metadata_hidden: 64,
            fusion_hidden: 256,
            saved_at: Utc::now(),
        };
        let model = meta.classifier_config().init::<B>(&device);
        let stem = dir.path().join("best");
        checkpoint::save(&model, &meta, &stem).unwrap();
        Predictor::load(&Config::default(), device, Some(&stem)).unwrap()
    }

    fn write_image(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("photo.png");
        RgbImage::from_pixel(16, 16, Rgb([120, 80, 200]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_predict_returns_valid_tag() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(&dir);
        let image = write_image(&dir);

        let prediction = predictor
            .predict(&image, 34.67, -82.48, Source::User, true)
            .unwrap();
        assert!(TagType::ALL.contains(&prediction.predicted));
        assert!((0.0..=1.0).contains(&prediction.confidence));

        let probabilities = prediction.probabilities.unwrap();
        assert_eq!(probabilities.len(), 5);
        let total: f64 = probabilities.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-4);
        // Sorted descending, and the top entry matches the prediction.
        assert_eq!(probabilities[0].0, prediction.predicted);
        assert!(probabilities.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(&dir);
        let image = write_image(&dir);

        let err = predictor
            .predict(&image, 91.0, 0.0, Source::User, false)
            .unwrap_err();
        assert!(matches!(err, AtlasError::InvalidInput(_)));

        let err = predictor
            .predict(&image, 0.0, -200.0, Source::User, false)
            .unwrap_err();
        assert!(matches!(err, AtlasError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_image_fails() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(&dir);
        let err = predictor
            .predict(&dir.path().join("nope.jpg"), 0.0, 0.0, Source::Osm, false)
            .unwrap_err();
        assert!(matches!(err, AtlasError::Image { .. }));
    }

    #[test]
    fn test_render_includes_bars() {
        let prediction = Prediction {
            predicted: TagType::Ramp,
            confidence: 0.8,
            image_path: "a.jpg".to_string(),
            lat: 1.0,
            lon: 2.0,
            source: Source::User,
            probabilities: Some(vec![(TagType::Ramp, 0.8), (TagType::Obstacle, 0.2)]),
        };
        let rendered = render_prediction(&prediction);
        assert!(rendered.contains("ramp"));
        assert!(rendered.contains('█'));
    }
}
