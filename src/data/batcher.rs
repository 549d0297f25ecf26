//! Batcher: turns [`TagItem`]s into tensors for the classifier.
//!
//! Images are loaded and normalized on demand so the dataset itself only
//! holds paths. A batch carries four tensors: images, raw lat/lon
//! coordinates, one-hot sources, and integer targets.

use crate::data::augment;
use crate::data::dataset::TagItem;
use crate::models::{AugmentationConfig, TagRecord};
use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use tracing::warn;

/// One batch of training or evaluation data.
///
/// `records` travels with the tensors so per-sample results can be joined
/// back to their CSV rows regardless of the order the loader yields
/// batches in (multi-worker loading interleaves worker chunks).
#[derive(Clone, Debug)]
pub struct TagBatch<B: Backend> {
    /// [batch, 3, size, size] normalized images
    pub images: Tensor<B, 4>,
    /// [batch, 2] raw (lat, lon); normalization happens in the encoder
    pub coords: Tensor<B, 2>,
    /// [batch, num_sources] one-hot source encoding
    pub sources: Tensor<B, 2>,
    /// [batch] class indices
    pub targets: Tensor<B, 1, Int>,
    /// CSV rows for the samples in this batch, in row order
    pub records: Vec<TagRecord>,
}

/// Batcher for tag classification.
#[derive(Clone)]
pub struct TagBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    num_sources: usize,
    /// Set only for the train split
    augmentation: Option<AugmentationConfig>,
}

impl<B: Backend> TagBatcher<B> {
    pub fn new(
        device: B::Device,
        image_size: usize,
        num_sources: usize,
        augmentation: Option<AugmentationConfig>,
    ) -> Self {
        Self {
            device,
            image_size,
            num_sources,
            augmentation,
        }
    }
}

impl<B: Backend> Batcher<B, TagItem, TagBatch<B>> for TagBatcher<B> {
    fn batch(&self, items: Vec<TagItem>, _device: &B::Device) -> TagBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let mut pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut coords = Vec::with_capacity(batch_size * 2);
        let mut sources = vec![0.0f32; batch_size * self.num_sources];
        let mut targets = Vec::with_capacity(batch_size);
        let mut records = Vec::with_capacity(batch_size);

        let mut rng = rand::thread_rng();

        for (row, item) in items.into_iter().enumerate() {
            let augment = self.augmentation.as_ref().map(|cfg| (cfg, &mut rng));
            match augment::load_pixels(&item.image_path, size, augment) {
                Ok(data) => pixels.extend_from_slice(&data),
                Err(e) => {
                    // A broken file should not kill a whole epoch; feed a
                    // blank image instead, as the upstream loader does.
                    warn!(path = %item.image_path.display(), error = %e, "Image load failed, using blank");
                    pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                }
            }

            coords.push(item.record.lat as f32);
            coords.push(item.record.lon as f32);

            let source_idx = item.record.source.index();
            if source_idx < self.num_sources {
                sources[row * self.num_sources + source_idx] = 1.0;
            }

            targets.push(item.label as i64);
            records.push(item.record);
        }

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let coords = Tensor::<B, 1>::from_floats(coords.as_slice(), &self.device)
            .reshape([batch_size, 2]);
        let sources = Tensor::<B, 1>::from_floats(sources.as_slice(), &self.device)
            .reshape([batch_size, self.num_sources]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), &self.device);

        TagBatch {
            images,
            coords,
            sources,
            targets,
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Source, TagRecord, TagType};
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type B = NdArray<f32>;

    fn item(dir: &std::path::Path, name: &str, tag: TagType, source: Source) -> TagItem {
        let path = dir.join(name);
        RgbImage::from_pixel(12, 12, Rgb([200, 100, 50]))
            .save(&path)
            .unwrap();
        TagItem {
            record: TagRecord {
                image_path: name.to_string(),
                lat: 34.67,
                lon: -82.48,
                tag,
                source,
            },
            image_path: path,
            label: tag.index(),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            item(dir.path(), "a.png", TagType::Ramp, Source::User),
            item(dir.path(), "b.png", TagType::Obstacle, Source::Osm),
            item(dir.path(), "c.png", TagType::Elevator, Source::Model),
        ];

        let device = Default::default();
        let batcher = TagBatcher::<B>::new(device, 8, Source::ALL.len(), None);
        let batch = batcher.batch(items, &Default::default());

        assert_eq!(batch.images.dims(), [3, 3, 8, 8]);
        assert_eq!(batch.coords.dims(), [3, 2]);
        assert_eq!(batch.sources.dims(), [3, 3]);
        assert_eq!(batch.targets.dims(), [3]);

        let sources = batch.sources.into_data().convert::<f32>();
        let sources = sources.to_vec::<f32>().unwrap();
        // user, osm, model one-hot rows
        assert_eq!(&sources[0..3], &[1.0, 0.0, 0.0]);
        assert_eq!(&sources[3..6], &[0.0, 1.0, 0.0]);
        assert_eq!(&sources[6..9], &[0.0, 0.0, 1.0]);

        let targets = batch.targets.into_data().convert::<i64>();
        let targets = targets.to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![0, 4, 1]);
    }

    #[test]
    fn test_batch_carries_matching_records() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            item(dir.path(), "a.png", TagType::Entrance, Source::Model),
            item(dir.path(), "b.png", TagType::TactilePath, Source::Osm),
        ];

        let batcher = TagBatcher::<B>::new(Default::default(), 8, Source::ALL.len(), None);
        let batch = batcher.batch(items, &Default::default());

        let targets = batch.targets.into_data().convert::<i64>();
        let targets = targets.to_vec::<i64>().unwrap();
        assert_eq!(batch.records.len(), 2);
        for (record, target) in batch.records.iter().zip(&targets) {
            assert_eq!(record.tag.index() as i64, *target);
        }
        assert_eq!(batch.records[0].tag, TagType::Entrance);
        assert_eq!(batch.records[1].tag, TagType::TactilePath);
    }

    // Multi-worker loading interleaves chunks, so yield order differs from
    // dataset order. The records inside each batch must still line up with
    // that batch's tensors.
    #[test]
    fn test_multi_worker_batches_stay_self_consistent() {
        use crate::data::dataset::TagDataset;
        use burn::data::dataloader::DataLoaderBuilder;

        let dir = TempDir::new().unwrap();
        let records: Vec<TagRecord> = (0..32)
            .map(|i| TagRecord {
                image_path: format!("{i}.png"),
                lat: i as f64,
                lon: -(i as f64),
                tag: TagType::ALL[i % TagType::ALL.len()],
                source: Source::ALL[i % Source::ALL.len()],
            })
            .collect();
        let dataset = TagDataset::from_records(records, dir.path());

        let batcher = TagBatcher::<B>::new(Default::default(), 4, Source::ALL.len(), None);
        let loader = DataLoaderBuilder::new(batcher)
            .batch_size(1)
            .num_workers(2)
            .build(dataset);

        let mut seen = 0usize;
        for batch in loader.iter() {
            let coords = batch.coords.into_data().convert::<f32>();
            let coords = coords.to_vec::<f32>().unwrap();
            let targets = batch.targets.into_data().convert::<i64>();
            let targets = targets.to_vec::<i64>().unwrap();

            let record = &batch.records[0];
            assert_eq!(coords[0] as f64, record.lat);
            assert_eq!(coords[1] as f64, record.lon);
            assert_eq!(targets[0], record.tag.index() as i64);
            seen += 1;
        }
        assert_eq!(seen, 32);
    }

    #[test]
    fn test_missing_image_becomes_blank() {
        let dir = TempDir::new().unwrap();
        let mut broken = item(dir.path(), "ok.png", TagType::Ramp, Source::User);
        broken.image_path = dir.path().join("missing.png");

        let batcher = TagBatcher::<B>::new(Default::default(), 8, Source::ALL.len(), None);
        let batch = batcher.batch(vec![broken], &Default::default());

        let data = batch.images.into_data().convert::<f32>();
        let data = data.to_vec::<f32>().unwrap();
        assert!(data.iter().all(|&v| v == 0.0));
    }
}
