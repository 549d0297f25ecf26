//! Tag dataset: CSV loading, filtering, and stratified splitting.
//!
//! The source of truth is a `tags.csv` with rows
//! `image_path,lat,lon,type,source`. Rows whose `type` or `source` is not
//! in the configured vocabulary are dropped with a warning rather than
//! failing the whole load, since upstream exports routinely contain tags
//! the model does not know.

use crate::models::{AtlasError, Config, Result, Source, TagRecord, TagType};
use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Dataset split selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl FromStr for Split {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(AtlasError::InvalidInput(format!(
                "unknown split '{other}' (expected train, val or test)"
            ))),
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dataset sample handed to the batcher.
///
/// Holds only the resolved path and metadata; pixels are loaded on demand.
#[derive(Debug, Clone)]
pub struct TagItem {
    /// Original CSV row, kept for error analysis
    pub record: TagRecord,
    /// Resolved image path (images_dir joined with the CSV path)
    pub image_path: PathBuf,
    /// Class index of the tag type
    pub label: usize,
}

/// In-memory tag dataset for one split.
pub struct TagDataset {
    records: Vec<TagRecord>,
    images_dir: PathBuf,
}

/// Raw CSV row before vocabulary filtering.
#[derive(Debug, Deserialize)]
struct RawRow {
    image_path: String,
    lat: f64,
    lon: f64,
    #[serde(rename = "type")]
    tag: String,
    source: String,
}

impl TagDataset {
    /// Load a CSV, dropping rows outside the given vocabularies.
    pub fn from_csv(
        csv_path: &Path,
        images_dir: &Path,
        tag_types: &[TagType],
        source_types: &[Source],
    ) -> Result<Self> {
        let mut reader =
            csv::Reader::from_path(csv_path).map_err(|e| AtlasError::csv(csv_path, e))?;

        let mut records = Vec::new();
        let mut dropped = 0usize;

        for (line, row) in reader.deserialize::<RawRow>().enumerate() {
            let row = row.map_err(|e| AtlasError::csv(csv_path, e))?;

            let tag = match row.tag.parse::<TagType>() {
                Ok(tag) if tag_types.contains(&tag) => tag,
                _ => {
                    warn!(line = line + 2, tag = %row.tag, "Dropping row with unknown tag type");
                    dropped += 1;
                    continue;
                }
            };
            let source = match row.source.parse::<Source>() {
                Ok(source) if source_types.contains(&source) => source,
                _ => {
                    warn!(line = line + 2, source = %row.source, "Dropping row with unknown source");
                    dropped += 1;
                    continue;
                }
            };

            records.push(TagRecord {
                image_path: row.image_path,
                lat: row.lat,
                lon: row.lon,
                tag,
                source,
            });
        }

        if records.is_empty() {
            return Err(AtlasError::EmptyDataset(format!(
                "{} contains no usable rows",
                csv_path.display()
            )));
        }

        info!(
            path = %csv_path.display(),
            rows = records.len(),
            dropped,
            "Loaded tag dataset"
        );

        Ok(Self {
            records,
            images_dir: images_dir.to_path_buf(),
        })
    }

    /// Build a dataset directly from records (used by splitting and tests).
    pub fn from_records(records: Vec<TagRecord>, images_dir: &Path) -> Self {
        Self {
            records,
            images_dir: images_dir.to_path_buf(),
        }
    }

    pub fn records(&self) -> &[TagRecord] {
        &self.records
    }

    /// Count of samples per tag type.
    pub fn class_distribution(&self) -> HashMap<TagType, usize> {
        let mut counts = HashMap::new();
        for record in &self.records {
            *counts.entry(record.tag).or_insert(0) += 1;
        }
        counts
    }

    /// Stratified shuffled split by tag type.
    ///
    /// Each class is shuffled and divided with the same ratios, so class
    /// balance is preserved across splits. Deterministic for a given seed.
    pub fn stratified_split(
        self,
        train_ratio: f64,
        val_ratio: f64,
        seed: u64,
    ) -> (TagDataset, TagDataset, TagDataset) {
        let mut rng = StdRng::seed_from_u64(seed);
        let images_dir = self.images_dir.clone();

        let mut by_class: HashMap<TagType, Vec<TagRecord>> = HashMap::new();
        for record in self.records {
            by_class.entry(record.tag).or_default().push(record);
        }

        let mut train = Vec::new();
        let mut val = Vec::new();
        let mut test = Vec::new();

        // Iterate classes in fixed order so the split does not depend on
        // HashMap iteration order.
        for tag in TagType::ALL {
            let Some(mut group) = by_class.remove(&tag) else {
                continue;
            };
            group.shuffle(&mut rng);

            let n = group.len();
            let n_train = (n as f64 * train_ratio).round() as usize;
            let n_val = (n as f64 * val_ratio).round() as usize;
            let n_train = n_train.min(n);
            let n_val = n_val.min(n - n_train);

            let mut iter = group.into_iter();
            train.extend(iter.by_ref().take(n_train));
            val.extend(iter.by_ref().take(n_val));
            test.extend(iter);
        }

        let mut shuffle_into = |mut records: Vec<TagRecord>| {
            records.shuffle(&mut rng);
            TagDataset::from_records(records, &images_dir)
        };

        (
            shuffle_into(train),
            shuffle_into(val),
            shuffle_into(test),
        )
    }

    /// Write this split back to a CSV file.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AtlasError::io("creating split csv dir", e))?;
        }
        let mut writer =
            csv::Writer::from_path(path).map_err(|e| AtlasError::csv(path, e))?;
        for record in &self.records {
            writer
                .serialize(record)
                .map_err(|e| AtlasError::csv(path, e))?;
        }
        writer
            .flush()
            .map_err(|e| AtlasError::io("flushing split csv", e))?;
        Ok(())
    }
}

impl Dataset<TagItem> for TagDataset {
    fn get(&self, index: usize) -> Option<TagItem> {
        let record = self.records.get(index)?;
        Some(TagItem {
            image_path: self.images_dir.join(&record.image_path),
            label: record.tag.index(),
            record: record.clone(),
        })
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Path of the split CSV derived from the main CSV, e.g.
/// `data/tags.csv` -> `data/tags_train.csv`.
pub fn split_csv_path(tags_csv: &Path, split: Split) -> PathBuf {
    let stem = tags_csv
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tags".to_string());
    let file = format!("{stem}_{}.csv", split.as_str());
    tags_csv.with_file_name(file)
}

/// Load the three split datasets, creating the split CSVs if absent.
///
/// Splitting is seeded, so a rerun from the same main CSV reproduces the
/// same partition even if the split files were deleted.
pub fn load_splits(config: &Config) -> Result<(TagDataset, TagDataset, TagDataset)> {
    let tags_csv = &config.data.tags_csv;
    let images_dir = &config.data.images_dir;

    let paths = [
        split_csv_path(tags_csv, Split::Train),
        split_csv_path(tags_csv, Split::Val),
        split_csv_path(tags_csv, Split::Test),
    ];

    if paths.iter().all(|p| p.exists()) {
        let mut datasets = paths.iter().map(|path| {
            TagDataset::from_csv(path, images_dir, &config.tag_types, &config.source_types)
        });
        return Ok((
            datasets.next().unwrap()?,
            datasets.next().unwrap()?,
            datasets.next().unwrap()?,
        ));
    }

    let full = TagDataset::from_csv(tags_csv, images_dir, &config.tag_types, &config.source_types)?;
    let (train, val, test) =
        full.stratified_split(config.data.train_split, config.data.val_split, config.seed);

    train.write_csv(&paths[0])?;
    val.write_csv(&paths[1])?;
    test.write_csv(&paths[2])?;

    info!(
        train = train.records().len(),
        val = val.records().len(),
        test = test.records().len(),
        "Created dataset splits"
    );

    Ok((train, val, test))
}

/// Load a single split dataset.
pub fn load_split(config: &Config, split: Split) -> Result<TagDataset> {
    let (train, val, test) = load_splits(config)?;
    Ok(match split {
        Split::Train => train,
        Split::Val => val,
        Split::Test => test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &Path, rows: &[(&str, f64, f64, &str, &str)]) -> PathBuf {
        let path = dir.join("tags.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "image_path,lat,lon,type,source").unwrap();
        for (img, lat, lon, tag, source) in rows {
            writeln!(f, "{img},{lat},{lon},{tag},{source}").unwrap();
        }
        path
    }

    fn synthetic_rows(per_class: usize) -> Vec<(String, f64, f64, &'static str, &'static str)> {
        let mut rows = Vec::new();
        for tag in TagType::ALL {
            for i in 0..per_class {
                rows.push((
                    format!("{}_{i}.jpg", tag.as_str()),
                    34.67,
                    -82.48,
                    tag.as_str(),
                    "user",
                ));
            }
        }
        rows
    }

    #[test]
    fn test_from_csv_filters_unknown_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            dir.path(),
            &[
                ("a.jpg", 34.0, -82.0, "ramp", "user"),
                ("b.jpg", 34.0, -82.0, "escalator", "user"),
                ("c.jpg", 34.0, -82.0, "elevator", "satellite"),
                ("d.jpg", 34.0, -82.0, "obstacle", "osm"),
            ],
        );

        let dataset =
            TagDataset::from_csv(&path, dir.path(), &TagType::ALL, &Source::ALL).unwrap();
        assert_eq!(dataset.len(), 2);
        let item = dataset.get(0).unwrap();
        assert_eq!(item.record.tag, TagType::Ramp);
        assert_eq!(item.label, 0);
        assert!(item.image_path.ends_with("a.jpg"));
    }

    #[test]
    fn test_empty_after_filtering_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(dir.path(), &[("a.jpg", 0.0, 0.0, "escalator", "user")]);
        let result = TagDataset::from_csv(&path, dir.path(), &TagType::ALL, &Source::ALL);
        assert!(matches!(result, Err(AtlasError::EmptyDataset(_))));
    }

    #[test]
    fn test_stratified_split_preserves_balance() {
        let dir = TempDir::new().unwrap();
        let rows = synthetic_rows(20);
        let refs: Vec<_> = rows
            .iter()
            .map(|(img, lat, lon, tag, src)| (img.as_str(), *lat, *lon, *tag, *src))
            .collect();
        let path = write_csv(dir.path(), &refs);

        let full = TagDataset::from_csv(&path, dir.path(), &TagType::ALL, &Source::ALL).unwrap();
        let total = full.len();
        let (train, val, test) = full.stratified_split(0.7, 0.15, 42);

        assert_eq!(train.len() + val.len() + test.len(), total);
        // 20 per class at 0.7/0.15/0.15 -> 14/3/3 per class
        for (_, count) in train.class_distribution() {
            assert_eq!(count, 14);
        }
        for (_, count) in val.class_distribution() {
            assert_eq!(count, 3);
        }
        for (_, count) in test.class_distribution() {
            assert_eq!(count, 3);
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let rows = synthetic_rows(10);
        let refs: Vec<_> = rows
            .iter()
            .map(|(img, lat, lon, tag, src)| (img.as_str(), *lat, *lon, *tag, *src))
            .collect();
        let path = write_csv(dir.path(), &refs);

        let load = || TagDataset::from_csv(&path, dir.path(), &TagType::ALL, &Source::ALL).unwrap();
        let (a, _, _) = load().stratified_split(0.7, 0.15, 7);
        let (b, _, _) = load().stratified_split(0.7, 0.15, 7);

        let paths_a: Vec<_> = a.records().iter().map(|r| r.image_path.clone()).collect();
        let paths_b: Vec<_> = b.records().iter().map(|r| r.image_path.clone()).collect();
        assert_eq!(paths_a, paths_b);
    }

    #[test]
    fn test_split_csv_path() {
        let path = split_csv_path(Path::new("data/tags.csv"), Split::Val);
        assert_eq!(path, Path::new("data/tags_val.csv"));
    }

    #[test]
    fn test_write_and_reload_split() {
        let dir = TempDir::new().unwrap();
        let records = vec![TagRecord {
            image_path: "x.jpg".to_string(),
            lat: 1.0,
            lon: 2.0,
            tag: TagType::Entrance,
            source: Source::Model,
        }];
        let dataset = TagDataset::from_records(records, dir.path());
        let out = dir.path().join("tags_val.csv");
        dataset.write_csv(&out).unwrap();

        let reloaded = TagDataset::from_csv(&out, dir.path(), &TagType::ALL, &Source::ALL).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].tag, TagType::Entrance);
    }
}
