//! Core record types: tag vocabulary, provenance sources, CSV rows, and
//! prediction results.
//!
//! The CSV schema is `image_path,lat,lon,type,source` where `type` is one
//! of the five accessibility tag types and `source` records where the data
//! point came from.

use crate::models::{AtlasError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accessibility tag type the model predicts.
///
/// Class indices are stable and match the order of [`TagType::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    Ramp,
    Elevator,
    TactilePath,
    Entrance,
    Obstacle,
}

impl TagType {
    /// All tag types in class-index order.
    pub const ALL: [TagType; 5] = [
        TagType::Ramp,
        TagType::Elevator,
        TagType::TactilePath,
        TagType::Entrance,
        TagType::Obstacle,
    ];

    /// CSV/display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TagType::Ramp => "ramp",
            TagType::Elevator => "elevator",
            TagType::TactilePath => "tactile_path",
            TagType::Entrance => "entrance",
            TagType::Obstacle => "obstacle",
        }
    }

    /// Class index used for model targets.
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|t| t == self)
            .unwrap_or_default()
    }

    /// Inverse of [`TagType::index`].
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| AtlasError::Internal(format!("class index {index} out of range")))
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagType {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| AtlasError::UnknownTagType(s.to_string()))
    }
}

/// Provenance of a data point: user-submitted, OpenStreetMap-derived, or
/// produced by a previous model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    User,
    Osm,
    Model,
}

impl Source {
    /// All sources in one-hot index order.
    pub const ALL: [Source; 3] = [Source::User, Source::Osm, Source::Model];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::User => "user",
            Source::Osm => "osm",
            Source::Model => "model",
        }
    }

    /// Index into the one-hot source encoding.
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|src| src.as_str() == s)
            .copied()
            .ok_or_else(|| AtlasError::UnknownSource(s.to_string()))
    }
}

/// One row of a tags CSV file.
///
/// `image_path` is relative to the configured images directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub image_path: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "type")]
    pub tag: TagType,
    pub source: Source,
}

/// Prediction for a single image.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// Predicted tag type
    pub predicted: TagType,
    /// Softmax confidence for the predicted class (0.0 - 1.0)
    pub confidence: f64,
    /// Image the prediction was made for
    pub image_path: String,
    /// Latitude supplied with the image
    pub lat: f64,
    /// Longitude supplied with the image
    pub lon: f64,
    /// Provenance supplied with the image
    pub source: Source,
    /// Full class distribution, sorted by probability descending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<(TagType, f64)>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_type_roundtrip() {
        for tag in TagType::ALL {
            let parsed: TagType = tag.as_str().parse().unwrap();
            assert_eq!(parsed, tag);
            assert_eq!(TagType::from_index(tag.index()).unwrap(), tag);
        }
        assert!("sidewalk".parse::<TagType>().is_err());
        assert!(TagType::from_index(5).is_err());
    }

    #[test]
    fn test_class_index_order_is_stable() {
        assert_eq!(TagType::Ramp.index(), 0);
        assert_eq!(TagType::Elevator.index(), 1);
        assert_eq!(TagType::TactilePath.index(), 2);
        assert_eq!(TagType::Entrance.index(), 3);
        assert_eq!(TagType::Obstacle.index(), 4);
    }

    #[test]
    fn test_source_roundtrip() {
        for src in Source::ALL {
            let parsed: Source = src.as_str().parse().unwrap();
            assert_eq!(parsed, src);
        }
        assert!("satellite".parse::<Source>().is_err());
    }

    #[test]
    fn test_record_csv_roundtrip() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .serialize(TagRecord {
                image_path: "img_0001.jpg".to_string(),
                lat: 34.67,
                lon: -82.48,
                tag: TagType::TactilePath,
                source: Source::Osm,
            })
            .unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("image_path,lat,lon,type,source"));
        assert!(text.contains("tactile_path"));

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let record: TagRecord = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(record.tag, TagType::TactilePath);
        assert_eq!(record.source, Source::Osm);
    }
}
