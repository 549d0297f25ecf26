//! Evaluation: metrics over a held-out split plus error analysis artifacts.

use crate::checkpoint;
use crate::data::{load_split, Split, TagBatcher};
use crate::models::{AtlasError, Config, EvalMetrics, Result, Source, TagType};
use burn::data::dataloader::DataLoaderBuilder;
use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One misclassified sample, kept for the error analysis report.
#[derive(Debug, Clone, Serialize)]
pub struct Misclassification {
    pub image_path: String,
    pub true_tag: TagType,
    pub predicted_tag: TagType,
    pub confidence: f64,
    pub lat: f64,
    pub lon: f64,
    pub source: Source,
}

#[derive(Debug, Serialize)]
struct ErrorAnalysis {
    split: String,
    num_errors: usize,
    /// "true -> predicted" confusion pattern counts, most common first.
    patterns: Vec<(String, usize)>,
    /// Highest-confidence errors, worst first.
    top_errors: Vec<Misclassification>,
}

/// Outcome of an evaluation run.
#[derive(Debug)]
pub struct EvalReport {
    pub split: Split,
    pub num_samples: usize,
    pub metrics: EvalMetrics,
    pub metrics_path: PathBuf,
    pub error_analysis_path: Option<PathBuf>,
    pub copied_images: usize,
}

/// Evaluates a checkpoint on the given split.
///
/// `checkpoint_path` defaults to `<checkpoint_dir>/best` when absent.
pub fn evaluate<B: Backend>(
    config: &Config,
    device: B::Device,
    checkpoint_path: Option<&Path>,
    split: Split,
) -> Result<EvalReport> {
    config.validate()?;

    let default_stem = config.logging.checkpoint_dir.join("best");
    let stem = checkpoint_path.unwrap_or(&default_stem);
    let (model, meta) = checkpoint::load::<B>(stem, &device)?;
    meta.validate_against(config)?;

    let dataset = load_split(config, split)?;
    let num_samples = dataset.records().len();
    info!(split = split.as_str(), samples = num_samples, "Evaluating");

    let batcher = TagBatcher::<B>::new(
        device,
        meta.image_size,
        config.source_types.len(),
        None,
    );
    let loader = DataLoaderBuilder::new(batcher)
        .batch_size(config.training.batch_size)
        .num_workers(config.num_workers)
        .build(dataset);

    // (true, predicted) pairs plus the predicted-class confidence. The
    // multi-worker loader yields batches out of dataset order, so the CSV
    // rows are taken from the batch itself rather than zipped by position.
    let mut pairs = Vec::with_capacity(num_samples);
    let mut confidences = Vec::with_capacity(num_samples);
    let mut records = Vec::with_capacity(num_samples);

    for batch in loader.iter() {
        let targets = batch.targets.clone();
        records.extend(batch.records);
        let probabilities = model.predict_probabilities(batch.images, batch.coords, batch.sources);
        let [batch_size, _] = probabilities.dims();
        let predictions = model.predict_classes(probabilities.clone());

        let max_probs = probabilities
            .max_dim(1)
            .reshape([batch_size])
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| AtlasError::Internal(format!("tensor extraction: {e:?}")))?;
        let predicted = predictions
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| AtlasError::Internal(format!("tensor extraction: {e:?}")))?;
        let truth = targets
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| AtlasError::Internal(format!("tensor extraction: {e:?}")))?;

        for i in 0..batch_size {
            pairs.push((truth[i] as usize, predicted[i] as usize));
            confidences.push(max_probs[i] as f64);
        }
    }

    let metrics = EvalMetrics::compute(&pairs, &config.tag_types);

    println!("{}", metrics.render_table());
    if config.evaluation.confusion_matrix {
        println!("{}", metrics.render_confusion_matrix(&config.tag_types));
    }

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let metrics_path = write_metrics(config, split, &metrics, &timestamp.to_string())?;

    let errors = collect_errors(config, &pairs, &confidences, &records);
    let error_analysis_path = if errors.is_empty() {
        info!("No misclassifications on this split");
        None
    } else {
        Some(write_error_analysis(
            config,
            split,
            &errors,
            &timestamp.to_string(),
        )?)
    };

    let copied_images = if config.evaluation.save_misclassified && !errors.is_empty() {
        copy_misclassified(config, split, &errors)?
    } else {
        0
    };

    Ok(EvalReport {
        split,
        num_samples,
        metrics,
        metrics_path,
        error_analysis_path,
        copied_images,
    })
}

fn collect_errors(
    config: &Config,
    pairs: &[(usize, usize)],
    confidences: &[f64],
    records: &[crate::models::TagRecord],
) -> Vec<Misclassification> {
    let mut errors: Vec<Misclassification> = pairs
        .iter()
        .zip(confidences)
        .zip(records)
        .filter(|(((truth, predicted), _), _)| truth != predicted)
        .filter_map(|(((_, predicted), confidence), record)| {
            let predicted_tag = *config.tag_types.get(*predicted)?;
            Some(Misclassification {
                image_path: record.image_path.clone(),
                true_tag: record.tag,
                predicted_tag,
                confidence: *confidence,
                lat: record.lat,
                lon: record.lon,
                source: record.source,
            })
        })
        .collect();

    // Confident mistakes are the interesting ones.
    errors.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    errors
}

fn write_metrics(
    config: &Config,
    split: Split,
    metrics: &EvalMetrics,
    timestamp: &str,
) -> Result<PathBuf> {
    let dir = &config.logging.error_dir;
    fs::create_dir_all(dir)
        .map_err(|e| AtlasError::io(format!("creating {}", dir.display()), e))?;
    let path = dir.join(format!("metrics_{}_{timestamp}.json", split.as_str()));
    fs::write(&path, serde_json::to_string_pretty(metrics)?)
        .map_err(|e| AtlasError::io(format!("writing {}", path.display()), e))?;
    info!(path = %path.display(), "Wrote evaluation metrics");
    Ok(path)
}

fn write_error_analysis(
    config: &Config,
    split: Split,
    errors: &[Misclassification],
    timestamp: &str,
) -> Result<PathBuf> {
    let mut pattern_counts: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();
    for error in errors {
        let key = format!("{} -> {}", error.true_tag, error.predicted_tag);
        *pattern_counts.entry(key).or_default() += 1;
    }
    let mut patterns: Vec<(String, usize)> = pattern_counts.into_iter().collect();
    patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let analysis = ErrorAnalysis {
        split: split.as_str().to_string(),
        num_errors: errors.len(),
        patterns,
        top_errors: errors
            .iter()
            .take(config.evaluation.top_k_errors)
            .cloned()
            .collect(),
    };

    let dir = &config.logging.error_dir;
    fs::create_dir_all(dir)
        .map_err(|e| AtlasError::io(format!("creating {}", dir.display()), e))?;
    let path = dir.join(format!("error_analysis_{}_{timestamp}.json", split.as_str()));
    fs::write(&path, serde_json::to_string_pretty(&analysis)?)
        .map_err(|e| AtlasError::io(format!("writing {}", path.display()), e))?;
    info!(path = %path.display(), errors = errors.len(), "Wrote error analysis");
    Ok(path)
}

/// Copies the top-k misclassified images into the error directory with
/// self-describing names so they can be eyeballed without the report.
fn copy_misclassified(config: &Config, split: Split, errors: &[Misclassification]) -> Result<usize> {
    let dir = config
        .logging
        .error_dir
        .join(format!("images_{}", split.as_str()));
    fs::create_dir_all(&dir)
        .map_err(|e| AtlasError::io(format!("creating {}", dir.display()), e))?;

    let mut copied = 0;
    for (i, error) in errors.iter().take(config.evaluation.top_k_errors).enumerate() {
        let source = config.data.images_dir.join(&error.image_path);
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg");
        let target = dir.join(format!(
            "{i:03}_true_{}_pred_{}_conf_{:.2}.{extension}",
            error.true_tag, error.predicted_tag, error.confidence
        ));
        match fs::copy(&source, &target) {
            Ok(_) => copied += 1,
            Err(e) => warn!(path = %source.display(), error = %e, "Could not copy image"),
        }
    }
    info!(copied, dir = %dir.display(), "Copied misclassified images");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagRecord;

    fn record(tag: TagType) -> TagRecord {
        TagRecord {
            image_path: format!("{tag}.jpg"),
            lat: 34.67,
            lon: -82.48,
            tag,
            source: Source::User,
        }
    }

    #[test]
    fn test_errors_sorted_by_confidence() {
        let config = Config::default();
        let pairs = vec![(0, 0), (0, 1), (1, 0), (2, 2)];
        let confidences = vec![0.9, 0.6, 0.95, 0.8];
        let records = vec![
            record(TagType::Ramp),
            record(TagType::Ramp),
            record(TagType::Elevator),
            record(TagType::TactilePath),
        ];

        let errors = collect_errors(&config, &pairs, &confidences, &records);
        assert_eq!(errors.len(), 2);
        assert!((errors[0].confidence - 0.95).abs() < 1e-12);
        assert_eq!(errors[0].true_tag, TagType::Elevator);
        assert_eq!(errors[0].predicted_tag, TagType::Ramp);
        assert_eq!(errors[1].predicted_tag, TagType::Elevator);
    }

    // Runs the full evaluation with a multi-worker loader and checks every
    // reported error against the CSV ground truth for its image path. Yield
    // order is not dataset order with two workers, so any positional join
    // would mislabel rows here.
    #[test]
    fn test_evaluate_joins_errors_to_their_rows() {
        use crate::checkpoint::{self, CheckpointMeta};
        use burn::backend::NdArray;
        use tempfile::TempDir;

        type B = NdArray<f32>;

        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.num_workers = 2;
        config.training.batch_size = 4;
        config.model.image_size = 16;
        config.model.cnn_channels = [4, 8, 8];
        config.data.tags_csv = dir.path().join("tags.csv");
        config.data.images_dir = dir.path().join("images");
        config.logging.checkpoint_dir = dir.path().join("ckpt");
        config.logging.log_dir = dir.path().join("logs");
        config.logging.error_dir = dir.path().join("errors");
        config.evaluation.top_k_errors = 100;

        crate::data::generate_dataset(40, &config.data.tags_csv, &config.data.images_dir, 5)
            .unwrap();

        let device = Default::default();
        let meta = CheckpointMeta::from_config(&config, 1, 0.0);
        let model = meta.classifier_config().init::<B>(&device);
        checkpoint::save(&model, &meta, &config.logging.checkpoint_dir.join("best")).unwrap();

        let report = evaluate::<B>(&config, device, None, Split::Test).unwrap();
        assert!(report.num_samples > 0);
        assert!(report.metrics_path.starts_with(&config.logging.error_dir));

        let mut truth = std::collections::HashMap::new();
        let mut reader = csv::Reader::from_path(&config.data.tags_csv).unwrap();
        for row in reader.deserialize::<TagRecord>() {
            let record = row.unwrap();
            truth.insert(record.image_path.clone(), record.tag);
        }

        if let Some(path) = &report.error_analysis_path {
            let raw = std::fs::read_to_string(path).unwrap();
            let analysis: serde_json::Value = serde_json::from_str(&raw).unwrap();
            for error in analysis["top_errors"].as_array().unwrap() {
                let image = error["image_path"].as_str().unwrap();
                let true_tag = error["true_tag"].as_str().unwrap();
                assert_eq!(truth[image].as_str(), true_tag);
            }
        }
    }

    #[test]
    fn test_no_errors_for_perfect_predictions() {
        let config = Config::default();
        let pairs = vec![(0, 0), (1, 1)];
        let confidences = vec![0.9, 0.8];
        let records = vec![record(TagType::Ramp), record(TagType::Elevator)];
        assert!(collect_errors(&config, &pairs, &confidences, &records).is_empty());
    }
}
