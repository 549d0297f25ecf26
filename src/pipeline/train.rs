//! Training loop.
//!
//! Runs a manual epoch loop over the train and validation splits, steps the
//! optimizer, tracks validation accuracy for early stopping, and writes
//! `best`/`last` checkpoints plus a JSON history file.

use crate::checkpoint::{self, CheckpointMeta};
use crate::data::{load_splits, TagBatch, TagBatcher, TagDataset};
use crate::model::{TagClassifier, TagClassifierConfig};
use crate::models::{
    AtlasError, Config, LoggingConfig, OptimizerKind, Result, SchedulerKind, TrainingConfig,
};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::ElementConversion;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a training run.
#[derive(Debug)]
pub struct TrainReport {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_accuracy: f64,
    pub best_checkpoint: Option<PathBuf>,
    pub last_checkpoint: Option<PathBuf>,
    pub history_path: PathBuf,
    pub stopped_early: bool,
}

#[derive(Debug, Serialize)]
struct EpochStats {
    epoch: usize,
    loss: f64,
    accuracy: f64,
}

#[derive(Debug, Default, Serialize)]
struct TrainingLog {
    train: Vec<EpochStats>,
    val: Vec<EpochStats>,
    best_epoch: usize,
    best_val_accuracy: f64,
    final_epoch: usize,
}

/// Learning rate for a 0-based `epoch` under the configured schedule.
fn lr_at(training: &TrainingConfig, epoch: usize) -> f64 {
    let base = training.learning_rate;
    match training.scheduler {
        SchedulerKind::Step => {
            let steps = epoch / training.step_lr_step_size.max(1);
            base * training.step_lr_gamma.powi(steps as i32)
        }
        SchedulerKind::Cosine => {
            let t = epoch as f64 / training.num_epochs.max(1) as f64;
            base * 0.5 * (1.0 + (std::f64::consts::PI * t).cos())
        }
        SchedulerKind::None => base,
    }
}

/// Checkpoint stems to write after an epoch: `best` on a validation
/// improvement, `last` whenever `save_last` is set, and a numbered
/// per-epoch checkpoint unless `save_best_only` suppresses it.
fn epoch_checkpoint_stems(logging: &LoggingConfig, epoch: usize, improved: bool) -> Vec<PathBuf> {
    let mut stems = Vec::new();
    if improved {
        stems.push(logging.checkpoint_dir.join("best"));
    }
    if logging.save_last {
        stems.push(logging.checkpoint_dir.join("last"));
    }
    if !logging.save_best_only {
        stems.push(logging.checkpoint_dir.join(format!("epoch_{epoch:03}")));
    }
    stems
}

/// Stops training once validation accuracy has gone `patience` epochs
/// without improving. `patience == 0` disables it.
struct EarlyStopping {
    patience: usize,
    best: f64,
    since_improvement: usize,
}

impl EarlyStopping {
    fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::NEG_INFINITY,
            since_improvement: 0,
        }
    }

    /// Returns true when `value` is a new best.
    fn update(&mut self, value: f64) -> bool {
        if value > self.best {
            self.best = value;
            self.since_improvement = 0;
            true
        } else {
            self.since_improvement += 1;
            false
        }
    }

    fn best(&self) -> f64 {
        self.best
    }

    fn should_stop(&self) -> bool {
        self.patience > 0 && self.since_improvement >= self.patience
    }
}

/// Trains a classifier from scratch per `config`.
pub fn train<B: AutodiffBackend>(config: &Config, device: B::Device) -> Result<TrainReport> {
    config.validate()?;
    B::seed(&device, config.seed);

    let (train_ds, val_ds, _) = load_splits(config)?;
    info!(
        train = train_ds.records().len(),
        val = val_ds.records().len(),
        "Datasets ready"
    );

    let training = &config.training;
    let clipping =
        (training.grad_clip > 0.0).then(|| GradientClippingConfig::Norm(training.grad_clip as f32));

    match training.optimizer {
        OptimizerKind::Adam => {
            let optim = AdamConfig::new()
                .with_weight_decay(Some(WeightDecayConfig::new(training.weight_decay as f32)))
                .with_grad_clipping(clipping)
                .init();
            fit::<B, _>(config, device, train_ds, val_ds, optim)
        }
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new()
                .with_weight_decay(Some(WeightDecayConfig::new(training.weight_decay as f32)))
                .with_momentum(Some(MomentumConfig::new().with_momentum(0.9)))
                .with_gradient_clipping(clipping)
                .init();
            fit::<B, _>(config, device, train_ds, val_ds, optim)
        }
    }
}

fn fit<B, O>(
    config: &Config,
    device: B::Device,
    train_ds: TagDataset,
    val_ds: TagDataset,
    mut optim: O,
) -> Result<TrainReport>
where
    B: AutodiffBackend,
    O: Optimizer<TagClassifier<B>, B>,
{
    let training = &config.training;
    let num_sources = config.source_types.len();
    let num_train = train_ds.records().len();
    let num_batches = num_train.div_ceil(training.batch_size);

    let augmentation = config
        .augmentation
        .enabled
        .then(|| config.augmentation.clone());
    let train_batcher = TagBatcher::<B>::new(
        device.clone(),
        config.model.image_size,
        num_sources,
        augmentation,
    );
    let val_batcher = TagBatcher::<B::InnerBackend>::new(
        device.clone(),
        config.model.image_size,
        num_sources,
        None,
    );

    let train_loader = DataLoaderBuilder::new(train_batcher)
        .batch_size(training.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_ds);
    let val_loader = DataLoaderBuilder::new(val_batcher)
        .batch_size(training.batch_size)
        .num_workers(config.num_workers)
        .build(val_ds);

    let mut model = TagClassifierConfig::from_model_config(&config.model, num_sources)
        .init::<B>(&device);

    let mut early = EarlyStopping::new(training.early_stopping_patience);
    let mut history = TrainingLog::default();
    let mut best_checkpoint = None;
    let mut last_checkpoint = None;
    let mut best_epoch = 0;
    let mut stopped_early = false;
    let mut final_epoch = 0;

    for epoch in 1..=training.num_epochs {
        let lr = lr_at(training, epoch - 1);
        let bar = ProgressBar::new(num_batches as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(format!("epoch {epoch}/{}", training.num_epochs));

        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        let mut seen = 0usize;
        let mut batches = 0usize;

        for (iteration, batch) in train_loader.iter().enumerate() {
            let batch_size = batch.targets.dims()[0];
            let output = model.forward_classification(batch);
            let loss: f64 = output.loss.clone().into_scalar().elem();

            let predictions = output.output.clone().argmax(1).reshape([batch_size]);
            let hits: i64 = predictions
                .equal(output.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();

            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(lr, model, grads);

            loss_sum += loss;
            correct += hits as usize;
            seen += batch_size;
            batches += 1;

            if (iteration + 1) % config.logging.log_interval.max(1) == 0 {
                debug!(
                    epoch,
                    iteration = iteration + 1,
                    loss,
                    "Training step"
                );
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        let train_loss = loss_sum / batches.max(1) as f64;
        let train_accuracy = correct as f64 / seen.max(1) as f64;

        let (val_loss, val_accuracy) = validate_epoch(&model.valid(), &val_loader)?;

        info!(
            epoch,
            lr,
            train_loss = format!("{train_loss:.4}"),
            train_accuracy = format!("{:.2}%", train_accuracy * 100.0),
            val_loss = format!("{val_loss:.4}"),
            val_accuracy = format!("{:.2}%", val_accuracy * 100.0),
            "Epoch complete"
        );

        history.train.push(EpochStats {
            epoch,
            loss: train_loss,
            accuracy: train_accuracy,
        });
        history.val.push(EpochStats {
            epoch,
            loss: val_loss,
            accuracy: val_accuracy,
        });
        final_epoch = epoch;

        let improved = early.update(val_accuracy);
        if improved {
            best_epoch = epoch;
            info!(
                epoch,
                val_accuracy = format!("{:.2}%", val_accuracy * 100.0),
                "New best model"
            );
        }

        let meta = CheckpointMeta::from_config(config, epoch, early.best());
        for stem in epoch_checkpoint_stems(&config.logging, epoch, improved) {
            checkpoint::save(&model.valid(), &meta, &stem)?;
            match stem.file_name().and_then(|n| n.to_str()) {
                Some("best") => best_checkpoint = Some(stem.with_extension("mpk")),
                Some("last") => last_checkpoint = Some(stem.with_extension("mpk")),
                _ => {}
            }
        }

        if early.should_stop() {
            info!(
                epoch,
                patience = training.early_stopping_patience,
                "Early stopping, validation accuracy has stopped improving"
            );
            stopped_early = true;
            break;
        }
    }

    history.best_epoch = best_epoch;
    history.best_val_accuracy = early.best().max(0.0);
    history.final_epoch = final_epoch;
    let history_path = write_history(config, &history)?;

    Ok(TrainReport {
        epochs_run: final_epoch,
        best_epoch,
        best_val_accuracy: history.best_val_accuracy,
        best_checkpoint,
        last_checkpoint,
        history_path,
        stopped_early,
    })
}

fn validate_epoch<B: Backend>(
    model: &TagClassifier<B>,
    loader: &Arc<dyn DataLoader<B, TagBatch<B>>>,
) -> Result<(f64, f64)> {
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let mut seen = 0usize;
    let mut batches = 0usize;

    for batch in loader.iter() {
        let batch_size = batch.targets.dims()[0];
        let output = model.forward_classification(batch);
        let loss: f64 = output.loss.into_scalar().elem();
        let predictions = output.output.argmax(1).reshape([batch_size]);
        let hits: i64 = predictions
            .equal(output.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();

        loss_sum += loss;
        correct += hits as usize;
        seen += batch_size;
        batches += 1;
    }

    Ok((
        loss_sum / batches.max(1) as f64,
        correct as f64 / seen.max(1) as f64,
    ))
}

fn write_history(config: &Config, history: &TrainingLog) -> Result<PathBuf> {
    let dir = &config.logging.log_dir;
    fs::create_dir_all(dir)
        .map_err(|e| AtlasError::io(format!("creating {}", dir.display()), e))?;
    let path = dir.join(format!(
        "training_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, serde_json::to_string_pretty(history)?)
        .map_err(|e| AtlasError::io(format!("writing {}", path.display()), e))?;
    info!(path = %path.display(), "Wrote training history");
    Ok(path)
}
