//! accessatlas CLI - Accessibility tag classification for street-level photos.

use accessatlas::data::{self, Split};
use accessatlas::pipeline::{self, Predictor};
use accessatlas::{AtlasAutodiffBackend, AtlasBackend, Config, Source};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "accessatlas")]
#[command(version)]
#[command(about = "Classify street-level photos into accessibility tag types")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic labeled dataset
    Generate {
        /// Number of samples to generate
        #[arg(short, long, default_value = "500")]
        num_samples: usize,

        /// Override the tags CSV path from the config
        #[arg(long)]
        output_csv: Option<PathBuf>,

        /// Override the images directory from the config
        #[arg(long)]
        images_dir: Option<PathBuf>,
    },

    /// Train the classifier on the configured dataset
    Train,

    /// Evaluate a checkpoint on a held-out split
    Evaluate {
        /// Checkpoint to evaluate (defaults to <checkpoint_dir>/best)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Split to evaluate on: train, val or test
        #[arg(short, long, default_value = "test")]
        split: Split,
    },

    /// Classify a single image
    Predict {
        /// Path to the image
        image: PathBuf,

        /// Latitude of the photo location
        #[arg(long)]
        lat: f64,

        /// Longitude of the photo location
        #[arg(long)]
        lon: f64,

        /// Provenance of the record: user, osm or model
        #[arg(long, default_value = "user")]
        source: Source,

        /// Checkpoint to use (defaults to <checkpoint_dir>/best)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Show the full class probability distribution
        #[arg(long)]
        probs: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_example_config() {
    let example = r#"# accessatlas configuration file

seed: 42
num_workers: 2

data:
  tags_csv: data/tags.csv
  images_dir: data/images
  train_split: 0.7
  val_split: 0.15
  test_split: 0.15

model:
  image_size: 224
  cnn_channels: [32, 64, 128]
  cnn_dropout: 0.3
  metadata_hidden: 64
  fusion_hidden: 256
  num_classes: 5

training:
  batch_size: 32
  num_epochs: 30
  learning_rate: 0.001
  weight_decay: 0.0001
  optimizer: adam          # adam | sgd
  scheduler: step          # step | cosine | none
  step_lr_step_size: 10
  step_lr_gamma: 0.1
  grad_clip: 1.0
  early_stopping_patience: 5

augmentation:
  enabled: true
  random_rotation: 10.0
  random_horizontal_flip: 0.5
  color_jitter_brightness: 0.2
  color_jitter_contrast: 0.2
  random_crop_scale: [0.8, 1.0]

evaluation:
  confusion_matrix: true
  save_misclassified: true
  top_k_errors: 20

logging:
  checkpoint_dir: checkpoints
  log_dir: logs
  error_dir: errors
  log_interval: 10
  save_best_only: true    # false also writes numbered per-epoch checkpoints
  save_last: true
"#;
    println!("{example}");
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            info!("Configuration is valid");
            info!("  Dataset:  {}", config.data.tags_csv.display());
            info!("  Images:   {}", config.data.images_dir.display());
            info!(
                "  Splits:   {:.0}/{:.0}/{:.0}",
                config.data.train_split * 100.0,
                config.data.val_split * 100.0,
                config.data.test_split * 100.0
            );
            info!(
                "  Model:    {}px, channels {:?}, {} classes",
                config.model.image_size, config.model.cnn_channels, config.model.num_classes
            );
            info!(
                "  Training: {} epochs, batch {}, lr {}",
                config.training.num_epochs, config.training.batch_size,
                config.training.learning_rate
            );
            return Ok(());
        }

        Commands::Generate {
            num_samples,
            output_csv,
            images_dir,
        } => {
            let config = load_config(&cli.config)?;
            let csv_path = output_csv.unwrap_or_else(|| config.data.tags_csv.clone());
            let images_dir = images_dir.unwrap_or_else(|| config.data.images_dir.clone());

            let summary =
                data::generate_dataset(num_samples, &csv_path, &images_dir, config.seed)?;

            println!("\n=== Dataset Generation Complete ===");
            println!("Samples:     {}", summary.num_samples);
            for (tag, count) in &summary.distribution {
                println!("  {:<13} {count}", tag.as_str());
            }
            println!("CSV:         {}", summary.csv_path.display());
            println!("Images:      {}", summary.images_dir.display());
        }

        Commands::Train => {
            let config = load_config(&cli.config)?;
            let device = Default::default();
            let report = pipeline::train::<AtlasAutodiffBackend>(&config, device)?;

            println!("\n=== Training Complete ===");
            println!("Epochs:      {}", report.epochs_run);
            println!(
                "Best:        {:.2}% (epoch {})",
                report.best_val_accuracy * 100.0,
                report.best_epoch
            );
            if report.stopped_early {
                println!("Stopped:     early");
            }
            if let Some(path) = &report.best_checkpoint {
                println!("Checkpoint:  {}", path.display());
            }
            println!("History:     {}", report.history_path.display());
        }

        Commands::Evaluate { checkpoint, split } => {
            let config = load_config(&cli.config)?;
            let device = Default::default();
            let report = pipeline::evaluate::<AtlasBackend>(
                &config,
                device,
                checkpoint.as_deref(),
                split,
            )?;

            println!("\n=== Evaluation Complete ===");
            println!("Split:       {}", report.split);
            println!("Samples:     {}", report.num_samples);
            println!("Accuracy:    {:.2}%", report.metrics.accuracy);
            println!("Macro F1:    {:.2}%", report.metrics.macro_f1);
            println!("Metrics:     {}", report.metrics_path.display());
            if let Some(path) = &report.error_analysis_path {
                println!("Errors:      {}", path.display());
            }
            if report.copied_images > 0 {
                println!("Copied:      {} misclassified images", report.copied_images);
            }
        }

        Commands::Predict {
            image,
            lat,
            lon,
            source,
            checkpoint,
            probs,
        } => {
            let config = load_config(&cli.config)?;
            let device = Default::default();
            let predictor =
                Predictor::<AtlasBackend>::load(&config, device, checkpoint.as_deref())?;
            let prediction = predictor.predict(&image, lat, lon, source, probs)?;

            println!("\n=== Prediction ===");
            print!("{}", pipeline::render_prediction(&prediction));
        }
    }

    Ok(())
}
