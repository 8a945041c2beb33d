/// Command-line arguments for the training binary
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::data::voxel_dataset::DEFAULT_SEED;
use crate::logging::LOG_FILE;
use crate::training::checkpoint::LAST_CHECKPOINT;
use crate::training::TrainingConfig;
use crate::{ModelConfig, VolAEError};

/// Train a 3D volumetric autoencoder on 30x30x30 voxel grids
#[derive(Parser, Debug, Clone)]
#[command(name = "vol-autoencoder", version, about)]
pub struct Args {
    /// Path to the training dataset (.mat or .npz file, .npy file or directory of .npy files)
    #[arg(long = "train_data_dir", default_value = "./data/train_data.mat")]
    pub train_data_dir: PathBuf,

    /// Name of the array holding the voxel grids
    #[arg(long = "label_key", default_value = "labels")]
    pub label_key: String,

    /// Directory for checkpoints and the training log
    #[arg(long = "model_dir", default_value = "./logs/")]
    pub model_dir: PathBuf,

    /// Optional, checkpoint in --model_dir to reload before training (e.g. `last` or `last.safetensors`)
    #[arg(long = "restore_file")]
    pub restore_file: Option<String>,

    /// Total number of epochs
    #[arg(long, default_value_t = 500, allow_negative_numbers = true)]
    pub epochs: i64,

    #[arg(long = "batch_size", default_value_t = 1, allow_negative_numbers = true)]
    pub batch_size: i64,

    #[arg(long = "learning_rate", default_value_t = 0.1, allow_negative_numbers = true)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.9, allow_negative_numbers = true)]
    pub momentum: f64,

    /// Hidden layer width of the autoencoder
    #[arg(long = "hidden_size", default_value_t = 512)]
    pub hidden_size: usize,

    /// Latent code width of the autoencoder
    #[arg(long = "latent_size", default_value_t = 64)]
    pub latent_size: usize,

    /// Shuffle samples every epoch
    #[arg(long)]
    pub shuffle: bool,

    /// Seed for shuffling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Train on CPU even if CUDA is available
    #[arg(long)]
    pub cpu: bool,

    /// Disable the progress bar
    #[arg(long = "no_progress")]
    pub no_progress: bool,
}

/// Validated settings for one training run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub training: TrainingConfig,
    pub model: ModelConfig,
    pub train_data: PathBuf,
    pub label_key: String,
    pub restore_file: Option<String>,
    pub shuffle: bool,
    pub seed: u64,
    pub force_cpu: bool,
}

impl RunConfig {
    /// Location of the training log
    pub fn log_file(&self) -> PathBuf {
        self.training.model_dir.join(LOG_FILE)
    }
}

impl Args {
    /// Validate and convert into a [`RunConfig`]
    pub fn into_run_config(self) -> crate::Result<RunConfig> {
        if self.epochs < 1 {
            return Err(VolAEError::Config(format!(
                "--epochs must be >= 1, got {}",
                self.epochs
            )));
        }
        if self.batch_size < 1 {
            return Err(VolAEError::Config(format!(
                "--batch_size must be >= 1, got {}",
                self.batch_size
            )));
        }
        if self.label_key.is_empty() {
            return Err(VolAEError::Config("--label_key must not be empty".to_string()));
        }
        if matches!(self.restore_file.as_deref(), Some("")) {
            return Err(VolAEError::Config(
                "--restore_file must not be empty".to_string(),
            ));
        }

        let to_usize = |flag: &str, value: i64| {
            usize::try_from(value)
                .map_err(|_| VolAEError::Config(format!("{} is out of range: {}", flag, value)))
        };

        let training = TrainingConfig {
            num_epochs: to_usize("--epochs", self.epochs)?,
            batch_size: to_usize("--batch_size", self.batch_size)?,
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            model_dir: self.model_dir,
            checkpoint_name: LAST_CHECKPOINT.to_string(),
            show_progress: !self.no_progress,
        };
        training.validate()?;

        let model = ModelConfig {
            hidden_size: self.hidden_size,
            latent_size: self.latent_size,
        };
        model.validate()?;

        Ok(RunConfig {
            training,
            model,
            train_data: self.train_data_dir,
            label_key: self.label_key,
            restore_file: self.restore_file,
            shuffle: self.shuffle,
            seed: self.seed,
            force_cpu: self.cpu,
        })
    }
}

/// Parse `argv` (program name first) into a validated [`RunConfig`]
///
/// Touches neither the filesystem nor the logger.
pub fn parse_args<I, T>(argv: I) -> crate::Result<RunConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::try_parse_from(argv)?;
    args.into_run_config()
}
