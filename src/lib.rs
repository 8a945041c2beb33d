//! Volumetric autoencoder training - Rust implementation
//!
//! Trains an autoencoder over 30x30x30 voxel grids on top of Candle.
//!
//! # Pipeline
//!
//! - **Data**: voxel grids are loaded once from a NumPy archive and served in
//!   fixed-size batches (the tail batch keeps its real size)
//! - **Model**: any `candle_nn::Module` mapping `[b, 1, 30, 30, 30]` to
//!   `[b, 27000]`; [`VolAutoEncoder`] is the stock one
//! - **Optimizer**: SGD with momentum, one update per batch
//! - **Checkpoints**: `{epoch, parameters, momentum buffers}` in a single
//!   safetensors file, rewritten after every epoch
//!
//! # Example
//!
//! ```ignore
//! use vol_autoencoder::data::{load_data, VoxelDataLoader};
//! use vol_autoencoder::training::{Trainer, TrainingConfig};
//! use vol_autoencoder::ModelConfig;
//!
//! let (dataset, _count) = load_data("data/train_data.npz", "labels")?;
//! let mut loader = VoxelDataLoader::new(dataset, 4, false)?;
//! let mut trainer = Trainer::new(ModelConfig::default(), TrainingConfig::default(), device)?;
//! trainer.train_epochs(&mut loader, None)?;
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod models;
pub mod training;

use std::path::PathBuf;

// Re-export commonly used items
pub use config::ModelConfig;
pub use models::VolAutoEncoder;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum VolAEError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load dataset: {0}")]
    DataLoad(String),

    #[error("Checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("Checkpoint is corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("Failed to restore checkpoint: {0}")]
    Restore(String),

    #[error("Argument error: {0}")]
    Cli(#[from] clap::Error),

    #[error("Logger error: {0}")]
    Logging(#[from] log::SetLoggerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VolAEError>;
