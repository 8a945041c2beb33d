/// Training checkpoints with safetensors
///
/// A checkpoint is a single file: model tensors under `model.<name>`, momentum
/// buffers under `optim.<name>`, and a JSON [`CheckpointMetadata`] in the
/// safetensors header.
use candle_core::{Device, Tensor};
use safetensors::tensor::SafeTensors;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::VolAEError;

/// File extension for checkpoints
pub const CHECKPOINT_EXTENSION: &str = "safetensors";

/// Name of the checkpoint rewritten after every epoch
pub const LAST_CHECKPOINT: &str = "last";

const MODEL_PREFIX: &str = "model.";
const OPTIM_PREFIX: &str = "optim.";
const METADATA_KEY: &str = "vol_autoencoder";

fn corrupt(path: &Path, msg: impl std::fmt::Display) -> VolAEError {
    VolAEError::CheckpointCorrupt(format!("{}: {}", path.display(), msg))
}

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Number of completed epochs
    pub epoch: usize,
    /// Number of optimizer updates so far
    pub step: usize,
    /// Average loss of the last completed epoch
    pub avg_loss: Option<f64>,
    /// Learning rate at checkpoint
    pub learning_rate: f64,
    /// Momentum at checkpoint
    pub momentum: f64,
    /// Model configuration (as JSON string)
    pub config: Option<String>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            epoch: 0,
            step: 0,
            avg_loss: None,
            learning_rate: 0.0,
            momentum: 0.0,
            config: None,
        }
    }
}

/// Training checkpoint
pub struct Checkpoint {
    /// Model parameters by name
    pub model: HashMap<String, Tensor>,
    /// Optimizer momentum buffers by parameter name
    pub optimizer: HashMap<String, Tensor>,
    /// Metadata
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create new checkpoint
    pub fn new(
        model: HashMap<String, Tensor>,
        optimizer: HashMap<String, Tensor>,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            model,
            optimizer,
            metadata,
        }
    }

    pub fn epoch(&self) -> usize {
        self.metadata.epoch
    }

    /// Save checkpoint to file
    ///
    /// The record is written next to `path` first and renamed over it, so a
    /// crash mid-write leaves the previous checkpoint intact.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();

        let tensors: Vec<(String, &Tensor)> = self
            .model
            .iter()
            .map(|(name, t)| (format!("{}{}", MODEL_PREFIX, name), t))
            .chain(
                self.optimizer
                    .iter()
                    .map(|(name, t)| (format!("{}{}", OPTIM_PREFIX, name), t)),
            )
            .collect();

        let mut info = HashMap::new();
        info.insert(
            METADATA_KEY.to_string(),
            serde_json::to_string(&self.metadata)?,
        );

        let tmp_path = path.with_extension(format!("{}.tmp", CHECKPOINT_EXTENSION));
        safetensors::serialize_to_file(tensors, &Some(info), &tmp_path).map_err(|e| {
            VolAEError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("failed to write {}: {}", tmp_path.display(), e),
            ))
        })?;
        fs::rename(&tmp_path, path)?;

        Ok(())
    }

    /// Load checkpoint from file
    ///
    /// # Arguments
    /// * `path` - Path to checkpoint file
    /// * `device` - Device to load tensors on
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> crate::Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(VolAEError::CheckpointNotFound(path.to_path_buf()));
        }

        let buffer = fs::read(path)?;

        let (_, header) = SafeTensors::read_metadata(&buffer).map_err(|e| corrupt(path, e))?;
        let json = header
            .metadata()
            .as_ref()
            .and_then(|info| info.get(METADATA_KEY))
            .ok_or_else(|| corrupt(path, "missing checkpoint metadata"))?;
        let metadata: CheckpointMetadata =
            serde_json::from_str(json).map_err(|e| corrupt(path, e))?;

        let tensors =
            candle_core::safetensors::load_buffer(&buffer, device).map_err(|e| corrupt(path, e))?;

        let mut model = HashMap::new();
        let mut optimizer = HashMap::new();
        for (name, tensor) in tensors {
            if let Some(param) = name.strip_prefix(MODEL_PREFIX) {
                model.insert(param.to_string(), tensor);
            } else if let Some(param) = name.strip_prefix(OPTIM_PREFIX) {
                optimizer.insert(param.to_string(), tensor);
            } else {
                return Err(corrupt(path, format!("unexpected tensor '{}'", name)));
            }
        }

        Ok(Self {
            model,
            optimizer,
            metadata,
        })
    }
}

/// Path of the checkpoint called `name` inside `dir`
///
/// `name` is a file stem; a trailing `.safetensors` is accepted and not doubled.
pub fn checkpoint_path<P: AsRef<Path>>(dir: P, name: &str) -> PathBuf {
    let stem = name
        .strip_suffix(CHECKPOINT_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(name);
    dir.as_ref()
        .join(format!("{}.{}", stem, CHECKPOINT_EXTENSION))
}

/// Save `checkpoint` as `<dir>/<name>.safetensors`, creating `dir` if needed
///
/// Overwrites any previous checkpoint of the same name. Returns the path written.
pub fn save_checkpoint<P: AsRef<Path>>(
    checkpoint: &Checkpoint,
    dir: P,
    name: &str,
) -> crate::Result<PathBuf> {
    let dir = dir.as_ref();
    if !dir.exists() {
        log::info!("Checkpoint directory does not exist, creating {:?}", dir);
        fs::create_dir_all(dir)?;
    }

    let path = checkpoint_path(dir, name);
    checkpoint.save(&path)?;
    Ok(path)
}

/// Load a checkpoint from `path`
pub fn load_checkpoint<P: AsRef<Path>>(path: P, device: &Device) -> crate::Result<Checkpoint> {
    Checkpoint::load(path, device)
}
