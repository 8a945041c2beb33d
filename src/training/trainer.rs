/// Training loop for volumetric autoencoders
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::checkpoint::{
    checkpoint_path, save_checkpoint, Checkpoint, CheckpointMetadata, LAST_CHECKPOINT,
};
use super::metrics::RunningAverage;
use super::optimizer::{ParamsSgd, Sgd};
use crate::data::BatchDataLoader;
use crate::models::{loss_fn, LossFn, VolAutoEncoder};
use crate::{ModelConfig, VolAEError};

/// Upper bound on the epoch target
pub const MAX_EPOCHS: usize = 1_000_000;

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Total number of epochs (a restored run continues up to this count)
    pub num_epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// SGD learning rate
    pub learning_rate: f64,
    /// SGD momentum
    pub momentum: f64,
    /// Checkpoint directory
    pub model_dir: PathBuf,
    /// File stem of the checkpoint rewritten after every epoch
    pub checkpoint_name: String,
    /// Draw a progress bar during each epoch
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: 500,
            batch_size: 1,
            learning_rate: 0.1,
            momentum: 0.9,
            model_dir: PathBuf::from("./logs/"),
            checkpoint_name: LAST_CHECKPOINT.to_string(),
            show_progress: true,
        }
    }
}

impl TrainingConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if !(1..=MAX_EPOCHS).contains(&self.num_epochs) {
            return Err(VolAEError::Config(format!(
                "epochs must be in [1, {}], got {}",
                MAX_EPOCHS, self.num_epochs
            )));
        }

        if self.batch_size == 0 {
            return Err(VolAEError::Config("batch_size must be >= 1".to_string()));
        }

        ParamsSgd {
            lr: self.learning_rate,
            momentum: self.momentum,
        }
        .validate()?;

        if self.checkpoint_name.is_empty() {
            return Err(VolAEError::Config(
                "checkpoint_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Trainer for volumetric autoencoders
///
/// Owns the model, its parameters and the optimizer for the duration of a run.
/// Every batch gets exactly one forward/backward/update, including a smaller
/// tail batch.
pub struct Trainer<M: Module = VolAutoEncoder> {
    model: M,
    model_config: Option<ModelConfig>,
    varmap: VarMap,
    optimizer: Sgd,
    loss_fn: LossFn,
    config: TrainingConfig,
    device: Device,
    /// Completed epochs
    epoch: usize,
    /// Optimizer updates performed
    step: usize,
}

impl Trainer<VolAutoEncoder> {
    /// Create new trainer around a freshly initialised [`VolAutoEncoder`]
    pub fn new(
        model_config: ModelConfig,
        training_config: TrainingConfig,
        device: Device,
    ) -> crate::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = VolAutoEncoder::new(model_config.clone(), vb)?;

        let mut trainer = Self::with_model(model, varmap, loss_fn, training_config, device)?;
        trainer.model_config = Some(model_config);
        Ok(trainer)
    }
}

impl<M: Module> Trainer<M> {
    /// Create trainer for any model whose parameters live in `varmap`
    pub fn with_model(
        model: M,
        varmap: VarMap,
        loss_fn: LossFn,
        training_config: TrainingConfig,
        device: Device,
    ) -> crate::Result<Self> {
        training_config.validate()?;

        let optimizer = Sgd::new(
            &varmap,
            ParamsSgd {
                lr: training_config.learning_rate,
                momentum: training_config.momentum,
            },
        )?;

        Ok(Self {
            model,
            model_config: None,
            varmap,
            optimizer,
            loss_fn,
            config: training_config,
            device,
            epoch: 0,
            step: 0,
        })
    }

    /// Training step: forward, loss, backward, update
    ///
    /// `inputs` and `targets` must already be on the trainer's device.
    pub fn train_step(&mut self, inputs: &Tensor, targets: &Tensor) -> crate::Result<f32> {
        let outputs = self.model.forward(inputs)?;
        let loss = (self.loss_fn)(&outputs, targets)?;
        let loss_val = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;

        self.optimizer.backward_step(&loss)?;
        self.step += 1;

        Ok(loss_val)
    }

    /// One full pass over the loader; returns the epoch's average loss
    pub fn train_epoch(&mut self, dataloader: &mut impl BatchDataLoader) -> crate::Result<f64> {
        dataloader.reset();

        let pb = self.progress_bar(dataloader.num_samples());
        let mut loss_avg = RunningAverage::new();

        while let Some(batch) = dataloader.next_batch(&self.device)? {
            let loss = self.train_step(&batch.inputs, &batch.targets)?;
            loss_avg.update(loss as f64);

            log::debug!(
                "Step {}: batch of {} samples, loss={:.6}",
                self.step,
                batch.len(),
                loss
            );

            pb.set_message(format!("loss={:05.3}", loss_avg.value()));
            pb.inc(batch.len() as u64);
        }

        pb.finish_and_clear();
        log::info!("Average Loss on this epoch: {}", loss_avg.value());

        Ok(loss_avg.value())
    }

    /// Full training loop
    ///
    /// Restores `<model_dir>/<restore_file>.safetensors` first when given, then
    /// trains from the restored epoch up to `num_epochs`, saving a checkpoint
    /// after every epoch. Returns the average loss of each epoch run.
    pub fn train_epochs(
        &mut self,
        dataloader: &mut impl BatchDataLoader,
        restore_file: Option<&str>,
    ) -> crate::Result<Vec<f64>> {
        if let Some(name) = restore_file {
            let restore_path = checkpoint_path(&self.config.model_dir, name);
            log::info!("Restoring parameters from {}", restore_path.display());
            self.restore(&restore_path)?;
        }

        let num_epochs = self.config.num_epochs;
        if self.epoch >= num_epochs {
            log::warn!(
                "Already trained for {} epoch(s), nothing left to do for a target of {}",
                self.epoch,
                num_epochs
            );
        }

        let mut losses = Vec::new();
        for epoch in self.epoch..num_epochs {
            log::info!("Epoch {}/{}", epoch + 1, num_epochs);

            let avg_loss = self.train_epoch(dataloader)?;
            self.epoch = epoch + 1;

            let path = self.save_checkpoint(Some(avg_loss))?;
            log::info!("Saved checkpoint for epoch {} to {}", self.epoch, path.display());

            losses.push(avg_loss);
        }

        Ok(losses)
    }

    /// Snapshot parameters, momentum buffers and progress
    pub fn checkpoint(&self, avg_loss: Option<f64>) -> crate::Result<Checkpoint> {
        let model: HashMap<String, Tensor> = self
            .varmap
            .data()
            .lock()
            .map_err(|_| VolAEError::Config("parameter map lock poisoned".to_string()))?
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();

        let config = self
            .model_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let metadata = CheckpointMetadata {
            epoch: self.epoch,
            step: self.step,
            avg_loss,
            learning_rate: self.optimizer.learning_rate(),
            momentum: self.optimizer.momentum(),
            config,
        };

        Ok(Checkpoint::new(model, self.optimizer.state(), metadata))
    }

    /// Save checkpoint as `<model_dir>/<checkpoint_name>.safetensors`
    pub fn save_checkpoint(&self, avg_loss: Option<f64>) -> crate::Result<PathBuf> {
        let checkpoint = self.checkpoint(avg_loss)?;
        save_checkpoint(&checkpoint, &self.config.model_dir, &self.config.checkpoint_name)
    }

    /// Restore parameters, optimizer state and progress from a checkpoint file
    ///
    /// Nothing is modified unless the whole checkpoint matches the live model.
    pub fn restore<P: AsRef<Path>>(&mut self, path: P) -> crate::Result<()> {
        let checkpoint = match Checkpoint::load(path, &self.device) {
            Ok(checkpoint) => checkpoint,
            Err(VolAEError::CheckpointNotFound(missing)) => {
                return Err(VolAEError::Restore(format!(
                    "checkpoint {} does not exist",
                    missing.display()
                )))
            }
            Err(e) => return Err(e),
        };

        if let (Some(saved), Some(current)) = (&checkpoint.metadata.config, &self.model_config) {
            let saved: ModelConfig = serde_json::from_str(saved).map_err(|e| {
                VolAEError::CheckpointCorrupt(format!("invalid model config: {}", e))
            })?;
            if &saved != current {
                return Err(VolAEError::Restore(format!(
                    "checkpoint was trained with {:?}, current model is {:?}",
                    saved, current
                )));
            }
        }

        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| VolAEError::Restore("parameter map lock poisoned".to_string()))?;

        for (name, var) in vars.iter() {
            let saved = checkpoint.model.get(name).ok_or_else(|| {
                VolAEError::Restore(format!("checkpoint has no parameter '{}'", name))
            })?;
            if saved.shape() != var.shape() {
                return Err(VolAEError::Restore(format!(
                    "parameter '{}' has shape {:?} in checkpoint, model expects {:?}",
                    name,
                    saved.dims(),
                    var.dims()
                )));
            }
        }
        if let Some(extra) = checkpoint.model.keys().find(|name| !vars.contains_key(*name)) {
            return Err(VolAEError::Restore(format!(
                "checkpoint parameter '{}' does not exist in the model",
                extra
            )));
        }

        self.optimizer.load_state(checkpoint.optimizer)?;

        for (name, var) in vars.iter() {
            let saved = &checkpoint.model[name];
            var.set(&saved.to_dtype(var.dtype())?)?;
        }
        drop(vars);

        self.epoch = checkpoint.metadata.epoch;
        self.step = checkpoint.metadata.step;

        log::info!(
            "Restored checkpoint at epoch {} (step {})",
            self.epoch,
            self.step
        );

        Ok(())
    }

    fn progress_bar(&self, num_samples: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(num_samples as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {bar:40.green/black} {pos}/{len} [{elapsed}<{eta}] {msg}")
        {
            pb.set_style(style);
        }
        pb
    }

    /// Completed epochs
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Optimizer updates performed so far
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn optimizer(&self) -> &Sgd {
        &self.optimizer
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}
