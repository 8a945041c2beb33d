/// Training infrastructure: SGD, checkpoints and the epoch loop
pub mod checkpoint;
pub mod metrics;
pub mod optimizer;
pub mod trainer;

pub use checkpoint::{
    checkpoint_path, load_checkpoint, save_checkpoint, Checkpoint, CheckpointMetadata,
    LAST_CHECKPOINT,
};
pub use metrics::RunningAverage;
pub use optimizer::{ParamsSgd, Sgd};
pub use trainer::{Trainer, TrainingConfig, MAX_EPOCHS};
