/// Data loading modules for voxel training
pub mod voxel_dataset;

pub use voxel_dataset::{load_data, VoxelBatch, VoxelDataLoader, VoxelDataset};

use candle_core::{Device, Result};

/// Generic data loader trait
pub trait BatchDataLoader {
    /// Get next batch, built directly on `device`
    fn next_batch(&mut self, device: &Device) -> Result<Option<VoxelBatch>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;

    /// Get total number of samples served per epoch
    fn num_samples(&self) -> usize;
}
