/// Volumetric autoencoder
use candle_core::{Result, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};

use crate::config::ModelConfig;

/// Side length of a voxel grid
pub const GRID_SIZE: usize = 30;

/// Voxels per sample (30 * 30 * 30)
pub const VOXELS: usize = GRID_SIZE * GRID_SIZE * GRID_SIZE;

/// Reconstruction loss: `(outputs, targets) -> scalar`
pub type LossFn = fn(&Tensor, &Tensor) -> Result<Tensor>;

/// Mean squared error between the reconstruction and the flattened input
pub fn loss_fn(outputs: &Tensor, targets: &Tensor) -> Result<Tensor> {
    candle_nn::loss::mse(outputs, targets)
}

/// Fully connected autoencoder over flattened voxel grids
///
/// ```text
/// [b, 1, 30, 30, 30] -> flatten -> 27000 -> hidden -> latent   (encoder)
///                                  latent -> hidden -> 27000   (decoder, sigmoid)
/// ```
///
/// Parameters live under `encoder.*` and `decoder.*` in the backing `VarMap`.
pub struct VolAutoEncoder {
    config: ModelConfig,
    enc_hidden: Linear,
    enc_latent: Linear,
    dec_hidden: Linear,
    dec_out: Linear,
}

impl VolAutoEncoder {
    /// Create new autoencoder
    pub fn new(config: ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let enc = vb.pp("encoder");
        let enc_hidden = linear(VOXELS, config.hidden_size, enc.pp("fc1"))?;
        let enc_latent = linear(config.hidden_size, config.latent_size, enc.pp("fc2"))?;

        let dec = vb.pp("decoder");
        let dec_hidden = linear(config.latent_size, config.hidden_size, dec.pp("fc1"))?;
        let dec_out = linear(config.hidden_size, VOXELS, dec.pp("fc2"))?;

        Ok(Self {
            config,
            enc_hidden,
            enc_latent,
            dec_hidden,
            dec_out,
        })
    }

    /// Encode `[b, 1, 30, 30, 30]` (or already flat `[b, 27000]`) into `[b, latent]`
    pub fn encode(&self, xs: &Tensor) -> Result<Tensor> {
        let batch = xs.dim(0)?;
        if xs.elem_count() != batch * VOXELS {
            candle_core::bail!(
                "expected {} voxels per sample, got input of shape {:?}",
                VOXELS,
                xs.dims()
            );
        }
        let xs = xs.reshape((batch, VOXELS))?;
        let xs = self.enc_hidden.forward(&xs)?.relu()?;
        self.enc_latent.forward(&xs)?.relu()
    }

    /// Decode `[b, latent]` into occupancy values in `[0, 1]`, shape `[b, 27000]`
    pub fn decode(&self, z: &Tensor) -> Result<Tensor> {
        let xs = self.dec_hidden.forward(z)?.relu()?;
        let xs = self.dec_out.forward(&xs)?;
        candle_nn::ops::sigmoid(&xs)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl Module for VolAutoEncoder {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let z = self.encode(xs)?;
        self.decode(&z)
    }
}
