/// Configuration for the volumetric autoencoder
///
/// Input and output sizes are fixed by the voxel grid (see `models::VOXELS`);
/// only the bottleneck widths are tunable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig {
    /// Width of the hidden layer on both sides of the bottleneck
    pub hidden_size: usize,

    /// Width of the latent code
    pub latent_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 512,
            latent_size: 64,
        }
    }
}

impl ModelConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.hidden_size == 0 || self.latent_size == 0 {
            return Err(crate::VolAEError::Config(
                "hidden_size and latent_size must be > 0".to_string(),
            ));
        }

        if self.latent_size > self.hidden_size {
            return Err(crate::VolAEError::Config(format!(
                "latent_size ({}) must not exceed hidden_size ({})",
                self.latent_size, self.hidden_size
            )));
        }

        Ok(())
    }

    /// Number of trainable scalars in the encoder/decoder stack
    pub fn num_parameters(&self) -> usize {
        let voxels = crate::models::VOXELS;
        // weight + bias per linear layer
        let linear = |i: usize, o: usize| i * o + o;
        linear(voxels, self.hidden_size)
            + linear(self.hidden_size, self.latent_size)
            + linear(self.latent_size, self.hidden_size)
            + linear(self.hidden_size, voxels)
    }
}
