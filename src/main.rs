/// Volumetric autoencoder training entry point
use anyhow::Context;
use candle_core::Device;
use vol_autoencoder::cli::{parse_args, RunConfig};
use vol_autoencoder::data::{load_data, VoxelDataLoader};
use vol_autoencoder::training::Trainer;
use vol_autoencoder::{logging, VolAEError};

fn main() -> anyhow::Result<()> {
    let run = match parse_args(std::env::args_os()) {
        Ok(run) => run,
        // --help, --version and malformed flags print through clap
        Err(VolAEError::Cli(e)) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    logging::init_logger(&run.training.model_dir)
        .with_context(|| format!("failed to set up logging in {:?}", run.training.model_dir))?;

    if let Err(e) = train(&run) {
        log::error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

fn select_device(force_cpu: bool) -> anyhow::Result<Device> {
    if !force_cpu && candle_core::utils::cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else {
        Ok(Device::Cpu)
    }
}

fn train(run: &RunConfig) -> anyhow::Result<()> {
    let device = select_device(run.force_cpu)?;
    log::info!("Using device: {:?}", device);

    log::info!("Loading the datasets...");
    let (dataset, num_examples) = load_data(&run.train_data, &run.label_key)?;
    log::info!("Number of training examples: {}", num_examples);

    let mut loader = VoxelDataLoader::with_seed(
        dataset,
        run.training.batch_size,
        run.shuffle,
        run.seed,
    )?;
    log::info!(
        "Batch size: {}, batches per epoch: {}",
        loader.batch_size(),
        loader.num_batches()
    );

    log::info!("Model configuration: {:?}", run.model);
    log::info!(
        "Parameters: ~{:.2}M",
        run.model.num_parameters() as f64 / 1_000_000.0
    );

    let mut trainer = Trainer::new(run.model.clone(), run.training.clone(), device)?;

    log::info!("Starting training for {} epoch(s)", run.training.num_epochs);
    let losses = trainer.train_epochs(&mut loader, run.restore_file.as_deref())?;

    if let Some(last) = losses.last() {
        log::info!(
            "Finished at epoch {} (last average loss {:.6}), checkpoints in {:?}",
            trainer.epoch(),
            last,
            run.training.model_dir
        );
    }
    Ok(())
}
