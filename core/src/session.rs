use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::info;

use crate::{
    checkpoint,
    config::TrainingConfig,
    data::ImageDataset,
    model::{Generator, NetworkShape},
    rng::{stream_rng, INIT_STREAM},
    trainer::{fixed_noise, render_samples, rmsprop_trainer, TrainingSummary},
};

/// Written by sample-only runs.
pub const SAMPLE_ONLY_IMAGE: &str = "fake_samples.png";

#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// A generator checkpoint already existed; one grid was rendered from it.
    Sampled { checkpoint: PathBuf, image: PathBuf },
    Trained(TrainingSummary),
}

/// Restore a generator from `checkpoint` and render the fixed-noise grid.
pub fn sample_from_checkpoint<B: Backend>(
    config: &TrainingConfig,
    checkpoint: &Path,
    device: &B::Device,
) -> Result<PathBuf> {
    let shape = NetworkShape::from_config(config);
    let generator = Generator::<B>::init(&mut stream_rng(config.seed, INIT_STREAM), device, shape);
    let generator = checkpoint::load_module(generator, checkpoint, device)?;

    let grid = render_samples(&generator, &fixed_noise(config), config, device)?;
    let image = config.experiment.join(SAMPLE_ONLY_IMAGE);
    grid.save_png(&image)?;
    info!(
        "rendered {} samples from {} into {}",
        config.fixed_noise_count,
        checkpoint.display(),
        image.display()
    );

    Ok(image)
}

/// Sample from the newest generator checkpoint if one exists, otherwise train.
pub fn run<B: AutodiffBackend>(config: &TrainingConfig, device: &B::Device) -> Result<RunOutcome> {
    config.validate()?;
    fs::create_dir_all(&config.experiment).with_context(|| {
        format!(
            "failed to create experiment directory {}",
            config.experiment.display()
        )
    })?;

    if let Some((epoch, checkpoint)) = checkpoint::latest_generator(&config.experiment)? {
        info!("found generator checkpoint from epoch {}, sampling only", epoch);
        let image = sample_from_checkpoint::<B::InnerBackend>(config, &checkpoint, device)?;
        return Ok(RunOutcome::Sampled { checkpoint, image });
    }

    let dataset = ImageDataset::load(config)?;
    let mut trainer = rmsprop_trainer::<B>(config, device)?;
    Ok(RunOutcome::Trained(trainer.train(&dataset)?))
}
