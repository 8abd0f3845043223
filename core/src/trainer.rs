//! Alternating discriminator / generator optimisation.
//!
//! Each round runs `d_iters` discriminator steps followed by `g_iters` generator
//! steps, each consuming one real batch. A round stops early when the epoch's
//! batches run out; a final batch too small for the MMD estimator is dropped.
//! Gradient tracking is chosen per forward pass: the generator runs as its inner
//! (non-autodiff) module during discriminator steps, and a `no_grad` copy of the
//! feature network is used during generator steps.

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::{
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer, RmsPropConfig},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor, TensorData,
    },
};
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::{
    checkpoint,
    config::TrainingConfig,
    data::{ImageDataset, SampleBatch},
    kernel::{mix_rbf_mmd2, mmd_distance, KernelBandwidths},
    loss::{reconstruction_error, LossWeights},
    metrics::{DiscriminatorStats, GeneratorStats, RoundMetrics},
    model::{FeatureNetwork, Generator, NetworkShape},
    penalty::{mean_embedding_gap, one_sided_penalty},
    rng::{standard_normal, stream_rng, FIXED_NOISE_STREAM, INIT_STREAM, NOISE_STREAM, SHUFFLE_STREAM},
    visualization::{rescale_to_unit, ImageGrid},
};

const RMSPROP_EPSILON: f32 = 1e-8;

/// What one epoch produced.
#[derive(Clone, Debug, Default)]
pub struct EpochOutcome {
    pub rounds: Vec<RoundMetrics>,
    pub samples: Vec<PathBuf>,
}

/// What a full training run produced.
#[derive(Clone, Debug, Default)]
pub struct TrainingSummary {
    pub rounds: Vec<RoundMetrics>,
    pub disc_steps: usize,
    pub gen_steps: usize,
    pub samples: Vec<PathBuf>,
    pub checkpoints: Vec<PathBuf>,
}

/// The fixed noise rendered into every sample grid of a run.
pub fn fixed_noise(config: &TrainingConfig) -> Vec<f32> {
    standard_normal(
        &mut stream_rng(config.seed, FIXED_NOISE_STREAM),
        config.fixed_noise_count,
        config.nz,
    )
}

/// Build a trainer with RMSprop on both networks, as the MMD-GAN recipe prescribes.
pub fn rmsprop_trainer<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<
    MmdGanTrainer<B, impl Optimizer<FeatureNetwork<B>, B>, impl Optimizer<Generator<B>, B>>,
> {
    let optimizer_d = RmsPropConfig::new()
        .with_epsilon(RMSPROP_EPSILON)
        .init::<B, FeatureNetwork<B>>();
    let optimizer_g = RmsPropConfig::new()
        .with_epsilon(RMSPROP_EPSILON)
        .init::<B, Generator<B>>();

    MmdGanTrainer::new(config, device.clone(), optimizer_d, optimizer_g)
}

pub struct MmdGanTrainer<B, OD, OG>
where
    B: AutodiffBackend,
    OD: Optimizer<FeatureNetwork<B>, B>,
    OG: Optimizer<Generator<B>, B>,
{
    config: TrainingConfig,
    bandwidths: KernelBandwidths,
    weights: LossWeights,
    device: B::Device,
    generator: Generator<B>,
    discriminator: FeatureNetwork<B>,
    optimizer_d: OD,
    optimizer_g: OG,
    shuffle_rng: StdRng,
    noise_rng: StdRng,
    fixed_noise: Vec<f32>,
    disc_steps: usize,
    gen_steps: usize,
    last_reconstruction: Option<Tensor<B::InnerBackend, 2>>,
}

impl<B, OD, OG> MmdGanTrainer<B, OD, OG>
where
    B: AutodiffBackend,
    OD: Optimizer<FeatureNetwork<B>, B>,
    OG: Optimizer<Generator<B>, B>,
{
    pub fn new(
        config: &TrainingConfig,
        device: B::Device,
        optimizer_d: OD,
        optimizer_g: OG,
    ) -> Result<Self> {
        config.validate()?;
        let bandwidths = config.bandwidths()?;
        let shape = NetworkShape::from_config(config);

        let mut init_rng = stream_rng(config.seed, INIT_STREAM);
        let generator = Generator::init(&mut init_rng, &device, shape);
        let discriminator = FeatureNetwork::init(&mut init_rng, &device, shape);

        Ok(Self {
            config: config.clone(),
            bandwidths,
            weights: LossWeights::from_config(config),
            device,
            generator,
            discriminator,
            optimizer_d,
            optimizer_g,
            shuffle_rng: stream_rng(config.seed, SHUFFLE_STREAM),
            noise_rng: stream_rng(config.seed, NOISE_STREAM),
            fixed_noise: fixed_noise(config),
            disc_steps: 0,
            gen_steps: 0,
            last_reconstruction: None,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub fn discriminator(&self) -> &FeatureNetwork<B> {
        &self.discriminator
    }

    pub fn disc_steps(&self) -> usize {
        self.disc_steps
    }

    pub fn gen_steps(&self) -> usize {
        self.gen_steps
    }

    /// One update of the feature network on a real batch and a fresh fake batch.
    pub fn discriminator_step(&mut self, real: &SampleBatch) -> DiscriminatorStats {
        let bound = self.config.clamp_bound;
        let discriminator = self.discriminator.clone().project_encoder(bound);

        let x = real.to_tensor::<B>(&self.device);
        let y = self.generate_untracked(real.len());

        let real_out = discriminator.evaluate(x.clone());
        let fake_out = discriminator.evaluate(y.clone());

        let mmd2 = mix_rbf_mmd2(
            real_out.embedding.clone(),
            fake_out.embedding.clone(),
            &self.bandwidths,
            self.config.estimator,
        );
        let mmd = mmd_distance(mmd2.clone());
        let penalty = one_sided_penalty(mean_embedding_gap(real_out.embedding, fake_out.embedding));
        let recon_real = reconstruction_error(
            x,
            real_out.reconstruction.clone(),
            self.config.reconstruction,
        );
        let recon_fake =
            reconstruction_error(y, fake_out.reconstruction, self.config.reconstruction);
        let loss = self.weights.discriminator_objective(
            mmd,
            penalty.clone(),
            recon_real.clone(),
            recon_fake.clone(),
        );

        let stats = DiscriminatorStats {
            loss: scalar(&loss),
            mmd2: scalar(&mmd2),
            penalty: scalar(&penalty),
            recon_real: scalar(&recon_real),
            recon_fake: scalar(&recon_fake),
        };

        // The feature network maximises the objective.
        let grads = loss.neg().backward();
        let grads = GradientsParams::from_grads(grads, &discriminator);
        let discriminator = self
            .optimizer_d
            .step(self.config.lr, discriminator, grads);
        self.discriminator = discriminator.project_encoder(bound);

        self.last_reconstruction = Some(real_out.reconstruction.inner());
        self.disc_steps += 1;
        debug!(
            "discriminator step {}: loss {:.6}, mmd2 {:.6}, penalty {:.6}, recon {:.6}/{:.6}",
            self.disc_steps,
            stats.loss,
            stats.mmd2,
            stats.penalty,
            stats.recon_real,
            stats.recon_fake
        );

        stats
    }

    /// One update of the generator against a frozen copy of the feature network.
    pub fn generator_step(&mut self, real: &SampleBatch) -> GeneratorStats {
        let frozen = self.discriminator.clone().no_grad();

        let x = real.to_tensor::<B>(&self.device);
        let noise = Tensor::<B, 2>::from_floats(self.noise_data(real.len()), &self.device);
        let y = self.generator.generate(noise);

        let real_embedding = frozen.encode(x);
        let fake_embedding = frozen.encode(y);

        let mmd2 = mix_rbf_mmd2(
            real_embedding.clone(),
            fake_embedding.clone(),
            &self.bandwidths,
            self.config.estimator,
        );
        let mmd = mmd_distance(mmd2.clone());
        let penalty = one_sided_penalty(mean_embedding_gap(real_embedding, fake_embedding));
        let loss = self.weights.generator_objective(mmd, penalty.clone());

        let stats = GeneratorStats {
            loss: scalar(&loss),
            mmd2: scalar(&mmd2),
            penalty: scalar(&penalty),
        };

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.generator);
        self.generator = self
            .optimizer_g
            .step(self.config.lr, self.generator.clone(), grads);

        self.gen_steps += 1;
        debug!(
            "generator step {}: loss {:.6}, mmd2 {:.6}, penalty {:.6}",
            self.gen_steps, stats.loss, stats.mmd2, stats.penalty
        );

        stats
    }

    /// One shuffled pass over `dataset`, emitting sample grids on the configured cadence.
    pub fn train_epoch(&mut self, epoch: usize, dataset: &ImageDataset) -> Result<EpochOutcome> {
        let estimator = self.config.estimator;
        let min_batch = estimator.min_batch_size();
        let mut batches = dataset
            .batches(self.config.batch_size, &mut self.shuffle_rng)
            .filter(move |batch| {
                let usable = batch.len() >= min_batch;
                if !usable {
                    warn!(
                        "dropping a batch of {} samples; the {:?} estimator needs at least {}",
                        batch.len(),
                        estimator,
                        min_batch
                    );
                }
                usable
            })
            .peekable();
        let mut outcome = EpochOutcome::default();
        let mut round = 0;

        while batches.peek().is_some() {
            let mut discriminator = None;
            for _ in 0..self.config.d_iters {
                let Some(real) = batches.next() else {
                    break;
                };
                discriminator = Some(self.discriminator_step(&real));
            }

            let gen_steps_before = self.gen_steps;
            let mut generator = None;
            for _ in 0..self.config.g_iters {
                let Some(real) = batches.next() else {
                    break;
                };
                generator = Some(self.generator_step(&real));
            }

            let metrics = RoundMetrics {
                epoch,
                round,
                gen_step: self.gen_steps,
                discriminator,
                generator,
            };
            let (loss_d, loss_g) = metrics.losses();
            info!(
                "[{}/{}] round {} gen step {}: D-loss {} G-loss {}",
                epoch,
                self.config.max_epochs,
                round,
                self.gen_steps,
                format_loss(loss_d),
                format_loss(loss_g)
            );
            outcome.rounds.push(metrics);

            if self.gen_steps > gen_steps_before
                && self.gen_steps % self.config.sample_interval == 0
            {
                outcome.samples.extend(self.emit_samples()?);
            }
            round += 1;
        }

        Ok(outcome)
    }

    /// Run every configured epoch, checkpointing on the configured cadence.
    pub fn train(&mut self, dataset: &ImageDataset) -> Result<TrainingSummary> {
        self.ensure_experiment_dir()?;
        info!(
            "training for {} epochs, {} batches per epoch, on {}",
            self.config.max_epochs,
            dataset.num_batches(self.config.batch_size),
            self.config.experiment.display()
        );

        let mut summary = TrainingSummary::default();
        for epoch in 0..self.config.max_epochs {
            let outcome = self.train_epoch(epoch, dataset)?;
            info!(
                "epoch {} done: {} rounds, {} generator steps so far",
                epoch,
                outcome.rounds.len(),
                self.gen_steps
            );
            summary.rounds.extend(outcome.rounds);
            summary.samples.extend(outcome.samples);

            if epoch % self.config.checkpoint_interval == 0 {
                summary.checkpoints.extend(self.save_checkpoint(epoch)?);
            }
        }

        summary.disc_steps = self.disc_steps;
        summary.gen_steps = self.gen_steps;
        info!(
            "training finished after {} discriminator and {} generator steps",
            summary.disc_steps, summary.gen_steps
        );

        Ok(summary)
    }

    /// Fixed-noise samples from the current generator, as a grid in `[0, 1]`.
    pub fn fixed_sample_grid(&self) -> Result<ImageGrid> {
        render_samples(
            &self.generator.valid(),
            &self.fixed_noise,
            &self.config,
            &self.device,
        )
    }

    /// Write `fake_samples_<step>.png` and, once a discriminator step has run,
    /// `decode_samples_<step>.png`.
    pub fn emit_samples(&self) -> Result<Vec<PathBuf>> {
        self.ensure_experiment_dir()?;
        let dir = &self.config.experiment;

        let fake_path = dir.join(format!("fake_samples_{}.png", self.gen_steps));
        self.fixed_sample_grid()?.save_png(&fake_path)?;
        let mut written = vec![fake_path];

        if let Some(reconstruction) = &self.last_reconstruction {
            let values = tensor_values(reconstruction.clone())?;
            let path = dir.join(format!("decode_samples_{}.png", self.gen_steps));
            ImageGrid::tile(
                &rescale_to_unit(&values),
                self.config.nc,
                self.config.image_size,
                self.config.grid_columns,
            )?
            .save_png(&path)?;
            written.push(path);
        }

        info!("wrote samples for generator step {}", self.gen_steps);
        Ok(written)
    }

    /// Persist both networks as `netG_iter_<epoch>.pth` and `netD_iter_<epoch>.pth`.
    pub fn save_checkpoint(&self, epoch: usize) -> Result<Vec<PathBuf>> {
        self.ensure_experiment_dir()?;
        let dir = &self.config.experiment;

        let generator = checkpoint::generator_path(dir, epoch);
        let discriminator = checkpoint::discriminator_path(dir, epoch);
        checkpoint::save_module(&self.generator.valid(), &generator)?;
        checkpoint::save_module(&self.discriminator.valid(), &discriminator)?;

        info!("saved checkpoints for epoch {}", epoch);
        Ok(vec![generator, discriminator])
    }

    fn ensure_experiment_dir(&self) -> Result<()> {
        let dir = &self.config.experiment;
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create experiment directory {}", dir.display()))
    }

    fn noise_data(&mut self, batch_size: usize) -> TensorData {
        let nz = self.config.nz;
        TensorData::new(
            standard_normal(&mut self.noise_rng, batch_size, nz),
            [batch_size, nz],
        )
    }

    fn generate_untracked(&mut self, batch_size: usize) -> Tensor<B, 2> {
        let noise =
            Tensor::<B::InnerBackend, 2>::from_floats(self.noise_data(batch_size), &self.device);
        Tensor::from_inner(self.generator.valid().generate(noise))
    }
}

/// Run `noise` through `generator` and tile the result.
pub(crate) fn render_samples<B: Backend>(
    generator: &Generator<B>,
    noise: &[f32],
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<ImageGrid> {
    let count = noise.len() / config.nz;
    let noise = Tensor::<B, 2>::from_floats(
        TensorData::new(noise.to_vec(), [count, config.nz]),
        device,
    );
    let values = tensor_values(generator.generate(noise))?;

    ImageGrid::tile(
        &rescale_to_unit(&values),
        config.nc,
        config.image_size,
        config.grid_columns,
    )
}

fn tensor_values<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| anyhow!("failed to read tensor values: {err:?}"))
}

fn scalar<B: Backend>(value: &Tensor<B, 1>) -> f32 {
    value.clone().into_scalar().elem::<f32>()
}

fn format_loss(value: Option<f32>) -> String {
    value.map_or_else(|| "-".to_string(), |value| format!("{value:.6}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_candle::CandleDevice;

    use crate::{backend::TrainingBackend, kernel::MmdEstimator};

    fn tiny_config(dir: &std::path::Path) -> TrainingConfig {
        TrainingConfig {
            dataset: "synthetic:8".to_string(),
            batch_size: 4,
            workers: 1,
            nz: 8,
            image_size: 4,
            hidden_dim: 16,
            lr: 0.05,
            max_epochs: 1,
            experiment: dir.to_path_buf(),
            fixed_noise_count: 4,
            ..TrainingConfig::default()
        }
    }

    fn real_batch(config: &TrainingConfig, seed: u64) -> SampleBatch {
        let dataset = ImageDataset::synthetic(config.batch_size, config.sample_dim(), seed);
        dataset
            .batches(config.batch_size, &mut stream_rng(seed, 0))
            .next()
            .unwrap()
    }

    fn embed(
        network: &FeatureNetwork<TrainingBackend>,
        batch: &SampleBatch,
    ) -> Vec<f32> {
        network
            .encode(batch.to_tensor(&CandleDevice::Cpu))
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn encoder_stays_in_the_hypercube_after_every_discriminator_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();
        assert!(trainer.discriminator().encoder_magnitude() > config.clamp_bound as f32);

        for seed in 0..5 {
            let stats = trainer.discriminator_step(&real_batch(&config, seed));
            assert!(stats.loss.is_finite());
            assert!(
                trainer.discriminator().encoder_magnitude() <= config.clamp_bound as f32 + 1e-7,
                "encoder escaped the hypercube after step {}",
                seed + 1
            );
        }
        assert_eq!(trainer.disc_steps(), 5);
        assert_eq!(trainer.gen_steps(), 0);
    }

    #[test]
    fn discriminator_steps_leave_the_generator_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();

        let before = trainer.fixed_sample_grid().unwrap();
        trainer.discriminator_step(&real_batch(&config, 1));
        let after = trainer.fixed_sample_grid().unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn generator_steps_leave_the_feature_network_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();
        trainer.discriminator_step(&real_batch(&config, 2));

        let probe = real_batch(&config, 3);
        let before = embed(trainer.discriminator(), &probe);

        let stats = trainer.generator_step(&real_batch(&config, 4));

        assert!(stats.loss.is_finite());
        assert_eq!(embed(trainer.discriminator(), &probe), before);
        assert_eq!(trainer.gen_steps(), 1);
    }

    #[test]
    fn short_final_round_skips_the_generator() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());
        let dataset = ImageDataset::synthetic(12, config.sample_dim(), 5);
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();

        let outcome = trainer.train_epoch(0, &dataset).unwrap();

        assert_eq!(outcome.rounds.len(), 2);
        assert!(outcome.rounds[0].generator.is_some());
        assert!(outcome.rounds[1].discriminator.is_some());
        assert!(outcome.rounds[1].generator.is_none());
        assert_eq!(trainer.disc_steps(), 2);
        assert_eq!(trainer.gen_steps(), 1);
    }

    #[test]
    fn samples_are_emitted_when_the_generator_step_hits_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            sample_interval: 1,
            ..tiny_config(dir.path())
        };
        let dataset = ImageDataset::synthetic(12, config.sample_dim(), 6);
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();

        let outcome = trainer.train_epoch(0, &dataset).unwrap();

        assert_eq!(
            outcome.samples,
            vec![
                dir.path().join("fake_samples_1.png"),
                dir.path().join("decode_samples_1.png"),
            ]
        );
        assert!(outcome.samples.iter().all(|path| path.exists()));
    }

    #[test]
    fn uneven_step_ratios_are_respected() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            d_iters: 2,
            g_iters: 1,
            ..tiny_config(dir.path())
        };
        let dataset = ImageDataset::synthetic(24, config.sample_dim(), 7);
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();

        let outcome = trainer.train_epoch(0, &dataset).unwrap();

        assert_eq!(outcome.rounds.len(), 2);
        assert_eq!(trainer.disc_steps(), 4);
        assert_eq!(trainer.gen_steps(), 2);
    }
    #[test]
    fn unbiased_estimator_drops_a_single_sample_final_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            estimator: MmdEstimator::Unbiased,
            ..tiny_config(dir.path())
        };
        config.validate().unwrap();
        let dataset = ImageDataset::synthetic(9, config.sample_dim(), 8);
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();

        let outcome = trainer.train_epoch(0, &dataset).unwrap();

        assert_eq!(outcome.rounds.len(), 1);
        assert!(outcome.rounds[0].generator.is_some());
        assert_eq!(trainer.disc_steps(), 1);
        assert_eq!(trainer.gen_steps(), 1);
    }

    #[test]
    fn biased_estimator_still_uses_a_single_sample_final_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());
        let dataset = ImageDataset::synthetic(9, config.sample_dim(), 8);
        let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();

        let outcome = trainer.train_epoch(0, &dataset).unwrap();

        assert_eq!(outcome.rounds.len(), 2);
        assert!(outcome.rounds[1].generator.is_none());
        assert_eq!(trainer.disc_steps(), 2);
    }
}

