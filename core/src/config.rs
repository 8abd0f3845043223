use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::MmdGanError,
    kernel::{KernelBandwidths, MmdEstimator},
    loss::ReconstructionDistance,
};

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Load a JSON configuration from disk, creating it with the provided initializer if missing.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        Ok(value)
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let value = initializer();
        let serialized = serde_json::to_string_pretty(&value)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(value)
    }
}

/// Every knob of a training run. Fields missing from a config file take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// `mnist`, `synthetic`, `synthetic:<count>`, or a directory of images.
    pub dataset: String,
    pub batch_size: usize,
    /// Threads used to decode the dataset.
    pub workers: usize,
    /// Latent size of the generator and embedding size of the feature network.
    pub nz: usize,
    pub image_size: usize,
    pub nc: usize,
    pub hidden_dim: usize,
    pub lr: f64,
    pub max_epochs: usize,
    pub experiment: PathBuf,
    /// CUDA device index; training runs on the CPU when unset.
    pub gpu_device: Option<usize>,
    pub seed: u64,
    pub sigmas: Vec<f64>,
    pub estimator: MmdEstimator,
    /// Half-width of the hypercube the encoder parameters are kept in.
    pub clamp_bound: f64,
    pub d_iters: usize,
    pub g_iters: usize,
    pub lambda_mmd: f64,
    pub lambda_rg: f64,
    pub lambda_ae_real: f64,
    pub lambda_ae_fake: f64,
    pub reconstruction: ReconstructionDistance,
    /// Generator steps between sample grids.
    pub sample_interval: usize,
    /// Epochs between checkpoints.
    pub checkpoint_interval: usize,
    pub fixed_noise_count: usize,
    pub grid_columns: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset: "mnist".to_string(),
            batch_size: 64,
            workers: 2,
            nz: 100,
            image_size: 28,
            nc: 1,
            hidden_dim: 512,
            lr: 5e-5,
            max_epochs: 200,
            experiment: PathBuf::from("samples"),
            gpu_device: None,
            seed: 1126,
            sigmas: vec![1.0, 2.0, 4.0, 8.0, 16.0],
            estimator: MmdEstimator::Biased,
            clamp_bound: 0.01,
            d_iters: 1,
            g_iters: 1,
            lambda_mmd: 1.0,
            lambda_rg: 16.0,
            lambda_ae_real: 8.0,
            lambda_ae_fake: 8.0,
            reconstruction: ReconstructionDistance::L2,
            sample_interval: 500,
            checkpoint_interval: 50,
            fixed_noise_count: 64,
            grid_columns: 8,
        }
    }
}

impl TrainingConfig {
    /// Flattened length of one sample.
    pub fn sample_dim(&self) -> usize {
        self.nc * self.image_size * self.image_size
    }

    pub fn bandwidths(&self) -> Result<KernelBandwidths, MmdGanError> {
        KernelBandwidths::new(self.sigmas.clone())
    }

    pub fn validate(&self) -> Result<(), MmdGanError> {
        let positive = [
            ("batch_size", self.batch_size),
            ("nz", self.nz),
            ("image_size", self.image_size),
            ("hidden_dim", self.hidden_dim),
            ("d_iters", self.d_iters),
            ("g_iters", self.g_iters),
            ("sample_interval", self.sample_interval),
            ("checkpoint_interval", self.checkpoint_interval),
            ("fixed_noise_count", self.fixed_noise_count),
            ("grid_columns", self.grid_columns),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(MmdGanError::InvalidConfig(format!("{name} must be at least 1")));
        }
        if self.nc != 1 && self.nc != 3 {
            return Err(MmdGanError::InvalidConfig(format!(
                "nc must be 1 or 3, got {}",
                self.nc
            )));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(MmdGanError::InvalidConfig(format!(
                "lr must be positive, got {}",
                self.lr
            )));
        }
        if !(self.clamp_bound.is_finite() && self.clamp_bound > 0.0) {
            return Err(MmdGanError::InvalidConfig(format!(
                "clamp_bound must be positive, got {}",
                self.clamp_bound
            )));
        }
        if self.estimator == MmdEstimator::Unbiased && self.batch_size < 2 {
            return Err(MmdGanError::InvalidConfig(
                "the unbiased estimator needs batch_size >= 2".to_string(),
            ));
        }
        self.bandwidths()?;

        Ok(())
    }
}

/// Values given on the command line; each one that is set replaces the file value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOverrides {
    pub dataset: Option<String>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub nz: Option<usize>,
    pub image_size: Option<usize>,
    pub nc: Option<usize>,
    pub lr: Option<f64>,
    pub max_epochs: Option<usize>,
    pub experiment: Option<PathBuf>,
    pub gpu_device: Option<usize>,
    pub seed: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut TrainingConfig) {
        if let Some(dataset) = &self.dataset {
            config.dataset = dataset.clone();
        }
        if let Some(experiment) = &self.experiment {
            config.experiment = experiment.clone();
        }
        if self.gpu_device.is_some() {
            config.gpu_device = self.gpu_device;
        }

        let counts = [
            (self.batch_size, &mut config.batch_size),
            (self.workers, &mut config.workers),
            (self.nz, &mut config.nz),
            (self.image_size, &mut config.image_size),
            (self.nc, &mut config.nc),
            (self.max_epochs, &mut config.max_epochs),
        ];
        for (value, slot) in counts {
            if let Some(value) = value {
                *slot = value;
            }
        }

        if let Some(lr) = self.lr {
            config.lr = lr;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
    }
}

/// Resolve the experiment directory, load or create its `config.json`, and layer the overrides on top.
pub fn load_training_config(overrides: &ConfigOverrides) -> Result<TrainingConfig> {
    let experiment = overrides
        .experiment
        .clone()
        .unwrap_or_else(|| TrainingConfig::default().experiment);
    let path = experiment.join(CONFIG_FILE_NAME);

    let mut config: TrainingConfig = load_or_init(&path, || TrainingConfig {
        experiment: experiment.clone(),
        ..TrainingConfig::default()
    })?;
    overrides.apply(&mut config);
    config.validate()?;

    Ok(config)
}
