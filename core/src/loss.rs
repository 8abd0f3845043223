use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;

/// Distance used to score autoencoder reconstructions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionDistance {
    /// Mean squared error over every element of the batch.
    #[default]
    L2,
    /// Mean absolute error over every element of the batch.
    L1,
}

pub fn reconstruction_error<B: Backend>(
    target: Tensor<B, 2>,
    reconstruction: Tensor<B, 2>,
    distance: ReconstructionDistance,
) -> Tensor<B, 1> {
    let residual = target - reconstruction;

    match distance {
        ReconstructionDistance::L2 => residual.powf_scalar(2.0).mean(),
        ReconstructionDistance::L1 => residual.abs().mean(),
    }
}

/// Weights of the terms combined into the two objectives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossWeights {
    pub mmd: f64,
    pub one_sided: f64,
    pub reconstruction_real: f64,
    pub reconstruction_fake: f64,
}

impl LossWeights {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            mmd: config.lambda_mmd,
            one_sided: config.lambda_rg,
            reconstruction_real: config.lambda_ae_real,
            reconstruction_fake: config.lambda_ae_fake,
        }
    }

    /// `λ_mmd·mmd + λ_rg·penalty - λ_real·recon_real - λ_fake·recon_fake`.
    pub fn discriminator_objective<B: Backend>(
        &self,
        mmd: Tensor<B, 1>,
        penalty: Tensor<B, 1>,
        recon_real: Tensor<B, 1>,
        recon_fake: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        self.generator_objective(mmd, penalty)
            - recon_real.mul_scalar(self.reconstruction_real)
            - recon_fake.mul_scalar(self.reconstruction_fake)
    }

    /// `λ_mmd·mmd + λ_rg·penalty`.
    pub fn generator_objective<B: Backend>(
        &self,
        mmd: Tensor<B, 1>,
        penalty: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        mmd.mul_scalar(self.mmd) + penalty.mul_scalar(self.one_sided)
    }
}
