//! Mixture-of-RBF kernel Maximum Mean Discrepancy.
//!
//! Both samples are stacked into one matrix so a single Gram product yields every
//! pairwise distance; the mixture kernel is then split into its `XX`, `XY` and
//! `YY` blocks.

use burn::tensor::{activation::relu, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::MmdGanError;

/// Ordered, strictly positive Gaussian bandwidths shared by every MMD evaluation of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelBandwidths {
    sigmas: Vec<f64>,
}

impl KernelBandwidths {
    pub fn new(sigmas: Vec<f64>) -> Result<Self, MmdGanError> {
        if sigmas.is_empty() {
            return Err(MmdGanError::InvalidConfig(
                "kernel bandwidth set is empty".to_string(),
            ));
        }
        if let Some(sigma) = sigmas.iter().find(|sigma| !(sigma.is_finite() && **sigma > 0.0)) {
            return Err(MmdGanError::InvalidConfig(format!(
                "kernel bandwidth {sigma} is not a positive finite value"
            )));
        }

        Ok(Self { sigmas })
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    /// `1 / (2σ²)` for each bandwidth.
    fn gammas(&self) -> impl Iterator<Item = f64> + '_ {
        self.sigmas.iter().map(|sigma| 1.0 / (2.0 * sigma * sigma))
    }
}

/// Which squared-MMD estimator to report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MmdEstimator {
    /// Block means including the diagonal of `K_XX` and `K_YY`.
    #[default]
    Biased,
    /// Drops the diagonal of `K_XX` and `K_YY`; needs at least two samples per side.
    Unbiased,
}

impl MmdEstimator {
    /// Fewest samples per side the estimator is defined for.
    pub fn min_batch_size(self) -> usize {
        match self {
            Self::Biased => 1,
            Self::Unbiased => 2,
        }
    }
}

/// The three blocks of the mixture kernel over `X ∪ Y`.
#[derive(Clone, Debug)]
pub struct KernelBlocks<B: Backend> {
    pub xx: Tensor<B, 2>,
    pub xy: Tensor<B, 2>,
    pub yy: Tensor<B, 2>,
}

/// Pairwise squared Euclidean distances between the rows of `z`, clamped at zero.
pub fn squared_distances<B: Backend>(z: Tensor<B, 2>) -> Tensor<B, 2> {
    let gram = z.clone().matmul(z.clone().transpose());
    let norms = z.powf_scalar(2.0).sum_dim(1);

    (norms.clone() + norms.transpose() - gram.mul_scalar(2.0)).clamp_min(0.0)
}

/// Sum of `exp(-‖a-b‖² / 2σ²)` over all bandwidths, for every pair of rows of `z`.
pub fn mixture_kernel_matrix<B: Backend>(
    z: Tensor<B, 2>,
    bandwidths: &KernelBandwidths,
) -> Tensor<B, 2> {
    let distances = squared_distances(z);

    bandwidths.gammas().fold(distances.zeros_like(), |kernel, gamma| {
        kernel + distances.clone().mul_scalar(-gamma).exp()
    })
}

pub fn mix_rbf_kernel<B: Backend>(
    x: Tensor<B, 2>,
    y: Tensor<B, 2>,
    bandwidths: &KernelBandwidths,
) -> KernelBlocks<B> {
    let [m, x_features] = x.dims();
    let [n, y_features] = y.dims();
    assert!(m >= 1 && n >= 1, "MMD needs at least one sample per side, got {m} and {n}");
    assert_eq!(
        x_features, y_features,
        "MMD samples disagree on feature dimension"
    );

    let kernel = mixture_kernel_matrix(Tensor::cat(vec![x, y], 0), bandwidths);
    let total = m + n;

    KernelBlocks {
        xx: kernel.clone().slice([0..m, 0..m]),
        xy: kernel.clone().slice([0..m, m..total]),
        yy: kernel.slice([m..total, m..total]),
    }
}

/// Raw squared MMD estimate between the rows of `x` and `y`.
///
/// The value can dip below zero from estimator noise; use [`mmd_distance`] when it
/// feeds a loss.
pub fn mix_rbf_mmd2<B: Backend>(
    x: Tensor<B, 2>,
    y: Tensor<B, 2>,
    bandwidths: &KernelBandwidths,
    estimator: MmdEstimator,
) -> Tensor<B, 1> {
    let blocks = mix_rbf_kernel(x, y, bandwidths);
    let cross = blocks.xy.mean().mul_scalar(2.0);

    match estimator {
        MmdEstimator::Biased => blocks.xx.mean() + blocks.yy.mean() - cross,
        MmdEstimator::Unbiased => {
            let [m, _] = blocks.xx.dims();
            let [n, _] = blocks.yy.dims();
            assert!(
                m >= estimator.min_batch_size() && n >= estimator.min_batch_size(),
                "unbiased MMD needs at least two samples per side, got {m} and {n}"
            );

            let within_x = off_diagonal_sum(blocks.xx).div_scalar((m * (m - 1)) as f64);
            let within_y = off_diagonal_sum(blocks.yy).div_scalar((n * (n - 1)) as f64);
            within_x + within_y - cross
        }
    }
}

/// `sqrt(max(MMD², 0))` of an estimate from [`mix_rbf_mmd2`].
pub fn mmd_distance<B: Backend>(mmd2: Tensor<B, 1>) -> Tensor<B, 1> {
    relu(mmd2).sqrt()
}

fn off_diagonal_sum<B: Backend>(block: Tensor<B, 2>) -> Tensor<B, 1> {
    let [size, _] = block.dims();
    let identity = Tensor::<B, 2>::eye(size, &block.device());

    block.clone().sum() - (block * identity).sum()
}
