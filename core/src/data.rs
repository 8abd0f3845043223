use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_dataset::{
    vision::{MnistDataset, MnistItem},
    Dataset,
};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use rand::{rngs::StdRng, seq::SliceRandom, Rng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    config::TrainingConfig,
    error::MmdGanError,
    rng::{stream_rng, SYNTHETIC_STREAM},
};

const MNIST_SIDE: usize = 28;
const DEFAULT_SYNTHETIC_COUNT: usize = 1024;
const SYNTHETIC_MODES: usize = 4;
const SYNTHETIC_SPREAD: f32 = 0.1;
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Where the real samples come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatasetSource {
    Mnist,
    /// Seeded clusters around a few random prototypes.
    Synthetic { count: usize },
    /// Every PNG/JPEG file directly inside a directory.
    Folder(PathBuf),
}

impl DatasetSource {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "mnist" => Ok(Self::Mnist),
            "synthetic" => Ok(Self::Synthetic {
                count: DEFAULT_SYNTHETIC_COUNT,
            }),
            other => match other.strip_prefix("synthetic:") {
                Some(count) => {
                    let count = count
                        .parse()
                        .with_context(|| format!("invalid synthetic sample count in {other}"))?;
                    Ok(Self::Synthetic { count })
                }
                None => Ok(Self::Folder(PathBuf::from(other))),
            },
        }
    }
}

/// One batch of flattened samples, row-major `[len, dim]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBatch {
    values: Vec<f32>,
    len: usize,
    dim: usize,
}

impl SampleBatch {
    pub fn new(values: Vec<f32>, dim: usize) -> Self {
        assert!(dim > 0, "sample dimension must be positive");
        assert_eq!(
            values.len() % dim,
            0,
            "batch of {} values is not a whole number of {dim}-value samples",
            values.len()
        );
        let len = values.len() / dim;

        Self { values, len, dim }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 2>::from_floats(
            TensorData::new(self.values.clone(), [self.len, self.dim]),
            device,
        )
    }
}

#[derive(Clone, Debug)]
pub struct ImageDataset {
    samples: Vec<Vec<f32>>,
    dim: usize,
}

impl ImageDataset {
    /// Load the dataset named by `config.dataset`, sized to `nc × image_size × image_size`.
    pub fn load(config: &TrainingConfig) -> Result<Self> {
        let dataset = match DatasetSource::parse(&config.dataset)? {
            DatasetSource::Mnist => Self::mnist(config)?,
            DatasetSource::Synthetic { count } => {
                Self::synthetic(count, config.sample_dim(), config.seed)
            }
            DatasetSource::Folder(path) => Self::folder(&path, config)?,
        };

        if dataset.is_empty() {
            return Err(MmdGanError::Dataset {
                source_id: config.dataset.clone(),
                reason: "no samples".to_string(),
            }
            .into());
        }

        info!(
            "loaded {} samples of dimension {} from {}",
            dataset.len(),
            dataset.dim(),
            config.dataset
        );
        Ok(dataset)
    }

    pub fn from_samples(samples: Vec<Vec<f32>>, dim: usize) -> Result<Self> {
        if let Some(index) = samples.iter().position(|sample| sample.len() != dim) {
            anyhow::bail!(
                "sample {} has {} values, expected {}",
                index,
                samples[index].len(),
                dim
            );
        }

        Ok(Self { samples, dim })
    }

    pub fn synthetic(count: usize, dim: usize, seed: u64) -> Self {
        let mut rng = stream_rng(seed, SYNTHETIC_STREAM);
        let prototypes: Vec<Vec<f32>> = (0..SYNTHETIC_MODES)
            .map(|_| (0..dim).map(|_| rng.gen_range(-0.8..0.8)).collect())
            .collect();

        let samples = (0..count)
            .map(|index| {
                prototypes[index % SYNTHETIC_MODES]
                    .iter()
                    .map(|&center| {
                        let jitter = rng.sample::<f32, _>(StandardNormal) * SYNTHETIC_SPREAD;
                        (center + jitter).clamp(-1.0, 1.0)
                    })
                    .collect()
            })
            .collect();

        Self { samples, dim }
    }

    fn mnist(config: &TrainingConfig) -> Result<Self> {
        if config.nc != 1 {
            return Err(MmdGanError::Dataset {
                source_id: config.dataset.clone(),
                reason: format!("MNIST is single-channel but nc = {}", config.nc),
            }
            .into());
        }

        let dataset = MnistDataset::train();
        let side = config.image_size;
        let samples = decode_pool(config.workers)?.install(|| {
            (0..dataset.len())
                .into_par_iter()
                .filter_map(|index| dataset.get(index))
                .map(|item| mnist_pixels(&item, side))
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(Self {
            samples,
            dim: config.sample_dim(),
        })
    }

    fn folder(path: &Path, config: &TrainingConfig) -> Result<Self> {
        let entries = fs::read_dir(path)
            .with_context(|| format!("failed to read image folder {}", path.display()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    warn!("skipping unreadable entry in {}: {}", path.display(), err);
                    None
                }
            })
            .filter(|path| is_image_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(MmdGanError::Dataset {
                source_id: config.dataset.clone(),
                reason: "folder holds no PNG or JPEG files".to_string(),
            }
            .into());
        }

        let (channels, side) = (config.nc, config.image_size);
        let samples = decode_pool(config.workers)?.install(|| {
            files
                .par_iter()
                .map(|file| load_image_file(file, channels, side))
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(Self {
            samples,
            dim: config.sample_dim(),
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of batches one pass yields; the last one may be short.
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size)
    }

    /// A freshly shuffled pass over the dataset.
    pub fn batches(&self, batch_size: usize, rng: &mut StdRng) -> Batches<'_> {
        assert!(batch_size > 0, "batch size must be positive");
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        Batches {
            dataset: self,
            order,
            cursor: 0,
            batch_size,
        }
    }
}

pub struct Batches<'a> {
    dataset: &'a ImageDataset,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
}

impl Iterator for Batches<'_> {
    type Item = SampleBatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let mut values = Vec::with_capacity((end - self.cursor) * self.dataset.dim);
        for &index in &self.order[self.cursor..end] {
            values.extend_from_slice(&self.dataset.samples[index]);
        }
        self.cursor = end;

        Some(SampleBatch::new(values, self.dataset.dim))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

fn decode_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("failed to start data decoding workers")
}

fn to_signed_unit(value: u8) -> f32 {
    value as f32 / 255.0 * 2.0 - 1.0
}

fn mnist_pixels(item: &MnistItem, side: usize) -> Result<Vec<f32>> {
    let raw: Vec<u8> = item
        .image
        .iter()
        .flat_map(|row| row.iter().map(|&pixel| pixel.clamp(0.0, 255.0) as u8))
        .collect();

    let raw = if side == MNIST_SIDE {
        raw
    } else {
        let image = GrayImage::from_raw(MNIST_SIDE as u32, MNIST_SIDE as u32, raw)
            .context("MNIST item does not hold 28x28 pixels")?;
        DynamicImage::ImageLuma8(image)
            .resize_exact(side as u32, side as u32, FilterType::Triangle)
            .to_luma8()
            .into_raw()
    };

    Ok(raw.into_iter().map(to_signed_unit).collect())
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| IMAGE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn load_image_file(path: &Path, channels: usize, side: usize) -> Result<Vec<f32>> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?
        .resize_exact(side as u32, side as u32, FilterType::Triangle);

    let interleaved = match channels {
        1 => image.to_luma8().into_raw(),
        3 => image.to_rgb8().into_raw(),
        other => anyhow::bail!("unsupported channel count {other}"),
    };

    Ok(channel_major(&interleaved, channels))
}

/// `HWC` bytes to `CHW` values in `[-1, 1]`.
fn channel_major(interleaved: &[u8], channels: usize) -> Vec<f32> {
    let pixels = interleaved.len() / channels;
    (0..channels)
        .flat_map(|channel| {
            (0..pixels).map(move |pixel| to_signed_unit(interleaved[pixel * channels + channel]))
        })
        .collect()
}
