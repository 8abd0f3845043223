use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::backend::Backend,
};

use crate::error::MmdGanError;

const GENERATOR_PREFIX: &str = "netG_iter_";
const DISCRIMINATOR_PREFIX: &str = "netD_iter_";
const EXTENSION: &str = "pth";

pub fn generator_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("{GENERATOR_PREFIX}{epoch}.{EXTENSION}"))
}

pub fn discriminator_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("{DISCRIMINATOR_PREFIX}{epoch}.{EXTENSION}"))
}

pub fn save_module<B: Backend, M: Module<B>>(module: &M, path: &Path) -> Result<()> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    let bytes = Recorder::<B>::record(&recorder, module.clone().into_record(), ())
        .map_err(|err| anyhow!("failed to serialize checkpoint {}: {err:?}", path.display()))?;

    fs::write(path, bytes)
        .with_context(|| format!("failed to write checkpoint {}", path.display()))
}

/// Restore `module`'s parameters from `path`.
pub fn load_module<B: Backend, M: Module<B>>(
    module: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, MmdGanError> {
    let bytes = fs::read(path).map_err(|err| MmdGanError::CheckpointLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    let record = Recorder::<B>::load(&recorder, bytes, device).map_err(|err| {
        MmdGanError::CheckpointLoad {
            path: path.to_path_buf(),
            reason: format!("{err:?}"),
        }
    })?;

    Ok(module.load_record(record))
}

/// The generator checkpoint with the highest epoch in `dir`, if any.
pub fn latest_generator(dir: &Path) -> Result<Option<(usize, PathBuf)>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<(usize, PathBuf)> = None;
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to list checkpoints in {}", dir.display()))?
    {
        let path = entry?.path();
        let Some(epoch) = generator_epoch(&path) else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| epoch > *best) {
            latest = Some((epoch, path));
        }
    }

    Ok(latest)
}

fn generator_epoch(path: &Path) -> Option<usize> {
    if path.extension()? != EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(GENERATOR_PREFIX)?
        .parse()
        .ok()
}
