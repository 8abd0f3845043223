use burn_autodiff::Autodiff;
use burn_candle::{Candle, CandleDevice};

use crate::error::MmdGanError;

pub type InferenceBackend = Candle<f32, i64>;
pub type TrainingBackend = Autodiff<InferenceBackend>;

/// Pick the compute device for a run.
///
/// An explicit GPU index must be honoured; the CPU is used only when none was requested.
pub fn select_device(gpu_device: Option<usize>) -> Result<CandleDevice, MmdGanError> {
    match gpu_device {
        None => Ok(CandleDevice::Cpu),
        Some(index) => cuda_device(index),
    }
}

#[cfg(feature = "cuda")]
fn cuda_device(index: usize) -> Result<CandleDevice, MmdGanError> {
    if !candle_core::utils::cuda_is_available() {
        return Err(MmdGanError::Environment(format!(
            "GPU device {index} requested but CUDA is not available"
        )));
    }
    // `CandleDevice::cuda` panics on a bad index, so probe it fallibly first.
    candle_core::Device::new_cuda(index).map_err(|err| {
        MmdGanError::Environment(format!("GPU device {index} is unavailable: {err}"))
    })?;

    Ok(CandleDevice::cuda(index))
}

#[cfg(not(feature = "cuda"))]
fn cuda_device(index: usize) -> Result<CandleDevice, MmdGanError> {
    Err(MmdGanError::Environment(format!(
        "GPU device {index} requested but this build has no CUDA support (enable the `cuda` feature)"
    )))
}
