use std::path::PathBuf;

use thiserror::Error;

/// Failures the training run can report to its caller.
///
/// Numerical noise in the MMD estimate and data exhaustion are handled where
/// they occur and never show up here.
#[derive(Debug, Error)]
pub enum MmdGanError {
    /// The requested accelerator cannot be used.
    #[error("compute device unavailable: {0}")]
    Environment(String),

    /// A checkpoint needed for sampling is missing or malformed.
    #[error("failed to load checkpoint {path}: {reason}")]
    CheckpointLoad { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unusable dataset {source_id}: {reason}")]
    Dataset { source_id: String, reason: String },
}
