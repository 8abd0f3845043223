pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod kernel;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod penalty;
pub mod report;
pub mod rng;
pub mod session;
pub mod trainer;
pub mod visualization;

pub use backend::{select_device, InferenceBackend, TrainingBackend};
pub use config::{load_or_init, load_training_config, ConfigOverrides, TrainingConfig};
pub use data::{DatasetSource, ImageDataset, SampleBatch};
pub use error::MmdGanError;
pub use experiment::{RunArgs, USAGE};
pub use kernel::{mix_rbf_kernel, mix_rbf_mmd2, mmd_distance, KernelBandwidths, MmdEstimator};
pub use metrics::{DiscriminatorStats, GeneratorStats, RoundMetrics};
pub use model::{FeatureNetwork, Generator, NetworkShape};
pub use report::{Notebook, NOTEBOOK_FILE_NAME};
pub use rng::seeded_rng;
pub use session::{run, sample_from_checkpoint, RunOutcome, SAMPLE_ONLY_IMAGE};
pub use trainer::{rmsprop_trainer, MmdGanTrainer, TrainingSummary};
pub use visualization::ImageGrid;
