use std::{fs, path::Path};

use burn_candle::CandleDevice;
use mmdgan_core::{
    checkpoint, rmsprop_trainer, run, sample_from_checkpoint, ImageDataset, InferenceBackend,
    MmdGanError, RunOutcome, TrainingBackend, TrainingConfig, SAMPLE_ONLY_IMAGE,
};

fn small_config(dir: &Path) -> TrainingConfig {
    TrainingConfig {
        dataset: "synthetic:8".to_string(),
        batch_size: 4,
        workers: 1,
        nz: 8,
        image_size: 4,
        hidden_dim: 16,
        max_epochs: 1,
        experiment: dir.to_path_buf(),
        fixed_noise_count: 8,
        ..TrainingConfig::default()
    }
}

fn png_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "png"))
        .count()
}

fn losses(outcome: RunOutcome) -> Vec<(Option<f32>, Option<f32>)> {
    match outcome {
        RunOutcome::Trained(summary) => summary.rounds.iter().map(|round| round.losses()).collect(),
        RunOutcome::Sampled { .. } => panic!("expected a training run"),
    }
}

#[test]
fn fixed_seed_runs_produce_identical_losses() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();

    let first = losses(
        run::<TrainingBackend>(&small_config(first_dir.path()), &CandleDevice::Cpu).unwrap(),
    );
    let second = losses(
        run::<TrainingBackend>(&small_config(second_dir.path()), &CandleDevice::Cpu).unwrap(),
    );

    // Two batches of four: one discriminator step then one generator step.
    assert_eq!(first.len(), 1);
    let (loss_d, loss_g) = first[0];
    assert!(loss_d.is_some_and(f32::is_finite));
    assert!(loss_g.is_some_and(f32::is_finite));
    assert_eq!(first, second);
}

#[test]
fn training_writes_checkpoints_for_epoch_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        max_epochs: 2,
        checkpoint_interval: 2,
        ..small_config(dir.path())
    };

    let RunOutcome::Trained(summary) = run::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap()
    else {
        panic!("expected a training run");
    };

    assert_eq!(summary.disc_steps, 2);
    assert_eq!(summary.gen_steps, 2);
    assert_eq!(
        summary.checkpoints,
        vec![
            checkpoint::generator_path(dir.path(), 0),
            checkpoint::discriminator_path(dir.path(), 0),
        ]
    );
    assert!(!checkpoint::generator_path(dir.path(), 1).exists());
    assert_eq!(png_count(dir.path()), 0);
}

#[test]
fn existing_checkpoint_switches_to_sample_only_mode() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    run::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();
    assert_eq!(png_count(dir.path()), 0);

    let resumed = TrainingConfig {
        max_epochs: 0,
        ..config
    };
    let outcome = run::<TrainingBackend>(&resumed, &CandleDevice::Cpu).unwrap();

    let RunOutcome::Sampled { checkpoint, image } = outcome else {
        panic!("expected a sample-only run");
    };
    assert_eq!(checkpoint, checkpoint::generator_path(dir.path(), 0));
    assert_eq!(image, dir.path().join(SAMPLE_ONLY_IMAGE));
    assert_eq!(png_count(dir.path()), 1);
}

#[test]
fn newest_generator_checkpoint_wins() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();
    trainer.save_checkpoint(2).unwrap();
    trainer.save_checkpoint(10).unwrap();

    let RunOutcome::Sampled { checkpoint, .. } =
        run::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap()
    else {
        panic!("expected a sample-only run");
    };

    assert_eq!(checkpoint, checkpoint::generator_path(dir.path(), 10));
}

#[test]
fn restored_generator_renders_the_same_grid() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let dataset = ImageDataset::load(&config).unwrap();
    let mut trainer = rmsprop_trainer::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap();
    trainer.train_epoch(0, &dataset).unwrap();
    let paths = trainer.save_checkpoint(0).unwrap();

    let image = sample_from_checkpoint::<InferenceBackend>(&config, &paths[0], &CandleDevice::Cpu)
        .unwrap();

    let expected = trainer.fixed_sample_grid().unwrap().encode_png().unwrap();
    assert_eq!(fs::read(image).unwrap(), expected);
}

#[test]
fn corrupt_checkpoint_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    fs::write(checkpoint::generator_path(dir.path(), 3), b"not a checkpoint").unwrap();

    let err = run::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MmdGanError>(),
        Some(MmdGanError::CheckpointLoad { .. })
    ));
    assert_eq!(png_count(dir.path()), 0);
}

#[test]
fn invalid_configuration_is_rejected_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        batch_size: 0,
        ..small_config(dir.path())
    };

    let err = run::<TrainingBackend>(&config, &CandleDevice::Cpu).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MmdGanError>(),
        Some(MmdGanError::InvalidConfig(_))
    ));
}
