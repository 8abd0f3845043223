use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use mmdgan_core::{
    load_training_config,
    report::{render_configuration, render_losses, render_sample},
    run, select_device,
    visualization::png_file_data_url,
    Notebook, RunArgs, RunOutcome, TrainingBackend, TrainingConfig, TrainingSummary,
    NOTEBOOK_FILE_NAME, USAGE,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const HISTORY_FILE_NAME: &str = "history.json";

fn main() -> Result<()> {
    let args = RunArgs::parse_from_env()?;
    if args.help_requested() {
        println!("{USAGE}");
        return Ok(());
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install the log subscriber")?;

    let config = load_training_config(args.overrides())?;
    let device = select_device(config.gpu_device)?;
    info!(
        "running MMD-GAN on {:?} with dataset {} into {}",
        device,
        config.dataset,
        config.experiment.display()
    );

    match run::<TrainingBackend>(&config, &device)? {
        RunOutcome::Sampled { checkpoint, image } => {
            let overview = format!(
                "Sample-only run from `{}`; no training steps were taken.",
                checkpoint.display()
            );
            write_notebook(&config, &overview, None, Some(&image))?;
        }
        RunOutcome::Trained(summary) => {
            let history = write_history(&config.experiment, &summary)?;
            let overview = format!(
                "Trained for {} epochs: {} discriminator steps, {} generator steps, {} checkpoint files. Per-round metrics are in `{}`.",
                config.max_epochs,
                summary.disc_steps,
                summary.gen_steps,
                summary.checkpoints.len(),
                history.display()
            );
            let latest = summary
                .samples
                .iter()
                .rev()
                .find(|path| is_fake_grid(path))
                .map(PathBuf::as_path);
            write_notebook(&config, &overview, Some(&summary), latest)?;
        }
    }

    Ok(())
}

fn write_history(dir: &Path, summary: &TrainingSummary) -> Result<PathBuf> {
    let path = dir.join(HISTORY_FILE_NAME);
    let json = serde_json::to_string_pretty(&summary.rounds)
        .context("failed to serialize training history")?;
    fs::write(&path, json)
        .with_context(|| format!("failed to write training history to {}", path.display()))?;

    Ok(path)
}

fn write_notebook(
    config: &TrainingConfig,
    overview: &str,
    summary: Option<&TrainingSummary>,
    latest_sample: Option<&Path>,
) -> Result<()> {
    let mut notebook = Notebook::open_or_create(&config.experiment.join(NOTEBOOK_FILE_NAME))?;
    notebook.fill("overview", overview)?;
    notebook.fill("configuration", &render_configuration(config))?;
    if let Some(summary) = summary {
        notebook.fill("losses", &render_losses(&summary.rounds))?;
    }

    let samples = match latest_sample {
        Some(path) => {
            let caption = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            render_sample(&caption, &png_file_data_url(path)?)
        }
        None => "No sample grid was written in this run.".to_string(),
    };
    notebook.fill("samples", &samples)?;

    notebook.save()
}

fn is_fake_grid(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("fake_samples"))
}
