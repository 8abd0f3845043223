//! Regions are delimited by `<!-- region:<name> -->` and `<!-- /region:<name> -->`.

use std::{
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};

use crate::{config::TrainingConfig, metrics::RoundMetrics};

pub const NOTEBOOK_FILE_NAME: &str = "report.md";

/// Rows kept in the loss table; the last round is always included.
const LOSS_TABLE_ROWS: usize = 10;

pub const NOTEBOOK_TEMPLATE: &str = r"# MMD-GAN Run Notebook

<!-- region:overview -->
<!-- /region:overview -->

## Notes

Free-form observations about this run go here.

## Configuration

<!-- region:configuration -->
<!-- /region:configuration -->

## Losses

<!-- region:losses -->
<!-- /region:losses -->

## Samples

<!-- region:samples -->
<!-- /region:samples -->
";

pub struct Notebook {
    path: PathBuf,
    content: String,
}

impl Notebook {
    /// Read the notebook at `path`, creating it from [`NOTEBOOK_TEMPLATE`] first if needed.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            fs::write(path, NOTEBOOK_TEMPLATE)
                .with_context(|| format!("failed to create notebook {}", path.display()))?;
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read notebook {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            content,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Swap the body of region `name` for `body`.
    pub fn fill(&mut self, name: &str, body: &str) -> Result<()> {
        let open = format!("<!-- region:{name} -->");
        let close = format!("<!-- /region:{name} -->");

        let body_start = self
            .content
            .find(&open)
            .map(|index| index + open.len())
            .ok_or_else(|| anyhow!("notebook has no region named {name}"))?;
        let body_end = self.content[body_start..]
            .find(&close)
            .map(|offset| body_start + offset)
            .ok_or_else(|| anyhow!("region {name} is never closed"))?;

        let body = body.trim_matches('\n');
        let replacement = if body.is_empty() {
            "\n".to_string()
        } else {
            format!("\n{body}\n")
        };
        self.content.replace_range(body_start..body_end, &replacement);
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, &self.content)
            .with_context(|| format!("failed to write notebook {}", self.path.display()))
    }
}

pub fn render_configuration(config: &TrainingConfig) -> String {
    let sigmas = config
        .sigmas
        .iter()
        .map(|sigma| sigma.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let device = config
        .gpu_device
        .map_or_else(|| "cpu".to_string(), |index| format!("cuda:{index}"));

    let rows = [
        ("dataset", config.dataset.clone()),
        ("batch size", config.batch_size.to_string()),
        ("latent dim", config.nz.to_string()),
        (
            "image",
            format!("{}x{}x{}", config.nc, config.image_size, config.image_size),
        ),
        ("hidden dim", config.hidden_dim.to_string()),
        ("learning rate", format!("{:e}", config.lr)),
        ("epochs", config.max_epochs.to_string()),
        ("seed", config.seed.to_string()),
        ("device", device),
        ("sigmas", sigmas),
        ("estimator", format!("{:?}", config.estimator).to_lowercase()),
        ("clamp", config.clamp_bound.to_string()),
        (
            "D/G iterations",
            format!("{}/{}", config.d_iters, config.g_iters),
        ),
        (
            "lambda mmd/rg/ae-real/ae-fake",
            format!(
                "{}/{}/{}/{}",
                config.lambda_mmd, config.lambda_rg, config.lambda_ae_real, config.lambda_ae_fake
            ),
        ),
    ];

    let mut out = String::from("| Parameter | Value |\n|---|---|\n");
    for (name, value) in rows {
        let _ = writeln!(out, "| {name} | {value} |");
    }
    out
}

/// A table of evenly spaced rounds; `-` marks a sub-step that did not run.
pub fn render_losses(rounds: &[RoundMetrics]) -> String {
    let Some(last) = rounds.last() else {
        return "No training rounds were recorded in this run.".to_string();
    };

    let stride = rounds.len().div_ceil(LOSS_TABLE_ROWS).max(1);
    let mut picked: Vec<&RoundMetrics> = rounds.iter().step_by(stride).collect();
    if picked.last().map(|round| (round.epoch, round.round)) != Some((last.epoch, last.round)) {
        picked.push(last);
    }

    let mut out = String::from(
        "| Epoch | Round | Gen step | D loss | G loss | MMD² (D) | Penalty (D) |\n|---|---|---|---|---|---|---|\n",
    );
    for round in picked {
        let (loss_d, loss_g) = round.losses();
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            round.epoch,
            round.round,
            round.gen_step,
            cell(loss_d),
            cell(loss_g),
            cell(round.discriminator.map(|stats| stats.mmd2)),
            cell(round.discriminator.map(|stats| stats.penalty)),
        );
    }
    out
}

pub fn render_sample(caption: &str, data_url: &str) -> String {
    format!("![{caption}]({data_url})")
}

fn cell(value: Option<f32>) -> String {
    value.map_or_else(|| "-".to_string(), |value| format!("{value:.5}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{DiscriminatorStats, GeneratorStats};

    fn round(epoch: usize, round: usize, with_generator: bool) -> RoundMetrics {
        RoundMetrics {
            epoch,
            round,
            gen_step: round + 1,
            discriminator: Some(DiscriminatorStats {
                loss: 0.5,
                mmd2: 0.25,
                penalty: -0.1,
                recon_real: 0.01,
                recon_fake: 0.02,
            }),
            generator: with_generator.then_some(GeneratorStats {
                loss: 0.3,
                mmd2: 0.2,
                penalty: -0.05,
            }),
        }
    }

    #[test]
    fn filling_regions_keeps_hand_written_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(NOTEBOOK_FILE_NAME);

        let mut notebook = Notebook::open_or_create(&path).unwrap();
        notebook.fill("overview", "first run").unwrap();
        notebook.save().unwrap();

        let mut notebook = Notebook::open_or_create(&path).unwrap();
        notebook.fill("overview", "\nsecond run\n").unwrap();
        notebook.save().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("<!-- region:overview -->\nsecond run\n<!-- /region:overview -->"));
        assert!(!content.contains("first run"));
        assert!(content.contains("Free-form observations"));
    }

    #[test]
    fn unknown_region_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut notebook = Notebook::open_or_create(&dir.path().join(NOTEBOOK_FILE_NAME)).unwrap();

        assert!(notebook.fill("hypotheses", "x").is_err());
    }

    #[test]
    fn loss_table_marks_skipped_generator_and_keeps_last_round() {
        let mut rounds: Vec<_> = (0..25).map(|index| round(0, index, true)).collect();
        rounds.push(round(1, 0, false));

        let table = render_losses(&rounds);
        let rows: Vec<_> = table.lines().skip(2).collect();

        assert!(rows.len() <= LOSS_TABLE_ROWS + 1);
        assert!(rows[0].starts_with("| 0 | 0 | 1 |"));
        let last = rows.last().unwrap();
        assert!(last.starts_with("| 1 | 0 | 1 | 0.50000 | - |"), "{last}");
    }

    #[test]
    fn configuration_lists_the_device() {
        let config = TrainingConfig {
            gpu_device: Some(1),
            ..TrainingConfig::default()
        };

        let table = render_configuration(&config);

        assert!(table.contains("| device | cuda:1 |"));
        assert!(table.contains("| sigmas | 1, 2, 4, 8, 16 |"));
    }
}
