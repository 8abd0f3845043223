use std::{env, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context, Result};

use crate::config::ConfigOverrides;

pub const USAGE: &str = "\
Usage: mmd-gan [OPTIONS]

Options override values from <experiment>/config.json for this run.

  --dataset <ID>        mnist, synthetic, synthetic:<count>, or an image folder
  --batch-size <N>      samples per batch
  --workers <N>         data decoding threads
  --nz <N>              latent and embedding dimension
  --image-size <N>      image side length
  --nc <N>              image channels (1 or 3)
  --lr <RATE>           RMSprop learning rate
  --max-epochs <N>      number of epochs
  --experiment <DIR>    output directory
  --gpu-device <INDEX>  CUDA device (requires the cuda feature)
  --seed <N>            random seed
  -h, --help            print this message";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunArgs {
    overrides: ConfigOverrides,
    help_requested: bool,
}

impl RunArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            if arg == "--help" || arg == "-h" {
                parsed.help_requested = true;
                continue;
            }

            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            if !flag.starts_with("--") {
                return Err(anyhow!("unexpected argument: {}", flag));
            }

            let value = match inline {
                Some(value) => value,
                None => iter
                    .next()
                    .ok_or_else(|| anyhow!("expected value after {}", flag))?,
            };
            parsed.set(&flag, &value)?;
        }

        Ok(parsed)
    }

    fn set(&mut self, flag: &str, value: &str) -> Result<()> {
        let overrides = &mut self.overrides;
        match flag {
            "--dataset" => overrides.dataset = Some(value.to_string()),
            "--batch-size" => overrides.batch_size = Some(number(flag, value)?),
            "--workers" => overrides.workers = Some(number(flag, value)?),
            "--nz" => overrides.nz = Some(number(flag, value)?),
            "--image-size" => overrides.image_size = Some(number(flag, value)?),
            "--nc" => overrides.nc = Some(number(flag, value)?),
            "--lr" => overrides.lr = Some(number(flag, value)?),
            "--max-epochs" => overrides.max_epochs = Some(number(flag, value)?),
            "--experiment" => overrides.experiment = Some(PathBuf::from(value)),
            "--gpu-device" => overrides.gpu_device = Some(number(flag, value)?),
            "--seed" => overrides.seed = Some(number(flag, value)?),
            other => return Err(anyhow!("unexpected argument: {}", other)),
        }
        Ok(())
    }

    pub fn help_requested(&self) -> bool {
        self.help_requested
    }

    pub fn overrides(&self) -> &ConfigOverrides {
        &self.overrides
    }
}

fn number<T>(flag: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value for {}: {}", flag, value))
}
