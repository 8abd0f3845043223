use serde::{Deserialize, Serialize};

/// Terms of one discriminator update, read back as scalars.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorStats {
    pub loss: f32,
    /// Raw squared MMD before clamping.
    pub mmd2: f32,
    pub penalty: f32,
    pub recon_real: f32,
    pub recon_fake: f32,
}

/// Terms of one generator update, read back as scalars.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratorStats {
    pub loss: f32,
    pub mmd2: f32,
    pub penalty: f32,
}

/// One alternation of discriminator and generator sub-steps.
///
/// Either side is `None` when the data ran out before it got a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub epoch: usize,
    pub round: usize,
    pub gen_step: usize,
    pub discriminator: Option<DiscriminatorStats>,
    pub generator: Option<GeneratorStats>,
}

impl RoundMetrics {
    pub fn losses(&self) -> (Option<f32>, Option<f32>) {
        (
            self.discriminator.map(|stats| stats.loss),
            self.generator.map(|stats| stats.loss),
        )
    }
}
