use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Construct a deterministic RNG from a fixed seed.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Draw `rows * cols` standard normal values in row-major order.
pub fn standard_normal(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<f32> {
    (0..rows * cols)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect()
}

/// Offsets keep the independent random streams of one run apart.
pub(crate) const INIT_STREAM: u64 = 0;
pub(crate) const SHUFFLE_STREAM: u64 = 1;
pub(crate) const NOISE_STREAM: u64 = 2;
pub(crate) const FIXED_NOISE_STREAM: u64 = 3;
pub(crate) const SYNTHETIC_STREAM: u64 = 4;

pub(crate) fn stream_rng(seed: u64, stream: u64) -> StdRng {
    seeded_rng(seed.wrapping_mul(0x9E37_79B9).wrapping_add(stream))
}
