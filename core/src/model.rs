use burn::{
    module::{Module, Param},
    nn::Linear,
    tensor::{activation::relu, backend::Backend, ElementConversion, Tensor, TensorData},
};
use rand::{rngs::StdRng, Rng};
use rand_distr::StandardNormal;

use crate::config::TrainingConfig;

const INIT_STD: f32 = 0.1;

/// Layer widths shared by both networks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkShape {
    pub sample_dim: usize,
    pub hidden_dim: usize,
    pub latent_dim: usize,
}

impl NetworkShape {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            sample_dim: config.sample_dim(),
            hidden_dim: config.hidden_dim,
            latent_dim: config.nz,
        }
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    hidden: Linear<B>,
    embed: Linear<B>,
}

impl<B: Backend> Encoder<B> {
    fn init(rng: &mut StdRng, device: &B::Device, shape: NetworkShape) -> Self {
        Self {
            hidden: linear_from_rng(rng, device, shape.sample_dim, shape.hidden_dim),
            embed: linear_from_rng(rng, device, shape.hidden_dim, shape.latent_dim),
        }
    }

    pub fn forward(&self, samples: Tensor<B, 2>) -> Tensor<B, 2> {
        self.embed.forward(relu(self.hidden.forward(samples)))
    }

    fn project(self, bound: f64) -> Self {
        Self {
            hidden: clamp_linear(self.hidden, bound),
            embed: clamp_linear(self.embed, bound),
        }
    }

    fn magnitude(&self) -> f32 {
        linear_magnitude(&self.hidden).max(linear_magnitude(&self.embed))
    }
}

#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> Decoder<B> {
    fn init(rng: &mut StdRng, device: &B::Device, shape: NetworkShape) -> Self {
        Self {
            hidden: linear_from_rng(rng, device, shape.latent_dim, shape.hidden_dim),
            output: linear_from_rng(rng, device, shape.hidden_dim, shape.sample_dim),
        }
    }

    pub fn forward(&self, latent: Tensor<B, 2>) -> Tensor<B, 2> {
        self.output
            .forward(relu(self.hidden.forward(latent)))
            .tanh()
    }
}

/// Embedding and reconstruction of one batch.
#[derive(Clone, Debug)]
pub struct FeatureOutput<B: Backend> {
    pub embedding: Tensor<B, 2>,
    pub reconstruction: Tensor<B, 2>,
}

#[derive(Module, Debug)]
pub struct FeatureNetwork<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
}

impl<B: Backend> FeatureNetwork<B> {
    pub fn init(rng: &mut StdRng, device: &B::Device, shape: NetworkShape) -> Self {
        let encoder = Encoder::init(rng, device, shape);
        let decoder = Decoder::init(rng, device, shape);

        Self { encoder, decoder }
    }

    pub fn encode(&self, samples: Tensor<B, 2>) -> Tensor<B, 2> {
        self.encoder.forward(samples)
    }

    pub fn decode(&self, embedding: Tensor<B, 2>) -> Tensor<B, 2> {
        self.decoder.forward(embedding)
    }

    pub fn evaluate(&self, samples: Tensor<B, 2>) -> FeatureOutput<B> {
        let embedding = self.encode(samples);
        let reconstruction = self.decode(embedding.clone());

        FeatureOutput {
            embedding,
            reconstruction,
        }
    }

    /// Clamp every encoder weight and bias into `[-bound, bound]`. The decoder is left alone.
    pub fn project_encoder(self, bound: f64) -> Self {
        Self {
            encoder: self.encoder.project(bound),
            decoder: self.decoder,
        }
    }

    /// Largest absolute value among the encoder parameters.
    pub fn encoder_magnitude(&self) -> f32 {
        self.encoder.magnitude()
    }
}

#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    decoder: Decoder<B>,
}

impl<B: Backend> Generator<B> {
    pub fn init(rng: &mut StdRng, device: &B::Device, shape: NetworkShape) -> Self {
        Self {
            decoder: Decoder::init(rng, device, shape),
        }
    }

    pub fn generate(&self, noise: Tensor<B, 2>) -> Tensor<B, 2> {
        self.decoder.forward(noise)
    }
}

fn linear_from_rng<B: Backend>(
    rng: &mut StdRng,
    device: &B::Device,
    fan_in: usize,
    fan_out: usize,
) -> Linear<B> {
    let weights = (0..fan_in * fan_out)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * INIT_STD)
        .collect::<Vec<_>>();
    let weight = Tensor::<B, 2>::from_floats(TensorData::new(weights, [fan_in, fan_out]), device);
    let bias = Tensor::<B, 1>::zeros([fan_out], device);

    Linear {
        weight: Param::from_tensor(weight),
        bias: Some(Param::from_tensor(bias)),
    }
}

fn clamp_linear<B: Backend>(linear: Linear<B>, bound: f64) -> Linear<B> {
    Linear {
        weight: linear.weight.map(|weight| clamp_tensor(weight, bound)),
        bias: linear
            .bias
            .map(|bias| bias.map(|bias| clamp_tensor(bias, bound))),
    }
}

// The clamped value replaces the parameter as a fresh leaf, so gradients keep
// flowing to it on the next step.
fn clamp_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>, bound: f64) -> Tensor<B, D> {
    let tracked = tensor.is_require_grad();
    tensor
        .clamp(-bound, bound)
        .detach()
        .set_require_grad(tracked)
}

fn linear_magnitude<B: Backend>(linear: &Linear<B>) -> f32 {
    let weight = linear.weight.val().abs().max().into_scalar().elem::<f32>();
    let bias = linear
        .bias
        .as_ref()
        .map(|bias| bias.val().abs().max().into_scalar().elem::<f32>())
        .unwrap_or(0.0);

    weight.max(bias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_candle::{Candle, CandleDevice};

    use crate::rng::seeded_rng;

    type TestBackend = Candle<f32, i64>;

    const SHAPE: NetworkShape = NetworkShape {
        sample_dim: 12,
        hidden_dim: 6,
        latent_dim: 3,
    };

    fn batch(rows: usize, cols: usize, seed: u64) -> Tensor<TestBackend, 2> {
        let mut rng = seeded_rng(seed);
        let values = (0..rows * cols).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f32>>();
        Tensor::from_floats(TensorData::new(values, [rows, cols]), &CandleDevice::Cpu)
    }

    #[test]
    fn feature_network_embeds_and_reconstructs() {
        let network = FeatureNetwork::<TestBackend>::init(&mut seeded_rng(1), &CandleDevice::Cpu, SHAPE);
        let output = network.evaluate(batch(5, SHAPE.sample_dim, 2));

        assert_eq!(output.embedding.dims(), [5, SHAPE.latent_dim]);
        assert_eq!(output.reconstruction.dims(), [5, SHAPE.sample_dim]);
    }

    #[test]
    fn generator_output_stays_in_image_range() {
        let generator = Generator::<TestBackend>::init(&mut seeded_rng(3), &CandleDevice::Cpu, SHAPE);
        let samples = generator.generate(batch(4, SHAPE.latent_dim, 4).mul_scalar(10.0));

        assert_eq!(samples.dims(), [4, SHAPE.sample_dim]);
        let values = samples.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|value| (-1.0..=1.0).contains(value)));
    }

    #[test]
    fn projection_bounds_the_encoder_only() {
        let network = FeatureNetwork::<TestBackend>::init(&mut seeded_rng(5), &CandleDevice::Cpu, SHAPE);
        assert!(network.encoder_magnitude() > 0.01);

        let latent = batch(2, SHAPE.latent_dim, 6);
        let decoded_before = network.decode(latent.clone()).into_data().to_vec::<f32>().unwrap();

        let projected = network.project_encoder(0.01);
        assert!(projected.encoder_magnitude() <= 0.01 + 1e-7);

        let decoded_after = projected.decode(latent).into_data().to_vec::<f32>().unwrap();
        assert_eq!(decoded_before, decoded_after);
    }

    #[test]
    fn initialisation_is_seeded() {
        let device = CandleDevice::Cpu;
        let input = batch(3, SHAPE.latent_dim, 7);

        let a = Generator::<TestBackend>::init(&mut seeded_rng(9), &device, SHAPE)
            .generate(input.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let b = Generator::<TestBackend>::init(&mut seeded_rng(9), &device, SHAPE)
            .generate(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(a, b);
    }
}
