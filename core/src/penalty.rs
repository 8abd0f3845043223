use burn::tensor::{activation::relu, backend::Backend, Tensor};

/// `mean(real) - mean(fake)` over the batch axis, one entry per embedding dimension.
pub fn mean_embedding_gap<B: Backend>(real: Tensor<B, 2>, fake: Tensor<B, 2>) -> Tensor<B, 1> {
    (real.mean_dim(0) - fake.mean_dim(0)).squeeze(0)
}

/// Average amount by which components of `gap` fall below zero.
///
/// Non-negative, and exactly zero when every component is `>= 0`.
pub fn one_sided_violation<B: Backend>(gap: Tensor<B, 1>) -> Tensor<B, 1> {
    relu(gap.neg()).mean()
}

/// The signed term added to both objectives: `-mean(relu(-gap))`.
pub fn one_sided_penalty<B: Backend>(gap: Tensor<B, 1>) -> Tensor<B, 1> {
    one_sided_violation(gap).neg()
}
