//! Image and text encoders.
//!
//! [`ImageEncoder`] is the trainable side: it maps an [`ImageBatch`] to a
//! `[n, embed_dim]` feature tensor on the autograd tape and exposes its
//! parameters to the optimizer. [`TextEncoder`] is frozen and only used to
//! build zero-shot class embeddings.

use ndarray::Array2;
use rand::{Rng, SeedableRng};

use crate::{
    autograd::{add_bias, matmul, Tensor},
    error::{Error, Result},
    tensor::ImageBatch,
};

/// Trainable image encoder.
pub trait ImageEncoder {
    /// Encodes every image of `images` into one feature row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the images don't have the shape
    /// the encoder expects.
    fn encode_image(&self, images: &ImageBatch) -> Result<Tensor>;

    /// Trainable parameters, sharing storage with the encoder.
    fn parameters(&self) -> Vec<Tensor>;

    /// Width of the feature rows.
    fn embed_dim(&self) -> usize;
}

/// Affine projection of flattened pixels: `features = x W + b`.
#[derive(Debug, Clone)]
pub struct LinearImageEncoder {
    weight: Tensor,
    bias: Tensor,
    image_shape: [usize; 3],
}

impl LinearImageEncoder {
    /// Creates an encoder with uniform `±1/sqrt(fan_in)` weights.
    pub fn new(image_shape: [usize; 3], embed_dim: usize, seed: u64) -> Self {
        let fan_in: usize = image_shape.iter().product();
        #[allow(clippy::cast_precision_loss)]
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let weight = Array2::from_shape_fn((fan_in, embed_dim), |_| rng.gen_range(-bound..=bound));
        Self {
            weight: Tensor::new(weight, true),
            bias: Tensor::zeros(1, embed_dim, true),
            image_shape,
        }
    }

    /// Per-image shape the encoder accepts.
    pub fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }

    /// The `[c*h*w, embed_dim]` weight.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

impl ImageEncoder for LinearImageEncoder {
    fn encode_image(&self, images: &ImageBatch) -> Result<Tensor> {
        if images.image_shape() != self.image_shape {
            return Err(Error::shape(format!(
                "encoder expects images of shape {:?}, got {:?}",
                self.image_shape,
                images.image_shape()
            )));
        }
        let pixels = Tensor::new(images.to_matrix(), false);
        add_bias(&matmul(&pixels, &self.weight)?, &self.bias)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn embed_dim(&self) -> usize {
        self.bias.cols()
    }
}

/// Frozen text encoder.
pub trait TextEncoder {
    /// Embeds `text` into a `embed_dim` vector.
    fn encode_text(&self, text: &str) -> Vec<f32>;

    /// Width of the embeddings.
    fn embed_dim(&self) -> usize;
}

/// Deterministic hashed bag-of-words projection.
///
/// Every lowercase alphanumeric token is hashed to a seed that generates a
/// fixed random direction; a text embeds to the sum of its token directions.
/// Texts sharing words land close together, which is all zero-shot
/// classification needs when no pretrained text tower is available.
#[derive(Debug, Clone, Copy)]
pub struct HashedTextEncoder {
    embed_dim: usize,
    seed: u64,
}

impl HashedTextEncoder {
    /// Creates an encoder producing `embed_dim`-wide vectors.
    pub fn new(embed_dim: usize, seed: u64) -> Self {
        Self { embed_dim, seed }
    }

    fn token_hash(&self, token: &str) -> u64 {
        // FNV-1a
        token.bytes().fold(0xcbf2_9ce4_8422_2325 ^ self.seed, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        })
    }
}

impl TextEncoder for HashedTextEncoder {
    fn encode_text(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0; self.embed_dim];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.token_hash(token));
            for value in &mut out {
                *value += rng.gen_range(-1.0f32..1.0);
            }
        }
        out
    }

    fn embed_dim(&self) -> usize {
        self.embed_dim
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::autograd::backward;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[test]
    fn test_linear_encoder_shapes() {
        let encoder = LinearImageEncoder::new([1, 2, 2], 8, 0);
        let batch = ImageBatch::from_vec(vec![0.5; 12], [3, 1, 2, 2]).unwrap();
        let features = encoder.encode_image(&batch).unwrap();
        assert_eq!(features.shape(), (3, 8));
        assert_eq!(encoder.embed_dim(), 8);
        assert_eq!(encoder.parameters().len(), 2);
    }

    #[test]
    fn test_linear_encoder_rejects_wrong_shape() {
        let encoder = LinearImageEncoder::new([1, 2, 2], 4, 0);
        let batch = ImageBatch::from_vec(vec![0.0; 9], [1, 1, 3, 3]).unwrap();
        assert!(matches!(
            encoder.encode_image(&batch),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_parameters_receive_gradients() {
        let encoder = LinearImageEncoder::new([1, 1, 2], 3, 1);
        let batch = ImageBatch::from_vec(vec![1.0, 2.0], [1, 1, 1, 2]).unwrap();
        let features = encoder.encode_image(&batch).unwrap();
        backward(&features, None);
        for param in encoder.parameters() {
            assert!(param.grad().is_some());
        }
        // the shared weight handle sees the gradient too
        assert!(encoder.weight().grad().is_some());
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = LinearImageEncoder::new([1, 2, 2], 4, 9);
        let b = LinearImageEncoder::new([1, 2, 2], 4, 9);
        assert_eq!(*a.weight().data(), *b.weight().data());
    }

    #[test]
    fn test_hashed_text_encoder() {
        let encoder = HashedTextEncoder::new(64, 0);
        let a = encoder.encode_text("a photo of a cat.");
        let b = encoder.encode_text("A photo of a CAT");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = encoder.encode_text("a photo of a dog.");
        let d = encoder.encode_text("quantum chromodynamics");
        assert!(cosine(&a, &c) > cosine(&a, &d));
    }
}
