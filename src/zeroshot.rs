//! Zero-shot class embedding matrix.
//!
//! For every class, each prompt template is rendered and encoded, the
//! embeddings are L2-normalized and averaged, and the mean is normalized
//! again. The per-class vectors form the columns of an `[embed_dim,
//! num_classes]` matrix that maps normalized image features to logits. The
//! matrix is never updated by training.

use ndarray::{Array1, Array2, Axis};

use crate::{
    autograd::Tensor,
    encoder::TextEncoder,
    error::{Error, Result},
    prompts::{render_template, TextPrompts},
};

/// `[embed_dim, num_classes]` matrix with one unit-norm column per class.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroShotWeights {
    matrix: Array2<f32>,
}

impl ZeroShotWeights {
    /// Builds the matrix from class names and prompt templates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if there are no classes or no
    /// templates.
    pub fn build<E: TextEncoder + ?Sized>(
        encoder: &E,
        classes: &[&str],
        templates: &[&str],
    ) -> Result<Self> {
        if classes.is_empty() || templates.is_empty() {
            return Err(Error::invalid_config(
                "zero-shot weights need at least one class and one template",
            ));
        }

        let dim = encoder.embed_dim();
        let mut matrix = Array2::zeros((dim, classes.len()));
        for (col, class) in classes.iter().enumerate() {
            let mut mean = Array1::<f32>::zeros(dim);
            for template in templates {
                let embedding = Array1::from(encoder.encode_text(&render_template(template, class)));
                if embedding.len() != dim {
                    return Err(Error::shape(format!(
                        "text encoder returned {} values, expected {dim}",
                        embedding.len()
                    )));
                }
                mean += &normalized(embedding);
            }
            matrix.column_mut(col).assign(&normalized(mean));
        }
        Ok(Self { matrix })
    }

    /// Builds the matrix for a dataset's prompt set.
    ///
    /// # Errors
    ///
    /// See [`ZeroShotWeights::build`].
    pub fn from_prompts<E: TextEncoder + ?Sized>(encoder: &E, prompts: &TextPrompts) -> Result<Self> {
        Self::build(encoder, prompts.classes, prompts.templates)
    }

    /// Wraps an existing matrix, normalizing its columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a matrix without columns.
    pub fn from_matrix(matrix: Array2<f32>) -> Result<Self> {
        if matrix.ncols() == 0 || matrix.nrows() == 0 {
            return Err(Error::invalid_config("zero-shot matrix is empty"));
        }
        let mut matrix = matrix;
        for mut column in matrix.axis_iter_mut(Axis(1)) {
            let norm = column.dot(&column).sqrt();
            if norm > 0.0 {
                column.mapv_inplace(|v| v / norm);
            }
        }
        Ok(Self { matrix })
    }

    /// The raw matrix.
    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    /// Feature width.
    pub fn embed_dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.matrix.ncols()
    }

    /// The matrix as a constant tape tensor.
    pub fn as_tensor(&self) -> Tensor {
        Tensor::new(self.matrix.clone(), false)
    }
}

fn normalized(v: Array1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt();
    if norm > 0.0 {
        v / norm
    } else {
        v
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;
    use crate::{datasets::DatasetName, encoder::HashedTextEncoder, prompts::get_labels_textprompts};

    #[test]
    fn test_columns_are_unit_norm() {
        let encoder = HashedTextEncoder::new(32, 0);
        let prompts = get_labels_textprompts(DatasetName::Mnist);
        let weights = ZeroShotWeights::from_prompts(&encoder, &prompts).unwrap();
        assert_eq!(weights.matrix().dim(), (32, 10));
        for column in weights.matrix().columns() {
            assert_abs_diff_eq!(column.dot(&column), 1.0, epsilon = 1e-5);
        }
        assert!(!weights.as_tensor().requires_grad());
    }

    #[test]
    fn test_classes_get_distinct_columns() {
        let encoder = HashedTextEncoder::new(32, 0);
        let weights = ZeroShotWeights::build(&encoder, &["cat", "dog"], &["a photo of a {}."]).unwrap();
        let m = weights.matrix();
        assert_ne!(m.column(0), m.column(1));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let encoder = HashedTextEncoder::new(8, 0);
        assert!(ZeroShotWeights::build(&encoder, &[], &["{}"]).is_err());
        assert!(ZeroShotWeights::build(&encoder, &["cat"], &[]).is_err());
    }

    #[test]
    fn test_from_matrix_normalizes() {
        let weights = ZeroShotWeights::from_matrix(array![[3.0, 0.0], [4.0, 2.0]]).unwrap();
        assert_abs_diff_eq!(weights.matrix()[[0, 0]], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(weights.matrix()[[1, 1]], 1.0, epsilon = 1e-6);
        assert_eq!(weights.num_classes(), 2);
    }
}
