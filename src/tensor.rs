//! Image buffers and Arrow extraction utilities.
//!
//! Images travel through the loader as contiguous `f32` buffers in
//! channel-major (`[c, h, w]`) order. An [`ImageBatch`] stacks them into an
//! `[n, c, h, w]` buffer, which is the layout group transformations and
//! image encoders consume.
//!
//! # Example
//!
//! ```
//! use equitune::tensor::{Image, ImageBatch};
//!
//! # fn main() -> equitune::Result<()> {
//! let image = Image::from_vec(vec![1.0, 2.0, 3.0, 4.0], [1, 2, 2])?;
//! let rotated = image.rot90(1);
//! assert_eq!(rotated.as_slice(), &[2.0, 4.0, 1.0, 3.0]);
//!
//! let batch = ImageBatch::from_images(&[image, rotated])?;
//! assert_eq!(batch.shape(), [2, 1, 2, 2]);
//! # Ok(())
//! # }
//! ```

use arrow::{
    array::{Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, UInt8Array},
    datatypes::DataType,
    record_batch::RecordBatch,
};

use crate::error::{Error, Result};

/// A single image stored as `[channels, height, width]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Vec<f32>,
    shape: [usize; 3],
}

impl Image {
    /// Creates a zero-filled image.
    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            data: vec![0.0; shape.iter().product()],
            shape,
        }
    }

    /// Creates an image from an existing buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer length doesn't match the shape.
    pub fn from_vec(data: Vec<f32>, shape: [usize; 3]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::shape(format!(
                "image buffer has {} values, shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self { data, shape })
    }

    /// Returns `[channels, height, width]`.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.shape[0]
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.shape[1]
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.shape[2]
    }

    /// Returns the pixel buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the image and returns its buffer.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Gets the value at `(channel, y, x)`.
    pub fn get(&self, c: usize, y: usize, x: usize) -> Option<f32> {
        let [channels, h, w] = self.shape;
        if c < channels && y < h && x < w {
            Some(self.data[(c * h + y) * w + x])
        } else {
            None
        }
    }

    /// Rotates the image by `k` quarter turns counter-clockwise in the
    /// `(h, w)` plane. Negative `k` rotates clockwise.
    ///
    /// Odd `k` swaps height and width.
    #[must_use]
    pub fn rot90(&self, k: i32) -> Self {
        let k = k.rem_euclid(4);
        let [c, h, w] = self.shape;
        match k {
            0 => self.clone(),
            1 => {
                let mut out = Vec::with_capacity(self.data.len());
                for ch in 0..c {
                    let plane = &self.data[ch * h * w..(ch + 1) * h * w];
                    for i in 0..w {
                        for j in 0..h {
                            out.push(plane[j * w + (w - 1 - i)]);
                        }
                    }
                }
                Self {
                    data: out,
                    shape: [c, w, h],
                }
            }
            2 => {
                let mut out = Vec::with_capacity(self.data.len());
                for ch in 0..c {
                    let plane = &self.data[ch * h * w..(ch + 1) * h * w];
                    for i in 0..h {
                        for j in 0..w {
                            out.push(plane[(h - 1 - i) * w + (w - 1 - j)]);
                        }
                    }
                }
                Self {
                    data: out,
                    shape: [c, h, w],
                }
            }
            _ => {
                let mut out = Vec::with_capacity(self.data.len());
                for ch in 0..c {
                    let plane = &self.data[ch * h * w..(ch + 1) * h * w];
                    for i in 0..w {
                        for j in 0..h {
                            out.push(plane[(h - 1 - j) * w + i]);
                        }
                    }
                }
                Self {
                    data: out,
                    shape: [c, w, h],
                }
            }
        }
    }

    /// Mirrors the image along the width axis.
    #[must_use]
    pub fn flip_horizontal(&self) -> Self {
        let [c, h, w] = self.shape;
        let mut out = Vec::with_capacity(self.data.len());
        for ch in 0..c {
            for y in 0..h {
                let row = &self.data[(ch * h + y) * w..(ch * h + y + 1) * w];
                out.extend(row.iter().rev());
            }
        }
        Self {
            data: out,
            shape: self.shape,
        }
    }
}

/// A stack of equally shaped images stored as `[n, c, h, w]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl ImageBatch {
    /// Creates a batch from an existing buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer length doesn't match the shape.
    pub fn from_vec(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::shape(format!(
                "batch buffer has {} values, shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self { data, shape })
    }

    /// Stacks images into a batch.
    ///
    /// # Errors
    ///
    /// Returns an error if `images` is empty or shapes differ.
    pub fn from_images(images: &[Image]) -> Result<Self> {
        let first = images.first().ok_or(Error::EmptyDataset)?;
        let [c, h, w] = first.shape();
        let mut data = Vec::with_capacity(images.len() * c * h * w);
        for image in images {
            if image.shape() != first.shape() {
                return Err(Error::shape(format!(
                    "cannot stack image of shape {:?} with {:?}",
                    image.shape(),
                    first.shape()
                )));
            }
            data.extend_from_slice(image.as_slice());
        }
        Ok(Self {
            data,
            shape: [images.len(), c, h, w],
        })
    }

    /// Concatenates batches along the leading axis, preserving order.
    ///
    /// # Errors
    ///
    /// Returns an error if `batches` is empty or image shapes differ.
    pub fn concat(batches: &[ImageBatch]) -> Result<Self> {
        let first = batches.first().ok_or(Error::EmptyDataset)?;
        let image_shape = first.image_shape();
        let mut n = 0;
        let mut data = Vec::with_capacity(batches.iter().map(|b| b.data.len()).sum());
        for batch in batches {
            if batch.image_shape() != image_shape {
                return Err(Error::shape(format!(
                    "cannot concatenate batch of images {:?} with {:?}",
                    batch.image_shape(),
                    image_shape
                )));
            }
            n += batch.len();
            data.extend_from_slice(&batch.data);
        }
        let [c, h, w] = image_shape;
        Ok(Self {
            data,
            shape: [n, c, h, w],
        })
    }

    /// Returns `[n, c, h, w]`.
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// Returns the per-image shape `[c, h, w]`.
    pub fn image_shape(&self) -> [usize; 3] {
        [self.shape[1], self.shape[2], self.shape[3]]
    }

    /// Number of images in the batch.
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    /// Returns true if the batch holds no images.
    pub fn is_empty(&self) -> bool {
        self.shape[0] == 0
    }

    /// Number of values per image.
    pub fn image_numel(&self) -> usize {
        self.shape[1] * self.shape[2] * self.shape[3]
    }

    /// Returns the contiguous buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns a copy of the image at `index`.
    pub fn image(&self, index: usize) -> Option<Image> {
        if index >= self.len() {
            return None;
        }
        let numel = self.image_numel();
        Some(Image {
            data: self.data[index * numel..(index + 1) * numel].to_vec(),
            shape: self.image_shape(),
        })
    }

    /// Iterates over copies of the contained images.
    pub fn images(&self) -> impl Iterator<Item = Image> + '_ {
        (0..self.len()).filter_map(move |i| self.image(i))
    }

    /// Applies `f` to every image, producing a new batch.
    ///
    /// # Errors
    ///
    /// Returns an error if `f` changes shapes inconsistently.
    pub fn map_images<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&Image) -> Image,
    {
        if self.is_empty() {
            return Ok(self.clone());
        }
        let mapped: Vec<Image> = self.images().map(|image| f(&image)).collect();
        Self::from_images(&mapped)
    }

    /// Flattens to an `[n, c*h*w]` row-major matrix.
    pub fn to_matrix(&self) -> ndarray::Array2<f32> {
        let rows = self.len();
        let cols = self.image_numel();
        ndarray::Array2::from_shape_vec((rows, cols), self.data.clone())
            .unwrap_or_else(|_| ndarray::Array2::zeros((rows, cols)))
    }
}

/// Extracts a `FixedSizeList<Float32>` image column into an [`ImageBatch`].
///
/// # Errors
///
/// Returns an error if the column is missing, has the wrong type, or its
/// list size does not match `image_shape`.
pub fn extract_images(
    batch: &RecordBatch,
    column: &str,
    image_shape: [usize; 3],
) -> Result<ImageBatch> {
    let col_index = batch
        .schema()
        .index_of(column)
        .map_err(|_| Error::column_not_found(column))?;
    let array = batch
        .column(col_index)
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| Error::data(format!("column '{column}' is not a fixed-size list")))?;

    let numel: usize = image_shape.iter().product();
    let list_size = usize::try_from(array.value_length()).unwrap_or(0);
    if list_size != numel {
        return Err(Error::shape(format!(
            "column '{column}' holds {list_size} values per row, shape {image_shape:?} needs {numel}"
        )));
    }

    let mut data = Vec::with_capacity(array.len() * numel);
    for row in 0..array.len() {
        let values = array.value(row);
        let values = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| Error::data(format!("column '{column}' values are not Float32")))?;
        data.extend_from_slice(values.values());
    }
    let [c, h, w] = image_shape;
    ImageBatch::from_vec(data, [array.len(), c, h, w])
}

/// Extracts a label column as class indices.
///
/// # Errors
///
/// Returns an error if the column doesn't exist, is not an integer column,
/// or contains nulls or negative values.
pub fn extract_labels(batch: &RecordBatch, column: &str) -> Result<Vec<usize>> {
    let col_index = batch
        .schema()
        .index_of(column)
        .map_err(|_| Error::column_not_found(column))?;

    let array = batch.column(col_index);
    if array.null_count() > 0 {
        return Err(Error::data(format!("label column '{column}' contains nulls")));
    }

    let to_index = |v: i64| {
        usize::try_from(v).map_err(|_| Error::data(format!("negative label {v} in '{column}'")))
    };

    match array.data_type() {
        DataType::Int32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| Error::data("Failed to downcast to Int32Array"))?;
            arr.values().iter().map(|&v| to_index(i64::from(v))).collect()
        }
        DataType::Int64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| Error::data("Failed to downcast to Int64Array"))?;
            arr.values().iter().map(|&v| to_index(v)).collect()
        }
        DataType::UInt8 => {
            let arr = array
                .as_any()
                .downcast_ref::<UInt8Array>()
                .ok_or_else(|| Error::data("Failed to downcast to UInt8Array"))?;
            Ok(arr.values().iter().map(|&v| usize::from(v)).collect())
        }
        dt => Err(Error::data(format!("Cannot extract labels from {:?}", dt))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::{Field, Schema};

    use super::*;

    fn ramp(shape: [usize; 3]) -> Image {
        let n: usize = shape.iter().product();
        Image::from_vec((0..n).map(|v| v as f32).collect(), shape).unwrap()
    }

    #[test]
    fn test_image_from_vec_invalid_shape() {
        assert!(Image::from_vec(vec![1.0; 5], [1, 2, 2]).is_err());
    }

    #[test]
    fn test_rot90_matches_quarter_turn() {
        // [[1, 2], [3, 4]] -> [[2, 4], [1, 3]]
        let image = Image::from_vec(vec![1.0, 2.0, 3.0, 4.0], [1, 2, 2]).unwrap();
        assert_eq!(image.rot90(1).as_slice(), &[2.0, 4.0, 1.0, 3.0]);
        assert_eq!(image.rot90(2).as_slice(), &[4.0, 3.0, 2.0, 1.0]);
        assert_eq!(image.rot90(3).as_slice(), &[3.0, 1.0, 4.0, 2.0]);
        assert_eq!(image.rot90(-1), image.rot90(3));
    }

    #[test]
    fn test_rot90_four_turns_is_identity() {
        let image = ramp([3, 4, 4]);
        let mut rotated = image.clone();
        for _ in 0..4 {
            rotated = rotated.rot90(1);
        }
        assert_eq!(rotated, image);
    }

    #[test]
    fn test_rot90_non_square_swaps_dims() {
        let image = ramp([1, 2, 3]);
        let rotated = image.rot90(1);
        assert_eq!(rotated.shape(), [1, 3, 2]);
        // top-left of the result is the top-right of the source
        assert_eq!(rotated.get(0, 0, 0), image.get(0, 0, 2));
        assert_eq!(rotated.rot90(3), image);
    }

    #[test]
    fn test_flip_horizontal_twice_is_identity() {
        let image = ramp([2, 3, 5]);
        let flipped = image.flip_horizontal();
        assert_eq!(flipped.get(1, 2, 0), image.get(1, 2, 4));
        assert_eq!(flipped.flip_horizontal(), image);
    }

    #[test]
    fn test_batch_from_images_and_back() {
        let a = ramp([1, 2, 2]);
        let b = a.rot90(1);
        let batch = ImageBatch::from_images(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(batch.shape(), [2, 1, 2, 2]);
        assert_eq!(batch.image(0).unwrap(), a);
        assert_eq!(batch.image(1).unwrap(), b);
        assert!(batch.image(2).is_none());
    }

    #[test]
    fn test_batch_rejects_mixed_shapes() {
        let result = ImageBatch::from_images(&[ramp([1, 2, 2]), ramp([1, 3, 3])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_concat_preserves_order() {
        let a = ImageBatch::from_images(&[ramp([1, 2, 2])]).unwrap();
        let b = a.map_images(|img| img.rot90(2)).unwrap();
        let joined = ImageBatch::concat(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.image(0), a.image(0));
        assert_eq!(joined.image(1), b.image(0));
    }

    #[test]
    fn test_to_matrix_flattens_rows() {
        let batch = ImageBatch::from_images(&[ramp([1, 2, 2]), ramp([1, 2, 2])]).unwrap();
        let m = batch.to_matrix();
        assert_eq!(m.dim(), (2, 4));
        assert_eq!(m[[1, 3]], 3.0);
    }

    #[test]
    fn test_extract_images_and_labels() {
        let values = Float32Array::from((0..8).map(|v| v as f32).collect::<Vec<_>>());
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let images = FixedSizeListArray::new(field.clone(), 4, Arc::new(values), None);
        let schema = Arc::new(Schema::new(vec![
            Field::new("image", DataType::FixedSizeList(field, 4), false),
            Field::new("label", DataType::Int32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(images), Arc::new(Int32Array::from(vec![3, 1]))],
        )
        .unwrap();

        let extracted = extract_images(&batch, "image", [1, 2, 2]).unwrap();
        assert_eq!(extracted.shape(), [2, 1, 2, 2]);
        assert_eq!(extracted.image(1).unwrap().as_slice(), &[4.0, 5.0, 6.0, 7.0]);

        let sliced = extract_images(&batch.slice(1, 1), "image", [1, 2, 2]).unwrap();
        assert_eq!(sliced.as_slice(), &[4.0, 5.0, 6.0, 7.0]);

        assert_eq!(extract_labels(&batch, "label").unwrap(), vec![3, 1]);
        assert!(extract_labels(&batch, "missing").is_err());
        assert!(extract_images(&batch, "image", [1, 3, 3]).is_err());
    }

    #[test]
    fn test_extract_labels_rejects_negative() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "label",
            DataType::Int64,
            false,
        )]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![0i64, -2]))])
                .unwrap();
        assert!(extract_labels(&batch, "label").is_err());
    }
}
