//! CLIP-style image preprocessing.
//!
//! Every image is resized so its shorter side equals the target size,
//! center-cropped to a square, converted to RGB and normalized per channel.
//! Grayscale sources (MNIST) are replicated across the three channels.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};

use crate::{
    error::{Error, Result},
    tensor::Image,
};

/// Per-channel mean used by CLIP.
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
/// Per-channel standard deviation used by CLIP.
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Resize, center-crop and normalize to a `[3, size, size]` image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocess {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocess {
    /// CLIP normalization at `size` x `size`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero or oversized `size`.
    pub fn clip(size: usize) -> Result<Self> {
        Self::new(size, CLIP_MEAN, CLIP_STD)
    }

    /// Custom normalization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero or oversized `size`, or a
    /// non-positive standard deviation.
    pub fn new(size: usize, mean: [f32; 3], std: [f32; 3]) -> Result<Self> {
        let size = u32::try_from(size)
            .ok()
            .filter(|&s| s > 0)
            .ok_or_else(|| Error::invalid_config(format!("invalid image size {size}")))?;
        if std.iter().any(|&s| s <= 0.0) {
            return Err(Error::invalid_config("normalization std must be > 0"));
        }
        Ok(Self { size, mean, std })
    }

    /// Side length of the output.
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Shape of every output image.
    pub fn output_shape(&self) -> [usize; 3] {
        [3, self.size(), self.size()]
    }

    /// Preprocesses a decoded image.
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be packed into an [`Image`].
    pub fn apply(&self, image: &DynamicImage) -> Result<Image> {
        let (w, h) = (image.width(), image.height());
        let rgb = if w == self.size && h == self.size {
            image.to_rgb8()
        } else {
            image
                .resize_to_fill(self.size, self.size, FilterType::CatmullRom)
                .to_rgb8()
        };

        let side = self.size();
        let plane = side * side;
        let mut values = vec![0.0f32; 3 * plane];
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                values[c * plane + i] = (f32::from(pixel[c]) / 255.0 - self.mean[c]) / self.std[c];
            }
        }
        Image::from_vec(values, self.output_shape())
    }

    /// Preprocesses a row-major 8-bit grayscale buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `pixels` is not `width * height`
    /// bytes.
    pub fn gray(&self, pixels: &[u8], width: u32, height: u32) -> Result<Image> {
        let mismatch = || {
            Error::shape(format!(
                "{} bytes do not form a {width}x{height} grayscale image",
                pixels.len()
            ))
        };
        if pixels.len() != (width as usize) * (height as usize) {
            return Err(mismatch());
        }
        let buffer = GrayImage::from_raw(width, height, pixels.to_vec()).ok_or_else(mismatch)?;
        self.apply(&DynamicImage::ImageLuma8(buffer))
    }

    /// Preprocesses a channel-planar 8-bit RGB buffer (all red, then all
    /// green, then all blue).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `planes` is not `3 * width *
    /// height` bytes.
    pub fn rgb_planar(&self, planes: &[u8], width: u32, height: u32) -> Result<Image> {
        let plane = (width as usize) * (height as usize);
        if planes.len() != 3 * plane {
            return Err(Error::shape(format!(
                "{} bytes do not form a planar {width}x{height} RGB image",
                planes.len()
            )));
        }
        let interleaved: Vec<u8> = (0..plane)
            .flat_map(|i| [planes[i], planes[plane + i], planes[2 * plane + i]])
            .collect();
        let buffer = RgbImage::from_raw(width, height, interleaved)
            .ok_or_else(|| Error::shape("planar RGB buffer has the wrong size"))?;
        self.apply(&DynamicImage::ImageRgb8(buffer))
    }

    /// Decodes and preprocesses the image file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for unreadable files and [`Error::Image`] for
    /// undecodable ones.
    pub fn load(&self, path: &Path) -> Result<Image> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(e, path))?;
        self.apply(&image::load_from_memory(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_gray_replicates_channels() {
        let pre = Preprocess::new(2, [0.0; 3], [1.0; 3]).unwrap();
        let image = pre.gray(&[0, 255, 255, 0], 2, 2).unwrap();
        assert_eq!(image.shape(), [3, 2, 2]);
        for c in 0..3 {
            assert_abs_diff_eq!(image.get(c, 0, 1).unwrap(), 1.0);
            assert_abs_diff_eq!(image.get(c, 1, 1).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_clip_normalization() {
        let pre = Preprocess::clip(1).unwrap();
        let image = pre.rgb_planar(&[255, 0, 0], 1, 1).unwrap();
        assert_abs_diff_eq!(
            image.get(0, 0, 0).unwrap(),
            (1.0 - CLIP_MEAN[0]) / CLIP_STD[0],
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(
            image.get(2, 0, 0).unwrap(),
            -CLIP_MEAN[2] / CLIP_STD[2],
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_resize_to_target() {
        let pre = Preprocess::clip(4).unwrap();
        let image = pre.gray(&[128; 6 * 10], 10, 6).unwrap();
        assert_eq!(image.shape(), [3, 4, 4]);
    }

    #[test]
    fn test_wrong_buffer_size() {
        let pre = Preprocess::clip(4).unwrap();
        assert!(matches!(
            pre.gray(&[0; 5], 2, 2),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            pre.gray(&[0; 3], 2, 2),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(pre.gray(&[0; 4], 2, 2).is_ok());
        assert!(pre.rgb_planar(&[0; 5], 1, 1).is_err());
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            Preprocess::clip(0),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_load_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        GrayImage::from_raw(3, 3, vec![200; 9])
            .unwrap()
            .save(&path)
            .unwrap();
        let image = Preprocess::new(3, [0.0; 3], [1.0; 3])
            .unwrap()
            .load(&path)
            .unwrap();
        assert_abs_diff_eq!(image.get(1, 2, 2).unwrap(), 200.0 / 255.0, epsilon = 1e-6);
    }

    #[test]
    fn test_load_missing_file() {
        let pre = Preprocess::clip(4).unwrap();
        assert!(matches!(
            pre.load(Path::new("/nonexistent/x.jpg")),
            Err(Error::Io { .. })
        ));
    }
}
