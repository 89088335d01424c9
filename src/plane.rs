//! Single-channel sample planes.

use image::{GrayImage, Luma};

use crate::error::{Error, Result};

/// Maximum sample value of the 8-bit intensity domain.
pub const SAMPLE_MAX: f32 = 255.0;

/// A `width x height` grid of intensity samples, row-major.
///
/// Samples are `f32` so that wavelet coefficients and intermediate results can
/// share the type; planes built from images hold values in `[0, 255]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelPlane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl PixelPlane {
    /// Create a zero-filled plane.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlane`] if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::InvalidPlane {
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a plane by evaluating `f(x, y)` for every sample.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Convert an 8-bit grayscale image into a plane.
    #[must_use]
    pub fn from_luma(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.pixels().map(|p| f32::from(p[0])).collect(),
        }
    }

    /// Round and clamp every sample into an 8-bit grayscale image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let v = self.get(x as usize, y as usize);
            Luma([v.round().clamp(0.0, SAMPLE_MAX) as u8])
        })
    }

    /// Copy of this plane rounded and clamped to the 8-bit sample domain.
    #[must_use]
    pub fn quantized(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .map(|v| v.round().clamp(0.0, SAMPLE_MAX))
                .collect(),
        }
    }

    /// Copy of this plane with every sample limited to `[low, high]`.
    ///
    /// An inverted range collapses every sample to `low`.
    #[must_use]
    pub fn clamped(&self, low: f32, high: f32) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|v| v.min(high).max(low)).collect(),
        }
    }

    /// Plane width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Plane height.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Whether the plane has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x]
    }

    /// Overwrite the sample at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x] = value;
    }

    /// Row-major samples.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// One row of samples.
    #[must_use]
    pub fn row(&self, y: usize) -> &[f32] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub(crate) fn row_mut(&mut self, y: usize) -> &mut [f32] {
        &mut self.data[y * self.width..(y + 1) * self.width]
    }

    /// Extend odd dimensions to even ones by repeating the last column/row.
    ///
    /// Returns the padded plane and the number of columns and rows added.
    pub(crate) fn mirror_to_even(&self) -> (Self, usize, usize) {
        let pad_x = self.width % 2;
        let pad_y = self.height % 2;
        if pad_x == 0 && pad_y == 0 {
            return (self.clone(), 0, 0);
        }
        let padded = Self::from_fn(self.width + pad_x, self.height + pad_y, |x, y| {
            self.get(x.min(self.width - 1), y.min(self.height - 1))
        });
        (padded, pad_x, pad_y)
    }

    /// Top-left `width x height` region.
    pub(crate) fn cropped(&self, width: usize, height: usize) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        Self::from_fn(width, height, |x, y| self.get(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = PixelPlane::from_vec(4, 4, vec![0.0; 15]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidPlane {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn luma_conversion_round_trips() {
        let img = GrayImage::from_fn(7, 5, |x, y| Luma([(x * 30 + y) as u8]));
        let plane = PixelPlane::from_luma(&img);
        assert_eq!(plane.dimensions(), (7, 5));
        assert!((plane.get(3, 2) - 92.0).abs() < f32::EPSILON);
        assert_eq!(plane.to_luma(), img);
    }

    #[test]
    fn to_luma_rounds_and_clamps() {
        let plane = PixelPlane::from_vec(3, 1, vec![-4.0, 127.6, 300.0]).unwrap();
        let img = plane.to_luma();
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(1, 0)[0], 128);
        assert_eq!(img.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn clamped_limits_both_ends() {
        let plane = PixelPlane::from_vec(4, 1, vec![0.0, 3.0, 200.0, 255.0]).unwrap();
        let limited = plane.clamped(4.0, 251.0);
        assert_eq!(limited.as_slice(), &[4.0, 4.0, 200.0, 251.0]);
        assert_eq!(plane.clamped(0.0, SAMPLE_MAX), plane);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn mirror_padding_repeats_boundary() {
        let plane = PixelPlane::from_fn(3, 3, |x, y| (y * 3 + x) as f32);
        let (padded, px, py) = plane.mirror_to_even();
        assert_eq!((px, py), (1, 1));
        assert_eq!(padded.dimensions(), (4, 4));
        assert!((padded.get(3, 1) - plane.get(2, 1)).abs() < f32::EPSILON);
        assert!((padded.get(1, 3) - plane.get(1, 2)).abs() < f32::EPSILON);
        assert_eq!(padded.cropped(3, 3), plane);
    }

    #[test]
    fn even_plane_needs_no_padding() {
        let plane = PixelPlane::new(4, 6);
        let (padded, px, py) = plane.mirror_to_even();
        assert_eq!((px, py), (0, 0));
        assert_eq!(padded, plane);
    }
}
