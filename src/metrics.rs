//! Fidelity metrics between an original and a watermarked plane.
//!
//! All functions are pure and compare planes of identical dimensions in the
//! 8-bit sample domain (`MAX = 255`).

use serde::Serialize;

use crate::error::{Error, Result};
use crate::plane::{PixelPlane, SAMPLE_MAX};

/// SSIM window side length.
pub const SSIM_WINDOW: usize = 11;
/// Standard deviation of the SSIM Gaussian window.
pub const SSIM_SIGMA: f64 = 1.5;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

/// Distortion of one embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityReport {
    /// Peak signal-to-noise ratio in dB; `+∞` for identical planes.
    pub psnr: f64,
    /// Mean structural similarity in `[-1, 1]`.
    pub ssim: f64,
    /// Mean squared error.
    pub mse: f64,
}

impl QualityReport {
    /// Compute all three metrics for `original` against `distorted`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the planes differ in size.
    pub fn compute(original: &PixelPlane, distorted: &PixelPlane) -> Result<Self> {
        ensure_same_size(original, distorted)?;

        #[cfg(feature = "parallel")]
        let (mse, ssim) = rayon::join(|| mse(original, distorted), || ssim(original, distorted));
        #[cfg(not(feature = "parallel"))]
        let (mse, ssim) = (mse(original, distorted), ssim(original, distorted));

        let mse = mse?;
        Ok(Self {
            psnr: psnr_from_mse(mse),
            ssim: ssim?,
            mse,
        })
    }
}

fn ensure_same_size(a: &PixelPlane, b: &PixelPlane) -> Result<()> {
    if a.dimensions() == b.dimensions() {
        Ok(())
    } else {
        Err(Error::dimension_mismatch(a.dimensions(), b.dimensions()))
    }
}

/// Mean squared per-sample difference. Empty planes have an MSE of 0.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the planes differ in size.
pub fn mse(a: &PixelPlane, b: &PixelPlane) -> Result<f64> {
    ensure_same_size(a, b)?;
    if a.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    Ok(sum / a.as_slice().len() as f64)
}

/// Peak signal-to-noise ratio in dB, `10 * log10(255² / mse)`.
///
/// Returns `f64::INFINITY` when the planes are identical.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the planes differ in size.
pub fn psnr(a: &PixelPlane, b: &PixelPlane) -> Result<f64> {
    mse(a, b).map(psnr_from_mse)
}

fn psnr_from_mse(mse: f64) -> f64 {
    if mse == 0.0 {
        return f64::INFINITY;
    }
    let max = f64::from(SAMPLE_MAX);
    10.0 * (max * max / mse).log10()
}

/// Mean structural similarity over all Gaussian-weighted windows.
///
/// Uses an 11x11 window (σ = 1.5) at every position where it fits entirely
/// inside the plane; planes smaller than the window use a window as large as
/// their smaller dimension. Identical planes score exactly `1.0`.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the planes differ in size.
pub fn ssim(a: &PixelPlane, b: &PixelPlane) -> Result<f64> {
    ensure_same_size(a, b)?;
    if a.is_empty() {
        return Ok(1.0);
    }
    let (width, height) = a.dimensions();
    let window = SSIM_WINDOW.min(width).min(height);
    let kernel = gaussian_kernel(window, SSIM_SIGMA);

    let xs: Vec<f64> = a.as_slice().iter().map(|&v| f64::from(v)).collect();
    let ys: Vec<f64> = b.as_slice().iter().map(|&v| f64::from(v)).collect();
    let xx: Vec<f64> = xs.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = ys.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = xs.iter().zip(&ys).map(|(x, y)| x * y).collect();

    let filter = |data: &[f64]| filter_valid(data, width, height, &kernel);
    let (mu_x, mu_y) = (filter(&xs), filter(&ys));
    let (e_xx, e_yy, e_xy) = (filter(&xx), filter(&yy), filter(&xy));

    let max = f64::from(SAMPLE_MAX);
    let c1 = (SSIM_K1 * max).powi(2);
    let c2 = (SSIM_K2 * max).powi(2);
    let total: f64 = (0..mu_x.len())
        .map(|i| {
            let (mx, my) = (mu_x[i], mu_y[i]);
            let var_x = e_xx[i] - mx * mx;
            let var_y = e_yy[i] - my * my;
            let cov = e_xy[i] - mx * my;
            let numerator = (2.0 * mx * my + c1) * (2.0 * cov + c2);
            let denominator = (mx * mx + my * my + c1) * (var_x + var_y + c2);
            numerator / denominator
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    Ok(total / mu_x.len() as f64)
}

/// Normalised 1-D Gaussian of `size` taps centred on the middle tap.
#[allow(clippy::cast_precision_loss)]
fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f64> {
    let centre = (size as f64 - 1.0) / 2.0;
    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - centre;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}

/// Separable 2-D filtering keeping only positions where the kernel fits.
fn filter_valid(data: &[f64], width: usize, height: usize, kernel: &[f64]) -> Vec<f64> {
    let k = kernel.len();
    let out_w = width + 1 - k;
    let out_h = height + 1 - k;

    let mut rows = vec![0.0; out_w * height];
    for y in 0..height {
        let src = &data[y * width..(y + 1) * width];
        for x in 0..out_w {
            rows[y * out_w + x] = src[x..x + k].iter().zip(kernel).map(|(v, w)| v * w).sum();
        }
    }

    let mut out = vec![0.0; out_w * out_h];
    for y in 0..out_h {
        for x in 0..out_w {
            out[y * out_w + x] = kernel
                .iter()
                .enumerate()
                .map(|(j, w)| rows[(y + j) * out_w + x] * w)
                .sum();
        }
    }
    out
}
