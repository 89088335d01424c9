//! Coefficient-domain embedding.
//!
//! A pattern is scaled to a zero-mean signed range and added to one detail
//! subband, anchored at the subband origin:
//!
//! ```text
//! v(x, y)     = p(x, y) / 255 - mean(p / 255)
//! c'(x, y)    = c(x, y) + strength * 255 * v(x, y)
//! ```
//!
//! Subtracting the original coefficients therefore recovers `v` exactly.
//!
//! Host samples near black or white would clip once the pattern is added, so
//! the host is first pulled into `[h, 255 - h]` with
//! `h = WatermarkConfig::headroom()`. Extraction applies the same clamp to the
//! original before comparing.

use tracing::debug;

use crate::config::WatermarkConfig;
use crate::error::{Error, Result};
use crate::payload::WatermarkPattern;
use crate::plane::{PixelPlane, SAMPLE_MAX};
use crate::wavelet::{DetailBand, SubbandSet};

/// Adds a pattern to one detail subband of a decomposition.
#[derive(Debug, Clone, Copy)]
pub struct Embedder {
    level: usize,
    strength: f32,
    band: DetailBand,
    headroom: f32,
}

impl Embedder {
    /// Create an embedder for `config`'s level, strength and band.
    #[must_use]
    pub fn new(config: &WatermarkConfig) -> Self {
        Self {
            level: config.level,
            strength: config.strength,
            band: config.band,
            headroom: config.headroom(),
        }
    }

    /// Clamp `host` into the range the pattern can be added to without
    /// saturating.
    ///
    /// Samples already inside `[headroom, 255 - headroom]` are unchanged.
    #[must_use]
    pub fn reserve_headroom(&self, host: &PixelPlane) -> PixelPlane {
        host.clamped(self.headroom, SAMPLE_MAX - self.headroom)
    }

    /// Return a copy of `subbands` with `pattern` added to the selected band.
    ///
    /// `subbands` is not modified.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the embedder's level is not present in
    ///   `subbands`.
    /// - [`Error::PatternTooLarge`] if `pattern` exceeds the selected band.
    pub fn apply(
        &self,
        subbands: &[SubbandSet],
        pattern: &WatermarkPattern,
    ) -> Result<Vec<SubbandSet>> {
        if self.level == 0 || self.level > subbands.len() {
            return Err(Error::InvalidConfig(format!(
                "level {} is not in a {}-level decomposition",
                self.level,
                subbands.len()
            )));
        }
        let target = subbands[self.level - 1].detail(self.band);
        let (band_width, band_height) = target.dimensions();
        let (pattern_width, pattern_height) = pattern.dimensions();
        if pattern_width > band_width || pattern_height > band_height {
            return Err(Error::PatternTooLarge {
                pattern_width,
                pattern_height,
                band_width,
                band_height,
            });
        }

        let signal = normalize_pattern(pattern);
        let gain = self.strength * SAMPLE_MAX;
        let mut out = subbands.to_vec();
        let band = out[self.level - 1].detail_mut(self.band);
        for y in 0..pattern_height {
            let offsets = signal.row(y);
            for (coefficient, v) in band.row_mut(y).iter_mut().zip(offsets) {
                *coefficient += gain * v;
            }
        }
        debug!(
            level = self.level,
            band = %self.band,
            strength = self.strength,
            pattern_width,
            pattern_height,
            "pattern embedded"
        );
        Ok(out)
    }
}

/// Map a pattern onto the zero-mean range `[-1, 1]`.
#[must_use]
pub fn normalize_pattern(pattern: &WatermarkPattern) -> PixelPlane {
    let plane = PixelPlane::from_luma(pattern.image());
    if plane.is_empty() {
        return plane;
    }
    let scaled: Vec<f32> = plane.as_slice().iter().map(|p| p / SAMPLE_MAX).collect();
    #[allow(clippy::cast_precision_loss)]
    let mean = scaled.iter().map(|&v| f64::from(v)).sum::<f64>() / scaled.len() as f64;
    #[allow(clippy::cast_possible_truncation)]
    let mean = mean as f32;
    PixelPlane::from_fn(plane.width(), plane.height(), |x, y| {
        scaled[y * plane.width() + x] - mean
    })
}
