//! Watermark configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plane::SAMPLE_MAX;
use crate::wavelet::{DetailBand, WaveletBasis};

/// Deepest supported decomposition level.
pub const MAX_LEVEL: usize = 6;

/// Parameters shared by embedding and extraction.
///
/// Extraction must use the same values the watermark was embedded with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Decomposition level whose detail band carries the pattern (1-based).
    pub level: usize,
    /// Embedding strength as a fraction of full scale, in `(0, 1]`.
    pub strength: f32,
    /// Wavelet basis.
    pub basis: WaveletBasis,
    /// Detail band carrying the pattern.
    pub band: DetailBand,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            level: 2,
            strength: 0.05,
            basis: WaveletBasis::Haar,
            band: DetailBand::Diagonal,
        }
    }
}

impl WatermarkConfig {
    /// Set the decomposition level.
    #[must_use]
    pub fn with_level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    /// Set the embedding strength.
    #[must_use]
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    /// Set the wavelet basis.
    #[must_use]
    pub fn with_basis(mut self, basis: WaveletBasis) -> Self {
        self.basis = basis;
        self
    }

    /// Set the detail band.
    #[must_use]
    pub fn with_band(mut self, band: DetailBand) -> Self {
        self.band = band;
        self
    }

    /// Intensity margin kept free at both ends of the sample range.
    ///
    /// Host samples are clamped into `[headroom, 255 - headroom]` before
    /// embedding so the added pattern never saturates; the extra unit covers
    /// rounding to 8 bits.
    #[must_use]
    pub fn headroom(&self) -> f32 {
        self.strength * SAMPLE_MAX * self.basis.reconstruction_gain(self.level) + 1.0
    }

    /// Check that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `level` is outside `1..=MAX_LEVEL`,
    /// `strength` is not a finite value in `(0, 1]`, or the strength needs
    /// more [`headroom`](Self::headroom) than the sample range has.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LEVEL).contains(&self.level) {
            return Err(Error::InvalidConfig(format!(
                "level must be between 1 and {MAX_LEVEL}, got {}",
                self.level
            )));
        }
        if !self.strength.is_finite() || self.strength <= 0.0 || self.strength > 1.0 {
            return Err(Error::InvalidConfig(format!(
                "strength must be in (0, 1], got {}",
                self.strength
            )));
        }
        if 2.0 * self.headroom() >= SAMPLE_MAX {
            return Err(Error::InvalidConfig(format!(
                "strength {} is too high for level {} with the {} basis",
                self.strength, self.level, self.basis
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WatermarkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.level, 2);
        assert_eq!(config.band, DetailBand::Diagonal);
        assert_eq!(config.basis, WaveletBasis::Haar);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let base = WatermarkConfig::default();
        for bad in [
            base.with_level(0),
            base.with_level(MAX_LEVEL + 1),
            base.with_strength(0.0),
            base.with_strength(-0.1),
            base.with_strength(1.5),
            base.with_strength(f32::NAN),
            base.with_level(1).with_basis(WaveletBasis::LeGall53).with_strength(0.5),
        ] {
            assert!(
                matches!(bad.validate(), Err(Error::InvalidConfig(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn headroom_shrinks_with_depth_and_grows_with_strength() {
        let config = WatermarkConfig::default();
        // 0.05 * 255 * 0.25 + 1
        assert!((config.headroom() - 4.1875).abs() < 1e-4);
        assert!(config.with_level(3).headroom() < config.headroom());
        assert!(config.with_strength(0.1).headroom() > config.headroom());
        assert!(config.with_basis(WaveletBasis::LeGall53).headroom() > config.headroom());
    }

    #[test]
    fn builders_compose() {
        let config = WatermarkConfig::default()
            .with_level(3)
            .with_strength(0.1)
            .with_basis(WaveletBasis::LeGall53)
            .with_band(DetailBand::Horizontal);
        assert!(config.validate().is_ok());
        assert_eq!(config.level, 3);
        assert!((config.strength - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.basis, WaveletBasis::LeGall53);
        assert_eq!(config.band, DetailBand::Horizontal);
    }
}
