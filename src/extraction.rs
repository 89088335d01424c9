//! Residual recovery and text extraction.

use std::sync::Arc;

use image::{GrayImage, Luma};
use serde::Serialize;
use tracing::debug;

use crate::config::WatermarkConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::payload::{self, WatermarkPattern};
use crate::plane::{PixelPlane, SAMPLE_MAX};
use crate::recognition::{GlyphRecognizer, Recognition, RecognitionPolicy, Recognizer};
use crate::wavelet::{SubbandSet, WaveletTransform};

/// Largest RMS difference, in block-mean intensity units, tolerated between
/// the approximation bands of a watermarked image and its original.
pub const MAX_APPROXIMATION_DRIFT: f64 = 8.0;

/// Text recovered from a watermarked image.
///
/// An empty `text` with confidence 0 means no watermark was found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extraction {
    /// Recovered text.
    pub text: String,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Extraction {
    /// Whether no text was recovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl From<Recognition> for Extraction {
    fn from(r: Recognition) -> Self {
        Self {
            text: r.text,
            confidence: r.confidence,
        }
    }
}

/// Recovers an embedded pattern by comparing a watermarked plane with its
/// original, and decodes it.
#[derive(Clone)]
pub struct Extractor {
    config: WatermarkConfig,
    recognizer: Arc<dyn Recognizer>,
    policy: RecognitionPolicy,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// Create an extractor using the built-in [`GlyphRecognizer`].
    #[must_use]
    pub fn new(config: &WatermarkConfig) -> Self {
        Self {
            config: *config,
            recognizer: Arc::new(GlyphRecognizer::new()),
            policy: RecognitionPolicy::default(),
        }
    }

    /// Decode patterns with `recognizer` instead.
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Bound recognizer calls with `policy`.
    #[must_use]
    pub fn with_policy(mut self, policy: RecognitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Recover the pattern embedded in `watermarked` relative to `original`.
    ///
    /// The band difference is divided by the embedding gain, re-offset so
    /// that its median (the pattern background) maps to 0, and scaled back
    /// to `0..=255`.
    ///
    /// # Errors
    ///
    /// - [`Error::DimensionMismatch`] if the planes differ in size.
    /// - [`Error::InvalidConfig`] / [`Error::ImageTooSmall`] if the
    ///   configuration cannot decompose the planes.
    pub fn residual(
        &self,
        watermarked: &PixelPlane,
        original: &PixelPlane,
    ) -> Result<WatermarkPattern> {
        let (marked, reference) = self.decompose_pair(watermarked, original)?;
        Ok(self.pattern_from(&marked, &reference))
    }

    /// Recover and decode the embedded text.
    ///
    /// Returns an empty [`Extraction`] when `original` does not correspond to
    /// `watermarked` or no legible pattern is found.
    ///
    /// # Errors
    ///
    /// Same as [`residual`](Self::residual); recognition failures are never
    /// errors.
    pub fn extract(&self, watermarked: &PixelPlane, original: &PixelPlane) -> Result<Extraction> {
        let (marked, reference) = self.decompose_pair(watermarked, original)?;

        let level = self.config.level;
        let drift = approximation_drift(&marked[level - 1], &reference[level - 1], level);
        debug!(drift, limit = MAX_APPROXIMATION_DRIFT, "approximation drift");
        if drift > MAX_APPROXIMATION_DRIFT {
            debug!("original does not match watermarked image");
            return Ok(Extraction::default());
        }

        let pattern = self.pattern_from(&marked, &reference);
        Ok(payload::decode(&pattern, &self.recognizer, &self.policy).into())
    }

    fn decompose_pair(
        &self,
        watermarked: &PixelPlane,
        original: &PixelPlane,
    ) -> Result<(Vec<SubbandSet>, Vec<SubbandSet>)> {
        if watermarked.dimensions() != original.dimensions() {
            return Err(Error::dimension_mismatch(
                original.dimensions(),
                watermarked.dimensions(),
            ));
        }
        self.config.validate()?;
        // The host was clamped the same way before embedding.
        let reference = Embedder::new(&self.config).reserve_headroom(original);
        let transform = WaveletTransform::new(self.config.basis);
        Ok((
            transform.forward(watermarked, self.config.level)?,
            transform.forward(&reference, self.config.level)?,
        ))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn pattern_from(&self, marked: &[SubbandSet], reference: &[SubbandSet]) -> WatermarkPattern {
        let level = self.config.level;
        let a = marked[level - 1].detail(self.config.band);
        let b = reference[level - 1].detail(self.config.band);
        let gain = self.config.strength * SAMPLE_MAX;
        let signal: Vec<f32> = a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .map(|(x, y)| (x - y) / gain)
            .collect();
        let offset = median(&signal);
        let width = a.width();
        let image = GrayImage::from_fn(a.width() as u32, a.height() as u32, |x, y| {
            let v = signal[y as usize * width + x as usize] - offset;
            Luma([(v * SAMPLE_MAX).round().clamp(0.0, SAMPLE_MAX) as u8])
        });
        WatermarkPattern::from_image(image)
    }
}

/// RMS difference between two approximation bands, normalised to block means.
fn approximation_drift(marked: &SubbandSet, reference: &SubbandSet, level: usize) -> f64 {
    let a = marked.approximation.as_slice();
    let b = reference.approximation.as_slice();
    if a.is_empty() {
        return 0.0;
    }
    let gain = f64::from(1u32 << level.min(31));
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = (f64::from(x) - f64::from(y)) / gain;
            d * d
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum / a.len() as f64;
    mean.sqrt()
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    let mid = sorted.len() / 2;
    let (_, m, _) = sorted.select_nth_unstable_by(mid, f32::total_cmp);
    *m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavelet::WaveletBasis;

    #[allow(clippy::cast_precision_loss)]
    fn scene(width: usize, height: usize, seed: usize) -> PixelPlane {
        PixelPlane::from_fn(width, height, |x, y| {
            let fx = x as f32 / (7.0 + seed as f32);
            let fy = y as f32 / (11.0 + seed as f32);
            128.0 + 60.0 * fx.sin() * fy.cos() + ((x * 31 + y * 17 + seed) % 23) as f32 - 11.0
        })
    }

    fn embed(original: &PixelPlane, text: &str, config: &WatermarkConfig) -> PixelPlane {
        let embedder = Embedder::new(config);
        let transform = WaveletTransform::new(config.basis);
        let host = embedder.reserve_headroom(original);
        let subbands = transform.forward(&host, config.level).unwrap();
        let (w, h) = subbands[config.level - 1].unpadded_detail_dimensions();
        let pattern = payload::encode(text, w, h).unwrap();
        let marked = embedder.apply(&subbands, &pattern).unwrap();
        transform.inverse(&marked).unwrap().quantized()
    }

    #[test]
    fn residual_reproduces_encoded_pattern() {
        let config = WatermarkConfig::default();
        let original = scene(128, 128, 0);
        let watermarked = embed(&original, "Hi!", &config);
        let recovered = Extractor::new(&config)
            .residual(&watermarked, &original)
            .unwrap();
        let expected = payload::encode("Hi!", 32, 32).unwrap();
        assert_eq!(recovered.dimensions(), expected.dimensions());
        let misread = recovered
            .image()
            .pixels()
            .zip(expected.image().pixels())
            .filter(|(a, b)| (a[0] >= 128) != (b[0] >= 128))
            .count();
        assert_eq!(misread, 0);
    }

    #[test]
    fn extract_recovers_text() {
        let config = WatermarkConfig::default().with_basis(WaveletBasis::LeGall53);
        let original = scene(128, 96, 1);
        let watermarked = embed(&original, "OK 42", &config);
        let result = Extractor::new(&config)
            .extract(&watermarked, &original)
            .unwrap();
        assert_eq!(result.text, "OK 42");
        assert!(result.confidence > 0.9);
    }

    #[test]
    fn saturated_original_is_compared_after_clamping() {
        let config = WatermarkConfig::default();
        let white = PixelPlane::from_fn(128, 128, |_, _| SAMPLE_MAX);
        let watermarked = embed(&white, "A1B2", &config);
        let result = Extractor::new(&config)
            .extract(&watermarked, &white)
            .unwrap();
        assert_eq!(result.text, "A1B2");
    }

    #[test]
    fn unrelated_original_yields_empty_result() {
        let config = WatermarkConfig::default();
        let watermarked = embed(&scene(128, 128, 0), "A1B2", &config);
        let result = Extractor::new(&config)
            .extract(&watermarked, &scene(128, 128, 5))
            .unwrap();
        assert!(result.is_empty());
        assert!(result.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn unmarked_image_yields_empty_result() {
        let config = WatermarkConfig::default();
        let original = scene(64, 64, 2);
        let result = Extractor::new(&config).extract(&original, &original).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let config = WatermarkConfig::default();
        let err = Extractor::new(&config)
            .extract(&scene(64, 64, 0), &scene(64, 62, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected_height: 62,
                actual_height: 64,
                ..
            }
        ));
    }

    #[test]
    fn median_picks_middle_value() {
        assert!((median(&[5.0, -1.0, 3.0]) - 3.0).abs() < f32::EPSILON);
        assert!((median(&[0.0, 0.0, 0.0, 9.0]) - 0.0).abs() < f32::EPSILON);
        assert!(median(&[]).abs() < f32::EPSILON);
    }
}
