//! Watermark engine: the embed/extract pipelines and file processing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, GrayImage, ImageFormat};
use tracing::{debug, info, warn};

use crate::config::WatermarkConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extraction::{Extraction, Extractor};
use crate::metrics::QualityReport;
use crate::payload;
use crate::plane::PixelPlane;
use crate::recognition::{GlyphRecognizer, RecognitionPolicy, Recognizer};
use crate::wavelet::WaveletTransform;

/// Default upload limit for file processing (10 MB).
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Options for file-level processing.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Reject input files larger than this many bytes.
    pub max_input_bytes: Option<u64>,
    /// Abort before embedding if this instant has passed.
    pub deadline: Option<Instant>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_input_bytes: Some(DEFAULT_MAX_INPUT_BYTES),
            deadline: None,
        }
    }
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the input file.
    pub path: PathBuf,
    /// Where the watermarked image was written, on success.
    pub output: Option<PathBuf>,
    /// Whether processing succeeded.
    pub success: bool,
    /// Distortion metrics, on success.
    pub quality: Option<QualityReport>,
    /// Human-readable status message.
    pub message: String,
}

/// A watermarked image and its distortion against the input.
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    /// The watermarked luminance image.
    pub watermarked: GrayImage,
    /// Original-vs-watermarked metrics.
    pub quality: QualityReport,
}

/// Embeds and extracts text watermarks with a fixed configuration.
///
/// Create once and reuse; the engine holds no per-call state and is
/// `Send + Sync`.
#[derive(Clone)]
pub struct WatermarkEngine {
    config: WatermarkConfig,
    recognizer: Arc<dyn Recognizer>,
    policy: RecognitionPolicy,
}

impl std::fmt::Debug for WatermarkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkEngine")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl WatermarkEngine {
    /// Create an engine using the built-in [`GlyphRecognizer`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(config: WatermarkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            recognizer: Arc::new(GlyphRecognizer::new()),
            policy: RecognitionPolicy::default(),
        })
    }

    /// Decode extracted patterns with `recognizer`.
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

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    /// Characters that fit in a `width x height` image at this configuration.
    ///
    /// Counts only the part of the detail band that survives padding of odd
    /// dimensions at the embedding level.
    #[must_use]
    pub fn capacity(&self, width: usize, height: usize) -> usize {
        let (mut w, mut h) = (width, height);
        for _ in 1..self.config.level {
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }
        payload::capacity(w / 2, h / 2)
    }

    /// Embed `text` into the luminance of `image`.
    ///
    /// Colour images are converted to luminance first; the result is a
    /// grayscale image of the same size. Samples closer to black or white
    /// than [`WatermarkConfig::headroom`] are pulled inwards so the pattern
    /// cannot clip.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyPayload`] / [`Error::UnsupportedCharacter`] for bad text.
    /// - [`Error::ImageTooSmall`] if the image cannot be decomposed.
    /// - [`Error::PayloadTooLarge`] if the text does not fit the subband.
    pub fn embed(&self, image: &DynamicImage, text: &str) -> Result<EmbedOutcome> {
        payload::validate_text(text)?;
        let original = PixelPlane::from_luma(&image.to_luma8());

        let embedder = Embedder::new(&self.config);
        let host = embedder.reserve_headroom(&original);
        let transform = WaveletTransform::new(self.config.basis);
        let subbands = transform.forward(&host, self.config.level)?;
        let (band_width, band_height) =
            subbands[self.config.level - 1].unpadded_detail_dimensions();
        let pattern = payload::encode(text, band_width, band_height)?;
        let marked = embedder.apply(&subbands, &pattern)?;
        let watermarked = transform.inverse(&marked)?.quantized();

        let quality = QualityReport::compute(&original, &watermarked)?;
        info!(
            width = original.width(),
            height = original.height(),
            chars = text.chars().count(),
            psnr = quality.psnr,
            ssim = quality.ssim,
            "watermark embedded"
        );
        Ok(EmbedOutcome {
            watermarked: watermarked.to_luma(),
            quality,
        })
    }

    /// [`embed`](Self::embed), refusing to start once `deadline` has passed.
    ///
    /// # Errors
    ///
    /// [`Error::DeadlineExpired`], or any error from `embed`.
    pub fn embed_by(
        &self,
        image: &DynamicImage,
        text: &str,
        deadline: Instant,
    ) -> Result<EmbedOutcome> {
        check_deadline(deadline)?;
        self.embed(image, text)
    }

    /// Recover the text embedded in `watermarked`, given its `original`.
    ///
    /// "Nothing found" is an empty [`Extraction`], not an error.
    ///
    /// # Errors
    ///
    /// - [`Error::DimensionMismatch`] if the images differ in size.
    /// - [`Error::ImageTooSmall`] if the images cannot be decomposed.
    pub fn extract(
        &self,
        watermarked: &DynamicImage,
        original: &DynamicImage,
    ) -> Result<Extraction> {
        let marked = PixelPlane::from_luma(&watermarked.to_luma8());
        let reference = PixelPlane::from_luma(&original.to_luma8());
        let extraction = Extractor::new(&self.config)
            .with_recognizer(Arc::clone(&self.recognizer))
            .with_policy(self.policy)
            .extract(&marked, &reference)?;
        if extraction.is_empty() {
            info!("no watermark recovered");
        } else {
            info!(
                chars = extraction.text.chars().count(),
                confidence = extraction.confidence,
                "watermark extracted"
            );
        }
        Ok(extraction)
    }

    /// [`extract`](Self::extract), refusing to start once `deadline` has passed.
    ///
    /// # Errors
    ///
    /// [`Error::DeadlineExpired`], or any error from `extract`.
    pub fn extract_by(
        &self,
        watermarked: &DynamicImage,
        original: &DynamicImage,
        deadline: Instant,
    ) -> Result<Extraction> {
        check_deadline(deadline)?;
        self.extract(watermarked, original)
    }

    /// Decode a PNG or JPEG buffer and embed `text` into it.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedFormat`] / [`Error::Image`] for undecodable input,
    /// or any error from [`embed`](Self::embed).
    pub fn embed_bytes(&self, bytes: &[u8], text: &str) -> Result<EmbedOutcome> {
        // Reject bad text before paying for the decode; `embed` checks again.
        payload::validate_text(text)?;
        self.embed(&load_image(bytes)?, text)
    }

    /// Decode two PNG or JPEG buffers and extract the watermark.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedFormat`] / [`Error::Image`] for undecodable input,
    /// or any error from [`extract`](Self::extract).
    pub fn extract_bytes(&self, watermarked: &[u8], original: &[u8]) -> Result<Extraction> {
        self.extract(&load_image(watermarked)?, &load_image(original)?)
    }

    /// Process a single image file: load, embed, save.
    #[must_use]
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        text: &str,
        opts: &ProcessOptions,
    ) -> ProcessResult {
        match self.embed_file(input, output, text, opts) {
            Ok(quality) => ProcessResult {
                path: input.to_path_buf(),
                output: Some(output.to_path_buf()),
                success: true,
                quality: Some(quality),
                message: format!(
                    "Watermark embedded (PSNR {:.2} dB, SSIM {:.4})",
                    quality.psnr, quality.ssim
                ),
            },
            Err(e) => {
                debug!(path = %input.display(), error = %e, "file failed");
                ProcessResult {
                    path: input.to_path_buf(),
                    output: None,
                    success: false,
                    quality: None,
                    message: e.to_string(),
                }
            }
        }
    }

    fn embed_file(
        &self,
        input: &Path,
        output: &Path,
        text: &str,
        opts: &ProcessOptions,
    ) -> Result<QualityReport> {
        let image = open_image(input, opts.max_input_bytes)?;
        let outcome = match opts.deadline {
            Some(deadline) => self.embed_by(&image, text, deadline)?,
            None => self.embed(&image, text)?,
        };
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        save_image(&outcome.watermarked, output)?;
        Ok(outcome.quality)
    }

    /// Embed `text` into every supported image in `input_dir`.
    ///
    /// Outputs are written to `output_dir` as `<stem>_watermarked.png`. Uses
    /// parallel iteration when the `parallel` feature is enabled (via rayon).
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        text: &str,
        opts: &ProcessOptions,
    ) -> Vec<ProcessResult> {
        let failure = |path: &Path, message: String| ProcessResult {
            path: path.to_path_buf(),
            output: None,
            success: false,
            quality: None,
            message,
        };

        let mut inputs: Vec<PathBuf> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_ok_and(|ft| ft.is_file()))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .collect(),
            Err(e) => {
                return vec![failure(
                    input_dir,
                    format!("Failed to read directory: {e}"),
                )]
            }
        };
        inputs.sort();

        if !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                return vec![failure(
                    output_dir,
                    format!("Failed to create output directory: {e}"),
                )];
            }
        }

        let run = |input: &PathBuf| {
            let output = output_path_in(input, output_dir);
            self.process_file(input, &output, text, opts)
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            inputs.par_iter().map(run).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            inputs.iter().map(run).collect()
        }
    }
}

fn check_deadline(deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(Error::DeadlineExpired);
    }
    Ok(())
}

/// Decode a PNG or JPEG buffer.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] for any other format, or
/// [`Error::Image`] if decoding fails.
pub fn load_image(bytes: &[u8]) -> Result<DynamicImage> {
    let format =
        image::guess_format(bytes).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    match format {
        ImageFormat::Png | ImageFormat::Jpeg => {
            Ok(image::load_from_memory_with_format(bytes, format)?)
        }
        other => Err(Error::UnsupportedFormat(format!("{other:?}"))),
    }
}

/// Read and decode an image file, rejecting files over `max_bytes`.
///
/// # Errors
///
/// [`Error::InputTooLarge`], [`Error::Io`], or any error from [`load_image`].
pub fn open_image(path: &Path, max_bytes: Option<u64>) -> Result<DynamicImage> {
    if let Some(limit) = max_bytes {
        let size = std::fs::metadata(path)?.len();
        if size > limit {
            return Err(Error::InputTooLarge { size, limit });
        }
    }
    load_image(&std::fs::read(path)?)
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(ext.to_lowercase().as_str(), "png" | "jpg" | "jpeg"),
        None => false,
    }
}

/// Save a grayscale image; the format follows the file extension.
///
/// JPEG is written at quality 100 but is still lossy and may damage the
/// watermark.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &GrayImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            warn!(path = %path.display(), "JPEG output is lossy; extraction may fail");
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png => {
            img.save_with_format(path, ImageFormat::Png)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"scan.jpg"` becomes `"scan_watermarked.png"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or(Path::new("."));
    output_path_in(input, parent)
}

fn output_path_in(input: &Path, dir: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    dir.join(format!("{stem}_watermarked.png"))
}
