//! Embed and recover invisible text watermarks in the wavelet domain.
//!
//! The text is rendered with a built-in bitmap font into a pattern the size of
//! one detail subband of a multi-level discrete wavelet transform, added to
//! that subband at a configurable strength, and transformed back. Extraction
//! compares the watermarked image with its original in the same subband and
//! reads the recovered pattern with a [`Recognizer`].
//!
//! # Quick Start
//!
//! ```no_run
//! use dwt_watermark::{WatermarkConfig, WatermarkEngine};
//!
//! # fn main() -> dwt_watermark::Result<()> {
//! let engine = WatermarkEngine::new(WatermarkConfig::default())?;
//! let original = image::open("scan.png")?;
//! let outcome = engine.embed(&original, "A1B2")?;
//! println!("PSNR {:.2} dB, SSIM {:.4}", outcome.quality.psnr, outcome.quality.ssim);
//!
//! let marked = image::DynamicImage::ImageLuma8(outcome.watermarked);
//! let found = engine.extract(&marked, &original)?;
//! assert_eq!(found.text, "A1B2");
//! # Ok(())
//! # }
//! ```
//!
//! # Custom recognizers
//!
//! Any OCR backend can decode recovered patterns by implementing
//! [`Recognizer`]. Calls are bounded by a [`RecognitionPolicy`]; timeouts and
//! failures read as "nothing found" rather than errors.
//!
//! ```
//! use std::sync::Arc;
//! use dwt_watermark::{Recognition, RecognitionError, Recognizer, WatermarkConfig, WatermarkEngine};
//!
//! struct Fixed;
//!
//! impl Recognizer for Fixed {
//!     fn recognize(&self, _: &image::GrayImage) -> Result<Recognition, RecognitionError> {
//!         Ok(Recognition { text: "ok".into(), confidence: 1.0 })
//!     }
//! }
//!
//! let engine = WatermarkEngine::new(WatermarkConfig::default())
//!     .unwrap()
//!     .with_recognizer(Arc::new(Fixed));
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod embedding;
mod engine;
pub mod error;
pub mod extraction;
mod font;
pub mod metrics;
pub mod payload;
pub mod plane;
pub mod recognition;
pub mod wavelet;

pub use config::WatermarkConfig;
pub use embedding::Embedder;
pub use engine::{
    default_output_path, is_supported_image, load_image, open_image, save_image, EmbedOutcome,
    ProcessOptions, ProcessResult, WatermarkEngine, DEFAULT_MAX_INPUT_BYTES,
};
pub use error::{Error, ErrorKind, Result};
pub use extraction::{Extraction, Extractor};
pub use metrics::QualityReport;
pub use payload::WatermarkPattern;
pub use plane::PixelPlane;
pub use recognition::{
    GlyphRecognizer, Recognition, RecognitionError, RecognitionPolicy, Recognizer,
};
pub use wavelet::{DetailBand, SubbandSet, WaveletBasis, WaveletTransform};
