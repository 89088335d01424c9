use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dwt_watermark::{
    load_image, save_image, DetailBand, ErrorKind, ProcessOptions, Recognition,
    RecognitionError, RecognitionPolicy, Recognizer, WatermarkConfig, WatermarkEngine,
    WaveletBasis,
};
use image::{DynamicImage, GrayImage, Luma};

/// Smooth texture plus deterministic noise, clamped to `40..=215`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn test_image(width: u32, height: u32, seed: u64) -> DynamicImage {
    let mut state = seed;
    let mut img = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let noise = ((state >> 33) % 41) as f64 - 20.0;
            let base = 128.0
                + 60.0
                    * (f64::from(x) / (9.0 + seed as f64)).sin()
                    * (f64::from(y) / (13.0 + seed as f64)).cos();
            let v = (base + noise).clamp(40.0, 215.0).round();
            img.put_pixel(x, y, Luma([v as u8]));
        }
    }
    DynamicImage::ImageLuma8(img)
}

fn engine(config: WatermarkConfig) -> WatermarkEngine {
    WatermarkEngine::new(config).unwrap()
}

fn luma(img: GrayImage) -> DynamicImage {
    DynamicImage::ImageLuma8(img)
}

#[test]
fn a1b2_scenario_meets_fidelity_and_round_trips() {
    let engine = engine(WatermarkConfig::default());
    let original = test_image(256, 256, 0);

    let outcome = engine.embed(&original, "A1B2").unwrap();
    assert!(outcome.quality.psnr > 30.0, "psnr {}", outcome.quality.psnr);
    assert!(outcome.quality.ssim > 0.90, "ssim {}", outcome.quality.ssim);
    assert!(outcome.quality.mse > 0.0);

    let extraction = engine
        .extract(&luma(outcome.watermarked), &original)
        .unwrap();
    assert_eq!(extraction.text, "A1B2");
    assert!(extraction.confidence > 0.9);
}

#[test]
fn unrelated_original_recovers_nothing() {
    let engine = engine(WatermarkConfig::default());
    let outcome = engine.embed(&test_image(256, 256, 0), "A1B2").unwrap();

    let extraction = engine
        .extract(&luma(outcome.watermarked), &test_image(256, 256, 5))
        .unwrap();
    assert_eq!(extraction.text, "");
    assert!(extraction.confidence.abs() < f32::EPSILON);
}

#[test]
fn longer_text_round_trips_across_bases_and_levels() {
    let original = test_image(256, 256, 0);
    let text = "Hello, World! 2026 ~{x}";
    for config in [
        WatermarkConfig::default().with_basis(WaveletBasis::LeGall53),
        WatermarkConfig::default().with_level(1),
        WatermarkConfig::default().with_band(DetailBand::Horizontal),
    ] {
        let engine = engine(config);
        let outcome = engine.embed(&original, text).unwrap();
        let extraction = engine
            .extract(&luma(outcome.watermarked), &original)
            .unwrap();
        assert_eq!(extraction.text, text, "{config:?}");
    }
}

#[test]
fn odd_sized_images_round_trip_for_every_basis() {
    for basis in [WaveletBasis::Haar, WaveletBasis::LeGall53] {
        let engine = engine(WatermarkConfig::default().with_basis(basis));
        for (width, height) in [(178, 200), (178, 178)] {
            let original = test_image(width, height, 3);
            let outcome = engine.embed(&original, "A1").unwrap();
            let extraction = engine
                .extract(&luma(outcome.watermarked), &original)
                .unwrap();
            assert_eq!(extraction.text, "A1", "{basis} {width}x{height}");
        }
    }
}

/// White page with rows of dark strokes, like a scanned letter.
fn document_page(width: u32, height: u32) -> DynamicImage {
    luma(GrayImage::from_fn(width, height, |x, y| {
        let in_line = (5..8).contains(&(y % 16)) && x > 12 && x < width - 12;
        if in_line && (x / 5) % 3 != 0 {
            Luma([20])
        } else {
            Luma([255])
        }
    }))
}

#[test]
fn white_document_page_round_trips() {
    for basis in [WaveletBasis::Haar, WaveletBasis::LeGall53] {
        let engine = engine(WatermarkConfig::default().with_basis(basis));
        let original = document_page(256, 256);
        let outcome = engine.embed(&original, "A1B2").unwrap();
        assert!(outcome.quality.psnr > 20.0, "{basis}: {:?}", outcome.quality);
        let extraction = engine
            .extract(&luma(outcome.watermarked), &original)
            .unwrap();
        assert_eq!(extraction.text, "A1B2", "{basis}");
    }
}

#[test]
fn stronger_embedding_costs_fidelity() {
    let original = test_image(256, 256, 0);
    let reports: Vec<_> = [0.02, 0.05, 0.1]
        .into_iter()
        .map(|s| {
            engine(WatermarkConfig::default().with_strength(s))
                .embed(&original, "A1B2")
                .unwrap()
                .quality
        })
        .collect();

    for pair in reports.windows(2) {
        assert!(pair[1].psnr < pair[0].psnr, "{pair:?}");
        assert!(pair[1].ssim < pair[0].ssim, "{pair:?}");
        assert!(pair[1].mse > pair[0].mse, "{pair:?}");
    }
}

#[test]
fn mismatched_dimensions_are_a_hard_failure() {
    let engine = engine(WatermarkConfig::default());
    let err = engine
        .extract(&test_image(256, 256, 0), &test_image(128, 128, 0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
}

#[test]
fn oversized_text_is_reported() {
    let engine = engine(WatermarkConfig::default());
    let err = engine
        .embed(&test_image(64, 64, 0), "far too long for this image")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
}

#[test]
fn invalid_text_is_rejected_up_front() {
    let engine = engine(WatermarkConfig::default());
    let image = test_image(64, 64, 0);
    assert_eq!(
        engine.embed(&image, "  ").unwrap_err().kind(),
        ErrorKind::InputValidation
    );
    assert_eq!(
        engine.embed(&image, "caf\u{e9}").unwrap_err().kind(),
        ErrorKind::InputValidation
    );
}

/// Records the pattern it is shown and answers with a fixed result.
struct Stub {
    answer: Recognition,
    seen: Mutex<Option<(u32, u32)>>,
}

impl Recognizer for Stub {
    fn recognize(&self, pattern: &GrayImage) -> Result<Recognition, RecognitionError> {
        if let Ok(mut seen) = self.seen.lock() {
            *seen = Some(pattern.dimensions());
        }
        Ok(self.answer.clone())
    }
}

#[test]
fn extraction_delegates_to_custom_recognizer() {
    let stub = Arc::new(Stub {
        answer: Recognition {
            text: "stub".into(),
            confidence: 0.8,
        },
        seen: Mutex::new(None),
    });
    let engine = engine(WatermarkConfig::default()).with_recognizer(stub.clone());
    let original = test_image(256, 256, 0);
    let outcome = engine.embed(&original, "A1B2").unwrap();

    let extraction = engine
        .extract(&luma(outcome.watermarked), &original)
        .unwrap();
    assert_eq!(extraction.text, "stub");
    // Level 2 of a 256x256 image leaves a 64x64 band.
    assert_eq!(*stub.seen.lock().unwrap(), Some((64, 64)));
}

struct Hangs;

impl Recognizer for Hangs {
    fn recognize(&self, _pattern: &GrayImage) -> Result<Recognition, RecognitionError> {
        std::thread::sleep(Duration::from_millis(400));
        Ok(Recognition {
            text: "too late".into(),
            confidence: 1.0,
        })
    }
}

#[test]
fn recognizer_timeout_reads_as_nothing_found() {
    let policy = RecognitionPolicy {
        timeout: Some(Duration::from_millis(20)),
        backoff: Duration::from_millis(1),
        ..RecognitionPolicy::default()
    };
    let engine = engine(WatermarkConfig::default())
        .with_recognizer(Arc::new(Hangs))
        .with_policy(policy);
    let original = test_image(128, 128, 0);
    let outcome = engine.embed(&original, "A1").unwrap();

    let extraction = engine
        .extract(&luma(outcome.watermarked), &original)
        .unwrap();
    assert!(extraction.is_empty());
}

fn write_png(path: &Path, image: &DynamicImage) {
    save_image(&image.to_luma8(), path).unwrap();
}

#[test]
fn process_file_writes_extractable_png() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.png");
    let output = dir.path().join("out").join("scan_watermarked.png");
    write_png(&input, &test_image(256, 256, 0));

    let engine = engine(WatermarkConfig::default());
    let result = engine.process_file(&input, &output, "A1B2", &ProcessOptions::default());
    assert!(result.success, "{}", result.message);
    assert_eq!(result.output.as_deref(), Some(output.as_path()));
    assert!(result.quality.is_some_and(|q| q.psnr > 30.0));

    let extraction = engine
        .extract_bytes(&fs::read(&output).unwrap(), &fs::read(&input).unwrap())
        .unwrap();
    assert_eq!(extraction.text, "A1B2");
}

#[test]
fn process_file_enforces_size_limit_and_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.png");
    write_png(&input, &test_image(64, 64, 0));
    let output = dir.path().join("scan_watermarked.png");
    let engine = engine(WatermarkConfig::default());

    let small_limit = ProcessOptions {
        max_input_bytes: Some(16),
        ..ProcessOptions::default()
    };
    let result = engine.process_file(&input, &output, "A", &small_limit);
    assert!(!result.success);
    assert!(result.message.contains("limit"), "{}", result.message);

    let expired = ProcessOptions {
        deadline: Instant::now().checked_sub(Duration::from_millis(1)),
        ..ProcessOptions::default()
    };
    let result = engine.process_file(&input, &output, "A", &expired);
    assert!(!result.success);
    assert!(result.message.contains("deadline"), "{}", result.message);
    assert!(!output.exists());
}

#[test]
fn process_directory_handles_every_supported_image() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    write_png(&input_dir.path().join("a.png"), &test_image(128, 128, 1));
    write_png(&input_dir.path().join("b.png"), &test_image(128, 96, 2));
    fs::write(input_dir.path().join("notes.txt"), "not an image").unwrap();

    let engine = engine(WatermarkConfig::default());
    let results = engine.process_directory(
        input_dir.path(),
        output_dir.path(),
        "OK",
        &ProcessOptions::default(),
    );

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    assert!(output_dir.path().join("a_watermarked.png").exists());
    assert!(output_dir.path().join("b_watermarked.png").exists());
}

#[test]
fn jpeg_inputs_are_accepted_and_other_formats_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let jpeg = dir.path().join("photo.jpg");
    save_image(&test_image(64, 64, 0).to_luma8(), &jpeg).unwrap();
    let loaded = load_image(&fs::read(&jpeg).unwrap()).unwrap();
    assert_eq!((loaded.width(), loaded.height()), (64, 64));

    // Minimal GIF header.
    let err = load_image(b"GIF89a\x01\x00\x01\x00\x00\x00\x00").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);
}
