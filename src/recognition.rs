//! Text recognition over recovered watermark patterns.
//!
//! [`Recognizer`] is the seam for any optical-character-recognition backend.
//! [`GlyphRecognizer`] is the built-in, deterministic implementation that
//! reads patterns rendered by [`payload::encode`](crate::payload::encode).
//!
//! Recognition is best effort: [`recognize_with_policy`] turns timeouts,
//! backend errors and low-confidence reads into an empty [`Recognition`]
//! instead of failing the extraction.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::GrayImage;
use serde::Serialize;
use tracing::{debug, warn};

use crate::font::{self, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::payload::{units_across, units_down, CELL_ADVANCE, FRAME_UNITS, LINE_ADVANCE};

/// Minimum frame score for the built-in recognizer to accept a block.
const MIN_FRAME_SCORE: f32 = 0.9;

/// Default cap on timed-out recognizer calls still running in the process.
pub const DEFAULT_MAX_STALLED_WORKERS: usize = 8;

/// Workers whose attempt timed out and whose backend call has not returned.
static STALLED_WORKERS: AtomicUsize = AtomicUsize::new(0);

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Text read from a pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recognition {
    /// Recognized text; empty when nothing was found.
    pub text: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Recognition {
    /// The "nothing recognized" result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether no text was recognized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Failure of a single recognition attempt.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    /// The backend reported an error.
    #[error("recognizer failed: {0}")]
    Engine(String),

    /// The backend did not answer within the policy timeout.
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    /// The worker thread ended without sending a result (it panicked).
    #[error("recognition worker stopped without a result")]
    WorkerLost,

    /// Too many earlier attempts timed out and are still running.
    #[error("{0} timed-out recognition workers are still running")]
    Saturated(usize),
}

/// An optical-character-recognition backend.
///
/// Calls should return promptly. When a policy timeout fires, the call keeps
/// its worker thread until it returns; once
/// [`RecognitionPolicy::max_stalled_workers`] such threads exist in the
/// process, further timed attempts are refused with
/// [`RecognitionError::Saturated`] instead of spawning more.
pub trait Recognizer: Send + Sync {
    /// Read text from a grayscale pattern image.
    ///
    /// # Errors
    ///
    /// Implementations return [`RecognitionError`] for backend failures.
    /// Finding no text is not an error; return [`Recognition::empty`].
    fn recognize(&self, pattern: &GrayImage) -> Result<Recognition, RecognitionError>;
}

/// How recognition calls are bounded and retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionPolicy {
    /// Per-attempt time limit; `None` runs the backend inline.
    pub timeout: Option<Duration>,
    /// Extra attempts after a failed or timed-out one.
    pub retries: u32,
    /// Pause between attempts.
    pub backoff: Duration,
    /// Results below this confidence count as nothing recognized.
    pub min_confidence: f32,
    /// Refuse timed attempts while this many timed-out workers are running.
    pub max_stalled_workers: usize,
}

impl Default for RecognitionPolicy {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            retries: 1,
            backoff: Duration::from_millis(50),
            min_confidence: 0.5,
            max_stalled_workers: DEFAULT_MAX_STALLED_WORKERS,
        }
    }
}

/// Run `recognizer` on `pattern` under `policy`.
///
/// Never fails: exhausted retries, timeouts and low confidence all yield
/// [`Recognition::empty`]. A timed-out attempt keeps running on its detached
/// thread until the backend returns, and counts against
/// [`RecognitionPolicy::max_stalled_workers`] until then.
#[must_use]
pub fn recognize_with_policy(
    recognizer: &Arc<dyn Recognizer>,
    pattern: &GrayImage,
    policy: &RecognitionPolicy,
) -> Recognition {
    let attempts = policy.retries.saturating_add(1);
    for attempt in 1..=attempts {
        match attempt_once(recognizer, pattern, policy) {
            Ok(result) if result.is_empty() => {
                debug!(attempt, "recognizer found no text");
                return Recognition::empty();
            }
            Ok(result) if result.confidence < policy.min_confidence => {
                debug!(
                    attempt,
                    confidence = result.confidence,
                    min = policy.min_confidence,
                    "discarding low-confidence recognition"
                );
                return Recognition::empty();
            }
            Ok(result) => return result,
            Err(e) => {
                warn!(attempt, attempts, error = %e, "recognition attempt failed");
                if attempt < attempts {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }
    Recognition::empty()
}

fn attempt_once(
    recognizer: &Arc<dyn Recognizer>,
    pattern: &GrayImage,
    policy: &RecognitionPolicy,
) -> Result<Recognition, RecognitionError> {
    let Some(limit) = policy.timeout else {
        return recognizer.recognize(pattern);
    };
    let stalled = STALLED_WORKERS.load(Ordering::Acquire);
    if stalled >= policy.max_stalled_workers {
        return Err(RecognitionError::Saturated(stalled));
    }

    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(recognizer);
    let image = pattern.clone();
    let state = Arc::new(AtomicU8::new(RUNNING));
    let guard = WorkerGuard(Arc::clone(&state));
    thread::Builder::new()
        .name("recognizer".into())
        .spawn(move || {
            let _guard = guard;
            tx.send(worker.recognize(&image)).ok();
        })
        .map_err(|e| RecognitionError::Engine(format!("failed to spawn worker: {e}")))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            // Count first so the worker's decrement can never run ahead of it.
            STALLED_WORKERS.fetch_add(1, Ordering::AcqRel);
            if state
                .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                STALLED_WORKERS.fetch_sub(1, Ordering::AcqRel);
            }
            Err(RecognitionError::Timeout(limit))
        }
        Err(RecvTimeoutError::Disconnected) => Err(RecognitionError::WorkerLost),
    }
}

/// Marks a worker finished when its thread ends, panics included.
struct WorkerGuard(Arc<AtomicU8>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self
            .0
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            STALLED_WORKERS.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Template-matching recognizer for the built-in payload font.
///
/// Locates the framed text block, infers the unit size from the frame
/// geometry, then matches every glyph cell against the font by Hamming
/// distance.
#[derive(Debug, Clone, Copy)]
pub struct GlyphRecognizer {
    ink_threshold: u8,
    min_frame_score: f32,
}

impl Default for GlyphRecognizer {
    fn default() -> Self {
        Self {
            ink_threshold: 128,
            min_frame_score: MIN_FRAME_SCORE,
        }
    }
}

impl GlyphRecognizer {
    /// Create a recognizer with the default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pixels at or above `threshold` count as ink.
    #[must_use]
    pub fn with_ink_threshold(mut self, threshold: u8) -> Self {
        self.ink_threshold = threshold;
        self
    }
}

impl Recognizer for GlyphRecognizer {
    fn recognize(&self, pattern: &GrayImage) -> Result<Recognition, RecognitionError> {
        let ink = InkMap::new(pattern, self.ink_threshold);
        let Some(bounds) = ink.bounds() else {
            return Ok(Recognition::empty());
        };
        let Some(frame) = best_frame(&ink, bounds) else {
            debug!(?bounds, "ink bounds match no frame geometry");
            return Ok(Recognition::empty());
        };
        if frame.score < self.min_frame_score {
            debug!(score = frame.score, unit = frame.unit, "frame rejected");
            return Ok(Recognition::empty());
        }

        let mut text = String::with_capacity(frame.columns * frame.rows);
        let mut similarity = 0.0_f32;
        for row in 0..frame.rows {
            for column in 0..frame.columns {
                let ox = FRAME_UNITS + column * CELL_ADVANCE;
                let oy = FRAME_UNITS + row * LINE_ADVANCE;
                let (ch, score) = match_cell(&ink, &frame, ox, oy);
                text.push(ch);
                similarity += score;
            }
        }
        let text = text.trim_end().to_string();
        if text.is_empty() {
            return Ok(Recognition::empty());
        }

        #[allow(clippy::cast_precision_loss)]
        let cells = (frame.columns * frame.rows) as f32;
        Ok(Recognition {
            text,
            confidence: frame.score * similarity / cells,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

struct InkMap {
    width: usize,
    ink: Vec<bool>,
}

impl InkMap {
    fn new(image: &GrayImage, threshold: u8) -> Self {
        Self {
            width: image.width() as usize,
            ink: image.pixels().map(|p| p[0] >= threshold).collect(),
        }
    }

    fn at(&self, x: usize, y: usize) -> bool {
        self.ink[y * self.width + x]
    }

    fn bounds(&self) -> Option<Bounds> {
        let height = if self.width == 0 {
            0
        } else {
            self.ink.len() / self.width
        };
        let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
        for y in 0..height {
            for x in 0..self.width {
                if self.at(x, y) {
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                }
            }
        }
        (x0 != usize::MAX).then(|| Bounds {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    bounds: Bounds,
    unit: usize,
    columns: usize,
    rows: usize,
    score: f32,
}

impl Frame {
    /// Fraction of inked pixels in unit `(ux, uy)` of the block.
    #[allow(clippy::cast_precision_loss)]
    fn coverage(&self, ink: &InkMap, ux: usize, uy: usize) -> f32 {
        let x0 = self.bounds.x + ux * self.unit;
        let y0 = self.bounds.y + uy * self.unit;
        let mut count = 0usize;
        for y in y0..y0 + self.unit {
            for x in x0..x0 + self.unit {
                count += usize::from(ink.at(x, y));
            }
        }
        count as f32 / (self.unit * self.unit) as f32
    }
}

/// Try every unit size consistent with the ink bounds and keep the one whose
/// border is most inked and margin most clear.
fn best_frame(ink: &InkMap, bounds: Bounds) -> Option<Frame> {
    let mut best: Option<Frame> = None;
    for unit in 1..=bounds.width.min(bounds.height) {
        if bounds.width % unit != 0 || bounds.height % unit != 0 {
            continue;
        }
        let (across, down) = (bounds.width / unit, bounds.height / unit);
        if across < units_across(1) || down < units_down(1) {
            continue;
        }
        let (cell_span, line_span) = (across + 1 - 2 * FRAME_UNITS, down + 1 - 2 * FRAME_UNITS);
        if cell_span % CELL_ADVANCE != 0 || line_span % LINE_ADVANCE != 0 {
            continue;
        }
        let mut frame = Frame {
            bounds,
            unit,
            columns: cell_span / CELL_ADVANCE,
            rows: line_span / LINE_ADVANCE,
            score: 0.0,
        };
        frame.score = frame_score(ink, &frame, across, down);
        if best.is_none_or(|b| frame.score > b.score) {
            best = Some(frame);
        }
    }
    best
}

#[allow(clippy::cast_precision_loss)]
fn frame_score(ink: &InkMap, frame: &Frame, across: usize, down: usize) -> f32 {
    let (mut border, mut border_units) = (0.0_f32, 0usize);
    let (mut margin, mut margin_units) = (0.0_f32, 0usize);
    for uy in 0..down {
        for ux in 0..across {
            let ring = ux.min(uy).min(across - 1 - ux).min(down - 1 - uy);
            if ring == 0 {
                border += frame.coverage(ink, ux, uy);
                border_units += 1;
            } else if ring < FRAME_UNITS {
                margin += 1.0 - frame.coverage(ink, ux, uy);
                margin_units += 1;
            }
        }
    }
    (border / border_units as f32 + margin / margin_units as f32) / 2.0
}

/// Best-matching character for the glyph cell at unit `(ox, oy)`, with its
/// similarity in `[0, 1]`.
#[allow(clippy::cast_precision_loss)]
fn match_cell(ink: &InkMap, frame: &Frame, ox: usize, oy: usize) -> (char, f32) {
    let mut observed = [[false; GLYPH_HEIGHT]; GLYPH_WIDTH];
    for (gx, column) in observed.iter_mut().enumerate() {
        for (gy, bit) in column.iter_mut().enumerate() {
            *bit = frame.coverage(ink, ox + gx, oy + gy) >= 0.5;
        }
    }
    let distance = |columns: &[u8; GLYPH_WIDTH]| -> usize {
        let mut d = 0;
        for (gx, column) in observed.iter().enumerate() {
            for (gy, bit) in column.iter().enumerate() {
                d += usize::from(font::is_inked(columns, gx, gy) != *bit);
            }
        }
        d
    };
    let (ch, d) = font::glyphs()
        .map(|(ch, columns)| (ch, distance(columns)))
        .min_by_key(|(_, d)| *d)
        .unwrap_or((' ', GLYPH_WIDTH * GLYPH_HEIGHT));
    (ch, 1.0 - d as f32 / (GLYPH_WIDTH * GLYPH_HEIGHT) as f32)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use image::Luma;

    use super::*;
    use crate::payload::encode;

    struct Slow;

    impl Recognizer for Slow {
        fn recognize(&self, _pattern: &GrayImage) -> Result<Recognition, RecognitionError> {
            thread::sleep(Duration::from_millis(500));
            Ok(Recognition {
                text: "late".into(),
                confidence: 1.0,
            })
        }
    }

    struct FailsOnce {
        calls: AtomicUsize,
    }

    impl Recognizer for FailsOnce {
        fn recognize(&self, _pattern: &GrayImage) -> Result<Recognition, RecognitionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RecognitionError::Engine("warming up".into()))
            } else {
                Ok(Recognition {
                    text: "ok".into(),
                    confidence: 0.9,
                })
            }
        }
    }

    /// Blocks until released, counting how many calls started.
    struct Wedged {
        started: AtomicUsize,
        released: AtomicBool,
    }

    impl Recognizer for Wedged {
        fn recognize(&self, _pattern: &GrayImage) -> Result<Recognition, RecognitionError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            while !self.released.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(Recognition::empty())
        }
    }

    struct Fixed(Recognition);

    impl Recognizer for Fixed {
        fn recognize(&self, _pattern: &GrayImage) -> Result<Recognition, RecognitionError> {
            Ok(self.0.clone())
        }
    }

    fn read(text: &str, width: usize, height: usize) -> Recognition {
        let pattern = encode(text, width, height).unwrap();
        GlyphRecognizer::new().recognize(pattern.image()).unwrap()
    }

    fn fast_policy() -> RecognitionPolicy {
        RecognitionPolicy {
            timeout: Some(Duration::from_millis(20)),
            retries: 1,
            backoff: Duration::from_millis(1),
            min_confidence: 0.5,
            max_stalled_workers: DEFAULT_MAX_STALLED_WORKERS,
        }
    }

    #[test]
    fn reads_back_encoded_text() {
        let result = read("A1B2", 64, 64);
        assert_eq!(result.text, "A1B2");
        assert!((result.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reads_every_printable_character() {
        let alphabet: String = (0x21u8..=0x7E).map(char::from).collect();
        assert_eq!(read(&alphabet, 128, 128).text, alphabet);
    }

    #[test]
    fn keeps_inner_spaces_and_drops_trailing_ones() {
        assert_eq!(read("a b  c", 96, 96).text, "a b  c");
        assert_eq!(read("tail   ", 96, 96).text, "tail");
    }

    #[test]
    fn blank_pattern_reads_as_empty() {
        let blank = GrayImage::new(64, 64);
        let result = GlyphRecognizer::new().recognize(&blank).unwrap();
        assert!(result.is_empty());
        assert!(result.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn noise_reads_as_empty() {
        let mut state = 0x2545_f491_u32;
        let noise = GrayImage::from_fn(64, 64, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            Luma([if state & 1 == 1 { 255 } else { 0 }])
        });
        assert!(GlyphRecognizer::new().recognize(&noise).unwrap().is_empty());
    }

    #[test]
    fn timeout_yields_empty_result() {
        let slow: Arc<dyn Recognizer> = Arc::new(Slow);
        let result = recognize_with_policy(&slow, &GrayImage::new(8, 8), &fast_policy());
        assert!(result.is_empty());
    }

    #[test]
    fn single_retry_recovers_from_transient_failure() {
        let flaky = Arc::new(FailsOnce {
            calls: AtomicUsize::new(0),
        });
        let recognizer: Arc<dyn Recognizer> = flaky.clone();
        let result = recognize_with_policy(&recognizer, &GrayImage::new(8, 8), &fast_policy());
        assert_eq!(result.text, "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_retries_means_single_attempt() {
        let flaky = Arc::new(FailsOnce {
            calls: AtomicUsize::new(0),
        });
        let recognizer: Arc<dyn Recognizer> = flaky.clone();
        let policy = RecognitionPolicy {
            retries: 0,
            timeout: None,
            ..fast_policy()
        };
        assert!(recognize_with_policy(&recognizer, &GrayImage::new(8, 8), &policy).is_empty());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn low_confidence_is_discarded() {
        let weak: Arc<dyn Recognizer> = Arc::new(Fixed(Recognition {
            text: "maybe".into(),
            confidence: 0.2,
        }));
        let result = recognize_with_policy(&weak, &GrayImage::new(8, 8), &fast_policy());
        assert!(result.is_empty());
    }

    #[test]
    fn stalled_workers_are_capped() {
        let wedged = Arc::new(Wedged {
            started: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        });
        let recognizer: Arc<dyn Recognizer> = wedged.clone();
        let policy = RecognitionPolicy {
            timeout: Some(Duration::from_millis(5)),
            retries: 0,
            max_stalled_workers: 2,
            ..fast_policy()
        };
        for _ in 0..6 {
            let result = recognize_with_policy(&recognizer, &GrayImage::new(8, 8), &policy);
            assert!(result.is_empty());
        }
        // Give any just-spawned worker time to register its call.
        thread::sleep(Duration::from_millis(20));
        assert!(wedged.started.load(Ordering::SeqCst) <= 2);
        wedged.released.store(true, Ordering::SeqCst);
    }

    #[test]
    fn refused_attempt_reports_saturation() {
        let recognizer: Arc<dyn Recognizer> = Arc::new(Fixed(Recognition {
            text: "never".into(),
            confidence: 1.0,
        }));
        let policy = RecognitionPolicy {
            max_stalled_workers: 0,
            ..fast_policy()
        };
        assert!(matches!(
            attempt_once(&recognizer, &GrayImage::new(8, 8), &policy),
            Err(RecognitionError::Saturated(_))
        ));
        let inline = RecognitionPolicy {
            timeout: None,
            ..policy
        };
        assert_eq!(
            attempt_once(&recognizer, &GrayImage::new(8, 8), &inline).unwrap().text,
            "never"
        );
    }
}
