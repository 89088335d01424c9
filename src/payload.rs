//! Text payload encoding.
//!
//! Text is rendered with the built-in 5x7 font into a framed block:
//!
//! ```text
//! ###########################
//! #                         #
//! #  A    1    B    2       #      1 unit border, 1 unit margin,
//! #  ...                    #      glyphs advance 6 units across
//! #                         #      and 8 units down
//! ###########################
//! ```
//!
//! A block of `c` columns and `r` rows measures `(6c + 3) x (8r + 3)` font
//! units. Each unit becomes `unit x unit` pattern pixels, with `unit` the
//! largest size that fits the target subband. Decoding goes through a
//! [`Recognizer`], which only sees the pattern image.

use std::sync::Arc;

use image::{GrayImage, Luma};
use tracing::debug;

use crate::error::{Error, Result};
use crate::font::{self, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::recognition::{recognize_with_policy, Recognition, RecognitionPolicy, Recognizer};

/// Smallest unit size (pattern pixels per font unit) that is still decodable.
pub const MIN_UNIT: usize = 1;

/// Pattern intensity of inked units.
pub const INK: u8 = 255;

/// Border plus margin width, in units, on each side of the block.
pub(crate) const FRAME_UNITS: usize = 2;
pub(crate) const CELL_ADVANCE: usize = GLYPH_WIDTH + 1;
pub(crate) const LINE_ADVANCE: usize = GLYPH_HEIGHT + 1;

/// A rendered or recovered watermark image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkPattern {
    image: GrayImage,
}

impl WatermarkPattern {
    /// Wrap a grayscale image as a pattern.
    #[must_use]
    pub fn from_image(image: GrayImage) -> Self {
        Self { image }
    }

    /// The pattern pixels.
    #[must_use]
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Unwrap into the pattern pixels.
    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.image
    }

    /// Pattern width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.image.width() as usize
    }

    /// Pattern height.
    #[must_use]
    pub fn height(&self) -> usize {
        self.image.height() as usize
    }

    /// `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }
}

/// Geometry of a rendered text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Pattern pixels per font unit.
    pub unit: usize,
    /// Glyph cells per line.
    pub columns: usize,
    /// Lines of glyph cells.
    pub rows: usize,
}

impl Layout {
    /// Block width in pattern pixels.
    #[must_use]
    pub fn block_width(&self) -> usize {
        units_across(self.columns) * self.unit
    }

    /// Block height in pattern pixels.
    #[must_use]
    pub fn block_height(&self) -> usize {
        units_down(self.rows) * self.unit
    }
}

pub(crate) fn units_across(columns: usize) -> usize {
    2 * FRAME_UNITS + columns * CELL_ADVANCE - 1
}

pub(crate) fn units_down(rows: usize) -> usize {
    2 * FRAME_UNITS + rows * LINE_ADVANCE - 1
}

/// Pick the layout for `chars` characters in a `width x height` pattern.
///
/// Prefers the largest unit, then the fewest lines. Returns `None` if the
/// text does not fit at [`MIN_UNIT`].
#[must_use]
pub fn layout_for(chars: usize, width: usize, height: usize) -> Option<Layout> {
    if chars == 0 {
        return None;
    }
    let max_unit = (width / units_across(1)).min(height / units_down(1));
    for unit in (MIN_UNIT..=max_unit).rev() {
        for columns in (1..=chars).rev() {
            let rows = chars.div_ceil(columns);
            if units_across(columns) * unit <= width && units_down(rows) * unit <= height {
                return Some(Layout {
                    unit,
                    columns,
                    rows,
                });
            }
        }
    }
    None
}

/// Maximum number of characters a `width x height` pattern can hold.
#[must_use]
pub fn capacity(width: usize, height: usize) -> usize {
    let across = width / MIN_UNIT + 1;
    let down = height / MIN_UNIT + 1;
    let columns = across.saturating_sub(2 * FRAME_UNITS) / CELL_ADVANCE;
    let rows = down.saturating_sub(2 * FRAME_UNITS) / LINE_ADVANCE;
    columns * rows
}

/// Check that `text` is non-blank printable ASCII.
///
/// # Errors
///
/// - [`Error::EmptyPayload`] for empty or whitespace-only text.
/// - [`Error::UnsupportedCharacter`] for anything outside `0x20..=0x7E`.
pub fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::EmptyPayload);
    }
    if let Some((position, ch)) = text.chars().enumerate().find(|(_, c)| !font::is_renderable(*c)) {
        return Err(Error::UnsupportedCharacter { ch, position });
    }
    Ok(())
}

/// Render `text` into a `width x height` pattern.
///
/// The output is deterministic for a given text and size.
///
/// # Errors
///
/// - Validation errors from [`validate_text`].
/// - [`Error::PayloadTooLarge`] if the text does not fit at [`MIN_UNIT`].
pub fn encode(text: &str, width: usize, height: usize) -> Result<WatermarkPattern> {
    validate_text(text)?;
    let chars: Vec<char> = text.chars().collect();
    let layout = layout_for(chars.len(), width, height).ok_or(Error::PayloadTooLarge {
        chars: chars.len(),
        width,
        height,
    })?;
    debug!(
        chars = chars.len(),
        unit = layout.unit,
        columns = layout.columns,
        rows = layout.rows,
        "payload layout"
    );

    let across = units_across(layout.columns);
    let down = units_down(layout.rows);
    let unit_inked = |ux: usize, uy: usize| -> bool {
        let ring = ux.min(uy).min(across - 1 - ux).min(down - 1 - uy);
        if ring == 0 {
            return true;
        }
        if ring < FRAME_UNITS {
            return false;
        }
        let (tx, ty) = (ux - FRAME_UNITS, uy - FRAME_UNITS);
        let (gx, gy) = (tx % CELL_ADVANCE, ty % LINE_ADVANCE);
        if gx >= GLYPH_WIDTH || gy >= GLYPH_HEIGHT {
            return false;
        }
        let index = (ty / LINE_ADVANCE) * layout.columns + tx / CELL_ADVANCE;
        chars
            .get(index)
            .and_then(|&ch| font::glyph(ch))
            .is_some_and(|columns| font::is_inked(columns, gx, gy))
    };

    let x0 = (width - layout.block_width()) / 2;
    let y0 = (height - layout.block_height()) / 2;
    #[allow(clippy::cast_possible_truncation)]
    let mut image = GrayImage::new(width as u32, height as u32);
    for py in 0..layout.block_height() {
        for px in 0..layout.block_width() {
            if unit_inked(px / layout.unit, py / layout.unit) {
                #[allow(clippy::cast_possible_truncation)]
                image.put_pixel((x0 + px) as u32, (y0 + py) as u32, Luma([INK]));
            }
        }
    }
    Ok(WatermarkPattern::from_image(image))
}

/// Recover text from a pattern through `recognizer`.
///
/// Nothing recognized is a valid outcome: the result is then empty with
/// confidence 0.
#[must_use]
pub fn decode(
    pattern: &WatermarkPattern,
    recognizer: &Arc<dyn Recognizer>,
    policy: &RecognitionPolicy,
) -> Recognition {
    recognize_with_policy(recognizer, pattern.image(), policy)
}
