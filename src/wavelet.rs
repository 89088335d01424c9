//! Multi-level 2-D discrete wavelet transform.
//!
//! Every basis is a two-step lifting scheme on even/odd sample pairs:
//!
//! ```text
//! d[i] = odd[i]  - (p0 * even[i] + p1 * even[i + 1])     // predict
//! s[i] = even[i] + (u0 * d[i - 1] + u1 * d[i])           // update
//! low  = s * sqrt(2),  high = d / sqrt(2)
//! ```
//!
//! Out-of-range neighbours reuse the nearest edge sample (symmetric
//! extension). The inverse runs the same steps backwards with the same
//! boundary rule, so forward/inverse pairs agree to floating-point rounding.
//!
//! The lifting coefficients live in a versioned constant table. Rows must
//! never change once published; a new basis gets a new row and a version bump.
//! Each row also carries the basis' reconstruction gain: the largest pixel
//! change that adding `±1` to every coefficient of one level-1 detail band
//! can cause after the inverse transform. Deeper levels halve it per level.

use std::f32::consts::{FRAC_1_SQRT_2, SQRT_2};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plane::PixelPlane;

/// Version of the basis table below.
pub const WAVELET_TABLE_VERSION: u32 = 1;

/// Wavelet basis used by a forward/inverse pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveletBasis {
    /// Haar (Daubechies 1), orthonormal.
    #[default]
    Haar,
    /// LeGall 5/3 (CDF 5/3) biorthogonal.
    LeGall53,
}

#[derive(Debug, Clone, Copy)]
struct LiftingScheme {
    predict: [f32; 2],
    update: [f32; 2],
    reconstruction_gain: f32,
}

const BASIS_TABLE: [(WaveletBasis, &str, LiftingScheme); 2] = [
    (
        WaveletBasis::Haar,
        "haar",
        LiftingScheme {
            predict: [1.0, 0.0],
            update: [0.0, 0.5],
            reconstruction_gain: 0.5,
        },
    ),
    (
        WaveletBasis::LeGall53,
        "legall53",
        LiftingScheme {
            predict: [0.5, 0.5],
            update: [0.25, 0.25],
            reconstruction_gain: 2.0,
        },
    ),
];

impl WaveletBasis {
    /// All published bases, in table order.
    pub const ALL: [Self; 2] = [Self::Haar, Self::LeGall53];

    /// Stable lowercase name.
    #[must_use]
    pub fn name(self) -> &'static str {
        Self::entry(self).1
    }

    /// Upper bound on the pixel change caused by adding a perturbation of at
    /// most `1.0` per coefficient to one detail band at `level` (1-based).
    #[must_use]
    pub fn reconstruction_gain(self, level: usize) -> f32 {
        let halvings = i32::try_from(level.saturating_sub(1)).unwrap_or(i32::MAX);
        self.scheme().reconstruction_gain * 0.5f32.powi(halvings)
    }

    fn scheme(self) -> LiftingScheme {
        Self::entry(self).2
    }

    fn entry(self) -> &'static (Self, &'static str, LiftingScheme) {
        // Every variant has exactly one row.
        BASIS_TABLE
            .iter()
            .find(|(basis, _, _)| *basis == self)
            .unwrap_or(&BASIS_TABLE[0])
    }
}

impl fmt::Display for WaveletBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WaveletBasis {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        BASIS_TABLE
            .iter()
            .find(|(_, name, _)| *name == lower)
            .map(|(basis, _, _)| *basis)
            .ok_or_else(|| format!("unknown wavelet basis '{s}' (expected haar or legall53)"))
    }
}

/// One of the three detail subbands of a decomposition level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailBand {
    /// Low-pass along rows, high-pass along columns (horizontal edges).
    Horizontal,
    /// High-pass along rows, low-pass along columns (vertical edges).
    Vertical,
    /// High-pass in both directions.
    #[default]
    Diagonal,
}

impl fmt::Display for DetailBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
            Self::Diagonal => "diagonal",
        })
    }
}

impl FromStr for DetailBand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "horizontal" | "lh" => Ok(Self::Horizontal),
            "vertical" | "hl" => Ok(Self::Vertical),
            "diagonal" | "hh" => Ok(Self::Diagonal),
            _ => Err(format!(
                "unknown detail band '{s}' (expected horizontal, vertical or diagonal)"
            )),
        }
    }
}

/// Columns/rows appended to a level's input to make its dimensions even.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    /// Mirrored columns appended on the right (0 or 1).
    pub columns: usize,
    /// Mirrored rows appended at the bottom (0 or 1).
    pub rows: usize,
}

/// The four subbands produced by one decomposition level.
#[derive(Debug, Clone, PartialEq)]
pub struct SubbandSet {
    /// Low-pass in both directions; input to the next level.
    pub approximation: PixelPlane,
    /// Horizontal-detail subband.
    pub horizontal: PixelPlane,
    /// Vertical-detail subband.
    pub vertical: PixelPlane,
    /// Diagonal-detail subband.
    pub diagonal: PixelPlane,
    /// Padding applied to this level's input.
    pub padding: Padding,
}

impl SubbandSet {
    /// Borrow a detail subband.
    #[must_use]
    pub fn detail(&self, band: DetailBand) -> &PixelPlane {
        match band {
            DetailBand::Horizontal => &self.horizontal,
            DetailBand::Vertical => &self.vertical,
            DetailBand::Diagonal => &self.diagonal,
        }
    }

    /// Mutably borrow a detail subband.
    pub fn detail_mut(&mut self, band: DetailBand) -> &mut PixelPlane {
        match band {
            DetailBand::Horizontal => &mut self.horizontal,
            DetailBand::Vertical => &mut self.vertical,
            DetailBand::Diagonal => &mut self.diagonal,
        }
    }

    /// Dimensions of the plane this level decomposed, before padding.
    #[must_use]
    pub fn source_dimensions(&self) -> (usize, usize) {
        let (w, h) = self.approximation.dimensions();
        (
            (2 * w).saturating_sub(self.padding.columns),
            (2 * h).saturating_sub(self.padding.rows),
        )
    }

    /// Size of the detail region that does not depend on the padding sample.
    ///
    /// When a level pads its input, the last coefficient column (or row) of
    /// every detail band pairs a real sample with its repeated copy; the
    /// inverse transform crops that copy away, so values written there do
    /// not survive into the reconstructed plane.
    #[must_use]
    pub fn unpadded_detail_dimensions(&self) -> (usize, usize) {
        let (w, h) = self.approximation.dimensions();
        (
            w.saturating_sub(self.padding.columns),
            h.saturating_sub(self.padding.rows),
        )
    }

    fn validate(&self) -> Result<()> {
        let dims = self.approximation.dimensions();
        for (name, plane) in [
            ("horizontal", &self.horizontal),
            ("vertical", &self.vertical),
            ("diagonal", &self.diagonal),
        ] {
            if plane.dimensions() != dims {
                return Err(Error::InvalidDecomposition(format!(
                    "{name} subband is {}x{}, approximation is {}x{}",
                    plane.width(),
                    plane.height(),
                    dims.0,
                    dims.1
                )));
            }
        }
        if self.padding.columns > 1 || self.padding.rows > 1 || dims.0 == 0 || dims.1 == 0 {
            return Err(Error::InvalidDecomposition(format!(
                "padding {:?} is inconsistent with a {}x{} level",
                self.padding, dims.0, dims.1
            )));
        }
        Ok(())
    }
}

/// Forward/inverse DWT for a fixed basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaveletTransform {
    basis: WaveletBasis,
}

impl WaveletTransform {
    /// Create a transform for `basis`.
    #[must_use]
    pub const fn new(basis: WaveletBasis) -> Self {
        Self { basis }
    }

    /// The basis this transform uses.
    #[must_use]
    pub const fn basis(&self) -> WaveletBasis {
        self.basis
    }

    /// Decompose `plane` into `levels` cascaded subband sets, shallowest first.
    ///
    /// Each level decomposes the previous level's approximation. Odd
    /// dimensions are padded by repeating the boundary column/row.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `levels == 0`.
    /// - [`Error::ImageTooSmall`] if any level's input would be narrower or
    ///   shorter than 2 samples.
    pub fn forward(&self, plane: &PixelPlane, levels: usize) -> Result<Vec<SubbandSet>> {
        if levels == 0 {
            return Err(Error::InvalidConfig(
                "decomposition needs at least one level".into(),
            ));
        }
        let (mut w, mut h) = plane.dimensions();
        for _ in 0..levels {
            if w < 2 || h < 2 {
                return Err(Error::ImageTooSmall {
                    width: plane.width(),
                    height: plane.height(),
                    levels,
                });
            }
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }

        let scheme = self.basis.scheme();
        let mut sets: Vec<SubbandSet> = Vec::with_capacity(levels);
        for _ in 0..levels {
            let input = sets.last().map_or(plane, |set| &set.approximation);
            let (padded, columns, rows) = input.mirror_to_even();
            let (approximation, horizontal, vertical, diagonal) = analyze(scheme, &padded);
            sets.push(SubbandSet {
                approximation,
                horizontal,
                vertical,
                diagonal,
                padding: Padding { columns, rows },
            });
        }
        Ok(sets)
    }

    /// Reconstruct the plane a [`forward`](Self::forward) call decomposed.
    ///
    /// Only the deepest level's approximation is read; shallower
    /// approximations are rebuilt from the detail subbands.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDecomposition`] if `subbands` is empty or its
    /// levels do not chain together.
    pub fn inverse(&self, subbands: &[SubbandSet]) -> Result<PixelPlane> {
        let deepest = subbands
            .last()
            .ok_or_else(|| Error::InvalidDecomposition("no subband sets".into()))?;
        for set in subbands {
            set.validate()?;
        }
        for pair in subbands.windows(2) {
            let expected = pair[0].approximation.dimensions();
            if pair[1].source_dimensions() != expected {
                let (w, h) = pair[1].source_dimensions();
                return Err(Error::InvalidDecomposition(format!(
                    "level decomposes {w}x{h}, previous approximation is {}x{}",
                    expected.0, expected.1
                )));
            }
        }

        let scheme = self.basis.scheme();
        let mut current = deepest.approximation.clone();
        for set in subbands.iter().rev() {
            let full = synthesize(scheme, &current, set);
            let (w, h) = set.source_dimensions();
            current = full.cropped(w, h);
        }
        Ok(current)
    }
}

/// One 2-D analysis step on an even-sized plane.
fn analyze(
    scheme: LiftingScheme,
    plane: &PixelPlane,
) -> (PixelPlane, PixelPlane, PixelPlane, PixelPlane) {
    let half_w = plane.width() / 2;
    let mut low_x = PixelPlane::new(half_w, plane.height());
    let mut high_x = PixelPlane::new(half_w, plane.height());
    for y in 0..plane.height() {
        lift_forward(scheme, plane.row(y), low_x.row_mut(y), high_x.row_mut(y));
    }
    let (approximation, horizontal) = columns_forward(scheme, &low_x);
    let (vertical, diagonal) = columns_forward(scheme, &high_x);
    (approximation, horizontal, vertical, diagonal)
}

/// One 2-D synthesis step, producing the padded (even-sized) plane.
fn synthesize(scheme: LiftingScheme, approximation: &PixelPlane, set: &SubbandSet) -> PixelPlane {
    let low_x = columns_inverse(scheme, approximation, &set.horizontal);
    let high_x = columns_inverse(scheme, &set.vertical, &set.diagonal);
    let mut out = PixelPlane::new(low_x.width() * 2, low_x.height());
    for y in 0..low_x.height() {
        lift_inverse(scheme, low_x.row(y), high_x.row(y), out.row_mut(y));
    }
    out
}

fn columns_forward(scheme: LiftingScheme, plane: &PixelPlane) -> (PixelPlane, PixelPlane) {
    let (w, h) = plane.dimensions();
    let mut low = PixelPlane::new(w, h / 2);
    let mut high = PixelPlane::new(w, h / 2);
    let mut column = vec![0.0; h];
    let mut low_col = vec![0.0; h / 2];
    let mut high_col = vec![0.0; h / 2];
    for x in 0..w {
        for (y, v) in column.iter_mut().enumerate() {
            *v = plane.get(x, y);
        }
        lift_forward(scheme, &column, &mut low_col, &mut high_col);
        for y in 0..h / 2 {
            low.set(x, y, low_col[y]);
            high.set(x, y, high_col[y]);
        }
    }
    (low, high)
}

fn columns_inverse(scheme: LiftingScheme, low: &PixelPlane, high: &PixelPlane) -> PixelPlane {
    let (w, half_h) = low.dimensions();
    let mut out = PixelPlane::new(w, half_h * 2);
    let mut low_col = vec![0.0; half_h];
    let mut high_col = vec![0.0; half_h];
    let mut column = vec![0.0; half_h * 2];
    for x in 0..w {
        for y in 0..half_h {
            low_col[y] = low.get(x, y);
            high_col[y] = high.get(x, y);
        }
        lift_inverse(scheme, &low_col, &high_col, &mut column);
        for (y, v) in column.iter().enumerate() {
            out.set(x, y, *v);
        }
    }
    out
}

/// 1-D forward lifting of `input` (even length) into `low` and `high`.
fn lift_forward(scheme: LiftingScheme, input: &[f32], low: &mut [f32], high: &mut [f32]) {
    let n = low.len();
    debug_assert_eq!(input.len(), 2 * n);
    let [p0, p1] = scheme.predict;
    let [u0, u1] = scheme.update;

    for i in 0..n {
        let next = input[2 * (i + 1).min(n - 1)];
        high[i] = input[2 * i + 1] - (p0 * input[2 * i] + p1 * next);
    }
    for i in 0..n {
        let prev = high[i.saturating_sub(1)];
        low[i] = input[2 * i] + (u0 * prev + u1 * high[i]);
    }
    for v in low.iter_mut() {
        *v *= SQRT_2;
    }
    for v in high.iter_mut() {
        *v *= FRAC_1_SQRT_2;
    }
}

/// 1-D inverse lifting of `low`/`high` into `out` (twice their length).
fn lift_inverse(scheme: LiftingScheme, low: &[f32], high: &[f32], out: &mut [f32]) {
    let n = low.len();
    debug_assert_eq!(out.len(), 2 * n);
    let [p0, p1] = scheme.predict;
    let [u0, u1] = scheme.update;

    let detail: Vec<f32> = high.iter().map(|v| v * SQRT_2).collect();
    for i in 0..n {
        let prev = detail[i.saturating_sub(1)];
        out[2 * i] = low[i] * FRAC_1_SQRT_2 - (u0 * prev + u1 * detail[i]);
    }
    for i in 0..n {
        let next = out[2 * (i + 1).min(n - 1)];
        out[2 * i + 1] = detail[i] + (p0 * out[2 * i] + p1 * next);
    }
}
