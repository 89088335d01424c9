//! Error types for the dwt-watermark crate.

/// Coarse classification of an [`Error`], for callers that map failures onto
/// client/server responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input rejected before any transform runs (format, text, config).
    InputValidation,
    /// Two planes, or a pattern and its subband, have incompatible sizes.
    DimensionMismatch,
    /// The payload does not fit the available subband capacity.
    PayloadTooLarge,
    /// The caller-supplied deadline had already passed.
    Deadline,
    /// I/O or codec failure outside the engine's control.
    Internal,
}

/// Errors that can occur while embedding or extracting a watermark.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The watermark text is empty or whitespace only.
    #[error("watermark text must not be empty")]
    EmptyPayload,

    /// The watermark text contains a character the payload font cannot render.
    #[error("unsupported character {ch:?} at position {position} (printable ASCII only)")]
    UnsupportedCharacter {
        /// The offending character.
        ch: char,
        /// Character index within the text.
        position: usize,
    },

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The image is too small for the requested decomposition depth.
    #[error("image too small ({width}x{height}) for {levels}-level decomposition")]
    ImageTooSmall {
        /// Image width in pixels.
        width: usize,
        /// Image height in pixels.
        height: usize,
        /// Requested decomposition depth.
        levels: usize,
    },

    /// A sample buffer does not match the declared plane dimensions.
    #[error("plane buffer holds {actual} samples, expected {expected}")]
    InvalidPlane {
        /// `width * height`.
        expected: usize,
        /// Length of the supplied buffer.
        actual: usize,
    },

    /// A subband sequence cannot be reconstructed.
    #[error("invalid decomposition: {0}")]
    InvalidDecomposition(String),

    /// The text cannot be rendered into the target subband at the minimum unit size.
    #[error("payload of {chars} characters does not fit a {width}x{height} subband")]
    PayloadTooLarge {
        /// Number of characters in the text.
        chars: usize,
        /// Target subband width.
        width: usize,
        /// Target subband height.
        height: usize,
    },

    /// A watermark pattern is larger than the subband it should be embedded in.
    #[error("pattern {pattern_width}x{pattern_height} exceeds subband {band_width}x{band_height}")]
    PatternTooLarge {
        /// Pattern width.
        pattern_width: usize,
        /// Pattern height.
        pattern_height: usize,
        /// Subband width.
        band_width: usize,
        /// Subband height.
        band_height: usize,
    },

    /// Two planes that must share dimensions do not.
    #[error("dimension mismatch: {expected_width}x{expected_height} vs {actual_width}x{actual_height}")]
    DimensionMismatch {
        /// Width of the reference plane.
        expected_width: usize,
        /// Height of the reference plane.
        expected_height: usize,
        /// Width of the other plane.
        actual_width: usize,
        /// Height of the other plane.
        actual_height: usize,
    },

    /// The caller's deadline expired before the engine was invoked.
    #[error("deadline expired before processing started")]
    DeadlineExpired,

    /// An input file exceeds the configured upload limit.
    #[error("input is {size} bytes, limit is {limit} bytes")]
    InputTooLarge {
        /// Input size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image decoding or encoding.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn dimension_mismatch(expected: (usize, usize), actual: (usize, usize)) -> Self {
        Self::DimensionMismatch {
            expected_width: expected.0,
            expected_height: expected.1,
            actual_width: actual.0,
            actual_height: actual.1,
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyPayload
            | Self::UnsupportedCharacter { .. }
            | Self::UnsupportedFormat(_)
            | Self::InvalidConfig(_)
            | Self::ImageTooSmall { .. }
            | Self::InputTooLarge { .. } => ErrorKind::InputValidation,
            Self::PatternTooLarge { .. } | Self::DimensionMismatch { .. } => {
                ErrorKind::DimensionMismatch
            }
            Self::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::DeadlineExpired => ErrorKind::Deadline,
            Self::InvalidPlane { .. }
            | Self::InvalidDecomposition(_)
            | Self::Io(_)
            | Self::Image(_) => ErrorKind::Internal,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
