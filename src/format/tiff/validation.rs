//! Decodability checks for image pages.
//!
//! The loader opens slides without touching pixel data, so a page whose
//! encoding we cannot decode is only rejected when one of its chunks is first
//! read. These checks run at that point, and once at open to log warnings.
//!
//! # Supported Subset
//!
//! - **Compression**: none, LZW, Deflate (8 and 32946), JPEG
//! - **Samples**: 8/16/32-bit unsigned integers, 32-bit IEEE float
//! - **Layout**: chunky (PlanarConfiguration 1), or planar with one sample
//! - **Predictor**: none, or horizontal differencing on integer samples
//! - **JPEG**: 8-bit, one or three samples

use tracing::warn;

use crate::array::DType;
use crate::error::TiffError;

use super::pyramid::{ImagePage, TiffPyramid};
use super::tags::{Compression, Predictor};

// =============================================================================
// Validation Result
// =============================================================================

/// Outcome of validating a page or a whole pyramid.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    /// Non-fatal oddities worth logging
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        ValidationResult {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.is_valid &= other.is_valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// First error as a [`TiffError`], or `Ok(())`.
    pub fn into_result(self) -> Result<(), TiffError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

/// A reason a page cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnsupportedCompression {
        ifd_index: usize,
        compression: u16,
        compression_name: String,
    },

    UnsupportedSampleFormat {
        ifd_index: usize,
        bits_per_sample: u16,
        sample_format: u16,
    },

    /// Separate planes per sample
    PlanarLayout {
        ifd_index: usize,
        samples_per_pixel: u16,
    },

    UnsupportedPredictor {
        ifd_index: usize,
        predictor: u16,
    },

    /// JPEG chunks that are not 8-bit gray or 8-bit three-sample
    JpegSampleLayout {
        ifd_index: usize,
        bits_per_sample: u16,
        samples_per_pixel: u16,
    },

    NoLevels,
}

impl From<ValidationError> for TiffError {
    fn from(error: ValidationError) -> Self {
        match error {
            ValidationError::UnsupportedCompression {
                compression_name, ..
            } => TiffError::UnsupportedCompression(compression_name),
            ValidationError::UnsupportedSampleFormat {
                bits_per_sample,
                sample_format,
                ..
            } => TiffError::UnsupportedSampleFormat {
                bits_per_sample,
                sample_format,
            },
            ValidationError::PlanarLayout {
                ifd_index,
                samples_per_pixel,
            } => TiffError::UnsupportedLayout(format!(
                "IFD {} stores {} samples in separate planes",
                ifd_index, samples_per_pixel
            )),
            ValidationError::UnsupportedPredictor {
                ifd_index,
                predictor,
            } => TiffError::UnsupportedLayout(format!(
                "IFD {} uses predictor {}",
                ifd_index, predictor
            )),
            ValidationError::JpegSampleLayout {
                ifd_index,
                bits_per_sample,
                samples_per_pixel,
            } => TiffError::UnsupportedLayout(format!(
                "IFD {} is JPEG with {} samples of {} bits",
                ifd_index, samples_per_pixel, bits_per_sample
            )),
            ValidationError::NoLevels => TiffError::NoImageData,
        }
    }
}

// =============================================================================
// Page Validation
// =============================================================================

/// Validate that every chunk of `page` can be decoded.
pub fn validate_page(page: &ImagePage) -> ValidationResult {
    let mut result = ValidationResult::ok();
    let ifd_index = page.ifd_index;

    let compression = Compression::from_u16(page.compression);
    match compression {
        Some(c) if c.is_supported() => {}
        other => result.add_error(ValidationError::UnsupportedCompression {
            ifd_index,
            compression: page.compression,
            compression_name: other
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| format!("unknown ({})", page.compression)),
        }),
    }

    let dtype = DType::from_tiff(page.bits_per_sample, page.sample_format);
    if dtype.is_none() {
        result.add_error(ValidationError::UnsupportedSampleFormat {
            ifd_index,
            bits_per_sample: page.bits_per_sample,
            sample_format: page.sample_format,
        });
    }

    if page.planar_configuration == 2 && page.samples_per_pixel > 1 {
        result.add_error(ValidationError::PlanarLayout {
            ifd_index,
            samples_per_pixel: page.samples_per_pixel,
        });
    }

    match Predictor::from_u16(page.predictor) {
        Some(Predictor::None) => {}
        Some(Predictor::Horizontal) if dtype != Some(DType::F32) => {}
        _ => result.add_error(ValidationError::UnsupportedPredictor {
            ifd_index,
            predictor: page.predictor,
        }),
    }

    if compression == Some(Compression::Jpeg)
        && (page.bits_per_sample != 8 || !matches!(page.samples_per_pixel, 1 | 3))
    {
        result.add_error(ValidationError::JpegSampleLayout {
            ifd_index,
            bits_per_sample: page.bits_per_sample,
            samples_per_pixel: page.samples_per_pixel,
        });
    }

    let (chunk_w, chunk_h) = page.layout.chunk_size(page.width);
    if page.layout.is_tiled() && (chunk_w % 16 != 0 || chunk_h % 16 != 0) {
        result.add_warning(format!(
            "IFD {}: tile size {}x{} is not a multiple of 16",
            ifd_index, chunk_w, chunk_h
        ));
    }

    result
}

/// Validate a page, returning its sample type on success.
pub fn check_decodable(page: &ImagePage) -> Result<DType, TiffError> {
    validate_page(page).into_result()?;
    DType::from_tiff(page.bits_per_sample, page.sample_format).ok_or(
        TiffError::UnsupportedSampleFormat {
            bits_per_sample: page.bits_per_sample,
            sample_format: page.sample_format,
        },
    )
}

// =============================================================================
// Pyramid Validation
// =============================================================================

/// Validate every level page and note mixed encodings across levels.
pub fn validate_pyramid(pyramid: &TiffPyramid) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if pyramid.levels.is_empty() {
        result.add_error(ValidationError::NoLevels);
        return result;
    }

    let base_compression = pyramid.levels[0].pages[0].compression;
    for level in &pyramid.levels {
        for page in &level.pages {
            result.merge(validate_page(page));
        }
        if level.pages.iter().any(|p| p.compression != base_compression) {
            result.add_warning(format!(
                "level {} mixes compression schemes with level 0",
                level.level_index
            ));
        }
    }

    result
}

/// Log the warnings and errors of a pyramid without failing.
pub fn log_validation(identifier: &str, result: &ValidationResult) {
    for warning in &result.warnings {
        warn!(slide = identifier, "{}", warning);
    }
    for error in &result.errors {
        warn!(slide = identifier, ?error, "page will fail to decode when read");
    }
}

// =============================================================================
// Tests
// =============================================================================
