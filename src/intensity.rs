//! Modality and intensity-scale inference.
//!
//! Both are derived from pixel data of the coarsest level, never from the
//! declared bit depth: scanners routinely tag 8-bit data as 12-bit.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::array::{LazyArray, PixelStats};
use crate::error::IngestError;

/// Mean intensity below which an unhinted image is treated as fluorescence.
pub const DEFAULT_FLUORESCENCE_MEAN_THRESHOLD: f64 = 100.0;

// =============================================================================
// Modality
// =============================================================================

/// Acquisition mode of a slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Transmitted light, one composite image
    Brightfield,
    /// Independently excited channels, one page each
    Fluorescence,
}

impl Modality {
    /// Short code used on the command line and in metadata.
    pub const fn code(&self) -> &'static str {
        match self {
            Modality::Brightfield => "BF",
            Modality::Fluorescence => "IF",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bf" | "brightfield" => Ok(Modality::Brightfield),
            "if" | "fluorescence" => Ok(Modality::Fluorescence),
            other => Err(format!(
                "unknown modality '{}', expected BF or IF",
                other
            )),
        }
    }
}

/// Brightfield unless the mean falls under `threshold`.
pub fn infer_modality(mean: f64, threshold: f64) -> Modality {
    if mean < threshold {
        Modality::Fluorescence
    } else {
        Modality::Brightfield
    }
}

// =============================================================================
// IntensityScale
// =============================================================================

/// Display ceiling inferred from the observed maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntensityScale {
    /// (1, 255]
    Bits8,
    /// (255, 4095]
    Bits12,
    /// (4095, 65535]
    Bits16,
}

impl IntensityScale {
    /// Classify an observed maximum pixel value.
    pub fn from_max(max: f64) -> Result<Self, IngestError> {
        if max > 1.0 && max <= 255.0 {
            Ok(IntensityScale::Bits8)
        } else if max > 255.0 && max <= 4095.0 {
            Ok(IntensityScale::Bits12)
        } else if max > 4095.0 && max <= 65535.0 {
            Ok(IntensityScale::Bits16)
        } else {
            Err(IngestError::UnsupportedIntensityRange { max })
        }
    }

    pub const fn ceiling(&self) -> u32 {
        match self {
            IntensityScale::Bits8 => 255,
            IntensityScale::Bits12 => 4095,
            IntensityScale::Bits16 => 65535,
        }
    }

    /// Contrast limits `[0, ceiling]`.
    pub fn contrast_limits(&self) -> [f64; 2] {
        [0.0, self.ceiling() as f64]
    }
}

impl Serialize for IntensityScale {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.ceiling())
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Result of reducing the coarsest level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub stats: PixelStats,
    pub modality: Modality,
    pub scale: IntensityScale,
}

/// Reduce the coarsest of `levels` and classify it.
pub async fn classify(levels: &[LazyArray], threshold: f64) -> Result<Classification, IngestError> {
    let coarsest = levels
        .last()
        .ok_or_else(|| IngestError::NoLevels("empty level list".to_string()))?;

    let stats = coarsest.stats().await?;
    let scale = IntensityScale::from_max(stats.max)?;
    let modality = infer_modality(stats.mean, threshold);

    debug!(
        shape = ?coarsest.shape(),
        max = stats.max,
        mean = stats.mean,
        %modality,
        scale = scale.ceiling(),
        "classified coarsest level"
    );

    Ok(Classification {
        stats,
        modality,
        scale,
    })
}
