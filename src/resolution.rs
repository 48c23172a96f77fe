//! Physical pixel pitch from TIFF resolution tags.
//!
//! TIFF stores resolution as pixels per unit; the pitch reported here is its
//! reciprocal, in centimeters per pixel.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::warn;

use crate::error::TiffError;
use crate::format::tiff::{ImagePage, TiffHeader, TiffTag, ValueReader};
use crate::io::RangeReader;

const CENTIMETERS_PER_INCH: f64 = 2.54;

// =============================================================================
// ResolutionUnit
// =============================================================================

/// The ResolutionUnit tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionUnit {
    None = 1,
    Inch = 2,
    Centimeter = 3,
}

impl ResolutionUnit {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ResolutionUnit::None),
            2 => Some(ResolutionUnit::Inch),
            3 => Some(ResolutionUnit::Centimeter),
            _ => None,
        }
    }

    /// Centimeters per unit, for units with a physical length.
    pub fn centimeters(&self) -> Option<f64> {
        match self {
            ResolutionUnit::None => None,
            ResolutionUnit::Inch => Some(CENTIMETERS_PER_INCH),
            ResolutionUnit::Centimeter => Some(1.0),
        }
    }
}

/// Accepts the raw code (`"3"`) or a symbolic name (`"RESUNIT.CENTIMETER"`,
/// `"centimeter"`).
impl FromStr for ResolutionUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let name = normalized
            .strip_prefix("RESUNIT.")
            .unwrap_or(normalized.as_str());
        match name {
            "1" | "NONE" => Ok(ResolutionUnit::None),
            "2" | "INCH" => Ok(ResolutionUnit::Inch),
            "3" | "CENTIMETER" => Ok(ResolutionUnit::Centimeter),
            _ => Err(format!("unknown resolution unit '{}'", s.trim())),
        }
    }
}

impl fmt::Display for ResolutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionUnit::None => "RESUNIT.NONE",
            ResolutionUnit::Inch => "RESUNIT.INCH",
            ResolutionUnit::Centimeter => "RESUNIT.CENTIMETER",
        };
        f.write_str(name)
    }
}

// =============================================================================
// ResolutionInfo
// =============================================================================

/// Pixel pitch in centimeters per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolutionInfo {
    pub x: f64,
    pub y: f64,
}

impl ResolutionInfo {
    /// Unit scale, used when the file carries no usable resolution.
    pub const DEFAULT: ResolutionInfo = ResolutionInfo { x: 1.0, y: 1.0 };

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl Default for ResolutionInfo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A resolution that was either computed from tags or defaulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionResult {
    Computed(ResolutionInfo),
    Defaulted {
        value: ResolutionInfo,
        reason: String,
    },
}

impl ResolutionResult {
    fn defaulted(reason: impl Into<String>) -> Self {
        ResolutionResult::Defaulted {
            value: ResolutionInfo::DEFAULT,
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> ResolutionInfo {
        match self {
            ResolutionResult::Computed(info) => *info,
            ResolutionResult::Defaulted { value, .. } => *value,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, ResolutionResult::Defaulted { .. })
    }

    /// Why the default was used.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ResolutionResult::Computed(_) => None,
            ResolutionResult::Defaulted { reason, .. } => Some(reason),
        }
    }
}

// =============================================================================
// Resolving
// =============================================================================

/// Raw resolution tags of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionTags {
    /// (numerator, denominator)
    pub x_resolution: Option<(u32, u32)>,
    pub y_resolution: Option<(u32, u32)>,
    /// Raw code or symbolic name
    pub unit: Option<String>,
}

/// Convert resolution tags to a pitch in centimeters.
///
/// Centimeter units give `denominator / numerator` per axis; inch units the
/// same ratio times 2.54. Everything else defaults to (1, 1).
pub fn resolve_resolution(tags: &ResolutionTags) -> ResolutionResult {
    let unit_text = match &tags.unit {
        Some(unit) => unit,
        None => return ResolutionResult::defaulted("no ResolutionUnit tag"),
    };
    let factor = match unit_text.parse::<ResolutionUnit>() {
        Ok(unit) => match unit.centimeters() {
            Some(factor) => factor,
            None => {
                return ResolutionResult::defaulted(format!(
                    "resolution unit {} has no physical length; scaling supports centimeters or inches",
                    unit
                ))
            }
        },
        Err(e) => {
            return ResolutionResult::defaulted(format!(
                "{}; scaling supports centimeters or inches",
                e
            ))
        }
    };

    let x = match pitch("XResolution", tags.x_resolution) {
        Ok(x) => x,
        Err(reason) => return ResolutionResult::defaulted(reason),
    };
    let y = match pitch("YResolution", tags.y_resolution) {
        Ok(y) => y,
        Err(reason) => return ResolutionResult::defaulted(reason),
    };

    ResolutionResult::Computed(ResolutionInfo {
        x: x * factor,
        y: y * factor,
    })
}

fn pitch(tag: &str, rational: Option<(u32, u32)>) -> Result<f64, String> {
    match rational {
        None => Err(format!("no {} tag", tag)),
        Some((numerator, denominator)) if numerator == 0 || denominator == 0 => Err(format!(
            "malformed {} {}/{}",
            tag, numerator, denominator
        )),
        Some((numerator, denominator)) => Ok(denominator as f64 / numerator as f64),
    }
}

/// Read the resolution tags of `page`.
pub async fn read_resolution_tags<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    page: &ImagePage,
) -> Result<ResolutionTags, TiffError> {
    let values = ValueReader::new(reader, header);

    let x_resolution = match page.ifd.get_entry_by_tag(TiffTag::XResolution) {
        Some(entry) => Some(values.read_rational(entry).await?),
        None => None,
    };
    let y_resolution = match page.ifd.get_entry_by_tag(TiffTag::YResolution) {
        Some(entry) => Some(values.read_rational(entry).await?),
        None => None,
    };
    let unit = match page.ifd.get_entry_by_tag(TiffTag::ResolutionUnit) {
        Some(entry) => Some(values.read_u32(entry).await?.to_string()),
        None => None,
    };

    Ok(ResolutionTags {
        x_resolution,
        y_resolution,
        unit,
    })
}

/// Resolve the pitch of `page`; read failures default with the error as reason.
pub async fn resolve_page_resolution<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    page: &ImagePage,
) -> ResolutionResult {
    let result = match read_resolution_tags(reader, header, page).await {
        Ok(tags) => resolve_resolution(&tags),
        Err(e) => ResolutionResult::defaulted(format!("could not read resolution tags: {}", e)),
    };

    if let Some(reason) = result.reason() {
        warn!(slide = reader.identifier(), reason, "using default resolution (1, 1)");
    }
    result
}
