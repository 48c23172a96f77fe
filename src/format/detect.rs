//! Slide format detection.
//!
//! Every supported file is TIFF or BigTIFF. The vendor flavor is read from the
//! first page's ImageDescription. It is logged and recorded as `format` in
//! each layer's metadata; level grouping and decoding are the same for all
//! flavors.
//!
//! - **PerkinElmer QPTIFF**: description is a `PerkinElmer-QPI-ImageDescription`
//!   XML document (one per channel page)
//! - **Aperio SVS**: description starts with the "Aperio" marker
//! - **OME-TIFF**: description is an OME-XML document
//! - **Generic TIFF**: anything else

use serde::Serialize;

use crate::error::FormatError;
use crate::io::RangeReader;

use super::tiff::{ByteOrder, Ifd, TiffHeader, TiffTag, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};

// =============================================================================
// SlideFormat
// =============================================================================

/// Detected slide flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideFormat {
    PerkinElmerQptiff,
    AperioSvs,
    OmeTiff,
    GenericTiff,
}

impl SlideFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::PerkinElmerQptiff => "PerkinElmer QPTIFF",
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::OmeTiff => "OME-TIFF",
            SlideFormat::GenericTiff => "Generic TIFF",
        }
    }

    /// Classify from the first page's ImageDescription.
    pub fn from_description(description: Option<&[u8]>) -> Self {
        let data = match description {
            Some(data) => data,
            None => return SlideFormat::GenericTiff,
        };

        if contains_marker(data, PERKINELMER_MARKER) {
            SlideFormat::PerkinElmerQptiff
        } else if contains_marker(data, APERIO_MARKER) {
            SlideFormat::AperioSvs
        } else if contains_marker(data, OME_MARKER) {
            SlideFormat::OmeTiff
        } else {
            SlideFormat::GenericTiff
        }
    }
}

// =============================================================================
// Format Detection
// =============================================================================

/// Bytes of ImageDescription inspected for markers.
const MAX_DESCRIPTION_BYTES: usize = 1024;

const PERKINELMER_MARKER: &[u8] = b"PerkinElmer-QPI";
const APERIO_MARKER: &[u8] = b"Aperio";
const OME_MARKER: &[u8] = b"<OME";

/// Check the TIFF magic and classify the slide flavor.
///
/// Anything that is not TIFF or BigTIFF is rejected with
/// [`FormatError::UnsupportedFormat`].
pub async fn detect_format<R: RangeReader + ?Sized>(
    reader: &R,
) -> Result<SlideFormat, FormatError> {
    let size = reader.size();
    if size < TIFF_HEADER_SIZE as u64 {
        return Err(FormatError::UnsupportedFormat {
            reason: format!("{} bytes is too small for a TIFF header", size),
        });
    }

    let header_len = std::cmp::min(BIGTIFF_HEADER_SIZE as u64, size) as usize;
    let header_bytes = reader.read_exact_at(0, header_len).await?;
    if !is_tiff_header(&header_bytes) {
        return Err(FormatError::UnsupportedFormat {
            reason: "missing TIFF or BigTIFF magic".to_string(),
        });
    }
    let header = TiffHeader::parse(&header_bytes, size)?;

    let count_bytes = reader
        .read_exact_at(header.first_ifd_offset, header.ifd_count_size())
        .await?;
    let entry_count = Ifd::parse_entry_count(&count_bytes, &header)?;
    let ifd_size = Ifd::calculate_size(entry_count, &header);
    let ifd_bytes = reader
        .read_exact_at(header.first_ifd_offset, ifd_size)
        .await?;
    let ifd = Ifd::parse(&ifd_bytes, &header)?;

    let description = read_description_prefix(reader, &ifd).await?;
    Ok(SlideFormat::from_description(description.as_deref()))
}

/// First bytes of the ImageDescription, if present.
async fn read_description_prefix<R: RangeReader + ?Sized>(
    reader: &R,
    ifd: &Ifd,
) -> Result<Option<Vec<u8>>, FormatError> {
    let entry = match ifd.get_entry_by_tag(TiffTag::ImageDescription) {
        Some(e) => e,
        None => return Ok(None),
    };

    let read_len = (entry.count as usize).min(MAX_DESCRIPTION_BYTES);
    if read_len == 0 {
        return Ok(None);
    }

    let bytes = if entry.is_inline {
        entry.value_offset_bytes[..read_len.min(entry.value_offset_bytes.len())].to_vec()
    } else {
        reader
            .read_exact_at(entry.value_offset, read_len)
            .await?
            .to_vec()
    };

    Ok(Some(bytes))
}

fn contains_marker(data: &[u8], marker: &[u8]) -> bool {
    data.windows(marker.len()).any(|window| window == marker)
}

/// Quick check for TIFF or BigTIFF magic.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }

    let byte_order = match [bytes[0], bytes[1]] {
        [0x49, 0x49] => ByteOrder::LittleEndian,
        [0x4D, 0x4D] => ByteOrder::BigEndian,
        _ => return false,
    };

    matches!(byte_order.read_u16(&bytes[2..4]), 42 | 43)
}

// =============================================================================
// Tests
// =============================================================================
