//! JPEG chunk stream handling.
//!
//! JPEG-compressed TIFF pages often store "abbreviated" streams: each tile or
//! strip carries only its frame and scan, while the quantization (DQT) and
//! Huffman (DHT) tables live once in the page's `JPEGTables` tag. Before a
//! chunk can be handed to a decoder the two are spliced back together:
//!
//! ```text
//! tables:  SOI DQT DHT EOI
//! chunk:   SOI SOF SOS <scan> EOI
//! merged:  SOI DQT DHT SOF SOS <scan> EOI
//! ```

use std::borrow::Cow;

// =============================================================================
// JPEG Markers
// =============================================================================

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
pub const SOS: [u8; 2] = [0xFF, 0xDA];
pub const DQT: [u8; 2] = [0xFF, 0xDB];
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Baseline, extended and progressive Huffman frames
const SOF_MARKERS: [u8; 3] = [0xC0, 0xC1, 0xC2];

// =============================================================================
// Stream Inspection
// =============================================================================

/// Frame parameters read from the SOF segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    pub components: u8,
}

/// Walk the marker segments that precede the scan, calling `visit` with each
/// marker byte and segment payload. Stops at SOS, EOI or malformed input.
fn walk_header_segments(data: &[u8], mut visit: impl FnMut(u8, &[u8]) -> bool) {
    if data.len() < 4 || data[0..2] != SOI {
        return;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return;
        }
        let marker = data[pos + 1];
        // Fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == SOS[1] || marker == EOI[1] {
            visit(marker, &[]);
            return;
        }

        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if length < 2 || pos + 2 + length > data.len() {
            return;
        }
        if !visit(marker, &data[pos + 4..pos + 2 + length]) {
            return;
        }
        pos += 2 + length;
    }
}

/// Whether `data` defines its own quantization or Huffman tables.
pub fn has_tables(data: &[u8]) -> bool {
    let mut found = false;
    walk_header_segments(data, |marker, _| {
        if marker == DQT[1] || marker == DHT[1] {
            found = true;
            return false;
        }
        true
    });
    found
}

/// Whether `data` starts a scan without defining any tables first.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    let mut tables = false;
    let mut reached_scan = false;
    walk_header_segments(data, |marker, _| {
        if marker == DQT[1] || marker == DHT[1] {
            tables = true;
            return false;
        }
        if marker == SOS[1] {
            reached_scan = true;
        }
        true
    });
    reached_scan && !tables
}

/// Frame parameters of the first SOF segment, if any.
pub fn frame_info(data: &[u8]) -> Option<FrameInfo> {
    let mut info = None;
    walk_header_segments(data, |marker, payload| {
        if SOF_MARKERS.contains(&marker) && payload.len() >= 6 {
            info = Some(FrameInfo {
                precision: payload[0],
                height: u16::from_be_bytes([payload[1], payload[2]]),
                width: u16::from_be_bytes([payload[3], payload[4]]),
                components: payload[5],
            });
            return false;
        }
        true
    });
    info
}

// =============================================================================
// JPEG Tables Merging
// =============================================================================

/// Splice `tables` (SOI ... EOI) in front of an abbreviated chunk.
///
/// The tables' EOI and the chunk's SOI are dropped so the result has exactly
/// one of each.
pub fn merge_jpeg_tables(tables: &[u8], chunk: &[u8]) -> Vec<u8> {
    if tables.is_empty() {
        return chunk.to_vec();
    }
    if chunk.is_empty() {
        return Vec::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let chunk_start = if chunk.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = Vec::with_capacity(tables_end + chunk.len() - chunk_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&chunk[chunk_start..]);
    merged
}

/// Return a self-contained JPEG stream for a chunk, merging tables when the
/// chunk lacks its own.
pub fn prepare_chunk_jpeg<'a>(tables: Option<&[u8]>, chunk: &'a [u8]) -> Cow<'a, [u8]> {
    match tables {
        Some(tables) if !tables.is_empty() && !has_tables(chunk) => {
            Cow::Owned(merge_jpeg_tables(tables, chunk))
        }
        _ => Cow::Borrowed(chunk),
    }
}

// =============================================================================
// Tests
// =============================================================================
