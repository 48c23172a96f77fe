//! Chunk decompression and sample unpacking.
//!
//! A chunk (tile or strip) is decoded into a row-major buffer of `stride`
//! pixels by `rows` rows, `samples_per_pixel` samples each. Tiles at the right
//! and bottom edges are padded to full size; those padding pixels are reported
//! through [`ChunkGeometry`] so callers can skip them.

use std::io::{Cursor, Read};

use flate2::read::ZlibDecoder;
use image::{ImageFormat, ImageReader};

use crate::error::TiffError;
use crate::format::jpeg::prepare_chunk_jpeg;
use crate::format::tiff::{ByteOrder, ChunkLayout, Compression, ImagePage, Predictor};

use super::pixels::Sample;

// =============================================================================
// Chunk Geometry
// =============================================================================

/// Placement of one chunk within its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    /// Left column of the chunk in page pixels
    pub x: u32,
    /// Top row of the chunk in page pixels
    pub y: u32,
    /// Pixels per row in the decoded buffer
    pub stride: u32,
    /// Rows in the decoded buffer
    pub rows: u32,
    /// Pixels per row that lie inside the page
    pub valid_width: u32,
    /// Rows that lie inside the page
    pub valid_height: u32,
}

impl ChunkGeometry {
    pub fn for_chunk(page: &ImagePage, chunk_index: usize) -> Self {
        let (chunk_w, chunk_h) = page.layout.chunk_size(page.width);
        let (chunk_w, chunk_h) = (chunk_w.max(1), chunk_h.max(1));
        let (across, _) = page.chunk_grid();
        let across = across.max(1) as usize;

        let x = (chunk_index % across) as u32 * chunk_w;
        let y = (chunk_index / across) as u32 * chunk_h;
        let valid_width = chunk_w.min(page.width.saturating_sub(x));
        let valid_height = chunk_h.min(page.height.saturating_sub(y));

        // The final strip only stores the rows that remain
        let rows = match page.layout {
            ChunkLayout::Tiled { .. } => chunk_h,
            ChunkLayout::Stripped { .. } => valid_height,
        };

        ChunkGeometry {
            x,
            y,
            stride: chunk_w,
            rows,
            valid_width,
            valid_height,
        }
    }

    /// Number of samples in the decoded buffer.
    pub fn sample_count(&self, samples_per_pixel: u16) -> usize {
        self.stride as usize * self.rows as usize * samples_per_pixel as usize
    }
}

// =============================================================================
// Chunk Decoding
// =============================================================================

/// Decode one compressed chunk of `page` into samples.
///
/// An empty chunk (zero byte count) decodes to zeros. Decompressed data that
/// is shorter than the chunk is zero-padded and longer data is truncated.
pub fn decode_chunk<T: Sample>(
    page: &ImagePage,
    chunk_index: usize,
    compressed: &[u8],
    jpeg_tables: Option<&[u8]>,
    byte_order: ByteOrder,
) -> Result<Vec<T>, TiffError> {
    let geometry = ChunkGeometry::for_chunk(page, chunk_index);
    let samples_per_pixel = page.samples_per_pixel.max(1);
    let sample_count = geometry.sample_count(samples_per_pixel);

    if compressed.is_empty() {
        return Ok(vec![T::default(); sample_count]);
    }

    let decode_error = |message: String| TiffError::Decode {
        ifd_index: page.ifd_index,
        chunk: chunk_index,
        message,
    };

    let sample_size = T::DTYPE.size_in_bytes();
    let expected_len = sample_count * sample_size;

    let mut raw = match Compression::from_u16(page.compression) {
        Some(Compression::None) => compressed.to_vec(),
        Some(Compression::Lzw) => decompress_lzw(compressed).map_err(decode_error)?,
        Some(Compression::Deflate) | Some(Compression::AdobeDeflate) => {
            decompress_deflate(compressed, expected_len).map_err(decode_error)?
        }
        Some(Compression::Jpeg) => {
            decode_jpeg(compressed, jpeg_tables, &geometry, samples_per_pixel)
                .map_err(decode_error)?
        }
        other => {
            return Err(TiffError::UnsupportedCompression(
                other
                    .map(|c| c.name().to_string())
                    .unwrap_or_else(|| format!("unknown ({})", page.compression)),
            ))
        }
    };
    raw.resize(expected_len, 0);

    let mut samples: Vec<T> = raw
        .chunks_exact(sample_size)
        .map(|bytes| T::from_bytes(bytes, byte_order))
        .collect();

    if Predictor::from_u16(page.predictor) == Some(Predictor::Horizontal) {
        undo_horizontal_predictor(
            &mut samples,
            geometry.stride as usize,
            samples_per_pixel as usize,
        );
    }

    Ok(samples)
}

fn decompress_lzw(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
    decoder
        .decode(data)
        .map_err(|e| format!("LZW decode error: {}", e))
}

fn decompress_deflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>, String> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| format!("Deflate decode error: {}", e))?;
    Ok(decompressed)
}

/// Decode a JPEG chunk into 8-bit samples laid out on the chunk grid.
fn decode_jpeg(
    data: &[u8],
    tables: Option<&[u8]>,
    geometry: &ChunkGeometry,
    samples_per_pixel: u16,
) -> Result<Vec<u8>, String> {
    let stream = prepare_chunk_jpeg(tables, data);
    let image = ImageReader::with_format(Cursor::new(stream.as_ref()), ImageFormat::Jpeg)
        .decode()
        .map_err(|e| format!("JPEG decode error: {}", e))?;

    let (width, height) = (image.width() as usize, image.height() as usize);
    let pixels = if samples_per_pixel == 1 {
        image.to_luma8().into_raw()
    } else {
        image.to_rgb8().into_raw()
    };

    let spp = samples_per_pixel as usize;
    let stride = geometry.stride as usize;
    let rows = geometry.rows as usize;
    if width == stride && height >= rows {
        return Ok(pixels);
    }

    // Encoders may emit a frame smaller or larger than the chunk grid
    let mut out = vec![0u8; stride * rows * spp];
    let copy_width = width.min(stride) * spp;
    for row in 0..height.min(rows) {
        let src = row * width * spp;
        let dst = row * stride * spp;
        out[dst..dst + copy_width].copy_from_slice(&pixels[src..src + copy_width]);
    }
    Ok(out)
}

/// Reverse horizontal differencing row by row.
///
/// Each sample holds the difference to the same sample of the previous pixel
/// in the row; the first pixel of every row is stored as-is.
pub fn undo_horizontal_predictor<T: Sample>(
    samples: &mut [T],
    row_pixels: usize,
    samples_per_pixel: usize,
) {
    let row_len = row_pixels * samples_per_pixel;
    if row_len == 0 {
        return;
    }
    for row in samples.chunks_mut(row_len) {
        for i in samples_per_pixel..row.len() {
            row[i] = row[i].accumulate(row[i - samples_per_pixel]);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
