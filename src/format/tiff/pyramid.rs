//! Page reading and resolution-level grouping.
//!
//! Slide files store every image plane as its own IFD. A multiplex scan writes
//! one full-resolution page per channel, then (optionally) a thumbnail, then
//! each reduced resolution as another run of per-channel pages, then label and
//! macro images. Brightfield scans are the single-channel special case. Some
//! writers instead hang reduced resolutions off each full-resolution page as
//! SubIFDs.
//!
//! # Grouping rules
//!
//! 1. Consecutive pages with identical geometry (width, height, samples per
//!    pixel, bits per sample) form a run.
//! 2. The first run is level 0; its length is the channel count.
//! 3. If every level-0 page has SubIFDs, the k-th SubIFD of each page forms
//!    level k and the rest of the main chain is auxiliary.
//! 4. Otherwise a later run becomes the next level when it has the same
//!    channel count, sample layout and chunk layout, and a downsample close to
//!    a power of two that is larger than the previous level's.
//! 5. Everything else (thumbnail, label, macro) is auxiliary.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to follow in one chain
pub const MAX_IFDS: usize = 4096;

/// Relative tolerance around a power-of-two downsample
const DOWNSAMPLE_TOLERANCE: f64 = 0.2;

// =============================================================================
// ImagePage
// =============================================================================

/// How a page's pixels are cut into independently compressed chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLayout {
    Tiled { tile_width: u32, tile_height: u32 },
    Stripped { rows_per_strip: u32 },
}

impl ChunkLayout {
    /// Pixel size of a full chunk for an image `width` pixels wide.
    pub fn chunk_size(&self, width: u32) -> (u32, u32) {
        match *self {
            ChunkLayout::Tiled {
                tile_width,
                tile_height,
            } => (tile_width, tile_height),
            ChunkLayout::Stripped { rows_per_strip } => (width, rows_per_strip),
        }
    }

    pub fn is_tiled(&self) -> bool {
        matches!(self, ChunkLayout::Tiled { .. })
    }
}

/// One IFD that carries pixel data, with the fields needed to decode it.
#[derive(Debug, Clone)]
pub struct ImagePage {
    /// Position in the main IFD chain; SubIFD pages carry their parent's index
    pub ifd_index: usize,

    /// File offset of the IFD
    pub ifd_offset: u64,

    pub ifd: Ifd,
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    /// SampleFormat, 1 (unsigned) when absent
    pub sample_format: u16,
    pub compression: u16,
    /// Predictor, 1 (none) when absent
    pub predictor: u16,
    /// PlanarConfiguration, 1 (chunky) when absent
    pub planar_configuration: u16,
    pub photometric: Option<u16>,
    pub layout: ChunkLayout,
    /// NewSubfileType, 0 when absent
    pub subfile_type: u32,
    pub sub_ifd_offsets: Vec<u64>,
    pub description: Option<String>,
}

impl ImagePage {
    /// Read the decode-relevant fields of `ifd`.
    ///
    /// Returns `Ok(None)` when the IFD has no tile or strip offsets.
    pub async fn read<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifd: Ifd,
        ifd_index: usize,
        ifd_offset: u64,
    ) -> Result<Option<Self>, TiffError> {
        if !ifd.is_tiled() && !ifd.is_stripped() {
            return Ok(None);
        }

        let values = ValueReader::new(reader, header);

        let width = match ifd.get_entry_by_tag(TiffTag::ImageWidth) {
            Some(entry) => values.read_u32(entry).await?,
            None => return Err(TiffError::MissingTag("ImageWidth")),
        };
        let height = match ifd.get_entry_by_tag(TiffTag::ImageLength) {
            Some(entry) => values.read_u32(entry).await?,
            None => return Err(TiffError::MissingTag("ImageLength")),
        };

        let samples_per_pixel = match ifd.get_entry_by_tag(TiffTag::SamplesPerPixel) {
            Some(entry) => values.read_u32(entry).await? as u16,
            None => 1,
        };
        // Per-sample arrays are uniform in every file we decode; the first
        // value stands for all samples.
        let bits_per_sample = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => first_or(values.read_u16_array(entry).await?, 1),
            None => 1,
        };
        let sample_format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
            Some(entry) => first_or(values.read_u16_array(entry).await?, 1),
            None => 1,
        };

        let compression = optional_u16(&values, &ifd, TiffTag::Compression)
            .await?
            .unwrap_or(Compression::None as u16);
        let predictor = optional_u16(&values, &ifd, TiffTag::Predictor)
            .await?
            .unwrap_or(1);
        let planar_configuration = optional_u16(&values, &ifd, TiffTag::PlanarConfiguration)
            .await?
            .unwrap_or(1);
        let photometric = optional_u16(&values, &ifd, TiffTag::PhotometricInterpretation).await?;

        let layout = if ifd.is_tiled() {
            let tile_width = match ifd.get_entry_by_tag(TiffTag::TileWidth) {
                Some(entry) => values.read_u32(entry).await?,
                None => return Err(TiffError::MissingTag("TileWidth")),
            };
            let tile_height = match ifd.get_entry_by_tag(TiffTag::TileLength) {
                Some(entry) => values.read_u32(entry).await?,
                None => return Err(TiffError::MissingTag("TileLength")),
            };
            if tile_width == 0 || tile_height == 0 {
                return Err(TiffError::InvalidTagValue {
                    tag: "TileWidth",
                    message: format!("tile size {}x{}", tile_width, tile_height),
                });
            }
            ChunkLayout::Tiled {
                tile_width,
                tile_height,
            }
        } else {
            // Absent RowsPerStrip means one strip for the whole image
            let rows = match ifd.get_entry_by_tag(TiffTag::RowsPerStrip) {
                Some(entry) => values.read_u64(entry).await?,
                None => height as u64,
            };
            let rows_per_strip = rows.clamp(1, height.max(1) as u64) as u32;
            ChunkLayout::Stripped { rows_per_strip }
        };

        let subfile_type = match ifd.get_entry_by_tag(TiffTag::NewSubfileType) {
            Some(entry) => values.read_u32(entry).await?,
            None => 0,
        };
        let sub_ifd_offsets = match ifd.get_entry_by_tag(TiffTag::SubIfds) {
            Some(entry) => values.read_u64_array(entry).await?,
            None => Vec::new(),
        };
        let description = match ifd.get_entry_by_tag(TiffTag::ImageDescription) {
            Some(entry) => Some(values.read_string(entry).await?),
            None => None,
        };

        Ok(Some(ImagePage {
            ifd_index,
            ifd_offset,
            ifd,
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            compression,
            predictor,
            planar_configuration,
            photometric,
            layout,
            subfile_type,
            sub_ifd_offsets,
            description,
        }))
    }

    /// Width, height, samples per pixel, bits per sample.
    pub fn geometry(&self) -> (u32, u32, u16, u16) {
        (
            self.width,
            self.height,
            self.samples_per_pixel,
            self.bits_per_sample,
        )
    }

    /// Number of chunks across and down.
    pub fn chunk_grid(&self) -> (u32, u32) {
        let (chunk_w, chunk_h) = self.layout.chunk_size(self.width);
        (
            self.width.div_ceil(chunk_w.max(1)),
            self.height.div_ceil(chunk_h.max(1)),
        )
    }

    pub fn chunk_count(&self) -> usize {
        let (across, down) = self.chunk_grid();
        across as usize * down as usize
    }

    /// Whether this page is marked as a reduced-resolution image.
    pub fn is_reduced(&self) -> bool {
        self.subfile_type & 1 == 1
    }
}

fn first_or(values: Vec<u16>, default: u16) -> u16 {
    values.first().copied().unwrap_or(default)
}

async fn optional_u16<R: RangeReader + ?Sized>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
    tag: TiffTag,
) -> Result<Option<u16>, TiffError> {
    match ifd.get_entry_by_tag(tag) {
        Some(entry) => Ok(Some(values.read_u32(entry).await? as u16)),
        None => Ok(None),
    }
}

// =============================================================================
// ChunkIndex
// =============================================================================

/// Where a page's compressed chunks live in the file.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    /// Byte offset of each chunk, row-major
    pub offsets: Vec<u64>,

    /// Byte count of each chunk
    pub byte_counts: Vec<u64>,

    /// JPEGTables, if the page has them
    pub jpeg_tables: Option<Bytes>,
}

impl ChunkIndex {
    /// Load the offset and byte-count arrays of a page.
    pub async fn load<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        page: &ImagePage,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);
        let (offsets_tag, counts_tag, offsets_name, counts_name) = if page.layout.is_tiled() {
            (
                TiffTag::TileOffsets,
                TiffTag::TileByteCounts,
                "TileOffsets",
                "TileByteCounts",
            )
        } else {
            (
                TiffTag::StripOffsets,
                TiffTag::StripByteCounts,
                "StripOffsets",
                "StripByteCounts",
            )
        };

        let offsets = match page.ifd.get_entry_by_tag(offsets_tag) {
            Some(entry) => values.read_u64_array(entry).await?,
            None => return Err(TiffError::MissingTag(offsets_name)),
        };
        let byte_counts = match page.ifd.get_entry_by_tag(counts_tag) {
            Some(entry) => values.read_u64_array(entry).await?,
            None => return Err(TiffError::MissingTag(counts_name)),
        };

        if offsets.len() != byte_counts.len() || offsets.len() < page.chunk_count() {
            return Err(TiffError::InvalidTagValue {
                tag: offsets_name,
                message: format!(
                    "{} offsets and {} byte counts for {} chunks",
                    offsets.len(),
                    byte_counts.len(),
                    page.chunk_count()
                ),
            });
        }

        let jpeg_tables = match page.ifd.get_entry_by_tag(TiffTag::JpegTables) {
            Some(entry) => Some(values.read_raw_bytes(entry).await?),
            None => None,
        };

        Ok(ChunkIndex {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Offset and size of a chunk.
    pub fn get_chunk_location(&self, chunk_index: usize) -> Option<(u64, u64)> {
        Some((
            *self.offsets.get(chunk_index)?,
            *self.byte_counts.get(chunk_index)?,
        ))
    }
}

// =============================================================================
// PyramidLevel
// =============================================================================

/// One resolution of the image: one page per channel, all with equal geometry.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// 0 is the finest resolution
    pub level_index: usize,
    pub width: u32,
    pub height: u32,
    /// Downsample relative to level 0 (1.0 for level 0)
    pub downsample: f64,
    /// Pages in channel order
    pub pages: Vec<ImagePage>,
}

impl PyramidLevel {
    fn from_pages(level_index: usize, pages: Vec<ImagePage>, base: (u32, u32)) -> Option<Self> {
        let first = pages.first()?;
        let (width, height) = (first.width, first.height);
        Some(PyramidLevel {
            level_index,
            width,
            height,
            downsample: downsample_between(base, (width, height)),
            pages,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.pages.len()
    }
}

fn downsample_between(base: (u32, u32), level: (u32, u32)) -> f64 {
    let downsample_x = base.0 as f64 / level.0.max(1) as f64;
    let downsample_y = base.1 as f64 / level.1.max(1) as f64;
    (downsample_x + downsample_y) / 2.0
}

/// Whether `downsample` is within tolerance of a power of two of at least 2.
pub fn is_valid_downsample(downsample: f64) -> bool {
    if !downsample.is_finite() || downsample <= 0.0 {
        return false;
    }

    let rounded = downsample.log2().round();
    if rounded < 1.0 {
        return false;
    }

    let ratio = downsample / 2.0_f64.powf(rounded);
    ratio > 1.0 - DOWNSAMPLE_TOLERANCE && ratio < 1.0 + DOWNSAMPLE_TOLERANCE
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// A parsed slide: resolution levels plus auxiliary pages.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,

    /// Finest first
    pub levels: Vec<PyramidLevel>,

    /// Image pages that belong to no level (thumbnail, label, macro)
    pub auxiliary: Vec<ImagePage>,

    /// Number of IFDs in the main chain
    pub ifd_count: usize,
}

impl TiffPyramid {
    /// Parse the header and IFD chain and group pages into levels.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = std::cmp::min(BIGTIFF_HEADER_SIZE as u64, reader.size()) as usize;
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_ifd_chain(reader, &header).await?;
        let ifd_count = ifds.len();

        let mut pages = Vec::new();
        for (ifd_index, (offset, ifd)) in ifds.into_iter().enumerate() {
            if let Some(page) = ImagePage::read(reader, &header, ifd, ifd_index, offset).await? {
                pages.push(page);
            }
        }

        if pages.is_empty() {
            return Err(TiffError::NoImageData);
        }

        let runs = group_runs(pages);
        let uses_sub_ifds = runs
            .first()
            .map(|run| run.iter().all(|page| !page.sub_ifd_offsets.is_empty()))
            .unwrap_or(false);

        let (levels, auxiliary) = if uses_sub_ifds {
            Self::levels_from_sub_ifds(reader, &header, runs).await?
        } else {
            build_levels(runs)
        };

        debug!(
            reader = reader.identifier(),
            ifds = ifd_count,
            levels = levels.len(),
            channels = levels.first().map(|l| l.channel_count()).unwrap_or(0),
            auxiliary = auxiliary.len(),
            sub_ifds = uses_sub_ifds,
            "grouped TIFF pages into levels"
        );

        Ok(TiffPyramid {
            header,
            levels,
            auxiliary,
            ifd_count,
        })
    }

    /// Follow the next-IFD chain from the header.
    async fn parse_ifd_chain<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<(u64, Ifd)>, TiffError> {
        let mut ifds = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            // A chain that loops back ends here
            if !seen.insert(offset) {
                break;
            }
            let ifd = read_ifd(reader, header, offset).await?;
            let next_offset = ifd.next_ifd_offset;
            ifds.push((offset, ifd));
            offset = next_offset;
        }

        Ok(ifds)
    }

    async fn levels_from_sub_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        mut runs: Vec<Vec<ImagePage>>,
    ) -> Result<(Vec<PyramidLevel>, Vec<ImagePage>), TiffError> {
        let base_pages = runs.remove(0);
        let auxiliary: Vec<ImagePage> = runs.into_iter().flatten().collect();

        let base = (base_pages[0].width, base_pages[0].height);
        let depth = base_pages
            .iter()
            .map(|page| page.sub_ifd_offsets.len())
            .min()
            .unwrap_or(0);

        let mut level_pages: Vec<Vec<ImagePage>> = Vec::with_capacity(depth);
        for k in 0..depth {
            let mut pages = Vec::with_capacity(base_pages.len());
            for parent in &base_pages {
                let offset = parent.sub_ifd_offsets[k];
                let ifd = read_ifd(reader, header, offset).await?;
                match ImagePage::read(reader, header, ifd, parent.ifd_index, offset).await? {
                    Some(page) => pages.push(page),
                    None => return Err(TiffError::NoImageData),
                }
            }
            // Every channel must agree at each sub-level
            let geometry = pages[0].geometry();
            if pages.iter().any(|page| page.geometry() != geometry) {
                break;
            }
            level_pages.push(pages);
        }

        let mut levels = Vec::with_capacity(depth + 1);
        levels.extend(PyramidLevel::from_pages(0, base_pages, base));
        for pages in level_pages {
            let index = levels.len();
            levels.extend(PyramidLevel::from_pages(index, pages, base));
        }

        Ok((levels, auxiliary))
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn base_level(&self) -> Option<&PyramidLevel> {
        self.levels.first()
    }

    pub fn coarsest_level(&self) -> Option<&PyramidLevel> {
        self.levels.last()
    }

    /// Channel count of level 0.
    pub fn channel_count(&self) -> usize {
        self.base_level().map(|l| l.channel_count()).unwrap_or(0)
    }

    /// Dimensions of level 0.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.base_level().map(|l| (l.width, l.height))
    }
}

async fn read_ifd<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    offset: u64,
) -> Result<Ifd, TiffError> {
    if offset >= reader.size() {
        return Err(TiffError::InvalidIfdOffset(offset));
    }

    let count_bytes = reader
        .read_exact_at(offset, header.ifd_count_size())
        .await?;
    let entry_count = Ifd::parse_entry_count(&count_bytes, header)?;

    let ifd_size = Ifd::calculate_size(entry_count, header);
    let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
    Ifd::parse(&ifd_bytes, header)
}

/// Split pages into runs of consecutive identical geometry.
pub fn group_runs(pages: Vec<ImagePage>) -> Vec<Vec<ImagePage>> {
    let mut runs: Vec<Vec<ImagePage>> = Vec::new();
    for page in pages {
        match runs.last_mut() {
            Some(run) if run[0].geometry() == page.geometry() => run.push(page),
            _ => runs.push(vec![page]),
        }
    }
    runs
}

/// Pick levels out of main-chain runs; the remainder is auxiliary.
pub fn build_levels(runs: Vec<Vec<ImagePage>>) -> (Vec<PyramidLevel>, Vec<ImagePage>) {
    let mut runs = runs.into_iter();
    let base_pages = match runs.next() {
        Some(run) => run,
        None => return (Vec::new(), Vec::new()),
    };

    let reference = base_pages[0].clone();
    let base = (reference.width, reference.height);
    let channels = base_pages.len();

    let mut levels: Vec<PyramidLevel> = Vec::new();
    levels.extend(PyramidLevel::from_pages(0, base_pages, base));
    let mut auxiliary = Vec::new();

    for run in runs {
        let page = &run[0];
        let downsample = downsample_between(base, (page.width, page.height));
        let previous = levels.last().map(|l| l.downsample).unwrap_or(1.0);

        let compatible = run.len() == channels
            && page.samples_per_pixel == reference.samples_per_pixel
            && page.bits_per_sample == reference.bits_per_sample
            && page.sample_format == reference.sample_format
            && page.layout.is_tiled() == reference.layout.is_tiled()
            && is_valid_downsample(downsample)
            && downsample > previous;

        if compatible {
            let index = levels.len();
            levels.extend(PyramidLevel::from_pages(index, run, base));
        } else {
            auxiliary.extend(run);
        }
    }

    (levels, auxiliary)
}

// =============================================================================
// Tests
// =============================================================================
