//! Lazily decoded pyramid levels.
//!
//! A [`LazyArray`] is a handle on one resolution level. Opening it reads only
//! the IFDs; chunk offsets are loaded the first time a page is read, and pixel
//! data is decoded chunk by chunk inside [`LazyArray::stats`] and
//! [`LazyArray::materialize`].
//!
//! Multi-page levels stack their pages along a leading channel axis. A
//! single page with several samples per pixel exposes its trailing sample
//! axis as the channel axis instead.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use ndarray::{ArrayD, IxDyn};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{IngestError, TiffError};
use crate::format::tiff::{check_decodable, ChunkIndex, ImagePage, PyramidLevel, TiffHeader};
use crate::io::RangeReader;

use super::codec::{decode_chunk, ChunkGeometry};
use super::pixels::{DType, PixelArray, PixelStats, Sample, StatsAccumulator};

// =============================================================================
// PlaneSource
// =============================================================================

/// One page of a level with its chunk index, loaded on first use.
#[derive(Debug)]
pub struct PlaneSource {
    page: ImagePage,
    chunks: OnceCell<ChunkIndex>,
}

impl PlaneSource {
    pub fn new(page: ImagePage) -> Self {
        PlaneSource {
            page,
            chunks: OnceCell::new(),
        }
    }

    /// A plane whose chunk index is already known.
    pub fn with_chunk_index(page: ImagePage, index: ChunkIndex) -> Self {
        PlaneSource {
            page,
            chunks: OnceCell::new_with(Some(index)),
        }
    }

    pub fn page(&self) -> &ImagePage {
        &self.page
    }

    async fn chunk_index<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        header: &TiffHeader,
    ) -> Result<&ChunkIndex, TiffError> {
        self.chunks
            .get_or_try_init(|| ChunkIndex::load(reader, header, &self.page))
            .await
    }
}

// =============================================================================
// Deferred storage
// =============================================================================

struct DeferredLevel {
    reader: Arc<dyn RangeReader>,
    header: TiffHeader,
    planes: Vec<Arc<PlaneSource>>,
    /// Keep only this sample of every pixel
    sample: Option<usize>,
}

impl DeferredLevel {
    async fn read_chunk<T: Sample>(
        &self,
        plane: &PlaneSource,
        chunk_index: usize,
    ) -> Result<Vec<T>, TiffError> {
        let index = plane.chunk_index(self.reader.as_ref(), &self.header).await?;
        let missing = || TiffError::Decode {
            ifd_index: plane.page.ifd_index,
            chunk: chunk_index,
            message: "chunk has no offset".to_string(),
        };
        let (offset, byte_count) = index.get_chunk_location(chunk_index).ok_or_else(missing)?;
        let byte_count = usize::try_from(byte_count).map_err(|_| missing())?;

        let data = if byte_count == 0 {
            Bytes::new()
        } else {
            self.reader.read_exact_at(offset, byte_count).await?
        };

        decode_chunk::<T>(
            &plane.page,
            chunk_index,
            &data,
            index.jpeg_tables.as_deref(),
            self.header.byte_order,
        )
    }

    async fn stats<T: Sample>(&self) -> Result<PixelStats, TiffError> {
        let mut acc = StatsAccumulator::default();
        for plane in &self.planes {
            let page = &plane.page;
            check_decodable(page)?;
            let spp = page.samples_per_pixel.max(1) as usize;

            for chunk in 0..page.chunk_count() {
                let samples = self.read_chunk::<T>(plane, chunk).await?;
                let geometry = ChunkGeometry::for_chunk(page, chunk);
                let row_len = geometry.stride as usize * spp;
                let valid_len = geometry.valid_width as usize * spp;
                for row in 0..geometry.valid_height as usize {
                    let start = row * row_len;
                    let valid = &samples[start..start + valid_len];
                    match self.sample {
                        Some(sample) => valid
                            .iter()
                            .skip(sample)
                            .step_by(spp)
                            .for_each(|v| acc.push(v.to_f64())),
                        None => acc.extend(valid),
                    }
                }
            }
        }
        Ok(acc.finish())
    }

    async fn materialize<T: Sample>(&self, shape: &[usize]) -> Result<ArrayD<T>, TiffError> {
        let total: usize = shape.iter().product();
        let mut data = vec![T::default(); total];

        for (plane_index, plane) in self.planes.iter().enumerate() {
            let page = &plane.page;
            check_decodable(page)?;
            let spp = page.samples_per_pixel.max(1) as usize;
            let out_spp = if self.sample.is_some() { 1 } else { spp };
            let width = page.width as usize;
            let base = plane_index * width * page.height as usize * out_spp;

            for chunk in 0..page.chunk_count() {
                let samples = self.read_chunk::<T>(plane, chunk).await?;
                let geometry = ChunkGeometry::for_chunk(page, chunk);
                let row_len = geometry.stride as usize * spp;
                let valid_width = geometry.valid_width as usize;

                for row in 0..geometry.valid_height as usize {
                    let src = row * row_len;
                    let dst = base
                        + ((geometry.y as usize + row) * width + geometry.x as usize) * out_spp;
                    match self.sample {
                        Some(sample) => {
                            for x in 0..valid_width {
                                data[dst + x] = samples[src + x * spp + sample];
                            }
                        }
                        None => {
                            let len = valid_width * spp;
                            data[dst..dst + len].copy_from_slice(&samples[src..src + len]);
                        }
                    }
                }
            }
        }

        ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| TiffError::Decode {
            ifd_index: self.planes.first().map(|p| p.page.ifd_index).unwrap_or(0),
            chunk: 0,
            message: e.to_string(),
        })
    }
}

#[derive(Clone)]
enum Storage {
    Deferred(Arc<DeferredLevel>),
    Resident(Arc<PixelArray>),
}

/// Which axis of a level indexes channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAxis {
    /// A single channel
    None,
    /// Axis 0, one page per channel
    Pages,
    /// The last axis, one sample per channel
    Samples,
}

// =============================================================================
// LazyArray
// =============================================================================

/// A resolution level whose pixels are decoded on demand.
#[derive(Clone)]
pub struct LazyArray {
    storage: Storage,
    shape: Vec<usize>,
    dtype: DType,
    channel_axis: ChannelAxis,
}

impl LazyArray {
    /// Wrap a pyramid level without reading any pixel data.
    ///
    /// Fails only when the sample type has no array representation; other
    /// encoding problems surface when the pixels are first read.
    pub fn from_level(
        reader: Arc<dyn RangeReader>,
        header: TiffHeader,
        level: &PyramidLevel,
    ) -> Result<Self, TiffError> {
        let first = level.pages.first().ok_or(TiffError::NoImageData)?;
        let dtype = DType::from_tiff(first.bits_per_sample, first.sample_format).ok_or(
            TiffError::UnsupportedSampleFormat {
                bits_per_sample: first.bits_per_sample,
                sample_format: first.sample_format,
            },
        )?;
        let planes = level
            .pages
            .iter()
            .map(|page| Arc::new(PlaneSource::new(page.clone())))
            .collect();
        Ok(Self::from_planes(reader, header, planes, dtype))
    }

    /// Wrap already-constructed planes of equal geometry.
    pub fn from_planes(
        reader: Arc<dyn RangeReader>,
        header: TiffHeader,
        planes: Vec<Arc<PlaneSource>>,
        dtype: DType,
    ) -> Self {
        let mut shape = Vec::with_capacity(4);
        let mut channel_axis = ChannelAxis::None;
        if planes.len() > 1 {
            shape.push(planes.len());
            channel_axis = ChannelAxis::Pages;
        }
        if let Some(plane) = planes.first() {
            let page = plane.page();
            shape.push(page.height as usize);
            shape.push(page.width as usize);
            if page.samples_per_pixel > 1 {
                shape.push(page.samples_per_pixel as usize);
                if channel_axis == ChannelAxis::None {
                    channel_axis = ChannelAxis::Samples;
                }
            }
        }

        LazyArray {
            storage: Storage::Deferred(Arc::new(DeferredLevel {
                reader,
                header,
                planes,
                sample: None,
            })),
            shape,
            dtype,
            channel_axis,
        }
    }

    /// Wrap an in-memory buffer whose channels lie along `channel_axis`.
    pub fn resident(array: PixelArray, channel_axis: ChannelAxis) -> Self {
        let shape = array.shape().to_vec();
        LazyArray {
            channel_axis: if shape.is_empty() {
                ChannelAxis::None
            } else {
                channel_axis
            },
            shape,
            dtype: array.dtype(),
            storage: Storage::Resident(Arc::new(array)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn channel_axis(&self) -> ChannelAxis {
        self.channel_axis
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.storage, Storage::Resident(_))
    }

    /// Length of the channel axis; 1 for a level without one.
    pub fn channel_count(&self) -> usize {
        match self.channel_axis {
            ChannelAxis::None => 1,
            ChannelAxis::Pages => self.shape[0],
            ChannelAxis::Samples => self.shape[self.shape.len() - 1],
        }
    }

    /// The slice of this level for one channel.
    ///
    /// On a level without a channel axis, channel 0 is the level itself.
    pub fn channel(&self, index: usize) -> Result<LazyArray, IngestError> {
        let channels = self.channel_count();
        if index >= channels {
            return Err(IngestError::ChannelOutOfRange { index, channels });
        }

        let axis = match self.channel_axis {
            ChannelAxis::None => return Ok(self.clone()),
            ChannelAxis::Pages => 0,
            ChannelAxis::Samples => self.shape.len() - 1,
        };

        let storage = match &self.storage {
            Storage::Deferred(level) => {
                let (planes, sample) = match self.channel_axis {
                    ChannelAxis::Pages => (vec![Arc::clone(&level.planes[index])], level.sample),
                    _ => (level.planes.clone(), Some(index)),
                };
                Storage::Deferred(Arc::new(DeferredLevel {
                    reader: Arc::clone(&level.reader),
                    header: level.header,
                    planes,
                    sample,
                }))
            }
            Storage::Resident(array) => match array.index_axis(axis, index) {
                Some(slice) => Storage::Resident(Arc::new(slice)),
                None => return Err(IngestError::ChannelOutOfRange { index, channels }),
            },
        };

        let mut shape = self.shape.clone();
        shape.remove(axis);

        Ok(LazyArray {
            storage,
            shape,
            dtype: self.dtype,
            channel_axis: ChannelAxis::None,
        })
    }

    /// Maximum and mean over every sample, excluding chunk padding.
    pub async fn stats(&self) -> Result<PixelStats, TiffError> {
        match &self.storage {
            Storage::Resident(array) => Ok(array.stats()),
            Storage::Deferred(level) => match self.dtype {
                DType::U8 => level.stats::<u8>().await,
                DType::U16 => level.stats::<u16>().await,
                DType::U32 => level.stats::<u32>().await,
                DType::F32 => level.stats::<f32>().await,
            },
        }
    }

    /// Decode the whole level into memory.
    pub async fn materialize(&self) -> Result<PixelArray, TiffError> {
        match &self.storage {
            Storage::Resident(array) => Ok(array.as_ref().clone()),
            Storage::Deferred(level) => Ok(match self.dtype {
                DType::U8 => PixelArray::U8(level.materialize::<u8>(&self.shape).await?),
                DType::U16 => PixelArray::U16(level.materialize::<u16>(&self.shape).await?),
                DType::U32 => PixelArray::U32(level.materialize::<u32>(&self.shape).await?),
                DType::F32 => PixelArray::F32(level.materialize::<f32>(&self.shape).await?),
            }),
        }
    }

    /// Decode the level and keep the buffer instead of the file handle.
    pub async fn into_resident(self) -> Result<LazyArray, TiffError> {
        if self.is_resident() {
            return Ok(self);
        }
        let array = self.materialize().await?;
        Ok(LazyArray::resident(array, self.channel_axis))
    }

    pub fn summary(&self) -> ArraySummary {
        ArraySummary {
            shape: self.shape.clone(),
            dtype: self.dtype,
            resident: self.is_resident(),
        }
    }
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyArray")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("channel_axis", &self.channel_axis)
            .field("resident", &self.is_resident())
            .finish()
    }
}

/// Shape and type of an array, for display and JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArraySummary {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub resident: bool,
}

impl Serialize for LazyArray {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.summary().serialize(serializer)
    }
}

// =============================================================================
// Tests
// =============================================================================
