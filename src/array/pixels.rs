//! Sample types and resident pixel buffers.

use std::fmt;

use ndarray::{ArrayD, Axis};
use serde::Serialize;

use crate::format::tiff::ByteOrder;

// =============================================================================
// DType
// =============================================================================

/// Numeric type of one pixel sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DType {
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "uint32")]
    U32,
    #[serde(rename = "float32")]
    F32,
}

impl DType {
    /// Map TIFF BitsPerSample and SampleFormat to a supported type.
    pub fn from_tiff(bits_per_sample: u16, sample_format: u16) -> Option<Self> {
        match (bits_per_sample, sample_format) {
            (8, 1) => Some(DType::U8),
            (16, 1) => Some(DType::U16),
            (32, 1) => Some(DType::U32),
            (32, 3) => Some(DType::F32),
            _ => None,
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::U16 => 2,
            DType::U32 | DType::F32 => 4,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::F32 => "float32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Sample
// =============================================================================

/// A pixel sample type that chunks can be decoded into.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    const DTYPE: DType;

    /// Read one sample from exactly `size_in_bytes` bytes.
    fn from_bytes(bytes: &[u8], byte_order: ByteOrder) -> Self;

    /// Undo horizontal differencing: `self` is the stored delta.
    fn accumulate(self, previous: Self) -> Self;

    fn to_f64(self) -> f64;
}

impl Sample for u8 {
    const DTYPE: DType = DType::U8;

    fn from_bytes(bytes: &[u8], _byte_order: ByteOrder) -> Self {
        bytes[0]
    }

    fn accumulate(self, previous: Self) -> Self {
        self.wrapping_add(previous)
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for u16 {
    const DTYPE: DType = DType::U16;

    fn from_bytes(bytes: &[u8], byte_order: ByteOrder) -> Self {
        byte_order.read_u16(bytes)
    }

    fn accumulate(self, previous: Self) -> Self {
        self.wrapping_add(previous)
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for u32 {
    const DTYPE: DType = DType::U32;

    fn from_bytes(bytes: &[u8], byte_order: ByteOrder) -> Self {
        byte_order.read_u32(bytes)
    }

    fn accumulate(self, previous: Self) -> Self {
        self.wrapping_add(previous)
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for f32 {
    const DTYPE: DType = DType::F32;

    fn from_bytes(bytes: &[u8], byte_order: ByteOrder) -> Self {
        byte_order.read_f32(bytes)
    }

    // Float pages never carry a horizontal predictor past validation
    fn accumulate(self, previous: Self) -> Self {
        self + previous
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Maximum and mean of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelStats {
    pub max: f64,
    pub mean: f64,
    /// Number of samples reduced
    pub count: u64,
}

/// Running max and sum, fed one sample at a time.
///
/// A NaN sample poisons the maximum so callers can reject it.
#[derive(Debug, Clone, Copy)]
pub struct StatsAccumulator {
    max: f64,
    sum: f64,
    count: u64,
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        StatsAccumulator {
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

impl StatsAccumulator {
    pub fn push(&mut self, value: f64) {
        if !self.max.is_nan() && (value.is_nan() || value > self.max) {
            self.max = value;
        }
        self.sum += value;
        self.count += 1;
    }

    pub fn extend<T: Sample>(&mut self, samples: &[T]) {
        for sample in samples {
            self.push(sample.to_f64());
        }
    }

    /// Max and mean so far; an empty reduction reports zeros.
    pub fn finish(&self) -> PixelStats {
        if self.count == 0 {
            return PixelStats {
                max: 0.0,
                mean: 0.0,
                count: 0,
            };
        }
        PixelStats {
            max: self.max,
            mean: self.sum / self.count as f64,
            count: self.count,
        }
    }
}

// =============================================================================
// PixelArray
// =============================================================================

/// A fully materialized pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    F32(ArrayD<f32>),
}

impl PixelArray {
    pub fn dtype(&self) -> DType {
        match self {
            PixelArray::U8(_) => DType::U8,
            PixelArray::U16(_) => DType::U16,
            PixelArray::U32(_) => DType::U32,
            PixelArray::F32(_) => DType::F32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            PixelArray::U8(a) => a.shape(),
            PixelArray::U16(a) => a.shape(),
            PixelArray::U32(a) => a.shape(),
            PixelArray::F32(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PixelStats {
        let mut acc = StatsAccumulator::default();
        match self {
            PixelArray::U8(a) => a.iter().for_each(|v| acc.push(v.to_f64())),
            PixelArray::U16(a) => a.iter().for_each(|v| acc.push(v.to_f64())),
            PixelArray::U32(a) => a.iter().for_each(|v| acc.push(v.to_f64())),
            PixelArray::F32(a) => a.iter().for_each(|v| acc.push(v.to_f64())),
        }
        acc.finish()
    }

    /// Owned slice at `index` along `axis`, or `None` when out of range.
    pub fn index_axis(&self, axis: usize, index: usize) -> Option<PixelArray> {
        let shape = self.shape();
        if axis >= shape.len() || index >= shape[axis] {
            return None;
        }
        let axis = Axis(axis);
        Some(match self {
            PixelArray::U8(a) => PixelArray::U8(a.index_axis(axis, index).to_owned()),
            PixelArray::U16(a) => PixelArray::U16(a.index_axis(axis, index).to_owned()),
            PixelArray::U32(a) => PixelArray::U32(a.index_axis(axis, index).to_owned()),
            PixelArray::F32(a) => PixelArray::F32(a.index_axis(axis, index).to_owned()),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
