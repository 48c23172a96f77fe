//! TIFF tag value reading.
//!
//! Small values sit inline in their IFD entry; everything else is fetched from
//! the entry's offset in one range read, so an offset array with thousands of
//! tiles costs a single request.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

/// Largest out-of-line value we agree to fetch (64MB).
const MAX_VALUE_BYTES: u64 = 64 * 1024 * 1024;

// =============================================================================
// TagValue
// =============================================================================

/// A decoded tag value, grouped by numeric family.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Ascii(String),
    Unsigned(Vec<u64>),
    Signed(Vec<i64>),
    Rational(Vec<(u32, u32)>),
    SignedRational(Vec<(i32, i32)>),
    Float(Vec<f64>),
    /// Undefined or opaque bytes
    Bytes(Bytes),
}

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values through a [`RangeReader`] using the header's byte order.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw bytes of an entry's value, inline or fetched.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        if size > MAX_VALUE_BYTES {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("value of {} bytes is too large", size),
            });
        }

        Ok(self
            .reader
            .read_exact_at(entry.value_offset, size as usize)
            .await?)
    }

    /// Single unsigned scalar (Short, Long or Long8).
    pub async fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.header.byte_order) {
            return Ok(value);
        }

        let values = self.read_u64_array(entry).await?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected count 1, got {}", entry.count),
            }),
        }
    }

    /// Single unsigned scalar that must fit in 32 bits.
    pub async fn read_u32(&self, entry: &IfdEntry) -> Result<u32, TiffError> {
        let value = self.read_u64(entry).await?;
        u32::try_from(value).map_err(|_| TiffError::InvalidTagValue {
            tag: tag_name(entry),
            message: format!("value {} does not fit in 32 bits", value),
        })
    }

    /// Array of unsigned integers, widened to u64.
    ///
    /// Used for tile/strip offsets and byte counts and for SubIFD offsets.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if !matches!(
            field_type,
            FieldType::Byte
                | FieldType::Short
                | FieldType::Long
                | FieldType::Long8
                | FieldType::Ifd
                | FieldType::Ifd8
        ) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected an unsigned integer type, got {:?}", field_type),
            });
        }

        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        Ok(parse_u64_array(
            &bytes,
            entry.count as usize,
            field_type,
            self.header.byte_order,
        ))
    }

    /// Array of unsigned 16-bit values (BitsPerSample, SampleFormat).
    pub async fn read_u16_array(&self, entry: &IfdEntry) -> Result<Vec<u16>, TiffError> {
        let values = self.read_u64_array(entry).await?;
        values
            .into_iter()
            .map(|v| {
                u16::try_from(v).map_err(|_| TiffError::InvalidTagValue {
                    tag: tag_name(entry),
                    message: format!("value {} does not fit in 16 bits", v),
                })
            })
            .collect()
    }

    /// First rational of a Rational entry as (numerator, denominator).
    pub async fn read_rational(&self, entry: &IfdEntry) -> Result<(u32, u32), TiffError> {
        match self.read_value(entry).await? {
            TagValue::Rational(values) if !values.is_empty() => Ok(values[0]),
            TagValue::Unsigned(values) if !values.is_empty() => {
                let value = u32::try_from(values[0]).unwrap_or(u32::MAX);
                Ok((value, 1))
            }
            other => Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected a rational, got {:?}", other),
            }),
        }
    }

    /// ASCII string with the trailing NUL (and anything after it) removed.
    ///
    /// Byte and Undefined entries are accepted too; some writers store XML
    /// descriptors that way.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if !matches!(
            field_type,
            FieldType::Ascii | FieldType::Byte | FieldType::Undefined
        ) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected Ascii type for string, got {:?}", field_type),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        Ok(ascii_to_string(&bytes))
    }

    /// Opaque bytes (JPEGTables).
    pub async fn read_raw_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        self.read_bytes(entry).await
    }

    /// Decode any entry into a [`TagValue`].
    pub async fn read_value(&self, entry: &IfdEntry) -> Result<TagValue, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let bytes = self.read_bytes(entry).await?;
        Ok(decode_value(
            &bytes,
            entry.count as usize,
            field_type,
            self.header.byte_order,
        ))
    }
}

fn tag_name(entry: &IfdEntry) -> &'static str {
    TiffTag::from_u16(entry.tag_id)
        .map(TiffTag::name)
        .unwrap_or("unknown")
}

fn ascii_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// =============================================================================
// Decoding from bytes already in hand
// =============================================================================

/// Parse an array of unsigned values from raw bytes; truncated input yields
/// fewer values.
pub fn parse_u64_array(
    bytes: &[u8],
    count: usize,
    field_type: FieldType,
    byte_order: ByteOrder,
) -> Vec<u64> {
    let size = field_type.size_in_bytes();
    bytes
        .chunks_exact(size)
        .take(count)
        .filter_map(|chunk| match field_type {
            FieldType::Byte => Some(chunk[0] as u64),
            FieldType::Short => Some(byte_order.read_u16(chunk) as u64),
            FieldType::Long | FieldType::Ifd => Some(byte_order.read_u32(chunk) as u64),
            FieldType::Long8 | FieldType::Ifd8 => Some(byte_order.read_u64(chunk)),
            _ => None,
        })
        .collect()
}

/// Decode raw value bytes of any field type.
pub fn decode_value(
    bytes: &[u8],
    count: usize,
    field_type: FieldType,
    byte_order: ByteOrder,
) -> TagValue {
    let size = field_type.size_in_bytes();
    let chunks = || bytes.chunks_exact(size).take(count);

    match field_type {
        FieldType::Ascii => TagValue::Ascii(ascii_to_string(bytes)),
        FieldType::Undefined => TagValue::Bytes(Bytes::copy_from_slice(bytes)),
        FieldType::Byte
        | FieldType::Short
        | FieldType::Long
        | FieldType::Long8
        | FieldType::Ifd
        | FieldType::Ifd8 => {
            TagValue::Unsigned(parse_u64_array(bytes, count, field_type, byte_order))
        }
        FieldType::SByte => TagValue::Signed(chunks().map(|c| c[0] as i8 as i64).collect()),
        FieldType::SShort => TagValue::Signed(
            chunks()
                .map(|c| byte_order.read_u16(c) as i16 as i64)
                .collect(),
        ),
        FieldType::SLong => {
            TagValue::Signed(chunks().map(|c| byte_order.read_i32(c) as i64).collect())
        }
        FieldType::SLong8 => {
            TagValue::Signed(chunks().map(|c| byte_order.read_u64(c) as i64).collect())
        }
        FieldType::Rational => TagValue::Rational(
            chunks()
                .map(|c| (byte_order.read_u32(c), byte_order.read_u32(&c[4..])))
                .collect(),
        ),
        FieldType::SRational => TagValue::SignedRational(
            chunks()
                .map(|c| (byte_order.read_i32(c), byte_order.read_i32(&c[4..])))
                .collect(),
        ),
        FieldType::Float => {
            TagValue::Float(chunks().map(|c| byte_order.read_f32(c) as f64).collect())
        }
        FieldType::Double => TagValue::Float(chunks().map(|c| byte_order.read_f64(c)).collect()),
    }
}

// =============================================================================
// Tests
// =============================================================================
