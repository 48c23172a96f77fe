//! Native TIFF and BigTIFF structure parsing.
//!
//! - **Byte order**: declared in the header ("II" or "MM"); every multi-byte
//!   value, including pixel samples, is read through it.
//!
//! - **Classic TIFF vs BigTIFF**: 32-bit vs 64-bit offsets. Both are handled
//!   transparently.
//!
//! - **IFD**: one per image plane. Multiplex scans store one IFD per channel
//!   per resolution; [`TiffPyramid`] groups them back into levels.
//!
//! - **Inline vs offset values**: values that fit in an entry's value field
//!   are stored there; larger ones are fetched by [`ValueReader`].

mod parser;
mod pyramid;
mod tags;
mod validation;
mod values;

pub use parser::{
    ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, MAX_IFD_ENTRIES, TIFF_HEADER_SIZE,
};
pub use pyramid::{
    build_levels, group_runs, is_valid_downsample, ChunkIndex, ChunkLayout, ImagePage,
    PyramidLevel, TiffPyramid, MAX_IFDS,
};
pub use tags::{Compression, FieldType, Predictor, SampleFormat, TiffTag};
pub use validation::{
    check_decodable, log_validation, validate_page, validate_pyramid, ValidationError,
    ValidationResult,
};
pub use values::{decode_value, parse_u64_array, TagValue, ValueReader};
