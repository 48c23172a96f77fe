use thiserror::Error;

/// I/O errors that can occur when reading slide bytes
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The file could not be opened
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// A read from an already opened file failed
    #[error("Read error: {0}")]
    Read(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Errors related to format detection
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File is not a TIFF-family file
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing TIFF files or decoding their pixel data
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (supported: none, LZW, Deflate, JPEG)")]
    UnsupportedCompression(String),

    /// Sample encoding that cannot be represented as a pixel array
    #[error("Unsupported sample format: {bits_per_sample}-bit, SampleFormat={sample_format}")]
    UnsupportedSampleFormat {
        bits_per_sample: u16,
        sample_format: u16,
    },

    /// Pixel layout that cannot be decoded (planar configuration, predictor)
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// The file contains no IFD with image data
    #[error("No image data found")]
    NoImageData,

    /// Chunk decompression or decoding failed
    #[error("Failed to decode chunk {chunk} of IFD {ifd_index}: {message}")]
    Decode {
        ifd_index: usize,
        chunk: usize,
        message: String,
    },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors raised while extracting per-channel metadata from descriptor XML
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    /// Descriptor text is not well-formed XML
    #[error("Malformed descriptor XML: {0}")]
    Xml(String),

    /// Embedded JSON library is not valid JSON
    #[error("Malformed LibraryAsJSON payload: {0}")]
    Json(String),

    /// A page's descriptor could not provide a channel and the fallback is disabled
    #[error("Page {page}: {reason} (enable the single-page fallback to recover)")]
    PageDescriptor { page: usize, reason: String },

    /// The single-page fallback was needed but could not produce a channel
    #[error("Single-page fallback failed: {0}")]
    Fallback(String),

    /// A color string or packed integer could not be parsed
    #[error("Invalid color {value:?}: {message}")]
    InvalidColor { value: String, message: String },
}

/// Top-level errors returned by the ingestion pipeline
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    /// I/O error while opening or reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF structure or pixel decoding error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File is not a supported format
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Channel metadata could not be extracted
    #[error("Channel metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Observed maximum pixel value does not fit any intensity class
    #[error("Unsupported intensity range: observed maximum {max} is outside (1, 65535]")]
    UnsupportedIntensityRange { max: f64 },

    /// Channel index past the end of the channel axis
    #[error("Channel {index} out of range for array with {channels} channel(s)")]
    ChannelOutOfRange { index: usize, channels: usize },

    /// The file parsed but has no pyramid level to classify
    #[error("No resolution levels found in {0}")]
    NoLevels(String),

    /// An annotation collaborator could not load its file
    #[error("Annotation error: {0}")]
    Annotation(String),
}
