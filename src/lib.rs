//! # WSI Ingest
//!
//! Ingestion of pyramidal microscopy slides (brightfield and multiplex
//! fluorescence whole-slide scans) into display-ready layer descriptors.
//!
//! A slide is opened without reading its pixels: the TIFF structure is parsed
//! through small range reads and each resolution level is wrapped in a
//! [`LazyArray`] that decodes chunks on demand. Display metadata is then
//! inferred rather than trusted:
//!
//! - **Intensity**: the display ceiling (255, 4095 or 65535) comes from the
//!   observed maximum of the coarsest level, never the declared bit depth.
//! - **Modality**: unhinted images with a dark coarsest level are treated as
//!   fluorescence.
//! - **Resolution**: pixel pitch in centimeters from the resolution tags.
//! - **Channels**: per-page descriptor XML in two schema generations, plus a
//!   single-page channel list fallback.
//!
//! ## Architecture
//!
//! - [`io`] - Range reader abstraction, local files and block caching
//! - [`mod@format`] - TIFF/BigTIFF parsing and pyramid grouping
//! - [`array`] - Lazy pixel arrays and chunk decoding
//! - [`intensity`] - Modality and intensity-scale inference
//! - [`resolution`] - Physical pixel pitch
//! - [`channels`] - Channel names and colors from descriptor XML
//! - [`metadata`] - Per-layer metadata bag
//! - [`layer`] - Layer descriptors
//! - [`annotation`] - Seam for vector annotation loaders
//! - [`ingest`] - The end-to-end pipeline
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_ingest::{load_image, IngestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wsi_ingest::IngestError> {
//!     let report = load_image("scan.qptiff", None, false, &IngestOptions::default()).await?;
//!     for layer in &report.layers {
//!         println!("{} {:?}", layer.name(), layer.data[0].shape());
//!     }
//!     for advisory in &report.advisories {
//!         eprintln!("{}", advisory);
//!     }
//!     Ok(())
//! }
//! ```

pub mod annotation;
pub mod array;
pub mod channels;
pub mod config;
pub mod error;
pub mod format;
pub mod ingest;
pub mod intensity;
pub mod io;
pub mod layer;
pub mod metadata;
pub mod resolution;

// Re-export commonly used types
pub use annotation::{aligned_annotation_scale, AnnotationLoader, Polygon, ShapeLayer};
pub use array::{
    load_levels, ArraySummary, ChannelAxis, DType, LazyArray, LoadOptions, PixelArray, PixelStats,
    SlideFile,
};
pub use channels::{
    extract_channels, ChannelInfo, ChannelSource, ChannelTable, Color, FluorToMarker,
    SchemaVariant,
};
pub use config::Config;
pub use error::{FormatError, IngestError, IoError, MetadataError, TiffError};
pub use format::tiff::{
    ByteOrder, ChunkIndex, ChunkLayout, ImagePage, PyramidLevel, TiffHeader, TiffPyramid, TiffTag,
};
pub use format::{detect_format, SlideFormat};
pub use ingest::{load_image, load_images, Advisory, IngestOptions, IngestReport};
pub use intensity::{
    classify, infer_modality, Classification, IntensityScale, Modality,
    DEFAULT_FLUORESCENCE_MEAN_THRESHOLD,
};
pub use io::{BlockCache, BytesReader, LocalFileReader, RangeReader};
pub use layer::{
    brightfield_layer, fluorescence_layers, Blending, Colormap, LayerDescriptor, LayerKind,
    LayerProperties,
};
pub use metadata::MetadataBag;
pub use resolution::{
    resolve_resolution, ResolutionInfo, ResolutionResult, ResolutionTags, ResolutionUnit,
};
