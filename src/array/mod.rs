//! Pixel arrays over pyramid levels.
//!
//! - [`loader`]: opens a file and wraps each level in a [`LazyArray`]
//! - [`lazy`]: on-demand chunk decoding, reductions and materialization
//! - [`codec`]: chunk decompression and predictor handling
//! - [`pixels`]: sample types and resident buffers

mod codec;
mod lazy;
mod loader;
mod pixels;

pub use codec::{decode_chunk, undo_horizontal_predictor, ChunkGeometry};
pub use lazy::{ArraySummary, ChannelAxis, LazyArray, PlaneSource};
pub use loader::{file_stem, load_levels, LoadOptions, SlideFile};
pub use pixels::{DType, PixelArray, PixelStats, Sample, StatsAccumulator};
