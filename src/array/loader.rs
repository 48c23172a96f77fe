//! Opening slide files as lazy pyramids.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::IngestError;
use crate::format::tiff::{log_validation, validate_pyramid, ImagePage, TiffPyramid};
use crate::format::{detect_format, SlideFormat};
use crate::io::{BlockCache, LocalFileReader, RangeReader, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY};

use super::lazy::LazyArray;

// =============================================================================
// Options
// =============================================================================

/// How a slide file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Decode every level into memory before returning
    pub load_mem: bool,

    /// Block size of the per-file read cache, in bytes
    pub block_size: usize,

    /// Number of blocks the per-file read cache holds
    pub cache_capacity: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            load_mem: false,
            block_size: DEFAULT_BLOCK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

// =============================================================================
// SlideFile
// =============================================================================

/// An opened slide: the parsed page structure and one array per level.
pub struct SlideFile {
    pub path: PathBuf,
    pub format: SlideFormat,

    /// Cached reader over the file, shared by every level
    pub reader: Arc<dyn RangeReader>,

    pub pyramid: TiffPyramid,

    /// Finest first
    pub levels: Vec<LazyArray>,
}

impl SlideFile {
    pub fn coarsest(&self) -> Option<&LazyArray> {
        self.levels.last()
    }

    /// Pages of level 0 in channel order.
    pub fn base_pages(&self) -> &[ImagePage] {
        self.pyramid
            .base_level()
            .map(|level| level.pages.as_slice())
            .unwrap_or(&[])
    }

    /// File name without its extension.
    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }
}

/// File name of `path` without the final extension.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// =============================================================================
// Loading
// =============================================================================

/// Open `path` and return its resolution levels, finest first.
///
/// No pixel data is read unless `options.load_mem` is set.
pub async fn load_levels(
    path: impl AsRef<Path>,
    options: &LoadOptions,
) -> Result<SlideFile, IngestError> {
    let path = path.as_ref();
    let file = LocalFileReader::open(path).await?;
    let reader: Arc<dyn RangeReader> = Arc::new(BlockCache::with_capacity(
        file,
        options.block_size,
        options.cache_capacity,
    ));

    let format = detect_format(reader.as_ref()).await?;
    let pyramid = TiffPyramid::parse(reader.as_ref()).await?;
    log_validation(reader.identifier(), &validate_pyramid(&pyramid));

    if pyramid.levels.is_empty() {
        return Err(IngestError::NoLevels(reader.identifier().to_string()));
    }

    let mut levels = pyramid
        .levels
        .iter()
        .map(|level| LazyArray::from_level(Arc::clone(&reader), pyramid.header, level))
        .collect::<Result<Vec<_>, _>>()?;

    if options.load_mem {
        debug!(path = %path.display(), "materializing levels");
        let mut resident = Vec::with_capacity(levels.len());
        for level in levels {
            resident.push(level.into_resident().await?);
        }
        levels = resident;
    }

    info!(
        path = %path.display(),
        format = format.name(),
        levels = levels.len(),
        shape = ?levels[0].shape(),
        dtype = %levels[0].dtype(),
        "opened slide"
    );

    Ok(SlideFile {
        path: path.to_path_buf(),
        format,
        reader,
        pyramid,
        levels,
    })
}
