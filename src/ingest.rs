//! Whole-file ingestion: path in, layer descriptors out.
//!
//! For each file the pipeline opens the pyramid, classifies the coarsest
//! level, resolves the pixel pitch, reads the page-0 tags and, for
//! fluorescence, the channel table, then builds the layers. Conditions that
//! do not stop ingestion are returned as [`Advisory`] values next to the
//! layers.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::array::{load_levels, LoadOptions};
use crate::channels::extract_channels;
use crate::error::IngestError;
use crate::intensity::{classify, Modality, DEFAULT_FLUORESCENCE_MEAN_THRESHOLD};
use crate::io::{DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY};
use crate::layer::{brightfield_layer, fluorescence_layers, LayerDescriptor};
use crate::metadata::{image_metadata, read_tag_bag};
use crate::resolution::resolve_page_resolution;

// =============================================================================
// Options
// =============================================================================

/// Library-level ingestion settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestOptions {
    /// Coarsest-level mean below which an unhinted image is fluorescence
    pub fluorescence_threshold: f64,

    /// Recover unreadable page descriptors from a single-page channel list
    pub single_page_fallback: bool,

    /// Block size of the per-file read cache, in bytes
    pub block_size: usize,

    /// Number of blocks the per-file read cache holds
    pub cache_capacity: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            fluorescence_threshold: DEFAULT_FLUORESCENCE_MEAN_THRESHOLD,
            single_page_fallback: false,
            block_size: DEFAULT_BLOCK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl IngestOptions {
    fn load_options(&self, load_mem: bool) -> LoadOptions {
        LoadOptions {
            load_mem,
            block_size: self.block_size,
            cache_capacity: self.cache_capacity,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// A non-fatal condition met during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// The pixel pitch fell back to (1, 1)
    ResolutionDefaulted { path: PathBuf, reason: String },

    /// The caller's modality differs from the inferred one; the caller's wins
    ModalityMismatch {
        path: PathBuf,
        requested: Modality,
        inferred: Modality,
    },

    /// A spectral dye with no biomarker in the file's library
    UnmappedFluorophore { path: PathBuf, dye: String },

    /// Some channels came from the single-page channel list
    FallbackUsed { path: PathBuf, pages: Vec<usize> },

    /// No selected path was a file
    NothingSelected,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::ResolutionDefaulted { path, reason } => write!(
                f,
                "{}: resolution defaulted to (1, 1): {}",
                path.display(),
                reason
            ),
            Advisory::ModalityMismatch {
                path,
                requested,
                inferred,
            } => write!(
                f,
                "{}: requested modality {} but pixel data suggests {}",
                path.display(),
                requested,
                inferred
            ),
            Advisory::UnmappedFluorophore { path, dye } => write!(
                f,
                "{}: no biomarker for fluorophore {:?}, using the dye name",
                path.display(),
                dye
            ),
            Advisory::FallbackUsed { path, pages } => write!(
                f,
                "{}: channel metadata for pages {:?} taken from the single-page channel list",
                path.display(),
                pages
            ),
            Advisory::NothingSelected => f.write_str("no image file selected"),
        }
    }
}

/// Layers in file and channel order, plus advisories.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub layers: Vec<LayerDescriptor>,
    pub advisories: Vec<Advisory>,
}

impl IngestReport {
    fn extend(&mut self, other: IngestReport) {
        self.layers.extend(other.layers);
        self.advisories.extend(other.advisories);
    }
}

// =============================================================================
// Ingestion
// =============================================================================

/// Ingest one file.
///
/// `modality` pins the modality; when `None` it is inferred from the
/// coarsest level's mean. With `load_mem` every level is decoded before
/// returning.
pub async fn load_image(
    path: impl AsRef<Path>,
    modality: Option<Modality>,
    load_mem: bool,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    let path = path.as_ref();
    let slide = load_levels(path, &options.load_options(load_mem)).await?;
    let mut advisories = Vec::new();

    let classification = classify(&slide.levels, options.fluorescence_threshold).await?;
    let modality = match modality {
        Some(requested) if requested != classification.modality => {
            warn!(
                path = %path.display(),
                %requested,
                inferred = %classification.modality,
                "requested modality differs from pixel data"
            );
            advisories.push(Advisory::ModalityMismatch {
                path: path.to_path_buf(),
                requested,
                inferred: classification.modality,
            });
            requested
        }
        Some(requested) => requested,
        None => classification.modality,
    };

    let base = slide
        .base_pages()
        .first()
        .ok_or_else(|| IngestError::NoLevels(path.display().to_string()))?;
    let reader = slide.reader.as_ref();
    let header = &slide.pyramid.header;

    let resolution = resolve_page_resolution(reader, header, base).await;
    if let Some(reason) = resolution.reason() {
        advisories.push(Advisory::ResolutionDefaulted {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }
    let pitch = resolution.value();
    let tags = read_tag_bag(reader, header, base).await;
    let stem = slide.stem();
    let format = slide.format;

    let layers = match modality {
        Modality::Brightfield => {
            let metadata =
                image_metadata(tags, path, format, modality, pitch, classification.scale, None);
            vec![brightfield_layer(
                slide.levels,
                &stem,
                pitch,
                classification.scale,
                metadata,
            )]
        }
        Modality::Fluorescence => {
            let descriptors: Vec<Option<String>> = slide
                .base_pages()
                .iter()
                .map(|page| page.description.clone())
                .collect();
            let table = extract_channels(&descriptors, options.single_page_fallback)?;

            if !table.fallback_pages.is_empty() {
                advisories.push(Advisory::FallbackUsed {
                    path: path.to_path_buf(),
                    pages: table.fallback_pages.clone(),
                });
            }
            advisories.extend(table.unmapped.iter().map(|dye| Advisory::UnmappedFluorophore {
                path: path.to_path_buf(),
                dye: dye.clone(),
            }));

            let metadata = image_metadata(
                tags,
                path,
                format,
                modality,
                pitch,
                classification.scale,
                Some(&table),
            );
            fluorescence_layers(
                &slide.levels,
                &stem,
                pitch,
                classification.scale,
                &table,
                &metadata,
            )?
        }
    };

    info!(
        path = %path.display(),
        %modality,
        layers = layers.len(),
        int_scale = classification.scale.ceiling(),
        "image ingested"
    );

    Ok(IngestReport { layers, advisories })
}

/// Ingest every path that is a regular file, in order.
///
/// Other paths are skipped. When nothing remains the report is empty apart
/// from [`Advisory::NothingSelected`]. The first failing file aborts the
/// batch.
pub async fn load_images<P: AsRef<Path>>(
    paths: &[P],
    modality: Option<Modality>,
    load_mem: bool,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            _ => debug!(path = %path.display(), "skipping path that is not a file"),
        }
    }

    let mut report = IngestReport::default();
    if files.is_empty() {
        warn!(selected = paths.len(), "no image file selected");
        report.advisories.push(Advisory::NothingSelected);
        return Ok(report);
    }

    for path in files {
        report.extend(load_image(path, modality, load_mem, options).await?);
    }
    Ok(report)
}
