//! Command-line configuration for the `wsi-ingest` binary.
//!
//! Every option can also be set through an environment variable with the
//! `WSI_` prefix:
//!
//! - `WSI_MODALITY` - Pin the modality, `BF` or `IF` (default: inferred)
//! - `WSI_LOAD_MEM` - Decode all levels into memory (default: false)
//! - `WSI_FLUORESCENCE_THRESHOLD` - Mean below which an image is fluorescence (default: 100)
//! - `WSI_SINGLE_PAGE_FALLBACK` - Recover channels from a single-page channel list (default: false)
//! - `WSI_BLOCK_SIZE` - Read cache block size in bytes (default: 65536)
//! - `WSI_CACHE_BLOCKS` - Read cache blocks per file (default: 64)

use std::path::PathBuf;

use clap::Parser;

use crate::ingest::IngestOptions;
use crate::intensity::{Modality, DEFAULT_FLUORESCENCE_MEAN_THRESHOLD};
use crate::io::{DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY};

/// Smallest block size accepted for the read cache.
pub const MIN_BLOCK_SIZE: usize = 4 * 1024;

/// Ingest pyramidal microscopy slides and describe their display layers.
///
/// Prints one line per layer (name, shape, scale, contrast limits) followed
/// by any advisories, or the whole report as JSON with `--json`.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Slide files to ingest; paths that are not files are skipped.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Modality of every input (BF or IF); inferred from pixel data if omitted.
    #[arg(short, long, env = "WSI_MODALITY")]
    pub modality: Option<Modality>,

    /// Decode every resolution level into memory.
    #[arg(long, default_value_t = false, env = "WSI_LOAD_MEM")]
    pub load_mem: bool,

    /// Coarsest-level mean intensity below which an image is fluorescence.
    #[arg(
        long,
        default_value_t = DEFAULT_FLUORESCENCE_MEAN_THRESHOLD,
        env = "WSI_FLUORESCENCE_THRESHOLD"
    )]
    pub fluorescence_threshold: f64,

    /// Take channel names and colors from a single-page channel list when
    /// page descriptors are unusable.
    #[arg(long, default_value_t = false, env = "WSI_SINGLE_PAGE_FALLBACK")]
    pub single_page_fallback: bool,

    /// Block size in bytes for the per-file read cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of blocks cached per file.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.fluorescence_threshold.is_finite() || self.fluorescence_threshold < 0.0 {
            return Err(format!(
                "fluorescence_threshold must be a non-negative number, got {}",
                self.fluorescence_threshold
            ));
        }

        if self.block_size < MIN_BLOCK_SIZE {
            return Err(format!(
                "block_size must be at least {} bytes, got {}",
                MIN_BLOCK_SIZE, self.block_size
            ));
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Library options for these settings.
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            fluorescence_threshold: self.fluorescence_threshold,
            single_page_fallback: self.single_page_fallback,
            block_size: self.block_size,
            cache_capacity: self.cache_blocks,
        }
    }
}
