//! Slide file formats.
//!
//! All supported slides are TIFF-family files; [`tiff`] parses their structure
//! and [`detect`] names the vendor flavor. [`jpeg`] repairs the abbreviated
//! JPEG streams some writers store per tile.

pub mod detect;
pub mod jpeg;
pub mod tiff;

pub use detect::{detect_format, is_tiff_header, SlideFormat};
