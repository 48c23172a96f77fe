//! Descriptor schema generations.
//!
//! Older scanners describe each page with its emission filter. Newer ones
//! describe a spectral band per page and embed a JSON library at document
//! level that maps each fluorophore to the biomarker it is conjugated to.
//! The generation is decided once, from the first page.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::MetadataError;

use super::color::Color;
use super::xml::Element;

/// Which descriptor layout a file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    /// Per-page filter names
    Legacy,
    /// Per-page band names plus a fluorophore to biomarker library
    Spectral,
}

impl SchemaVariant {
    /// Path of the channel name inside a page descriptor.
    pub const fn name_path(&self) -> &'static str {
        match self {
            SchemaVariant::Legacy => ".//Responsivity/Filter/Name",
            SchemaVariant::Spectral => ".//Responsivity/Band/Name",
        }
    }
}

/// Path of the channel color inside a page descriptor.
pub const COLOR_PATH: &str = ".//Color";

/// Path of the embedded fluorophore library.
pub const LIBRARY_PATH: &str = ".//LibraryAsJSON";

/// Fluorophore name to biomarker name.
pub type FluorToMarker = BTreeMap<String, String>;

/// Decide the schema from the first page's descriptor.
///
/// A `LibraryAsJSON` object with a `spectra` list makes the file
/// [`SchemaVariant::Spectral`]; entries with both `fluor` and `marker`
/// strings populate the map. A library that is not valid JSON is an error.
pub fn detect_schema(
    first_page: Option<&Element>,
) -> Result<(SchemaVariant, FluorToMarker), MetadataError> {
    let library = match first_page.and_then(|root| root.find_text(LIBRARY_PATH)) {
        Some(text) => text,
        None => return Ok((SchemaVariant::Legacy, FluorToMarker::new())),
    };

    let value: Value =
        serde_json::from_str(library).map_err(|e| MetadataError::Json(e.to_string()))?;
    let spectra = match value.get("spectra").and_then(Value::as_array) {
        Some(spectra) => spectra,
        None => return Ok((SchemaVariant::Legacy, FluorToMarker::new())),
    };

    let fluor_to_marker: FluorToMarker = spectra
        .iter()
        .filter_map(|entry| {
            let fluor = entry.get("fluor")?.as_str()?;
            let marker = entry.get("marker")?.as_str()?;
            Some((fluor.to_string(), marker.to_string()))
        })
        .collect();

    debug!(
        spectra = spectra.len(),
        mapped = fluor_to_marker.len(),
        "spectral descriptor library found"
    );
    Ok((SchemaVariant::Spectral, fluor_to_marker))
}

/// Channel name and raw color read from one page descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PageChannel {
    pub name: String,
    pub color: Color,
}

/// Read a page's channel under `variant`; the error is a reason to fall back.
pub fn read_page_channel(
    descriptor: &Element,
    variant: SchemaVariant,
) -> Result<PageChannel, String> {
    let name = descriptor
        .find_text(variant.name_path())
        .ok_or_else(|| format!("no {} element", variant.name_path()))?;
    let color_text = descriptor
        .find_text(COLOR_PATH)
        .ok_or_else(|| format!("no {} element", COLOR_PATH))?;
    let color = Color::parse_components(color_text).map_err(|e| e.to_string())?;

    Ok(PageChannel {
        name: name.to_string(),
        color,
    })
}
