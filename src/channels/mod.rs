//! Per-channel identity and color from embedded page descriptors.
//!
//! Fluorescence files carry one XML descriptor per page (one page per
//! channel). Two descriptor generations exist, see [`SchemaVariant`], and
//! some writers instead put a packed-color channel list into a single
//! descriptor, see [`fallback`].
//!
//! Extraction runs in four steps:
//!
//! 1. Detect the schema once, from the first page.
//! 2. Read name and color from every page under that schema.
//! 3. Optionally fill pages that could not be read from the single-page
//!    channel list.
//! 4. Normalize every color into [0, 1].

pub mod color;
pub mod fallback;
pub mod schema;
pub mod xml;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::MetadataError;

pub use color::Color;
pub use fallback::{find_channels, parse_channel_list, FallbackChannel};
pub use schema::{
    detect_schema, read_page_channel, FluorToMarker, PageChannel, SchemaVariant, COLOR_PATH,
    LIBRARY_PATH,
};
pub use xml::Element;

/// Where a channel's name and color came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSource {
    /// The page's own descriptor
    Descriptor,
    /// The single-page channel list
    Fallback,
}

/// One channel of a fluorescence image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    /// Position on the array's channel axis
    pub index: usize,
    /// Fluorophore or filter name as written in the file
    pub dye: String,
    /// Resolved biomarker, spectral files only
    pub biomarker: Option<String>,
    /// Normalized to [0, 1]
    pub color: Color,
    pub source: ChannelSource,
}

impl ChannelInfo {
    /// Biomarker when known, dye otherwise.
    pub fn display_name(&self) -> &str {
        self.biomarker.as_deref().unwrap_or(&self.dye)
    }
}

/// Ordered channels plus the file-level schema decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelTable {
    pub channels: Vec<ChannelInfo>,
    pub variant: SchemaVariant,
    pub fluor_to_marker: FluorToMarker,
    /// Pages whose channel came from the single-page list
    pub fallback_pages: Vec<usize>,
    /// Spectral dyes with no library entry
    pub unmapped: Vec<String>,
}

impl ChannelTable {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn used_fallback(&self) -> bool {
        self.channels
            .iter()
            .any(|c| c.source == ChannelSource::Fallback)
    }
}

/// Build the channel table from page descriptors, in page order.
///
/// `descriptors[p]` is the `ImageDescription` of page `p`, if it has one.
/// With `single_page_fallback` disabled, the first page that cannot be read
/// is an error.
pub fn extract_channels(
    descriptors: &[Option<String>],
    single_page_fallback: bool,
) -> Result<ChannelTable, MetadataError> {
    let parsed: Vec<Result<Element, String>> = descriptors
        .iter()
        .map(|descriptor| match descriptor {
            Some(text) => Element::parse(text).map_err(|e| e.to_string()),
            None => Err("page has no descriptor".to_string()),
        })
        .collect();

    let first = parsed.first().and_then(|p| p.as_ref().ok());
    let (variant, fluor_to_marker) = detect_schema(first)?;
    debug!(
        variant = ?variant,
        pages = descriptors.len(),
        "channel descriptor schema detected"
    );

    let mut pages: Vec<Option<PageChannel>> = Vec::with_capacity(parsed.len());
    let mut failed: Vec<(usize, String)> = Vec::new();
    for (page, result) in parsed.iter().enumerate() {
        match result
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|element| read_page_channel(element, variant))
        {
            Ok(channel) => pages.push(Some(channel)),
            Err(reason) => {
                if !single_page_fallback {
                    return Err(MetadataError::PageDescriptor { page, reason });
                }
                debug!(page, reason = %reason, "page descriptor unusable");
                failed.push((page, reason));
                pages.push(None);
            }
        }
    }

    let list = if failed.is_empty() {
        Vec::new()
    } else {
        let channels = parsed
            .iter()
            .filter_map(|p| p.as_ref().ok())
            .find_map(find_channels)
            .ok_or_else(|| {
                let (page, reason) = &failed[0];
                MetadataError::Fallback(format!(
                    "page {} unusable ({}) and no descriptor has a channels list",
                    page, reason
                ))
            })?;
        parse_channel_list(channels)?
    };

    let mut channels = Vec::with_capacity(pages.len().max(list.len()));
    let mut fallback_pages = Vec::new();
    for (index, page) in pages.into_iter().enumerate() {
        let (dye, color, source) = match page {
            Some(channel) => (channel.name, channel.color, ChannelSource::Descriptor),
            None => {
                let entry = list.get(index).ok_or_else(|| {
                    MetadataError::Fallback(format!(
                        "channels list has {} entries, page {} needs one",
                        list.len(),
                        index
                    ))
                })?;
                fallback_pages.push(index);
                (entry.name.clone(), entry.color, ChannelSource::Fallback)
            }
        };
        channels.push((dye, color, source));
    }
    let page_count = channels.len();
    if !failed.is_empty() {
        for entry in list.iter().skip(page_count) {
            channels.push((entry.name.clone(), entry.color, ChannelSource::Fallback));
        }
    }

    if !fallback_pages.is_empty() {
        warn!(
            pages = ?fallback_pages,
            extra = channels.len() - page_count,
            "channel metadata taken from the single-page channel list"
        );
    }

    let mut unmapped = Vec::new();
    let channels: Vec<ChannelInfo> = channels
        .into_iter()
        .enumerate()
        .map(|(index, (dye, color, source))| {
            let biomarker = match variant {
                SchemaVariant::Legacy => None,
                SchemaVariant::Spectral => {
                    let marker = fluor_to_marker.get(&dye).cloned();
                    if marker.is_none() {
                        unmapped.push(dye.clone());
                    }
                    marker
                }
            };
            ChannelInfo {
                index,
                dye,
                biomarker,
                color: color.normalized(),
                source,
            }
        })
        .collect();

    if !unmapped.is_empty() {
        warn!(dyes = ?unmapped, "fluorophores missing from the spectral library");
    }
    info!(
        channels = channels.len(),
        variant = ?variant,
        "channel metadata extracted"
    );

    Ok(ChannelTable {
        channels,
        variant,
        fluor_to_marker,
        fallback_pages,
        unmapped,
    })
}
