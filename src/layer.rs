//! Display-ready layer records.
//!
//! A brightfield image becomes one layer over all of its levels. A
//! fluorescence image becomes one layer per channel, each holding that
//! channel's slice of every level and its own colormap.

use serde::Serialize;

use crate::array::LazyArray;
use crate::channels::{ChannelInfo, ChannelTable};
use crate::error::IngestError;
use crate::intensity::IntensityScale;
use crate::metadata::{channel_metadata, MetadataBag};
use crate::resolution::ResolutionInfo;

/// What a display surface should create for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Image,
    /// Vector annotations, produced by an [`crate::annotation::AnnotationLoader`]
    Shapes,
}

/// How overlapping layers are composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Blending {
    Translucent,
    Additive,
}

/// A two-stop linear colormap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Colormap {
    pub name: String,
    /// RGBA stops, low to high
    pub colors: [[f64; 4]; 2],
}

impl Colormap {
    /// Transparent black up to opaque `channel.color`.
    pub fn for_channel(channel: &ChannelInfo) -> Self {
        Colormap {
            name: channel.dye.clone(),
            colors: [[0.0, 0.0, 0.0, 0.0], channel.color.to_rgba(1.0)],
        }
    }
}

/// Display properties of one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerProperties {
    pub name: String,
    /// Physical size of one pixel, x then y
    pub scale: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colormap: Option<Colormap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blending: Option<Blending>,
    pub contrast_limits: [f64; 2],
    pub metadata: MetadataBag,
}

/// Arrays plus properties, ready to hand to a viewer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerDescriptor {
    /// Finest level first
    pub data: Vec<LazyArray>,
    pub properties: LayerProperties,
    pub kind: LayerKind,
}

impl LayerDescriptor {
    pub fn name(&self) -> &str {
        &self.properties.name
    }
}

/// One layer for a brightfield image, named after the file stem.
pub fn brightfield_layer(
    levels: Vec<LazyArray>,
    stem: &str,
    resolution: ResolutionInfo,
    scale: IntensityScale,
    metadata: MetadataBag,
) -> LayerDescriptor {
    LayerDescriptor {
        data: levels,
        properties: LayerProperties {
            name: stem.to_string(),
            scale: [resolution.x, resolution.y],
            colormap: None,
            blending: None,
            contrast_limits: scale.contrast_limits(),
            metadata,
        },
        kind: LayerKind::Image,
    }
}

/// One additive layer per channel of `table`, in channel order.
///
/// Each layer gets its own copy of `metadata` with the channel's dye and
/// biomarker added.
pub fn fluorescence_layers(
    levels: &[LazyArray],
    stem: &str,
    resolution: ResolutionInfo,
    scale: IntensityScale,
    table: &ChannelTable,
    metadata: &MetadataBag,
) -> Result<Vec<LayerDescriptor>, IngestError> {
    table
        .channels
        .iter()
        .map(|channel| {
            let data = levels
                .iter()
                .map(|level| level.channel(channel.index))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(LayerDescriptor {
                data,
                properties: LayerProperties {
                    name: format!("{}_{}", channel.display_name(), stem),
                    scale: [resolution.x, resolution.y],
                    colormap: Some(Colormap::for_channel(channel)),
                    blending: Some(Blending::Additive),
                    contrast_limits: scale.contrast_limits(),
                    metadata: channel_metadata(metadata, channel),
                },
                kind: LayerKind::Image,
            })
        })
        .collect()
}
