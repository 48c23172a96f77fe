//! Single-page channel list.
//!
//! Some writers put every channel of the image into one descriptor as
//!
//! ```xml
//! <channels>
//!   <channel id="0" name="DAPI" rgb="255"/>
//!   <channel id="1" name="FITC" rgb="65280"/>
//! </channels>
//! ```
//!
//! with the color packed into a single integer.

use crate::error::MetadataError;

use super::color::Color;
use super::xml::Element;

/// One entry of a `channels` list.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackChannel {
    pub id: Option<String>,
    pub name: String,
    /// 0-255 components
    pub color: Color,
}

/// The `channels` element of a descriptor, if it has one.
///
/// The descriptor root itself counts when it is the `channels` element.
pub fn find_channels(descriptor: &Element) -> Option<&Element> {
    if descriptor.name == "channels" {
        return Some(descriptor);
    }
    descriptor.find(".//channels")
}

/// Parse the `channel` children of a `channels` element, in order.
pub fn parse_channel_list(channels: &Element) -> Result<Vec<FallbackChannel>, MetadataError> {
    channels
        .children_named("channel")
        .enumerate()
        .map(|(position, channel)| {
            let name = channel
                .attribute("name")
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    MetadataError::Fallback(format!("channel {} has no name", position))
                })?;
            let rgb = channel.attribute("rgb").ok_or_else(|| {
                MetadataError::Fallback(format!("channel {:?} has no rgb attribute", name))
            })?;
            let packed = rgb
                .trim()
                .parse::<i64>()
                .map_err(|e| MetadataError::InvalidColor {
                    value: rgb.to_string(),
                    message: e.to_string(),
                })?;

            Ok(FallbackChannel {
                id: channel.attribute("id").map(str::to_string),
                name: name.to_string(),
                color: Color::from_packed_rgb(packed),
            })
        })
        .collect()
}
