//! Free-form metadata attached to every layer.
//!
//! The bag starts from the tags of the first full-resolution page and is
//! extended with what ingestion derived: source path, slide flavor, modality,
//! pixel pitch, intensity ceiling and, for fluorescence, the channel tables.

use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::channels::{ChannelInfo, ChannelTable, SchemaVariant};
use crate::format::tiff::{ImagePage, TagValue, TiffHeader, TiffTag, ValueReader};
use crate::format::SlideFormat;
use crate::intensity::{IntensityScale, Modality};
use crate::io::RangeReader;
use crate::resolution::{ResolutionInfo, ResolutionUnit};

/// Metadata keyed by tag name or derived field.
pub type MetadataBag = Map<String, Value>;

/// Read every non-structural tag of `page` into a bag.
///
/// Named tags are keyed by name, unnamed ones by their numeric ID. Opaque
/// byte values, tags with unknown field types and values that cannot be read
/// are left out.
pub async fn read_tag_bag<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    page: &ImagePage,
) -> MetadataBag {
    let values = ValueReader::new(reader, header);
    let mut bag = MetadataBag::new();

    for entry in &page.ifd.entries {
        let tag = TiffTag::from_u16(entry.tag_id);
        if tag.is_some_and(TiffTag::is_structural) {
            continue;
        }
        if entry.field_type.is_none() {
            debug!(tag = entry.tag_id, "skipping tag with unknown field type");
            continue;
        }

        let key = tag
            .map(|t| t.name().to_string())
            .unwrap_or_else(|| entry.tag_id.to_string());
        let value = match values.read_value(entry).await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    slide = reader.identifier(),
                    tag = %key,
                    error = %e,
                    "skipping unreadable tag"
                );
                continue;
            }
        };
        if let Some(json) = tag_value_to_json(tag, value) {
            bag.insert(key, json);
        }
    }

    bag
}

/// JSON form of a tag value; `None` for opaque bytes.
///
/// Single values become scalars, rationals `[numerator, denominator]`.
pub fn tag_value_to_json(tag: Option<TiffTag>, value: TagValue) -> Option<Value> {
    if tag == Some(TiffTag::ResolutionUnit) {
        if let TagValue::Unsigned(ref codes) = value {
            if let [code] = codes.as_slice() {
                if let Some(unit) = u16::try_from(*code).ok().and_then(ResolutionUnit::from_u16) {
                    return Some(Value::String(unit.to_string()));
                }
            }
        }
    }

    let json = match value {
        TagValue::Ascii(text) => Value::String(text),
        TagValue::Unsigned(values) => scalar_or_array(values),
        TagValue::Signed(values) => scalar_or_array(values),
        TagValue::Float(values) => scalar_or_array(values),
        TagValue::Rational(values) => {
            scalar_or_array(values.into_iter().map(|(n, d)| json!([n, d])).collect::<Vec<Value>>())
        }
        TagValue::SignedRational(values) => {
            scalar_or_array(values.into_iter().map(|(n, d)| json!([n, d])).collect::<Vec<Value>>())
        }
        TagValue::Bytes(_) => return None,
    };
    Some(json)
}

fn scalar_or_array<T: Into<Value>>(mut values: Vec<T>) -> Value {
    if values.len() == 1 {
        values.remove(0).into()
    } else {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

/// Add the derived image-level fields to a page tag bag.
pub fn image_metadata(
    mut bag: MetadataBag,
    path: &Path,
    format: SlideFormat,
    modality: Modality,
    resolution: ResolutionInfo,
    scale: IntensityScale,
    channels: Option<&ChannelTable>,
) -> MetadataBag {
    let path = Value::String(path.display().to_string());
    bag.insert("ImagePath".to_string(), path.clone());
    bag.insert("path".to_string(), path);
    bag.insert("format".to_string(), json!(format));
    bag.insert("modality".to_string(), Value::String(modality.code().to_string()));
    bag.insert("res_scale".to_string(), json!([resolution.x, resolution.y]));
    bag.insert("int_scale".to_string(), json!(scale.ceiling()));

    if let Some(table) = channels {
        bag.insert("fluor_to_marker".to_string(), json!(table.fluor_to_marker));
        // One entry per channel in channel order; dye names may repeat
        let colmap: Vec<Value> = table
            .channels
            .iter()
            .map(|c| {
                json!({
                    "index": c.index,
                    "name": c.display_name(),
                    "dye": c.dye,
                    "biomarker": c.biomarker,
                    "color": [c.color.r, c.color.g, c.color.b],
                })
            })
            .collect();
        bag.insert("colmap_channels".to_string(), Value::Array(colmap));
        bag.insert("schema".to_string(), json!(table.variant));
        bag.insert(
            "new_format".to_string(),
            Value::Bool(table.variant == SchemaVariant::Spectral),
        );
    }
    bag
}

/// An independent copy of `base` naming one channel.
pub fn channel_metadata(base: &MetadataBag, channel: &ChannelInfo) -> MetadataBag {
    let mut bag = base.clone();
    bag.insert("channel_index".to_string(), json!(channel.index));
    bag.insert("dye".to_string(), Value::String(channel.dye.clone()));
    if let Some(biomarker) = &channel.biomarker {
        bag.insert("biomarker".to_string(), Value::String(biomarker.clone()));
    }
    bag.insert("channel_source".to_string(), json!(channel.source));
    bag
}
