//! Seam for vector annotation loaders.
//!
//! Annotations are drawn in image pixel space with the y axis pointing up,
//! so their layers reuse the image's pixel pitch with y flipped.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::IngestError;
use crate::layer::LayerKind;
use crate::metadata::MetadataBag;
use crate::resolution::ResolutionInfo;

/// One closed outline, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
    pub vertices: Vec<[f64; 2]>,
    pub properties: MetadataBag,
}

/// A layer of shapes produced by an [`AnnotationLoader`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeLayer {
    pub name: String,
    pub scale: [f64; 2],
    pub shapes: Vec<Polygon>,
    pub kind: LayerKind,
}

/// Loads an annotation file into shape layers aligned with an image.
///
/// `image_scale` is the pitch of the image the annotations belong to;
/// implementations set each layer's scale to
/// [`aligned_annotation_scale`] of it.
#[async_trait]
pub trait AnnotationLoader: Send + Sync {
    async fn load(
        &self,
        path: &Path,
        image_scale: ResolutionInfo,
    ) -> Result<Vec<ShapeLayer>, IngestError>;
}

/// Scale that lays annotation shapes over an image of pitch `image_scale`.
pub fn aligned_annotation_scale(image_scale: ResolutionInfo) -> [f64; 2] {
    [-image_scale.y, image_scale.x]
}
