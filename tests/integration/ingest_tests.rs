//! End-to-end ingestion tests.
//!
//! Tests verify:
//! - Brightfield files become one layer, fluorescence files one per channel
//! - Modality and intensity scale are inferred from the coarsest level
//! - Resolution tags become the layer scale, or default with an advisory
//! - Batches skip non-files and keep file order

use std::path::PathBuf;

use serde_json::json;
use wsi_ingest::{
    load_image, load_images, Advisory, Blending, IngestError, IngestOptions, LayerKind,
    MetadataError, Modality, PixelArray,
};

use super::test_utils::{
    channel_list_descriptor, legacy_descriptor, spectral_descriptor, write_file, PageBuilder,
    TiffBuilder,
};

const CENTIMETER: u16 = 3;
const INCH: u16 = 2;

/// Bright RGB tissue, max 200.
fn brightfield_file() -> Vec<u8> {
    let value = |x: u32, y: u32| (150 + (x + y) % 51) as u8;
    TiffBuilder::new()
        .page(PageBuilder::rgb8(32, 32, move |x, y| [value(x, y); 3]).tiled(16, 16))
        .build()
}

/// Dark 16-bit channel `c`; one bright pixel on the last channel lifts the
/// maximum into the 12-bit range at every level.
fn fluorescence_page(size: u32, channel: u16, channels: u16) -> PageBuilder {
    PageBuilder::gray16(size, size, move |x, y| {
        if channel == channels - 1 && x == 0 && y == 0 {
            3000
        } else {
            ((x + y) % 64) as u16 + channel * 10
        }
    })
    .tiled(16, 16)
}

/// Two-level fluorescence file with the given base-page descriptors.
fn fluorescence_file(descriptors: &[String], resolution: Option<((u32, u32), u16)>) -> Vec<u8> {
    let channels = descriptors.len() as u16;
    let mut builder = TiffBuilder::new();
    for (c, descriptor) in descriptors.iter().enumerate() {
        let mut page = fluorescence_page(32, c as u16, channels).description(descriptor.clone());
        if let Some((rational, unit)) = resolution {
            page = page.resolution(rational, rational, unit);
        }
        builder = builder.page(page);
    }
    for c in 0..channels {
        builder = builder.page(fluorescence_page(16, c, channels).reduced());
    }
    builder.build()
}

fn legacy_descriptors() -> Vec<String> {
    vec![
        legacy_descriptor("DAPI", "0,0,255"),
        legacy_descriptor("FITC", "0,255,0"),
        legacy_descriptor("Cy5", "255,0,0"),
    ]
}

fn layer_names(layers: &[wsi_ingest::LayerDescriptor]) -> Vec<&str> {
    layers.iter().map(|layer| layer.name()).collect()
}

// =============================================================================
// Brightfield
// =============================================================================

#[tokio::test]
async fn test_brightfield_single_layer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "he_slide.tif", &brightfield_file());

    let report = load_image(&path, None, false, &IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.layers.len(), 1);
    let layer = &report.layers[0];
    assert_eq!(layer.name(), "he_slide");
    assert_eq!(layer.kind, LayerKind::Image);
    assert_eq!(layer.data.len(), 1);
    assert_eq!(layer.data[0].shape(), &[32, 32, 3]);
    assert_eq!(layer.properties.contrast_limits, [0.0, 255.0]);
    assert_eq!(layer.properties.scale, [1.0, 1.0]);
    assert!(layer.properties.colormap.is_none());
    assert!(layer.properties.blending.is_none());

    let metadata = &layer.properties.metadata;
    assert_eq!(metadata["modality"], json!("BF"));
    assert_eq!(metadata["int_scale"], json!(255));
    assert_eq!(metadata["res_scale"], json!([1.0, 1.0]));
    assert_eq!(metadata["ImageWidth"], json!(32));
    assert_eq!(metadata["path"], json!(path.display().to_string()));
    assert!(!metadata.contains_key("colmap_channels"));

    // No resolution tags
    assert!(matches!(
        report.advisories.as_slice(),
        [Advisory::ResolutionDefaulted { .. }]
    ));
}

#[tokio::test]
async fn test_report_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "he_slide.tif", &brightfield_file());

    let report = load_image(&path, None, false, &IngestOptions::default())
        .await
        .unwrap();
    let value = serde_json::to_value(&report).unwrap();

    let layer = &value["layers"][0];
    assert_eq!(layer["kind"], "image");
    assert_eq!(layer["data"][0]["shape"], json!([32, 32, 3]));
    assert_eq!(layer["data"][0]["dtype"], "uint8");
    assert_eq!(layer["data"][0]["resident"], false);
    assert_eq!(layer["properties"]["contrast_limits"], json!([0.0, 255.0]));
    assert!(layer["properties"].get("colormap").is_none());
    assert_eq!(value["advisories"][0]["kind"], "resolution_defaulted");
}

/// Point the page-0 entry for `tag` (classic little-endian, one RATIONAL)
/// past the end of the file.
fn break_rational_offset(data: &mut [u8], tag: u16) {
    let mut entry = Vec::with_capacity(8);
    entry.extend(tag.to_le_bytes());
    entry.extend(5u16.to_le_bytes());
    entry.extend(1u32.to_le_bytes());
    let at = data
        .windows(entry.len())
        .rposition(|window| window == entry.as_slice())
        .expect("rational entry");
    data[at + 8..at + 12].copy_from_slice(&0x00FF_FFF0u32.to_le_bytes());
}

#[tokio::test]
async fn test_unreadable_resolution_tags_default() {
    let value = |x: u32, y: u32| (150 + (x + y) % 51) as u8;
    let mut data = TiffBuilder::new()
        .page(
            PageBuilder::rgb8(32, 32, move |x, y| [value(x, y); 3])
                .tiled(16, 16)
                .resolution((20000, 1), (20000, 1), CENTIMETER),
        )
        .build();
    break_rational_offset(&mut data, 282);
    break_rational_offset(&mut data, 283);

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "corrupt_res.tif", &data);

    let report = load_image(&path, None, false, &IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.layers.len(), 1);
    let properties = &report.layers[0].properties;
    assert_eq!(properties.scale, [1.0, 1.0]);
    assert!(matches!(
        report.advisories.as_slice(),
        [Advisory::ResolutionDefaulted { .. }]
    ));

    // Unreadable values are left out, readable ones stay
    let metadata = &properties.metadata;
    assert!(metadata.get("XResolution").is_none());
    assert!(metadata.get("YResolution").is_none());
    assert_eq!(metadata["ResolutionUnit"], json!("RESUNIT.CENTIMETER"));
    assert_eq!(metadata["modality"], json!("BF"));
}

// =============================================================================
// Fluorescence
// =============================================================================

#[tokio::test]
async fn test_legacy_fluorescence_layers() {
    let dir = tempfile::tempdir().unwrap();
    let data = fluorescence_file(&legacy_descriptors(), Some(((20000, 1), CENTIMETER)));
    let path = write_file(dir.path(), "panel.qptiff", &data);

    let report = load_image(&path, None, false, &IngestOptions::default())
        .await
        .unwrap();

    assert!(report.advisories.is_empty(), "{:?}", report.advisories);
    assert_eq!(
        layer_names(&report.layers),
        vec!["DAPI_panel", "FITC_panel", "Cy5_panel"]
    );

    for (index, layer) in report.layers.iter().enumerate() {
        let properties = &layer.properties;
        assert_eq!(properties.blending, Some(Blending::Additive));
        assert_eq!(properties.contrast_limits, [0.0, 4095.0]);
        assert_eq!(properties.scale, [0.00005, 0.00005]);

        let shapes: Vec<&[usize]> = layer.data.iter().map(|level| level.shape()).collect();
        assert_eq!(shapes, vec![&[32, 32][..], &[16, 16][..]]);

        assert_eq!(properties.metadata["channel_index"], json!(index));
        assert_eq!(properties.metadata["modality"], json!("IF"));
        assert_eq!(properties.metadata["schema"], json!("legacy"));
        assert!(properties.metadata.get("biomarker").is_none());
    }

    let colormap = report.layers[0].properties.colormap.as_ref().unwrap();
    assert_eq!(colormap.name, "DAPI");
    assert_eq!(colormap.colors, [[0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 1.0, 1.0]]);

    let metadata = &report.layers[2].properties.metadata;
    assert_eq!(metadata["ResolutionUnit"], json!("RESUNIT.CENTIMETER"));
    assert_eq!(metadata["XResolution"], json!([20000, 1]));
    assert_eq!(metadata["format"], json!("perkin_elmer_qptiff"));

    let colmap = metadata["colmap_channels"].as_array().unwrap();
    let names: Vec<&str> = colmap.iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["DAPI", "FITC", "Cy5"]);
    assert_eq!(colmap[1]["index"], json!(1));
    assert_eq!(colmap[1]["color"], json!([0.0, 1.0, 0.0]));

    // Each layer reads its own page
    let PixelArray::U16(fitc) = report.layers[1].data[1].materialize().await.unwrap() else {
        panic!("expected uint16 pixels");
    };
    assert_eq!(fitc[[0, 0]], 10);
    assert_eq!(fitc[[3, 4]], 17);
}

#[tokio::test]
async fn test_spectral_fluorescence_biomarkers() {
    let library = r#"{"spectra": [{"fluor": "DAPI", "marker": "Nucleus"}, {"fluor": "Opal 520", "marker": "CD8"}]}"#;
    let descriptors = vec![
        spectral_descriptor("DAPI", "0,0,255", Some(library)),
        spectral_descriptor("Opal 520", "0,255,0", None),
        spectral_descriptor("Opal 690", "255,0,255", None),
    ];
    let dir = tempfile::tempdir().unwrap();
    let data = fluorescence_file(&descriptors, Some(((1, 1), INCH)));
    let path = write_file(dir.path(), "spectral.qptiff", &data);

    let report = load_image(&path, None, false, &IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(
        layer_names(&report.layers),
        vec!["Nucleus_spectral", "CD8_spectral", "Opal 690_spectral"]
    );
    assert_eq!(report.layers[0].properties.scale, [2.54, 2.54]);

    let metadata = &report.layers[1].properties.metadata;
    assert_eq!(metadata["dye"], json!("Opal 520"));
    assert_eq!(metadata["biomarker"], json!("CD8"));
    assert_eq!(metadata["schema"], json!("spectral"));
    assert_eq!(metadata["fluor_to_marker"]["DAPI"], json!("Nucleus"));

    assert_eq!(
        report.advisories,
        vec![Advisory::UnmappedFluorophore {
            path: path.clone(),
            dye: "Opal 690".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_single_page_channel_list() {
    let descriptor = channel_list_descriptor(&[
        ("DAPI", 0x0000FF),
        ("FITC", 0x00FF00),
        ("TRITC", 0xFF0080),
    ]);
    let data = TiffBuilder::new()
        .page(
            PageBuilder::rgb8(32, 32, |x, y| [(x % 40) as u8, (y % 40) as u8, (x + y) as u8])
                .tiled(16, 16)
                .description(descriptor),
        )
        .build();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "composite.tif", &data);

    let options = IngestOptions {
        single_page_fallback: true,
        ..IngestOptions::default()
    };
    let report = load_image(&path, Some(Modality::Fluorescence), false, &options)
        .await
        .unwrap();

    assert_eq!(
        layer_names(&report.layers),
        vec!["DAPI_composite", "FITC_composite", "TRITC_composite"]
    );
    assert!(report.advisories.contains(&Advisory::FallbackUsed {
        path: path.clone(),
        pages: vec![0],
    }));

    let tritc = &report.layers[2];
    assert_eq!(tritc.data[0].shape(), &[32, 32]);
    assert_eq!(tritc.properties.metadata["channel_source"], json!("fallback"));
    let colors = tritc.properties.colormap.as_ref().unwrap().colors[1];
    assert_eq!(colors[0], 1.0);
    assert_eq!(colors[1], 0.0);
    assert!((colors[2] - 128.0 / 255.0).abs() < 1e-12);

    let PixelArray::U8(blue) = tritc.data[0].materialize().await.unwrap() else {
        panic!("expected uint8 pixels");
    };
    assert_eq!(blue[[7, 9]], 16);
}

#[tokio::test]
async fn test_unreadable_descriptor_without_fallback() {
    let descriptor = channel_list_descriptor(&[("DAPI", 0x0000FF)]);
    let data = TiffBuilder::new()
        .page(
            PageBuilder::gray16(32, 32, |x, y| (x + y) as u16 + 300)
                .tiled(16, 16)
                .description(descriptor),
        )
        .build();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "single.tif", &data);

    let err = load_image(&path, Some(Modality::Fluorescence), false, &IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Metadata(MetadataError::PageDescriptor { page: 0, .. })
    ));
}

// =============================================================================
// Modality and loading
// =============================================================================

#[tokio::test]
async fn test_requested_modality_wins() {
    let dir = tempfile::tempdir().unwrap();
    let data = fluorescence_file(&legacy_descriptors(), Some(((20000, 1), CENTIMETER)));
    let path = write_file(dir.path(), "panel.qptiff", &data);

    let report = load_image(&path, Some(Modality::Brightfield), false, &IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(layer_names(&report.layers), vec!["panel"]);
    assert_eq!(report.layers[0].data[0].shape(), &[3, 32, 32]);
    assert_eq!(
        report.advisories,
        vec![Advisory::ModalityMismatch {
            path,
            requested: Modality::Brightfield,
            inferred: Modality::Fluorescence,
        }]
    );
}

#[tokio::test]
async fn test_threshold_controls_inference() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "he_slide.tif", &brightfield_file());

    // Every image is dark under a threshold above its mean
    let options = IngestOptions {
        fluorescence_threshold: 250.0,
        ..IngestOptions::default()
    };
    let err = load_image(&path, None, false, &options).await.unwrap_err();
    assert!(matches!(err, IngestError::Metadata(_)));
}

#[tokio::test]
async fn test_load_mem_layers_are_resident() {
    let dir = tempfile::tempdir().unwrap();
    let data = fluorescence_file(&legacy_descriptors(), None);
    let path = write_file(dir.path(), "panel.qptiff", &data);

    let lazy = load_image(&path, None, false, &IngestOptions::default())
        .await
        .unwrap();
    let resident = load_image(&path, None, true, &IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(layer_names(&lazy.layers), layer_names(&resident.layers));
    for (lazy, resident) in lazy.layers.iter().zip(&resident.layers) {
        for (lazy, resident) in lazy.data.iter().zip(&resident.data) {
            assert!(!lazy.is_resident());
            assert!(resident.is_resident());
            assert_eq!(lazy.stats().await.unwrap(), resident.stats().await.unwrap());
        }
    }
}

#[tokio::test]
async fn test_batch_keeps_file_order() {
    let dir = tempfile::tempdir().unwrap();
    let brightfield = write_file(dir.path(), "he_slide.tif", &brightfield_file());
    let fluorescence = write_file(
        dir.path(),
        "panel.qptiff",
        &fluorescence_file(&legacy_descriptors(), Some(((20000, 1), CENTIMETER))),
    );
    let paths: Vec<PathBuf> = vec![
        fluorescence,
        dir.path().to_path_buf(),
        brightfield.clone(),
        dir.path().join("missing.tif"),
    ];

    let report = load_images(&paths, None, false, &IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(
        layer_names(&report.layers),
        vec!["DAPI_panel", "FITC_panel", "Cy5_panel", "he_slide"]
    );
    assert!(matches!(
        report.advisories.as_slice(),
        [Advisory::ResolutionDefaulted { path, .. }] if *path == brightfield
    ));
}
