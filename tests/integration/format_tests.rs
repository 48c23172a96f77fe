//! Format-specific integration tests.
//!
//! Tests verify:
//! - Pages are grouped into levels from the IFD chain and from SubIFDs
//! - Little-endian, big-endian and BigTIFF files decode to the same pixels
//! - LZW and Deflate chunks, tiles and strips, edge padding
//! - Slide flavor detection

use wsi_ingest::{
    load_levels, BytesReader, ChannelAxis, DType, LoadOptions, PixelArray, SlideFormat,
    TiffPyramid,
};

use super::test_utils::{
    legacy_descriptor, write_file, ByteOrderType, Codec, PageBuilder, TiffBuilder,
};

fn ramp(x: u32, y: u32) -> u16 {
    (1000 + x * 3 + y * 7) as u16
}

fn materialized_u16(array: PixelArray) -> ndarray::ArrayD<u16> {
    match array {
        PixelArray::U16(values) => values,
        other => panic!("expected uint16 pixels, got {}", other.dtype()),
    }
}

// =============================================================================
// Pyramid grouping
// =============================================================================

#[tokio::test]
async fn test_main_chain_pyramid_with_thumbnail() {
    let data = TiffBuilder::new()
        .page(PageBuilder::gray16(64, 64, ramp).tiled(16, 16))
        .page(PageBuilder::gray16(32, 32, ramp).tiled(16, 16).reduced())
        .page(PageBuilder::gray16(16, 16, ramp).tiled(16, 16).reduced())
        // Thumbnail: stripped, so never a level
        .page(PageBuilder::gray16(8, 8, ramp).reduced())
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "chain.tif", &data);
    let slide = load_levels(&path, &LoadOptions::default()).await.unwrap();

    assert_eq!(slide.pyramid.ifd_count, 4);
    assert_eq!(slide.pyramid.auxiliary.len(), 1);
    assert_eq!(slide.format, SlideFormat::GenericTiff);

    let shapes: Vec<Vec<usize>> = slide.levels.iter().map(|l| l.shape().to_vec()).collect();
    assert_eq!(shapes, vec![vec![64, 64], vec![32, 32], vec![16, 16]]);
    assert!(slide.levels.iter().all(|l| l.dtype() == DType::U16));
    assert!(slide.levels.iter().all(|l| !l.is_resident()));

    let level1 = materialized_u16(slide.levels[1].materialize().await.unwrap());
    assert_eq!(level1[[0, 0]], ramp(0, 0));
    assert_eq!(level1[[5, 20]], ramp(20, 5));
    assert_eq!(level1[[31, 31]], ramp(31, 31));
}

#[tokio::test]
async fn test_sub_ifd_pyramid() {
    let channel = |offset: u16| {
        move |size: u32| PageBuilder::gray16(size, size, move |x, y| offset + (x + y) as u16)
    };
    let first = channel(0);
    let second = channel(500);

    let data = TiffBuilder::new()
        .page(
            first(32)
                .tiled(16, 16)
                .sub_page(first(16).tiled(16, 16).reduced())
                .sub_page(first(8).tiled(16, 16).reduced()),
        )
        .page(
            second(32)
                .tiled(16, 16)
                .sub_page(second(16).tiled(16, 16).reduced())
                .sub_page(second(8).tiled(16, 16).reduced()),
        )
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "subifd.tif", &data);
    let slide = load_levels(&path, &LoadOptions::default()).await.unwrap();

    // Sub-levels are not part of the main chain
    assert_eq!(slide.pyramid.ifd_count, 2);

    let shapes: Vec<Vec<usize>> = slide.levels.iter().map(|l| l.shape().to_vec()).collect();
    assert_eq!(shapes, vec![vec![2, 32, 32], vec![2, 16, 16], vec![2, 8, 8]]);
    assert!(slide
        .levels
        .iter()
        .all(|l| l.channel_axis() == ChannelAxis::Pages));

    let coarsest = slide.coarsest().unwrap();
    let second_channel = materialized_u16(coarsest.channel(1).unwrap().materialize().await.unwrap());
    assert_eq!(second_channel.shape(), &[8, 8]);
    assert_eq!(second_channel[[0, 0]], 500);
    assert_eq!(second_channel[[7, 3]], 510);
}

#[tokio::test]
async fn test_pyramid_from_memory() {
    let data = TiffBuilder::new()
        .page(PageBuilder::gray16(48, 48, ramp).tiled(16, 16))
        .page(PageBuilder::gray16(48, 48, ramp).tiled(16, 16))
        .page(PageBuilder::gray16(24, 24, ramp).tiled(16, 16).reduced())
        .page(PageBuilder::gray16(24, 24, ramp).tiled(16, 16).reduced())
        .build();

    let reader = BytesReader::new(data, "memory.tif");
    let pyramid = TiffPyramid::parse(&reader).await.unwrap();

    assert_eq!(pyramid.level_count(), 2);
    assert_eq!(pyramid.channel_count(), 2);
    assert_eq!(pyramid.dimensions(), Some((48, 48)));
    assert_eq!(pyramid.levels[1].downsample, 2.0);
    assert!(pyramid.auxiliary.is_empty());
}

// =============================================================================
// Byte order and BigTIFF
// =============================================================================

#[tokio::test]
async fn test_both_byte_orders_decode_identically() {
    let dir = tempfile::tempdir().unwrap();
    let mut decoded = Vec::new();

    for (name, order) in [
        ("le.tif", ByteOrderType::LittleEndian),
        ("be.tif", ByteOrderType::BigEndian),
    ] {
        let data = TiffBuilder::new()
            .with_byte_order(order)
            .page(PageBuilder::gray16(20, 12, ramp).tiled(16, 16))
            .build();
        assert_eq!(&data[..2], if order == ByteOrderType::LittleEndian { b"II" } else { b"MM" });

        let path = write_file(dir.path(), name, &data);
        let slide = load_levels(&path, &LoadOptions::default()).await.unwrap();
        decoded.push(materialized_u16(slide.levels[0].materialize().await.unwrap()));
    }

    assert_eq!(decoded[0], decoded[1]);
    assert_eq!(decoded[0][[11, 19]], ramp(19, 11));
}

#[tokio::test]
async fn test_big_endian_bigtiff_with_lzw_tiles() {
    let (width, height) = (40, 24);
    let data = TiffBuilder::new()
        .with_byte_order(ByteOrderType::BigEndian)
        .with_bigtiff(true)
        .page(
            PageBuilder::gray16(width, height, |x, y| (1000 + x + y * 40) as u16)
                .tiled(16, 16)
                .codec(Codec::Lzw),
        )
        .build();
    assert_eq!(&data[..4], &[b'M', b'M', 0, 43]);

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "big.tif", &data);
    let slide = load_levels(&path, &LoadOptions::default()).await.unwrap();
    assert!(slide.pyramid.header.is_bigtiff);

    let level = &slide.levels[0];
    assert_eq!(level.shape(), &[24, 40]);

    // Zero padding in the edge tiles is not part of the image
    let stats = level.stats().await.unwrap();
    assert_eq!(stats.count, 960);
    assert_eq!(stats.max, 1959.0);

    let values = materialized_u16(level.materialize().await.unwrap());
    assert_eq!(values[[0, 0]], 1000);
    assert_eq!(values[[17, 33]], 1000 + 33 + 17 * 40);
    assert_eq!(values[[23, 39]], 1959);
}

// =============================================================================
// Strips and compression
// =============================================================================

#[tokio::test]
async fn test_deflate_rgb_strips() {
    let data = TiffBuilder::new()
        .page(
            PageBuilder::rgb8(30, 20, |x, y| [x as u8, y as u8, (x + y) as u8])
                .strips(7)
                .codec(Codec::Deflate),
        )
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "strips.tif", &data);
    let slide = load_levels(&path, &LoadOptions::default()).await.unwrap();

    let level = &slide.levels[0];
    assert_eq!(level.shape(), &[20, 30, 3]);
    assert_eq!(level.dtype(), DType::U8);
    assert_eq!(level.channel_axis(), ChannelAxis::Samples);

    let PixelArray::U8(values) = level.materialize().await.unwrap() else {
        panic!("expected uint8 pixels");
    };
    assert_eq!(values[[0, 0, 0]], 0);
    assert_eq!(values[[19, 29, 0]], 29);
    assert_eq!(values[[19, 29, 1]], 19);
    assert_eq!(values[[13, 4, 2]], 17);

    // Green sample plane of the last (short) strip
    let PixelArray::U8(green) = level.channel(1).unwrap().materialize().await.unwrap() else {
        panic!("expected uint8 pixels");
    };
    assert_eq!(green.shape(), &[20, 30]);
    assert_eq!(green[[18, 0]], 18);
}

#[tokio::test]
async fn test_load_mem_matches_lazy_decode() {
    let data = TiffBuilder::new()
        .page(PageBuilder::gray16(32, 32, ramp).tiled(16, 16).codec(Codec::Deflate))
        .page(PageBuilder::gray16(16, 16, ramp).tiled(16, 16).reduced())
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "resident.tif", &data);

    let lazy = load_levels(&path, &LoadOptions::default()).await.unwrap();
    let resident = load_levels(
        &path,
        &LoadOptions {
            load_mem: true,
            ..LoadOptions::default()
        },
    )
    .await
    .unwrap();

    assert!(resident.levels.iter().all(|l| l.is_resident()));
    for (lazy, resident) in lazy.levels.iter().zip(&resident.levels) {
        assert_eq!(lazy.shape(), resident.shape());
        assert_eq!(lazy.stats().await.unwrap(), resident.stats().await.unwrap());
        assert_eq!(
            lazy.materialize().await.unwrap(),
            resident.materialize().await.unwrap()
        );
    }
}

// =============================================================================
// Detection
// =============================================================================

#[tokio::test]
async fn test_detects_perkinelmer_flavor() {
    let data = TiffBuilder::new()
        .page(
            PageBuilder::gray16(16, 16, ramp)
                .tiled(16, 16)
                .description(legacy_descriptor("DAPI", "0,0,255")),
        )
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "scan.qptiff", &data);
    let slide = load_levels(&path, &LoadOptions::default()).await.unwrap();

    assert_eq!(slide.format, SlideFormat::PerkinElmerQptiff);
    assert_eq!(slide.stem(), "scan");
    assert!(slide.base_pages()[0]
        .description
        .as_deref()
        .unwrap()
        .contains("<Name>DAPI</Name>"));
}

#[tokio::test]
async fn test_truncated_file_fails() {
    let data = TiffBuilder::new()
        .page(PageBuilder::gray16(16, 16, ramp).tiled(16, 16))
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "short.tif", &data[..6]);
    assert!(load_levels(&path, &LoadOptions::default()).await.is_err());
}
