//! Test utilities for integration tests.
//!
//! [`TiffBuilder`] writes small but structurally real TIFF and BigTIFF files:
//! tiled or stripped pages, optional LZW or Deflate compression, SubIFD
//! pyramids, descriptors and resolution tags. Files are written into
//! `tempfile` directories and ingested through the public API.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use weezl::{encode::Encoder as LzwEncoder, BitOrder};

// =============================================================================
// Tag data
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrderType {
    LittleEndian,
    BigEndian,
}

impl ByteOrderType {
    fn u16(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrderType::LittleEndian => value.to_le_bytes(),
            ByteOrderType::BigEndian => value.to_be_bytes(),
        }
    }

    fn u32(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrderType::LittleEndian => value.to_le_bytes(),
            ByteOrderType::BigEndian => value.to_be_bytes(),
        }
    }

    fn u64(self, value: u64) -> [u8; 8] {
        match self {
            ByteOrderType::LittleEndian => value.to_le_bytes(),
            ByteOrderType::BigEndian => value.to_be_bytes(),
        }
    }
}

/// A tag value as written to the file.
#[derive(Clone, Debug)]
pub enum TagData {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Rational(Vec<(u32, u32)>),
    Ascii(String),
    Undefined(Vec<u8>),
    /// Child IFD offsets; LONG in classic TIFF, LONG8 in BigTIFF
    Ifd(Vec<u64>),
}

impl TagData {
    fn field_type(&self, bigtiff: bool) -> u16 {
        match self {
            TagData::Short(_) => 3,
            TagData::Long(_) => 4,
            TagData::Long8(_) => 16,
            TagData::Rational(_) => 5,
            TagData::Ascii(_) => 2,
            TagData::Undefined(_) => 7,
            TagData::Ifd(_) if bigtiff => 16,
            TagData::Ifd(_) => 4,
        }
    }

    fn count(&self) -> u64 {
        match self {
            TagData::Short(v) => v.len() as u64,
            TagData::Long(v) => v.len() as u64,
            TagData::Long8(v) => v.len() as u64,
            TagData::Rational(v) => v.len() as u64,
            TagData::Ascii(s) => s.len() as u64 + 1,
            TagData::Undefined(v) => v.len() as u64,
            TagData::Ifd(v) => v.len() as u64,
        }
    }

    fn encode(&self, order: ByteOrderType, bigtiff: bool) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            TagData::Short(values) => values.iter().for_each(|v| out.extend(order.u16(*v))),
            TagData::Long(values) => values.iter().for_each(|v| out.extend(order.u32(*v))),
            TagData::Long8(values) => values.iter().for_each(|v| out.extend(order.u64(*v))),
            TagData::Rational(values) => values.iter().for_each(|(n, d)| {
                out.extend(order.u32(*n));
                out.extend(order.u32(*d));
            }),
            TagData::Ascii(text) => {
                out.extend(text.as_bytes());
                out.push(0);
            }
            TagData::Undefined(bytes) => out.extend(bytes),
            TagData::Ifd(values) if bigtiff => values.iter().for_each(|v| out.extend(order.u64(*v))),
            TagData::Ifd(values) => values.iter().for_each(|v| out.extend(order.u32(*v as u32))),
        }
        out
    }
}

// =============================================================================
// Pages
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    None,
    Lzw,
    Deflate,
}

impl Codec {
    fn code(self) -> u16 {
        match self {
            Codec::None => 1,
            Codec::Lzw => 5,
            Codec::Deflate => 8,
        }
    }
}

#[derive(Clone, Debug)]
enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

/// One image page, with optional reduced-resolution children.
#[derive(Clone, Debug)]
pub struct PageBuilder {
    width: u32,
    height: u32,
    samples_per_pixel: u16,
    samples: Samples,
    tile: Option<(u32, u32)>,
    rows_per_strip: Option<u32>,
    codec: Codec,
    description: Option<String>,
    resolution: Option<((u32, u32), (u32, u32), u16)>,
    reduced: bool,
    sub_pages: Vec<PageBuilder>,
    extra: Vec<(u16, TagData)>,
}

impl PageBuilder {
    fn new(width: u32, height: u32, samples_per_pixel: u16, samples: Samples) -> Self {
        PageBuilder {
            width,
            height,
            samples_per_pixel,
            samples,
            tile: None,
            rows_per_strip: None,
            codec: Codec::None,
            description: None,
            resolution: None,
            reduced: false,
            sub_pages: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Single-sample 16-bit page with pixel (x, y) = `f(x, y)`.
    pub fn gray16(width: u32, height: u32, f: impl Fn(u32, u32) -> u16) -> Self {
        let mut samples = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                samples.push(f(x, y));
            }
        }
        Self::new(width, height, 1, Samples::U16(samples))
    }

    /// Three-sample 8-bit page with pixel (x, y) = `f(x, y)`.
    pub fn rgb8(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 3]) -> Self {
        let mut samples = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                samples.extend(f(x, y));
            }
        }
        Self::new(width, height, 3, Samples::U8(samples))
    }

    pub fn tiled(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.tile = Some((tile_width, tile_height));
        self
    }

    pub fn strips(mut self, rows_per_strip: u32) -> Self {
        self.tile = None;
        self.rows_per_strip = Some(rows_per_strip);
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// XResolution, YResolution (pixels per unit) and ResolutionUnit.
    pub fn resolution(mut self, x: (u32, u32), y: (u32, u32), unit: u16) -> Self {
        self.resolution = Some((x, y, unit));
        self
    }

    /// Mark as a reduced-resolution image (NewSubfileType bit 0).
    pub fn reduced(mut self) -> Self {
        self.reduced = true;
        self
    }

    pub fn sub_page(mut self, page: PageBuilder) -> Self {
        self.sub_pages.push(page);
        self
    }

    pub fn tag(mut self, tag: u16, data: TagData) -> Self {
        self.extra.push((tag, data));
        self
    }

    fn bits_per_sample(&self) -> u16 {
        match self.samples {
            Samples::U8(_) => 8,
            Samples::U16(_) => 16,
        }
    }

    fn push_sample(&self, out: &mut Vec<u8>, order: ByteOrderType, index: Option<usize>) {
        match &self.samples {
            Samples::U8(values) => out.push(index.map(|i| values[i]).unwrap_or(0)),
            Samples::U16(values) => out.extend(order.u16(index.map(|i| values[i]).unwrap_or(0))),
        }
    }

    /// Uncompressed chunk bytes in file order; tiles are zero padded.
    fn raw_chunks(&self, order: ByteOrderType) -> Vec<Vec<u8>> {
        let spp = self.samples_per_pixel as usize;
        let width = self.width as usize;
        let sample_index = |x: u32, y: u32, s: usize| {
            if x < self.width && y < self.height {
                Some((y as usize * width + x as usize) * spp + s)
            } else {
                None
            }
        };

        let mut chunks = Vec::new();
        match self.tile {
            Some((tile_width, tile_height)) => {
                for ty in 0..self.height.div_ceil(tile_height) {
                    for tx in 0..self.width.div_ceil(tile_width) {
                        let mut chunk = Vec::new();
                        for row in 0..tile_height {
                            for col in 0..tile_width {
                                let (x, y) = (tx * tile_width + col, ty * tile_height + row);
                                for s in 0..spp {
                                    self.push_sample(&mut chunk, order, sample_index(x, y, s));
                                }
                            }
                        }
                        chunks.push(chunk);
                    }
                }
            }
            None => {
                let rows = self.rows_per_strip.unwrap_or(self.height).max(1);
                for strip in 0..self.height.div_ceil(rows) {
                    let mut chunk = Vec::new();
                    for y in strip * rows..((strip + 1) * rows).min(self.height) {
                        for x in 0..self.width {
                            for s in 0..spp {
                                self.push_sample(&mut chunk, order, sample_index(x, y, s));
                            }
                        }
                    }
                    chunks.push(chunk);
                }
            }
        }
        chunks
    }

    fn compressed_chunks(&self, order: ByteOrderType) -> Vec<Vec<u8>> {
        self.raw_chunks(order)
            .into_iter()
            .map(|raw| match self.codec {
                Codec::None => raw,
                Codec::Lzw => LzwEncoder::with_tiff_size_switch(BitOrder::Msb, 8)
                    .encode(&raw)
                    .unwrap(),
                Codec::Deflate => {
                    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                    encoder.write_all(&raw).unwrap();
                    encoder.finish().unwrap()
                }
            })
            .collect()
    }

    /// Tag entries; SubIFD offsets are placeholders until layout.
    fn entries(&self, offsets: &[u64], byte_counts: &[u64], bigtiff: bool) -> Vec<(u16, TagData)> {
        let spp = self.samples_per_pixel;
        let offsets_data = |values: &[u64]| {
            if bigtiff {
                TagData::Long8(values.to_vec())
            } else {
                TagData::Long(values.iter().map(|v| *v as u32).collect())
            }
        };

        let mut entries = vec![
            (254, TagData::Long(vec![u32::from(self.reduced)])),
            (256, TagData::Long(vec![self.width])),
            (257, TagData::Long(vec![self.height])),
            (258, TagData::Short(vec![self.bits_per_sample(); spp as usize])),
            (259, TagData::Short(vec![self.codec.code()])),
            (262, TagData::Short(vec![if spp == 3 { 2 } else { 1 }])),
            (277, TagData::Short(vec![spp])),
            (284, TagData::Short(vec![1])),
            (339, TagData::Short(vec![1; spp as usize])),
        ];

        match self.tile {
            Some((tile_width, tile_height)) => {
                entries.push((322, TagData::Long(vec![tile_width])));
                entries.push((323, TagData::Long(vec![tile_height])));
                entries.push((324, offsets_data(offsets)));
                entries.push((325, offsets_data(byte_counts)));
            }
            None => {
                let rows = self.rows_per_strip.unwrap_or(self.height);
                entries.push((273, offsets_data(offsets)));
                entries.push((278, TagData::Long(vec![rows])));
                entries.push((279, offsets_data(byte_counts)));
            }
        }

        if let Some(description) = &self.description {
            entries.push((270, TagData::Ascii(description.clone())));
        }
        if let Some((x, y, unit)) = self.resolution {
            entries.push((282, TagData::Rational(vec![x])));
            entries.push((283, TagData::Rational(vec![y])));
            entries.push((296, TagData::Short(vec![unit])));
        }
        if !self.sub_pages.is_empty() {
            entries.push((330, TagData::Ifd(vec![0; self.sub_pages.len()])));
        }
        entries.extend(self.extra.iter().cloned());

        entries.sort_by_key(|(tag, _)| *tag);
        entries
    }
}

// =============================================================================
// File
// =============================================================================

/// Builder for TIFF and BigTIFF files.
///
/// Main pages form the IFD chain in insertion order; each page's sub-pages
/// are reachable only through its SubIFDs tag.
pub struct TiffBuilder {
    byte_order: ByteOrderType,
    bigtiff: bool,
    pages: Vec<PageBuilder>,
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TiffBuilder {
    pub fn new() -> Self {
        TiffBuilder {
            byte_order: ByteOrderType::LittleEndian,
            bigtiff: false,
            pages: Vec::new(),
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrderType) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_bigtiff(mut self, bigtiff: bool) -> Self {
        self.bigtiff = bigtiff;
        self
    }

    pub fn page(mut self, page: PageBuilder) -> Self {
        self.pages.push(page);
        self
    }

    fn inline_size(&self) -> usize {
        if self.bigtiff {
            8
        } else {
            4
        }
    }

    fn ifd_size(&self, entry_count: usize) -> usize {
        if self.bigtiff {
            8 + entry_count * 20 + 8
        } else {
            2 + entry_count * 12 + 4
        }
    }

    fn block_size(&self, entries: &[(u16, TagData)]) -> usize {
        let external: usize = entries
            .iter()
            .map(|(_, data)| data.encode(self.byte_order, self.bigtiff).len())
            .filter(|len| *len > self.inline_size())
            .map(|len| len + len % 2)
            .sum();
        self.ifd_size(entries.len()) + external
    }

    pub fn build(self) -> Vec<u8> {
        let order = self.byte_order;
        let mut out = Vec::new();

        // Header with a placeholder first-IFD offset
        match order {
            ByteOrderType::LittleEndian => out.extend(b"II"),
            ByteOrderType::BigEndian => out.extend(b"MM"),
        }
        if self.bigtiff {
            out.extend(order.u16(43));
            out.extend(order.u16(8));
            out.extend(order.u16(0));
            out.extend(order.u64(0));
        } else {
            out.extend(order.u16(42));
            out.extend(order.u32(0));
        }

        // Main pages in chain order, each followed by its sub-pages
        let mut flat: Vec<(&PageBuilder, Option<usize>)> = Vec::new();
        for page in &self.pages {
            let parent = flat.len();
            flat.push((page, None));
            for sub in &page.sub_pages {
                flat.push((sub, Some(parent)));
            }
        }

        // Pixel data first so every chunk offset is known
        let mut entries: Vec<Vec<(u16, TagData)>> = Vec::with_capacity(flat.len());
        for (page, _) in &flat {
            let mut offsets = Vec::new();
            let mut byte_counts = Vec::new();
            for chunk in page.compressed_chunks(order) {
                if out.len() % 2 == 1 {
                    out.push(0);
                }
                offsets.push(out.len() as u64);
                byte_counts.push(chunk.len() as u64);
                out.extend(chunk);
            }
            entries.push(page.entries(&offsets, &byte_counts, self.bigtiff));
        }

        if out.len() % 2 == 1 {
            out.push(0);
        }
        let mut positions = Vec::with_capacity(flat.len());
        let mut position = out.len() as u64;
        for page_entries in &entries {
            positions.push(position);
            position += self.block_size(page_entries) as u64;
        }

        // SubIFD offsets of each parent
        for (index, page_entries) in entries.iter_mut().enumerate() {
            let children: Vec<u64> = flat
                .iter()
                .enumerate()
                .filter(|(_, (_, parent))| *parent == Some(index))
                .map(|(child, _)| positions[child])
                .collect();
            if children.is_empty() {
                continue;
            }
            for (tag, data) in page_entries.iter_mut() {
                if *tag == 330 {
                    *data = TagData::Ifd(children.clone());
                }
            }
        }

        let main: Vec<usize> = flat
            .iter()
            .enumerate()
            .filter(|(_, (_, parent))| parent.is_none())
            .map(|(index, _)| index)
            .collect();
        let mut next = vec![0u64; flat.len()];
        for pair in main.windows(2) {
            next[pair[0]] = positions[pair[1]];
        }

        for (index, page_entries) in entries.iter().enumerate() {
            assert_eq!(out.len() as u64, positions[index]);
            self.write_ifd(&mut out, page_entries, next[index]);
        }

        if let Some(first) = main.first() {
            let first = positions[*first];
            if self.bigtiff {
                out[8..16].copy_from_slice(&order.u64(first));
            } else {
                out[4..8].copy_from_slice(&order.u32(first as u32));
            }
        }
        out
    }

    fn write_ifd(&self, out: &mut Vec<u8>, entries: &[(u16, TagData)], next: u64) {
        let order = self.byte_order;
        let start = out.len();
        let mut external_offset = (start + self.ifd_size(entries.len())) as u64;
        let mut external = Vec::new();

        if self.bigtiff {
            out.extend(order.u64(entries.len() as u64));
        } else {
            out.extend(order.u16(entries.len() as u16));
        }

        for (tag, data) in entries {
            let payload = data.encode(order, self.bigtiff);
            out.extend(order.u16(*tag));
            out.extend(order.u16(data.field_type(self.bigtiff)));
            if self.bigtiff {
                out.extend(order.u64(data.count()));
            } else {
                out.extend(order.u32(data.count() as u32));
            }

            if payload.len() <= self.inline_size() {
                let mut field = payload;
                field.resize(self.inline_size(), 0);
                out.extend(field);
            } else {
                if self.bigtiff {
                    out.extend(order.u64(external_offset));
                } else {
                    out.extend(order.u32(external_offset as u32));
                }
                let padded = payload.len() + payload.len() % 2;
                external.extend(payload);
                if external.len() % 2 == 1 {
                    external.push(0);
                }
                external_offset += padded as u64;
            }
        }

        if self.bigtiff {
            out.extend(order.u64(next));
        } else {
            out.extend(order.u32(next as u32));
        }
        out.extend(external);
    }
}

// =============================================================================
// Files and descriptors
// =============================================================================

/// Write `data` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Descriptor of the older per-page filter layout.
pub fn legacy_descriptor(name: &str, color: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<PerkinElmer-QPI-ImageDescription>
  <DescriptionVersion>2</DescriptionVersion>
  <ImageType>FullResolution</ImageType>
  <Responsivity><Filter><Name>{}</Name><Response>1</Response></Filter></Responsivity>
  <Color>{}</Color>
</PerkinElmer-QPI-ImageDescription>"#,
        name, color
    )
}

/// Descriptor of the spectral layout; the first page carries the library.
pub fn spectral_descriptor(name: &str, color: &str, library: Option<&str>) -> String {
    let profile = library
        .map(|json| format!("<ScanProfile><LibraryAsJSON>{}</LibraryAsJSON></ScanProfile>", json))
        .unwrap_or_default();
    format!(
        r#"<PerkinElmer-QPI-ImageDescription>
  <DescriptionVersion>4</DescriptionVersion>
  <Responsivity><Band><Name>{}</Name></Band></Responsivity>
  <Color>{}</Color>
  {}
</PerkinElmer-QPI-ImageDescription>"#,
        name, color, profile
    )
}

/// Single-page channel list with packed colors.
pub fn channel_list_descriptor(channels: &[(&str, u32)]) -> String {
    let entries: String = channels
        .iter()
        .enumerate()
        .map(|(id, (name, rgb))| format!(r#"<channel id="{}" name="{}" rgb="{}"/>"#, id, name, rgb))
        .collect();
    format!("<OME><Image><channels>{}</channels></Image></OME>", entries)
}
