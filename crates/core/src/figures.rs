//! Figure regions: decode the images placed on each page, drop blank ones,
//! merge nearby boxes and rasterize the padded region of every merged box.

use crate::error::{IngestError, Result};
use crate::geometry::{merge_overlapping, BBox};
use crate::layout::{ColorModel, ImageData, PageLayout, PdfLayout};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbImage, RgbaImage};
use std::fs;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Points to pixels. Fixed so crops are reproducible across runs.
pub const RENDER_SCALE: f32 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFigure {
    pub raster_png: Vec<u8>,
    /// Merged region before padding.
    pub bbox: BBox,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageFigures {
    pub page: u32,
    pub figures: Vec<ExtractedFigure>,
}

/// Rasterizes a clip of a page at `scale` pixels per point.
pub trait PageRenderer: Send + Sync {
    fn render(&self, page: &PageLayout, clip: &BBox, scale: f32) -> Result<DynamicImage>;
}

/// Composites the page's placed images onto a white canvas. Text and vector
/// graphics are not painted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacedImageRenderer;

impl PageRenderer for PlacedImageRenderer {
    fn render(&self, page: &PageLayout, clip: &BBox, scale: f32) -> Result<DynamicImage> {
        let width = pixels(clip.width(), scale);
        let height = pixels(clip.height(), scale);
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        for placed in page.images.iter().filter(|placed| placed.bbox.intersects(clip)) {
            let decoded = match decode_image(&placed.data) {
                Ok(decoded) => decoded,
                Err(error) => {
                    debug!(name = %placed.name, %error, "placed image not composited");
                    continue;
                }
            };
            let resized = imageops::resize(
                &decoded.to_rgba8(),
                pixels(placed.bbox.width(), scale),
                pixels(placed.bbox.height(), scale),
                FilterType::Triangle,
            );
            let x = ((placed.bbox.x1 - clip.x1) * scale).round() as i64;
            let y = ((placed.bbox.y1 - clip.y1) * scale).round() as i64;
            imageops::overlay(&mut canvas, &resized, x, y);
        }

        Ok(DynamicImage::ImageRgba8(canvas))
    }
}

fn pixels(points: f32, scale: f32) -> u32 {
    ((points * scale).round() as u32).max(1)
}

pub struct FigureExtractor<R = PlacedImageRenderer> {
    renderer: R,
    individual_dir: Option<PathBuf>,
    merged_dir: Option<PathBuf>,
}

impl Default for FigureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FigureExtractor {
    pub fn new() -> Self {
        Self::with_renderer(PlacedImageRenderer)
    }
}

impl<R: PageRenderer> FigureExtractor<R> {
    pub fn with_renderer(renderer: R) -> Self {
        Self {
            renderer,
            individual_dir: None,
            merged_dir: None,
        }
    }

    /// Persist decoded page images and merged crops as PNG files.
    pub fn with_artifact_dirs(
        mut self,
        individual_dir: Option<PathBuf>,
        merged_dir: Option<PathBuf>,
    ) -> Self {
        self.individual_dir = individual_dir;
        self.merged_dir = merged_dir;
        self
    }

    /// Returns one entry per page in `pages` that produced at least one figure.
    pub fn extract_figures(
        &self,
        layout: &PdfLayout,
        pages: impl RangeBounds<u32>,
        merge_threshold: f32,
        padding: f32,
    ) -> Result<Vec<PageFigures>> {
        let stem = layout.stem();
        let mut result = Vec::new();

        for page in layout.pages.iter().filter(|page| pages.contains(&page.index)) {
            let figures = self.page_figures(&stem, page, merge_threshold, padding)?;
            if !figures.is_empty() {
                result.push(PageFigures {
                    page: page.index,
                    figures,
                });
            }
        }

        info!(
            path = %layout.path.display(),
            pages = result.len(),
            figures = result.iter().map(|page| page.figures.len()).sum::<usize>(),
            "figures extracted"
        );
        Ok(result)
    }

    fn page_figures(
        &self,
        stem: &str,
        page: &PageLayout,
        merge_threshold: f32,
        padding: f32,
    ) -> Result<Vec<ExtractedFigure>> {
        let page_no = page.index + 1;
        let mut boxes = Vec::new();

        for (position, placed) in page.images.iter().enumerate() {
            let decoded = match decode_image(&placed.data) {
                Ok(decoded) => decoded,
                Err(error) => {
                    warn!(page = page.index, name = %placed.name, %error, "skipping undecodable image");
                    continue;
                }
            };
            if !is_valid_image(&decoded) {
                debug!(page = page.index, name = %placed.name, "skipping single-colour image");
                continue;
            }
            if placed.bbox.is_empty() {
                continue;
            }

            if let Some(dir) = &self.individual_dir {
                let file = format!("{stem}_page{page_no}_img{}.png", position + 1);
                save_png(dir, &file, &encode_png(&decoded)?)?;
            }
            boxes.push(placed.bbox);
        }

        let bounds = page.bounds();
        let mut figures = Vec::new();
        for (position, bbox) in merge_overlapping(&boxes, merge_threshold).into_iter().enumerate() {
            let clip = bbox.pad(padding).clamp(&bounds);
            if clip.is_empty() {
                continue;
            }

            let raster = self.renderer.render(page, &clip, RENDER_SCALE)?;
            let raster_png = encode_png(&raster)?;
            if let Some(dir) = &self.merged_dir {
                let file = format!("{stem}_page{page_no}_box{}.png", position + 1);
                save_png(dir, &file, &raster_png)?;
            }
            figures.push(ExtractedFigure { raster_png, bbox });
        }

        Ok(figures)
    }
}

/// An image is worth keeping when its pixels do not all share one colour.
pub fn is_valid_image(image: &DynamicImage) -> bool {
    let rgba = image.to_rgba8();
    let mut pixels = rgba.pixels();
    match pixels.next() {
        Some(first) => pixels.any(|pixel| pixel != first),
        None => false,
    }
}

pub fn decode_image(data: &ImageData) -> Result<DynamicImage> {
    match data {
        ImageData::Encoded(bytes) => Ok(image::load_from_memory(bytes)?),
        ImageData::Samples {
            width,
            height,
            bits_per_component,
            color,
            data,
        } => decode_samples(*width, *height, *bits_per_component, color, data),
        ImageData::Unsupported(reason) => Err(IngestError::Extraction(format!(
            "unsupported image: {reason}"
        ))),
    }
}

fn decode_samples(
    width: u32,
    height: u32,
    bits: u8,
    color: &ColorModel,
    data: &[u8],
) -> Result<DynamicImage> {
    if width == 0 || height == 0 {
        return Err(IngestError::Extraction("image has no pixels".to_string()));
    }
    if !matches!(bits, 1 | 2 | 4 | 8 | 16) {
        return Err(IngestError::Extraction(format!(
            "unsupported bits per component: {bits}"
        )));
    }

    let components = color.components();
    let samples_per_row = width as usize * components;
    let row_bytes = (samples_per_row * bits as usize).div_ceil(8);
    if data.len() < row_bytes * height as usize {
        return Err(IngestError::Extraction(format!(
            "image data truncated: {} bytes for {width}x{height}",
            data.len()
        )));
    }

    let max = ((1u32 << bits.min(8)) - 1) as u16;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    let mut pixel = Vec::with_capacity(components);

    for row in data.chunks_exact(row_bytes).take(height as usize) {
        for column in 0..width as usize {
            pixel.clear();
            for component in 0..components {
                pixel.push(sample(row, column * components + component, bits));
            }
            let value = match color {
                ColorModel::Indexed { base, palette } => palette_color(base, palette, pixel[0]),
                _ => {
                    let scaled: Vec<u8> = pixel
                        .iter()
                        .map(|value| (*value as u32 * 255 / max as u32) as u8)
                        .collect();
                    to_rgb(color, &scaled)
                }
            };
            rgb.extend_from_slice(&value);
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| IngestError::Extraction("image buffer size mismatch".to_string()))
}

/// Reads sample `index` of a packed row. 16-bit samples keep their high byte.
fn sample(row: &[u8], index: usize, bits: u8) -> u16 {
    match bits {
        8 => row[index] as u16,
        16 => row[index * 2] as u16,
        _ => {
            let offset = index * bits as usize;
            let byte = row[offset / 8];
            let shift = 8 - bits as usize - offset % 8;
            ((byte >> shift) & ((1u8 << bits) - 1)) as u16
        }
    }
}

fn palette_color(base: &ColorModel, palette: &[u8], index: u16) -> [u8; 3] {
    let width = base.components();
    let start = index as usize * width;
    let entry: Vec<u8> = (start..start + width)
        .map(|position| palette.get(position).copied().unwrap_or(0))
        .collect();
    to_rgb(base, &entry)
}

fn to_rgb(color: &ColorModel, components: &[u8]) -> [u8; 3] {
    match (color, components) {
        (ColorModel::Rgb, [r, g, b, ..]) => [*r, *g, *b],
        (ColorModel::Cmyk, [c, m, y, k, ..]) => {
            let channel = |value: u8| ((255 - value as u32) * (255 - *k as u32) / 255) as u8;
            [channel(*c), channel(*m), channel(*y)]
        }
        (_, [gray, ..]) => [*gray, *gray, *gray],
        (_, []) => [0, 0, 0],
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

fn save_png(dir: &Path, file: &str, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(file), bytes)?;
    Ok(())
}
