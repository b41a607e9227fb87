use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use super::model::PixelRect;
use crate::studies::model::Finding;

pub const ANNOTATED_JPEG_QUALITY: u8 = 90;
pub const CAPTION_WRAP_COLUMNS: usize = 50;
pub const DEFAULT_FONT_SIZE: f32 = 20.0;

const CAPTION_MARGIN: i32 = 10;
const BOX_THICKNESS: u32 = 3;
const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const OUTLINE_OFFSETS: [(i32, i32); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

#[derive(Debug, thiserror::Error)]
pub enum DrawingError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),
    #[error("cannot load caption font {path}: {reason}")]
    Font { path: String, reason: String },
}

/// Burns findings and the caption into a copy of an image.
pub struct Annotator {
    font: Option<FontVec>,
    font_size: f32,
}

impl Annotator {
    pub fn new(font: Option<FontVec>, font_size: f32) -> Self {
        Self { font, font_size }
    }

    /// Annotator that draws boxes only.
    pub fn without_font() -> Self {
        Self::new(None, DEFAULT_FONT_SIZE)
    }

    pub fn from_font_file(path: impl AsRef<Path>, font_size: f32) -> Result<Self, DrawingError> {
        let path = path.as_ref();
        let font_err = |reason: String| DrawingError::Font {
            path: path.display().to_string(),
            reason,
        };
        let data = std::fs::read(path).map_err(|e| font_err(e.to_string()))?;
        let font = FontVec::try_from_vec(data).map_err(|e| font_err(e.to_string()))?;
        Ok(Self::new(Some(font), font_size))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn annotate(
        &self,
        image_bytes: &[u8],
        caption: &str,
        findings: &[Finding],
    ) -> Result<Vec<u8>, DrawingError> {
        let mut img = image::load_from_memory(image_bytes)
            .map_err(DrawingError::Decode)?
            .to_rgb8();
        let (width, height) = img.dimensions();

        for rect in findings
            .iter()
            .filter_map(Finding::bounding_box)
            .filter_map(|bbox| bbox.to_pixels(width, height))
        {
            draw_box(&mut img, rect);
        }

        if let Some(font) = &self.font {
            self.draw_caption(&mut img, font, caption);
        }

        let mut out = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut out, ANNOTATED_JPEG_QUALITY);
            encoder.encode_image(&img).map_err(DrawingError::Encode)?;
        }
        Ok(out)
    }

    /// Wrapped caption anchored bottom-left, outlined for contrast on any background.
    fn draw_caption(&self, img: &mut RgbImage, font: &FontVec, caption: &str) {
        let lines = wrap_caption(caption, CAPTION_WRAP_COLUMNS);
        if lines.is_empty() {
            return;
        }

        let scale = PxScale::from(self.font_size);
        let line_height = (self.font_size * 1.2).ceil() as i32;
        let block_height = line_height.saturating_mul(lines.len() as i32);
        let x = CAPTION_MARGIN;
        let top = (img.height() as i32)
            .saturating_sub(block_height)
            .saturating_sub(CAPTION_MARGIN);

        for (i, line) in lines.iter().enumerate() {
            let y = top.saturating_add((i as i32).saturating_mul(line_height));
            for (dx, dy) in OUTLINE_OFFSETS {
                draw_text_mut(img, OUTLINE_COLOR, x + dx, y + dy, scale, font, line);
            }
            draw_text_mut(img, TEXT_COLOR, x, y, scale, font, line);
        }
    }
}

fn draw_box(img: &mut RgbImage, rect: PixelRect) {
    for t in 0..BOX_THICKNESS {
        let inner_w = rect.width().saturating_sub(2 * t);
        let inner_h = rect.height().saturating_sub(2 * t);
        if inner_w == 0 || inner_h == 0 {
            break;
        }
        let r = Rect::at((rect.left + t) as i32, (rect.top + t) as i32).of_size(inner_w, inner_h);
        draw_hollow_rect_mut(img, r, BOX_COLOR);
    }
}

/// Greedy word wrap at `width` columns. Words longer than a line are split
/// across lines, filling the current line first.
pub fn wrap_caption(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut rest = word;
        while !rest.is_empty() {
            let used = current.chars().count();
            let space = if current.is_empty() {
                width
            } else {
                width.saturating_sub(used + 1)
            };
            let len = rest.chars().count();

            if len <= space {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(rest);
                break;
            }

            if len > width && space > 0 {
                let split = rest
                    .char_indices()
                    .nth(space)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&rest[..split]);
                rest = &rest[split..];
            }
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines
}
