//! Bounding-box overlays drawn onto the source image.

use ab_glyph::{FontRef, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::io::{Cursor, Read};
use std::time::Duration;

use crate::db::Detection;
use crate::labels::label_color;

/// Outline thickness in pixels.
pub const STROKE: i32 = 3;

const TAG_SCALE: f32 = 14.0;
const TAG_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

static FONT_BYTES: &[u8] = include_bytes!("../fonts/DejaVuSansMono.ttf");

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Read the raw bytes behind an index path: `http(s)://` URLs are fetched,
/// anything else is read from the local filesystem.
pub fn fetch_image_bytes(path: &str) -> Result<Vec<u8>> {
    if path.starts_with("http://") || path.starts_with("https://") {
        let agent = ureq::AgentBuilder::new().timeout(FETCH_TIMEOUT).build();
        let response = agent
            .get(path)
            .call()
            .map_err(|e| anyhow!("GET {} failed: {}", path, e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .with_context(|| format!("read body of {}", path))?;
        if bytes.is_empty() {
            return Err(anyhow!("empty response from {}", path));
        }
        Ok(bytes)
    } else {
        std::fs::read(path).with_context(|| format!("read {}", path))
    }
}

/// Decode `bytes`, outline and tag every detection, and encode as PNG.
pub fn render_png<'a, I>(bytes: &[u8], detections: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Detection>,
{
    let mut canvas = image::load_from_memory(bytes)
        .context("decode image")?
        .into_rgb8();
    let font = tag_font()?;
    let drawn = draw_boxes(&mut canvas, &font, detections);
    tracing::debug!(drawn, "Drew detection overlay");
    encode_png(canvas)
}

/// Font used for the `"{n}: {label} ({conf})"` box tags.
pub fn tag_font() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(FONT_BYTES).map_err(|e| anyhow!("load tag font: {}", e))
}

/// Outline each box in its label color and write its tag in white just
/// inside the top-left corner. Returns how many boxes were drawn.
pub fn draw_boxes<'a, I>(canvas: &mut RgbImage, font: &FontRef<'_>, detections: I) -> usize
where
    I: IntoIterator<Item = &'a Detection>,
{
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;

    let mut drawn = 0;
    for detection in detections {
        let (x0, y0, x1, y1) = detection.bbox.to_pixels(width, height);
        let (x0, x1) = (x0.min(x1).round() as i32, x0.max(x1).round() as i32);
        let (y0, y1) = (y0.min(y1).round() as i32, y0.max(y1).round() as i32);
        let (x0, x1) = (x0.clamp(0, max_x), x1.clamp(0, max_x));
        let (y0, y1) = (y0.clamp(0, max_y), y1.clamp(0, max_y));

        let color = Rgb(label_color(&detection.label));
        for inset in 0..STROKE {
            let (w, h) = (x1 - x0 - 2 * inset + 1, y1 - y0 - 2 * inset + 1);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x0 + inset, y0 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let tag = format!("{}: {} ({:.2})", detection.index, detection.label, detection.confidence);
        draw_text_mut(canvas, TAG_COLOR, x0 + 2, y0 + 1, PxScale::from(TAG_SCALE), font, &tag);
        drawn += 1;
    }
    drawn
}

fn encode_png(canvas: RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    canvas
        .write_to(&mut buffer, ImageFormat::Png)
        .context("encode png")?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BoundingBox;

    fn detection(label: &str) -> Detection {
        Detection {
            index: 1,
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox { center_x: 0.5, center_y: 0.5, width: 0.5, height: 0.5 },
        }
    }

    #[test]
    fn test_draws_outline_only() {
        let font = tag_font().unwrap();
        let mut canvas = RgbImage::new(100, 100);
        let cat = detection("cat");
        assert_eq!(draw_boxes(&mut canvas, &font, [&cat]), 1);

        let color = Rgb(label_color("cat"));
        assert_eq!(*canvas.get_pixel(25, 50), color);
        assert_eq!(*canvas.get_pixel(27, 50), color);
        assert_eq!(*canvas.get_pixel(28, 50), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(50, 50), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(75, 75), color);
    }

    #[test]
    fn test_writes_tag_inside_top_left_corner() {
        let font = tag_font().unwrap();
        let mut canvas = RgbImage::new(200, 200);
        let cat = detection("cat");
        draw_boxes(&mut canvas, &font, [&cat]);

        // Box spans 50..=150; the tag starts at (52, 51).
        let is_text = |p: &Rgb<u8>| p[0] == p[1] && p[1] == p[2] && p[0] > 128;
        let text_pixels = (53..148)
            .flat_map(|x| (53..80).map(move |y| (x, y)))
            .filter(|&(x, y)| is_text(canvas.get_pixel(x, y)))
            .count();
        assert!(text_pixels > 20, "only {text_pixels} tag pixels");
        assert_eq!(*canvas.get_pixel(100, 120), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_boxes_outside_canvas_are_clamped() {
        let font = tag_font().unwrap();
        let mut canvas = RgbImage::new(10, 10);
        let mut wide = detection("dog");
        wide.bbox = BoundingBox { center_x: 0.5, center_y: 0.5, width: 4.0, height: 4.0 };
        assert_eq!(draw_boxes(&mut canvas, &font, [&wide]), 1);
        assert_eq!(*canvas.get_pixel(0, 0), Rgb(label_color("dog")));
        assert_eq!(*canvas.get_pixel(0, 9), Rgb(label_color("dog")));
    }

    #[test]
    fn test_render_png_round_trips_dimensions() {
        let source = encode_png(RgbImage::new(32, 16)).unwrap();
        let cat = detection("cat");
        let png = render_png(&source, [&cat]).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn test_missing_local_file_is_an_error() {
        assert!(fetch_image_bytes("/nonexistent/yfcc/image.jpg").is_err());
    }
}
