//! Frame annotation primitives.
//!
//! Draws directly into `RgbImage` buffers: bounding-box outlines, center
//! dots, and the small "ID: n" track labels with a 5x7 bitmap glyph set.
//! Labels get a black backing plate so they stay readable over any scene.

use image::{Rgb, RgbImage};

/// Box / label stroke color (green, matching the detection overlays).
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Label text color.
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Label plate color.
pub const PLATE_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Center marker color.
pub const DOT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// Integer upscale applied to the 5x7 glyphs.
const GLYPH_SCALE: u32 = 2;

/// 5x7 glyph rows, one bit per column (MSB = leftmost of 5).
fn glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        ':' => [0x00, 0x04, 0x04, 0x00, 0x04, 0x04, 0x00],
        _ => [0; 7], // unknown characters render as a space
    }
}

fn put_pixel_checked(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Draw a rectangle outline with the given stroke thickness.
pub fn draw_rect(image: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, thickness: i64) {
    for t in 0..thickness {
        for x in x1..=x2 {
            put_pixel_checked(image, x, y1 + t, BOX_COLOR);
            put_pixel_checked(image, x, y2 - t, BOX_COLOR);
        }
        for y in y1..=y2 {
            put_pixel_checked(image, x1 + t, y, BOX_COLOR);
            put_pixel_checked(image, x2 - t, y, BOX_COLOR);
        }
    }
}

/// Draw a filled circular dot.
pub fn draw_dot(image: &mut RgbImage, cx: i64, cy: i64, radius: i64) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_checked(image, cx + dx, cy + dy, DOT_COLOR);
            }
        }
    }
}

/// Pixel width of a rendered label.
pub fn label_width(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars * (GLYPH_WIDTH + 1) * GLYPH_SCALE
}

/// Pixel height of a rendered label.
pub fn label_height() -> u32 {
    GLYPH_HEIGHT * GLYPH_SCALE
}

/// Render `text` at `(x, y)` (top-left) with a backing plate.
pub fn draw_label(image: &mut RgbImage, x: i64, y: i64, text: &str) {
    let width = label_width(text) as i64;
    let height = label_height() as i64;

    // Backing plate with 2px margin
    for py in (y - 2)..(y + height + 2) {
        for px in (x - 2)..(x + width + 2) {
            put_pixel_checked(image, px, py, PLATE_COLOR);
        }
    }

    let mut pen_x = x;
    for c in text.chars() {
        let rows = glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) != 0 {
                    for sy in 0..GLYPH_SCALE {
                        for sx in 0..GLYPH_SCALE {
                            put_pixel_checked(
                                image,
                                pen_x + (col * GLYPH_SCALE + sx) as i64,
                                y + (row as u32 * GLYPH_SCALE + sy) as i64,
                                TEXT_COLOR,
                            );
                        }
                    }
                }
            }
        }
        pen_x += ((GLYPH_WIDTH + 1) * GLYPH_SCALE) as i64;
    }
}

/// Draw one tracked detection: box outline, "ID: n" label above the box,
/// and a center dot.
pub fn draw_tracked_box(image: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, track_id: u32) {
    let (x1, y1, x2, y2) = (x1 as i64, y1 as i64, x2 as i64, y2 as i64);

    draw_rect(image, x1, y1, x2, y2, 2);

    let text = format!("ID: {}", track_id);
    let label_y = y1 - label_height() as i64 - 4;
    draw_label(image, x1, label_y.max(0), &text);

    draw_dot(image, (x1 + x2) / 2, (y1 + y2) / 2, 4);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_stays_in_bounds() {
        let mut image = RgbImage::new(32, 32);
        // Partially off-screen rectangle must not panic
        draw_rect(&mut image, -10, -10, 40, 40, 2);
        assert_eq!(*image.get_pixel(0, 0), BOX_COLOR);
    }

    #[test]
    fn test_dot_fills_center() {
        let mut image = RgbImage::new(32, 32);
        draw_dot(&mut image, 16, 16, 3);
        assert_eq!(*image.get_pixel(16, 16), DOT_COLOR);
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_renders_text_pixels() {
        let mut image = RgbImage::new(128, 32);
        draw_label(&mut image, 4, 4, "ID: 7");
        let lit = image
            .pixels()
            .filter(|p| **p == TEXT_COLOR)
            .count();
        assert!(lit > 0, "label should light up text pixels");
    }

    #[test]
    fn test_tracked_box_near_top_edge_keeps_label_visible() {
        let mut image = RgbImage::new(64, 64);
        draw_tracked_box(&mut image, 5.0, 2.0, 40.0, 40.0, 12);
        // Label is clamped to y=0 rather than clipped away entirely
        let lit = image.pixels().filter(|p| **p == TEXT_COLOR).count();
        assert!(lit > 0);
    }
}
