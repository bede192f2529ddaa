//! Box and label overlay for annotated evidence images.
//!
//! Labels are rendered with a small built-in 5x7 bitmap font (letters are
//! drawn upper-case) so annotation has no font file to ship.

use image::{Rgb, RgbImage};

use crate::detect::{Detection, DetectionResult};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const TAG_PAD: u32 = 2;

/// Draw every detection at or above `min_confidence` onto a copy of `image`.
pub fn annotate(image: &RgbImage, result: &DetectionResult, min_confidence: f32) -> RgbImage {
    let mut canvas = image.clone();
    let scale = (canvas.height() / 240).max(1);
    for detection in result.iter().filter(|d| d.confidence >= min_confidence) {
        draw_detection(&mut canvas, detection, scale);
    }
    canvas
}

fn draw_detection(canvas: &mut RgbImage, detection: &Detection, scale: u32) {
    if canvas.width() == 0 || canvas.height() == 0 {
        return;
    }
    let (x0, y0, x1, y1) = detection.bbox.to_pixels(canvas.width(), canvas.height());
    draw_hollow_rect(canvas, x0, y0, x1, y1, BOX_THICKNESS);

    let text = format!("{} {:.2}", detection.label, detection.confidence);
    let tag_w = text.chars().count() as u32 * (GLYPH_W + 1) * scale + 2 * TAG_PAD;
    let tag_h = GLYPH_H * scale + 2 * TAG_PAD;
    // Above the box when it fits, otherwise just inside its top edge.
    let tag_y = if y0 >= tag_h { y0 - tag_h } else { y0 };
    fill_rect(canvas, x0, tag_y, x0 + tag_w, tag_y + tag_h, BOX_COLOR);
    draw_text(canvas, x0 + TAG_PAD, tag_y + TAG_PAD, &text, scale);
}

fn put(canvas: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < canvas.width() && y < canvas.height() {
        canvas.put_pixel(x, y, color);
    }
}

fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(canvas.width());
    let y1 = y1.min(canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn draw_hollow_rect(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, thickness: u32) {
    for t in 0..thickness {
        for x in x0..=x1 {
            put(canvas, x, y0 + t, BOX_COLOR);
            put(canvas, x, y1.saturating_sub(t), BOX_COLOR);
        }
        for y in y0..=y1 {
            put(canvas, x0 + t, y, BOX_COLOR);
            put(canvas, x1.saturating_sub(t), y, BOX_COLOR);
        }
    }
}

fn draw_text(canvas: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32) {
    let advance = (GLYPH_W + 1) * scale;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as u32 * advance;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        put(
                            canvas,
                            origin_x + col * scale + dx,
                            y + row as u32 * scale + dy,
                            TEXT_COLOR,
                        );
                    }
                }
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
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
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => [0x00; 7],
    }
}
