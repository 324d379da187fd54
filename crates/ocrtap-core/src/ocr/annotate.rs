//! Debug overlay: recognised boxes drawn onto the screenshot.

use image::{DynamicImage, Rgba, RgbaImage};

use super::TextMatch;

const BOX_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const STROKE: u32 = 2;

/// Returns a copy of `image` with a red outline around every match.
///
/// Boxes partly outside the image are clipped; boxes entirely outside are
/// skipped.
pub fn annotate(image: &DynamicImage, matches: &[TextMatch]) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    for m in matches {
        draw_outline(&mut canvas, m);
    }
    canvas
}

fn draw_outline(canvas: &mut RgbaImage, m: &TextMatch) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let f = &m.frame;
    if f.x >= w as f64 || f.y >= h as f64 || f.x + f.width < 0.0 || f.y + f.height < 0.0 {
        return;
    }
    let clamp = |v: f64, max: u32| v.round().clamp(0.0, (max - 1) as f64) as u32;
    let left = clamp(f.x, w);
    let top = clamp(f.y, h);
    let right = clamp(f.x + f.width, w);
    let bottom = clamp(f.y + f.height, h);

    for y in top..=bottom {
        for x in left..=right {
            let on_edge = x < left + STROKE
                || x + STROKE > right
                || y < top + STROKE
                || y + STROKE > bottom;
            if on_edge {
                canvas.put_pixel(x, y, BOX_COLOR);
            }
        }
    }
}
