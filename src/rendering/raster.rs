//! Rasterizer: display list to a fixed-size PNG.
//!
//! Output is always exactly the requested pixel size with a device pixel
//! ratio of 1, so the same frame and resources give the same bytes on any
//! machine.

use std::collections::HashMap;

use tiny_skia::{
    Color, FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect as SkRect,
    Transform,
};

use crate::error::CaptureError;
use crate::rendering::font::FontBook;
use crate::rendering::layout::Rect;
use crate::rendering::paint::PaintCommand;
use crate::rendering::style::Rgba;
use crate::rendering::CaptureResult;
use crate::Dimensions;

/// Cubic approximation constant for quarter circles
const KAPPA: f32 = 0.552_284_8;

/// Paint `commands` onto a `dimensions`-sized canvas and encode it as PNG.
pub fn rasterize(
    commands: &[PaintCommand],
    dimensions: Dimensions,
    background: Rgba,
    images: &HashMap<String, Pixmap>,
    fonts: &FontBook,
) -> Result<CaptureResult, CaptureError> {
    let Dimensions { width, height } = dimensions;
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| CaptureError::Rasterize(format!("invalid canvas size {}x{}", width, height)))?;
    pixmap.fill(Color::from_rgba8(background.r, background.g, background.b, background.a));

    for command in commands {
        match command {
            PaintCommand::SolidRect { rect, radius, rgba, opacity } => {
                if let Some(path) = box_path(rect, *radius) {
                    let paint = solid_paint(*rgba, *opacity);
                    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
                }
            }
            PaintCommand::Image { rect, radius, src, opacity } => {
                let Some(image) = images.get(src) else {
                    return Err(CaptureError::failed(src, "image was not loaded before capture"));
                };
                draw_image(&mut pixmap, image, rect, *radius, *opacity);
            }
            PaintCommand::Text { x, baseline, text, family, size, rgba, opacity } => {
                if !fonts.covers(family) {
                    return Err(CaptureError::Rasterize(format!("no font for family {:?}", family)));
                }
                // glyph-less runs have no path
                if let Some(path) = fonts.text_path(family, *size, *x, *baseline, text) {
                    let paint = solid_paint(*rgba, *opacity);
                    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
                }
            }
        }
    }

    let png = pixmap
        .encode_png()
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(CaptureResult { width, height, png })
}

/// Decode PNG/JPEG/WebP bytes into a premultiplied pixmap.
pub fn decode_image(bytes: &[u8]) -> Result<Pixmap, String> {
    let rgba = image::load_from_memory(bytes).map_err(|e| e.to_string())?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| format!("empty image {}x{}", width, height))?;
    for (src, dst) in rgba.as_raw().chunks_exact(4).zip(pixmap.data_mut().chunks_exact_mut(4)) {
        let alpha = src[3];
        dst[0] = premultiply(src[0], alpha);
        dst[1] = premultiply(src[1], alpha);
        dst[2] = premultiply(src[2], alpha);
        dst[3] = alpha;
    }
    Ok(pixmap)
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    let prod = u16::from(channel) * u16::from(alpha) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn solid_paint(rgba: Rgba, opacity: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    let alpha = (f32::from(rgba.a) * opacity.clamp(0.0, 1.0)).round() as u8;
    paint.set_color_rgba8(rgba.r, rgba.g, rgba.b, alpha);
    paint.anti_alias = true;
    paint
}

fn draw_image(pixmap: &mut Pixmap, image: &Pixmap, rect: &Rect, radius: f32, opacity: f32) {
    let sx = rect.width / image.width() as f32;
    let sy = rect.height / image.height() as f32;
    let paint = PixmapPaint {
        opacity: opacity.clamp(0.0, 1.0),
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };

    let mask = if radius > 0.0 {
        box_path(rect, radius).and_then(|path| {
            let mut mask = Mask::new(pixmap.width(), pixmap.height())?;
            mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
            Some(mask)
        })
    } else {
        None
    };

    pixmap.draw_pixmap(
        0,
        0,
        image.as_ref(),
        &paint,
        Transform::from_row(sx, 0.0, 0.0, sy, rect.x, rect.y),
        mask.as_ref(),
    );
}

/// Rectangle path, with rounded corners when `radius` > 0
fn box_path(rect: &Rect, radius: f32) -> Option<Path> {
    let radius = radius.min(rect.width / 2.0).min(rect.height / 2.0);
    if radius <= 0.0 {
        return SkRect::from_xywh(rect.x, rect.y, rect.width, rect.height).map(PathBuilder::from_rect);
    }

    let (l, t, r, b) = (rect.x, rect.y, rect.right(), rect.bottom());
    let k = radius * KAPPA;
    let mut pb = PathBuilder::new();
    pb.move_to(l + radius, t);
    pb.line_to(r - radius, t);
    pb.cubic_to(r - radius + k, t, r, t + radius - k, r, t + radius);
    pb.line_to(r, b - radius);
    pb.cubic_to(r, b - radius + k, r - radius + k, b, r - radius, b);
    pb.line_to(l + radius, b);
    pb.cubic_to(l + radius - k, b, l, b - radius + k, l, b - radius);
    pb.line_to(l, t + radius);
    pb.cubic_to(l, t + radius - k, l + radius - k, t, l + radius, t);
    pb.close();
    pb.finish()
}
