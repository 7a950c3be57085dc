//! Fonts available to a capture: metrics for layout, outlines for raster.

use std::collections::HashMap;
use std::sync::Arc;

use tiny_skia::{Path, PathBuilder};
use ttf_parser::{Face, OutlineBuilder};

/// Approximate ascent as a fraction of the font size when no face is loaded
const FALLBACK_ASCENT: f32 = 0.8;

/// DejaVu Sans, used for text whose family has no face of its own
pub const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Width of a run of text, used for line breaking and alignment
pub trait TextMeasure {
    fn advance(&self, family: &str, size: f32, text: &str) -> f32;

    /// Distance from the top of the glyph box to the baseline
    fn ascent(&self, family: &str, size: f32) -> f32 {
        let _ = family;
        size * FALLBACK_ASCENT
    }
}

/// Loaded font data keyed by lowercased family name
#[derive(Debug, Clone, Default)]
pub struct FontBook {
    faces: HashMap<String, Arc<Vec<u8>>>,
    default_face: Option<Arc<Vec<u8>>>,
    fallback_advance_em: f32,
}

impl FontBook {
    pub fn new(fallback_advance_em: f32) -> Self {
        Self {
            faces: HashMap::new(),
            default_face: None,
            fallback_advance_em,
        }
    }

    /// Register font data for `family`. Fails if the data is not a font.
    pub fn insert(&mut self, family: &str, data: Vec<u8>) -> Result<(), String> {
        Face::parse(&data, 0).map_err(|e| e.to_string())?;
        self.faces.insert(family.to_ascii_lowercase(), Arc::new(data));
        Ok(())
    }

    /// Font used for families without their own data
    pub fn set_default(&mut self, data: Arc<Vec<u8>>) -> Result<(), String> {
        Face::parse(&data, 0).map_err(|e| e.to_string())?;
        self.default_face = Some(data);
        Ok(())
    }

    /// Whether text in `family` can be painted
    pub fn covers(&self, family: &str) -> bool {
        self.data_for(family).is_some()
    }

    pub fn has_faces(&self) -> bool {
        self.default_face.is_some() || !self.faces.is_empty()
    }

    fn data_for(&self, family: &str) -> Option<&Arc<Vec<u8>>> {
        self.faces.get(family).or(self.default_face.as_ref())
    }

    fn face_for(&self, family: &str) -> Option<Face<'_>> {
        self.data_for(family).and_then(|data| Face::parse(data, 0).ok())
    }

    /// Outline of `text` laid out from (`x`, `baseline`), in pixels.
    ///
    /// `None` when no face covers the family or the text has no ink.
    pub fn text_path(&self, family: &str, size: f32, x: f32, baseline: f32, text: &str) -> Option<Path> {
        let face = self.face_for(family)?;
        let scale = size / f32::from(face.units_per_em().max(1));
        let mut builder = GlyphPathBuilder {
            builder: PathBuilder::new(),
            origin_x: x,
            origin_y: baseline,
            scale,
        };
        for ch in text.chars() {
            let Some(glyph) = face.glyph_index(ch) else {
                builder.origin_x += self.fallback_advance_em * size;
                continue;
            };
            face.outline_glyph(glyph, &mut builder);
            let advance = face.glyph_hor_advance(glyph).unwrap_or(0);
            builder.origin_x += f32::from(advance) * scale;
        }
        builder.builder.finish()
    }
}

impl TextMeasure for FontBook {
    fn advance(&self, family: &str, size: f32, text: &str) -> f32 {
        let Some(face) = self.face_for(family) else {
            return text.chars().count() as f32 * self.fallback_advance_em * size;
        };
        let scale = size / f32::from(face.units_per_em().max(1));
        text.chars()
            .map(|ch| match face.glyph_index(ch) {
                Some(glyph) => f32::from(face.glyph_hor_advance(glyph).unwrap_or(0)) * scale,
                None => self.fallback_advance_em * size,
            })
            .sum()
    }

    fn ascent(&self, family: &str, size: f32) -> f32 {
        match self.face_for(family) {
            Some(face) => f32::from(face.ascender()) * size / f32::from(face.units_per_em().max(1)),
            None => size * FALLBACK_ASCENT,
        }
    }
}

/// Converts font-unit outlines (y up) into a pixel path (y down)
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x, y) = self.point(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x2, y2) = self.point(x2, y2);
        let (x, y) = self.point(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundled_book() -> FontBook {
        let mut book = FontBook::new(0.5);
        book.insert("Brand", BUNDLED_FONT.to_vec()).unwrap();
        book
    }

    #[test]
    fn fallback_advance_without_faces() {
        let book = FontBook::new(0.5);
        assert!(!book.has_faces());
        assert!(!book.covers("any"));
        assert_eq!(book.advance("any", 20.0, "abcd"), 40.0);
        assert_eq!(book.ascent("any", 10.0), 8.0);
        assert!(book.text_path("any", 20.0, 0.0, 0.0, "abcd").is_none());
    }

    #[test]
    fn non_font_data_is_rejected() {
        let mut book = FontBook::new(0.5);
        assert!(book.insert("brand", b"not a font".to_vec()).is_err());
        assert!(book.set_default(Arc::new(Vec::new())).is_err());
        assert!(!book.has_faces());
    }

    #[test]
    fn advance_uses_face_metrics() {
        let book = bundled_book();
        let face = Face::parse(BUNDLED_FONT, 0).unwrap();
        let glyph = face.glyph_index('W').unwrap();
        let expected = f32::from(face.glyph_hor_advance(glyph).unwrap()) * 100.0 / f32::from(face.units_per_em());

        assert!((book.advance("brand", 100.0, "W") - expected).abs() < 1e-3);
        assert!(book.advance("brand", 20.0, "iiii") < book.advance("brand", 20.0, "WWWW"));
        let ascent = book.ascent("brand", 100.0);
        assert!(ascent > 0.0 && (ascent - 80.0).abs() > 1.0);
    }

    #[test]
    fn text_path_has_ink_above_the_baseline() {
        let book = bundled_book();
        let path = book.text_path("brand", 40.0, 10.0, 50.0, "H").unwrap();
        let bounds = path.bounds();
        assert!(bounds.width() > 10.0);
        assert!(bounds.left() >= 10.0);
        assert!(bounds.top() < 50.0 && bounds.bottom() <= 50.5);
    }

    #[test]
    fn default_face_covers_every_family() {
        let mut book = bundled_book();
        assert!(book.covers("brand"));
        assert!(!book.covers("serif"));
        book.set_default(Arc::new(BUNDLED_FONT.to_vec())).unwrap();
        assert!(book.covers("serif"));
        assert!(book.text_path("serif", 20.0, 0.0, 20.0, "ok").is_some());
    }
}
