use crate::assets::parse_data_uri;
use crate::canvas::{Command, Page};
use crate::error::{CertificateError, Result};
use crate::font::{FontRegistry, shape_line};
use crate::layout::DocumentView;
use crate::types::{Color, Pt};
use std::collections::{BTreeSet, HashMap};
use std::path::Path as FsPath;
use std::sync::Arc;
use tiny_skia::{
    FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke,
    Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

/// A laid-out certificate side handed to a rasterizer.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRegion {
    pub view: DocumentView,
    pub page: Page,
}

/// Opaque 8-bit RGB pixels, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width_px: u32,
    pub height_px: u32,
    pub rgb: Vec<u8>,
    /// Fonts that text was set in but no font program resolved for. That
    /// text is missing from the pixels.
    pub missing_fonts: Vec<String>,
}

impl RasterImage {
    pub fn new(width_px: u32, height_px: u32, rgb: Vec<u8>) -> Result<Self> {
        let expected = width_px as usize * height_px as usize * 3;
        if width_px == 0 || height_px == 0 || rgb.len() != expected {
            return Err(CertificateError::Raster(format!(
                "raster buffer of {} bytes does not match {}x{} RGB",
                rgb.len(),
                width_px,
                height_px
            )));
        }
        Ok(Self {
            width_px,
            height_px,
            rgb,
            missing_fonts: Vec::new(),
        })
    }

    pub fn with_missing_fonts(mut self, fonts: impl IntoIterator<Item = String>) -> Self {
        self.missing_fonts = fonts.into_iter().collect();
        self
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width_px || y >= self.height_px {
            return None;
        }
        let idx = (y as usize * self.width_px as usize + x as usize) * 3;
        Some([self.rgb[idx], self.rgb[idx + 1], self.rgb[idx + 2]])
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let image = image::RgbImage::from_raw(self.width_px, self.height_px, self.rgb.clone())
            .ok_or_else(|| CertificateError::Raster("raster buffer size mismatch".to_string()))?;
        let mut bytes = Vec::new();
        image
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .map_err(|e| CertificateError::Raster(format!("png encode failed: {e}")))?;
        Ok(bytes)
    }
}

/// Turns a laid-out page into pixels. Export calls it once per side, in order.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, region: &CaptureRegion) -> Result<RasterImage>;
}

/// tiny-skia backed rasterizer drawing glyph outlines from the font registry.
pub struct SkiaRasterizer {
    dpi: u32,
    fonts: Arc<FontRegistry>,
}

impl SkiaRasterizer {
    pub fn new(dpi: u32, fonts: Arc<FontRegistry>) -> Result<Self> {
        if dpi == 0 {
            return Err(CertificateError::InvalidConfiguration(
                "dpi must be > 0".to_string(),
            ));
        }
        Ok(Self { dpi, fonts })
    }
}

impl Rasterizer for SkiaRasterizer {
    fn rasterize(&self, region: &CaptureRegion) -> Result<RasterImage> {
        let page = &region.page;
        let width_px = pt_milli_to_px_u32(page.size.width.to_milli_i64(), self.dpi)?;
        let height_px = pt_milli_to_px_u32(page.size.height.to_milli_i64(), self.dpi)?;
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            CertificateError::Raster(format!(
                "invalid raster size {}x{} at {} DPI",
                width_px, height_px, self.dpi
            ))
        })?;
        pixmap.fill(tiny_skia::Color::WHITE);

        let page_height_pt = page.size.height.to_f32();
        let scale = self.dpi as f32 / 72.0;
        let base = Transform::from_row(scale, 0.0, 0.0, -scale, 0.0, page_height_pt * scale);
        let mut painter = Painter {
            pixmap: &mut pixmap,
            base,
            page_height_pt,
            fonts: &self.fonts,
            state: RasterState::default(),
            stack: Vec::new(),
            path: PathBuilder::new(),
            has_path: false,
            images: HashMap::new(),
            missing_fonts: BTreeSet::new(),
        };
        painter.run(&page.commands);
        let missing_fonts = std::mem::take(&mut painter.missing_fonts);
        if !missing_fonts.is_empty() {
            tracing::warn!(
                view = region.view.as_str(),
                fonts = ?missing_fonts,
                "text left unrendered, no font program resolved"
            );
        }

        let mut rgb = Vec::with_capacity(width_px as usize * height_px as usize * 3);
        for px in pixmap.pixels() {
            let c = px.demultiply();
            rgb.extend_from_slice(&[c.red(), c.green(), c.blue()]);
        }
        tracing::debug!(
            view = region.view.as_str(),
            width_px,
            height_px,
            dpi = self.dpi,
            commands = page.commands.len(),
            "rasterized certificate side"
        );
        Ok(RasterImage::new(width_px, height_px, rgb)?.with_missing_fonts(missing_fonts))
    }
}

#[derive(Clone)]
struct RasterState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    fill_opacity: f32,
    stroke_opacity: f32,
    font_name: String,
    font_size: Pt,
    clip_mask: Option<Mask>,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
            font_name: "Helvetica".to_string(),
            font_size: Pt::from_f32(12.0),
            clip_mask: None,
        }
    }
}

struct Painter<'a> {
    pixmap: &'a mut Pixmap,
    base: Transform,
    page_height_pt: f32,
    fonts: &'a FontRegistry,
    state: RasterState,
    stack: Vec<RasterState>,
    path: PathBuilder,
    has_path: bool,
    images: HashMap<String, Option<Pixmap>>,
    missing_fonts: BTreeSet<String>,
}

impl Painter<'_> {
    fn run(&mut self, commands: &[Command]) {
        for cmd in commands {
            match cmd {
                Command::SaveState => self.stack.push(self.state.clone()),
                Command::RestoreState => {
                    if let Some(restored) = self.stack.pop() {
                        self.state = restored;
                    }
                }
                Command::Meta { .. } => {}
                Command::SetFillColor(color) => self.state.fill_color = *color,
                Command::SetStrokeColor(color) => self.state.stroke_color = *color,
                Command::SetLineWidth(width) => self.state.line_width = *width,
                Command::SetOpacity { fill, stroke } => {
                    self.state.fill_opacity = fill.clamp(0.0, 1.0);
                    self.state.stroke_opacity = stroke.clamp(0.0, 1.0);
                }
                Command::SetFontName(name) => self.state.font_name = name.clone(),
                Command::SetFontSize(size) => self.state.font_size = *size,
                Command::ClipRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    if let Some(rect) = self.pdf_rect(*x, *y, *width, *height) {
                        self.clip(&PathBuilder::from_rect(rect));
                    }
                }
                Command::MoveTo { x, y } => {
                    self.path.move_to(x.to_f32(), self.page_height_pt - y.to_f32());
                    self.has_path = true;
                }
                Command::LineTo { x, y } => {
                    self.path.line_to(x.to_f32(), self.page_height_pt - y.to_f32());
                    self.has_path = true;
                }
                Command::ClosePath => {
                    if self.has_path {
                        self.path.close();
                    }
                }
                Command::Fill => {
                    if let Some(path) = self.take_path() {
                        self.fill(&path);
                    }
                }
                Command::Stroke => {
                    if let Some(path) = self.take_path() {
                        self.stroke(&path);
                    }
                }
                Command::DrawString { x, y, text } => {
                    self.draw_string(x.to_f32(), y.to_f32(), text)
                }
                Command::DrawRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    if let Some(rect) = self.pdf_rect(*x, *y, *width, *height) {
                        self.fill(&PathBuilder::from_rect(rect));
                    }
                }
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    source,
                } => self.draw_image(*x, *y, *width, *height, source),
            }
        }
    }

    fn pdf_rect(&self, x: Pt, y: Pt, width: Pt, height: Pt) -> Option<Rect> {
        let draw_y = self.page_height_pt - y.to_f32() - height.to_f32();
        Rect::from_xywh(x.to_f32(), draw_y, width.to_f32(), height.to_f32())
    }

    fn take_path(&mut self) -> Option<Path> {
        if !self.has_path {
            return None;
        }
        self.has_path = false;
        std::mem::replace(&mut self.path, PathBuilder::new()).finish()
    }

    fn clip(&mut self, path: &Path) {
        if let Some(mask) = self.state.clip_mask.as_mut() {
            mask.intersect_path(path, FillRule::Winding, true, self.base);
            return;
        }
        let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        mask.fill_path(path, FillRule::Winding, true, self.base);
        self.state.clip_mask = Some(mask);
    }

    fn fill(&mut self, path: &Path) {
        let paint = fill_paint(self.state.fill_color, self.state.fill_opacity);
        self.pixmap.fill_path(
            path,
            &paint,
            FillRule::Winding,
            self.base,
            self.state.clip_mask.as_ref(),
        );
    }

    fn stroke(&mut self, path: &Path) {
        let paint = fill_paint(self.state.stroke_color, self.state.stroke_opacity);
        let stroke = Stroke {
            width: self.state.line_width.to_f32().max(0.0),
            ..Stroke::default()
        };
        self.pixmap.stroke_path(
            path,
            &paint,
            &stroke,
            self.base,
            self.state.clip_mask.as_ref(),
        );
    }

    // Text with no usable font program is skipped and its font recorded;
    // layout already reserved its space from estimated metrics.
    fn draw_string(&mut self, x: f32, y: f32, text: &str) {
        let font_size = self.state.font_size.to_f32().max(0.0);
        if font_size <= 0.0 || text.trim().is_empty() {
            return;
        }
        let Some(font) = self.fonts.resolve(&self.state.font_name) else {
            self.missing_fonts.insert(self.state.font_name.clone());
            return;
        };
        let Ok(face) = ttf_parser::Face::parse(font.as_slice(), 0) else {
            self.missing_fonts.insert(self.state.font_name.clone());
            return;
        };
        let shaped = shape_line(font.as_slice(), text, font_size);
        let baseline_y = self.page_height_pt - y - font_size;
        let paint = fill_paint(self.state.fill_color, self.state.fill_opacity);
        for glyph in &shaped.glyphs {
            let mut builder =
                GlyphPathBuilder::new(x + glyph.x, baseline_y + glyph.y, shaped.scale);
            if face
                .outline_glyph(GlyphId(glyph.glyph_id), &mut builder)
                .is_none()
            {
                continue;
            }
            let Some(path) = builder.finish() else {
                continue;
            };
            self.pixmap.fill_path(
                &path,
                &paint,
                FillRule::Winding,
                self.base,
                self.state.clip_mask.as_ref(),
            );
        }
    }

    fn draw_image(&mut self, x: Pt, y: Pt, width: Pt, height: Pt, source: &str) {
        let image = self
            .images
            .entry(source.to_string())
            .or_insert_with(|| load_image_pixmap(source));
        let Some(image) = image.as_ref() else {
            tracing::warn!(source_len = source.len(), "image source could not be decoded");
            return;
        };
        let src_w = image.width() as f32;
        let src_h = image.height() as f32;
        // Local y-flip so source row 0 lands at the visual top.
        let image_ts = Transform::from_row(
            width.to_f32() / src_w,
            0.0,
            0.0,
            -height.to_f32() / src_h,
            x.to_f32(),
            self.page_height_pt - y.to_f32(),
        );
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            opacity: self.state.fill_opacity,
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            image.as_ref(),
            &paint,
            self.base.pre_concat(image_ts),
            self.state.clip_mask.as_ref(),
        );
    }
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y + y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn fill_paint(color: Color, opacity: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color, opacity));
    paint.anti_alias = true;
    paint
}

fn to_sk_color(color: Color, opacity: f32) -> tiny_skia::Color {
    let r = color.r.clamp(0.0, 1.0);
    let g = color.g.clamp(0.0, 1.0);
    let b = color.b.clamp(0.0, 1.0);
    let a = opacity.clamp(0.0, 1.0);
    tiny_skia::Color::from_rgba(r, g, b, a).unwrap_or(tiny_skia::Color::BLACK)
}

pub(crate) fn pt_milli_to_px_u32(pt_milli: i64, dpi: u32) -> Result<u32> {
    let px = pt_milli_to_px_i64(pt_milli, dpi)?;
    if px <= 0 {
        return Err(CertificateError::InvalidConfiguration(format!(
            "invalid non-positive pixel dimension {px} for pt_milli={pt_milli} dpi={dpi}"
        )));
    }
    u32::try_from(px).map_err(|_| {
        CertificateError::InvalidConfiguration(format!(
            "pixel dimension out of range: {px} for pt_milli={pt_milli} dpi={dpi}"
        ))
    })
}

fn pt_milli_to_px_i64(pt_milli: i64, dpi: u32) -> Result<i64> {
    if dpi == 0 {
        return Err(CertificateError::InvalidConfiguration(
            "dpi must be > 0".to_string(),
        ));
    }
    let num = (pt_milli as i128).saturating_mul(dpi as i128);
    let den = 72_000_i128;
    let px = if num >= 0 {
        (num + (den / 2)) / den
    } else {
        -(((-num) + (den / 2)) / den)
    };
    i64::try_from(px).map_err(|_| {
        CertificateError::InvalidConfiguration(format!(
            "pixel conversion overflow: pt_milli={pt_milli} dpi={dpi}"
        ))
    })
}

fn load_image_pixmap(source: &str) -> Option<Pixmap> {
    if let Some((mime, data)) = parse_data_uri(source) {
        return decode_image_to_pixmap(&data, Some(&mime));
    }
    let bytes = std::fs::read(FsPath::new(source)).ok()?;
    decode_image_to_pixmap(&bytes, None)
}

fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let guessed_format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        Some(_) => None,
        None => image::guess_format(data).ok(),
    };
    let decoded = match guessed_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::png_data_uri;
    use crate::canvas::Canvas;
    use crate::types::{Rect as PageRect, Size};

    fn offline() -> Arc<FontRegistry> {
        let mut fonts = FontRegistry::new();
        fonts.set_system_fallback(false);
        Arc::new(fonts)
    }

    fn region(page: Page) -> CaptureRegion {
        CaptureRegion {
            view: DocumentView::Front,
            page,
        }
    }

    fn small_page(paint: impl FnOnce(&mut Canvas)) -> Page {
        let mut canvas = Canvas::new(Size {
            width: Pt::from_f32(72.0),
            height: Pt::from_f32(72.0),
        });
        paint(&mut canvas);
        canvas.finish()
    }

    #[test]
    fn pt_milli_to_px_rounds_half_away_from_zero() {
        assert_eq!(pt_milli_to_px_i64(72_000, 150).unwrap(), 150);
        assert_eq!(pt_milli_to_px_i64(240, 150).unwrap(), 1);
        assert_eq!(pt_milli_to_px_i64(-240, 150).unwrap(), -1);
        assert_eq!(pt_milli_to_px_i64(239, 150).unwrap(), 0);
        assert!(pt_milli_to_px_i64(1000, 0).is_err());
    }

    #[test]
    fn a4_landscape_at_150_dpi() {
        let rasterizer = SkiaRasterizer::new(150, offline()).unwrap();
        let page = Canvas::new(Size::a4_landscape()).finish();
        let image = rasterizer.rasterize(&region(page)).unwrap();
        assert_eq!((image.width_px, image.height_px), (1754, 1240));
        assert_eq!(image.rgb.len(), 1754 * 1240 * 3);
        assert_eq!(image.pixel(0, 0), Some([255, 255, 255]));
    }

    #[test]
    fn zero_dpi_is_rejected() {
        assert!(SkiaRasterizer::new(0, offline()).is_err());
    }

    #[test]
    fn filled_rect_lands_top_left() {
        let page = small_page(|c| {
            c.set_fill_color(Color::rgb8(255, 0, 0));
            c.fill_rect(PageRect::new(0.0, 0.0, 36.0, 36.0));
        });
        let image = SkiaRasterizer::new(72, offline())
            .unwrap()
            .rasterize(&region(page))
            .unwrap();
        assert_eq!(image.pixel(5, 5), Some([255, 0, 0]));
        assert_eq!(image.pixel(60, 60), Some([255, 255, 255]));
    }

    #[test]
    fn clip_rect_limits_painting_until_restore() {
        let page = small_page(|c| {
            c.save_state();
            c.clip_rect(PageRect::new(0.0, 0.0, 36.0, 72.0));
            c.set_fill_color(Color::BLACK);
            c.fill_rect(PageRect::new(0.0, 0.0, 72.0, 36.0));
            c.restore_state();
            c.set_fill_color(Color::rgb8(0, 0, 255));
            c.fill_rect(PageRect::new(0.0, 40.0, 72.0, 32.0));
        });
        let image = SkiaRasterizer::new(72, offline())
            .unwrap()
            .rasterize(&region(page))
            .unwrap();
        assert_eq!(image.pixel(10, 10), Some([0, 0, 0]));
        assert_eq!(image.pixel(60, 10), Some([255, 255, 255]));
        assert_eq!(image.pixel(60, 60), Some([0, 0, 255]));
    }

    #[test]
    fn images_are_scaled_into_their_box() {
        let source = png_data_uri(2, 2, [0, 128, 0, 255]);
        let page = small_page(|c| c.draw_image(PageRect::new(36.0, 36.0, 36.0, 36.0), source));
        let image = SkiaRasterizer::new(72, offline())
            .unwrap()
            .rasterize(&region(page))
            .unwrap();
        assert_eq!(image.pixel(54, 54), Some([0, 128, 0]));
        assert_eq!(image.pixel(10, 10), Some([255, 255, 255]));
    }

    #[test]
    fn text_without_fonts_is_skipped_and_reported() {
        let page = small_page(|c| {
            c.set_font("Helvetica", Pt::from_f32(24.0));
            c.draw_string(Pt::from_f32(4.0), Pt::from_f32(4.0), "Olá");
        });
        let image = SkiaRasterizer::new(72, offline())
            .unwrap()
            .rasterize(&region(page))
            .unwrap();
        assert!(image.rgb.iter().all(|b| *b == 255));
        assert_eq!(image.missing_fonts, vec!["Helvetica".to_string()]);
    }

    #[test]
    fn shapes_alone_report_no_missing_fonts() {
        let page = small_page(|c| {
            c.set_fill_color(Color::BLACK);
            c.fill_rect(PageRect::new(0.0, 0.0, 4.0, 4.0));
            c.draw_string(Pt::from_f32(4.0), Pt::from_f32(4.0), "   ");
        });
        let image = SkiaRasterizer::new(72, offline())
            .unwrap()
            .rasterize(&region(page))
            .unwrap();
        assert!(image.missing_fonts.is_empty());
    }

    #[test]
    fn png_export_round_trips_dimensions() {
        let image = RasterImage::new(3, 2, vec![200; 18]).unwrap();
        let png = image.to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(2, 1).0, [200, 200, 200]);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        assert!(RasterImage::new(2, 2, vec![0; 11]).is_err());
        assert!(RasterImage::new(0, 2, Vec::new()).is_err());
    }

    #[test]
    fn premul_matches_expected_rounding() {
        assert_eq!(premul_u8(255, 255), 255);
        assert_eq!(premul_u8(255, 0), 0);
        assert_eq!(premul_u8(255, 128), 128);
    }
}
