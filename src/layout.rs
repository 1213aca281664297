use crate::assets::Logo;
use crate::canvas::{Canvas, Page};
use crate::config::CertificateSettings;
use crate::dates::{format_date, format_long_date};
use crate::draft::{CertificateDraft, DraftField};
use crate::font::FontRegistry;
use crate::types::{Color, Pt, Rect, Size};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const FONT_REGULAR: &str = "Helvetica";
pub const FONT_BOLD: &str = "Helvetica-Bold";
pub const FONT_SERIF_BOLD: &str = "Times-Bold";

pub const META_VIEW: &str = "certificado.view";
pub const META_MODE: &str = "certificado.mode";
pub const META_MODULE: &str = "certificado.module";
pub const META_CONTROL: &str = "certificado.control";
pub const META_FIELD: &str = "certificado.field";

pub const FRONT_TITLE: &str = "CERTIFICADO";
pub const FRONT_SUBTITLE: &str = "DE CONCLUSÃO";
pub const FRONT_LEAD_IN: &str = "Certificamos que";
pub const BACK_HEADING: &str = "CONTEÚDO PROGRAMÁTICO";
pub const BACK_FOOTER: &str =
    "Este certificado é válido em todo território nacional conforme legislação vigente";
pub const ADD_MODULE_LABEL: &str = "Adicionar Módulo";
pub const REMOVE_MODULE_LABEL: &str = "×";

const MARGIN: f32 = 48.0;
const NAME_SIZE: f32 = 30.0;
const NAME_MIN_SIZE: f32 = 16.0;
const NARRATIVE_SIZE: f32 = 12.0;
const NARRATIVE_LEADING: f32 = 22.0;
const NARRATIVE_MAX_WIDTH: f32 = 600.0;
const MODULE_SIZE: f32 = 12.0;
const MODULE_LEADING: f32 = 17.0;
const EMPTY_INPUT_WIDTH: f32 = 36.0;

mod palette {
    use crate::types::Color;

    pub const PAPER: Color = Color {
        r: 248.0 / 255.0,
        g: 250.0 / 255.0,
        b: 252.0 / 255.0,
    };
    pub const NAVY: Color = Color {
        r: 30.0 / 255.0,
        g: 58.0 / 255.0,
        b: 138.0 / 255.0,
    };
    pub const BLUE: Color = Color {
        r: 37.0 / 255.0,
        g: 99.0 / 255.0,
        b: 235.0 / 255.0,
    };
    pub const DEEP_BLUE: Color = Color {
        r: 29.0 / 255.0,
        g: 78.0 / 255.0,
        b: 216.0 / 255.0,
    };
    pub const PALE_BLUE: Color = Color {
        r: 191.0 / 255.0,
        g: 219.0 / 255.0,
        b: 254.0 / 255.0,
    };
    pub const WASH: Color = Color {
        r: 239.0 / 255.0,
        g: 246.0 / 255.0,
        b: 255.0 / 255.0,
    };
    pub const INPUT_LINE: Color = Color {
        r: 96.0 / 255.0,
        g: 165.0 / 255.0,
        b: 250.0 / 255.0,
    };
    pub const INK: Color = Color {
        r: 30.0 / 255.0,
        g: 41.0 / 255.0,
        b: 59.0 / 255.0,
    };
    pub const MUTED: Color = Color {
        r: 71.0 / 255.0,
        g: 85.0 / 255.0,
        b: 105.0 / 255.0,
    };
    pub const DANGER: Color = Color {
        r: 220.0 / 255.0,
        g: 38.0 / 255.0,
        b: 38.0 / 255.0,
    };
}

/// Which side of the certificate is mounted for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentView {
    #[default]
    Front,
    Back,
}

impl DocumentView {
    /// Capture order used by export.
    pub const BOTH: [DocumentView; 2] = [DocumentView::Front, DocumentView::Back];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentView::Front => "front",
            DocumentView::Back => "back",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            DocumentView::Front => DocumentView::Back,
            DocumentView::Back => DocumentView::Front,
        }
    }
}

/// Everything a painter needs besides the draft itself.
#[derive(Clone, Copy)]
pub struct LayoutContext<'a> {
    pub settings: &'a CertificateSettings,
    pub fonts: &'a FontRegistry,
    pub logo: Option<&'a Logo>,
    pub issue_date: NaiveDate,
    pub page_size: Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStyle {
    Regular,
    Strong,
    Emphasis,
}

impl SpanStyle {
    fn font(self) -> &'static str {
        match self {
            SpanStyle::Regular => FONT_REGULAR,
            // No separate semibold face is registered; dates share the bold face.
            SpanStyle::Strong | SpanStyle::Emphasis => FONT_BOLD,
        }
    }
}

/// One run of the completion sentence. Runs bound to a draft field become
/// inputs in edit mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeSpan {
    pub text: String,
    pub style: SpanStyle,
    pub field: Option<DraftField>,
}

impl NarrativeSpan {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: SpanStyle::Regular,
            field: None,
        }
    }

    fn strong(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: SpanStyle::Strong,
            field: None,
        }
    }

    fn bound(text: impl Into<String>, style: SpanStyle, field: DraftField) -> Self {
        Self {
            text: text.into(),
            style,
            field: Some(field),
        }
    }
}

/// Front side content derived from the draft.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontView {
    pub header_lines: Vec<String>,
    pub monogram: String,
    pub student_heading: String,
    pub narrative: Vec<NarrativeSpan>,
    pub issue_place: String,
    pub issue_date: String,
    pub signature_lines: Vec<String>,
    pub editing: bool,
}

impl FrontView {
    pub fn build(
        draft: &CertificateDraft,
        settings: &CertificateSettings,
        issue_date: NaiveDate,
        editing: bool,
    ) -> Self {
        // Inputs show the raw draft value; static text shows the formatted one.
        let date = |raw: &str| {
            if editing {
                raw.to_string()
            } else {
                format_date(raw)
            }
        };
        let narrative = vec![
            NarrativeSpan::plain("Concluiu com êxito o curso de "),
            NarrativeSpan::bound(
                draft.course_name.clone(),
                SpanStyle::Strong,
                DraftField::CourseName,
            ),
            NarrativeSpan::plain(", realizado no período de "),
            NarrativeSpan::bound(
                date(&draft.start_date),
                SpanStyle::Emphasis,
                DraftField::StartDate,
            ),
            NarrativeSpan::plain(" a "),
            NarrativeSpan::bound(
                date(&draft.end_date),
                SpanStyle::Emphasis,
                DraftField::EndDate,
            ),
            NarrativeSpan::plain(format!(
                ", {}, promovido pelo ",
                settings.delivery_phrase
            )),
            NarrativeSpan::strong(settings.institution.full_name.clone()),
            NarrativeSpan::plain(", com carga horária total de "),
            NarrativeSpan::bound(
                draft.workload.clone(),
                SpanStyle::Strong,
                DraftField::Workload,
            ),
            NarrativeSpan::plain(" horas."),
        ];
        Self {
            header_lines: settings.institution.header_lines.clone(),
            monogram: settings.institution.monogram.clone(),
            student_heading: draft.student_name.to_uppercase(),
            narrative,
            issue_place: settings.issue_place.clone(),
            issue_date: format_long_date(issue_date),
            signature_lines: vec![
                settings.signatory.name.clone(),
                settings.signatory.title.clone(),
                settings.institution.full_name.clone(),
                settings.signatory.tax_id.clone(),
            ],
            editing,
        }
    }

    pub fn narrative_text(&self) -> String {
        self.narrative.iter().map(|span| span.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleItem {
    pub label: String,
    pub title: String,
}

/// Back side content derived from the draft.
#[derive(Debug, Clone, PartialEq)]
pub struct BackView {
    pub header_lines: Vec<String>,
    pub monogram: String,
    pub heading: String,
    pub items: Vec<ModuleItem>,
    pub footer: String,
    pub editing: bool,
}

impl BackView {
    pub fn build(draft: &CertificateDraft, settings: &CertificateSettings, editing: bool) -> Self {
        let items = draft
            .numbered_modules()
            .into_iter()
            .map(|(label, title)| ModuleItem {
                label,
                title: title.to_string(),
            })
            .collect();
        Self {
            header_lines: settings.institution.header_lines.clone(),
            monogram: settings.institution.monogram.clone(),
            heading: BACK_HEADING.to_string(),
            items,
            footer: BACK_FOOTER.to_string(),
            editing,
        }
    }
}

/// Lays out one side of the certificate into a page of drawing commands.
pub fn paint(
    draft: &CertificateDraft,
    view: DocumentView,
    editing: bool,
    ctx: &LayoutContext<'_>,
) -> Page {
    match view {
        DocumentView::Front => paint_front(
            &FrontView::build(draft, ctx.settings, ctx.issue_date, editing),
            ctx,
        ),
        DocumentView::Back => paint_back(&BackView::build(draft, ctx.settings, editing), ctx),
    }
}

fn pt(value: f32) -> Pt {
    Pt::from_f32(value)
}

fn measure(ctx: &LayoutContext<'_>, font: &str, size: f32, text: &str) -> f32 {
    ctx.fonts.measure(font, pt(size), text).to_f32()
}

struct TextStyle {
    font: &'static str,
    size: f32,
    color: Color,
}

fn draw_text(canvas: &mut Canvas, style: &TextStyle, x: f32, y: f32, text: &str) {
    canvas.set_fill_color(style.color);
    canvas.set_font(style.font, pt(style.size));
    canvas.draw_string(pt(x), pt(y), text);
}

fn draw_centered(
    canvas: &mut Canvas,
    ctx: &LayoutContext<'_>,
    style: &TextStyle,
    center_x: f32,
    y: f32,
    text: &str,
) -> f32 {
    let width = measure(ctx, style.font, style.size, text);
    draw_text(canvas, style, center_x - width / 2.0, y, text);
    width
}

fn hline(canvas: &mut Canvas, color: Color, width: f32, x1: f32, x2: f32, y: f32) {
    canvas.set_stroke_color(color);
    canvas.set_line_width(pt(width));
    canvas.line(pt(x1), pt(y), pt(x2), pt(y));
}

fn begin_page(ctx: &LayoutContext<'_>, view: DocumentView, editing: bool) -> Canvas {
    let mut canvas = Canvas::new(ctx.page_size);
    canvas.meta(META_VIEW, view.as_str());
    canvas.meta(META_MODE, if editing { "edit" } else { "static" });
    let size = ctx.page_size;
    canvas.clip_rect(Rect {
        x: Pt::ZERO,
        y: Pt::ZERO,
        width: size.width,
        height: size.height,
    });
    paint_frame(&mut canvas, size);
    canvas
}

fn paint_frame(canvas: &mut Canvas, size: Size) {
    let w = size.width.to_f32();
    let h = size.height.to_f32();
    canvas.set_fill_color(palette::PAPER);
    canvas.fill_rect(Rect::new(0.0, 0.0, w, h));

    canvas.save_state();
    canvas.set_opacity(0.1, 0.1);
    canvas.set_fill_color(palette::NAVY);
    let (arm, thickness) = (144.0, 45.0);
    canvas.fill_rect(Rect::new(0.0, 0.0, arm, thickness));
    canvas.fill_rect(Rect::new(0.0, 0.0, thickness, arm));
    canvas.fill_rect(Rect::new(w - arm, h - thickness, arm, thickness));
    canvas.fill_rect(Rect::new(w - thickness, h - arm, thickness, arm));
    canvas.restore_state();

    // Double outer border.
    canvas.save_state();
    canvas.set_opacity(0.2, 0.2);
    canvas.set_stroke_color(palette::NAVY);
    canvas.set_line_width(pt(3.0));
    let page = Rect::new(0.0, 0.0, w, h);
    canvas.stroke_rect(page.inset(1.5));
    canvas.stroke_rect(page.inset(7.5));
    canvas.restore_state();

    canvas.save_state();
    canvas.set_opacity(0.3, 0.3);
    canvas.set_stroke_color(palette::BLUE);
    canvas.set_line_width(pt(3.0));
    canvas.stroke_rect(page.inset(13.5));
    canvas.restore_state();

    canvas.save_state();
    canvas.set_opacity(0.4, 0.4);
    canvas.set_stroke_color(palette::DEEP_BLUE);
    canvas.set_line_width(pt(2.0));
    let (inset, arm) = (20.0, 120.0);
    canvas.line(pt(inset), pt(inset), pt(inset + arm), pt(inset));
    canvas.line(pt(inset), pt(inset), pt(inset), pt(inset + arm));
    canvas.line(pt(w - inset), pt(inset), pt(w - inset - arm), pt(inset));
    canvas.line(pt(w - inset), pt(inset), pt(w - inset), pt(inset + arm));
    canvas.line(pt(inset), pt(h - inset), pt(inset + arm), pt(h - inset));
    canvas.line(pt(inset), pt(h - inset), pt(inset), pt(h - inset - arm));
    canvas.line(pt(w - inset), pt(h - inset), pt(w - inset - arm), pt(h - inset));
    canvas.line(pt(w - inset), pt(h - inset), pt(w - inset), pt(h - inset - arm));
    canvas.restore_state();
}

/// Logo (or monogram badge) with the institution name between two rules.
/// Returns the y of the block's bottom edge.
fn paint_header(
    canvas: &mut Canvas,
    ctx: &LayoutContext<'_>,
    lines: &[String],
    monogram: &str,
    top: f32,
    mark_height: f32,
    text_size: f32,
) -> f32 {
    let center_x = ctx.page_size.width.to_f32() / 2.0;
    match ctx.logo {
        Some(logo) => {
            let width = mark_height * logo.aspect();
            canvas.draw_image(
                Rect::new(center_x - width / 2.0, top, width, mark_height),
                logo.source(),
            );
        }
        None => {
            canvas.set_fill_color(palette::NAVY);
            canvas.fill_rect(Rect::new(
                center_x - mark_height / 2.0,
                top,
                mark_height,
                mark_height,
            ));
            let style = TextStyle {
                font: FONT_SERIF_BOLD,
                size: mark_height * 0.3,
                color: Color::WHITE,
            };
            let y = top + (mark_height - style.size) / 2.0;
            draw_centered(canvas, ctx, &style, center_x, y, monogram);
        }
    }

    let style = TextStyle {
        font: FONT_BOLD,
        size: text_size,
        color: palette::INK,
    };
    let leading = text_size * 1.35;
    let widest = lines
        .iter()
        .map(|line| measure(ctx, style.font, style.size, line))
        .fold(0.0f32, f32::max);
    let half = widest / 2.0 + 12.0;
    let mut y = top + mark_height + 8.0;
    hline(canvas, palette::DEEP_BLUE, 1.5, center_x - half, center_x + half, y);
    y += 5.0;
    for line in lines {
        draw_centered(canvas, ctx, &style, center_x, y, line);
        y += leading;
    }
    y += 3.0;
    hline(canvas, palette::DEEP_BLUE, 1.5, center_x - half, center_x + half, y);
    y
}

#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    font: &'static str,
    field: Option<DraftField>,
    width: f32,
}

/// Fragments that must stay on one line, e.g. a value and its trailing comma.
#[derive(Debug, Clone, Default)]
struct Cluster {
    fragments: Vec<Fragment>,
    width: f32,
}

impl Cluster {
    fn push(&mut self, fragment: Fragment) {
        self.width += fragment.width;
        self.fragments.push(fragment);
    }
}

fn clusters_from_spans(
    spans: &[NarrativeSpan],
    ctx: &LayoutContext<'_>,
    size: f32,
    editing: bool,
) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut gap = true;
    for span in spans {
        let font = span.style.font();
        let is_input = editing && span.field.is_some();
        if is_input && span.text.trim().is_empty() {
            let fragment = Fragment {
                text: String::new(),
                font,
                field: span.field,
                width: EMPTY_INPUT_WIDTH,
            };
            push_fragment(&mut clusters, fragment, gap);
            gap = false;
            continue;
        }
        if span.text.starts_with(char::is_whitespace) {
            gap = true;
        }
        for (i, word) in span.text.split_whitespace().enumerate() {
            let mut width = measure(ctx, font, size, word);
            if is_input {
                width = width.max(EMPTY_INPUT_WIDTH);
            }
            let fragment = Fragment {
                text: word.to_string(),
                font,
                field: span.field,
                width,
            };
            push_fragment(&mut clusters, fragment, gap || i > 0);
            gap = false;
        }
        if span.text.ends_with(char::is_whitespace) {
            gap = true;
        }
    }
    clusters
}

fn push_fragment(clusters: &mut Vec<Cluster>, fragment: Fragment, breakable: bool) {
    match clusters.last_mut() {
        Some(last) if !breakable => last.push(fragment),
        _ => {
            let mut cluster = Cluster::default();
            cluster.push(fragment);
            clusters.push(cluster);
        }
    }
}

/// Greedy line filling. A cluster wider than `max_width` gets a line of its own.
fn break_lines(clusters: &[Cluster], max_width: f32, space: f32) -> Vec<Vec<usize>> {
    let mut lines: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut width = 0.0f32;
    for (idx, cluster) in clusters.iter().enumerate() {
        let needed = if current.is_empty() {
            cluster.width
        } else {
            width + space + cluster.width
        };
        if !current.is_empty() && needed > max_width {
            lines.push(std::mem::take(&mut current));
            width = cluster.width;
        } else {
            width = needed;
        }
        current.push(idx);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn wrap_plain(
    ctx: &LayoutContext<'_>,
    font: &'static str,
    size: f32,
    text: &str,
    max_width: f32,
) -> Vec<String> {
    let spans = [NarrativeSpan::plain(text)];
    let clusters = clusters_from_spans(&spans, ctx, size, false);
    let space = measure(ctx, font, size, " ");
    let widths: Vec<Cluster> = clusters
        .into_iter()
        .map(|mut c| {
            c.width = c
                .fragments
                .iter()
                .map(|f| measure(ctx, font, size, &f.text))
                .sum();
            c
        })
        .collect();
    break_lines(&widths, max_width, space)
        .into_iter()
        .map(|line| {
            line.iter()
                .map(|&i| {
                    widths[i]
                        .fragments
                        .iter()
                        .map(|f| f.text.as_str())
                        .collect::<String>()
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Wraps the student name to `max_width`, stepping the size down while a
/// single word is still wider than the column.
fn fit_name(ctx: &LayoutContext<'_>, text: &str, max_width: f32) -> (f32, Vec<String>) {
    let mut size = NAME_SIZE;
    loop {
        let lines = wrap_plain(ctx, FONT_SERIF_BOLD, size, text, max_width);
        let widest = lines
            .iter()
            .map(|line| measure(ctx, FONT_SERIF_BOLD, size, line))
            .fold(0.0f32, f32::max);
        if widest <= max_width || size <= NAME_MIN_SIZE {
            if lines.is_empty() {
                return (size, vec![String::new()]);
            }
            return (size, lines);
        }
        size -= 2.0;
    }
}

fn paint_front(view: &FrontView, ctx: &LayoutContext<'_>) -> Page {
    let mut canvas = begin_page(ctx, DocumentView::Front, view.editing);
    let w = ctx.page_size.width.to_f32();
    let h = ctx.page_size.height.to_f32();
    let center_x = w / 2.0;
    let content_width = w - 2.0 * MARGIN;

    let header_bottom = paint_header(
        &mut canvas,
        ctx,
        &view.header_lines,
        &view.monogram,
        MARGIN,
        64.0,
        11.0,
    );

    let narrative_width = NARRATIVE_MAX_WIDTH.min(content_width - 80.0);
    let clusters = clusters_from_spans(&view.narrative, ctx, NARRATIVE_SIZE, view.editing);
    let space = measure(ctx, FONT_REGULAR, NARRATIVE_SIZE, " ");
    let lines = break_lines(&clusters, narrative_width, space);

    // Signature block is anchored to the bottom margin; the body is centered
    // in what remains between header and signature.
    let signature_height = 4.0 + 15.0 + 13.0 + 11.0 + 11.0;
    let footer_top = h - MARGIN - signature_height;
    let name_width = content_width - 80.0;
    let (name_size, name_lines) = fit_name(ctx, &view.student_heading, name_width);
    let name_leading = name_size * 1.2;
    let body_height = 44.0
        + 20.0
        + 18.0
        + 18.0
        + 10.0
        + name_lines.len() as f32 * name_leading
        + 14.0
        + lines.len() as f32 * NARRATIVE_LEADING;
    let free = (footer_top - header_bottom - body_height).max(0.0);
    let mut y = header_bottom + free / 2.0;

    let title = TextStyle {
        font: FONT_SERIF_BOLD,
        size: 40.0,
        color: palette::NAVY,
    };
    let title_width = draw_centered(&mut canvas, ctx, &title, center_x, y, FRONT_TITLE);
    let rule_y = y + title.size / 2.0;
    let gap = title_width / 2.0 + 16.0;
    hline(&mut canvas, palette::BLUE, 1.5, center_x - gap - 64.0, center_x - gap, rule_y);
    hline(&mut canvas, palette::BLUE, 1.5, center_x + gap, center_x + gap + 64.0, rule_y);
    y += 44.0;

    let subtitle = TextStyle {
        font: FONT_REGULAR,
        size: 15.0,
        color: palette::MUTED,
    };
    draw_centered(&mut canvas, ctx, &subtitle, center_x, y, FRONT_SUBTITLE);
    y += 20.0 + 18.0;

    let lead_in = TextStyle {
        font: FONT_REGULAR,
        size: 13.5,
        color: palette::INK,
    };
    draw_centered(&mut canvas, ctx, &lead_in, center_x, y, FRONT_LEAD_IN);
    y += 18.0 + 10.0;

    let name = TextStyle {
        font: FONT_SERIF_BOLD,
        size: name_size,
        color: palette::NAVY,
    };
    for line in &name_lines {
        draw_centered(&mut canvas, ctx, &name, center_x, y, line);
        y += name_leading;
    }
    if view.editing {
        canvas.meta(META_FIELD, DraftField::StudentName.as_str());
        let half = content_width.min(560.0) / 2.0;
        hline(
            &mut canvas,
            palette::INPUT_LINE,
            2.0,
            center_x - half,
            center_x + half,
            y - name_leading + name.size + 4.0,
        );
    }
    y += 14.0;

    paint_narrative(
        &mut canvas,
        &clusters,
        &lines,
        center_x - narrative_width / 2.0,
        y,
        narrative_width,
        space,
        view.editing,
    );

    paint_signature(&mut canvas, ctx, view, footer_top);
    canvas.finish()
}

#[allow(clippy::too_many_arguments)]
fn paint_narrative(
    canvas: &mut Canvas,
    clusters: &[Cluster],
    lines: &[Vec<usize>],
    left: f32,
    top: f32,
    width: f32,
    space: f32,
    editing: bool,
) {
    let mut y = top;
    for (line_no, line) in lines.iter().enumerate() {
        let natural: f32 = line.iter().map(|&i| clusters[i].width).sum::<f32>()
            + space * line.len().saturating_sub(1) as f32;
        let last = line_no + 1 == lines.len();
        let extra = if !last && line.len() > 1 {
            ((width - natural) / (line.len() - 1) as f32).max(0.0)
        } else {
            0.0
        };
        let mut x = left;
        for &idx in line {
            for fragment in &clusters[idx].fragments {
                canvas.set_fill_color(palette::INK);
                canvas.set_font(fragment.font, pt(NARRATIVE_SIZE));
                if !fragment.text.is_empty() {
                    canvas.draw_string(pt(x), pt(y), fragment.text.as_str());
                }
                if let (true, Some(field)) = (editing, fragment.field) {
                    canvas.meta(META_FIELD, field.as_str());
                    hline(
                        canvas,
                        palette::MUTED,
                        1.0,
                        x,
                        x + fragment.width,
                        y + NARRATIVE_SIZE + 3.0,
                    );
                }
                x += fragment.width;
            }
            x += space + extra;
        }
        y += NARRATIVE_LEADING;
    }
}

fn paint_signature(canvas: &mut Canvas, ctx: &LayoutContext<'_>, view: &FrontView, top: f32) {
    let w = ctx.page_size.width.to_f32();
    let center_x = w / 2.0;

    let place = TextStyle {
        font: FONT_BOLD,
        size: 10.5,
        color: palette::INK,
    };
    let date = TextStyle {
        font: FONT_REGULAR,
        size: 10.5,
        color: palette::MUTED,
    };
    let left = MARGIN + 24.0;
    draw_text(canvas, &place, left, top + 20.0, &view.issue_place);
    draw_text(canvas, &date, left, top + 34.0, &view.issue_date);

    hline(canvas, palette::INK, 1.0, center_x - 120.0, center_x + 120.0, top);
    let styles = [
        (FONT_BOLD, 12.0, palette::INK, 15.0),
        (FONT_REGULAR, 10.0, palette::MUTED, 13.0),
        (FONT_REGULAR, 8.5, palette::MUTED, 11.0),
        (FONT_REGULAR, 8.5, palette::MUTED, 11.0),
    ];
    let mut y = top + 4.0;
    for (line, (font, size, color, leading)) in view.signature_lines.iter().zip(styles) {
        let style = TextStyle { font, size, color };
        draw_centered(canvas, ctx, &style, center_x, y, line);
        y += leading;
    }
}

fn paint_back(view: &BackView, ctx: &LayoutContext<'_>) -> Page {
    let mut canvas = begin_page(ctx, DocumentView::Back, view.editing);
    let w = ctx.page_size.width.to_f32();
    let h = ctx.page_size.height.to_f32();
    let center_x = w / 2.0;

    let header_bottom = paint_header(
        &mut canvas,
        ctx,
        &view.header_lines,
        &view.monogram,
        MARGIN,
        52.0,
        10.0,
    );

    let list_left = MARGIN + 24.0;
    let list_right = w - MARGIN - 24.0;
    let heading = TextStyle {
        font: FONT_SERIF_BOLD,
        size: 22.0,
        color: palette::NAVY,
    };
    let heading_y = header_bottom + 20.0;
    draw_text(&mut canvas, &heading, list_left, heading_y, &view.heading);
    let rule_y = heading_y + heading.size + 8.0;
    hline(&mut canvas, palette::DEEP_BLUE, 2.5, list_left, list_right, rule_y);

    let footer = TextStyle {
        font: FONT_REGULAR,
        size: 10.5,
        color: palette::MUTED,
    };
    let footer_y = h - MARGIN - footer.size - 2.0;
    let footer_rule = footer_y - 12.0;
    hline(&mut canvas, palette::PALE_BLUE, 2.0, list_left, list_right, footer_rule);
    draw_centered(&mut canvas, ctx, &footer, center_x, footer_y, &view.footer);

    let list_top = rule_y + 14.0;
    let list_bottom = footer_rule - 8.0;
    canvas.save_state();
    canvas.clip_rect(Rect::new(
        list_left - 12.0,
        list_top,
        list_right - list_left + 24.0,
        (list_bottom - list_top).max(0.0),
    ));

    let label = TextStyle {
        font: FONT_BOLD,
        size: 13.5,
        color: palette::NAVY,
    };
    let title = TextStyle {
        font: FONT_REGULAR,
        size: MODULE_SIZE,
        color: palette::INK,
    };
    let remove = TextStyle {
        font: FONT_BOLD,
        size: 14.0,
        color: palette::DANGER,
    };
    let title_x = list_left + 44.0;
    let title_width = list_right - title_x - if view.editing { 28.0 } else { 8.0 };
    let mut y = list_top;
    for (index, item) in view.items.iter().enumerate() {
        canvas.meta(META_MODULE, format!("{} {}", item.label, item.title));
        let wrapped = wrap_plain(ctx, title.font, title.size, &item.title, title_width);
        let row_height = wrapped.len().max(1) as f32 * MODULE_LEADING + 10.0;
        if view.editing {
            canvas.set_fill_color(palette::WASH);
            canvas.fill_rect(Rect::new(list_left, y, list_right - list_left, row_height));
        } else {
            canvas.set_fill_color(palette::BLUE);
            canvas.fill_rect(Rect::new(list_left, y, 3.0, row_height));
        }
        draw_text(&mut canvas, &label, list_left + 14.0, y + 5.0, &item.label);
        let mut line_y = y + 5.0 + (label.size - title.size);
        for line in &wrapped {
            draw_text(&mut canvas, &title, title_x, line_y, line);
            line_y += MODULE_LEADING;
        }
        if view.editing {
            hline(
                &mut canvas,
                palette::INPUT_LINE,
                1.0,
                title_x,
                title_x + title_width,
                y + row_height - 4.0,
            );
            canvas.meta(META_CONTROL, format!("remove:{index}"));
            draw_text(
                &mut canvas,
                &remove,
                list_right - 18.0,
                y + 4.0,
                REMOVE_MODULE_LABEL,
            );
        }
        y += row_height + 8.0;
    }

    if view.editing {
        canvas.meta(META_CONTROL, "add");
        let text = TextStyle {
            font: FONT_BOLD,
            size: 10.5,
            color: Color::WHITE,
        };
        let width = measure(ctx, text.font, text.size, ADD_MODULE_LABEL) + 28.0;
        canvas.set_fill_color(palette::BLUE);
        canvas.fill_rect(Rect::new(list_left, y, width, 24.0));
        draw_text(&mut canvas, &text, list_left + 14.0, y + 6.0, ADD_MODULE_LABEL);
    }
    canvas.restore_state();
    canvas.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::draft::CertificateInputs;

    fn offline_fonts() -> FontRegistry {
        let mut fonts = FontRegistry::new();
        fonts.set_system_fallback(false);
        fonts
    }

    fn draft() -> CertificateDraft {
        CertificateDraft::from_inputs(&CertificateInputs {
            student_name: "Maria Souza".to_string(),
            course_name: "Gestão Escolar".to_string(),
            course_modules: vec![
                "Fundamentos".to_string(),
                "Planejamento".to_string(),
                "Avaliação".to_string(),
            ],
            workload: 40,
            start_date: "2025-02-03".to_string(),
            end_date: "2025-03-28".to_string(),
        })
    }

    fn issue_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 5).expect("date")
    }

    fn with_ctx<R>(f: impl FnOnce(&LayoutContext<'_>) -> R) -> R {
        let settings = CertificateSettings::default();
        let fonts = offline_fonts();
        let ctx = LayoutContext {
            settings: &settings,
            fonts: &fonts,
            logo: None,
            issue_date: issue_date(),
            page_size: settings.page.size(),
        };
        f(&ctx)
    }

    #[test]
    fn front_narrative_carries_every_value() {
        let settings = CertificateSettings::default();
        let view = FrontView::build(&draft(), &settings, issue_date(), false);
        assert_eq!(view.student_heading, "MARIA SOUZA");
        assert_eq!(
            view.narrative_text(),
            "Concluiu com êxito o curso de Gestão Escolar, realizado no período de \
             03/02/2025 a 28/03/2025, pela plataforma de videoconferência, promovido pelo \
             Instituto do Desenvolvimento Humano e Social - IDHS, com carga horária total \
             de 40 horas."
        );
        assert_eq!(view.issue_date, "05 de março de 2026");
    }

    #[test]
    fn edit_mode_shows_raw_values() {
        let settings = CertificateSettings::default();
        let view = FrontView::build(&draft(), &settings, issue_date(), true);
        let text = view.narrative_text();
        assert!(text.contains("2025-02-03"));
        assert!(text.contains("2025-03-28"));
    }

    #[test]
    fn unparsable_date_renders_placeholder() {
        let settings = CertificateSettings::default();
        let mut draft = draft();
        draft.set_field(DraftField::StartDate, "não sei");
        let view = FrontView::build(&draft, &settings, issue_date(), false);
        assert!(view.narrative_text().contains("período de Invalid Date a 28/03/2025"));
        with_ctx(|ctx| {
            let page = paint(&draft, DocumentView::Front, false, ctx);
            assert!(page.drawn_text().contains(&"Invalid"));
        });
    }

    #[test]
    fn front_page_draws_title_name_and_signature() {
        with_ctx(|ctx| {
            let page = paint(&draft(), DocumentView::Front, false, ctx);
            assert_eq!(page.size, Size::a4_landscape());
            let text = page.drawn_text();
            for expected in [
                FRONT_TITLE,
                FRONT_SUBTITLE,
                FRONT_LEAD_IN,
                "MARIA SOUZA",
                "Marcelo Henrique de Oliveira Malheiros",
                "São Luís, Maranhão",
                "05 de março de 2026",
                "IDHS",
            ] {
                assert!(text.contains(&expected), "missing {expected:?}");
            }
            assert_eq!(page.meta_values(META_VIEW).collect::<Vec<_>>(), vec!["front"]);
            assert_eq!(page.meta_values(META_FIELD).count(), 0);
        });
    }

    fn text_extents(page: &Page, fonts: &FontRegistry) -> Vec<(String, f32, f32)> {
        let mut font = (FONT_REGULAR.to_string(), pt(12.0));
        let mut saved = Vec::new();
        let mut out = Vec::new();
        for cmd in &page.commands {
            match cmd {
                Command::SaveState => saved.push(font.clone()),
                Command::RestoreState => {
                    if let Some(prev) = saved.pop() {
                        font = prev;
                    }
                }
                Command::SetFontName(name) => font.0 = name.clone(),
                Command::SetFontSize(size) => font.1 = *size,
                Command::DrawString { x, text, .. } => {
                    let left = x.to_f32();
                    let right = left + fonts.measure(&font.0, font.1, text).to_f32();
                    out.push((text.clone(), left, right));
                }
                _ => {}
            }
        }
        out
    }

    #[test]
    fn long_student_name_wraps_inside_the_page() {
        let mut draft = draft();
        draft.set_field(
            DraftField::StudentName,
            "Maria Aparecida dos Santos de Oliveira Fernandes Silva",
        );
        with_ctx(|ctx| {
            let page = paint(&draft, DocumentView::Front, false, ctx);
            let width = ctx.page_size.width.to_f32();
            for (text, left, right) in text_extents(&page, ctx.fonts) {
                assert!(
                    left >= 0.0 && right <= width,
                    "{text:?} spans {left}..{right} on a {width} wide page"
                );
            }
            let name_lines: Vec<&str> = page
                .drawn_text()
                .into_iter()
                .filter(|t| t.starts_with("MARIA") || t.ends_with("SILVA"))
                .collect();
            assert!(name_lines.len() >= 2, "name not wrapped: {name_lines:?}");
            assert_eq!(
                name_lines.join(" "),
                "MARIA APARECIDA DOS SANTOS DE OLIVEIRA FERNANDES SILVA"
            );
        });
    }

    #[test]
    fn unbreakable_name_shrinks_to_fit() {
        with_ctx(|ctx| {
            let max_width = 300.0;
            let (size, lines) = fit_name(ctx, "WOLFESCHLEGELSTEINHAUSENBERGER", max_width);
            assert!(size < NAME_SIZE);
            assert_eq!(lines, vec!["WOLFESCHLEGELSTEINHAUSENBERGER"]);
            assert!(measure(ctx, FONT_SERIF_BOLD, size, &lines[0]) <= max_width);
        });
    }

    #[test]
    fn value_and_comma_stay_together() {
        with_ctx(|ctx| {
            let spans = FrontView::build(&draft(), ctx.settings, ctx.issue_date, false).narrative;
            let clusters = clusters_from_spans(&spans, ctx, NARRATIVE_SIZE, false);
            let end = clusters
                .iter()
                .find(|c| c.fragments[0].text == "28/03/2025")
                .expect("end date cluster");
            let texts: Vec<&str> = end.fragments.iter().map(|f| f.text.as_str()).collect();
            assert_eq!(texts, vec!["28/03/2025", ","]);
            assert_eq!(end.fragments[0].field, Some(DraftField::EndDate));
        });
    }

    #[test]
    fn narrative_wraps_within_its_column() {
        with_ctx(|ctx| {
            let spans = FrontView::build(&draft(), ctx.settings, ctx.issue_date, false).narrative;
            let clusters = clusters_from_spans(&spans, ctx, NARRATIVE_SIZE, false);
            let space = measure(ctx, FONT_REGULAR, NARRATIVE_SIZE, " ");
            let lines = break_lines(&clusters, 300.0, space);
            assert!(lines.len() > 1);
            for line in &lines {
                let width: f32 = line.iter().map(|&i| clusters[i].width).sum::<f32>()
                    + space * (line.len() - 1) as f32;
                assert!(width <= 300.0 || line.len() == 1);
            }
            let flat: Vec<usize> = lines.concat();
            assert_eq!(flat, (0..clusters.len()).collect::<Vec<_>>());
        });
    }

    #[test]
    fn edit_mode_marks_inputs_on_front() {
        with_ctx(|ctx| {
            let page = paint(&draft(), DocumentView::Front, true, ctx);
            let fields: Vec<&str> = page.meta_values(META_FIELD).collect();
            for field in DraftField::ALL {
                assert!(fields.contains(&field.as_str()), "missing {field:?}");
            }
            assert_eq!(page.meta_values(META_MODE).collect::<Vec<_>>(), vec!["edit"]);
        });
    }

    #[test]
    fn empty_input_still_gets_an_underline() {
        with_ctx(|ctx| {
            let mut draft = draft();
            draft.set_field(DraftField::Workload, "");
            let page = paint(&draft, DocumentView::Front, true, ctx);
            assert!(page.meta_values(META_FIELD).any(|f| f == "workload"));
        });
    }

    #[test]
    fn back_lists_modules_in_order() {
        with_ctx(|ctx| {
            let page = paint(&draft(), DocumentView::Back, false, ctx);
            let modules: Vec<&str> = page.meta_values(META_MODULE).collect();
            assert_eq!(
                modules,
                vec!["1. Fundamentos", "2. Planejamento", "3. Avaliação"]
            );
            let text = page.drawn_text();
            assert!(text.contains(&BACK_HEADING));
            assert!(text.contains(&BACK_FOOTER));
            assert!(!text.contains(&ADD_MODULE_LABEL));
            assert_eq!(page.meta_values(META_CONTROL).count(), 0);
        });
    }

    #[test]
    fn back_edit_mode_adds_controls() {
        with_ctx(|ctx| {
            let page = paint(&draft(), DocumentView::Back, true, ctx);
            let controls: Vec<&str> = page.meta_values(META_CONTROL).collect();
            assert_eq!(controls, vec!["remove:0", "remove:1", "remove:2", "add"]);
            let text = page.drawn_text();
            assert!(text.contains(&ADD_MODULE_LABEL));
            assert_eq!(text.iter().filter(|t| **t == REMOVE_MODULE_LABEL).count(), 3);
        });
    }

    #[test]
    fn renumbering_after_removal() {
        with_ctx(|ctx| {
            let mut draft = draft();
            draft.remove_module(0);
            let page = paint(&draft, DocumentView::Back, false, ctx);
            let modules: Vec<&str> = page.meta_values(META_MODULE).collect();
            assert_eq!(modules, vec!["1. Planejamento", "2. Avaliação"]);
        });
    }

    #[test]
    fn empty_module_list_renders_empty_back() {
        with_ctx(|ctx| {
            let mut draft = draft();
            draft.modules.clear();
            let page = paint(&draft, DocumentView::Back, false, ctx);
            assert_eq!(page.meta_values(META_MODULE).count(), 0);
            assert!(page.drawn_text().contains(&BACK_HEADING));
        });
    }

    #[test]
    fn long_lists_are_clipped_to_the_list_area() {
        with_ctx(|ctx| {
            let mut draft = draft();
            for i in 0..40 {
                draft.add_module(format!("Módulo extra {i}"));
            }
            let page = paint(&draft, DocumentView::Back, false, ctx);
            assert_eq!(page.meta_values(META_MODULE).count(), 43);
            let clips = page
                .commands
                .iter()
                .filter(|c| matches!(c, Command::ClipRect { .. }))
                .count();
            assert_eq!(clips, 2);
        });
    }

    #[test]
    fn logo_replaces_monogram() {
        let settings = CertificateSettings::default();
        let fonts = offline_fonts();
        let logo = Logo::load(&crate::assets::png_data_uri(20, 10, [30, 58, 138, 255]))
            .expect("logo");
        let ctx = LayoutContext {
            settings: &settings,
            fonts: &fonts,
            logo: Some(&logo),
            issue_date: issue_date(),
            page_size: settings.page.size(),
        };
        let page = paint(&draft(), DocumentView::Front, false, &ctx);
        let monogram_page = with_ctx(|ctx| paint(&draft(), DocumentView::Front, false, ctx));
        let image = page.commands.iter().find_map(|c| match c {
            Command::DrawImage { width, height, .. } => Some((*width, *height)),
            _ => None,
        });
        let (width, height) = image.expect("logo drawn");
        assert_eq!(height, Pt::from_f32(64.0));
        assert_eq!(width, Pt::from_f32(128.0));
        let count = |page: &Page| page.drawn_text().iter().filter(|t| **t == "IDHS").count();
        assert_eq!(count(&page) + 1, count(&monogram_page));
    }

    #[test]
    fn view_toggle_flips() {
        assert_eq!(DocumentView::Front.flipped(), DocumentView::Back);
        assert_eq!(DocumentView::Back.flipped(), DocumentView::Front);
        assert_eq!(DocumentView::default(), DocumentView::Front);
    }
}
