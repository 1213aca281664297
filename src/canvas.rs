use crate::types::{Color, Pt, Rect, Size};

/// One recorded drawing operation. Coordinates are top-left based: `y` grows
/// downwards from the top edge of the page.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    // Non-rendered metadata used by tests and previews. Ignored by the rasterizer.
    Meta {
        key: String,
        value: String,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    // Applies both fill and stroke alpha. Values outside 0..1 are clamped.
    SetOpacity {
        fill: f32,
        stroke: f32,
    },
    SetFontName(String),
    SetFontSize(Pt),
    ClipRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    Stroke,
    // `y` is the top of the text line; the baseline sits one font size below.
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        source: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub size: Size,
    pub commands: Vec<Command>,
}

impl Page {
    pub fn meta_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.commands.iter().filter_map(move |cmd| match cmd {
            Command::Meta { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn drawn_text(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::DrawString { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_size: Pt,
    font_name: String,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_size: Pt::from_f32(12.0),
            font_name: "Helvetica".to_string(),
        }
    }
}

/// Records commands for a single page, dropping redundant state changes.
pub struct Canvas {
    size: Size,
    commands: Vec<Command>,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            commands: Vec::new(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
        }
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.commands.push(Command::RestoreState);
        }
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = width.max(Pt::ZERO);
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_opacity(&mut self, fill: f32, stroke: f32) {
        self.commands.push(Command::SetOpacity {
            fill: fill.clamp(0.0, 1.0),
            stroke: stroke.clamp(0.0, 1.0),
        });
    }

    pub fn set_font(&mut self, name: &str, size: Pt) {
        if self.current_state.font_name != name {
            self.current_state.font_name = name.to_string();
            self.commands.push(Command::SetFontName(name.to_string()));
        }
        if self.current_state.font_size != size {
            self.current_state.font_size = size;
            self.commands.push(Command::SetFontSize(size));
        }
    }

    pub fn clip_rect(&mut self, rect: Rect) {
        self.commands.push(Command::ClipRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
    }

    pub fn line(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt) {
        self.commands.push(Command::MoveTo { x: x1, y: y1 });
        self.commands.push(Command::LineTo { x: x2, y: y2 });
        self.commands.push(Command::Stroke);
    }

    pub fn stroke_rect(&mut self, rect: Rect) {
        let right = rect.x + rect.width;
        let bottom = rect.y + rect.height;
        self.commands.push(Command::MoveTo {
            x: rect.x,
            y: rect.y,
        });
        self.commands.push(Command::LineTo { x: right, y: rect.y });
        self.commands.push(Command::LineTo { x: right, y: bottom });
        self.commands.push(Command::LineTo {
            x: rect.x,
            y: bottom,
        });
        self.commands.push(Command::ClosePath);
        self.commands.push(Command::Stroke);
    }

    pub fn fill_rect(&mut self, rect: Rect) {
        self.commands.push(Command::DrawRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
    }

    pub fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        self.commands.push(Command::DrawString {
            x,
            y,
            text: text.into(),
        });
    }

    pub fn draw_image(&mut self, rect: Rect, source: impl Into<String>) {
        self.commands.push(Command::DrawImage {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            source: source.into(),
        });
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn finish(self) -> Page {
        Page {
            size: self.size,
            commands: self.commands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_dropped() {
        let mut canvas = Canvas::new(Size::a4_landscape());
        canvas.set_fill_color(Color::BLACK);
        canvas.set_font("Helvetica", Pt::from_f32(12.0));
        canvas.set_fill_color(Color::WHITE);
        canvas.set_fill_color(Color::WHITE);
        let page = canvas.finish();
        assert_eq!(page.commands, vec![Command::SetFillColor(Color::WHITE)]);
    }

    #[test]
    fn restore_state_rewinds_tracked_font() {
        let mut canvas = Canvas::new(Size::a4_landscape());
        canvas.save_state();
        canvas.set_font("Times-Bold", Pt::from_f32(30.0));
        canvas.restore_state();
        canvas.set_font("Times-Bold", Pt::from_f32(30.0));
        let page = canvas.finish();
        let font_sets = page
            .commands
            .iter()
            .filter(|c| matches!(c, Command::SetFontName(_)))
            .count();
        assert_eq!(font_sets, 2);
    }

    #[test]
    fn unbalanced_restore_is_ignored() {
        let mut canvas = Canvas::new(Size::a4_landscape());
        canvas.restore_state();
        assert_eq!(canvas.command_count(), 0);
    }

    #[test]
    fn meta_values_filter_by_key() {
        let mut canvas = Canvas::new(Size::a4_landscape());
        canvas.meta("view", "front");
        canvas.meta("other", "x");
        canvas.draw_string(Pt::ZERO, Pt::ZERO, "hello");
        let page = canvas.finish();
        assert_eq!(page.meta_values("view").collect::<Vec<_>>(), vec!["front"]);
        assert_eq!(page.drawn_text(), vec!["hello"]);
    }
}
