use crate::error::{CertificateError, Result};
use crate::types::Pt;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use ttf_parser::GlyphId;

// Average advance used when no font program can be resolved, as a fraction of the em.
const FALLBACK_ADVANCE: f32 = 0.52;
const FALLBACK_ADVANCE_BOLD: f32 = 0.58;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font: String,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            match self.order.pop_front() {
                Some(old) => {
                    self.map.remove(&old);
                }
                None => break,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GlyphPlacement {
    pub glyph_id: u16,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ShapedLine {
    pub glyphs: Vec<GlyphPlacement>,
    pub advance: f32,
    pub scale: f32,
}

/// Fonts available to layout and rasterization. Logical names such as
/// `Helvetica-Bold` resolve to registered fonts first and then, unless disabled,
/// to a matching system font file.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<(String, Arc<Vec<u8>>)>,
    lookup: HashMap<String, usize>,
    system_fallback: bool,
    system_cache: Mutex<HashMap<String, Option<Arc<Vec<u8>>>>>,
    width_cache: Mutex<TextWidthCache>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            system_fallback: true,
            system_cache: Mutex::new(HashMap::new()),
            width_cache: Mutex::new(TextWidthCache::new(4_096)),
        }
    }

    pub fn set_system_fallback(&mut self, enabled: bool) {
        self.system_fallback = enabled;
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_font_file(&path) {
                if let Err(err) = self.register_file(&path) {
                    tracing::debug!(path = %path.display(), error = %err, "skipping font file");
                }
            }
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("EmbeddedFont")
            .to_string();
        self.register_bytes(data, Some(&stem))
    }

    /// Registers a font program under its PostScript name, its family name and
    /// `alias` when given. Returns the primary name.
    pub fn register_bytes(&mut self, data: Vec<u8>, alias: Option<&str>) -> Result<String> {
        let source = alias.unwrap_or("EmbeddedFont");
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|_| CertificateError::Asset(format!("invalid font data for {source}")))?;

        let mut names = Vec::new();
        for record in face.names() {
            let wanted = record.name_id == ttf_parser::name_id::POST_SCRIPT_NAME
                || record.name_id == ttf_parser::name_id::FULL_NAME;
            if wanted {
                if let Some(name) = record.to_string() {
                    names.push(name);
                }
            }
        }
        let primary = names
            .first()
            .cloned()
            .unwrap_or_else(|| source.to_string());
        if let Some(alias) = alias {
            names.push(alias.to_string());
        }

        let index = self.fonts.len();
        self.fonts.push((primary.clone(), Arc::new(data)));
        for name in names {
            let key = normalize_name(&name);
            if !key.is_empty() {
                self.lookup.entry(key).or_insert(index);
            }
        }
        Ok(primary)
    }

    pub fn registered_count(&self) -> usize {
        self.fonts.len()
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        let key = normalize_name(name);
        if let Some(index) = self.lookup.get(&key) {
            return self.fonts.get(*index).map(|(_, data)| data.clone());
        }
        if !self.system_fallback {
            return None;
        }
        if let Ok(cache) = self.system_cache.lock() {
            if let Some(entry) = cache.get(&key) {
                return entry.clone();
            }
        }
        let loaded = load_system_font(name);
        if let Ok(mut cache) = self.system_cache.lock() {
            cache.insert(key, loaded.clone());
        }
        loaded
    }

    pub fn measure(&self, name: &str, font_size: Pt, text: &str) -> Pt {
        if text.is_empty() {
            return Pt::ZERO;
        }
        let key = TextWidthKey {
            font: normalize_name(name),
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.width_cache.lock() {
            if let Some(value) = cache.get(&key) {
                return value;
            }
        }
        let size = font_size.to_f32().max(0.0);
        let value = match self.resolve(name) {
            Some(data) => Pt::from_f32(shape_line(&data, text, size).advance),
            None => {
                let factor = if is_bold(name) {
                    FALLBACK_ADVANCE_BOLD
                } else {
                    FALLBACK_ADVANCE
                };
                Pt::from_f32(size * factor * text.chars().count() as f32)
            }
        };
        if let Ok(mut cache) = self.width_cache.lock() {
            cache.insert(key, value);
        }
        value
    }
}

/// Positions glyphs for one line of text, origin at the pen start on the
/// baseline, y growing upwards in font units scaled to `font_size`.
pub(crate) fn shape_line(font_data: &[u8], text: &str, font_size: f32) -> ShapedLine {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return shape_line_unshaped(font_data, text, font_size);
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(HbDirection::LeftToRight);
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return shape_line_unshaped(font_data, text, font_size);
    }

    let mut line = ShapedLine {
        glyphs: Vec::with_capacity(infos.len()),
        advance: 0.0,
        scale,
    };
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            line.glyphs.push(GlyphPlacement {
                glyph_id: gid,
                x: line.advance + pos.x_offset as f32 * scale,
                y: pos.y_offset as f32 * scale,
            });
        }
        line.advance += pos.x_advance as f32 * scale;
    }
    line
}

fn shape_line_unshaped(font_data: &[u8], text: &str, font_size: f32) -> ShapedLine {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return ShapedLine::default();
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut line = ShapedLine {
        glyphs: Vec::new(),
        advance: 0.0,
        scale,
    };
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            line.advance += font_size * FALLBACK_ADVANCE;
            continue;
        }
        line.glyphs.push(GlyphPlacement {
            glyph_id: gid,
            x: line.advance,
            y: 0.0,
        });
        let adv = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32 * scale;
        line.advance += if adv > 0.0 {
            adv
        } else {
            font_size * FALLBACK_ADVANCE
        };
    }
    line
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn is_bold(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("bold") || lower.ends_with("bd")
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
        .unwrap_or(false)
}

fn system_font_candidates(name: &str) -> &'static [&'static str] {
    let lower = name.to_ascii_lowercase();
    let serif = lower.starts_with("times") || (lower.contains("serif") && !lower.contains("sans"));
    match (serif, is_bold(name)) {
        (false, false) => &[
            "arial.ttf",
            "Arial.ttf",
            "LiberationSans-Regular.ttf",
            "DejaVuSans.ttf",
            "NotoSans-Regular.ttf",
            "Helvetica.ttc",
        ],
        (false, true) => &[
            "arialbd.ttf",
            "Arial Bold.ttf",
            "LiberationSans-Bold.ttf",
            "DejaVuSans-Bold.ttf",
            "NotoSans-Bold.ttf",
        ],
        (true, false) => &[
            "times.ttf",
            "Times New Roman.ttf",
            "LiberationSerif-Regular.ttf",
            "DejaVuSerif.ttf",
            "NotoSerif-Regular.ttf",
        ],
        (true, true) => &[
            "timesbd.ttf",
            "Times New Roman Bold.ttf",
            "LiberationSerif-Bold.ttf",
            "DejaVuSerif-Bold.ttf",
            "NotoSerif-Bold.ttf",
        ],
    }
}

fn load_system_font(name: &str) -> Option<Arc<Vec<u8>>> {
    let index = system_font_index();
    for candidate in system_font_candidates(name) {
        let Some(path) = index.get(&candidate.to_ascii_lowercase()) else {
            continue;
        };
        let Ok(bytes) = fs::read(path) else {
            continue;
        };
        if ttf_parser::Face::parse(&bytes, 0).is_ok() {
            tracing::debug!(font = name, path = %path.display(), "resolved system font");
            return Some(Arc::new(bytes));
        }
    }
    None
}

static SYSTEM_FONT_INDEX: OnceLock<HashMap<String, PathBuf>> = OnceLock::new();

// File name (lowercased) to path, first match wins.
fn system_font_index() -> &'static HashMap<String, PathBuf> {
    SYSTEM_FONT_INDEX.get_or_init(|| {
        let mut index = HashMap::new();
        for dir in system_font_dirs() {
            index_font_dir(&dir, 0, &mut index);
        }
        index
    })
}

fn index_font_dir(dir: &Path, depth: usize, index: &mut HashMap<String, PathBuf>) {
    if depth > 4 {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            index_font_dir(&path, depth + 1, index);
        } else if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            index
                .entry(file_name.to_ascii_lowercase())
                .or_insert_with(|| path.clone());
        }
    }
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(extra) = std::env::var("CERTIFICADO_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}
