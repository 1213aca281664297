use crate::error::{CertificateError, Result};
use base64::Engine;
use image::GenericImageView;
use std::path::Path;

/// Institutional logo drawn in the header of both certificate sides.
#[derive(Debug, Clone, PartialEq)]
pub struct Logo {
    source: String,
    width_px: u32,
    height_px: u32,
}

impl Logo {
    /// Loads a logo from a `data:` URI or a file path and records its pixel
    /// size. The source string is kept as-is for the rasterizer.
    pub fn load(source: &str) -> Result<Self> {
        let bytes = load_source_bytes(source)
            .ok_or_else(|| CertificateError::Asset(format!("cannot read logo {source:?}")))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| CertificateError::Asset(format!("cannot decode logo: {err}")))?;
        let (width_px, height_px) = decoded.dimensions();
        if width_px == 0 || height_px == 0 {
            return Err(CertificateError::Asset("logo has no pixels".to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            width_px,
            height_px,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Width over height.
    pub fn aspect(&self) -> f32 {
        self.width_px as f32 / self.height_px as f32
    }
}

pub(crate) fn load_source_bytes(source: &str) -> Option<Vec<u8>> {
    if let Some((_mime, data)) = parse_data_uri(source) {
        return Some(data);
    }
    std::fs::read(Path::new(source)).ok()
}

pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

#[cfg(test)]
pub(crate) fn png_data_uri(width: u32, height: u32, rgba: [u8; 4]) -> String {
    let mut img = image::RgbaImage::new(width, height);
    for pixel in img.pixels_mut() {
        *pixel = image::Rgba(rgba);
    }
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .expect("encode png");
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
