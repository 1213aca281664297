use crate::layout::DocumentView;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMetrics {
    pub page_number: usize,
    pub view: DocumentView,
    pub command_count: usize,
    pub raster_ms: f64,
    pub width_px: u32,
    pub height_px: u32,
    pub raster_bytes: usize,
    pub compressed_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportMetrics {
    pub layout_ms: f64,
    pub pages: Vec<PageMetrics>,
    pub write_ms: f64,
    pub total_ms: f64,
    pub pdf_bytes: usize,
}

impl ExportMetrics {
    /// Largest single raster held during the export.
    pub fn peak_raster_bytes(&self) -> usize {
        self.pages.iter().map(|p| p.raster_bytes).max().unwrap_or(0)
    }

    pub fn total_raster_ms(&self) -> f64 {
        self.pages.iter().map(|p| p.raster_ms).sum()
    }
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
