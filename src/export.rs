use crate::draft::CertificateDraft;
use crate::error::{CertificateError, Result};
use crate::layout::{DocumentView, LayoutContext, paint};
use crate::metrics::{ExportMetrics, PageMetrics, elapsed_ms};
use crate::pdf::PdfPageWriter;
use crate::raster::{CaptureRegion, Rasterizer};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// Name offered for download: `prefix` plus the trimmed student name with
/// every whitespace run collapsed to `_`. Path separators and control
/// characters are replaced as well so the name stays a single path component.
pub fn certificate_file_name(prefix: &str, student_name: &str) -> String {
    let stem = student_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect::<String>();
    format!("{prefix}{stem}.pdf")
}

/// Where an offered document ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedDocument {
    pub file_name: String,
    pub location: String,
    pub byte_len: usize,
}

/// The user's device as seen by export.
pub trait DownloadSink: Send + Sync {
    fn offer(&self, file_name: &str, bytes: &[u8]) -> Result<SavedDocument>;
}

/// Saves into a directory without ever replacing an existing file; a name
/// that is taken gets a ` (n)` suffix the way browsers do.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

const MAX_NAME_SUFFIX: u32 = 9_999;

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn validate_file_name(file_name: &str) -> Result<()> {
    let bad = file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\'])
        || file_name.chars().any(char::is_control);
    if bad {
        return Err(CertificateError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

fn numbered_name(file_name: &str, n: u32) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{file_name} ({n})"),
    }
}

impl DownloadSink for DirectorySink {
    fn offer(&self, file_name: &str, bytes: &[u8]) -> Result<SavedDocument> {
        validate_file_name(file_name)?;
        for n in 0..=MAX_NAME_SUFFIX {
            let name = if n == 0 {
                file_name.to_string()
            } else {
                numbered_name(file_name, n)
            };
            let path = self.dir.join(&name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            };
            if let Err(err) = file.write_all(bytes).and_then(|_| file.sync_all()) {
                drop(file);
                let _ = std::fs::remove_file(&path);
                return Err(err.into());
            }
            tracing::debug!(path = %path.display(), bytes = bytes.len(), "document saved");
            return Ok(SavedDocument {
                file_name: name,
                location: path.display().to_string(),
                byte_len: bytes.len(),
            });
        }
        Err(CertificateError::InvalidFileName(format!(
            "no free name for {file_name} in {}",
            self.dir.display()
        )))
    }
}

/// Keeps offered documents in memory, in offer order.
#[derive(Debug, Default)]
pub struct MemorySink {
    documents: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.documents
            .lock()
            .map(|docs| docs.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    /// Bytes of the most recent document offered under `file_name`.
    pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        let docs = self.documents.lock().ok()?;
        docs.iter()
            .rev()
            .find(|(name, _)| name == file_name)
            .map(|(_, bytes)| bytes.clone())
    }
}

impl DownloadSink for MemorySink {
    fn offer(&self, file_name: &str, bytes: &[u8]) -> Result<SavedDocument> {
        validate_file_name(file_name)?;
        let mut docs = self
            .documents
            .lock()
            .map_err(|_| CertificateError::Store("memory sink poisoned".to_string()))?;
        docs.push((file_name.to_string(), bytes.to_vec()));
        Ok(SavedDocument {
            file_name: file_name.to_string(),
            location: format!("memory:{}", docs.len() - 1),
            byte_len: bytes.len(),
        })
    }
}

/// Outcome of a successful export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub file_name: String,
    pub location: String,
    pub page_count: usize,
    pub page_size_pt: (f32, f32),
    pub byte_len: usize,
    pub sha256: String,
    pub metrics: ExportMetrics,
    pub warnings: Vec<String>,
}

/// Lays out both sides from a snapshot of `draft`, captures them front then
/// back, and offers the resulting two-page PDF to `sink`.
pub(crate) fn run_export(
    draft: &CertificateDraft,
    ctx: &LayoutContext<'_>,
    rasterizer: &dyn Rasterizer,
    sink: &dyn DownloadSink,
) -> Result<ExportReport> {
    let file_name = certificate_file_name(&ctx.settings.file_prefix, &draft.student_name);
    let span = tracing::info_span!("export", file_name = %file_name);
    let _guard = span.enter();
    export_inner(draft.clone(), file_name, ctx, rasterizer, sink).inspect_err(|err| {
        tracing::error!(error = %err, "certificate export failed");
    })
}

fn export_inner(
    snapshot: CertificateDraft,
    file_name: String,
    ctx: &LayoutContext<'_>,
    rasterizer: &dyn Rasterizer,
    sink: &dyn DownloadSink,
) -> Result<ExportReport> {
    let started = Instant::now();
    let mut warnings: Vec<String> = snapshot.warnings().iter().map(ToString::to_string).collect();
    for warning in &warnings {
        tracing::warn!(%warning, "exporting certificate with questionable data");
    }

    let layout_started = Instant::now();
    let regions: Vec<CaptureRegion> = {
        let _layout = tracing::debug_span!("layout").entered();
        DocumentView::BOTH
            .iter()
            .map(|&view| CaptureRegion {
                view,
                page: paint(&snapshot, view, false, ctx),
            })
            .collect()
    };
    let mut metrics = ExportMetrics {
        layout_ms: elapsed_ms(layout_started),
        ..ExportMetrics::default()
    };

    let title = file_name.trim_end_matches(".pdf").to_string();
    let mut writer = PdfPageWriter::new(ctx.page_size).with_title(title);
    for region in &regions {
        let _raster = tracing::debug_span!("raster", view = region.view.as_str()).entered();
        let raster_started = Instant::now();
        let image = rasterizer.rasterize(region)?;
        let raster_ms = elapsed_ms(raster_started);
        if !image.missing_fonts.is_empty() {
            let warning = format!(
                "{} side: no font available for {}, its text was not rendered",
                region.view.as_str(),
                image.missing_fonts.join(", ")
            );
            tracing::warn!(%warning, "exported certificate is missing text");
            warnings.push(warning);
        }
        let written = writer.add_image_page(&image)?;
        metrics.pages.push(PageMetrics {
            page_number: written.page_number,
            view: region.view,
            command_count: region.page.commands.len(),
            raster_ms,
            width_px: image.width_px,
            height_px: image.height_px,
            raster_bytes: written.raster_bytes,
            compressed_bytes: written.compressed_bytes,
        });
        // Released before the next side is captured.
        drop(image);
    }

    let write_started = Instant::now();
    let page_count = writer.page_count();
    let bytes = {
        let _write = tracing::debug_span!("pdf.write").entered();
        writer.finish()?
    };
    metrics.write_ms = elapsed_ms(write_started);
    metrics.pdf_bytes = bytes.len();
    let sha256 = sha256_hex(&bytes);

    let saved = {
        let _offer = tracing::debug_span!("sink.offer").entered();
        sink.offer(&file_name, &bytes)?
    };
    metrics.total_ms = elapsed_ms(started);
    tracing::info!(
        file_name = %saved.file_name,
        location = %saved.location,
        bytes = saved.byte_len,
        total_ms = metrics.total_ms,
        "certificate exported"
    );

    Ok(ExportReport {
        file_name: saved.file_name,
        location: saved.location,
        page_count,
        page_size_pt: (ctx.page_size.width.to_f32(), ctx.page_size.height.to_f32()),
        byte_len: saved.byte_len,
        sha256,
        metrics,
        warnings,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
