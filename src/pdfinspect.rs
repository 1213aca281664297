use crate::types::Size;
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfInspectErrorCode {
    PdfParseFailed,
    PdfEncryptedUnsupported,
    PdfPageCountMismatch,
    PdfPageSizeMismatch,
    PdfIoError,
}

impl PdfInspectErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfInspectErrorCode::PdfParseFailed => "PDF_PARSE_FAILED",
            PdfInspectErrorCode::PdfEncryptedUnsupported => "PDF_ENCRYPTED_UNSUPPORTED",
            PdfInspectErrorCode::PdfPageCountMismatch => "PDF_PAGE_COUNT_MISMATCH",
            PdfInspectErrorCode::PdfPageSizeMismatch => "PDF_PAGE_SIZE_MISMATCH",
            PdfInspectErrorCode::PdfIoError => "PDF_IO_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInspectError {
    pub code: PdfInspectErrorCode,
    pub message: String,
}

impl std::fmt::Display for PdfInspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for PdfInspectError {}

/// Structural facts about an exported certificate PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    /// Media box width and height in points, in page order.
    pub page_sizes: Vec<(f32, f32)>,
    /// Pixel size of each page's image XObjects, in page order.
    pub image_sizes: Vec<(u32, u32)>,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport, PdfInspectError> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfParseFailed,
        message: err.to_string(),
    })?;

    let mut page_sizes = Vec::new();
    let mut image_sizes = Vec::new();
    for (_, page_id) in pdf.get_pages() {
        let Ok(page) = pdf.get_dictionary(page_id) else {
            continue;
        };
        if let Some(size) = media_box(&pdf, page) {
            page_sizes.push(size);
        }
        image_sizes.extend(page_images(&pdf, page));
    }

    Ok(PdfInspectReport {
        pdf_version: pdf.version.clone(),
        page_count: pdf.get_pages().len(),
        encrypted: pdf.is_encrypted(),
        file_size_bytes: bytes.len(),
        page_sizes,
        image_sizes,
    })
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport, PdfInspectError> {
    let data = std::fs::read(path).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfIoError,
        message: err.to_string(),
    })?;
    inspect_pdf_bytes(&data)
}

/// Problems that keep `report` from being a two-sided certificate of `expected` size.
pub fn certificate_layout_issues(
    report: &PdfInspectReport,
    expected: Size,
) -> Vec<PdfInspectErrorCode> {
    let mut issues = Vec::new();
    if report.encrypted {
        issues.push(PdfInspectErrorCode::PdfEncryptedUnsupported);
    }
    if report.page_count != 2 {
        issues.push(PdfInspectErrorCode::PdfPageCountMismatch);
    }
    let (w, h) = (expected.width.to_f32(), expected.height.to_f32());
    let size_ok = report.page_sizes.len() == report.page_count
        && report
            .page_sizes
            .iter()
            .all(|(pw, ph)| (pw - w).abs() < 0.5 && (ph - h).abs() < 0.5);
    if !size_ok {
        issues.push(PdfInspectErrorCode::PdfPageSizeMismatch);
    }
    issues
}

fn resolve<'a>(pdf: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoObject> {
    match obj {
        LoObject::Reference(id) => pdf.get_object(*id).ok(),
        other => Some(other),
    }
}

fn media_box(pdf: &LoDocument, page: &LoDictionary) -> Option<(f32, f32)> {
    let values = resolve(pdf, page.get(b"MediaBox").ok()?)?.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let n = |i: usize| values[i].as_float().ok();
    Some((n(2)? - n(0)?, n(3)? - n(1)?))
}

fn page_images(pdf: &LoDocument, page: &LoDictionary) -> Vec<(u32, u32)> {
    let Some(resources) = page
        .get(b"Resources")
        .ok()
        .and_then(|obj| resolve(pdf, obj))
        .and_then(|obj| obj.as_dict().ok())
    else {
        return Vec::new();
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|obj| resolve(pdf, obj))
        .and_then(|obj| obj.as_dict().ok())
    else {
        return Vec::new();
    };
    xobjects
        .iter()
        .filter_map(|(_, obj)| resolve(pdf, obj)?.as_stream().ok())
        .filter(|stream| {
            stream
                .dict
                .get(b"Subtype")
                .and_then(LoObject::as_name)
                .map(|name| name == b"Image")
                .unwrap_or(false)
        })
        .filter_map(|stream| {
            let w = stream.dict.get(b"Width").ok()?.as_i64().ok()?;
            let h = stream.dict.get(b"Height").ok()?.as_i64().ok()?;
            Some((u32::try_from(w).ok()?, u32::try_from(h).ok()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::PdfPageWriter;
    use crate::raster::RasterImage;

    fn certificate_bytes(pages: usize) -> Vec<u8> {
        let mut writer = PdfPageWriter::new(Size::a4_landscape());
        for _ in 0..pages {
            let image = RasterImage::new(6, 4, vec![128; 6 * 4 * 3]).unwrap();
            writer.add_image_page(&image).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn inspect_pdf_bytes_reads_version_pages_and_sizes() {
        let bytes = certificate_bytes(2);
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        assert_eq!(report.page_count, 2);
        assert!(!report.encrypted);
        assert_eq!(report.file_size_bytes, bytes.len());
        assert!(!report.pdf_version.is_empty());
        assert_eq!(report.page_sizes.len(), 2);
        assert_eq!(report.image_sizes, vec![(6, 4), (6, 4)]);
        assert!(certificate_layout_issues(&report, Size::a4_landscape()).is_empty());
    }

    #[test]
    fn inspect_pdf_bytes_rejects_malformed_data() {
        let err = inspect_pdf_bytes(b"not a pdf").expect_err("invalid");
        assert_eq!(err.code, PdfInspectErrorCode::PdfParseFailed);
    }

    #[test]
    fn inspect_pdf_path_reports_io_error_for_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = inspect_pdf_path(&dir.path().join("missing.pdf")).expect_err("missing");
        assert_eq!(err.code, PdfInspectErrorCode::PdfIoError);
    }

    #[test]
    fn layout_issues_flag_wrong_page_count_and_size() {
        let report = inspect_pdf_bytes(&certificate_bytes(1)).expect("inspect");
        let issues = certificate_layout_issues(&report, Size::a4_landscape());
        assert_eq!(issues, vec![PdfInspectErrorCode::PdfPageCountMismatch]);

        let portrait = Size::from_mm(210.0, 297.0);
        let report = inspect_pdf_bytes(&certificate_bytes(2)).expect("inspect");
        let issues = certificate_layout_issues(&report, portrait);
        assert_eq!(issues, vec![PdfInspectErrorCode::PdfPageSizeMismatch]);
    }

    #[test]
    fn inspect_pdf_path_matches_bytes_report() {
        let bytes = certificate_bytes(2);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cert.pdf");
        std::fs::write(&path, &bytes).expect("write");

        let from_path = inspect_pdf_path(&path).expect("inspect path");
        let from_bytes = inspect_pdf_bytes(&bytes).expect("inspect bytes");
        assert_eq!(from_path, from_bytes);
    }
}
