use crate::error::{CertificateError, Result};
use crate::raster::RasterImage;
use crate::types::Size;
use lopdf::{
    Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream,
    StringFormat, dictionary,
};
use std::io::Write;

/// Sizes recorded for one appended page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenPage {
    pub page_number: usize,
    pub raster_bytes: usize,
    pub compressed_bytes: usize,
}

/// Builds a PDF one full-bleed image page at a time. Each raster is
/// compressed into the document as soon as it is appended so the caller can
/// drop it before capturing the next page.
pub struct PdfPageWriter {
    doc: LoDocument,
    pages_id: LoObjectId,
    kids: Vec<LoObject>,
    page_size: Size,
    title: Option<String>,
}

impl PdfPageWriter {
    pub fn new(page_size: Size) -> Self {
        let mut doc = LoDocument::with_version("1.4");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            page_size,
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Appends a page whose only content is `image` stretched over the whole
    /// media box, ignoring the raster's aspect ratio.
    pub fn add_image_page(&mut self, image: &RasterImage) -> Result<WrittenPage> {
        let data = flate_compress(&image.rgb)?;
        let compressed_bytes = data.len();
        let image_id = self.doc.add_object(
            LoStream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => image.width_px as i64,
                    "Height" => image.height_px as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "FlateDecode",
                },
                data,
            )
            .with_compression(false),
        );

        let width = self.page_size.width.to_f32();
        let height = self.page_size.height.to_f32();
        let content = format!("q {width:.2} 0 0 {height:.2} 0 0 cm /Im0 Do Q").into_bytes();
        let content_id = self.doc.add_object(LoStream::new(dictionary! {}, content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "MediaBox" => vec![
                0.into(),
                0.into(),
                LoObject::Real(width),
                LoObject::Real(height),
            ],
        });
        self.kids.push(page_id.into());
        Ok(WrittenPage {
            page_number: self.kids.len(),
            raster_bytes: image.rgb.len(),
            compressed_bytes,
        })
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.kids.is_empty() {
            return Err(CertificateError::Pdf("document has no pages".to_string()));
        }
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
        };
        self.doc
            .objects
            .insert(self.pages_id, LoObject::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut info = dictionary! {
            "Producer" => LoObject::string_literal("certificado"),
        };
        if let Some(title) = &self.title {
            info.set("Title", text_string(title));
        }
        let info_id = self.doc.add_object(info);
        self.doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|err| CertificateError::Pdf(format!("pdf write failed: {err}")))?;
        Ok(out)
    }
}

// UTF-16BE with BOM, the PDF text string form that survives accents.
fn text_string(value: &str) -> LoObject {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    LoObject::String(bytes, StringFormat::Hexadecimal)
}

fn flate_compress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
