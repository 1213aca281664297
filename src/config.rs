use crate::error::{CertificateError, Result};
use crate::types::Size;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything about the certificate that is not student data: institutional
/// wording, the signatory, output naming and raster quality. Defaults carry the
/// institute's own values so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateSettings {
    pub institution: Institution,
    pub signatory: Signatory,
    pub issue_place: String,
    pub delivery_phrase: String,
    pub file_prefix: String,
    pub new_module_placeholder: String,
    pub page: PageSettings,
    pub raster_dpi: u32,
    pub fonts: FontSettings,
    /// Data URI or file path of the institutional logo. A monogram is drawn
    /// when absent.
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Institution {
    pub header_lines: Vec<String>,
    pub full_name: String,
    pub monogram: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signatory {
    pub name: String,
    pub title: String,
    pub tax_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub width_mm: f32,
    pub height_mm: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontSettings {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    /// Font files registered under a logical name used by the layout, such as
    /// `Helvetica-Bold` or `Times-Bold`.
    pub faces: BTreeMap<String, PathBuf>,
    pub system_fallback: bool,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            institution: Institution::default(),
            signatory: Signatory::default(),
            issue_place: "São Luís, Maranhão".to_string(),
            delivery_phrase: "pela plataforma de videoconferência".to_string(),
            file_prefix: "Certificado_".to_string(),
            new_module_placeholder: "Novo módulo".to_string(),
            page: PageSettings::default(),
            raster_dpi: 150,
            fonts: FontSettings::default(),
            logo: None,
        }
    }
}

impl Default for Institution {
    fn default() -> Self {
        Self {
            header_lines: vec![
                "INSTITUTO DO DESENVOLVIMENTO".to_string(),
                "HUMANO E SOCIAL".to_string(),
            ],
            full_name: "Instituto do Desenvolvimento Humano e Social - IDHS".to_string(),
            monogram: "IDHS".to_string(),
        }
    }
}

impl Default for Signatory {
    fn default() -> Self {
        Self {
            name: "Marcelo Henrique de Oliveira Malheiros".to_string(),
            title: "Diretor-Presidente".to_string(),
            tax_id: "CNPJ: 05.832.015/0001-30".to_string(),
        }
    }
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            files: Vec::new(),
            faces: BTreeMap::new(),
            system_fallback: true,
        }
    }
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            width_mm: 297.0,
            height_mm: 210.0,
        }
    }
}

impl PageSettings {
    pub fn size(&self) -> Size {
        if self.width_mm == 297.0 && self.height_mm == 210.0 {
            Size::a4_landscape()
        } else {
            Size::from_mm(self.width_mm, self.height_mm)
        }
    }
}

impl CertificateSettings {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let settings: CertificateSettings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let settings = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded certificate settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.raster_dpi == 0 {
            return Err(CertificateError::InvalidConfiguration(
                "raster_dpi must be > 0".to_string(),
            ));
        }
        if self.raster_dpi > 1200 {
            return Err(CertificateError::InvalidConfiguration(format!(
                "raster_dpi must be <= 1200 (got {})",
                self.raster_dpi
            )));
        }
        let page = self.page;
        let finite = page.width_mm.is_finite() && page.height_mm.is_finite();
        if !finite || page.width_mm <= 0.0 || page.height_mm <= 0.0 {
            return Err(CertificateError::InvalidConfiguration(format!(
                "page size must be positive (got {}x{} mm)",
                page.width_mm, page.height_mm
            )));
        }
        if self.file_prefix.trim().is_empty() {
            return Err(CertificateError::InvalidConfiguration(
                "file_prefix cannot be empty".to_string(),
            ));
        }
        if self.file_prefix.contains(['/', '\\']) {
            return Err(CertificateError::InvalidConfiguration(
                "file_prefix cannot contain path separators".to_string(),
            ));
        }
        Ok(())
    }
}
