use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("raster error: {0}")]
    Raster(String),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("invalid file name for download: {0}")]
    InvalidFileName(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("Usuário não registrado neste módulo")]
    NotRegisteredInModule,

    #[error("Erro ao criar usuário")]
    SignUpWithoutUser,

    #[error("record not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("modality mismatch: class {class_id} is {expected}, enrollment is {actual}")]
    ModalityMismatch {
        class_id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for CertificateError {
    fn from(value: lopdf::Error) -> Self {
        CertificateError::Pdf(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CertificateError>;
