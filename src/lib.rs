mod assets;
mod canvas;
mod config;
mod dates;
mod draft;
mod error;
mod export;
mod font;
mod layout;
mod metrics;
mod pdf;
mod pdfinspect;
mod raster;
mod records;
mod session;
mod types;
mod view;

pub use assets::Logo;
pub use canvas::{Canvas, Command, Page};
pub use config::{CertificateSettings, FontSettings, Institution, PageSettings, Signatory};
pub use dates::{INVALID_DATE, format_date, format_long_date, format_short_date, parse_iso_date};
pub use draft::{CertificateDraft, CertificateInputs, DraftField, DraftWarning};
pub use error::{CertificateError, Result};
pub use export::{
    DirectorySink, DownloadSink, ExportReport, MemorySink, SavedDocument, certificate_file_name,
};
pub use font::FontRegistry;
pub use layout::{
    ADD_MODULE_LABEL, BACK_FOOTER, BACK_HEADING, BackView, DocumentView, FONT_BOLD, FONT_REGULAR,
    FONT_SERIF_BOLD, FRONT_LEAD_IN, FRONT_SUBTITLE, FRONT_TITLE, FrontView, LayoutContext,
    META_CONTROL, META_FIELD, META_MODE, META_MODULE, META_VIEW, ModuleItem, NarrativeSpan,
    REMOVE_MODULE_LABEL, SpanStyle, paint,
};
pub use metrics::{ExportMetrics, PageMetrics};
pub use pdf::{PdfPageWriter, WrittenPage};
pub use pdfinspect::{
    PdfInspectError, PdfInspectErrorCode, PdfInspectReport, certificate_layout_issues,
    inspect_pdf_bytes, inspect_pdf_path,
};
pub use raster::{CaptureRegion, RasterImage, Rasterizer, SkiaRasterizer};
pub use records::{
    CertificateIssuance, ClassCycle, Course, EadAccess, EadEnrollment, Enrollment,
    MemoryRecordStore, Modality, RecordStore, SessionAttendance, Student,
    VideoconferenceEnrollment, certificate_inputs_for, save_all_ead_access,
};
pub use session::{
    AuthBackend, AuthUser, MemoryAuthBackend, MemoryProfileStore, ProfileStore, SessionContext,
    SessionManager, UserModule, UserProfile,
};
pub use types::{Color, Pt, Rect, Size};
pub use view::{CertificateRenderer, CertificateRendererBuilder, CertificateView};
