use crate::assets::Logo;
use crate::canvas::Page;
use crate::config::CertificateSettings;
use crate::draft::{CertificateDraft, CertificateInputs, DraftField};
use crate::error::Result;
use crate::export::{DownloadSink, ExportReport, run_export};
use crate::font::FontRegistry;
use crate::layout::{DocumentView, LayoutContext, paint};
use crate::raster::{CaptureRegion, Rasterizer, SkiaRasterizer};
use chrono::{Local, NaiveDate};
use std::sync::Arc;

/// Shared, immutable rendering setup: settings, fonts, logo and the
/// rasterizer used for previews and export.
pub struct CertificateRenderer {
    settings: CertificateSettings,
    fonts: Arc<FontRegistry>,
    logo: Option<Logo>,
    rasterizer: Arc<dyn Rasterizer>,
    issue_date: Option<NaiveDate>,
}

#[derive(Default)]
pub struct CertificateRendererBuilder {
    settings: CertificateSettings,
    fonts: Option<FontRegistry>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    issue_date: Option<NaiveDate>,
}

impl CertificateRendererBuilder {
    pub fn settings(mut self, settings: CertificateSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use `fonts` as-is instead of building a registry from the settings.
    pub fn fonts(mut self, fonts: FontRegistry) -> Self {
        self.fonts = Some(fonts);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    /// Fixes the date printed on the issue line. Defaults to today.
    pub fn issue_date(mut self, date: NaiveDate) -> Self {
        self.issue_date = Some(date);
        self
    }

    pub fn build(self) -> Result<CertificateRenderer> {
        self.settings.validate()?;
        let fonts = match self.fonts {
            Some(fonts) => fonts,
            None => fonts_from_settings(&self.settings)?,
        };
        let fonts = Arc::new(fonts);
        let logo = self.settings.logo.as_deref().map(Logo::load).transpose()?;
        let rasterizer: Arc<dyn Rasterizer> = match self.rasterizer {
            Some(rasterizer) => rasterizer,
            None => Arc::new(SkiaRasterizer::new(
                self.settings.raster_dpi,
                Arc::clone(&fonts),
            )?),
        };
        tracing::debug!(
            fonts = fonts.registered_count(),
            logo = logo.is_some(),
            dpi = self.settings.raster_dpi,
            "certificate renderer ready"
        );
        Ok(CertificateRenderer {
            settings: self.settings,
            fonts,
            logo,
            rasterizer,
            issue_date: self.issue_date,
        })
    }
}

fn fonts_from_settings(settings: &CertificateSettings) -> Result<FontRegistry> {
    let mut fonts = FontRegistry::new();
    fonts.set_system_fallback(settings.fonts.system_fallback);
    for dir in &settings.fonts.dirs {
        fonts.register_dir(dir);
    }
    for file in &settings.fonts.files {
        fonts.register_file(file)?;
    }
    for (name, file) in &settings.fonts.faces {
        let data = std::fs::read(file)?;
        fonts.register_bytes(data, Some(name))?;
    }
    Ok(fonts)
}

impl CertificateRenderer {
    pub fn builder() -> CertificateRendererBuilder {
        CertificateRendererBuilder::default()
    }

    pub fn settings(&self) -> &CertificateSettings {
        &self.settings
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.fonts
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date.unwrap_or_else(|| Local::now().date_naive())
    }

    fn layout_context(&self) -> LayoutContext<'_> {
        LayoutContext {
            settings: &self.settings,
            fonts: &self.fonts,
            logo: self.logo.as_ref(),
            issue_date: self.issue_date(),
            page_size: self.settings.page.size(),
        }
    }

    pub fn paint(&self, draft: &CertificateDraft, view: DocumentView, editing: bool) -> Page {
        paint(draft, view, editing, &self.layout_context())
    }

    pub fn export(
        &self,
        draft: &CertificateDraft,
        sink: &dyn DownloadSink,
    ) -> Result<ExportReport> {
        run_export(draft, &self.layout_context(), self.rasterizer.as_ref(), sink)
    }
}

type CloseCallback = Box<dyn FnOnce() + Send>;

/// One open certificate: the draft being edited, which side is mounted and
/// whether edit mode is on.
pub struct CertificateView {
    renderer: Arc<CertificateRenderer>,
    draft: CertificateDraft,
    view: DocumentView,
    editing: bool,
    on_close: Option<CloseCallback>,
}

impl CertificateView {
    pub fn open(
        inputs: &CertificateInputs,
        renderer: Arc<CertificateRenderer>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        tracing::debug!(modules = inputs.course_modules.len(), "certificate view opened");
        Self {
            renderer,
            draft: CertificateDraft::from_inputs(inputs),
            view: DocumentView::Front,
            editing: false,
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn draft(&self) -> &CertificateDraft {
        &self.draft
    }

    pub fn view(&self) -> DocumentView {
        self.view
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// Returns the new edit flag.
    pub fn toggle_edit(&mut self) -> bool {
        self.editing = !self.editing;
        self.editing
    }

    pub fn finish_editing(&mut self) {
        self.editing = false;
    }

    pub fn set_view(&mut self, view: DocumentView) {
        self.view = view;
    }

    pub fn toggle_view(&mut self) -> DocumentView {
        self.view = self.view.flipped();
        self.view
    }

    pub fn set_field(&mut self, field: DraftField, value: impl Into<String>) {
        self.draft.set_field(field, value);
    }

    pub fn set_module(&mut self, index: usize, title: impl Into<String>) -> bool {
        self.draft.set_module(index, title)
    }

    /// Appends the configured placeholder title and returns its index.
    pub fn add_module(&mut self) -> usize {
        let placeholder = self.renderer.settings().new_module_placeholder.clone();
        self.draft.add_module(placeholder)
    }

    pub fn remove_module(&mut self, index: usize) -> Option<String> {
        self.draft.remove_module(index)
    }

    /// The mounted side as currently displayed.
    pub fn render(&self) -> Page {
        self.renderer.paint(&self.draft, self.view, self.editing)
    }

    pub fn preview_png(&self) -> Result<Vec<u8>> {
        let region = CaptureRegion {
            view: self.view,
            page: self.render(),
        };
        self.renderer.rasterizer.rasterize(&region)?.to_png()
    }

    /// Captures both sides of a snapshot of the draft, whatever is mounted.
    pub fn export(&self, sink: &dyn DownloadSink) -> Result<ExportReport> {
        self.renderer.export(&self.draft, sink)
    }

    pub fn close(mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}
