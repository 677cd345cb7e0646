//! Print and export orchestration.
//!
//! A model is resolved against a value map, rendered to the print markup and
//! then either handed to the host's print pipeline or turned into a PDF file:
//! a vector PDF for the native strategy, a single rasterized page for the
//! raster strategy. Only one job runs per [`Exporter`] at a time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::html::render_document;
use crate::model::DocumentModel;
use crate::pdf;
use crate::raster::{
    DEFAULT_RASTER_DPI, ModelRasterizer, RasterRequest, Rasterizer, collapse_to_single_page,
};
use crate::storage::write_atomic;
use crate::variables::{self, ValueMap};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportStrategy {
    /// Selectable text and vector tables.
    #[default]
    NativePrint,
    /// One captured page image wrapped in a single-page PDF.
    Raster,
}

/// Failures reported by the host's print pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostError {
    /// The host refused to open a new print surface.
    PopupBlocked,
    Failed(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::PopupBlocked => f.write_str("print surface blocked"),
            HostError::Failed(reason) => f.write_str(reason),
        }
    }
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        match e {
            HostError::PopupBlocked => Error::PrintSurfaceBlocked,
            HostError::Failed(reason) => Error::Host(reason),
        }
    }
}

/// A rendering surface opened by the host, such as a new print window.
pub trait PrintSurface {
    fn write(&mut self, markup: &str) -> Result<(), HostError>;
    fn print(&mut self) -> Result<(), HostError>;
    fn close(&mut self);
}

pub trait PrintHost {
    fn open_surface(&mut self) -> Result<Box<dyn PrintSurface>, HostError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderOptions {
    pub raster_dpi: f32,
    pub jpeg_quality: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            raster_dpi: DEFAULT_RASTER_DPI,
            jpeg_quality: 90,
        }
    }
}

/// Held while a job runs; releases the exporter on drop.
struct ActiveJob(Arc<AtomicBool>);

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A background export. Dropping it cancels the work and nothing is written.
/// The drop does not wait: the exporter stays busy until the worker reaches
/// its next cancellation check, which happens between pipeline phases, between
/// PDF pages and between the pages and layers of the built-in rasterizer.
pub struct ExportJob {
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<PathBuf, Error>>>,
}

impl ExportJob {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Blocks until the job ends and returns the written path.
    pub fn wait(mut self) -> Result<PathBuf, Error> {
        let Some(handle) = self.handle.take() else {
            return Err(Error::Cancelled);
        };
        handle
            .join()
            .map_err(|_| Error::Host("export worker panicked".to_string()))?
    }
}

impl Drop for ExportJob {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}

pub struct Exporter {
    options: RenderOptions,
    rasterizer: Arc<dyn Rasterizer>,
    base: Option<PathBuf>,
    active: Arc<AtomicBool>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

impl Exporter {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            rasterizer: Arc::new(ModelRasterizer),
            base: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Directory relative image paths in the model are resolved against.
    pub fn with_base_dir(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<ActiveJob, Error> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ExportInProgress)?;
        Ok(ActiveJob(Arc::clone(&self.active)))
    }

    /// Writes the print markup into a new host surface and prints it.
    /// The surface is closed afterwards whether or not printing succeeded.
    pub fn print(
        &self,
        host: &mut dyn PrintHost,
        model: &DocumentModel,
        values: &ValueMap,
    ) -> Result<(), Error> {
        let _job = self.begin()?;
        let resolved = variables::resolve(model, values);
        let markup = render_document(&resolved);

        let mut surface = match host.open_surface() {
            Ok(surface) => surface,
            Err(e) => {
                log::warn!("Print surface could not be opened: {e}");
                return Err(e.into());
            }
        };
        let result = surface.write(&markup).and_then(|()| surface.print());
        surface.close();
        result?;
        log::info!("Sent '{}' to the print pipeline", resolved.title);
        Ok(())
    }

    /// Renders the PDF for `strategy` on the calling thread.
    pub fn render_pdf(
        &self,
        strategy: ExportStrategy,
        model: &DocumentModel,
        values: &ValueMap,
    ) -> Result<Vec<u8>, Error> {
        let _job = self.begin()?;
        let pipeline = Pipeline {
            strategy,
            options: self.options,
            rasterizer: Arc::clone(&self.rasterizer),
            base: self.base.clone(),
        };
        pipeline.run(model, values, &CancellationToken::new())
    }

    /// Starts a background export to `output`. Fails at once with
    /// `ExportInProgress` while another job is running.
    pub fn export(
        &self,
        strategy: ExportStrategy,
        model: &DocumentModel,
        values: &ValueMap,
        output: impl Into<PathBuf>,
    ) -> Result<ExportJob, Error> {
        let job = self.begin()?;
        let cancel = CancellationToken::new();
        let pipeline = Pipeline {
            strategy,
            options: self.options,
            rasterizer: Arc::clone(&self.rasterizer),
            base: self.base.clone(),
        };
        let model = model.clone();
        let values = values.clone();
        let output = output.into();
        let worker_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("template-export".to_string())
            .spawn(move || {
                let _job = job;
                let bytes = pipeline.run(&model, &values, &worker_cancel)?;
                worker_cancel.check()?;
                write_atomic(&output, &bytes)?;
                log::info!("Exported {:?} PDF to {}", pipeline.strategy, output.display());
                Ok(output)
            })?;

        Ok(ExportJob {
            cancel,
            handle: Some(handle),
        })
    }
}

struct Pipeline {
    strategy: ExportStrategy,
    options: RenderOptions,
    rasterizer: Arc<dyn Rasterizer>,
    base: Option<PathBuf>,
}

impl Pipeline {
    fn run(
        &self,
        model: &DocumentModel,
        values: &ValueMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        let resolved = variables::resolve(model, values);
        for token in variables::unresolved_tokens(model, values) {
            log::debug!("Token {token} has no value and stays as written");
        }
        cancel.check()?;
        match self.strategy {
            ExportStrategy::NativePrint => pdf::render_with(&resolved, self.base.as_deref(), cancel),
            ExportStrategy::Raster => self.raster(resolved, cancel),
        }
    }

    fn raster(&self, resolved: DocumentModel, cancel: &CancellationToken) -> Result<Vec<u8>, Error> {
        let t0 = Instant::now();
        let geometry = resolved.geometry();
        let request = RasterRequest {
            html: render_document(&resolved),
            model: resolved,
            dpi: self.options.raster_dpi,
            base: self.base.clone(),
            cancel: cancel.clone(),
        };
        let capture = self.rasterizer.rasterize(&request)?;
        let t_capture = t0.elapsed();
        cancel.check()?;

        let page = collapse_to_single_page(&capture, geometry.page_device_px(self.options.raster_dpi));
        cancel.check()?;
        let bytes = pdf::single_page_from_image(&page, &geometry, self.options.jpeg_quality)?;
        log::info!(
            "Raster export: capture={:.1}ms, assemble={:.1}ms",
            t_capture.as_secs_f64() * 1000.0,
            (t0.elapsed() - t_capture).as_secs_f64() * 1000.0,
        );
        Ok(bytes)
    }
}

/// Resolves, renders and writes a PDF in one call. Relative image paths are
/// taken from `base`.
pub fn export_pdf_file(
    model: &DocumentModel,
    values: &ValueMap,
    strategy: ExportStrategy,
    base: Option<&Path>,
    output: &Path,
) -> Result<(), Error> {
    let mut exporter = Exporter::default();
    if let Some(dir) = base {
        exporter = exporter.with_base_dir(dir);
    }
    let bytes = exporter.render_pdf(strategy, model, values)?;
    write_atomic(output, &bytes)
}
