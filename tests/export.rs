use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use image::{Rgba, RgbaImage};
use template_pdf::assets::ImageAsset;
use template_pdf::export::{HostError, PrintHost, PrintSurface};
use template_pdf::raster::{ModelRasterizer, RasterRequest, Rasterizer};
use template_pdf::{
    CancellationToken, DocumentModel, EditorState, Error, ExportStrategy, Exporter, MarkupSurface,
    ValueMap,
};

type Log = Rc<RefCell<Vec<String>>>;

struct Surface {
    log: Log,
    fail_print: bool,
}

impl PrintSurface for Surface {
    fn write(&mut self, markup: &str) -> Result<(), HostError> {
        self.log.borrow_mut().push(format!("write {}", markup.len()));
        Ok(())
    }

    fn print(&mut self) -> Result<(), HostError> {
        self.log.borrow_mut().push("print".to_string());
        if self.fail_print {
            Err(HostError::Failed("printer offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn close(&mut self) {
        self.log.borrow_mut().push("close".to_string());
    }
}

#[derive(Default)]
struct Host {
    blocked: bool,
    fail_print: bool,
    log: Log,
}

impl PrintHost for Host {
    fn open_surface(&mut self) -> Result<Box<dyn PrintSurface>, HostError> {
        if self.blocked {
            return Err(HostError::PopupBlocked);
        }
        Ok(Box::new(Surface {
            log: Rc::clone(&self.log),
            fail_print: self.fail_print,
        }))
    }
}

/// Returns a fixed capture, optionally blocking until released.
struct FakeRasterizer {
    capture: RgbaImage,
    started: Mutex<Option<Sender<()>>>,
    gate: Mutex<Option<Receiver<()>>>,
}

impl FakeRasterizer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            capture: RgbaImage::from_pixel(width, height, Rgba([30, 60, 90, 255])),
            started: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }

    /// A rasterizer that signals `started` and then waits on the returned sender.
    fn gated() -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let raster = Self {
            started: Mutex::new(Some(started_tx)),
            gate: Mutex::new(Some(gate_rx)),
            ..Self::new(40, 60)
        };
        (Arc::new(raster), started_rx, gate_tx)
    }
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, _request: &RasterRequest) -> Result<RgbaImage, Error> {
        if let Some(started) = self.started.lock().unwrap().as_ref() {
            started.send(()).unwrap();
        }
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.recv().unwrap();
        }
        Ok(self.capture.clone())
    }
}

fn sample_model() -> DocumentModel {
    let mut ed = EditorState::new(MarkupSurface::default());
    ed.set_title("Atestado");
    ed.insert_variable("paciente");
    ed.insert_rectangle(40.0, 40.0);
    ed.snapshot()
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

fn page_count(pdf: &[u8]) -> usize {
    count(pdf, b"/Type /Page") - count(pdf, b"/Type /Pages")
}

#[test]
fn blocked_print_surface_is_reported() {
    let exporter = Exporter::default();
    let mut host = Host {
        blocked: true,
        ..Host::default()
    };
    let err = exporter
        .print(&mut host, &sample_model(), &ValueMap::new())
        .unwrap_err();
    assert!(matches!(err, Error::PrintSurfaceBlocked));
    assert!(host.log.borrow().is_empty());
    assert!(!exporter.is_busy());
}

#[test]
fn print_surface_is_always_closed() {
    let exporter = Exporter::default();
    let mut host = Host::default();
    exporter
        .print(&mut host, &sample_model(), &ValueMap::new())
        .unwrap();
    let log = host.log.borrow().clone();
    assert_eq!(log.len(), 3);
    assert!(log[0].starts_with("write "));
    assert_eq!(&log[1..], ["print", "close"]);

    let mut failing = Host {
        fail_print: true,
        ..Host::default()
    };
    let err = exporter
        .print(&mut failing, &sample_model(), &ValueMap::new())
        .unwrap_err();
    assert!(matches!(err, Error::Host(reason) if reason == "printer offline"));
    assert_eq!(failing.log.borrow().last().map(String::as_str), Some("close"));
}

#[test]
fn raster_export_is_exactly_one_page() {
    let mut model = sample_model();
    model.total_pages = 3;
    // A capture three pages tall still yields one page.
    let exporter = Exporter::default().with_rasterizer(Arc::new(FakeRasterizer::new(100, 450)));
    let bytes = exporter
        .render_pdf(ExportStrategy::Raster, &model, &ValueMap::new())
        .unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(page_count(&bytes), 1);
    assert_eq!(count(&bytes, b"/Count 1"), 1);
}

#[test]
fn builtin_rasterizer_produces_a_pdf() {
    let exporter = Exporter::new(template_pdf::RenderOptions {
        raster_dpi: 48.0,
        jpeg_quality: 80,
    });
    let bytes = exporter
        .render_pdf(ExportStrategy::Raster, &sample_model(), &ValueMap::new())
        .unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(page_count(&bytes), 1);
}

#[test]
fn native_export_is_a_vector_pdf() {
    let mut model = sample_model();
    model.total_pages = 2;
    let values = ValueMap::from([("paciente".to_string(), "Maria".to_string())]);
    let bytes = Exporter::default()
        .render_pdf(ExportStrategy::NativePrint, &model, &values)
        .unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(page_count(&bytes), 2);
    // No raster capture is embedded.
    assert_eq!(count(&bytes, b"/DCTDecode"), 0);
}

#[test]
fn only_one_export_runs_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let (raster, started, gate) = FakeRasterizer::gated();
    let exporter = Exporter::default().with_rasterizer(raster);
    let model = sample_model();

    let job = exporter
        .export(ExportStrategy::Raster, &model, &ValueMap::new(), dir.path().join("a.pdf"))
        .unwrap();
    started.recv().unwrap();
    assert!(exporter.is_busy());

    let second = exporter.export(ExportStrategy::Raster, &model, &ValueMap::new(), dir.path().join("b.pdf"));
    assert!(matches!(second, Err(Error::ExportInProgress)));
    let sync = exporter.render_pdf(ExportStrategy::NativePrint, &model, &ValueMap::new());
    assert!(matches!(sync, Err(Error::ExportInProgress)));

    gate.send(()).unwrap();
    let written = job.wait().unwrap();
    assert_eq!(written, dir.path().join("a.pdf"));
    assert!(std::fs::read(&written).unwrap().starts_with(b"%PDF"));
    assert!(!dir.path().join("b.pdf").exists());
    assert!(!exporter.is_busy());
}

#[test]
fn cancelled_export_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("cancelled.pdf");
    let (raster, started, gate) = FakeRasterizer::gated();
    let exporter = Exporter::default().with_rasterizer(raster);

    let job = exporter
        .export(ExportStrategy::Raster, &sample_model(), &ValueMap::new(), &output)
        .unwrap();
    started.recv().unwrap();
    job.cancel();
    gate.send(()).unwrap();

    assert!(matches!(job.wait(), Err(Error::Cancelled)));
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(!exporter.is_busy());
}

#[test]
fn builtin_rasterizer_stops_when_cancelled() {
    let model = sample_model();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = RasterRequest {
        html: String::new(),
        model,
        dpi: 48.0,
        base: None,
        cancel,
    };
    assert!(matches!(ModelRasterizer.rasterize(&request), Err(Error::Cancelled)));
}

#[test]
fn dropped_job_frees_the_exporter_at_its_next_check() {
    let dir = tempfile::tempdir().unwrap();
    let (raster, started, gate) = FakeRasterizer::gated();
    let exporter = Exporter::default().with_rasterizer(raster);

    let job = exporter
        .export(ExportStrategy::Raster, &sample_model(), &ValueMap::new(), dir.path().join("a.pdf"))
        .unwrap();
    started.recv().unwrap();
    drop(job);
    // The worker is still inside the capture, so the exporter stays busy.
    assert!(exporter.is_busy());
    gate.send(()).unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while exporter.is_busy() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(!exporter.is_busy());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn images_inside_table_cells_reach_the_pdf() {
    let mut logo = std::io::Cursor::new(Vec::new());
    RgbaImage::from_pixel(16, 8, Rgba([200, 20, 20, 255]))
        .write_to(&mut logo, image::ImageFormat::Png)
        .unwrap();
    let src = ImageAsset::from_bytes(logo.into_inner()).unwrap().to_data_url();

    let mut model = DocumentModel::default();
    model.content = format!(
        r#"<table><tr><td><img src="{src}" width="80"/></td><td>Clínica</td></tr></table>"#
    );
    let with_logo = Exporter::default()
        .render_pdf(ExportStrategy::NativePrint, &model, &ValueMap::new())
        .unwrap();
    assert_eq!(count(&with_logo, b"/Subtype /Image"), 1);

    model.content = "<table><tr><td></td><td>Clínica</td></tr></table>".to_string();
    let without = Exporter::default()
        .render_pdf(ExportStrategy::NativePrint, &model, &ValueMap::new())
        .unwrap();
    assert_eq!(count(&without, b"/Subtype /Image"), 0);
}
