//! Drag and resize gestures.
//!
//! A gesture is a short-lived [`GestureSession`] created on pointer-down and
//! dropped on pointer-up, capture loss or cancel. While it exists the host
//! keeps document-level pointer listeners installed; every way out of a
//! gesture releases them and restores the default cursor.

use crate::error::Error;
use crate::markup::EditorSurface;
use crate::model::{ObjectKind, PageObject, StylePatch, clamp_image_width, clamp_rect_size};
use crate::page::Viewport;
use crate::store::ObjectStore;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Resize handle. Corners move both axes, edges one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handle {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl Handle {
    /// Direction each axis grows in when the pointer moves positively; 0 = unaffected.
    fn signs(self) -> (f32, f32) {
        match self {
            Handle::N => (0.0, -1.0),
            Handle::S => (0.0, 1.0),
            Handle::E => (1.0, 0.0),
            Handle::W => (-1.0, 0.0),
            Handle::NE => (1.0, -1.0),
            Handle::NW => (-1.0, -1.0),
            Handle::SE => (1.0, 1.0),
            Handle::SW => (-1.0, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureKind {
    Drag,
    Resize(Handle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cursor {
    Default,
    Move,
    Resize(Handle),
}

/// Token for a set of document-level pointer listeners installed by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// Host side of pointer capture.
pub trait PointerHost {
    /// Installs global pointer-move/pointer-up listeners for one gesture.
    fn capture_pointer(&mut self) -> ListenerHandle;

    fn release_pointer(&mut self, handle: ListenerHandle);

    fn set_cursor(&mut self, cursor: Cursor);
}

/// Position and size of an object at one instant, in page pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Frame {
    fn of(object: &PageObject) -> Self {
        let (width, height) = object.size().unwrap_or((0.0, 0.0));
        Self {
            x: object.x,
            y: object.y,
            width,
            height,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GestureCommit {
    pub id: String,
    pub kind: GestureKind,
    pub from: Frame,
    pub to: Frame,
}

#[derive(Debug)]
struct GestureSession {
    id: String,
    kind: GestureKind,
    listener: ListenerHandle,
    start_pointer: Point,
    start: Frame,
    aspect_ratio: f32,
    was_floating: bool,
}

#[derive(Debug, Default)]
pub struct InteractionController {
    session: Option<GestureSession>,
    viewport: Viewport,
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn active_object(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    /// Starts a gesture on `id` at screen position `at` and selects the object.
    pub fn pointer_down(
        &mut self,
        host: &mut dyn PointerHost,
        store: &mut ObjectStore,
        id: &str,
        kind: GestureKind,
        at: Point,
    ) -> Result<(), Error> {
        if let Some(active) = &self.session {
            return Err(Error::GestureRejected(format!(
                "a gesture on '{}' is already active",
                active.id
            )));
        }
        let object = store
            .get(id)
            .ok_or_else(|| Error::ObjectNotFound(id.to_string()))?;

        let aspect_ratio = match (&object.kind, kind) {
            (_, GestureKind::Drag) if !object.is_floating() => {
                return Err(Error::NotFloating(id.to_string()));
            }
            (ObjectKind::Table(_), GestureKind::Resize(_)) => {
                return Err(Error::GestureRejected(
                    "tables are sized by their rows and columns".to_string(),
                ));
            }
            (ObjectKind::Image(image), _) => image.aspect_ratio,
            _ => 1.0,
        };

        let session = GestureSession {
            id: id.to_string(),
            kind,
            listener: host.capture_pointer(),
            start_pointer: self.page_point(at),
            start: Frame::of(object),
            aspect_ratio,
            was_floating: object.is_floating(),
        };
        host.set_cursor(match kind {
            GestureKind::Drag => Cursor::Move,
            GestureKind::Resize(handle) => Cursor::Resize(handle),
        });
        store.select(Some(id));
        self.session = Some(session);
        Ok(())
    }

    pub fn pointer_move(
        &mut self,
        store: &mut ObjectStore,
        surface: &mut dyn EditorSurface,
        at: Point,
    ) -> Result<(), Error> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let current = self.page_point(at);
        apply(session, store, surface, current)
    }

    /// Completes the gesture at `at`. Listeners are released even if the last update fails.
    pub fn pointer_up(
        &mut self,
        host: &mut dyn PointerHost,
        store: &mut ObjectStore,
        surface: &mut dyn EditorSurface,
        at: Point,
    ) -> Result<Option<GestureCommit>, Error> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        let current = self.page_point(at);
        let result = apply(&session, store, surface, current);
        release(host, &session);
        result?;
        Ok(commit(&session, store))
    }

    /// Pointer capture was lost: finish with the last applied coordinates.
    pub fn capture_lost(
        &mut self,
        host: &mut dyn PointerHost,
        store: &ObjectStore,
    ) -> Option<GestureCommit> {
        let session = self.session.take()?;
        release(host, &session);
        log::debug!("Pointer capture lost during gesture on '{}'", session.id);
        commit(&session, store)
    }

    /// Abandons the gesture and restores the object to where it started.
    pub fn cancel(
        &mut self,
        host: &mut dyn PointerHost,
        store: &mut ObjectStore,
        surface: &mut dyn EditorSurface,
    ) -> Result<(), Error> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        release(host, &session);
        let start = session.start;
        if let GestureKind::Resize(_) = session.kind {
            let patch = StylePatch {
                width: Some(start.width),
                height: Some(start.height),
                ..StylePatch::default()
            };
            store.update_style(surface, &session.id, &patch)?;
        }
        if session.was_floating {
            store.update_placement(surface, &session.id, start.x, start.y)?;
        }
        Ok(())
    }

    fn page_point(&self, screen: Point) -> Point {
        let (x, y) = self.viewport.to_page(screen.x, screen.y);
        Point { x, y }
    }
}

fn release(host: &mut dyn PointerHost, session: &GestureSession) {
    host.release_pointer(session.listener);
    host.set_cursor(Cursor::Default);
}

fn commit(session: &GestureSession, store: &ObjectStore) -> Option<GestureCommit> {
    let object = store.get(&session.id)?;
    Some(GestureCommit {
        id: session.id.clone(),
        kind: session.kind,
        from: session.start,
        to: Frame::of(object),
    })
}

fn apply(
    session: &GestureSession,
    store: &mut ObjectStore,
    surface: &mut dyn EditorSurface,
    current: Point,
) -> Result<(), Error> {
    let dx = current.x - session.start_pointer.x;
    let dy = current.y - session.start_pointer.y;
    let start = session.start;

    let handle = match session.kind {
        GestureKind::Drag => {
            return store.update_placement(surface, &session.id, start.x + dx, start.y + dy);
        }
        GestureKind::Resize(handle) => handle,
    };

    let object = store
        .get(&session.id)
        .ok_or_else(|| Error::ObjectNotFound(session.id.clone()))?;
    let (sx, sy) = handle.signs();

    let (width, height) = match object.kind {
        ObjectKind::Image(_) => {
            let grow = if sx != 0.0 {
                dx * sx
            } else {
                dy * sy * session.aspect_ratio
            };
            let width = clamp_image_width(start.width + grow);
            (width, (width / session.aspect_ratio).round())
        }
        ObjectKind::Rectangle(_) => {
            let width = if sx != 0.0 {
                clamp_rect_size(start.width + dx * sx)
            } else {
                start.width
            };
            let height = if sy != 0.0 {
                clamp_rect_size(start.height + dy * sy)
            } else {
                start.height
            };
            (width, height)
        }
        ObjectKind::Table(_) => return Ok(()),
    };

    let patch = StylePatch {
        width: Some(width),
        height: Some(height),
        ..StylePatch::default()
    };
    store.update_style(surface, &session.id, &patch)?;

    // West and north handles keep the opposite edge anchored.
    if session.was_floating && (sx < 0.0 || sy < 0.0) {
        let x = if sx < 0.0 {
            start.x + (start.width - width)
        } else {
            start.x
        };
        let y = if sy < 0.0 {
            start.y + (start.height - height)
        } else {
            start.y
        };
        store.update_placement(surface, &session.id, x, y)?;
    }
    Ok(())
}
