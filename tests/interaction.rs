use std::collections::HashSet;
use std::io::Cursor;

use template_pdf::interaction::{
    Cursor as PointerCursor, GestureKind, Handle, ListenerHandle, Point, PointerHost,
};
use template_pdf::page::Viewport;
use template_pdf::store::Placement;
use template_pdf::{EditorState, Error, MarkupSurface, ObjectKind, PageObject};

/// Records installed listeners and the current cursor.
#[derive(Default)]
struct Host {
    next: u64,
    installed: HashSet<u64>,
    captures: usize,
    cursor: Option<PointerCursor>,
}

impl PointerHost for Host {
    fn capture_pointer(&mut self) -> ListenerHandle {
        self.next += 1;
        self.captures += 1;
        self.installed.insert(self.next);
        ListenerHandle(self.next)
    }

    fn release_pointer(&mut self, handle: ListenerHandle) {
        assert!(self.installed.remove(&handle.0), "released an unknown listener");
    }

    fn set_cursor(&mut self, cursor: PointerCursor) {
        self.cursor = Some(cursor);
    }
}

impl Host {
    fn assert_clean(&self) {
        assert!(self.installed.is_empty(), "leaked listeners: {:?}", self.installed);
        assert_eq!(self.cursor, Some(PointerCursor::Default));
    }
}

fn editor() -> EditorState<MarkupSurface> {
    EditorState::new(MarkupSurface::default())
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn image_size(object: &PageObject) -> (f32, f32, f32) {
    let ObjectKind::Image(image) = &object.kind else {
        panic!("expected an image");
    };
    (image.width, image.height(), image.aspect_ratio)
}

#[test]
fn drag_moves_by_the_pointer_delta_and_releases_capture() {
    let mut ed = editor();
    let mut host = Host::default();
    let rect = ed.insert_rectangle(50.0, 50.0);

    ed.pointer_down(&mut host, &rect.id, GestureKind::Drag, Point::new(100.0, 100.0))
        .unwrap();
    assert_eq!(host.cursor, Some(PointerCursor::Move));
    assert_eq!(host.installed.len(), 1);

    ed.pointer_move(Point::new(130.0, 90.0)).unwrap();
    // Released far outside the object.
    let commit = ed
        .pointer_up(&mut host, Point::new(900.0, 700.0))
        .unwrap()
        .unwrap();

    let moved = ed.objects().get(&rect.id).unwrap();
    assert_eq!((moved.x, moved.y), (850.0, 650.0));
    assert_eq!((commit.from.x, commit.to.x), (50.0, 850.0));
    assert!(!ed.interaction().is_active());
    host.assert_clean();
}

#[test]
fn drag_never_goes_negative() {
    let mut ed = editor();
    let mut host = Host::default();
    let rect = ed.insert_rectangle(10.0, 10.0);
    ed.pointer_down(&mut host, &rect.id, GestureKind::Drag, Point::new(0.0, 0.0))
        .unwrap();
    ed.pointer_up(&mut host, Point::new(-500.0, -20.0)).unwrap();
    let moved = ed.objects().get(&rect.id).unwrap();
    assert_eq!((moved.x, moved.y), (0.0, 0.0));
    host.assert_clean();
}

#[test]
fn drag_requires_floating_mode() {
    let mut ed = editor();
    let mut host = Host::default();
    let table = ed.insert_table(1, 1, Placement::inline());
    let err = ed
        .pointer_down(&mut host, &table.id, GestureKind::Drag, Point::default())
        .unwrap_err();
    assert!(matches!(err, Error::NotFloating(_)));
    assert_eq!(host.captures, 0);
    assert!(!ed.interaction().is_active());
}

#[test]
fn tables_are_not_resized_by_gestures() {
    let mut ed = editor();
    let mut host = Host::default();
    let table = ed.insert_table(1, 1, Placement::floating(0.0, 0.0));
    let err = ed
        .pointer_down(&mut host, &table.id, GestureKind::Resize(Handle::SE), Point::default())
        .unwrap_err();
    assert!(matches!(err, Error::GestureRejected(_)));
    assert!(host.installed.is_empty());
}

#[test]
fn only_one_gesture_at_a_time() {
    let mut ed = editor();
    let mut host = Host::default();
    let a = ed.insert_rectangle(0.0, 0.0);
    let b = ed.insert_rectangle(0.0, 0.0);
    ed.pointer_down(&mut host, &a.id, GestureKind::Drag, Point::default())
        .unwrap();
    let err = ed
        .pointer_down(&mut host, &b.id, GestureKind::Drag, Point::default())
        .unwrap_err();
    assert!(matches!(err, Error::GestureRejected(_)));
    assert_eq!(host.installed.len(), 1);
    ed.pointer_up(&mut host, Point::default()).unwrap();
    host.assert_clean();
}

#[test]
fn image_resize_keeps_aspect_and_bounds() {
    let mut ed = editor();
    let mut host = Host::default();
    let image = ed
        .insert_image(png(300, 200), Placement::floating(0.0, 0.0))
        .unwrap();

    let moves = [
        (Handle::SE, 1000.0, 3.0),
        (Handle::E, -1000.0, 0.0),
        (Handle::S, 0.0, 37.0),
        (Handle::NW, -13.0, 999.0),
        (Handle::W, 77.7, 0.0),
    ];
    for (handle, dx, dy) in moves {
        ed.pointer_down(&mut host, &image.id, GestureKind::Resize(handle), Point::new(400.0, 400.0))
            .unwrap();
        ed.pointer_move(Point::new(400.0 + dx / 2.0, 400.0 + dy / 2.0))
            .unwrap();
        ed.pointer_up(&mut host, Point::new(400.0 + dx, 400.0 + dy))
            .unwrap();

        let (width, height, aspect) = image_size(ed.objects().get(&image.id).unwrap());
        assert!((50.0..=800.0).contains(&width), "width {width}");
        assert_eq!(height, (width / aspect).round());
    }
    host.assert_clean();
}

#[test]
fn image_resize_clamps_to_limits() {
    let mut ed = editor();
    let mut host = Host::default();
    let image = ed
        .insert_image(png(300, 200), Placement::floating(0.0, 0.0))
        .unwrap();
    ed.pointer_down(&mut host, &image.id, GestureKind::Resize(Handle::E), Point::new(0.0, 0.0))
        .unwrap();
    ed.pointer_up(&mut host, Point::new(5000.0, 0.0)).unwrap();
    assert_eq!(image_size(ed.objects().get(&image.id).unwrap()).0, 800.0);

    ed.pointer_down(&mut host, &image.id, GestureKind::Resize(Handle::E), Point::new(0.0, 0.0))
        .unwrap();
    ed.pointer_up(&mut host, Point::new(-5000.0, 0.0)).unwrap();
    let (width, height, _) = image_size(ed.objects().get(&image.id).unwrap());
    assert_eq!((width, height), (50.0, 33.0));
}

#[test]
fn rectangle_edges_resize_one_axis() {
    let mut ed = editor();
    let mut host = Host::default();
    let rect = ed.insert_rectangle(0.0, 0.0);

    ed.pointer_down(&mut host, &rect.id, GestureKind::Resize(Handle::E), Point::new(0.0, 0.0))
        .unwrap();
    ed.pointer_up(&mut host, Point::new(40.0, 300.0)).unwrap();
    assert_eq!(ed.objects().get(&rect.id).unwrap().size(), Some((240.0, 100.0)));

    ed.pointer_down(&mut host, &rect.id, GestureKind::Resize(Handle::SE), Point::new(0.0, 0.0))
        .unwrap();
    ed.pointer_up(&mut host, Point::new(5000.0, -5000.0)).unwrap();
    assert_eq!(ed.objects().get(&rect.id).unwrap().size(), Some((800.0, 20.0)));
    host.assert_clean();
}

#[test]
fn zoom_does_not_change_stored_coordinates() {
    let mut ed = editor();
    let mut host = Host::default();
    let rect = ed.insert_rectangle(50.0, 50.0);
    ed.set_viewport(Viewport {
        origin_x: 200.0,
        origin_y: 100.0,
        zoom: 2.0,
    });
    ed.pointer_down(&mut host, &rect.id, GestureKind::Drag, Point::new(300.0, 200.0))
        .unwrap();
    // 40 screen px at 2x zoom is 20 page px.
    ed.pointer_up(&mut host, Point::new(340.0, 200.0)).unwrap();
    let moved = ed.objects().get(&rect.id).unwrap();
    assert_eq!((moved.x, moved.y), (70.0, 50.0));
}

#[test]
fn capture_loss_commits_the_last_position() {
    let mut ed = editor();
    let mut host = Host::default();
    let rect = ed.insert_rectangle(0.0, 0.0);
    ed.pointer_down(&mut host, &rect.id, GestureKind::Drag, Point::new(0.0, 0.0))
        .unwrap();
    ed.pointer_move(Point::new(25.0, 35.0)).unwrap();
    let commit = ed.capture_lost(&mut host).unwrap();
    assert_eq!((commit.to.x, commit.to.y), (25.0, 35.0));
    assert!(!ed.interaction().is_active());
    host.assert_clean();

    // Events after the gesture ended are ignored.
    ed.pointer_move(Point::new(500.0, 500.0)).unwrap();
    assert_eq!(ed.pointer_up(&mut host, Point::new(1.0, 1.0)).unwrap(), None);
    let moved = ed.objects().get(&rect.id).unwrap();
    assert_eq!((moved.x, moved.y), (25.0, 35.0));
}

#[test]
fn cancel_restores_the_starting_frame() {
    let mut ed = editor();
    let mut host = Host::default();
    let rect = ed.insert_rectangle(60.0, 60.0);
    ed.pointer_down(&mut host, &rect.id, GestureKind::Resize(Handle::SE), Point::new(0.0, 0.0))
        .unwrap();
    ed.pointer_move(Point::new(100.0, 100.0)).unwrap();
    assert_eq!(ed.objects().get(&rect.id).unwrap().size(), Some((300.0, 200.0)));

    ed.cancel_gesture(&mut host).unwrap();
    let restored = ed.objects().get(&rect.id).unwrap();
    assert_eq!(restored.size(), Some((200.0, 100.0)));
    assert_eq!((restored.x, restored.y), (60.0, 60.0));
    host.assert_clean();
}

#[test]
fn pointer_up_releases_even_when_the_object_vanished() {
    let mut ed = editor();
    let mut host = Host::default();
    let rect = ed.insert_rectangle(0.0, 0.0);
    ed.pointer_down(&mut host, &rect.id, GestureKind::Drag, Point::new(0.0, 0.0))
        .unwrap();
    assert!(ed.remove_object(&rect.id));
    assert!(ed.pointer_up(&mut host, Point::new(5.0, 5.0)).is_err());
    host.assert_clean();
    assert!(!ed.interaction().is_active());
}
