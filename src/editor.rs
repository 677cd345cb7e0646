//! The live editing state: page settings, the editing surface holding the
//! flowed content, the object store and the gesture controller.

use chrono::Utc;

use crate::assets::ImageAsset;
use crate::error::Error;
use crate::html::{self, OverlayNode};
use crate::interaction::{GestureCommit, GestureKind, InteractionController, Point, PointerHost};
use crate::markup::EditorSurface;
use crate::model::{DocumentModel, ObjectKind, ObjectMode, ObjectVariant, PageObject, PageSettings, StylePatch};
use crate::page::{Orientation, Viewport};
use crate::serializer;
use crate::store::{NewObject, ObjectStore, Placement, StyleDraft};
use crate::variables::{self, ValueMap};

#[derive(Debug)]
pub struct EditorState<S: EditorSurface> {
    settings: PageSettings,
    surface: S,
    objects: ObjectStore,
    interaction: InteractionController,
}

impl<S: EditorSurface> EditorState<S> {
    /// An empty document on `surface`. Any content already on the surface is cleared.
    pub fn new(mut surface: S) -> Self {
        surface.set_content("");
        Self {
            settings: PageSettings::default(),
            surface,
            objects: ObjectStore::new(),
            interaction: InteractionController::new(),
        }
    }

    pub(crate) fn from_parts(settings: PageSettings, surface: S, objects: ObjectStore) -> Self {
        Self {
            settings,
            surface,
            objects,
            interaction: InteractionController::new(),
        }
    }

    pub fn settings(&self) -> &PageSettings {
        &self.settings
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn interaction(&self) -> &InteractionController {
        &self.interaction
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    fn touch(&mut self) {
        self.settings.updated_at = Utc::now();
    }

    // Page settings

    pub fn set_title(&mut self, title: &str) {
        self.settings.title = title.to_string();
        self.touch();
    }

    /// Accepts `portrait` or `landscape`; anything else is rejected and nothing changes.
    pub fn set_orientation(&mut self, value: &str) -> Result<(), Error> {
        let orientation: Orientation = value.parse()?;
        self.settings.orientation = orientation;
        self.touch();
        Ok(())
    }

    /// Clamped to [0, 50] mm.
    pub fn set_margin_mm(&mut self, margin_mm: f32) {
        self.settings.set_margin_mm(margin_mm);
        self.touch();
    }

    pub fn set_font(&mut self, family: &str, size: f32) {
        if !family.trim().is_empty() {
            self.settings.font_family = family.trim().to_string();
        }
        if size.is_finite() && size > 0.0 {
            self.settings.font_size = size;
        }
        self.touch();
    }

    /// A data URL, file path or remote URL; `None` removes the background.
    pub fn set_background(&mut self, src: Option<&str>) {
        self.settings.background_image = src.map(str::to_string);
        self.touch();
    }

    /// Embeds an image file's bytes as the background.
    pub fn set_background_bytes(&mut self, bytes: Vec<u8>) -> Result<(), Error> {
        let asset = ImageAsset::from_bytes(bytes)?;
        self.settings.background_image = Some(asset.to_data_url());
        self.touch();
        Ok(())
    }

    /// Clamped to [0, 100].
    pub fn set_background_opacity(&mut self, percent: i64) {
        self.settings.set_background_opacity(percent);
        self.touch();
    }

    pub fn set_total_pages(&mut self, pages: u32) {
        self.settings.set_total_pages(pages);
        self.touch();
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.interaction.set_viewport(viewport);
    }

    // Content

    pub fn exec_command(&mut self, command: &str, value: Option<&str>) -> bool {
        self.surface.exec_command(command, value)
    }

    /// Writes `{{key}}` at the caret of the flowed content.
    pub fn insert_variable(&mut self, key: &str) {
        variables::insert_variable(&mut self.surface, key);
        self.touch();
    }

    /// Writes `{{key}}` into a rectangle's text at byte offset `caret`; returns the caret after it.
    pub fn insert_variable_into_rectangle(
        &mut self,
        id: &str,
        caret: usize,
        key: &str,
    ) -> Result<usize, Error> {
        let object = self
            .objects
            .get(id)
            .ok_or_else(|| Error::ObjectNotFound(id.to_string()))?;
        let ObjectKind::Rectangle(rect) = &object.kind else {
            return Err(Error::NoTextField(id.to_string()));
        };
        let mut text = rect.text.clone();
        let caret = variables::insert_into_text(&mut text, caret, key);
        let patch = StylePatch {
            text: Some(text),
            ..StylePatch::default()
        };
        self.objects.update_style(&mut self.surface, id, &patch)?;
        self.touch();
        Ok(caret)
    }

    // Objects

    pub fn insert_table(&mut self, rows: usize, columns: usize, placement: Placement) -> PageObject {
        let object = self
            .objects
            .add(&mut self.surface, NewObject::Table { rows, columns }, placement);
        self.touch();
        object
    }

    /// Decodes the image header for its natural size and embeds the bytes as a data URL.
    pub fn insert_image(&mut self, bytes: Vec<u8>, placement: Placement) -> Result<PageObject, Error> {
        let asset = ImageAsset::from_bytes(bytes)?;
        let (natural_width, natural_height) = asset.dimensions()?;
        let object = self.objects.add(
            &mut self.surface,
            NewObject::Image {
                src: asset.to_data_url(),
                natural_width,
                natural_height,
            },
            placement,
        );
        self.touch();
        Ok(object)
    }

    pub fn insert_rectangle(&mut self, x: f32, y: f32) -> PageObject {
        let object = self.objects.add(
            &mut self.surface,
            NewObject::Rectangle,
            Placement::floating(x, y),
        );
        self.touch();
        object
    }

    pub fn update_placement(&mut self, id: &str, x: f32, y: f32) -> Result<(), Error> {
        self.objects.update_placement(&mut self.surface, id, x, y)?;
        self.touch();
        Ok(())
    }

    pub fn update_style(&mut self, id: &str, patch: &StylePatch) -> Result<(), Error> {
        self.objects.update_style(&mut self.surface, id, patch)?;
        self.touch();
        Ok(())
    }

    pub fn set_mode(&mut self, id: &str, mode: ObjectMode) -> Result<(), Error> {
        self.objects.set_mode(&mut self.surface, id, mode)?;
        self.touch();
        Ok(())
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<(), Error> {
        self.objects.rename(id, name)?;
        self.touch();
        Ok(())
    }

    pub fn select(&mut self, id: Option<&str>) -> bool {
        self.objects.select(id)
    }

    pub fn begin_edit(&self, id: &str) -> Result<StyleDraft, Error> {
        self.objects.begin_edit(id)
    }

    pub fn apply_draft(&mut self, draft: StyleDraft) -> Result<(), Error> {
        self.objects.apply_draft(&mut self.surface, draft)?;
        self.touch();
        Ok(())
    }

    pub fn remove_object(&mut self, id: &str) -> bool {
        if self.interaction.active_object() == Some(id) {
            log::warn!("Removing '{id}' while a gesture is active on it");
        }
        let removed = self.objects.remove(&mut self.surface, id);
        if removed {
            self.touch();
        }
        removed
    }

    pub fn delete_selected(&mut self) -> Option<String> {
        let id = self.objects.selected_id()?.to_string();
        self.remove_object(&id).then_some(id)
    }

    pub fn objects_of(&self, variant: ObjectVariant) -> impl Iterator<Item = &PageObject> {
        self.objects.iter().filter(move |o| o.variant() == variant)
    }

    // Gestures

    pub fn pointer_down(
        &mut self,
        host: &mut dyn PointerHost,
        id: &str,
        kind: GestureKind,
        at: Point,
    ) -> Result<(), Error> {
        self.interaction
            .pointer_down(host, &mut self.objects, id, kind, at)
    }

    pub fn pointer_move(&mut self, at: Point) -> Result<(), Error> {
        self.interaction
            .pointer_move(&mut self.objects, &mut self.surface, at)
    }

    pub fn pointer_up(
        &mut self,
        host: &mut dyn PointerHost,
        at: Point,
    ) -> Result<Option<GestureCommit>, Error> {
        let commit = self
            .interaction
            .pointer_up(host, &mut self.objects, &mut self.surface, at)?;
        if commit.is_some() {
            self.touch();
        }
        Ok(commit)
    }

    pub fn capture_lost(&mut self, host: &mut dyn PointerHost) -> Option<GestureCommit> {
        let commit = self.interaction.capture_lost(host, &self.objects);
        if commit.is_some() {
            self.touch();
        }
        commit
    }

    pub fn cancel_gesture(&mut self, host: &mut dyn PointerHost) -> Result<(), Error> {
        self.interaction
            .cancel(host, &mut self.objects, &mut self.surface)
    }

    // Output

    /// Overlay descriptions for rectangles, in stacking order.
    pub fn overlays(&self) -> Vec<OverlayNode> {
        self.objects
            .iter()
            .filter_map(html::rectangle_overlay)
            .collect()
    }

    pub fn snapshot(&self) -> DocumentModel {
        serializer::serialize(self)
    }

    /// The saved model with `values` substituted. The live state is untouched.
    pub fn resolved(&self, values: &ValueMap) -> DocumentModel {
        variables::resolve(&self.snapshot(), values)
    }

    pub fn render_html(&self, values: &ValueMap) -> String {
        html::render_document(&self.resolved(values))
    }
}
