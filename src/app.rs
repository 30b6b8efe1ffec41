// ============================================================================
// EXTRACTION SESSION: drawing state, modes and the mask pipeline
// ============================================================================
//
// `MattingSession` is the single owner of per-image state. The drawing
// surface reports pointer events and completed strokes; the session turns
// them into masks, runs the compositor and keeps both undo stacks.
//
// Operations compute their result first and only then touch session state,
// so a failing operation leaves everything as it was.

use image::{Rgba, RgbaImage};
use uuid::Uuid;

use crate::canvas::{DerivedImage, ImagePlacement, Mask, Operation, Point, Resolution, Viewport};
use crate::components::history::{HistoryManager, ObjectSnapshot, SurfaceState};
use crate::components::tools::{DrawMode, StrokeEvent, StrokePath, StrokeRole};
use crate::error::{MattingError, Result};
use crate::gallery::{Segment, SegmentGallery};
use crate::io::{self, OutputMode};
use crate::ops::classify::{self, ClassHistogram, ClassificationMap, GarmentClass};
use crate::ops::composite::{self, MaskPolicy};
use crate::ops::rasterize::rasterize;
use crate::ops::segmentation::{
    SegmentationService, SegmentationStatus, SegmentationTicket, ServiceError,
};
use crate::ops::upload::UploadService;
use crate::settings::EngineSettings;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Stroke roles consumed by mask extraction and by the eraser pass.
const MASK_ROLES: &[StrokeRole] = &[StrokeRole::BrushAdd, StrokeRole::Erase];
const ERASER_ROLES: &[StrokeRole] = &[StrokeRole::TransparentErase];

/// Pointer input in screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Down(Point),
    Move(Point),
    Up(Point),
    Wheel { delta_y: f32, at: Point },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerOutcome {
    Ignored,
    Panned,
    Zoomed(f32),
    Selected(GarmentClass),
}

pub struct MattingSession {
    settings: EngineSettings,
    surface: Resolution,
    viewport: Viewport,
    mode: DrawMode,
    brush_size: f32,
    pan_anchor: Option<Point>,

    source: Option<DerivedImage>,
    /// Placement of the image currently shown under the strokes.
    background: Option<ImagePlacement>,
    strokes: Vec<StrokePath>,
    next_stamp: u64,

    current: Option<DerivedImage>,
    history: HistoryManager,
    gallery: SegmentGallery,

    classification: Option<ClassificationMap>,
    segmentation: SegmentationStatus,
    /// Bumped whenever the source changes so late service answers are dropped.
    generation: u64,
    next_request: u64,
}

impl Default for MattingSession {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl MattingSession {
    pub fn new(settings: EngineSettings) -> Self {
        let settings = settings.normalized();
        let surface = Resolution::new(settings.surface_width, settings.surface_height);
        Self {
            surface,
            viewport: Viewport::new(settings.zoom_min, settings.zoom_max, settings.wheel_zoom_base),
            mode: DrawMode::default(),
            brush_size: settings.clamp_brush(settings.brush_size),
            pan_anchor: None,
            source: None,
            background: None,
            strokes: Vec::new(),
            next_stamp: 1,
            current: None,
            history: HistoryManager::new(settings.max_undo_steps, settings.max_image_history_bytes()),
            gallery: SegmentGallery::new(),
            classification: None,
            segmentation: SegmentationStatus::Idle,
            generation: 0,
            next_request: 0,
            settings,
        }
    }

    // -- accessors -------------------------------------------------------

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn surface(&self) -> Resolution {
        self.surface
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub fn brush_size(&self) -> f32 {
        self.brush_size
    }

    pub fn source(&self) -> Option<&DerivedImage> {
        self.source.as_ref()
    }

    pub fn current(&self) -> Option<&DerivedImage> {
        self.current.as_ref()
    }

    pub fn background(&self) -> Option<&ImagePlacement> {
        self.background.as_ref()
    }

    pub fn strokes(&self) -> &[StrokePath] {
        &self.strokes
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn gallery(&self) -> &SegmentGallery {
        &self.gallery
    }

    pub fn segmentation_status(&self) -> &SegmentationStatus {
        &self.segmentation
    }

    pub fn classification(&self) -> Option<&ClassificationMap> {
        self.classification.as_ref()
    }

    pub fn class_histogram(&self) -> Option<ClassHistogram> {
        self.classification.as_ref().map(ClassificationMap::histogram)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -- source lifecycle ------------------------------------------------

    /// Replace the source image. Every piece of per-image state is dropped
    /// and any in-flight segmentation becomes stale.
    pub fn load_source(&mut self, image: RgbaImage) -> Result<()> {
        let source = DerivedImage::from_source(image)?;
        let placement = ImagePlacement::fit(source.resolution(), self.surface);
        let initial = ObjectSnapshot::capture(
            "Load image",
            &SurfaceState {
                strokes: Vec::new(),
                background: Some(placement),
            },
        )?;

        self.clear_state();
        log::info!(
            "loaded source {} (generation {})",
            source.resolution(),
            self.generation
        );
        self.source = Some(source);
        self.background = Some(placement);
        self.history.commit_object_state(initial);
        Ok(())
    }

    /// Drop the source and everything derived from it.
    pub fn reset(&mut self) {
        self.clear_state();
        self.source = None;
        self.background = None;
        log::info!("session reset (generation {})", self.generation);
    }

    fn clear_state(&mut self) {
        self.strokes.clear();
        self.current = None;
        self.classification = None;
        self.segmentation = SegmentationStatus::Idle;
        self.history.clear();
        self.gallery.clear();
        self.viewport.reset();
        self.mode = DrawMode::default();
        self.pan_anchor = None;
        self.generation += 1;
    }

    fn source_placement(&self, source: &DerivedImage) -> ImagePlacement {
        ImagePlacement::fit(source.resolution(), self.surface)
    }

    // -- modes and input -------------------------------------------------

    /// Switch draw mode. Entering transparent-erase puts the current
    /// extraction under the strokes; leaving it restores the source.
    pub fn set_mode(&mut self, mode: DrawMode) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        let entering = mode == DrawMode::TransparentErase;
        let leaving = self.mode == DrawMode::TransparentErase;
        if entering || leaving {
            let background = if entering {
                let current = self.current.as_ref().ok_or(MattingError::NoExtraction)?;
                Some(ImagePlacement::fit(current.resolution(), self.surface))
            } else {
                self.source.as_ref().map(|s| self.source_placement(s))
            };
            let strokes = self
                .strokes
                .iter()
                .filter(|s| s.role != StrokeRole::TransparentErase)
                .cloned()
                .collect();
            let label = if entering { "Edit extraction" } else { "Edit source" };
            self.set_surface(SurfaceState { strokes, background }, label)?;
        }
        log::debug!("draw mode {} -> {}", self.mode, mode);
        self.mode = mode;
        self.pan_anchor = None;
        Ok(())
    }

    pub fn set_brush_size(&mut self, size: f32) -> f32 {
        self.brush_size = self.settings.clamp_brush(size);
        self.brush_size
    }

    pub fn on_pointer(&mut self, event: PointerEvent) -> Result<PointerOutcome> {
        match event {
            PointerEvent::Wheel { delta_y, at } => {
                Ok(PointerOutcome::Zoomed(self.viewport.zoom_by_wheel(delta_y, at)))
            }
            PointerEvent::Down(p) => match self.mode {
                DrawMode::Move => {
                    self.pan_anchor = Some(p);
                    Ok(PointerOutcome::Ignored)
                }
                DrawMode::ClassificationClick => {
                    let surface_point = self.viewport.screen_to_surface(p);
                    self.click_select(surface_point).map(PointerOutcome::Selected)
                }
                _ => Ok(PointerOutcome::Ignored),
            },
            PointerEvent::Move(p) => match (self.mode, self.pan_anchor) {
                (DrawMode::Move, Some(anchor)) => {
                    self.viewport.pan_by(p.x - anchor.x, p.y - anchor.y);
                    self.pan_anchor = Some(p);
                    Ok(PointerOutcome::Panned)
                }
                _ => Ok(PointerOutcome::Ignored),
            },
            PointerEvent::Up(_) => {
                self.pan_anchor = None;
                Ok(PointerOutcome::Ignored)
            }
        }
    }

    // -- strokes and object history --------------------------------------

    /// Commit a completed stroke from the drawing surface. Returns its stamp.
    pub fn commit_stroke(&mut self, event: StrokeEvent) -> Result<u64> {
        let mode_role = self
            .mode
            .stroke_role()
            .ok_or(MattingError::WrongMode { mode: self.mode })?;
        let role = event.role.unwrap_or(mode_role);
        if self.source.is_none() {
            return Err(MattingError::NoSourceImage);
        }
        if role == StrokeRole::TransparentErase && self.current.is_none() {
            return Err(MattingError::NoExtraction);
        }
        if event.commands.is_empty() {
            return Err(MattingError::NoStrokes { role });
        }

        let stamp = self.next_stamp;
        let mut strokes = self.strokes.clone();
        strokes.push(StrokePath {
            commands: event.commands,
            width: event.width.unwrap_or(self.brush_size),
            role,
            stamp,
            placement: self.background,
        });
        self.set_surface(
            SurfaceState {
                strokes,
                background: self.background,
            },
            format!("{} stroke", role),
        )?;
        self.next_stamp += 1;
        Ok(stamp)
    }

    /// Remove the newest stroke. In transparent-erase mode the newest
    /// transparent-erase stroke goes first.
    pub fn remove_last_stroke(&mut self) -> Result<Option<StrokePath>> {
        let newest = |only: Option<StrokeRole>| {
            self.strokes
                .iter()
                .enumerate()
                .filter(|(_, s)| only.is_none_or(|r| s.role == r))
                .max_by_key(|(_, s)| s.stamp)
                .map(|(i, _)| i)
        };
        let index = if self.mode == DrawMode::TransparentErase {
            newest(Some(StrokeRole::TransparentErase)).or_else(|| newest(None))
        } else {
            newest(None)
        };
        let Some(index) = index else { return Ok(None) };

        let mut strokes = self.strokes.clone();
        let removed = strokes.remove(index);
        self.set_surface(
            SurfaceState {
                strokes,
                background: self.background,
            },
            "Remove stroke",
        )?;
        Ok(Some(removed))
    }

    /// Restore the previous surface snapshot.
    pub fn undo_object(&mut self) -> Result<()> {
        let state = self.history.undo_object()?.restore()?;
        self.strokes = state.strokes;
        self.background = state.background;
        Ok(())
    }

    /// Re-apply an undone surface snapshot. Returns `false` when there is
    /// nothing to redo.
    pub fn redo_object(&mut self) -> Result<bool> {
        let Some(snapshot) = self.history.redo_object() else { return Ok(false) };
        let state = snapshot.restore()?;
        self.strokes = state.strokes;
        self.background = state.background;
        Ok(true)
    }

    /// Remove every stroke.
    pub fn clear_marks(&mut self) -> Result<usize> {
        let removed = self.strokes.len();
        if removed > 0 {
            self.set_surface(
                SurfaceState {
                    strokes: Vec::new(),
                    background: self.background,
                },
                "Clear marks",
            )?;
        }
        Ok(removed)
    }

    fn set_surface(&mut self, state: SurfaceState, description: impl Into<String>) -> Result<()> {
        let snapshot = ObjectSnapshot::capture(description, &state)?;
        self.history.commit_object_state(snapshot);
        self.strokes = state.strokes;
        self.background = state.background;
        Ok(())
    }

    // -- extraction ------------------------------------------------------

    /// Brush extraction: rasterize brush and erase strokes at the source's
    /// native resolution and keep what they mark. With an extraction already
    /// present, the newly marked source pixels are drawn over it instead.
    pub fn extract(&mut self) -> Result<&DerivedImage> {
        let source = self.source.as_ref().ok_or(MattingError::NoSourceImage)?;
        let placement = self.background.unwrap_or_else(|| self.source_placement(source));
        let paths = self.mask_strokes()?;
        let mask = warn_if_degraded(rasterize(&paths, &placement, source.resolution(), None)?);

        let (result, label) = match &self.current {
            Some(current) => (composite::overlay(current, source, &mask)?, "Overlay"),
            None => (
                composite::apply_filter(source, &mask, MaskPolicy::Filter)?,
                "Brush extraction",
            ),
        };
        self.finish(result, label, Some(MASK_ROLES))
    }

    /// Gate the current extraction (or the source) with the brush strokes.
    pub fn apply_mask(&mut self, policy: MaskPolicy) -> Result<&DerivedImage> {
        let base = self
            .current
            .as_ref()
            .or(self.source.as_ref())
            .ok_or(MattingError::NoSourceImage)?;
        let placement = match (self.background, &self.source) {
            (Some(p), _) => p,
            (None, Some(source)) => self.source_placement(source),
            (None, None) => return Err(MattingError::NoSourceImage),
        };
        let paths = self.mask_strokes()?;
        let mask = warn_if_degraded(rasterize(&paths, &placement, base.resolution(), None)?);
        let result = composite::apply_filter(base, &mask, policy)?;
        let label = match policy {
            MaskPolicy::Filter => "Filter",
            MaskPolicy::Preserve => "Preserve",
        };
        self.finish(result, label, Some(MASK_ROLES))
    }

    fn mask_strokes(&self) -> Result<Vec<StrokePath>> {
        if !self.strokes.iter().any(|s| s.role == StrokeRole::BrushAdd) {
            return Err(MattingError::NoStrokes {
                role: StrokeRole::BrushAdd,
            });
        }
        Ok(self
            .strokes
            .iter()
            .filter(|s| matches!(s.role, StrokeRole::BrushAdd | StrokeRole::Erase))
            .cloned()
            .collect())
    }

    /// Make the pixels under transparent-erase strokes transparent in the
    /// current extraction, at its native resolution.
    pub fn apply_transparent_erase(&mut self) -> Result<&DerivedImage> {
        let current = self.current.as_ref().ok_or(MattingError::NoExtraction)?;
        let paths: Vec<StrokePath> = self
            .strokes
            .iter()
            .filter(|s| s.role == StrokeRole::TransparentErase)
            .cloned()
            .collect();
        let placement = paths
            .iter()
            .find_map(|s| s.placement)
            .unwrap_or_else(|| ImagePlacement::fit(current.resolution(), self.surface));
        if paths.is_empty() {
            return Err(MattingError::NoStrokes {
                role: StrokeRole::TransparentErase,
            });
        }

        let resolution = placement
            .display_resolution()
            .unwrap_or_else(|_| current.resolution());
        let mask = warn_if_degraded(rasterize(&paths, &placement, resolution, None)?);
        let result = composite::apply_erase(current, &mask, &placement)?;
        self.finish(result, "Transparent erase", Some(ERASER_ROLES))
    }

    /// Restore the extraction that the last operation replaced.
    pub fn undo_image(&mut self) -> Result<()> {
        let prior = self.history.pop_image_state()?;
        if self.mode == DrawMode::TransparentErase {
            let strokes = self
                .strokes
                .iter()
                .filter(|s| s.role != StrokeRole::TransparentErase)
                .cloned()
                .collect();
            let background = Some(ImagePlacement::fit(prior.resolution(), self.surface));
            if let Err(e) = self.set_surface(SurfaceState { strokes, background }, "Restore extraction") {
                self.history.push_image_state(prior);
                return Err(e);
            }
        }
        log::info!("restored extraction {}", prior.id());
        self.current = Some(prior);
        Ok(())
    }

    /// Drop the current extraction. It stays on the image history, so
    /// `undo_image` brings it back.
    pub fn clear_result(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Err(MattingError::NoExtraction);
        }
        if self.mode == DrawMode::TransparentErase {
            self.set_mode(DrawMode::BrushAdd)?;
        }
        if let Some(prior) = self.current.take() {
            self.history.push_image_state(prior);
        }
        Ok(())
    }

    /// Install a new current extraction, pushing the one it replaces onto
    /// the image history and consuming the strokes of the given roles.
    fn finish(
        &mut self,
        result: DerivedImage,
        label: &str,
        consumed: Option<&[StrokeRole]>,
    ) -> Result<&DerivedImage> {
        if let Some(roles) = consumed {
            let strokes = self
                .strokes
                .iter()
                .filter(|s| !roles.contains(&s.role))
                .cloned()
                .collect();
            let background = if self.mode == DrawMode::TransparentErase {
                Some(ImagePlacement::fit(result.resolution(), self.surface))
            } else {
                self.background
            };
            self.set_surface(SurfaceState { strokes, background }, label)?;
        }

        if let Some(prior) = self.current.take() {
            self.history.push_image_state(prior);
        }
        self.gallery.add(label, result.clone());
        log::info!(
            "{}: {} with {} visible pixel(s)",
            label,
            result.resolution(),
            result.opaque_count()
        );
        let current: &DerivedImage = self.current.insert(result);
        Ok(current)
    }

    // -- classification --------------------------------------------------

    fn ready_classification(&self) -> Result<ClassificationMap> {
        match (&self.classification, &self.segmentation) {
            (Some(map), _) => Ok(map.clone()),
            (None, SegmentationStatus::Pending { .. }) => Err(MattingError::SegmentationPending),
            (None, SegmentationStatus::Failed { reason }) => {
                Err(MattingError::SegmentationUnavailable {
                    reason: reason.clone(),
                })
            }
            (None, _) => Err(MattingError::SegmentationUnavailable {
                reason: "no segmentation has been requested".into(),
            }),
        }
    }

    /// Select the garment under a surface click.
    pub fn click_select(&mut self, surface_point: Point) -> Result<GarmentClass> {
        if self.mode != DrawMode::ClassificationClick {
            return Err(MattingError::WrongMode { mode: self.mode });
        }
        let map = self.ready_classification()?;
        let source = self.source.as_ref().ok_or(MattingError::NoSourceImage)?;
        let placement = self.background.unwrap_or_else(|| self.source_placement(source));
        let class = classify::classify_point(&map, surface_point, &placement)?;
        self.select_class(class)?;
        Ok(class)
    }

    /// Keep only the pixels of `class`. Pixels already removed from the
    /// current extraction stay removed.
    pub fn select_class(&mut self, class: GarmentClass) -> Result<&DerivedImage> {
        if self.mode == DrawMode::TransparentErase {
            return Err(MattingError::WrongMode { mode: self.mode });
        }
        let map = self.ready_classification()?;
        let base = self
            .current
            .as_ref()
            .or(self.source.as_ref())
            .ok_or(MattingError::NoSourceImage)?;
        let mask = classify::select_by_class(&map, class, Some(base.pixels()))?;
        let result = composite::apply_filter(base, &mask, MaskPolicy::Filter)?
            .relabel(Operation::ClassSelect(class.index()));
        self.finish(result, class.name(), None)
    }

    // -- segmentation lifecycle ------------------------------------------

    /// Start a segmentation request for the current source. A request that
    /// is still pending is superseded.
    pub fn begin_segmentation(&mut self) -> Result<SegmentationTicket> {
        let source = self.source.as_ref().ok_or(MattingError::NoSourceImage)?;
        let source_png = io::encode_png(source.pixels())?;
        if self.segmentation.is_pending() {
            log::info!("superseding pending segmentation request");
        }
        self.next_request += 1;
        self.segmentation = SegmentationStatus::Pending {
            request: self.next_request,
        };
        Ok(SegmentationTicket {
            generation: self.generation,
            request: self.next_request,
            source_png,
        })
    }

    /// Deliver a service answer. Answers for a replaced source or a
    /// superseded request are discarded with `StaleResult`; a failed answer
    /// keeps any classification already held.
    pub fn complete_segmentation(
        &mut self,
        ticket: &SegmentationTicket,
        response: std::result::Result<Option<Vec<u8>>, ServiceError>,
    ) -> Result<&ClassificationMap> {
        let awaited = matches!(
            self.segmentation,
            SegmentationStatus::Pending { request } if request == ticket.request
        );
        if ticket.generation != self.generation || !awaited {
            log::info!(
                "discarding stale segmentation result (request {}, generation {})",
                ticket.request,
                ticket.generation
            );
            return Err(MattingError::StaleResult);
        }

        let outcome = match response {
            Ok(Some(bytes)) => io::decode_rgba(&bytes)
                .and_then(ClassificationMap::new)
                .map_err(|e| e.to_string()),
            Ok(None) => Err("service returned no result".to_string()),
            Err(e) => Err(e.0),
        };

        match outcome {
            Ok(map) => {
                log::info!(
                    "segmentation ready: {} {:?}",
                    map.resolution(),
                    map.histogram()
                );
                self.segmentation = SegmentationStatus::Ready;
                if self.mode != DrawMode::TransparentErase {
                    self.mode = DrawMode::ClassificationClick;
                }
                let map: &ClassificationMap = self.classification.insert(map);
                Ok(map)
            }
            Err(reason) => {
                log::warn!("segmentation failed: {}", reason);
                self.segmentation = SegmentationStatus::Failed {
                    reason: reason.clone(),
                };
                Err(MattingError::SegmentationUnavailable { reason })
            }
        }
    }

    /// Run a whole request against `service`.
    pub async fn run_segmentation<S: SegmentationService>(
        &mut self,
        service: &S,
    ) -> Result<&ClassificationMap> {
        let ticket = self.begin_segmentation()?;
        let response = service.segment(&ticket.source_png).await;
        self.complete_segmentation(&ticket, response)
    }

    // -- gallery and export ----------------------------------------------

    /// Remove one gallery entry. Removing the entry currently shown also
    /// clears the current result.
    pub fn remove_segment(&mut self, id: Uuid) -> Result<Option<Segment>> {
        let Some(image) = self.gallery.get(id).map(|s| s.image.id()) else { return Ok(None) };
        if self.current.as_ref().map(DerivedImage::id) == Some(image) {
            self.clear_result()?;
        }
        Ok(self.gallery.remove(id))
    }

    /// Empty the gallery. This resets the whole session.
    pub fn clear_gallery(&mut self) {
        self.reset();
    }

    /// The current extraction as it would be exported.
    pub fn export_image(&self, mode: OutputMode) -> Result<DerivedImage> {
        let current = self.current.as_ref().ok_or(MattingError::NoExtraction)?;
        Ok(match mode {
            OutputMode::Transparent => current.clone(),
            OutputMode::WhiteBackground => composite::flatten_onto(current, WHITE),
        })
    }

    pub fn export_png(&self, mode: OutputMode) -> Result<Vec<u8>> {
        io::encode_png(self.export_image(mode)?.pixels())
    }

    pub fn export_segment_png(&self, id: Uuid, mode: OutputMode) -> Result<Vec<u8>> {
        let segment = self.gallery.get(id).ok_or(MattingError::NoExtraction)?;
        match mode {
            OutputMode::Transparent => io::encode_png(segment.image.pixels()),
            OutputMode::WhiteBackground => {
                io::encode_png(composite::flatten_onto(&segment.image, WHITE).pixels())
            }
        }
    }

    /// Upload the current extraction flattened onto white; returns its URL.
    pub async fn upload_current<U: UploadService>(&self, uploader: &U) -> Result<String> {
        let current = self.current.as_ref().ok_or(MattingError::NoExtraction)?;
        let png = self.export_png(OutputMode::WhiteBackground)?;
        let name = format!("segment_{}.png", current.id());
        let url = uploader
            .upload(&png, &name)
            .await
            .map_err(|e| MattingError::UploadFailed { reason: e.0 })?;
        log::info!("uploaded {} -> {}", name, url);
        Ok(url)
    }
}

fn warn_if_degraded(mask: Mask) -> Mask {
    if mask.is_degraded() {
        log::warn!("strokes were mapped without a known image size; the mask may be misaligned");
    }
    mask
}
