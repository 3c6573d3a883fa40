use egui::{Pos2, Rect, Vec2, pos2, vec2};
use image::Rgba;
use std::collections::HashMap;
use uuid::Uuid;

use crate::canvas::{BlendMode, CanvasState, Layer, LayerRecord, LayerTransform, PixelBuffer, Selection};
use crate::components::history::{HistoryManager, HistoryPatch, HistoryStep};
use crate::components::tools::{
    BrushConfig, Tool, ToolContext, ToolKind, ToolOptions, commit_with_history, create_tool, lift_with_history,
};
use crate::config::EngineConfig;
use crate::error::LayerDataError;
use crate::jobs::{JobOutput, JobQueue, JobResult, JobTarget};
use crate::ops::compositor::Compositor;
use crate::ops::stroke::{StrokeEngine, TipCache, TipShape};

// ============================================================================
// EVENTS AND INPUT TYPES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Drawing,
    Panning,
    ZoomScrub,
    SelectingRect,
    SelectingLasso,
    Transforming,
}

/// Notifications for the UI shell, drained with [`PaintSession::take_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Layer list, order, names or properties changed.
    LayersChanged,
    /// Canvas-space area to recomposite; `None` means everything.
    Recomposite(Option<Rect>),
    ToolChanged(ToolKind),
    ColorPicked([u8; 4]),
    SelectionChanged,
    /// Zoom or pan changed.
    ViewChanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Escape,
    Delete,
    Space,
    Z,
    Y,
    B,
    E,
    G,
    M,
    L,
    V,
    I,
    H,
    BracketLeft,
    BracketRight,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        shift: false,
        alt: false,
    };

    pub fn ctrl() -> Self {
        Modifiers {
            ctrl: true,
            ..Self::NONE
        }
    }

    pub fn ctrl_shift() -> Self {
        Modifiers {
            ctrl: true,
            shift: true,
            alt: false,
        }
    }

    pub fn alt() -> Self {
        Modifiers {
            alt: true,
            ..Self::NONE
        }
    }
}

// ============================================================================
// VIEWPORT
// ============================================================================

/// View transform: the canvas image is centred in the view, shifted by
/// `pan_offset` and scaled by `zoom`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub zoom: f32,
    pub pan_offset: Vec2,
    /// Size of the widget the canvas is shown in.
    pub view_size: Vec2,
    canvas_size: Vec2,
}

impl Viewport {
    /// With the view the size of the canvas, view and canvas coordinates coincide.
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        let canvas_size = vec2(canvas_width as f32, canvas_height as f32);
        Self {
            zoom: 1.0,
            pan_offset: Vec2::ZERO,
            view_size: canvas_size,
            canvas_size,
        }
    }

    fn image_center(&self) -> Pos2 {
        (self.view_size * 0.5 + self.pan_offset).to_pos2()
    }

    pub fn to_world(&self, view: Pos2) -> Pos2 {
        ((view - self.image_center()) / self.zoom + self.canvas_size * 0.5).to_pos2()
    }

    pub fn to_view(&self, world: Pos2) -> Pos2 {
        self.image_center() + (world.to_vec2() - self.canvas_size * 0.5) * self.zoom
    }

    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.pan_offset = Vec2::ZERO;
    }

    /// Change the zoom while `anchor` (view space) stays over the same canvas point.
    pub fn zoom_around(&mut self, new_zoom: f32, anchor: Pos2) {
        let factor = new_zoom / self.zoom;
        let old_center = self.image_center();
        let new_center = anchor + (old_center - anchor) * factor;
        self.pan_offset = new_center - (self.view_size * 0.5).to_pos2();
        self.zoom = new_zoom;
    }
}

/// An in-progress pan or zoom-scrub drag.
struct NavDrag {
    start: Pos2,
    last: Pos2,
    start_zoom: f32,
    /// State to return to when the drag ends.
    resume: SessionState,
}

// ============================================================================
// PAINT SESSION
// ============================================================================

/// One painting document plus the interaction state the shell drives.
pub struct PaintSession {
    pub id: Uuid,
    pub config: EngineConfig,
    pub canvas: CanvasState,
    pub history: HistoryManager,
    pub viewport: Viewport,
    /// Unsaved changes since the shell last called `mark_clean`.
    pub is_dirty: bool,
    brush: BrushConfig,
    /// Brush edits made mid-stroke; applied when the stroke ends.
    pending_brush: Option<BrushConfig>,
    engine: StrokeEngine,
    tips: TipCache,
    compositor: Compositor,
    options: ToolOptions,
    tools: HashMap<ToolKind, Box<dyn Tool>>,
    active_tool: ToolKind,
    state: SessionState,
    modifiers: Modifiers,
    space_held: bool,
    z_held: bool,
    nav: Option<NavDrag>,
    jobs: JobQueue,
    /// Latest composite delivered by a background job.
    display: Option<PixelBuffer>,
    events: Vec<SessionEvent>,
}

fn clamp_pressure(pressure: f32) -> f32 {
    if pressure.is_finite() { pressure.clamp(0.0, 1.0) } else { 1.0 }
}

impl PaintSession {
    pub fn new(config: EngineConfig) -> Self {
        let canvas = CanvasState::new(config.canvas_width, config.canvas_height);
        Self::with_canvas(config, canvas, StrokeEngine::new())
    }

    /// Session whose brush jitter is reproducible.
    pub fn with_seed(config: EngineConfig, seed: u64) -> Self {
        let canvas = CanvasState::new(config.canvas_width, config.canvas_height);
        Self::with_canvas(config, canvas, StrokeEngine::with_seed(seed))
    }

    /// Rebuild a session from layer records, bottom layer first.  An empty
    /// list gives the default two-layer canvas.
    pub fn from_records(config: EngineConfig, records: Vec<LayerRecord>) -> Result<Self, LayerDataError> {
        let layers = records
            .into_iter()
            .map(Layer::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        let canvas = CanvasState::from_layers(config.canvas_width, config.canvas_height, layers)
            .unwrap_or_else(|| CanvasState::new(config.canvas_width, config.canvas_height));
        Ok(Self::with_canvas(config, canvas, StrokeEngine::new()))
    }

    fn with_canvas(config: EngineConfig, canvas: CanvasState, engine: StrokeEngine) -> Self {
        let tools = ToolKind::all()
            .iter()
            .filter_map(|kind| create_tool(*kind).map(|tool| (*kind, tool)))
            .collect();
        let mut brush = BrushConfig::default();
        brush.set_size(brush.size, config.max_brush_size);
        let session = Self {
            id: Uuid::new_v4(),
            history: HistoryManager::new(config.history_limit),
            viewport: Viewport::new(canvas.width, canvas.height),
            is_dirty: false,
            brush,
            pending_brush: None,
            engine,
            tips: TipCache::new(TipShape::default()),
            compositor: Compositor::new(config.background),
            options: ToolOptions {
                fill_tolerance: config.fill_tolerance,
                polygon_lasso: false,
            },
            tools,
            active_tool: ToolKind::default(),
            state: SessionState::Idle,
            modifiers: Modifiers::default(),
            space_held: false,
            z_held: false,
            nav: None,
            jobs: JobQueue::new(),
            display: None,
            events: Vec::new(),
            canvas,
            config,
        };
        log_info!(
            "Session {}: {}x{} canvas, {} layer(s)",
            session.id,
            session.canvas.width,
            session.canvas.height,
            session.canvas.layers.len()
        );
        session
    }

    // ---- plumbing -------------------------------------------------------------

    /// Borrow the tool for `kind` alongside a context over everything else.
    fn split(&mut self, kind: ToolKind) -> (Option<&mut Box<dyn Tool>>, ToolContext<'_>) {
        let ctx = ToolContext {
            canvas: &mut self.canvas,
            history: &mut self.history,
            engine: &mut self.engine,
            tips: &mut self.tips,
            brush: &mut self.brush,
            options: &self.options,
            compositor: &self.compositor,
            modifiers: self.modifiers,
            events: &mut self.events,
        };
        (self.tools.get_mut(&kind), ctx)
    }

    /// Hand an event to the active tool and adopt the state it returns.
    fn run_tool(&mut self, f: impl FnOnce(&mut Box<dyn Tool>, &mut ToolContext) -> SessionState) {
        let kind = self.active_tool;
        let seen = self.events.len();
        let (tool, mut ctx) = self.split(kind);
        let Some(tool) = tool else {
            return;
        };
        let next = f(tool, &mut ctx);
        self.note_changes(seen);
        self.set_state(next);
    }

    /// Run `f` with a tool-less context.
    fn with_context<R>(&mut self, f: impl FnOnce(&mut ToolContext) -> R) -> R {
        let kind = self.active_tool;
        let seen = self.events.len();
        let (_, mut ctx) = self.split(kind);
        let out = f(&mut ctx);
        self.note_changes(seen);
        out
    }

    fn note_changes(&mut self, seen: usize) {
        let changed = self.events[seen.min(self.events.len())..]
            .iter()
            .any(|e| matches!(e, SessionEvent::LayersChanged | SessionEvent::Recomposite(_)));
        if changed {
            self.is_dirty = true;
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == SessionState::Drawing
            && next != SessionState::Drawing
            && let Some(brush) = self.pending_brush.take()
        {
            self.brush = brush;
        }
        self.state = next;
    }

    /// End any drag, stroke, lasso or transform drag in progress.
    fn finish_interaction(&mut self) {
        if let Some(nav) = self.nav.take() {
            self.state = nav.resume;
        }
        if self.state != SessionState::Idle {
            self.run_tool(|tool, ctx| tool.cancel(ctx));
            self.set_state(SessionState::Idle);
        }
    }

    fn layers_changed(&mut self, recomposite: bool) {
        self.events.push(SessionEvent::LayersChanged);
        if recomposite {
            self.canvas.mark_dirty(None);
            self.events.push(SessionEvent::Recomposite(None));
        }
        self.is_dirty = true;
    }

    // ---- pointer input (view coordinates) ---------------------------------------

    pub fn pointer_down(&mut self, x: f32, y: f32, pressure: f32) {
        let view = pos2(x, y);
        let pressure = clamp_pressure(pressure);
        if self.nav.is_some() {
            return;
        }

        let nav_state = if self.space_held || self.active_tool == ToolKind::Pan {
            Some(SessionState::Panning)
        } else if self.z_held || self.active_tool == ToolKind::Zoom {
            Some(SessionState::ZoomScrub)
        } else {
            None
        };
        if let Some(nav_state) = nav_state {
            if self.state == SessionState::Drawing {
                self.finish_interaction();
            }
            self.nav = Some(NavDrag {
                start: view,
                last: view,
                start_zoom: self.viewport.zoom,
                resume: self.state,
            });
            self.state = nav_state;
            return;
        }

        let pos = self.viewport.to_world(view);
        self.run_tool(|tool, ctx| tool.on_pointer_down(ctx, pos, pressure));
    }

    pub fn pointer_move(&mut self, x: f32, y: f32, pressure: f32) {
        let view = pos2(x, y);
        let pressure = clamp_pressure(pressure);
        if let Some(nav) = self.nav.as_mut() {
            match self.state {
                SessionState::Panning => {
                    self.viewport.pan_offset += view - nav.last;
                }
                SessionState::ZoomScrub => {
                    let dx = view.x - nav.start.x;
                    let zoom = self
                        .config
                        .clamp_zoom(nav.start_zoom * (1.0 + dx * self.config.zoom_scrub_sensitivity));
                    let center = (self.viewport.view_size * 0.5).to_pos2();
                    self.viewport.zoom_around(zoom, center);
                }
                _ => {}
            }
            nav.last = view;
            self.events.push(SessionEvent::ViewChanged);
            return;
        }
        // Hover moves only matter mid-interaction.
        if self.state == SessionState::Idle {
            return;
        }
        let pos = self.viewport.to_world(view);
        self.run_tool(|tool, ctx| tool.on_pointer_move(ctx, pos, pressure));
    }

    pub fn pointer_up(&mut self, x: f32, y: f32, pressure: f32) {
        let pressure = clamp_pressure(pressure);
        if let Some(nav) = self.nav.take() {
            self.pointer_move_nav_end(nav, pos2(x, y));
            return;
        }
        if self.state == SessionState::Idle {
            return;
        }
        let pos = self.viewport.to_world(pos2(x, y));
        self.run_tool(|tool, ctx| tool.on_pointer_up(ctx, pos, pressure));
    }

    fn pointer_move_nav_end(&mut self, nav: NavDrag, view: Pos2) {
        let resume = nav.resume;
        self.nav = Some(nav);
        self.pointer_move(view.x, view.y, 1.0);
        self.nav = None;
        self.state = resume;
        log_info!(
            "View: zoom {:.3}, pan ({:.1}, {:.1})",
            self.viewport.zoom,
            self.viewport.pan_offset.x,
            self.viewport.pan_offset.y
        );
    }

    // ---- keyboard -------------------------------------------------------------

    pub fn key_down(&mut self, key: Key, modifiers: Modifiers) {
        self.modifiers = modifiers;
        match key {
            Key::Space => self.space_held = true,
            Key::Z if modifiers.ctrl => {
                if modifiers.shift {
                    self.redo();
                } else {
                    self.undo();
                }
            }
            Key::Y if modifiers.ctrl => {
                self.redo();
            }
            Key::Z => self.z_held = true,
            Key::Enter => {
                let kind = self.active_tool;
                let seen = self.events.len();
                let (tool, mut ctx) = self.split(kind);
                let consumed = tool.and_then(|tool| tool.on_key(&mut ctx, key));
                self.note_changes(seen);
                match consumed {
                    Some(next) => self.set_state(next),
                    None => {
                        self.commit_transform();
                    }
                }
            }
            Key::Escape => {
                self.finish_interaction();
                self.clear_selection();
            }
            Key::Delete => {
                self.delete_active_layer();
            }
            Key::BracketLeft => {
                let size = self.brush().size - self.config.brush_size_step;
                self.set_brush_size(size);
            }
            Key::BracketRight => {
                let size = self.brush().size + self.config.brush_size_step;
                self.set_brush_size(size);
            }
            _ => {
                if !modifiers.ctrl
                    && let Some(kind) = ToolKind::from_key(key)
                {
                    self.set_tool(kind);
                }
            }
        }
    }

    pub fn key_up(&mut self, key: Key, modifiers: Modifiers) {
        self.modifiers = modifiers;
        match key {
            Key::Space => self.space_held = false,
            Key::Z => self.z_held = false,
            _ => {}
        }
    }

    // ---- tools and history ----------------------------------------------------

    pub fn active_tool(&self) -> ToolKind {
        self.active_tool
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_tool(&mut self, kind: ToolKind) {
        if kind == self.active_tool {
            return;
        }
        self.finish_interaction();
        self.active_tool = kind;
        self.events.push(SessionEvent::ToolChanged(kind));
        log_info!("Tool: {}", kind.name());
    }

    pub fn undo(&mut self) -> bool {
        self.finish_interaction();
        match self.history.undo(&mut self.canvas.layers) {
            Some(step) => {
                log_info!("Undo: {}", step.description);
                self.after_replay(step);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        self.finish_interaction();
        match self.history.redo(&mut self.canvas.layers) {
            Some(step) => {
                log_info!("Redo: {}", step.description);
                self.after_replay(step);
                true
            }
            None => false,
        }
    }

    fn after_replay(&mut self, step: HistoryStep) {
        let rect = self
            .canvas
            .layers
            .get(step.layer_index)
            .map(|layer| layer.region_to_canvas(step.region));
        self.canvas.mark_dirty(rect);
        self.events.push(SessionEvent::Recomposite(rect));
        self.is_dirty = true;
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ---- layers ---------------------------------------------------------------

    /// Add a transparent "Layer N" on top and make it active.
    pub fn add_layer(&mut self) -> usize {
        self.finish_interaction();
        let index = self.canvas.add_layer(None);
        self.history.layer_inserted(index);
        log_info!("Layers: added '{}' at {}", self.canvas.layers[index].name, index);
        self.layers_changed(false);
        index
    }

    pub fn delete_active_layer(&mut self) -> bool {
        self.delete_layer(self.canvas.active_layer_index)
    }

    /// Refused (returns `false`) for the last remaining layer.
    pub fn delete_layer(&mut self, index: usize) -> bool {
        self.finish_interaction();
        match self.canvas.remove_layer(index) {
            Some(layer) => {
                self.history.layer_removed(index);
                log_info!("Layers: deleted '{}' at {}", layer.name, index);
                self.layers_changed(true);
                true
            }
            None => {
                log_warn!(
                    "Layers: delete of {} refused ({} layer(s) present)",
                    index,
                    self.canvas.layers.len()
                );
                false
            }
        }
    }

    pub fn set_active_layer(&mut self, index: usize) -> bool {
        if index == self.canvas.active_layer_index {
            return index < self.canvas.layers.len();
        }
        self.finish_interaction();
        if !self.canvas.set_active_layer(index) {
            return false;
        }
        self.events.push(SessionEvent::LayersChanged);
        true
    }

    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        self.finish_interaction();
        if !self.canvas.move_layer(from, to) {
            return false;
        }
        self.history.layer_moved(from, to);
        log_info!("Layers: moved {} -> {}", from, to);
        self.layers_changed(true);
        true
    }

    pub fn set_layer_visibility(&mut self, index: usize, visible: bool) -> bool {
        let Some(layer) = self.canvas.layers.get_mut(index) else {
            return false;
        };
        if layer.visible != visible {
            layer.visible = visible;
            self.layers_changed(true);
        }
        true
    }

    pub fn toggle_layer_visibility(&mut self, index: usize) -> bool {
        match self.canvas.layers.get(index) {
            Some(layer) => {
                let visible = !layer.visible;
                self.set_layer_visibility(index, visible)
            }
            None => false,
        }
    }

    pub fn set_layer_opacity(&mut self, index: usize, opacity: f32) -> bool {
        let Some(layer) = self.canvas.layers.get_mut(index) else {
            return false;
        };
        if opacity.is_finite() {
            layer.opacity = opacity.clamp(0.0, 1.0);
            self.layers_changed(true);
        }
        true
    }

    pub fn set_layer_blend_mode(&mut self, index: usize, mode: BlendMode) -> bool {
        let Some(layer) = self.canvas.layers.get_mut(index) else {
            return false;
        };
        layer.blend_mode = mode;
        self.layers_changed(true);
        true
    }

    pub fn rename_layer(&mut self, index: usize, name: impl Into<String>) -> bool {
        let Some(layer) = self.canvas.layers.get_mut(index) else {
            return false;
        };
        layer.name = name.into();
        self.layers_changed(false);
        true
    }

    pub fn layer_records(&self) -> Vec<LayerRecord> {
        self.canvas.layers.iter().map(Layer::to_record).collect()
    }

    /// Rebuild a layer from raw data and push it on top as the active layer.
    pub fn load_layer(&mut self, record: LayerRecord) -> Result<usize, LayerDataError> {
        let layer = Layer::from_record(record)?;
        self.finish_interaction();
        let index = self.canvas.insert_layer(self.canvas.layers.len(), layer);
        self.history.layer_inserted(index);
        log_info!("Layers: loaded '{}' at {}", self.canvas.layers[index].name, index);
        self.layers_changed(true);
        Ok(index)
    }

    // ---- selection ------------------------------------------------------------

    pub fn selection(&self) -> &Selection {
        &self.canvas.selection
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.canvas.selection = if selection.is_empty() { Selection::None } else { selection };
        self.events.push(SessionEvent::SelectionChanged);
    }

    pub fn select_all(&mut self) {
        let (w, h) = (self.canvas.width as f32, self.canvas.height as f32);
        self.set_selection(Selection::from_drag(Pos2::ZERO, pos2(w, h)));
    }

    pub fn clear_selection(&mut self) {
        if self.canvas.has_selection() {
            self.canvas.clear_selection();
            self.events.push(SessionEvent::SelectionChanged);
        }
    }

    /// In-progress lasso outline (canvas space) for the shell's overlay.
    pub fn lasso_preview(&self) -> &[Pos2] {
        self.tools
            .get(&ToolKind::Lasso)
            .map(|tool| tool.preview_points())
            .unwrap_or(&[])
    }

    // ---- transform ------------------------------------------------------------

    /// Lift the selected pixels of the active layer onto a floating layer.
    pub fn lift_selection(&mut self) -> bool {
        self.finish_interaction();
        self.with_context(lift_with_history)
    }

    /// Replace the active layer's transform (scale is kept above zero).
    pub fn set_active_transform(&mut self, transform: LayerTransform) -> bool {
        let valid = [transform.x, transform.y, transform.rotation, transform.scale_x, transform.scale_y]
            .iter()
            .all(|v| v.is_finite());
        if !valid {
            return false;
        }
        let Some(layer) = self.canvas.get_active_layer_mut() else {
            return false;
        };
        layer.transform = LayerTransform {
            rotation: transform.rotation.rem_euclid(360.0),
            scale_x: transform.scale_x.max(0.01),
            scale_y: transform.scale_y.max(0.01),
            ..transform
        };
        layer.touch();
        self.canvas.mark_dirty(None);
        self.events.push(SessionEvent::Recomposite(None));
        self.is_dirty = true;
        true
    }

    /// Bake the active layer's transform, or merge a floating layer down.
    pub fn commit_transform(&mut self) -> bool {
        self.finish_interaction();
        self.with_context(commit_with_history)
    }

    // ---- brush ----------------------------------------------------------------

    pub fn brush(&self) -> &BrushConfig {
        self.pending_brush.as_ref().unwrap_or(&self.brush)
    }

    /// Setters write to a staged copy while a stroke is in progress.
    fn brush_mut(&mut self) -> &mut BrushConfig {
        if self.state == SessionState::Drawing {
            self.pending_brush.get_or_insert_with(|| self.brush.clone())
        } else {
            &mut self.brush
        }
    }

    pub fn set_brush(&mut self, brush: BrushConfig) {
        let max = self.config.max_brush_size;
        *self.brush_mut() = brush.sanitized(max);
    }

    pub fn set_brush_size(&mut self, size: f32) {
        let max = self.config.max_brush_size;
        self.brush_mut().set_size(size, max);
    }

    pub fn set_brush_color(&mut self, color: [u8; 4]) {
        self.brush_mut().set_color(color);
    }

    /// 0..1, or a percentage when above 1.
    pub fn set_brush_flow(&mut self, flow: f32) {
        self.brush_mut().set_flow(flow);
    }

    pub fn set_brush_spacing(&mut self, spacing: f32) {
        self.brush_mut().set_spacing(spacing);
    }

    pub fn set_jitter_size(&mut self, v: f32) {
        self.brush_mut().set_jitter_size(v);
    }

    pub fn set_jitter_angle(&mut self, v: f32) {
        self.brush_mut().set_jitter_angle(v);
    }

    pub fn set_jitter_flow(&mut self, v: f32) {
        self.brush_mut().set_jitter_flow(v);
    }

    pub fn set_jitter_scatter(&mut self, v: f32) {
        self.brush_mut().set_jitter_scatter(v);
    }

    pub fn set_jitter_hue(&mut self, v: f32) {
        self.brush_mut().set_jitter_hue(v);
    }

    pub fn set_tip_shape(&mut self, shape: TipShape) {
        if self.state == SessionState::Drawing {
            log_warn!("Brush: tip change ignored during a stroke");
            return;
        }
        self.tips.set_shape(shape);
    }

    pub fn set_fill_tolerance(&mut self, tolerance: u8) {
        self.options.fill_tolerance = tolerance;
    }

    pub fn set_polygon_lasso(&mut self, polygon: bool) {
        if self.options.polygon_lasso != polygon {
            if self.active_tool == ToolKind::Lasso {
                self.finish_interaction();
            }
            self.options.polygon_lasso = polygon;
        }
    }

    /// Brush outline radius in view pixels.
    pub fn cursor_radius(&self) -> f32 {
        self.brush().max_reach() * self.viewport.zoom
    }

    // ---- output ---------------------------------------------------------------

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Render the whole canvas on the calling thread.
    pub fn composite(&self) -> PixelBuffer {
        self.compositor
            .render(&self.canvas.layers, self.canvas.width, self.canvas.height)
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    // ---- background jobs --------------------------------------------------------

    pub fn jobs_in_flight(&self) -> usize {
        self.jobs.in_flight()
    }

    /// Render a snapshot of the layer stack on the worker pool.
    pub fn submit_composite(&mut self) -> u64 {
        let layers = self.canvas.layers.clone();
        self.jobs
            .submit_composite(layers, self.canvas.width, self.canvas.height, self.compositor)
    }

    /// Flood fill the active layer at canvas point `(x, y)` off-thread with the
    /// brush colour and current tolerance.
    pub fn submit_fill(&mut self, x: f32, y: f32) -> Option<u64> {
        let color = Rgba(self.brush().color);
        let tolerance = self.options.fill_tolerance;
        let idx = self.canvas.active_layer_index;
        let layer = self.canvas.layers.get(idx).filter(|l| l.visible)?;
        let inverse = layer.matrix().invert()?;
        let local = inverse.map(pos2(x, y));
        let clip = self
            .canvas
            .has_selection()
            .then(|| self.canvas.selection.transformed(&inverse));
        Some(self.jobs.submit_fill(
            idx,
            layer.generation,
            layer.pixels.clone(),
            (local.x.floor() as i64, local.y.floor() as i64),
            color,
            tolerance,
            clip,
        ))
    }

    /// Bake the active layer's transform off-thread.
    pub fn submit_bake(&mut self) -> Option<u64> {
        let idx = self.canvas.active_layer_index;
        let layer = self
            .canvas
            .layers
            .get(idx)
            .filter(|l| !l.is_floating && !l.transform.is_identity())?;
        Some(self.jobs.submit_bake(
            idx,
            layer.generation,
            layer.pixels.clone(),
            layer.matrix(),
            self.canvas.width,
            self.canvas.height,
        ))
    }

    /// Apply whatever jobs have finished.  Returns how many were applied.
    pub fn process_jobs(&mut self) -> usize {
        let results = self.jobs.poll();
        self.apply_all(results)
    }

    /// Block until every job has finished, then apply them.
    pub fn wait_for_jobs(&mut self) -> usize {
        let results = self.jobs.wait();
        self.apply_all(results)
    }

    fn apply_all(&mut self, results: Vec<JobResult>) -> usize {
        results
            .into_iter()
            .map(|result| self.apply_job_result(result))
            .filter(|applied| *applied)
            .count()
    }

    /// Latest composite produced by [`submit_composite`](Self::submit_composite).
    pub fn take_display(&mut self) -> Option<PixelBuffer> {
        self.display.take()
    }

    /// Apply one job result.  Layer results are discarded when the layer's
    /// generation moved on since submission or an operation is recording.
    pub fn apply_job_result(&mut self, result: JobResult) -> bool {
        let idx = match result.target {
            JobTarget::Composite => {
                return match result.output {
                    JobOutput::Composite(buffer) => {
                        self.display = Some(buffer);
                        true
                    }
                    _ => false,
                };
            }
            JobTarget::Layer(idx) => idx,
        };

        let current = self.canvas.layers.get(idx).map(|l| l.generation);
        if current != Some(result.generation) || self.history.is_recording() {
            log_info!(
                "Jobs: stale '{}' result for layer {} discarded",
                result.description,
                idx
            );
            return false;
        }
        let Some(layer) = self.canvas.layers.get_mut(idx) else {
            return false;
        };

        match result.output {
            JobOutput::Fill { before, after, region } => {
                let Some(region) = region else {
                    return false;
                };
                self.history
                    .push_patch(HistoryPatch::from_buffers("Fill", idx, region, &before, &after));
                layer.pixels = after;
                layer.touch();
                let rect = layer.region_to_canvas(region);
                log_info!(
                    "Fill: layer {} touched {}x{} @ ({}, {})",
                    idx,
                    region.width,
                    region.height,
                    region.x,
                    region.y
                );
                self.canvas.mark_dirty(Some(rect));
                self.events.push(SessionEvent::Recomposite(Some(rect)));
            }
            JobOutput::Bake(baked) => {
                let same_size = baked.width() == layer.width() && baked.height() == layer.height();
                let patch = if same_size {
                    HistoryPatch::from_buffers("Commit Transform", idx, baked.bounds(), &layer.pixels, &baked)
                } else {
                    HistoryPatch::whole_buffer("Commit Transform", idx, layer.pixels.clone(), baked.clone())
                };
                self.history.push_patch(patch);
                layer.pixels = baked;
                layer.transform = LayerTransform::IDENTITY;
                layer.touch();
                log_info!("Commit: baked transform of layer {}", idx);
                self.canvas.mark_dirty(None);
                self.events.push(SessionEvent::LayersChanged);
                self.events.push(SessionEvent::Recomposite(None));
            }
            JobOutput::Composite(_) | JobOutput::Failed(_) => return false,
        }
        self.is_dirty = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> PaintSession {
        PaintSession::with_seed(EngineConfig::default().with_canvas_size(40, 30), 7)
    }

    #[test]
    fn viewport_identity_until_moved() {
        let vp = Viewport::new(100, 50);
        assert_eq!(vp.to_world(pos2(10.0, 20.0)), pos2(10.0, 20.0));
    }

    #[test]
    fn viewport_round_trips() {
        let mut vp = Viewport::new(100, 50);
        vp.view_size = vec2(300.0, 200.0);
        vp.pan_offset = vec2(12.0, -4.0);
        vp.zoom = 2.5;
        let p = pos2(33.0, 7.0);
        let back = vp.to_world(vp.to_view(p));
        assert!((back - p).length() < 1e-3);
    }

    #[test]
    fn zoom_around_keeps_anchor_fixed() {
        let mut vp = Viewport::new(100, 100);
        let anchor = pos2(50.0, 50.0);
        let before = vp.to_world(anchor);
        vp.zoom_around(3.0, anchor);
        assert!((vp.to_world(anchor) - before).length() < 1e-3);
    }

    #[test]
    fn space_drag_pans_and_resumes_idle() {
        let mut s = small();
        s.key_down(Key::Space, Modifiers::NONE);
        s.pointer_down(10.0, 10.0, 1.0);
        assert_eq!(s.state(), SessionState::Panning);
        s.pointer_move(15.0, 12.0, 1.0);
        s.pointer_up(20.0, 14.0, 1.0);
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.viewport.pan_offset, vec2(10.0, 4.0));
        // Nothing was painted.
        assert!(!s.can_undo());
    }

    #[test]
    fn zoom_scrub_clamps() {
        let mut s = small();
        s.key_down(Key::Z, Modifiers::NONE);
        s.pointer_down(0.0, 0.0, 1.0);
        assert_eq!(s.state(), SessionState::ZoomScrub);
        s.pointer_move(100_000.0, 0.0, 1.0);
        assert_eq!(s.viewport.zoom, 5.0);
        s.pointer_move(-100_000.0, 0.0, 1.0);
        assert_eq!(s.viewport.zoom, 0.1);
        s.pointer_up(0.0, 0.0, 1.0);
        s.key_up(Key::Z, Modifiers::NONE);
        assert_eq!(s.viewport.zoom, 1.0);
    }

    #[test]
    fn stroke_records_one_patch() {
        let mut s = small();
        s.set_brush_color([255, 0, 0, 255]);
        s.set_brush_size(4.0);
        s.pointer_down(5.0, 5.0, 1.0);
        assert_eq!(s.state(), SessionState::Drawing);
        s.pointer_move(15.0, 5.0, 1.0);
        s.pointer_up(25.0, 5.0, 1.0);
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.history.undo_count(), 1);
        let painted = s.canvas.layers[1].pixels.get_pixel(15, 5);
        assert!(painted[3] > 0 && painted[0] > 200 && painted[1] == 0);
        assert!(s.is_dirty);

        assert!(s.undo());
        assert_eq!(s.canvas.layers[1].pixels.get_pixel(15, 5)[3], 0);
        assert!(s.redo());
        assert_eq!(s.canvas.layers[1].pixels.get_pixel(15, 5), painted);
    }

    #[test]
    fn brush_edits_mid_stroke_wait_for_stroke_end() {
        let mut s = small();
        s.pointer_down(5.0, 5.0, 1.0);
        s.set_brush_size(40.0);
        assert_eq!(s.brush().size, 40.0);
        assert_eq!(s.brush.size, 20.0);
        s.pointer_up(6.0, 5.0, 1.0);
        assert_eq!(s.brush.size, 40.0);
    }

    #[test]
    fn keyboard_shortcuts() {
        let mut s = small();
        s.key_down(Key::G, Modifiers::NONE);
        assert_eq!(s.active_tool(), ToolKind::Fill);
        s.key_down(Key::BracketRight, Modifiers::NONE);
        assert_eq!(s.brush().size, 25.0);
        s.key_down(Key::BracketLeft, Modifiers::NONE);
        s.key_down(Key::BracketLeft, Modifiers::NONE);
        assert_eq!(s.brush().size, 15.0);
        let events = s.take_events();
        assert!(events.contains(&SessionEvent::ToolChanged(ToolKind::Fill)));
    }

    #[test]
    fn delete_refuses_last_layer() {
        let mut s = small();
        assert!(s.delete_active_layer());
        assert!(!s.delete_active_layer());
        assert_eq!(s.canvas.layers.len(), 1);
    }

    #[test]
    fn escape_clears_selection() {
        let mut s = small();
        s.select_all();
        assert!(s.canvas.has_selection());
        s.key_down(Key::Escape, Modifiers::NONE);
        assert!(!s.canvas.has_selection());
    }

    #[test]
    fn stale_fill_job_is_discarded() {
        let mut s = small();
        s.set_brush_color([0, 0, 255, 255]);
        s.submit_fill(3.0, 3.0);
        // Change the layer before the result is applied.
        s.set_active_transform(LayerTransform::translation(1.0, 0.0));
        assert_eq!(s.wait_for_jobs(), 0);
        assert!(!s.can_undo());
    }

    #[test]
    fn fill_job_is_undoable() {
        let mut s = small();
        s.set_brush_color([0, 0, 255, 255]);
        assert!(s.submit_fill(3.0, 3.0).is_some());
        assert_eq!(s.wait_for_jobs(), 1);
        assert_eq!(s.canvas.layers[1].pixels.get_pixel(39, 29), Rgba([0, 0, 255, 255]));
        assert!(s.undo());
        assert_eq!(s.canvas.layers[1].pixels.get_pixel(39, 29)[3], 0);
    }
}
