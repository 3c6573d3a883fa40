use egui::{Pos2, Rect, Vec2};
use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasState, PixelRegion, Selection};
use crate::components::history::HistoryManager;
use crate::ops::compositor::Compositor;
use crate::ops::fill::flood_fill;
use crate::ops::stroke::{StrokeEngine, TipCache};
use crate::ops::transform::{self, Affine, CommitPlan};
use crate::session::{Key, Modifiers, SessionEvent, SessionState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ToolKind {
    #[default]
    Brush,
    Eraser,
    Fill,
    RectSelect,
    Lasso,
    Transform,
    Eyedropper,
    Pan,
    Zoom,
}

impl ToolKind {
    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::Brush,
            ToolKind::Eraser,
            ToolKind::Fill,
            ToolKind::RectSelect,
            ToolKind::Lasso,
            ToolKind::Transform,
            ToolKind::Eyedropper,
            ToolKind::Pan,
            ToolKind::Zoom,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Brush => "Brush",
            ToolKind::Eraser => "Eraser",
            ToolKind::Fill => "Fill",
            ToolKind::RectSelect => "Rectangle Select",
            ToolKind::Lasso => "Lasso",
            ToolKind::Transform => "Transform",
            ToolKind::Eyedropper => "Eyedropper",
            ToolKind::Pan => "Pan",
            ToolKind::Zoom => "Zoom",
        }
    }

    /// Single-letter keyboard shortcut.
    pub fn from_key(key: Key) -> Option<ToolKind> {
        match key {
            Key::B => Some(ToolKind::Brush),
            Key::E => Some(ToolKind::Eraser),
            Key::G => Some(ToolKind::Fill),
            Key::M => Some(ToolKind::RectSelect),
            Key::L => Some(ToolKind::Lasso),
            Key::V => Some(ToolKind::Transform),
            Key::I => Some(ToolKind::Eyedropper),
            Key::H => Some(ToolKind::Pan),
            _ => None,
        }
    }

    /// Pan and Zoom are handled by the session's viewport, not by a `Tool`.
    pub fn is_navigation(&self) -> bool {
        matches!(self, ToolKind::Pan | ToolKind::Zoom)
    }
}

// ============================================================================
// BRUSH CONFIG
// ============================================================================

/// Slack added to the brush's reach for soft edges and resampling.
pub const REACH_MARGIN: f32 = 20.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushConfig {
    /// Diameter in pixels.
    pub size: f32,
    pub color: [u8; 4],
    /// 0..1, per-stamp opacity.
    pub flow: f32,
    /// Stamp spacing as a fraction of `size`.
    pub spacing: f32,
    pub jitter_size: f32,
    pub jitter_angle: f32,
    pub jitter_flow: f32,
    pub jitter_scatter: f32,
    pub jitter_hue: f32,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            size: 20.0,
            color: [0, 0, 0, 255],
            flow: 1.0,
            spacing: 0.1,
            jitter_size: 0.0,
            jitter_angle: 0.0,
            jitter_flow: 0.0,
            jitter_scatter: 0.0,
            jitter_hue: 0.0,
        }
    }
}

fn unit(v: f32, current: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { current }
}

impl BrushConfig {
    pub fn spacing_px(&self) -> f32 {
        (self.size * self.spacing).max(1.0)
    }

    /// Farthest any painted pixel can land from the nominal stroke path.
    pub fn max_reach(&self) -> f32 {
        let size = self.size.max(0.0);
        size + size * 2.0 * self.jitter_scatter.max(0.0) + REACH_MARGIN
    }

    pub fn set_size(&mut self, size: f32, max_size: f32) {
        if size.is_finite() {
            self.size = size.clamp(1.0, max_size.max(1.0));
        }
    }

    /// Accepts 0..1 or a 0..100 percentage.
    pub fn set_flow(&mut self, flow: f32) {
        let flow = if flow > 1.0 { flow / 100.0 } else { flow };
        self.flow = unit(flow, self.flow);
    }

    pub fn set_spacing(&mut self, spacing: f32) {
        if spacing.is_finite() {
            self.spacing = spacing.clamp(0.01, 10.0);
        }
    }

    pub fn set_color(&mut self, color: [u8; 4]) {
        self.color = color;
    }

    pub fn set_jitter_size(&mut self, v: f32) {
        self.jitter_size = unit(v, self.jitter_size);
    }

    pub fn set_jitter_angle(&mut self, v: f32) {
        self.jitter_angle = unit(v, self.jitter_angle);
    }

    pub fn set_jitter_flow(&mut self, v: f32) {
        self.jitter_flow = unit(v, self.jitter_flow);
    }

    pub fn set_jitter_scatter(&mut self, v: f32) {
        self.jitter_scatter = unit(v, self.jitter_scatter);
    }

    pub fn set_jitter_hue(&mut self, v: f32) {
        self.jitter_hue = unit(v, self.jitter_hue);
    }

    /// Copy with every field forced into range, for presets from disk and
    /// configs built without the setters.
    pub fn sanitized(&self, max_size: f32) -> Self {
        let mut out = BrushConfig {
            color: self.color,
            ..BrushConfig::default()
        };
        out.set_size(self.size, max_size);
        out.set_flow(self.flow);
        out.set_spacing(self.spacing);
        out.set_jitter_size(self.jitter_size);
        out.set_jitter_angle(self.jitter_angle);
        out.set_jitter_flow(self.jitter_flow);
        out.set_jitter_scatter(self.jitter_scatter);
        out.set_jitter_hue(self.jitter_hue);
        out
    }
}

// ============================================================================
// TOOL TRAIT
// ============================================================================

/// Per-session tool settings that aren't part of the brush.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOptions {
    pub fill_tolerance: u8,
    /// Lasso clicks place polygon vertices instead of tracing freehand.
    pub polygon_lasso: bool,
}

/// Everything a tool may touch while handling one event.
pub struct ToolContext<'a> {
    pub canvas: &'a mut CanvasState,
    pub history: &'a mut HistoryManager,
    pub engine: &'a mut StrokeEngine,
    pub tips: &'a mut TipCache,
    pub brush: &'a mut BrushConfig,
    pub options: &'a ToolOptions,
    pub compositor: &'a Compositor,
    pub modifiers: Modifiers,
    pub events: &'a mut Vec<SessionEvent>,
}

/// A painting or selection tool.  Positions are canvas coordinates; each
/// handler returns the state the session should be in afterwards.
pub trait Tool: Send {
    fn kind(&self) -> ToolKind;

    fn on_pointer_down(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState;

    fn on_pointer_move(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState;

    fn on_pointer_up(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState;

    /// `Some(state)` if the tool consumed the key.
    fn on_key(&mut self, _ctx: &mut ToolContext, _key: Key) -> Option<SessionState> {
        None
    }

    /// Finish or abandon whatever is in progress (tool switch, Escape, undo).
    fn cancel(&mut self, _ctx: &mut ToolContext) -> SessionState {
        SessionState::Idle
    }

    /// In-progress lasso outline, for the shell's overlay.
    fn preview_points(&self) -> &[Pos2] {
        &[]
    }
}

pub fn create_tool(kind: ToolKind) -> Option<Box<dyn Tool>> {
    match kind {
        ToolKind::Brush => Some(Box::new(BrushTool::brush())),
        ToolKind::Eraser => Some(Box::new(BrushTool::eraser())),
        ToolKind::Fill => Some(Box::new(FillTool)),
        ToolKind::RectSelect => Some(Box::new(RectSelectTool::default())),
        ToolKind::Lasso => Some(Box::new(LassoTool::default())),
        ToolKind::Transform => Some(Box::new(TransformTool::default())),
        ToolKind::Eyedropper => Some(Box::new(EyedropperTool)),
        ToolKind::Pan | ToolKind::Zoom => None,
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Active layer index and its canvas → layer matrix, if it can be painted on.
fn paint_target(canvas: &CanvasState) -> Option<(usize, Affine)> {
    let idx = canvas.active_layer_index;
    let layer = canvas.layers.get(idx)?;
    if !layer.visible {
        return None;
    }
    Some((idx, layer.matrix().invert()?))
}

fn local_clip(canvas: &CanvasState, inverse: &Affine) -> Option<Selection> {
    canvas.has_selection().then(|| canvas.selection.transformed(inverse))
}

fn reach_rect(a: Pos2, b: Pos2, reach: f32) -> Rect {
    Rect::from_two_pos(a, b).expand(reach)
}

/// Record that `region` of layer `idx` changed.
fn layer_pixels_changed(ctx: &mut ToolContext, idx: usize, region: PixelRegion) {
    let Some(layer) = ctx.canvas.layers.get_mut(idx) else {
        return;
    };
    layer.touch();
    let rect = layer.region_to_canvas(region);
    ctx.canvas.mark_dirty(Some(rect));
    ctx.events.push(SessionEvent::Recomposite(Some(rect)));
}

/// Move the selected pixels of the active layer onto a floating layer, with
/// the source clearing recorded in history.
pub(crate) fn lift_with_history(ctx: &mut ToolContext) -> bool {
    let Some(layer) = ctx.canvas.active_layer() else {
        return false;
    };
    if layer.is_floating || !ctx.canvas.has_selection() {
        return false;
    }
    if !layer.transform.is_identity() {
        commit_with_history(ctx);
    }

    let idx = ctx.canvas.active_layer_index;
    let Some(region) = transform::lift_region(ctx.canvas) else {
        return false;
    };
    ctx.history.begin_patch(&ctx.canvas.layers, idx, region.to_rect(), "Lift Selection");
    match transform::lift_selection(ctx.canvas) {
        Some(new_index) => {
            ctx.history.end_patch(&ctx.canvas.layers);
            ctx.history.layer_inserted(new_index);
            log_info!(
                "Lift: {}x{} from layer {} to floating layer {}",
                region.width,
                region.height,
                idx,
                new_index
            );
            ctx.events.push(SessionEvent::LayersChanged);
            ctx.events.push(SessionEvent::SelectionChanged);
            ctx.events.push(SessionEvent::Recomposite(Some(region.to_rect())));
            true
        }
        None => {
            ctx.history.cancel_patch();
            false
        }
    }
}

/// Bake the active layer's transform, or merge a floating layer down.
pub(crate) fn commit_with_history(ctx: &mut ToolContext) -> bool {
    match transform::commit_plan(ctx.canvas) {
        None => false,
        Some(CommitPlan::Bake(idx)) => {
            let rect = ctx.canvas.layers[idx].pixels.rect();
            ctx.history.begin_patch(&ctx.canvas.layers, idx, rect, "Commit Transform");
            if !transform::bake_layer_transform(ctx.canvas, idx) {
                ctx.history.cancel_patch();
                return false;
            }
            ctx.history.end_patch(&ctx.canvas.layers);
            log_info!("Commit: baked transform of layer {}", idx);
            ctx.events.push(SessionEvent::LayersChanged);
            ctx.events.push(SessionEvent::Recomposite(None));
            true
        }
        Some(CommitPlan::Merge { floating, target }) => {
            let rect = {
                let top = &ctx.canvas.layers[floating];
                let below = &ctx.canvas.layers[target];
                if below.transform.is_identity() {
                    // The merge only writes under the floating layer, so its bounds cover every change
                    top.region_to_canvas(top.pixels.bounds()).expand(1.0)
                } else {
                    below.pixels.rect()
                }
            };
            ctx.history.begin_patch(&ctx.canvas.layers, target, rect, "Merge Floating Layer");
            if transform::merge_floating_down(ctx.canvas, floating).is_none() {
                ctx.history.cancel_patch();
                return false;
            }
            ctx.history.end_patch(&ctx.canvas.layers);
            ctx.history.layer_removed(floating);
            log_info!("Commit: merged floating layer {} into layer {}", floating, target);
            ctx.events.push(SessionEvent::LayersChanged);
            ctx.events.push(SessionEvent::Recomposite(None));
            true
        }
    }
}

/// Starting a new selection anchors any floating layer first.
fn anchor_floating(ctx: &mut ToolContext) {
    if ctx.canvas.active_layer().is_some_and(|l| l.is_floating) {
        commit_with_history(ctx);
    }
}

// ============================================================================
// BRUSH / ERASER
// ============================================================================

struct ActiveStroke {
    layer_index: usize,
    inverse: Affine,
    clip: Option<Selection>,
    reach: f32,
    last: Pos2,
    last_pressure: f32,
}

pub struct BrushTool {
    eraser: bool,
    stroke: Option<ActiveStroke>,
}

impl BrushTool {
    pub fn brush() -> Self {
        Self { eraser: false, stroke: None }
    }

    pub fn eraser() -> Self {
        Self { eraser: true, stroke: None }
    }

    fn paint_to(&mut self, ctx: &mut ToolContext, local: Pos2, pressure: f32) {
        let Some(stroke) = self.stroke.as_mut() else {
            return;
        };
        ctx.history.grow_patch(reach_rect(stroke.last, local, stroke.reach));

        let stamp = ctx.tips.stamp(ctx.brush);
        let Some(layer) = ctx.canvas.layers.get_mut(stroke.layer_index) else {
            return;
        };
        let dirty = ctx.engine.draw_segment(
            &mut layer.pixels,
            ctx.brush,
            stamp,
            stroke.last,
            local,
            stroke.last_pressure,
            pressure,
            self.eraser,
            stroke.clip.as_ref(),
        );
        stroke.last = local;
        stroke.last_pressure = pressure;
        let idx = stroke.layer_index;
        if let Some(region) = dirty {
            layer_pixels_changed(ctx, idx, region);
        }
    }

    fn finish(&mut self, ctx: &mut ToolContext) {
        if self.stroke.take().is_some() {
            ctx.history.end_patch(&ctx.canvas.layers);
        }
    }
}

impl Tool for BrushTool {
    fn kind(&self) -> ToolKind {
        if self.eraser { ToolKind::Eraser } else { ToolKind::Brush }
    }

    fn on_pointer_down(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState {
        self.finish(ctx);
        let Some((idx, inverse)) = paint_target(ctx.canvas) else {
            return SessionState::Idle;
        };
        let local = inverse.map(pos);
        let reach = ctx.brush.max_reach();
        let description = if self.eraser { "Eraser" } else { "Brush Stroke" };
        ctx.history.begin_patch(&ctx.canvas.layers, idx, reach_rect(local, local, reach), description);
        ctx.engine.begin_stroke();

        self.stroke = Some(ActiveStroke {
            layer_index: idx,
            inverse,
            clip: local_clip(ctx.canvas, &inverse),
            reach,
            last: local,
            last_pressure: pressure,
        });
        self.paint_to(ctx, local, pressure);
        SessionState::Drawing
    }

    fn on_pointer_move(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState {
        let Some(inverse) = self.stroke.as_ref().map(|s| s.inverse) else {
            return SessionState::Idle;
        };
        self.paint_to(ctx, inverse.map(pos), pressure);
        SessionState::Drawing
    }

    fn on_pointer_up(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState {
        if let Some(stroke) = self.stroke.as_ref() {
            let local = stroke.inverse.map(pos);
            // A repeat of the last sample would count as a second tap.
            if (local - stroke.last).length() >= 0.001 {
                self.paint_to(ctx, local, pressure);
            }
        }
        self.finish(ctx);
        SessionState::Idle
    }

    fn cancel(&mut self, ctx: &mut ToolContext) -> SessionState {
        self.finish(ctx);
        SessionState::Idle
    }
}

// ============================================================================
// FILL
// ============================================================================

pub struct FillTool;

impl Tool for FillTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Fill
    }

    fn on_pointer_down(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        let Some((idx, inverse)) = paint_target(ctx.canvas) else {
            return SessionState::Idle;
        };
        let local = inverse.map(pos);
        let seed = (local.x.floor() as i64, local.y.floor() as i64);
        let clip = local_clip(ctx.canvas, &inverse);
        let full = ctx.canvas.layers[idx].pixels.rect();

        ctx.history.begin_patch(&ctx.canvas.layers, idx, full, "Fill");
        let layer = &mut ctx.canvas.layers[idx];
        let filled = flood_fill(
            &mut layer.pixels,
            seed,
            Rgba(ctx.brush.color),
            ctx.options.fill_tolerance,
            clip.as_ref(),
        );
        match filled {
            Some(region) => {
                ctx.history.restrict_patch(region.to_rect());
                ctx.history.end_patch(&ctx.canvas.layers);
                log_info!(
                    "Fill: layer {} at ({}, {}) touched {}x{} @ ({}, {})",
                    idx,
                    seed.0,
                    seed.1,
                    region.width,
                    region.height,
                    region.x,
                    region.y
                );
                layer_pixels_changed(ctx, idx, region);
            }
            None => ctx.history.cancel_patch(),
        }
        SessionState::Idle
    }

    fn on_pointer_move(&mut self, _ctx: &mut ToolContext, _pos: Pos2, _pressure: f32) -> SessionState {
        SessionState::Idle
    }

    fn on_pointer_up(&mut self, _ctx: &mut ToolContext, _pos: Pos2, _pressure: f32) -> SessionState {
        SessionState::Idle
    }
}

// ============================================================================
// SELECTION TOOLS
// ============================================================================

#[derive(Default)]
pub struct RectSelectTool {
    anchor: Option<Pos2>,
}

impl RectSelectTool {
    fn drag_to(&mut self, ctx: &mut ToolContext, pos: Pos2) {
        if let Some(anchor) = self.anchor {
            ctx.canvas.selection = Selection::from_drag(anchor, pos);
            ctx.events.push(SessionEvent::SelectionChanged);
        }
    }
}

impl Tool for RectSelectTool {
    fn kind(&self) -> ToolKind {
        ToolKind::RectSelect
    }

    fn on_pointer_down(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        anchor_floating(ctx);
        self.anchor = Some(pos);
        self.drag_to(ctx, pos);
        SessionState::SelectingRect
    }

    fn on_pointer_move(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        if self.anchor.is_none() {
            return SessionState::Idle;
        }
        self.drag_to(ctx, pos);
        SessionState::SelectingRect
    }

    fn on_pointer_up(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        self.drag_to(ctx, pos);
        self.anchor = None;
        if ctx.canvas.selection.is_empty() {
            ctx.canvas.clear_selection();
        }
        SessionState::Idle
    }

    fn cancel(&mut self, _ctx: &mut ToolContext) -> SessionState {
        self.anchor = None;
        SessionState::Idle
    }
}

#[derive(Default)]
pub struct LassoTool {
    points: Vec<Pos2>,
    tracing: bool,
}

impl LassoTool {
    fn close(&mut self, ctx: &mut ToolContext) {
        self.tracing = false;
        ctx.canvas.selection = Selection::polygon(std::mem::take(&mut self.points));
        ctx.events.push(SessionEvent::SelectionChanged);
    }
}

impl Tool for LassoTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Lasso
    }

    fn on_pointer_down(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        if self.points.is_empty() {
            anchor_floating(ctx);
        }
        if ctx.options.polygon_lasso {
            self.points.push(pos);
        } else {
            self.points = vec![pos];
            self.tracing = true;
        }
        SessionState::SelectingLasso
    }

    fn on_pointer_move(&mut self, _ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        if self.tracing {
            if self.points.last().is_none_or(|last| (pos - *last).length() >= 0.5) {
                self.points.push(pos);
            }
            SessionState::SelectingLasso
        } else if self.points.is_empty() {
            SessionState::Idle
        } else {
            SessionState::SelectingLasso
        }
    }

    fn on_pointer_up(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState {
        if self.tracing {
            self.on_pointer_move(ctx, pos, pressure);
            self.close(ctx);
            SessionState::Idle
        } else if self.points.is_empty() {
            SessionState::Idle
        } else {
            SessionState::SelectingLasso
        }
    }

    fn on_key(&mut self, ctx: &mut ToolContext, key: Key) -> Option<SessionState> {
        if key == Key::Enter && !self.tracing && !self.points.is_empty() {
            self.close(ctx);
            return Some(SessionState::Idle);
        }
        None
    }

    fn cancel(&mut self, _ctx: &mut ToolContext) -> SessionState {
        self.points.clear();
        self.tracing = false;
        SessionState::Idle
    }

    fn preview_points(&self) -> &[Pos2] {
        &self.points
    }
}

// ============================================================================
// TRANSFORM
// ============================================================================

/// Degrees of rotation per pixel of horizontal drag (Alt held).
const ROTATE_PER_PX: f32 = 0.5;
/// Scale change per pixel of horizontal drag (Ctrl held).
const SCALE_PER_PX: f32 = 0.01;
const MIN_SCALE: f32 = 0.01;

#[derive(Default)]
pub struct TransformTool {
    last: Option<Pos2>,
}

impl TransformTool {
    fn drag_by(&self, ctx: &mut ToolContext, delta: Vec2) {
        let mods = ctx.modifiers;
        let Some(layer) = ctx.canvas.get_active_layer_mut() else {
            return;
        };
        let t = &mut layer.transform;
        if mods.alt {
            t.rotation = (t.rotation + delta.x * ROTATE_PER_PX).rem_euclid(360.0);
        } else if mods.ctrl {
            t.scale_x = (t.scale_x + delta.x * SCALE_PER_PX).max(MIN_SCALE);
            t.scale_y = (t.scale_y + delta.x * SCALE_PER_PX).max(MIN_SCALE);
        } else {
            t.x += delta.x;
            t.y += delta.y;
        }
        layer.touch();
        ctx.canvas.mark_dirty(None);
        ctx.events.push(SessionEvent::Recomposite(None));
    }
}

impl Tool for TransformTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Transform
    }

    fn on_pointer_down(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        // The lift clears the selection, so this happens once per lift.
        if ctx.canvas.has_selection() && ctx.canvas.active_layer().is_some_and(|l| !l.is_floating) {
            lift_with_history(ctx);
        }
        self.last = Some(pos);
        SessionState::Transforming
    }

    fn on_pointer_move(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        if let Some(last) = self.last {
            self.drag_by(ctx, pos - last);
            self.last = Some(pos);
        }
        SessionState::Transforming
    }

    fn on_pointer_up(&mut self, ctx: &mut ToolContext, pos: Pos2, pressure: f32) -> SessionState {
        self.on_pointer_move(ctx, pos, pressure);
        self.last = None;
        SessionState::Transforming
    }

    fn on_key(&mut self, ctx: &mut ToolContext, key: Key) -> Option<SessionState> {
        if key == Key::Enter {
            self.last = None;
            commit_with_history(ctx);
            return Some(SessionState::Idle);
        }
        None
    }

    fn cancel(&mut self, _ctx: &mut ToolContext) -> SessionState {
        self.last = None;
        SessionState::Idle
    }
}

// ============================================================================
// EYEDROPPER
// ============================================================================

pub struct EyedropperTool;

impl Tool for EyedropperTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Eyedropper
    }

    fn on_pointer_down(&mut self, ctx: &mut ToolContext, pos: Pos2, _pressure: f32) -> SessionState {
        let (x, y) = (pos.x.floor(), pos.y.floor());
        if x < 0.0 || y < 0.0 || x >= ctx.canvas.width as f32 || y >= ctx.canvas.height as f32 {
            return SessionState::Idle;
        }
        let picked = ctx.compositor.sample(&ctx.canvas.layers, x as u32, y as u32);
        if picked[3] > 0 {
            ctx.brush.color = picked.0;
            ctx.events.push(SessionEvent::ColorPicked(picked.0));
        }
        SessionState::Idle
    }

    fn on_pointer_move(&mut self, _ctx: &mut ToolContext, _pos: Pos2, _pressure: f32) -> SessionState {
        SessionState::Idle
    }

    fn on_pointer_up(&mut self, _ctx: &mut ToolContext, _pos: Pos2, _pressure: f32) -> SessionState {
        SessionState::Idle
    }
}
