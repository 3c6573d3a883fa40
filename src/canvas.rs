use egui::{Pos2, Rect, pos2};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Background;
use crate::error::LayerDataError;
use crate::ops::compositor::Compositor;
use crate::ops::transform::{self, Affine};

// ============================================================================
// PIXEL REGION: integer rectangle in some buffer's pixel space
// ============================================================================

/// Pixel-aligned rectangle: `x..x+width`, `y..y+height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Snap a float rect outward to whole pixels and clip it to `width`×`height`.
    /// Returns `None` when nothing of it lies inside.
    pub fn from_rect_clamped(rect: Rect, width: u32, height: u32) -> Option<Self> {
        if !(rect.min.x.is_finite() && rect.min.y.is_finite() && rect.max.x.is_finite() && rect.max.y.is_finite()) {
            return None;
        }
        let min_x = rect.min.x.floor().clamp(0.0, width as f32) as u32;
        let min_y = rect.min.y.floor().clamp(0.0, height as f32) as u32;
        let max_x = rect.max.x.ceil().clamp(0.0, width as f32) as u32;
        let max_y = rect.max.y.ceil().clamp(0.0, height as f32) as u32;
        if max_x <= min_x || max_y <= min_y {
            return None;
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    pub fn max_x(&self) -> u32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.max_x() && y >= self.y && y < self.max_y()
    }

    pub fn union(&self, other: &PixelRegion) -> PixelRegion {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.max_x().max(other.max_x());
        let max_y = self.max_y().max(other.max_y());
        PixelRegion::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn intersect(&self, other: &PixelRegion) -> Option<PixelRegion> {
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());
        if max_x <= min_x || max_y <= min_y {
            return None;
        }
        Some(PixelRegion::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    pub fn to_rect(&self) -> Rect {
        Rect::from_min_max(
            pos2(self.x as f32, self.y as f32),
            pos2(self.max_x() as f32, self.max_y() as f32),
        )
    }
}

/// Grow an optional accumulator by `region`.
pub fn union_regions(acc: Option<PixelRegion>, region: Option<PixelRegion>) -> Option<PixelRegion> {
    match (acc, region) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, None) => a,
        (None, b) => b,
    }
}

// ============================================================================
// SELECTION SYSTEM
// ============================================================================

/// The current selection, in canvas coordinates.  A pixel `(x, y)` is
/// selected when its centre `(x + 0.5, y + 0.5)` lies inside the shape.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Selection {
    #[default]
    None,
    Rect { min_x: f32, min_y: f32, max_x: f32, max_y: f32 },
    /// Closed polygon (lasso), even-odd fill rule.
    Polygon(Vec<Pos2>),
}

impl Selection {
    /// Normalised rectangle spanned by two drag corners.
    pub fn from_drag(a: Pos2, b: Pos2) -> Self {
        Selection::Rect {
            min_x: a.x.min(b.x),
            min_y: a.y.min(b.y),
            max_x: a.x.max(b.x),
            max_y: a.y.max(b.y),
        }
    }

    /// A lasso needs at least three points to enclose anything.
    pub fn polygon(points: Vec<Pos2>) -> Self {
        if points.len() > 2 {
            Selection::Polygon(points)
        } else {
            Selection::None
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selection::None => true,
            Selection::Rect { min_x, min_y, max_x, max_y } => max_x <= min_x || max_y <= min_y,
            Selection::Polygon(points) => points.len() < 3,
        }
    }

    pub fn contains(&self, p: Pos2) -> bool {
        match self {
            Selection::None => false,
            Selection::Rect { min_x, min_y, max_x, max_y } => {
                p.x >= *min_x && p.x < *max_x && p.y >= *min_y && p.y < *max_y
            }
            Selection::Polygon(points) => {
                let mut inside = false;
                let n = points.len();
                let mut j = n.wrapping_sub(1);
                for i in 0..n {
                    let (pi, pj) = (points[i], points[j]);
                    if (pi.y > p.y) != (pj.y > p.y) {
                        let x_cross = pi.x + (p.y - pi.y) * (pj.x - pi.x) / (pj.y - pi.y);
                        if p.x < x_cross {
                            inside = !inside;
                        }
                    }
                    j = i;
                }
                inside
            }
        }
    }

    pub fn contains_pixel(&self, x: u32, y: u32) -> bool {
        self.contains(pos2(x as f32 + 0.5, y as f32 + 0.5))
    }

    /// Horizontal `[start, end)` intervals covered by the shape on row `y`.
    pub fn row_spans(&self, y: f32) -> Vec<(f32, f32)> {
        match self {
            Selection::None => Vec::new(),
            Selection::Rect { min_x, min_y, max_x, max_y } => {
                if y >= *min_y && y < *max_y && max_x > min_x {
                    vec![(*min_x, *max_x)]
                } else {
                    Vec::new()
                }
            }
            Selection::Polygon(points) => {
                let n = points.len();
                if n < 3 {
                    return Vec::new();
                }
                let mut xs: Vec<f32> = Vec::new();
                let mut j = n - 1;
                for i in 0..n {
                    let (pi, pj) = (points[i], points[j]);
                    if (pi.y > y) != (pj.y > y) {
                        xs.push(pi.x + (y - pi.y) * (pj.x - pi.x) / (pj.y - pi.y));
                    }
                    j = i;
                }
                xs.sort_by(|a, b| a.total_cmp(b));
                xs.chunks_exact(2)
                    .filter(|pair| pair[1] > pair[0])
                    .map(|pair| (pair[0], pair[1]))
                    .collect()
            }
        }
    }

    /// Selected pixel columns `[start, end)` on pixel row `y`, clipped to `width`.
    pub fn pixel_spans(&self, y: u32, width: u32) -> Vec<(u32, u32)> {
        self.row_spans(y as f32 + 0.5)
            .into_iter()
            .filter_map(|(a, b)| {
                let start = (a - 0.5).ceil().clamp(0.0, width as f32) as u32;
                let end = (b - 0.5).ceil().clamp(0.0, width as f32) as u32;
                (end > start).then_some((start, end))
            })
            .collect()
    }

    /// Bounding box in canvas coordinates.
    pub fn bounds(&self) -> Option<Rect> {
        if self.is_empty() {
            return None;
        }
        match self {
            Selection::None => None,
            Selection::Rect { min_x, min_y, max_x, max_y } => {
                Some(Rect::from_min_max(pos2(*min_x, *min_y), pos2(*max_x, *max_y)))
            }
            Selection::Polygon(points) => {
                let mut rect = Rect::from_min_max(points[0], points[0]);
                for p in &points[1..] {
                    rect.extend_with(*p);
                }
                Some(rect)
            }
        }
    }

    /// Pixel-aligned bounding box clipped to a `width`×`height` buffer.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<PixelRegion> {
        self.bounds()
            .and_then(|r| PixelRegion::from_rect_clamped(r, width, height))
    }

    /// Map the shape through `m`.  Rectangles survive only translations and
    /// axis-aligned scales; anything else becomes a four-point polygon.
    pub fn transformed(&self, m: &Affine) -> Selection {
        match self {
            Selection::None => Selection::None,
            Selection::Rect { min_x, min_y, max_x, max_y } => {
                let corners = [
                    pos2(*min_x, *min_y),
                    pos2(*max_x, *min_y),
                    pos2(*max_x, *max_y),
                    pos2(*min_x, *max_y),
                ];
                if m.is_axis_aligned() {
                    let a = m.map(corners[0]);
                    let b = m.map(corners[2]);
                    Selection::from_drag(a, b)
                } else {
                    Selection::Polygon(corners.iter().map(|p| m.map(*p)).collect())
                }
            }
            Selection::Polygon(points) => Selection::Polygon(points.iter().map(|p| m.map(*p)).collect()),
        }
    }
}

// ============================================================================
// PIXEL BUFFER: owned straight-alpha RGBA8 storage
// ============================================================================

static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Owned 2D RGBA8 array, straight (non-premultiplied) alpha.  `clone()` is
/// always a deep copy: two buffers never share pixel memory.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    image: RgbaImage,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl PixelBuffer {
    // ---- construction -------------------------------------------------------

    /// Fully transparent buffer.  Zero dimensions are bumped to 1.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width.max(1), height.max(1)),
        }
    }

    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_pixel(width.max(1), height.max(1), color),
        }
    }

    pub fn from_rgba_image(image: RgbaImage) -> Self {
        if image.width() == 0 || image.height() == 0 {
            return Self::new(1, 1);
        }
        Self { image }
    }

    pub fn from_raw_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, LayerDataError> {
        if width == 0 || height == 0 {
            return Err(LayerDataError::ZeroSized { width, height });
        }
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        match RgbaImage::from_raw(width, height, data) {
            Some(image) if actual == expected => Ok(Self { image }),
            _ => Err(LayerDataError::ByteCount {
                width,
                height,
                expected,
                actual,
            }),
        }
    }

    // ---- access -------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bounds(&self) -> PixelRegion {
        PixelRegion::full(self.width(), self.height())
    }

    pub fn rect(&self) -> Rect {
        self.bounds().to_rect()
    }

    /// Out-of-bounds reads return transparent black.
    pub fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        if x < self.width() && y < self.height() {
            *self.image.get_pixel(x, y)
        } else {
            TRANSPARENT_PIXEL
        }
    }

    /// Out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x < self.width() && y < self.height() {
            self.image.put_pixel(x, y, pixel);
        }
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.image.into_raw()
    }

    // ---- bulk operations ----------------------------------------------------

    pub fn fill(&mut self, color: Rgba<u8>) {
        for px in self.image.pixels_mut() {
            *px = color;
        }
    }

    pub fn clear(&mut self) {
        self.fill(TRANSPARENT_PIXEL);
    }

    /// Clear `[min_x, max_x) × [min_y, max_y)` to transparent.
    pub fn clear_region(&mut self, region: PixelRegion) {
        let Some(region) = region.intersect(&self.bounds()) else {
            return;
        };
        let stride = self.width() as usize * 4;
        let raw = self.as_raw_mut();
        for y in region.y..region.max_y() {
            let start = y as usize * stride + region.x as usize * 4;
            let end = start + region.width as usize * 4;
            raw[start..end].fill(0);
        }
    }

    /// Deep copy of `region`.  Parts outside this buffer come back transparent.
    pub fn extract_region(&self, region: PixelRegion) -> PixelBuffer {
        let mut out = PixelBuffer::new(region.width, region.height);
        let Some(visible) = region.intersect(&self.bounds()) else {
            return out;
        };
        let src_stride = self.width() as usize * 4;
        let dst_stride = region.width as usize * 4;
        let row_bytes = visible.width as usize * 4;
        let src = self.as_raw();
        let dst = out.as_raw_mut();
        for y in visible.y..visible.max_y() {
            let s = y as usize * src_stride + visible.x as usize * 4;
            let d = (y - region.y) as usize * dst_stride + (visible.x - region.x) as usize * 4;
            dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
        }
        out
    }

    /// Overwrite pixels with `src` placed at `(dst_x, dst_y)`, clipped to bounds.
    pub fn blit(&mut self, dst_x: i64, dst_y: i64, src: &PixelBuffer) {
        let w = self.width() as i64;
        let h = self.height() as i64;
        let sw = src.width() as i64;
        let sh = src.height() as i64;

        let x0 = dst_x.max(0);
        let y0 = dst_y.max(0);
        let x1 = (dst_x + sw).min(w);
        let y1 = (dst_y + sh).min(h);
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let dst_stride = w as usize * 4;
        let src_stride = sw as usize * 4;
        let row_bytes = (x1 - x0) as usize * 4;
        let src_raw = src.as_raw();
        let dst_raw = self.as_raw_mut();
        for y in y0..y1 {
            let sy = (y - dst_y) as usize;
            let sx = (x0 - dst_x) as usize;
            let s = sy * src_stride + sx * 4;
            let d = y as usize * dst_stride + x0 as usize * 4;
            dst_raw[d..d + row_bytes].copy_from_slice(&src_raw[s..s + row_bytes]);
        }
    }

    /// Pixel memory owned by this buffer.
    pub fn memory_bytes(&self) -> usize {
        self.as_raw().len()
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    Add,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::Add,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::Add => "Add",
        }
    }

    /// Parse a display name; unknown names fall back to Normal.
    pub fn from_name(name: &str) -> Self {
        BlendMode::all()
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .unwrap_or_default()
    }

    /// Stable u8 for hosts that pack layer headers.
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
            BlendMode::Darken => 4,
            BlendMode::Lighten => 5,
            BlendMode::Add => 6,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            4 => BlendMode::Darken,
            5 => BlendMode::Lighten,
            6 => BlendMode::Add,
            _ => BlendMode::Normal,
        }
    }
}

// ============================================================================
// LAYERS
// ============================================================================

/// Placement of a layer's buffer on the canvas.  Rotation and scale pivot on
/// the buffer's own centre; `x`/`y` translate afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerTransform {
    pub x: f32,
    pub y: f32,
    /// Degrees, clockwise on screen (y points down).
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Default for LayerTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LayerTransform {
    pub const IDENTITY: LayerTransform = LayerTransform {
        x: 0.0,
        y: 0.0,
        rotation: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
    };

    pub fn translation(x: f32, y: f32) -> Self {
        Self { x, y, ..Self::IDENTITY }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub pixels: PixelBuffer,
    pub transform: LayerTransform,
    /// Temporary layer produced by a selection lift; merged down on commit.
    pub is_floating: bool,
    /// Replaced whenever THIS layer's pixels or transform change.  Values are
    /// unique across all layers of the process, so a background job that
    /// compares it can't confuse two layers that swapped places in the stack.
    pub generation: u64,
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

impl Layer {
    pub fn new(name: impl Into<String>, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        Self::from_pixels(name, PixelBuffer::new_filled(width, height, fill_color))
    }

    pub fn from_pixels(name: impl Into<String>, pixels: PixelBuffer) -> Self {
        Self {
            name: name.into(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            pixels,
            transform: LayerTransform::IDENTITY,
            is_floating: false,
            generation: next_generation(),
        }
    }

    /// Floating layer placed with its top-left corner at `(x, y)`.
    pub fn floating(pixels: PixelBuffer, x: f32, y: f32) -> Self {
        let mut layer = Self::from_pixels("Floating Object", pixels);
        layer.is_floating = true;
        layer.transform = LayerTransform::translation(x, y);
        layer
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Call after any pixel or transform modification.
    pub fn touch(&mut self) {
        self.generation = next_generation();
    }

    /// Layer-local → canvas matrix.
    pub fn matrix(&self) -> Affine {
        transform::layer_matrix(&self.transform, self.width(), self.height())
    }

    /// Canvas-space bounds of a region of this layer's buffer.
    pub fn region_to_canvas(&self, region: PixelRegion) -> Rect {
        if self.transform.is_identity() {
            return region.to_rect();
        }
        self.matrix().map_bounds(region.to_rect())
    }

    pub fn to_record(&self) -> LayerRecord {
        LayerRecord {
            name: self.name.clone(),
            width: self.width(),
            height: self.height(),
            pixels: self.pixels.as_raw().to_vec(),
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            transform: self.transform,
            visible: self.visible,
        }
    }

    pub fn from_record(record: LayerRecord) -> Result<Self, LayerDataError> {
        let pixels = PixelBuffer::from_raw_rgba(record.width, record.height, record.pixels)?;
        let mut layer = Layer::from_pixels(record.name, pixels);
        layer.opacity = record.opacity.clamp(0.0, 1.0);
        layer.blend_mode = record.blend_mode;
        layer.transform = record.transform;
        layer.visible = record.visible;
        Ok(layer)
    }
}

/// Plain-data form of a layer.  The container format is the host's business;
/// this only guarantees that everything needed to rebuild a layer is here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Straight-alpha RGBA8, row-major, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub transform: LayerTransform,
    pub visible: bool,
}

// ============================================================================
// CANVAS STATE: the layer stack plus ephemeral selection
// ============================================================================

pub struct CanvasState {
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub width: u32,
    pub height: u32,
    pub selection: Selection,
    /// Canvas-space area waiting to be recomposited.
    pub dirty_rect: Option<Rect>,
    /// Monotonically increasing counter, bumped on each mark_dirty call
    pub dirty_generation: u64,
}

impl CanvasState {
    /// Opaque white "Background" plus a transparent "Layer 1", which is active.
    pub fn new(width: u32, height: u32) -> Self {
        let white = Rgba([255, 255, 255, 255]);
        let background = Layer::new("Background", width, height, white);
        let layer1 = Layer::new("Layer 1", width, height, TRANSPARENT_PIXEL);
        Self {
            layers: vec![background, layer1],
            active_layer_index: 1,
            width: width.max(1),
            height: height.max(1),
            selection: Selection::None,
            dirty_rect: None,
            dirty_generation: 0,
        }
    }

    /// Canvas holding exactly the given layers (at least one is required).
    pub fn from_layers(width: u32, height: u32, layers: Vec<Layer>) -> Option<Self> {
        if layers.is_empty() {
            return None;
        }
        let active = layers.len() - 1;
        Some(Self {
            layers,
            active_layer_index: active,
            width: width.max(1),
            height: height.max(1),
            selection: Selection::None,
            dirty_rect: None,
            dirty_generation: 0,
        })
    }

    pub fn full_rect(&self) -> Rect {
        PixelRegion::full(self.width, self.height).to_rect()
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.get(self.active_layer_index)
    }

    pub fn get_active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active_layer_index)
    }

    pub fn mark_dirty(&mut self, rect: Option<Rect>) {
        let full = self.full_rect();
        let new_rect = rect.map(|r| r.intersect(full)).unwrap_or(full);
        // Merge with any existing dirty rect so we never lose pending updates
        self.dirty_rect = Some(match self.dirty_rect {
            Some(existing) => existing.union(new_rect),
            None => new_rect,
        });
        self.dirty_generation = self.dirty_generation.wrapping_add(1);
    }

    pub fn take_dirty(&mut self) -> Option<Rect> {
        self.dirty_rect.take()
    }

    pub fn has_selection(&self) -> bool {
        !self.selection.is_empty()
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::None;
    }

    /// Next free "Layer N" name.
    pub fn next_layer_name(&self) -> String {
        let mut n = self.layers.len();
        loop {
            let name = format!("Layer {}", n);
            if !self.layers.iter().any(|l| l.name == name) {
                return name;
            }
            n += 1;
        }
    }

    /// Push a transparent canvas-sized layer on top and make it active.
    pub fn add_layer(&mut self, name: Option<String>) -> usize {
        let name = name.unwrap_or_else(|| self.next_layer_name());
        let layer = Layer::new(name, self.width, self.height, TRANSPARENT_PIXEL);
        self.insert_layer(self.layers.len(), layer)
    }

    /// Insert at `index` (clamped) and make the new layer active.
    pub fn insert_layer(&mut self, index: usize, layer: Layer) -> usize {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.active_layer_index = index;
        index
    }

    /// Remove a layer.  The last remaining layer is never removed.
    pub fn remove_layer(&mut self, index: usize) -> Option<Layer> {
        if self.layers.len() <= 1 || index >= self.layers.len() {
            return None;
        }
        let removed = self.layers.remove(index);
        if self.active_layer_index > index || self.active_layer_index >= self.layers.len() {
            self.active_layer_index = self.active_layer_index.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn set_active_layer(&mut self, index: usize) -> bool {
        if index < self.layers.len() {
            self.active_layer_index = index;
            true
        } else {
            false
        }
    }

    /// Move a layer within the stack; the active layer follows its content.
    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        let len = self.layers.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let active = self.active_layer_index;
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.active_layer_index = remap_moved_index(active, from, to);
        true
    }

    pub fn composite(&self, background: Background) -> PixelBuffer {
        Compositor::new(background).render(&self.layers, self.width, self.height)
    }
}

/// Where index `i` ends up after the layer at `from` is moved to `to`.
pub fn remap_moved_index(i: usize, from: usize, to: usize) -> usize {
    if i == from {
        to
    } else if from < to && i > from && i <= to {
        i - 1
    } else if to < from && i >= to && i < from {
        i + 1
    } else {
        i
    }
}
