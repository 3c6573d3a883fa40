// ============================================================================
// TRANSFORM OPERATIONS: affine maths, transformed drawing, lift/bake/merge
// ============================================================================

use egui::{Pos2, Rect, pos2};
use image::Rgba;
use rayon::prelude::*;

use crate::canvas::{BlendMode, CanvasState, Layer, LayerTransform, PixelBuffer, PixelRegion};
use crate::ops::compositor::blend_pixel;

/// 2D affine map `(x, y) → (a·x + c·y + tx, b·x + d·y + ty)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translate(dx: f32, dy: f32) -> Self {
        Affine { tx: dx, ty: dy, ..Self::IDENTITY }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Affine { a: sx, d: sy, ..Self::IDENTITY }
    }

    /// Clockwise on screen, since y points down.
    pub fn rotate_degrees(deg: f32) -> Self {
        let (s, c) = deg.to_radians().sin_cos();
        Affine {
            a: c,
            b: s,
            c: -s,
            d: c,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &Affine) -> Affine {
        let n = next;
        Affine {
            a: n.a * self.a + n.c * self.b,
            b: n.b * self.a + n.d * self.b,
            c: n.a * self.c + n.c * self.d,
            d: n.b * self.c + n.d * self.d,
            tx: n.a * self.tx + n.c * self.ty + n.tx,
            ty: n.b * self.tx + n.d * self.ty + n.ty,
        }
    }

    pub fn invert(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Affine {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }

    pub fn map(&self, p: Pos2) -> Pos2 {
        pos2(
            self.a * p.x + self.c * p.y + self.tx,
            self.b * p.x + self.d * p.y + self.ty,
        )
    }

    /// Axis-aligned bounds of a mapped rectangle.
    pub fn map_bounds(&self, r: Rect) -> Rect {
        let corners = [
            self.map(r.min),
            self.map(pos2(r.max.x, r.min.y)),
            self.map(r.max),
            self.map(pos2(r.min.x, r.max.y)),
        ];
        let mut out = Rect::from_min_max(corners[0], corners[0]);
        for p in &corners[1..] {
            out.extend_with(*p);
        }
        out
    }

    pub fn is_identity(&self) -> bool {
        self.is_axis_aligned()
            && (self.a - 1.0).abs() < 1e-6
            && (self.d - 1.0).abs() < 1e-6
            && self.tx.abs() < 1e-6
            && self.ty.abs() < 1e-6
    }

    /// No rotation or shear (scales and translations only).
    pub fn is_axis_aligned(&self) -> bool {
        self.b.abs() < 1e-6 && self.c.abs() < 1e-6
    }

    /// Pure translation by whole pixels, if that is what this is.
    pub fn integer_translation(&self) -> Option<(i64, i64)> {
        let unit = self.is_axis_aligned() && (self.a - 1.0).abs() < 1e-6 && (self.d - 1.0).abs() < 1e-6;
        let (rx, ry) = (self.tx.round(), self.ty.round());
        if unit && (self.tx - rx).abs() < 1e-4 && (self.ty - ry).abs() < 1e-4 {
            Some((rx as i64, ry as i64))
        } else {
            None
        }
    }
}

/// Layer-local → canvas matrix: `T(x,y)·T(c)·R·S·T(−c)` with `c` the buffer centre.
pub fn layer_matrix(t: &LayerTransform, width: u32, height: u32) -> Affine {
    if t.is_identity() {
        return Affine::IDENTITY;
    }
    let cx = width as f32 * 0.5;
    let cy = height as f32 * 0.5;
    Affine::translate(-cx, -cy)
        .then(&Affine::scale(t.scale_x, t.scale_y))
        .then(&Affine::rotate_degrees(t.rotation))
        .then(&Affine::translate(cx + t.x, cy + t.y))
}

/// Bilinear sample at continuous pixel coordinates (pixel centres sit on
/// integers).  Interpolates in premultiplied space so transparent
/// neighbours don't darken edges; returns straight RGBA in 0..=255.
pub(crate) fn bilinear_sample(raw: &[u8], width: u32, height: u32, x: f32, y: f32) -> [f32; 4] {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i64, sy: i64| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= width as i64 || sy >= height as i64 {
            [0.0; 4]
        } else {
            let i = (sy as usize * width as usize + sx as usize) * 4;
            let a = raw[i + 3] as f32;
            let k = a / 255.0;
            [raw[i] as f32 * k, raw[i + 1] as f32 * k, raw[i + 2] as f32 * k, a]
        }
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        out[c] = lerp(top, bot, fy);
    }
    if out[3] > 0.0 {
        let k = 255.0 / out[3];
        out[0] = (out[0] * k).min(255.0);
        out[1] = (out[1] * k).min(255.0);
        out[2] = (out[2] * k).min(255.0);
    }
    out
}

/// Blend `src`, mapped through `m` (src pixel space → dst pixel space), onto
/// `dst`.  Whole-pixel translations copy exactly; everything else is
/// bilinearly resampled.
pub fn draw_transformed(dst: &mut PixelBuffer, src: &PixelBuffer, m: &Affine, opacity: f32, mode: BlendMode) {
    if opacity <= 0.0 {
        return;
    }
    let Some(region) = PixelRegion::from_rect_clamped(m.map_bounds(src.rect()), dst.width(), dst.height()) else {
        return;
    };

    let dst_w = dst.width() as usize;
    let row_bytes = dst_w * 4;
    let (src_w, src_h) = (src.width(), src.height());
    let src_raw = src.as_raw();
    let (x0, x1) = (region.x as usize, region.max_x() as usize);
    let (y0, y1) = (region.y as usize, region.max_y() as usize);

    if let Some((ox, oy)) = m.integer_translation() {
        dst.as_raw_mut()
            .par_chunks_mut(row_bytes)
            .enumerate()
            .filter(|(y, _)| *y >= y0 && *y < y1)
            .for_each(|(y, row)| {
                let sy = y as i64 - oy;
                for x in x0..x1 {
                    let sx = x as i64 - ox;
                    if sx < 0 || sy < 0 || sx >= src_w as i64 || sy >= src_h as i64 {
                        continue;
                    }
                    let si = (sy as usize * src_w as usize + sx as usize) * 4;
                    let top = Rgba([src_raw[si], src_raw[si + 1], src_raw[si + 2], src_raw[si + 3]]);
                    write_blended(row, x, top, mode, opacity);
                }
            });
        return;
    }

    let Some(inv) = m.invert() else {
        return;
    };
    dst.as_raw_mut()
        .par_chunks_mut(row_bytes)
        .enumerate()
        .filter(|(y, _)| *y >= y0 && *y < y1)
        .for_each(|(y, row)| {
            for x in x0..x1 {
                let s = inv.map(pos2(x as f32 + 0.5, y as f32 + 0.5));
                let p = bilinear_sample(src_raw, src_w, src_h, s.x - 0.5, s.y - 0.5);
                if p[3] < 0.5 {
                    continue;
                }
                let top = Rgba([
                    p[0].round() as u8,
                    p[1].round() as u8,
                    p[2].round() as u8,
                    p[3].round().min(255.0) as u8,
                ]);
                write_blended(row, x, top, mode, opacity);
            }
        });
}

#[inline]
fn write_blended(row: &mut [u8], x: usize, top: Rgba<u8>, mode: BlendMode, opacity: f32) {
    let i = x * 4;
    let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
    let out = blend_pixel(base, top, mode, opacity);
    row[i..i + 4].copy_from_slice(&out.0);
}

// ============================================================================
// LIFT / COMMIT
// ============================================================================

/// Area of the active layer a lift would clear, in that layer's pixel space.
pub fn lift_region(state: &CanvasState) -> Option<PixelRegion> {
    let layer = state.active_layer()?;
    if layer.is_floating || !layer.transform.is_identity() {
        return None;
    }
    state.selection.pixel_bounds(layer.width(), layer.height())
}

/// Move the selected pixels of the active layer onto a new floating layer
/// pushed on top of the stack (and made active).  The source pixels become
/// transparent and the selection is cleared.  Returns the new layer's index.
pub fn lift_selection(state: &mut CanvasState) -> Option<usize> {
    let region = lift_region(state)?;
    let selection = std::mem::take(&mut state.selection);
    let idx = state.active_layer_index;
    let layer = &mut state.layers[idx];
    let layer_w = layer.width();

    let mut floating = PixelBuffer::new(region.width, region.height);
    for y in region.y..region.max_y() {
        for (start, end) in selection.pixel_spans(y, layer_w) {
            let start = start.max(region.x);
            let end = end.min(region.max_x());
            for x in start..end {
                floating.put_pixel(x - region.x, y - region.y, layer.pixels.get_pixel(x, y));
                layer.pixels.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
    }
    layer.touch();

    let new_index = state.insert_layer(
        state.layers.len(),
        Layer::floating(floating, region.x as f32, region.y as f32),
    );
    state.mark_dirty(Some(region.to_rect()));
    Some(new_index)
}

/// What committing the active layer's transform would do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitPlan {
    /// Floating layer at `floating` merges into `target` (= floating − 1).
    Merge { floating: usize, target: usize },
    /// Regular layer with a non-identity transform gets resampled in place.
    Bake(usize),
}

pub fn commit_plan(state: &CanvasState) -> Option<CommitPlan> {
    let idx = state.active_layer_index;
    let layer = state.active_layer()?;
    if layer.is_floating {
        // A floating layer at the bottom has nothing to merge into.
        (idx > 0).then_some(CommitPlan::Merge { floating: idx, target: idx - 1 })
    } else if !layer.transform.is_identity() {
        Some(CommitPlan::Bake(idx))
    } else {
        None
    }
}

/// Render the floating layer at `floating` through its transform (with its
/// opacity and blend mode) onto the layer below, then remove it.  The layer
/// below becomes active.  Returns the target index.
pub fn merge_floating_down(state: &mut CanvasState, floating: usize) -> Option<usize> {
    if floating == 0 || floating >= state.layers.len() || !state.layers[floating].is_floating {
        return None;
    }
    let target = floating - 1;
    let mut m = state.layers[floating].matrix();
    if !state.layers[target].transform.is_identity() {
        m = m.then(&state.layers[target].matrix().invert()?);
    }

    let top = state.layers.remove(floating);
    let below = &mut state.layers[target];
    draw_transformed(&mut below.pixels, &top.pixels, &m, top.opacity, top.blend_mode);
    below.touch();

    let dirty = top.region_to_canvas(top.pixels.bounds());
    state.active_layer_index = target;
    state.mark_dirty(Some(dirty));
    Some(target)
}

/// Resample a transformed layer into a fresh canvas-sized buffer and reset
/// its transform to identity.
pub fn bake_layer_transform(state: &mut CanvasState, idx: usize) -> bool {
    let (cw, ch) = (state.width, state.height);
    let Some(layer) = state.layers.get_mut(idx) else {
        return false;
    };
    if layer.transform.is_identity() {
        return false;
    }
    let before = layer.region_to_canvas(layer.pixels.bounds());
    layer.pixels = bake_pixels(&layer.pixels, &layer.matrix(), cw, ch);
    layer.transform = LayerTransform::IDENTITY;
    layer.touch();
    state.mark_dirty(Some(before));
    state.mark_dirty(None);
    true
}

/// The pixel work of a bake, usable off the main thread.
pub fn bake_pixels(src: &PixelBuffer, m: &Affine, width: u32, height: u32) -> PixelBuffer {
    let mut out = PixelBuffer::new(width, height);
    draw_transformed(&mut out, src, m, 1.0, BlendMode::Normal);
    out
}
