// ============================================================================
// STROKE ENGINE: pointer path + pressure → spaced, jittered brush stamps
// ============================================================================

use egui::{Pos2, pos2};
use image::{Rgba, imageops};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::canvas::{BlendMode, PixelBuffer, PixelRegion, Selection, union_regions};
use crate::components::colors::shift_hue;
use crate::components::tools::BrushConfig;
use crate::ops::compositor::blend_pixel;
use crate::ops::transform::{Affine, bilinear_sample};

/// Segments shorter than this count as a tap.
const TAP_EPSILON: f32 = 0.001;

// ---------------------------------------------------------------------------
// Brush tips
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Default)]
pub enum TipShape {
    /// Procedural round tip: opaque centre fading linearly to a transparent rim.
    #[default]
    Soft,
    /// User-supplied image.  Its alpha channel is the stamp shape; the colour
    /// comes from the brush.
    Bitmap(PixelBuffer),
}

/// Render a `size`-pixel tip tinted with `color`.  The stamp's alpha is the
/// tip shape multiplied by the colour's alpha.
pub fn render_tip(shape: &TipShape, size: f32, color: [u8; 4]) -> PixelBuffer {
    let d = size.ceil().max(1.0) as u32;
    let color_a = color[3] as f32 / 255.0;
    match shape {
        TipShape::Soft => {
            let mut out = PixelBuffer::new(d, d);
            let r = d as f32 * 0.5;
            for y in 0..d {
                for x in 0..d {
                    let dx = x as f32 + 0.5 - r;
                    let dy = y as f32 + 0.5 - r;
                    let t = (dx * dx + dy * dy).sqrt() / r;
                    if t < 1.0 {
                        let a = ((1.0 - t) * color_a * 255.0).round() as u8;
                        out.put_pixel(x, y, Rgba([color[0], color[1], color[2], a]));
                    }
                }
            }
            out
        }
        TipShape::Bitmap(tip) => {
            let longest = tip.width().max(tip.height()) as f32;
            let k = d as f32 / longest;
            let w = ((tip.width() as f32 * k).round() as u32).max(1);
            let h = ((tip.height() as f32 * k).round() as u32).max(1);
            let mut scaled = imageops::resize(tip.image(), w, h, imageops::FilterType::Triangle);
            for px in scaled.pixels_mut() {
                let a = (px[3] as f32 * color_a).round() as u8;
                *px = Rgba([color[0], color[1], color[2], a]);
            }
            PixelBuffer::from_rgba_image(scaled)
        }
    }
}

/// The current tip shape plus the last stamp rendered from it, keyed by
/// brush size and colour.
#[derive(Default)]
pub struct TipCache {
    shape: TipShape,
    cached: Option<((u32, [u8; 4]), PixelBuffer)>,
}

impl TipCache {
    pub fn new(shape: TipShape) -> Self {
        Self { shape, cached: None }
    }

    pub fn set_shape(&mut self, shape: TipShape) {
        self.shape = shape;
        self.cached = None;
    }

    pub fn stamp(&mut self, brush: &BrushConfig) -> &PixelBuffer {
        let key = (brush.size.to_bits(), brush.color);
        if !matches!(&self.cached, Some((k, _)) if *k == key) {
            self.cached = None;
        }
        let shape = &self.shape;
        &self
            .cached
            .get_or_insert_with(|| (key, render_tip(shape, brush.size, brush.color)))
            .1
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StampPoint {
    pub pos: Pos2,
    pub pressure: f32,
}

pub struct StrokeEngine {
    /// Distance still to travel before the next stamp; carried across segments.
    dist_to_next_dot: f32,
    rng: StdRng,
}

impl Default for StrokeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StrokeEngine {
    pub fn new() -> Self {
        Self {
            dist_to_next_dot: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic jitter, for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            dist_to_next_dot: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Reset the carry so the first stamp lands on the first point.
    pub fn begin_stroke(&mut self) {
        self.dist_to_next_dot = 0.0;
    }

    pub fn carry(&self) -> f32 {
        self.dist_to_next_dot
    }

    /// Where the stamps of one segment go.  Advances the carry.
    pub fn place_stamps(
        &mut self,
        start: Pos2,
        end: Pos2,
        start_pressure: f32,
        end_pressure: f32,
        spacing: f32,
    ) -> Vec<StampPoint> {
        let spacing = spacing.max(1.0);
        let delta = end - start;
        let length = delta.length();

        if length < TAP_EPSILON || !length.is_finite() {
            self.dist_to_next_dot = spacing;
            return vec![StampPoint {
                pos: end,
                pressure: end_pressure.clamp(0.0, 1.0),
            }];
        }

        let mut stamps = Vec::new();
        let mut traveled = 0.0;
        let mut dist = self.dist_to_next_dot;
        while traveled + dist <= length {
            traveled += dist;
            let t = traveled / length;
            stamps.push(StampPoint {
                pos: start + delta * t,
                pressure: (start_pressure + (end_pressure - start_pressure) * t).clamp(0.0, 1.0),
            });
            dist = spacing;
        }
        self.dist_to_next_dot = dist - (length - traveled);
        stamps
    }

    /// Stamp along `start → end` into `target`.  Returns the union of all
    /// stamp footprints, or `None` if nothing landed inside the buffer.
    pub fn draw_segment(
        &mut self,
        target: &mut PixelBuffer,
        brush: &BrushConfig,
        stamp: &PixelBuffer,
        start: Pos2,
        end: Pos2,
        start_pressure: f32,
        end_pressure: f32,
        is_eraser: bool,
        clip: Option<&Selection>,
    ) -> Option<PixelRegion> {
        let points = self.place_stamps(start, end, start_pressure, end_pressure, brush.spacing_px());
        points.into_iter().fold(None, |dirty, point| {
            union_regions(dirty, self.draw_stamp(target, brush, stamp, point, is_eraser, clip))
        })
    }

    /// One stamp with all dynamics applied.
    pub fn draw_stamp(
        &mut self,
        target: &mut PixelBuffer,
        brush: &BrushConfig,
        stamp: &PixelBuffer,
        point: StampPoint,
        is_eraser: bool,
        clip: Option<&Selection>,
    ) -> Option<PixelRegion> {
        let brush = &brush.sanitized(f32::INFINITY);
        let pressure = point.pressure.clamp(0.0, 1.0);

        let mut scale = 0.1 + 0.9 * pressure;
        if brush.jitter_size > 0.0 {
            scale *= self.rng.gen_range((1.0 - brush.jitter_size)..=1.0);
        }

        let mut alpha = brush.flow;
        if brush.jitter_flow > 0.0 {
            alpha *= self.rng.gen_range((1.0 - brush.jitter_flow)..=1.0);
        }

        let tint = if !is_eraser && brush.jitter_hue > 0.0 {
            let degrees = self.rng.gen_range(-0.5f32..0.5) * 360.0 * brush.jitter_hue;
            Some(shift_hue(brush.color, degrees))
        } else {
            None
        };

        let mut pos = point.pos;
        if brush.jitter_scatter > 0.0 {
            let r = brush.size * 2.0 * brush.jitter_scatter;
            pos.x += self.rng.gen_range(-r..=r);
            pos.y += self.rng.gen_range(-r..=r);
        }

        let angle = if brush.jitter_angle > 0.0 {
            self.rng.gen_range(0.0f32..360.0) * brush.jitter_angle
        } else {
            0.0
        };

        rasterize_stamp(target, stamp, pos, brush.size * scale, angle, alpha, tint, is_eraser, clip)
    }
}

/// Composite one stamp image centred on `center`, scaled to `diameter` and
/// rotated by `angle` degrees.  Painting is source-over at `alpha`; erasing
/// multiplies destination alpha by `1 - coverage`.
fn rasterize_stamp(
    target: &mut PixelBuffer,
    stamp: &PixelBuffer,
    center: Pos2,
    diameter: f32,
    angle: f32,
    alpha: f32,
    tint: Option<[u8; 4]>,
    is_eraser: bool,
    clip: Option<&Selection>,
) -> Option<PixelRegion> {
    if !(diameter > 0.0) || !(alpha > 0.0) {
        return None;
    }
    let (sw, sh) = (stamp.width(), stamp.height());
    let k = diameter / sw.max(sh) as f32;
    let m = Affine::translate(-(sw as f32) * 0.5, -(sh as f32) * 0.5)
        .then(&Affine::scale(k, k))
        .then(&Affine::rotate_degrees(angle))
        .then(&Affine::translate(center.x, center.y));
    let region = PixelRegion::from_rect_clamped(m.map_bounds(stamp.rect()), target.width(), target.height())?;
    let inv = m.invert()?;
    let alpha = alpha.min(1.0);
    let src = stamp.as_raw();
    let clip = clip.filter(|c| !c.is_empty());

    for y in region.y..region.max_y() {
        for x in region.x..region.max_x() {
            if let Some(c) = clip
                && !c.contains_pixel(x, y)
            {
                continue;
            }
            let s = inv.map(pos2(x as f32 + 0.5, y as f32 + 0.5));
            let p = bilinear_sample(src, sw, sh, s.x - 0.5, s.y - 0.5);
            if p[3] < 0.5 {
                continue;
            }
            let base = target.get_pixel(x, y);
            let out = if is_eraser {
                let coverage = (p[3] / 255.0 * alpha).min(1.0);
                let a = (base[3] as f32 * (1.0 - coverage)).round() as u8;
                if a == 0 {
                    Rgba([0, 0, 0, 0])
                } else {
                    Rgba([base[0], base[1], base[2], a])
                }
            } else {
                let rgb = match tint {
                    Some(t) => [t[0], t[1], t[2]],
                    None => [p[0].round() as u8, p[1].round() as u8, p[2].round() as u8],
                };
                let top = Rgba([rgb[0], rgb[1], rgb[2], p[3].round().min(255.0) as u8]);
                blend_pixel(base, top, BlendMode::Normal, alpha)
            };
            target.put_pixel(x, y, out);
        }
    }
    Some(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];

    fn brush(size: f32) -> BrushConfig {
        BrushConfig {
            size,
            color: RED,
            ..BrushConfig::default()
        }
    }

    #[test]
    fn first_stamp_lands_on_first_point() {
        let mut engine = StrokeEngine::with_seed(1);
        engine.begin_stroke();
        let stamps = engine.place_stamps(pos2(3.0, 4.0), pos2(13.0, 4.0), 1.0, 1.0, 5.0);
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[0].pos, pos2(3.0, 4.0));
        assert_eq!(stamps[2].pos, pos2(13.0, 4.0));
    }

    #[test]
    fn carry_spills_into_next_segment() {
        let mut engine = StrokeEngine::with_seed(1);
        engine.begin_stroke();
        let a = engine.place_stamps(pos2(0.0, 0.0), pos2(7.0, 0.0), 1.0, 1.0, 5.0);
        assert_eq!(a.len(), 2);
        assert!((engine.carry() - 3.0).abs() < 1e-5);
        let b = engine.place_stamps(pos2(7.0, 0.0), pos2(20.0, 0.0), 1.0, 1.0, 5.0);
        assert_eq!(b.len(), 3);
        for (s, x) in b.iter().zip([10.0, 15.0, 20.0]) {
            assert!((s.pos.x - x).abs() < 1e-4);
        }
    }

    #[test]
    fn tap_stamps_once_and_sets_carry() {
        let mut engine = StrokeEngine::with_seed(1);
        engine.begin_stroke();
        let p = pos2(5.0, 5.0);
        let tap = engine.place_stamps(p, p, 0.5, 0.5, 4.0);
        assert_eq!(tap.len(), 1);
        assert_eq!(engine.carry(), 4.0);
        let next = engine.place_stamps(p, pos2(6.0, 5.0), 0.5, 0.5, 4.0);
        assert!(next.is_empty());
    }

    #[test]
    fn pressure_is_interpolated_and_clamped() {
        let mut engine = StrokeEngine::with_seed(1);
        engine.begin_stroke();
        let s = engine.place_stamps(pos2(0.0, 0.0), pos2(10.0, 0.0), 0.0, 2.0, 5.0);
        assert_eq!(s[0].pressure, 0.0);
        assert_eq!(s[1].pressure, 1.0);
        assert_eq!(s[2].pressure, 1.0);
    }

    #[test]
    fn soft_tip_is_opaque_at_centre_and_clear_at_corner() {
        let tip = render_tip(&TipShape::Soft, 21.0, RED);
        assert_eq!((tip.width(), tip.height()), (21, 21));
        assert!(tip.get_pixel(10, 10)[3] > 240);
        assert_eq!(tip.get_pixel(0, 0)[3], 0);
        assert_eq!(tip.get_pixel(10, 10)[0], 255);
    }

    #[test]
    fn bitmap_tip_takes_brush_colour() {
        let shape = TipShape::Bitmap(PixelBuffer::new_filled(8, 4, Rgba([9, 9, 9, 255])));
        let tip = render_tip(&shape, 16.0, [0, 0, 255, 128]);
        assert_eq!((tip.width(), tip.height()), (16, 8));
        assert_eq!(tip.get_pixel(8, 4), Rgba([0, 0, 255, 128]));
    }

    #[test]
    fn tip_cache_rerenders_on_change() {
        let mut cache = TipCache::default();
        let b = brush(10.0);
        assert_eq!(cache.stamp(&b).width(), 10);
        let bigger = brush(30.0);
        assert_eq!(cache.stamp(&bigger).width(), 30);
    }

    #[test]
    fn segment_paints_along_the_path() {
        let mut engine = StrokeEngine::with_seed(7);
        let b = brush(6.0);
        let stamp = render_tip(&TipShape::Soft, b.size, b.color);
        let mut target = PixelBuffer::new(40, 20);
        engine.begin_stroke();
        let dirty = engine
            .draw_segment(&mut target, &b, &stamp, pos2(5.0, 10.0), pos2(35.0, 10.0), 1.0, 1.0, false, None)
            .unwrap();
        assert!(dirty.contains(5, 10) && dirty.contains(34, 10));
        assert!(target.get_pixel(20, 10)[3] > 0);
        assert_eq!(target.get_pixel(20, 2)[3], 0);
    }

    #[test]
    fn clip_keeps_outside_pixels_untouched() {
        let mut engine = StrokeEngine::with_seed(7);
        let b = brush(8.0);
        let stamp = render_tip(&TipShape::Soft, b.size, b.color);
        let mut target = PixelBuffer::new(20, 20);
        let clip = Selection::from_drag(pos2(0.0, 0.0), pos2(10.0, 20.0));
        engine.begin_stroke();
        engine.draw_segment(&mut target, &b, &stamp, pos2(10.0, 10.0), pos2(10.0, 10.0), 1.0, 1.0, false, Some(&clip));
        assert!(target.get_pixel(9, 10)[3] > 0);
        assert_eq!(target.get_pixel(10, 10)[3], 0);
    }

    #[test]
    fn full_eraser_clears_alpha() {
        let mut engine = StrokeEngine::with_seed(7);
        let b = brush(4.0);
        let stamp = PixelBuffer::new_filled(4, 4, Rgba(RED));
        let mut target = PixelBuffer::new_filled(10, 10, Rgba([0, 255, 0, 255]));
        engine.begin_stroke();
        engine.draw_segment(&mut target, &b, &stamp, pos2(5.0, 5.0), pos2(5.0, 5.0), 1.0, 1.0, true, None);
        assert_eq!(target.get_pixel(5, 5), Rgba([0, 0, 0, 0]));
        assert_eq!(target.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn same_seed_same_pixels() {
        let b = BrushConfig {
            jitter_size: 0.5,
            jitter_scatter: 0.3,
            jitter_angle: 1.0,
            jitter_flow: 0.4,
            jitter_hue: 0.6,
            ..brush(6.0)
        };
        let stamp = render_tip(&TipShape::Soft, b.size, b.color);
        let run = |seed| {
            let mut engine = StrokeEngine::with_seed(seed);
            let mut target = PixelBuffer::new(64, 64);
            engine.begin_stroke();
            engine.draw_segment(&mut target, &b, &stamp, pos2(10.0, 30.0), pos2(50.0, 30.0), 0.8, 0.4, false, None);
            target
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn degenerate_brush_values_do_not_panic() {
        let stamp = render_tip(&TipShape::Soft, 4.0, RED);
        for size in [-4.0, 0.0, f32::NAN, f32::INFINITY] {
            let b = BrushConfig {
                size,
                jitter_scatter: 0.5,
                jitter_size: f32::NAN,
                jitter_flow: 3.0,
                ..brush(4.0)
            };
            let mut engine = StrokeEngine::with_seed(3);
            let mut target = PixelBuffer::new(16, 16);
            engine.begin_stroke();
            let dirty = engine.draw_segment(&mut target, &b, &stamp, pos2(2.0, 8.0), pos2(14.0, 8.0), 1.0, 1.0, false, None);
            if size == -4.0 {
                // Clamped up to a one-pixel brush rather than rejected
                assert!(dirty.is_some());
            }
        }
    }

    #[test]
    fn out_of_range_jitter_is_clamped_when_stamping() {
        let b = BrushConfig {
            jitter_size: -2.0,
            jitter_flow: f32::NAN,
            jitter_scatter: f32::NAN,
            ..brush(6.0)
        };
        let stamp = render_tip(&TipShape::Soft, b.size, b.color);
        let mut engine = StrokeEngine::with_seed(11);
        let mut target = PixelBuffer::new(20, 20);
        engine.begin_stroke();
        engine.draw_segment(&mut target, &b, &stamp, pos2(10.0, 10.0), pos2(10.0, 10.0), 1.0, 1.0, false, None);
        // No scatter: the stamp stays centred on the tap
        assert!(target.get_pixel(10, 10)[3] > 0);
    }
}
